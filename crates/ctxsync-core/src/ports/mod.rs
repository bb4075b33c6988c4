//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the sync engine depends on, implemented in
//! adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IKeyValueStore`] - Persisted key/value storage for metadata records
//! - [`IUploader`] - Delivery of changed files to the remote context service

pub mod key_value_store;
pub mod uploader;

pub use key_value_store::{IKeyValueStore, InMemoryKeyValueStore};
pub use uploader::{IUploader, UploadError, UploadFile};
