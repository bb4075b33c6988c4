//! ctxsync Core - Domain types and ports for the workspace context index
//!
//! This crate contains the hexagonal core shared by every other crate:
//! - **Domain types** - `FileMetadata`, `WorkspaceId`, `ContentHash`, `Language`
//! - **Port definitions** - `IKeyValueStore` (persistence) and `IUploader` (remote sync)
//! - **Metadata store** - `MetadataStore`, the per-workspace record keeper built on `IKeyValueStore`
//! - **Configuration** - YAML-backed `Config` with validation and a builder
//!
//! # Architecture
//!
//! The domain module holds pure data and rules with no I/O. Ports define the
//! trait boundaries that adapter crates (`ctxsync-cache`, `ctxsync-remote`)
//! implement. The sync engine in `ctxsync-sync` is written purely against
//! these ports.

pub mod config;
pub mod domain;
pub mod metadata;
pub mod ports;

pub use metadata::MetadataStore;
