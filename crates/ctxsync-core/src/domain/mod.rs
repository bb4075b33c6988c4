//! Domain entities and rules
//!
//! This module contains the core domain types for ctxsync:
//! - Newtypes for workspace identity and content hashes
//! - File metadata records and the "needs sync" rule
//! - Language detection from file extensions
//! - Domain-specific error types

pub mod errors;
pub mod file_metadata;
pub mod language;
pub mod newtypes;

pub use errors::DomainError;
pub use file_metadata::{FileMetadata, WorkspaceSyncState};
pub use language::Language;
pub use newtypes::{ContentHash, WorkspaceId};
