//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for workspace identity and content digests.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::DomainError;

// ============================================================================
// WorkspaceId
// ============================================================================

/// Identity of a tracked workspace: its absolute, normalized root path
///
/// WorkspaceId ensures the root is:
/// - Absolute
/// - Normalized (no `.` or `..` components)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct WorkspaceId(PathBuf);

impl WorkspaceId {
    /// Create a new WorkspaceId, validating the root is absolute
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is relative or escapes `/`
    pub fn new(root: PathBuf) -> Result<Self, DomainError> {
        if !root.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "Workspace root must be absolute: {}",
                root.display()
            )));
        }

        Ok(Self(normalize_path(&root)?))
    }

    /// Get the root directory
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Key-safe encoding of the root, used to namespace persisted records
    #[must_use]
    pub fn encoded(&self) -> String {
        let raw = self.0.to_string_lossy();
        url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
    }

    /// Whether `path` lies inside this workspace (the root itself included)
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.0)
    }

    /// Get `path` relative to the workspace root
    ///
    /// # Errors
    /// Returns `DomainError::PathNotInWorkspace` if the path is outside the root
    pub fn relative(&self, path: &Path) -> Result<PathBuf, DomainError> {
        path.strip_prefix(&self.0)
            .map(Path::to_path_buf)
            .map_err(|_| {
                DomainError::PathNotInWorkspace(format!(
                    "{} is not within {}",
                    path.display(),
                    self.0.display()
                ))
            })
    }
}

impl Display for WorkspaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<PathBuf> for WorkspaceId {
    type Error = DomainError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl From<WorkspaceId> for PathBuf {
    fn from(id: WorkspaceId) -> Self {
        id.0
    }
}

/// Resolve `.` and `..` lexically; the path may not exist yet
fn normalize_path(path: &Path) -> Result<PathBuf, DomainError> {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(p) => normalized.push(p.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(DomainError::InvalidPath(
                        "Path escapes root via ..".to_string(),
                    ));
                }
            }
            Component::Normal(c) => normalized.push(c),
        }
    }

    Ok(normalized)
}

// ============================================================================
// ContentHash
// ============================================================================

/// SHA-256 digest of a file's bytes, as 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash a byte slice
    #[must_use]
    pub fn compute(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Wrap an existing hex digest
    ///
    /// # Errors
    /// Returns `DomainError::InvalidHash` unless the value is 64 lowercase hex chars
    pub fn new(value: String) -> Result<Self, DomainError> {
        let valid = value.len() == 64
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !valid {
            return Err(DomainError::InvalidHash(value));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_id_requires_absolute() {
        assert!(WorkspaceId::new(PathBuf::from("relative/root")).is_err());
        assert!(WorkspaceId::new(PathBuf::from("/home/dev/project")).is_ok());
    }

    #[test]
    fn test_workspace_id_normalizes() {
        let id = WorkspaceId::new(PathBuf::from("/home/dev/./project/../project")).unwrap();
        assert_eq!(id.as_path(), Path::new("/home/dev/project"));
    }

    #[test]
    fn test_workspace_id_rejects_escape() {
        let result = WorkspaceId::new(PathBuf::from("/../.."));
        assert!(matches!(result, Err(DomainError::InvalidPath(_))));
    }

    #[test]
    fn test_workspace_id_encoded_is_key_safe() {
        let id = WorkspaceId::new(PathBuf::from("/home/dev/my project")).unwrap();
        let encoded = id.encoded();
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains(' '));
        assert_eq!(encoded, "%2Fhome%2Fdev%2Fmy+project");
    }

    #[test]
    fn test_workspace_relative() {
        let id = WorkspaceId::new(PathBuf::from("/ws")).unwrap();
        assert_eq!(
            id.relative(Path::new("/ws/src/main.rs")).unwrap(),
            PathBuf::from("src/main.rs")
        );
        assert!(id.relative(Path::new("/other/file")).is_err());
        assert!(id.contains(Path::new("/ws/a")));
        assert!(!id.contains(Path::new("/wsx/a")));
    }

    #[test]
    fn test_workspace_id_serde_roundtrip_rejects_relative() {
        let json = serde_json::to_string(&WorkspaceId::new(PathBuf::from("/ws")).unwrap()).unwrap();
        assert_eq!(json, "\"/ws\"");
        assert!(serde_json::from_str::<WorkspaceId>("\"rel\"").is_err());
    }

    #[test]
    fn test_content_hash_compute() {
        let hash = ContentHash::compute(b"hello");
        assert_eq!(
            hash.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_content_hash_validation() {
        assert!(ContentHash::new("abc".to_string()).is_err());
        assert!(ContentHash::new("G".repeat(64)).is_err());
        assert!(ContentHash::new("A".repeat(64)).is_err());
        assert!(ContentHash::new("a".repeat(64)).is_ok());
    }

    #[test]
    fn test_content_hash_differs_for_different_content() {
        assert_ne!(ContentHash::compute(b"a"), ContentHash::compute(b"b"));
        assert_eq!(ContentHash::compute(b"a"), ContentHash::compute(b"a"));
    }
}
