//! Chunked File Storage
//!
//! Maps object paths onto files under a configured root and performs the
//! byte-level work of the store: locked partial writes, lazy range reads,
//! streaming checksums, copy and delete. Nothing here knows about metadata;
//! sharing between concurrent requests happens only through the filesystem.

pub mod checksum;
pub mod local_store;
pub mod range_lock;
pub mod range_reader;


use crate::error::StoreError;
use std::fmt;
use std::path::{Path, PathBuf};

pub use checksum::{checksum, ChecksumAlgorithm};
pub use local_store::{ChunkWrite, ChunkedFileStore, StoredObject};
pub use range_reader::{RangeReader, READ_BLOCK_SIZE};

/// Normalized key identifying one object.
///
/// Always starts with `/`; used verbatim as the metadata key and joined
/// under the storage root to find the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Validate a request path
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        if !raw.starts_with('/') {
            return Err(StoreError::BadRequest(format!("path must be absolute: {}", raw)));
        }
        if raw.trim_matches('/').is_empty() {
            return Err(StoreError::NotFound("no object named by an empty path".to_string()));
        }
        if raw.split('/').any(|segment| segment == "..") {
            return Err(StoreError::BadRequest(format!("path escapes storage root: {}", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Location of the object's bytes under `root`
    pub fn local_path(&self, root: &Path) -> PathBuf {
        root.join(self.0.trim_start_matches('/'))
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_path_parse() {
        assert_eq!(ObjectPath::parse("/a/b.txt").unwrap().as_str(), "/a/b.txt");
        assert!(matches!(ObjectPath::parse("a/b"), Err(StoreError::BadRequest(_))));
        assert!(matches!(ObjectPath::parse("/"), Err(StoreError::NotFound(_))));
        assert!(matches!(ObjectPath::parse("/a/../../etc"), Err(StoreError::BadRequest(_))));
    }

    #[test]
    fn test_object_path_local_path() {
        let path = ObjectPath::parse("/videos/clip.mp4").unwrap();
        assert_eq!(
            path.local_path(Path::new("/srv/data")),
            PathBuf::from("/srv/data/videos/clip.mp4")
        );
    }
}
