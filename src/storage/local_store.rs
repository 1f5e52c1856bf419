//! Local filesystem implementation of the chunked file store

use crate::config::StorageConfig;
use crate::storage::range_lock::lock_for_write;
use crate::storage::range_reader::RangeReader;
use crate::storage::ObjectPath;
use log::{debug, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Outcome of a single chunk write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWrite {
    /// Bytes copied from the source
    pub written: u64,
    /// Size of the file once the write finished
    pub file_size: u64,
}

/// An opened object ready to serve range reads
#[derive(Debug)]
pub struct StoredObject {
    file: File,
    size: u64,
}

impl StoredObject {
    /// Size of the file at the time it was opened
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Turn the handle into a lazy reader of `length` bytes from `first`
    pub fn read_range(self, first: u64, length: u64) -> io::Result<RangeReader> {
        RangeReader::new(self.file, first, length)
    }
}

/// Stores each object as a plain file at `<root><path>`
#[derive(Debug, Clone)]
pub struct ChunkedFileStore {
    root: PathBuf,
}

impl ChunkedFileStore {
    /// Create a store rooted at the configured directory, creating it if needed
    pub fn new(config: &StorageConfig) -> io::Result<Self> {
        let root = PathBuf::from(&config.root);
        fs::create_dir_all(&root)?;
        info!("Using storage root: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn local_path(&self, path: &ObjectPath) -> PathBuf {
        path.local_path(&self.root)
    }

    /// Write a chunk at `offset`, holding an exclusive lock on the bytes
    /// being written.
    ///
    /// With a known `length` exactly that many bytes are taken from `source`
    /// and a short source is an error. Without one the whole file is locked
    /// and `source` is drained.
    pub fn write_chunk<R: Read>(
        &self,
        path: &ObjectPath,
        source: &mut R,
        offset: u64,
        length: Option<u64>,
    ) -> io::Result<ChunkWrite> {
        let local_path = self.local_path(path);
        let file = open_for_write(&local_path)?;

        let lock = lock_for_write(&file, offset, length)?;
        let mut handle = &file;
        handle.seek(SeekFrom::Start(offset))?;
        let written = match length {
            Some(len) => {
                let copied = io::copy(&mut source.take(len), &mut handle)?;
                if copied != len {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("expected {} bytes for {}, received {}", len, path, copied),
                    ));
                }
                copied
            }
            None => io::copy(source, &mut handle)?,
        };
        handle.flush()?;
        let file_size = file.metadata()?.len();
        drop(lock);

        debug!(
            "Wrote {} bytes to {} at offset {} (file size {})",
            written, path, offset, file_size
        );
        Ok(ChunkWrite { written, file_size })
    }

    /// Open an existing object for reading
    pub fn open(&self, path: &ObjectPath) -> io::Result<StoredObject> {
        let file = File::open(self.local_path(path))?;
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is a directory", path),
            ));
        }
        Ok(StoredObject {
            file,
            size: metadata.len(),
        })
    }

    /// Lazily read `length` bytes of an object starting at `first`
    pub fn read_range(&self, path: &ObjectPath, first: u64, length: u64) -> io::Result<RangeReader> {
        self.open(path)?.read_range(first, length)
    }

    /// Whether two object paths name the same file on disk
    pub fn same_file(&self, a: &ObjectPath, b: &ObjectPath) -> bool {
        if a == b {
            return true;
        }
        match (
            fs::canonicalize(self.local_path(a)),
            fs::canonicalize(self.local_path(b)),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Copy the full contents of `src` over `dst`.
    ///
    /// Not coordinated with writers on either path. Copying a file onto
    /// itself is refused, since opening the destination truncates it.
    pub fn copy(&self, src: &ObjectPath, dst: &ObjectPath) -> io::Result<u64> {
        if self.same_file(src, dst) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} and {} are the same file", src, dst),
            ));
        }
        let local_src = self.local_path(src);
        let local_dst = self.local_path(dst);
        ensure_parent(&local_dst)?;
        let copied = fs::copy(&local_src, &local_dst)?;
        debug!("Copied {} bytes from {} to {}", copied, src, dst);
        Ok(copied)
    }

    /// Remove an object, returning whether it is absent afterwards.
    ///
    /// Filesystem errors are swallowed; the existence check decides.
    pub fn delete(&self, path: &ObjectPath) -> bool {
        let local_path = self.local_path(path);
        if let Err(e) = fs::remove_file(&local_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", local_path.display(), e);
            }
        }
        !local_path.exists()
    }
}

fn ensure_parent(local_path: &Path) -> io::Result<()> {
    match local_path.parent() {
        // create_dir_all tolerates a concurrent creator
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

fn open_for_write(local_path: &Path) -> io::Result<File> {
    ensure_parent(local_path)?;
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(local_path)
}
