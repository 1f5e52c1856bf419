//! Streaming digests over byte blocks

use bytes::Bytes;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io;
use std::str::FromStr;

/// Hash functions offered for content checksums
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl Default for ChecksumAlgorithm {
    fn default() -> Self {
        ChecksumAlgorithm::Sha1
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            _ => Err(format!("Unknown checksum algorithm: {}", s)),
        }
    }
}

impl ChecksumAlgorithm {
    /// Resolve a client-supplied name; unknown names fall back to sha1
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    fn hasher(self) -> Hasher {
        match self {
            ChecksumAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    /// Hex digest of an in-memory buffer
    pub fn digest(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finish()
    }
}

enum Hasher {
    Md5(md5::Context),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Hasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Consume every block through the selected hash and return the hex digest.
///
/// The blocks are used up; a caller that also needs the raw bytes has to
/// open a second reader.
pub fn checksum<I>(blocks: I, algorithm: ChecksumAlgorithm) -> io::Result<String>
where
    I: IntoIterator<Item = io::Result<Bytes>>,
{
    let mut hasher = algorithm.hasher();
    for block in blocks {
        hasher.update(&block?);
    }
    Ok(hasher.finish())
}
