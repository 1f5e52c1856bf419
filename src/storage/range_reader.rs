//! Lazy, block-at-a-time reads of a byte range

use bytes::Bytes;
use log::{debug, warn};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Largest block yielded by a [`RangeReader`]
pub const READ_BLOCK_SIZE: usize = 1024;

/// Single-pass iterator over `length` bytes of a file starting at `first`.
///
/// The reader owns the file handle, so the handle closes when the reader is
/// exhausted or dropped early. After an error or end of data it yields
/// nothing more.
#[derive(Debug)]
pub struct RangeReader {
    file: Option<File>,
    remaining: u64,
}

impl RangeReader {
    /// Position `file` at `first` and prepare to read `length` bytes
    pub fn new(mut file: File, first: u64, length: u64) -> io::Result<Self> {
        file.seek(SeekFrom::Start(first))?;
        Ok(Self {
            file: Some(file),
            remaining: length,
        })
    }

    /// Bytes still to be produced
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed range reader with {} bytes unread", self.remaining);
        }
        self.remaining = 0;
    }
}

impl Iterator for RangeReader {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            self.close();
            return None;
        }
        let file = self.file.as_mut()?;

        let want = self.remaining.min(READ_BLOCK_SIZE as u64) as usize;
        let mut block = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            match file.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close();
                    return Some(Err(e));
                }
            }
        }

        if filled == 0 {
            // The file shrank after it was opened; the response comes up short
            warn!("Range read ended {} bytes early, file shorter than when opened", self.remaining);
            self.close();
            return None;
        }
        block.truncate(filled);
        self.remaining -= filled as u64;
        Some(Ok(Bytes::from(block)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempfile;

    fn file_with(data: &[u8]) -> File {
        let mut file = tempfile().unwrap();
        file.write_all(data).unwrap();
        file
    }

    #[test]
    fn test_blocks_never_exceed_block_size() {
        let data: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();
        let reader = RangeReader::new(file_with(&data), 0, data.len() as u64).unwrap();

        let blocks: Vec<Bytes> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.len() <= READ_BLOCK_SIZE));
        assert_eq!(blocks.concat(), data);
    }

    #[test]
    fn test_reads_only_requested_range() {
        let reader = RangeReader::new(file_with(b"0123456789"), 3, 4).unwrap();
        let out: Vec<u8> = reader.flat_map(|b| b.unwrap().to_vec()).collect();
        assert_eq!(out, b"3456");
    }

    #[test]
    fn test_stops_at_end_of_file() {
        let reader = RangeReader::new(file_with(b"abc"), 1, 100).unwrap();
        let out: Vec<u8> = reader.flat_map(|b| b.unwrap().to_vec()).collect();
        assert_eq!(out, b"bc");
    }

    #[test]
    fn test_truncated_file_ends_stream_early() {
        let file = file_with(&[1u8; 2048]);
        let reader = RangeReader::new(file.try_clone().unwrap(), 0, 2048).unwrap();
        file.set_len(1500).unwrap();

        let blocks: Vec<Bytes> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(blocks.iter().map(Bytes::len).sum::<usize>(), 1500);
    }

    #[test]
    fn test_early_abandonment_releases_handle() {
        let data = vec![7u8; 4096];
        let mut reader = RangeReader::new(file_with(&data), 0, 4096).unwrap();
        assert_eq!(reader.next().unwrap().unwrap().len(), READ_BLOCK_SIZE);
        assert_eq!(reader.remaining(), 4096 - READ_BLOCK_SIZE as u64);
        drop(reader);
    }

    #[test]
    fn test_zero_length_yields_nothing() {
        let mut reader = RangeReader::new(file_with(b"abc"), 0, 0).unwrap();
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }
}
