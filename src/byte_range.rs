//! Byte Range Algebra
//!
//! Pure functions over inclusive `(start, end)` byte ranges: parsing the
//! `start-end` tokens persisted in the parts set, condensing overlapping or
//! touching ranges, and measuring the contiguous prefix that starts at byte 0.

use std::fmt;
use std::str::FromStr;

/// An inclusive range of byte offsets, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Create a range, returning `None` when `start > end`
    pub fn new(start: u64, end: u64) -> Option<Self> {
        if start > end {
            return None;
        }
        Some(Self { start, end })
    }

    /// Range covering `length` bytes written at `offset`; `None` for an empty write
    pub fn from_offset_len(offset: u64, length: u64) -> Option<Self> {
        if length == 0 {
            return None;
        }
        let end = offset.checked_add(length - 1)?;
        Some(Self { start: offset, end })
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for ByteRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (first, last) = s
            .split_once('-')
            .ok_or_else(|| format!("Missing separator in byte range: {}", s))?;
        if !is_digits(first) || !is_digits(last) {
            return Err(format!("Invalid byte range: {}", s));
        }
        let start = first.parse::<u64>().map_err(|e| e.to_string())?;
        let end = last.parse::<u64>().map_err(|e| e.to_string())?;
        ByteRange::new(start, end).ok_or_else(|| format!("Inverted byte range: {}", s))
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Parse `offset-last` tokens into ranges sorted by start.
/// Malformed tokens are skipped.
pub fn parse_ranges<I, S>(tokens: I) -> Vec<ByteRange>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ranges: Vec<ByteRange> = tokens
        .into_iter()
        .filter_map(|token| token.as_ref().trim().parse().ok())
        .collect();
    ranges.sort();
    ranges
}

/// Merge overlapping and adjacent ranges into a minimal disjoint set.
pub fn condense(ranges: &[ByteRange]) -> Vec<ByteRange> {
    let mut sorted = ranges.to_vec();
    sorted.sort();

    let mut condensed = Vec::with_capacity(sorted.len());
    let mut iter = sorted.into_iter();
    let Some(mut running) = iter.next() else {
        return condensed;
    };

    for range in iter {
        if range.start <= running.end.saturating_add(1) {
            running.end = running.end.max(range.end);
        } else {
            condensed.push(running);
            running = range;
        }
    }
    condensed.push(running);
    condensed
}

/// Last byte of the unbroken run starting at offset 0.
///
/// Returns 0 when no range starts at 0; callers that need to tell "nothing
/// readable" apart from "only byte 0 readable" must check the ranges first.
pub fn last_contiguous_byte(ranges: &[ByteRange]) -> u64 {
    let mut sorted = ranges.to_vec();
    sorted.sort();

    let mut iter = sorted.into_iter();
    let mut end = match iter.next() {
        Some(first) if first.start == 0 => first.end,
        _ => return 0,
    };

    for range in iter {
        if range.start > end.saturating_add(1) {
            break;
        }
        end = end.max(range.end);
    }
    end
}

/// Total number of missing bytes between the first and last written byte.
pub fn sum_gaps(ranges: &[ByteRange]) -> u64 {
    condense(ranges)
        .windows(2)
        .map(|pair| pair[1].start.saturating_sub(pair[0].end + 1))
        .sum()
}

/// Whether the ranges include a span starting at byte 0
pub fn starts_at_zero(ranges: &[ByteRange]) -> bool {
    ranges.iter().map(|r| r.start).min() == Some(0)
}

/// Join ranges as `start-end` tokens separated by commas (the `x-parts` format)
pub fn format_ranges(ranges: &[ByteRange]) -> String {
    ranges
        .iter()
        .map(ByteRange::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a `Range: bytes=<first>-[<last>]` header.
///
/// Returns the first byte and the optional last byte, or `None` when the
/// header does not have that exact shape.
pub fn parse_range_header(header: &str) -> Option<(u64, Option<u64>)> {
    let spec = header.strip_prefix("bytes=")?;
    let (first, last) = spec.split_once('-')?;
    if !is_digits(first) {
        return None;
    }
    let first = first.parse::<u64>().ok()?;
    if last.is_empty() {
        return Some((first, None));
    }
    if !is_digits(last) {
        return None;
    }
    Some((first, Some(last.parse::<u64>().ok()?)))
}
