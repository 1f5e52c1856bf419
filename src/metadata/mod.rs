//! Metadata Storage Layer
//!
//! Tracks, per object, the custom headers supplied by clients and the raw
//! list of byte ranges written so far. Records live in an external batched
//! key-value backend with expiry; this module owns the batch layout, the
//! parts compaction and the degraded mode used when no backend is available.

pub mod expiry_worker;
pub mod memory_store;
pub mod sqlite_store;


use crate::byte_range::{self, ByteRange};
use crate::error::MetadataError;
use crate::storage::ObjectPath;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Custom headers persist for one hour after their last write
pub const HEADER_TTL: Duration = Duration::from_secs(3600);

/// Parts persist for three days after their last write
pub const PARTS_TTL: Duration = Duration::from_secs(86400 * 3);

/// Raw parts count at which the contiguous prefix is collapsed
pub const COMPACTION_THRESHOLD: usize = 4;

/// Header names are stored lower-cased so lookups are case-insensitive
pub type HeaderRecord = BTreeMap<String, String>;

/// One operation of a backend batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Remove a key of any kind
    Delete(String),
    /// Upsert fields of a hash
    HashSet { key: String, fields: Vec<(String, String)> },
    /// Read every field of a hash
    HashGetAll(String),
    /// Add members to a set
    SetAdd { key: String, members: Vec<String> },
    /// Remove members from a set
    SetRemove { key: String, members: Vec<String> },
    /// Read every member of a set
    SetMembers(String),
    /// Set the time to live of an existing key
    Expire { key: String, ttl: Duration },
}

/// Reply to one [`BatchOp`], in submission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReply {
    Done,
    Hash(BTreeMap<String, String>),
    Members(Vec<String>),
}

/// Batched key-value store with per-key expiry.
///
/// Operations of one batch run in submission order but are not isolated
/// from other batches; two concurrent batches may interleave.
pub trait MetadataBackend: Send + Sync {
    /// Run the operations and return one reply per operation
    fn execute(&self, batch: Vec<BatchOp>) -> Result<Vec<BatchReply>, MetadataError>;

    /// Drop every key whose deadline has passed, returning how many went
    fn purge_expired(&self) -> Result<usize, MetadataError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Snapshot of an object's metadata, built fresh for every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    headers: HeaderRecord,
    parts: Vec<ByteRange>,
    disabled: bool,
}

impl MetadataRecord {
    fn new(headers: HeaderRecord, parts: Vec<ByteRange>) -> Self {
        Self {
            headers,
            parts,
            disabled: false,
        }
    }

    /// Record returned when no backend is configured or reachable
    pub fn disabled() -> Self {
        Self {
            headers: HeaderRecord::new(),
            parts: Vec::new(),
            disabled: true,
        }
    }

    /// True when the object must be treated as an ordinary whole file
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn headers(&self) -> &HeaderRecord {
        &self.headers
    }

    /// Raw parts, sorted by start; may overlap
    pub fn parts(&self) -> &[ByteRange] {
        &self.parts
    }

    pub fn condensed_parts(&self) -> Vec<ByteRange> {
        byte_range::condense(&self.parts)
    }

    /// Condensed parts in `x-parts` form
    pub fn parts_header(&self) -> String {
        byte_range::format_ranges(&self.condensed_parts())
    }
}

/// Changes applied by [`MetadataStore::upsert`]
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    headers: Option<HeaderRecord>,
    parts: Option<Vec<ByteRange>>,
    reset: bool,
}

impl MetadataUpdate {
    /// Merge these headers into the persisted map
    pub fn with_headers(mut self, headers: HeaderRecord) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_lowercase(), value))
            .collect();
        self.headers = Some(headers);
        self
    }

    /// Add these ranges to the persisted parts
    pub fn with_parts(mut self, parts: Vec<ByteRange>) -> Self {
        self.parts = Some(parts);
        self
    }

    /// Drop prior headers and parts before applying anything else
    pub fn reset(mut self) -> Self {
        self.reset = true;
        self
    }
}

fn headers_key(path: &ObjectPath) -> String {
    format!("H{{{}}}", path)
}

fn parts_key(path: &ObjectPath) -> String {
    format!("P{{{}}}", path)
}

/// Entry point to object metadata; holds the injected backend, if any
#[derive(Clone)]
pub struct MetadataStore {
    backend: Option<Arc<dyn MetadataBackend>>,
}

impl MetadataStore {
    pub fn new(backend: Arc<dyn MetadataBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Store running in degraded mode
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Backend behind the store, absent in degraded mode
    pub fn backend(&self) -> Option<&Arc<dyn MetadataBackend>> {
        self.backend.as_ref()
    }

    /// Read the current record without changing it
    pub fn fetch(&self, path: &ObjectPath) -> MetadataRecord {
        self.upsert(path, MetadataUpdate::default())
    }

    /// Apply `update` and return the resulting record.
    ///
    /// Backend failures never surface: the record comes back disabled.
    pub fn upsert(&self, path: &ObjectPath, update: MetadataUpdate) -> MetadataRecord {
        let Some(backend) = &self.backend else {
            return MetadataRecord::disabled();
        };

        match apply_update(backend.as_ref(), path, &update) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "Metadata backend {} failed for {}, continuing without metadata: {}",
                    backend.name(),
                    path,
                    e
                );
                MetadataRecord::disabled()
            }
        }
    }
}

fn apply_update(
    backend: &dyn MetadataBackend,
    path: &ObjectPath,
    update: &MetadataUpdate,
) -> Result<MetadataRecord, MetadataError> {
    let headers_key = headers_key(path);
    let parts_key = parts_key(path);

    let mut batch = Vec::new();
    if update.reset {
        batch.push(BatchOp::Delete(headers_key.clone()));
        batch.push(BatchOp::Delete(parts_key.clone()));
    }

    if let Some(headers) = update.headers.as_ref().filter(|h| !h.is_empty()) {
        batch.push(BatchOp::HashSet {
            key: headers_key.clone(),
            fields: headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        });
        batch.push(BatchOp::Expire {
            key: headers_key.clone(),
            ttl: HEADER_TTL,
        });
    }
    batch.push(BatchOp::HashGetAll(headers_key.clone()));

    if let Some(parts) = &update.parts {
        batch.push(BatchOp::SetAdd {
            key: parts_key.clone(),
            members: parts.iter().map(ByteRange::to_string).collect(),
        });
        batch.push(BatchOp::Expire {
            key: parts_key.clone(),
            ttl: PARTS_TTL,
        });
    }
    batch.push(BatchOp::SetMembers(parts_key.clone()));

    let replies = backend.execute(batch)?;
    let headers = replies
        .iter()
        .find_map(|reply| match reply {
            BatchReply::Hash(fields) => Some(fields.clone()),
            _ => None,
        })
        .ok_or_else(|| MetadataError::UnexpectedReply(headers_key.clone()))?;
    let members = last_members(&replies).ok_or_else(|| MetadataError::UnexpectedReply(parts_key.clone()))?;

    let mut parts = byte_range::parse_ranges(members);
    if update.parts.is_some() && parts.len() >= COMPACTION_THRESHOLD {
        parts = compact_parts(backend, &parts_key, parts)?;
    }

    Ok(MetadataRecord::new(headers, parts))
}

fn last_members(replies: &[BatchReply]) -> Option<&Vec<String>> {
    replies.iter().rev().find_map(|reply| match reply {
        BatchReply::Members(members) => Some(members),
        _ => None,
    })
}

/// Replace the contiguous-from-zero prefix of the parts set with one range
fn compact_parts(
    backend: &dyn MetadataBackend,
    parts_key: &str,
    parts: Vec<ByteRange>,
) -> Result<Vec<ByteRange>, MetadataError> {
    if !byte_range::starts_at_zero(&parts) {
        return Ok(parts);
    }

    let last = byte_range::last_contiguous_byte(&parts);
    let prefix: Vec<ByteRange> = parts.iter().take_while(|r| r.end <= last).copied().collect();
    let collapsed = ByteRange { start: 0, end: last };
    if prefix == [collapsed] {
        return Ok(parts);
    }

    debug!("Compacting {} parts of {} into {}", prefix.len(), parts_key, collapsed);
    let batch = vec![
        BatchOp::SetRemove {
            key: parts_key.to_string(),
            members: prefix.iter().map(ByteRange::to_string).collect(),
        },
        BatchOp::SetAdd {
            key: parts_key.to_string(),
            members: vec![collapsed.to_string()],
        },
        BatchOp::Expire {
            key: parts_key.to_string(),
            ttl: PARTS_TTL,
        },
        BatchOp::SetMembers(parts_key.to_string()),
    ];
    let replies = backend.execute(batch)?;
    let members = last_members(&replies).ok_or_else(|| MetadataError::UnexpectedReply(parts_key.to_string()))?;
    Ok(byte_range::parse_ranges(members))
}
