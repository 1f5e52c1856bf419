//! In-memory metadata backend with per-key expiry

use crate::error::MetadataError;
use crate::metadata::{BatchOp, BatchReply, MetadataBackend};
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    // Added to Instant::now() so tests can move time forward
    skew: Duration,
}

impl State {
    fn now(&self) -> Instant {
        Instant::now() + self.skew
    }

    /// Live entry for `key`, dropping it first if it has expired
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = self.now();
        let expired = matches!(
            self.entries.get(key),
            Some(Entry { expires_at: Some(deadline), .. }) if *deadline <= now
        );
        if expired {
            debug!("Expired metadata key {}", key);
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }
}

/// Metadata backend kept in process memory.
///
/// Each operation takes the lock on its own, so batches interleave the same
/// way they would against a networked store.
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, MetadataError> {
        self.state.lock().map_err(|_| MetadataError::Poisoned)
    }

    /// Drop every key, as if all TTLs fired at once
    pub fn flush(&self) {
        if let Ok(mut state) = self.lock() {
            state.entries.clear();
        }
    }

    /// Move the backend clock forward
    pub fn advance_clock(&self, by: Duration) {
        if let Ok(mut state) = self.lock() {
            state.skew += by;
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let Ok(mut state) = self.lock() else {
            return 0;
        };
        let keys: Vec<String> = state.entries.keys().cloned().collect();
        keys.iter().filter(|key| state.live(key).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of a key
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.lock().ok()?;
        let now = state.now();
        let deadline = state.live(key)?.expires_at?;
        Some(deadline.saturating_duration_since(now))
    }

    /// Members of a set key, sorted
    pub fn members(&self, key: &str) -> Vec<String> {
        match self.apply(BatchOp::SetMembers(key.to_string())) {
            Ok(BatchReply::Members(members)) => members,
            _ => Vec::new(),
        }
    }

    fn apply(&self, op: BatchOp) -> Result<BatchReply, MetadataError> {
        let mut state = self.lock()?;
        match op {
            BatchOp::Delete(key) => {
                state.entries.remove(&key);
                Ok(BatchReply::Done)
            }
            BatchOp::HashSet { key, fields } => {
                if state.live(&key).is_none() {
                    state.entries.insert(
                        key.clone(),
                        Entry {
                            value: Value::Hash(BTreeMap::new()),
                            expires_at: None,
                        },
                    );
                }
                match state.live(&key).map(|entry| &mut entry.value) {
                    Some(Value::Hash(hash)) => {
                        hash.extend(fields);
                        Ok(BatchReply::Done)
                    }
                    _ => Err(MetadataError::WrongType(key)),
                }
            }
            BatchOp::HashGetAll(key) => match state.live(&key).map(|entry| &entry.value) {
                Some(Value::Hash(hash)) => Ok(BatchReply::Hash(hash.clone())),
                Some(Value::Set(_)) => Err(MetadataError::WrongType(key)),
                None => Ok(BatchReply::Hash(BTreeMap::new())),
            },
            BatchOp::SetAdd { key, members } => {
                if members.is_empty() {
                    return Ok(BatchReply::Done);
                }
                if state.live(&key).is_none() {
                    state.entries.insert(
                        key.clone(),
                        Entry {
                            value: Value::Set(BTreeSet::new()),
                            expires_at: None,
                        },
                    );
                }
                match state.live(&key).map(|entry| &mut entry.value) {
                    Some(Value::Set(set)) => {
                        set.extend(members);
                        Ok(BatchReply::Done)
                    }
                    _ => Err(MetadataError::WrongType(key)),
                }
            }
            BatchOp::SetRemove { key, members } => {
                let emptied = match state.live(&key).map(|entry| &mut entry.value) {
                    Some(Value::Set(set)) => {
                        for member in &members {
                            set.remove(member);
                        }
                        set.is_empty()
                    }
                    Some(Value::Hash(_)) => return Err(MetadataError::WrongType(key)),
                    None => false,
                };
                if emptied {
                    state.entries.remove(&key);
                }
                Ok(BatchReply::Done)
            }
            BatchOp::SetMembers(key) => match state.live(&key).map(|entry| &entry.value) {
                Some(Value::Set(set)) => Ok(BatchReply::Members(set.iter().cloned().collect())),
                Some(Value::Hash(_)) => Err(MetadataError::WrongType(key)),
                None => Ok(BatchReply::Members(Vec::new())),
            },
            BatchOp::Expire { key, ttl } => {
                let deadline = state.now() + ttl;
                if let Some(entry) = state.live(&key) {
                    entry.expires_at = Some(deadline);
                }
                Ok(BatchReply::Done)
            }
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataBackend for MemoryBackend {
    fn execute(&self, batch: Vec<BatchOp>) -> Result<Vec<BatchReply>, MetadataError> {
        batch.into_iter().map(|op| self.apply(op)).collect()
    }

    fn purge_expired(&self) -> Result<usize, MetadataError> {
        let mut state = self.lock()?;
        let now = state.now();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| !matches!(entry.expires_at, Some(deadline) if deadline <= now));
        let purged = before - state.entries.len();
        if purged > 0 {
            debug!("Purged {} expired metadata keys", purged);
        }
        Ok(purged)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_hash_and_set() {
        let backend = MemoryBackend::new();
        let replies = backend
            .execute(vec![
                BatchOp::HashSet {
                    key: "H{/a}".into(),
                    fields: vec![("k".into(), "v".into())],
                },
                BatchOp::HashGetAll("H{/a}".into()),
                BatchOp::SetAdd {
                    key: "P{/a}".into(),
                    members: vec!["0-1".into(), "0-1".into(), "2-3".into()],
                },
                BatchOp::SetMembers("P{/a}".into()),
            ])
            .unwrap();

        assert_eq!(replies.len(), 4);
        assert_eq!(
            replies[1],
            BatchReply::Hash(BTreeMap::from([("k".to_string(), "v".to_string())]))
        );
        assert_eq!(
            replies[3],
            BatchReply::Members(vec!["0-1".to_string(), "2-3".to_string()])
        );
        assert_eq!(backend.len(), 2);
    }

    #[test]
    fn test_memory_backend_expiry() {
        let backend = MemoryBackend::new();
        backend
            .execute(vec![
                BatchOp::SetAdd {
                    key: "P{/e}".into(),
                    members: vec!["0-9".into()],
                },
                BatchOp::Expire {
                    key: "P{/e}".into(),
                    ttl: Duration::from_secs(60),
                },
            ])
            .unwrap();

        let ttl = backend.ttl("P{/e}").unwrap();
        assert!(ttl <= Duration::from_secs(60) && ttl > Duration::from_secs(50));

        backend.advance_clock(Duration::from_secs(61));
        assert!(backend.members("P{/e}").is_empty());
        assert!(backend.is_empty());
    }

    #[test]
    fn test_expire_on_missing_key_is_noop() {
        let backend = MemoryBackend::new();
        backend
            .execute(vec![BatchOp::Expire {
                key: "nothing".into(),
                ttl: Duration::from_secs(1),
            }])
            .unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn test_set_remove_deletes_empty_key() {
        let backend = MemoryBackend::new();
        backend
            .execute(vec![
                BatchOp::SetAdd {
                    key: "s".into(),
                    members: vec!["a".into()],
                },
                BatchOp::SetRemove {
                    key: "s".into(),
                    members: vec!["a".into()],
                },
            ])
            .unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn test_wrong_type_is_an_error() {
        let backend = MemoryBackend::new();
        backend
            .execute(vec![BatchOp::SetAdd {
                key: "k".into(),
                members: vec!["a".into()],
            }])
            .unwrap();
        assert!(backend.execute(vec![BatchOp::HashGetAll("k".into())]).is_err());
    }

    #[test]
    fn test_purge_expired_drops_untouched_keys() {
        let backend = MemoryBackend::new();
        let batch: Vec<BatchOp> = (0..100)
            .flat_map(|i| {
                let key = format!("P{{/bulk/{}}}", i);
                [
                    BatchOp::SetAdd {
                        key: key.clone(),
                        members: vec!["0-9".into()],
                    },
                    BatchOp::Expire {
                        key,
                        ttl: Duration::from_secs(1),
                    },
                ]
            })
            .collect();
        backend.execute(batch).unwrap();
        backend
            .execute(vec![BatchOp::HashSet {
                key: "H{/keep}".into(),
                fields: vec![("a".into(), "b".into())],
            }])
            .unwrap();

        assert_eq!(backend.purge_expired().unwrap(), 0);
        backend.advance_clock(Duration::from_secs(3600));
        assert_eq!(backend.purge_expired().unwrap(), 100);
        assert_eq!(backend.state.lock().unwrap().entries.len(), 1);
        assert_eq!(backend.purge_expired().unwrap(), 0);
    }

    #[test]
    fn test_flush_drops_everything() {
        let backend = MemoryBackend::new();
        backend
            .execute(vec![BatchOp::HashSet {
                key: "H{/f}".into(),
                fields: vec![("a".into(), "b".into())],
            }])
            .unwrap();
        backend.flush();
        assert!(backend.is_empty());
    }
}
