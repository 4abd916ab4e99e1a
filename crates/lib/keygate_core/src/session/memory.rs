//! In-process session cache.
//!
//! A single mutex guards the key space so batches are atomic, matching a
//! Redis `MULTI`/`EXEC` block. Expired keys are dropped when touched and by
//! a full purge at most once per [`PURGE_INTERVAL`].

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::cache::{Batch, CacheError, CacheOp, SessionCache};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

pub const PURGE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct KeySpace {
    entries: HashMap<String, Entry>,
    next_purge: Instant,
}

/// Session cache held in process memory.
#[derive(Debug)]
pub struct MemoryCache {
    space: Mutex<KeySpace>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            space: Mutex::new(KeySpace {
                entries: HashMap::new(),
                next_purge: Instant::now() + PURGE_INTERVAL,
            }),
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T) -> T {
        let mut guard = self
            .space
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let space = &mut *guard;
        let now = Instant::now();
        if now >= space.next_purge {
            space.entries.retain(|_, e| e.is_live(now));
            space.next_purge = now + PURGE_INTERVAL;
        }
        f(&mut space.entries, now)
    }

    /// Drop `key` if it has expired, so reads and writes never see it.
    fn forget_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
    }

    fn apply_op(entries: &mut HashMap<String, Entry>, now: Instant, op: &CacheOp) {
        let (CacheOp::SetEx { key, .. }
        | CacheOp::Del { key }
        | CacheOp::SAdd { key, .. }
        | CacheOp::SRem { key, .. }
        | CacheOp::Expire { key, .. }) = op;
        Self::forget_expired(entries, key, now);
        match op {
            CacheOp::SetEx { key, value, ttl } => {
                entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Str(value.clone()),
                        expires_at: Some(now + *ttl),
                    },
                );
            }
            CacheOp::Del { key } => {
                entries.remove(key);
            }
            CacheOp::SAdd { key, member } => {
                let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                    value: Value::Set(HashSet::new()),
                    expires_at: None,
                });
                match &mut entry.value {
                    Value::Set(set) => {
                        set.insert(member.clone());
                    }
                    Value::Str(_) => {
                        entry.value = Value::Set(HashSet::from([member.clone()]));
                    }
                }
            }
            CacheOp::SRem { key, member } => {
                let now_empty = match entries.get_mut(key) {
                    Some(Entry {
                        value: Value::Set(set),
                        ..
                    }) => {
                        set.remove(member);
                        set.is_empty()
                    }
                    _ => false,
                };
                if now_empty {
                    entries.remove(key);
                }
            }
            CacheOp::Expire { key, ttl } => {
                if let Some(entry) = entries.get_mut(key) {
                    entry.expires_at = Some(now + *ttl);
                }
            }
        }
    }
}

#[async_trait]
impl SessionCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.with_entries(|entries, now| {
            Self::forget_expired(entries, key, now);
            match entries.get(key) {
                Some(Entry {
                    value: Value::Str(s),
                    ..
                }) => Some(s.clone()),
                _ => None,
            }
        }))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.with_entries(|entries, now| {
            Self::forget_expired(entries, key, now);
            entries.contains_key(key)
        }))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let op = CacheOp::SetEx {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        };
        self.with_entries(|entries, now| Self::apply_op(entries, now, &op));
        Ok(())
    }

    async fn set_existing(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        Ok(self.with_entries(|entries, now| {
            Self::forget_expired(entries, key, now);
            if !entries.contains_key(key) {
                return false;
            }
            let op = CacheOp::SetEx {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            };
            Self::apply_op(entries, now, &op);
            true
        }))
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        Ok(self.with_entries(|entries, now| {
            Self::forget_expired(entries, key, now);
            match entries.get(key) {
                Some(Entry {
                    value: Value::Set(set),
                    ..
                }) => set.iter().cloned().collect(),
                _ => Vec::new(),
            }
        }))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        Ok(self.with_entries(|entries, now| {
            entries
                .iter()
                .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
                .map(|(k, _)| k.clone())
                .collect()
        }))
    }

    async fn apply(&self, batch: Batch) -> Result<(), CacheError> {
        self.with_entries(|entries, now| {
            for op in batch.ops() {
                Self::apply_op(entries, now, op);
            }
        });
        Ok(())
    }
}
