//! Shared store adapter — atomic primitives over a key-value store.
//!
//! The engine consumes the store through a narrow set of primitives: sorted
//! sets for sliding windows, plain sets for index membership and distinct
//! tracking, strings with expiry for blocklists and flags, lists for audit
//! logs and notification channels, hashes for structured entries.
//!
//! [`MemoryStore`] is the reference implementation used in tests and for
//! single-process deployments. Production wiring points a Redis-shaped
//! backend at the same trait.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

/// Atomic primitive operations against the shared store.
///
/// Each method is individually atomic. Multi-step sequences (the window
/// add → prune → count cycle) are not: concurrent callers may observe a
/// slightly stale count, which is acceptable for a best-effort limiter.
#[async_trait]
pub trait Store: Send + Sync {
    // Sorted sets (sliding windows; member score is its latest timestamp).

    /// Add a member with the given score, overwriting any previous score.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// Remove members with `min <= score <= max`. Returns the removed count.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError>;

    /// Member count.
    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    /// All members with scores, ascending by score.
    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError>;

    // Sets (index membership, enumeration).

    /// Add a member. Returns true if it was not already present.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove a member. Returns true if it was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn scard(&self, key: &str) -> Result<u64, StoreError>;

    // Strings (blocklists, quarantine entries, feature flags).

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a value with no expiry, clearing any previous expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Set a value that expires after `ttl_secs`.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Set an expiry on an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Remaining time-to-live in seconds, `None` if absent or no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Delete a key of any type. Returns true if it existed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    // Lists (audit logs, remediation history, notification channels).

    /// Append to the tail. Returns the new length.
    async fn rpush(&self, key: &str, value: &str) -> Result<u64, StoreError>;

    /// Range by index; negative indices count from the tail (-1 is last).
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError>;

    /// Trim the list to the given inclusive index range.
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError>;

    // Hashes (structured entries).

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError>;
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    ZSet(BTreeMap<String, f64>),
    Set(HashSet<String>),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::ZSet(_) => "zset",
            Value::Set(_) => "set",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
}

impl Inner {
    /// Drop the entry if its deadline has passed, then return it.
    ///
    /// Expiry is lazy: a key with an elapsed deadline reads as absent, while
    /// any index set naming it survives until `cleanup_expired` reconciles.
    fn live_entry(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Utc::now());
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn typed<'a, T>(
        entry: Option<&'a mut Entry>,
        key: &str,
        expected: &'static str,
        extract: impl FnOnce(&'a mut Value) -> Option<T>,
    ) -> Result<Option<T>, StoreError> {
        match entry {
            None => Ok(None),
            Some(e) => {
                let actual = e.value.type_name();
                extract(&mut e.value)
                    .map(Some)
                    .ok_or_else(|| StoreError::WrongType {
                        key: key.to_string(),
                        expected,
                    })
                    .map_err(|err| {
                        tracing::warn!(key, actual, expected, "store type mismatch");
                        err
                    })
            }
        }
    }
}

/// In-memory [`Store`] backed by a single `tokio::sync::RwLock`.
///
/// Every operation takes the write lock, so each primitive is atomic with
/// respect to every other.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn deadline(ttl_secs: u64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(ttl_secs as i64)
}

/// Normalize a possibly-negative list index to a concrete offset.
fn normalize(idx: i64, len: usize) -> usize {
    if idx < 0 {
        len.saturating_sub(idx.unsigned_abs() as usize)
    } else {
        (idx as usize).min(len)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.live_entry(key) {
            Some(e) => {
                let Value::ZSet(z) = &mut e.value else {
                    return Err(StoreError::WrongType {
                        key: key.to_string(),
                        expected: "zset",
                    });
                };
                z.insert(member.to_string(), score);
            }
            None => {
                let mut z = BTreeMap::new();
                z.insert(member.to_string(), score);
                inner.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::ZSet(z),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_entry(key);
        let Some(z) = Inner::typed(entry, key, "zset", |v| match v {
            Value::ZSet(z) => Some(z),
            _ => None,
        })?
        else {
            return Ok(0);
        };
        let before = z.len();
        z.retain(|_, score| !(min <= *score && *score <= max));
        Ok((before - z.len()) as u64)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_entry(key);
        Ok(Inner::typed(entry, key, "zset", |v| match v {
            Value::ZSet(z) => Some(z.len() as u64),
            _ => None,
        })?
        .unwrap_or(0))
    }

    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_entry(key);
        let Some(z) = Inner::typed(entry, key, "zset", |v| match v {
            Value::ZSet(z) => Some(z),
            _ => None,
        })?
        else {
            return Ok(Vec::new());
        };
        let mut pairs: Vec<(String, f64)> = z.iter().map(|(m, s)| (m.clone(), *s)).collect();
        pairs.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(pairs)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.live_entry(key) {
            Some(e) => {
                let Value::Set(s) = &mut e.value else {
                    return Err(StoreError::WrongType {
                        key: key.to_string(),
                        expected: "set",
                    });
                };
                Ok(s.insert(member.to_string()))
            }
            None => {
                let mut s = HashSet::new();
                s.insert(member.to_string());
                inner.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(s),
                        expires_at: None,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_entry(key);
        Ok(Inner::typed(entry, key, "set", |v| match v {
            Value::Set(s) => Some(s.remove(member)),
            _ => None,
        })?
        .unwrap_or(false))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_entry(key);
        let Some(members) = Inner::typed(entry, key, "set", |v| match v {
            Value::Set(s) => Some(s.iter().cloned().collect::<Vec<_>>()),
            _ => None,
        })?
        else {
            return Ok(Vec::new());
        };
        let mut members = members;
        members.sort();
        Ok(members)
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_entry(key);
        Ok(Inner::typed(entry, key, "set", |v| match v {
            Value::Set(s) => Some(s.len() as u64),
            _ => None,
        })?
        .unwrap_or(0))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_entry(key);
        Inner::typed(entry, key, "string", |v| match v {
            Value::Str(s) => Some(s.clone()),
            _ => None,
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(deadline(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.live_entry(key) {
            Some(e) => {
                e.expires_at = Some(deadline(ttl_secs));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.live_entry(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.live_entry(key).and_then(|e| {
            e.expires_at
                .map(|at| (at - Utc::now()).num_seconds().max(0) as u64)
        }))
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        inner.live_entry(key);
        Ok(inner.entries.remove(key).is_some())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.live_entry(key) {
            Some(e) => {
                let Value::List(l) = &mut e.value else {
                    return Err(StoreError::WrongType {
                        key: key.to_string(),
                        expected: "list",
                    });
                };
                l.push_back(value.to_string());
                Ok(l.len() as u64)
            }
            None => {
                let mut l = VecDeque::new();
                l.push_back(value.to_string());
                inner.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(l),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_entry(key);
        let Some(items) = Inner::typed(entry, key, "list", |v| match v {
            Value::List(l) => Some(l.iter().cloned().collect::<Vec<_>>()),
            _ => None,
        })?
        else {
            return Ok(Vec::new());
        };
        let len = items.len();
        let from = normalize(start, len);
        let to = normalize(stop, len).min(len.saturating_sub(1));
        if from > to || len == 0 {
            return Ok(Vec::new());
        }
        Ok(items[from..=to].to_vec())
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_entry(key);
        let Some(l) = Inner::typed(entry, key, "list", |v| match v {
            Value::List(l) => Some(l),
            _ => None,
        })?
        else {
            return Ok(());
        };
        let len = l.len();
        let from = normalize(start, len);
        let to = normalize(stop, len).min(len.saturating_sub(1));
        if from > to || len == 0 {
            l.clear();
            return Ok(());
        }
        let kept: VecDeque<String> = l.iter().skip(from).take(to - from + 1).cloned().collect();
        *l = kept;
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.live_entry(key) {
            Some(e) => {
                let Value::Hash(h) = &mut e.value else {
                    return Err(StoreError::WrongType {
                        key: key.to_string(),
                        expected: "hash",
                    });
                };
                h.insert(field.to_string(), value.to_string());
            }
            None => {
                let mut h = HashMap::new();
                h.insert(field.to_string(), value.to_string());
                inner.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Hash(h),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_entry(key);
        Ok(Inner::typed(entry, key, "hash", |v| match v {
            Value::Hash(h) => Some(h.get(field).cloned()),
            _ => None,
        })?
        .flatten())
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_entry(key);
        let Some(pairs) = Inner::typed(entry, key, "hash", |v| match v {
            Value::Hash(h) => Some(
                h.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        })?
        else {
            return Ok(Vec::new());
        };
        let mut pairs = pairs;
        pairs.sort();
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn zset_add_prune_count() {
        let store = MemoryStore::new();
        store.zadd("w", "a", 100.0).await.unwrap();
        store.zadd("w", "b", 200.0).await.unwrap();
        store.zadd("w", "c", 300.0).await.unwrap();
        assert_eq!(store.zcard("w").await.unwrap(), 3);

        let removed = store
            .zremrangebyscore("w", f64::NEG_INFINITY, 200.0)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.zcard("w").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn zadd_overwrites_member_score() {
        let store = MemoryStore::new();
        store.zadd("w", "a", 100.0).await.unwrap();
        store.zadd("w", "a", 500.0).await.unwrap();
        assert_eq!(store.zcard("w").await.unwrap(), 1);
        assert_eq!(
            store.zrange_withscores("w").await.unwrap(),
            vec![("a".to_string(), 500.0)]
        );
    }

    #[tokio::test]
    async fn set_membership() {
        let store = MemoryStore::new();
        assert!(store.sadd("s", "x").await.unwrap());
        assert!(!store.sadd("s", "x").await.unwrap());
        assert_eq!(store.scard("s").await.unwrap(), 1);
        assert!(store.srem("s", "x").await.unwrap());
        assert!(!store.srem("s", "x").await.unwrap());
        assert_eq!(store.smembers("s").await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn string_expiry_is_lazy() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 0).await.unwrap();
        // Deadline of now is already elapsed on the next access.
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn expired_key_leaves_index_sets_alone() {
        let store = MemoryStore::new();
        store.set_ex("data:x", "v", 0).await.unwrap();
        store.sadd("index", "x").await.unwrap();
        assert!(!store.exists("data:x").await.unwrap());
        assert_eq!(store.smembers("index").await.unwrap(), vec!["x"]);
    }

    #[tokio::test]
    async fn set_clears_expiry() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 60).await.unwrap();
        assert!(store.ttl("k").await.unwrap().is_some());
        store.set("k", "v2").await.unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_push_range_trim() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.rpush("l", &i.to_string()).await.unwrap();
        }
        assert_eq!(store.lrange("l", 0, -1).await.unwrap().len(), 5);
        assert_eq!(store.lrange("l", -2, -1).await.unwrap(), vec!["3", "4"]);

        store.ltrim("l", 3, -1).await.unwrap();
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["3", "4"]);
    }

    #[tokio::test]
    async fn hash_set_get() {
        let store = MemoryStore::new();
        store.hset("h", "severity", "critical").await.unwrap();
        assert_eq!(
            store.hget("h", "severity").await.unwrap().as_deref(),
            Some("critical")
        );
        assert_eq!(store.hget("h", "missing").await.unwrap(), None);
        assert_eq!(store.hgetall("h").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wrong_type_errors() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert!(matches!(
            store.sadd("k", "x").await,
            Err(StoreError::WrongType { .. })
        ));
        assert!(matches!(
            store.rpush("k", "x").await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn del_returns_existence() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert!(store.del("k").await.unwrap());
        assert!(!store.del("k").await.unwrap());
    }
}
