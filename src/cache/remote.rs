//! Remote cache seam.
//!
//! Every operation the cache layer needs is enumerated here; there is one
//! adapter per client, so swapping Redis for anything else (or for the
//! in-memory store in tests) never touches callers.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Returns true when the key existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()>;

    /// Glob-style pattern match over keys.
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    async fn list_push(&self, key: &str, value: &str) -> CacheResult<()>;

    async fn list_len(&self, key: &str) -> CacheResult<usize>;

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>>;

    /// Keeps only `[start, stop]` of the list, dropping the rest.
    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> CacheResult<()>;
}

/// Redis adapter over a multiplexed connection.
///
/// The connection is cheap to clone; each call clones it rather than locking.
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RemoteCache for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.keys(pattern).await?)
    }

    async fn list_push(&self, key: &str, value: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn list_len(&self, key: &str) -> CacheResult<usize> {
        let mut conn = self.conn.clone();
        let len: i64 = conn.llen(key).await?;
        Ok(len.max(0) as usize)
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

enum Entry {
    Value(String),
    List(Vec<String>),
}

struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-memory adapter for tests and single-process deployments without Redis.
#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live<T>(&self, key: &str, f: impl FnOnce(Option<&mut Slot>) -> T) -> T {
        let mut slots = self.slots.lock().expect("memory store lock poisoned");
        if slots.get(key).is_some_and(|s| s.expired()) {
            slots.remove(key);
        }
        f(slots.get_mut(key))
    }
}

#[async_trait]
impl RemoteCache for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.with_live(key, |slot| match slot {
            Some(Slot {
                entry: Entry::Value(v),
                ..
            }) => Ok(Some(v.clone())),
            _ => Ok(None),
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut slots = self.slots.lock().expect("memory store lock poisoned");
        slots.insert(
            key.to_string(),
            Slot {
                entry: Entry::Value(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut slots = self.slots.lock().expect("memory store lock poisoned");
        let existed = slots.remove(key).is_some_and(|s| !s.expired());
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.with_live(key, |slot| Ok(slot.is_some()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        self.with_live(key, |slot| {
            if let Some(slot) = slot {
                slot.expires_at = Some(Instant::now() + ttl);
            }
            Ok(())
        })
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut slots = self.slots.lock().expect("memory store lock poisoned");
        slots.retain(|_, s| !s.expired());
        // Only the trailing-star form is used by the cache layer.
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        Ok(slots
            .keys()
            .filter(|k| {
                if pattern.ends_with('*') {
                    k.starts_with(prefix)
                } else {
                    k.as_str() == pattern
                }
            })
            .cloned()
            .collect())
    }

    async fn list_push(&self, key: &str, value: &str) -> CacheResult<()> {
        let mut slots = self.slots.lock().expect("memory store lock poisoned");
        if slots.get(key).is_some_and(|s| s.expired()) {
            slots.remove(key);
        }
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            entry: Entry::List(Vec::new()),
            expires_at: None,
        });
        if let Entry::List(items) = &mut slot.entry {
            items.insert(0, value.to_string());
        }
        Ok(())
    }

    async fn list_len(&self, key: &str) -> CacheResult<usize> {
        self.with_live(key, |slot| match slot {
            Some(Slot {
                entry: Entry::List(items),
                ..
            }) => Ok(items.len()),
            _ => Ok(0),
        })
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        self.with_live(key, |slot| match slot {
            Some(Slot {
                entry: Entry::List(items),
                ..
            }) => {
                let (start, stop) = resolve_range(items.len(), start, stop);
                Ok(items.get(start..stop).unwrap_or(&[]).to_vec())
            }
            _ => Ok(Vec::new()),
        })
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> CacheResult<()> {
        self.with_live(key, |slot| {
            if let Some(Slot {
                entry: Entry::List(items),
                ..
            }) = slot
            {
                let (start, stop) = resolve_range(items.len(), start, stop);
                *items = items.get(start..stop).unwrap_or(&[]).to_vec();
            }
            Ok(())
        })
    }
}

/// Maps Redis-style inclusive, negative-aware indices onto a slice range.
fn resolve_range(len: usize, start: isize, stop: isize) -> (usize, usize) {
    let len = len as isize;
    let norm = |i: isize| if i < 0 { (len + i).max(0) } else { i.min(len) };
    let start = norm(start);
    let stop = (norm(stop) + 1).min(len);
    if start >= stop {
        (0, 0)
    } else {
        (start as usize, stop as usize)
    }
}
