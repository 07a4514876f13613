//! In-memory cache backend
//!
//! Single-replica implementation of the [`Cache`](super::Cache) trait with
//! the same observable semantics as the Redis backend. Expiry is lazy on
//! read; [`purge_expired`](super::Cache::purge_expired) sweeps eagerly and
//! is driven by the owning component's janitor task.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{Cache, CacheError, PipelineOp, PipelineValue};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    // member -> score
    members: HashMap<String, f64>,
    expires_at: Option<DateTime<Utc>>,
}

impl SortedSet {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

fn expiry(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|ttl| {
        chrono::Duration::from_std(ttl)
            .ok()
            .map(|d| Utc::now() + d)
    })
}

/// DashMap-backed cache used when no shared store is configured.
pub struct MemoryCache {
    kv: DashMap<String, Entry>,
    zsets: DashMap<String, SortedSet>,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache {
            kv: DashMap::new(),
            zsets: DashMap::new(),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Utc::now();
        if let Some(entry) = self.kv.get(key) {
            if entry.expired(now) {
                drop(entry);
                self.kv.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.kv.remove(key);
        self.zsets.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let now = Utc::now();
        let mut created = false;
        let mut entry = self.kv.entry(key.to_string()).or_insert_with(|| {
            created = true;
            Entry {
                value: value.to_string(),
                expires_at: expiry(ttl),
            }
        });
        if !created && entry.expired(now) {
            // Stale holder: take the slot over.
            *entry = Entry {
                value: value.to_string(),
                expires_at: expiry(ttl),
            };
            created = true;
        }
        Ok(created)
    }

    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError> {
        let now = Utc::now();
        let mut entry = self.kv.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: expiry(ttl),
        });
        if entry.expired(now) {
            entry.value = "0".to_string();
            entry.expires_at = expiry(ttl);
        }
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| CacheError::Operation(format!("non-numeric value under {}", key)))?;
        let next = current + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), CacheError> {
        let now = Utc::now();
        let mut set = self.zsets.entry(key.to_string()).or_default();
        if set.expired(now) {
            set.members.clear();
            set.expires_at = None;
        }
        set.members.insert(member.to_string(), score);
        Ok(())
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, CacheError> {
        let now = Utc::now();
        if let Some(set) = self.zsets.get(key) {
            if set.expired(now) {
                drop(set);
                self.zsets.remove(key);
                return Ok(0);
            }
            let count = set
                .members
                .values()
                .filter(|score| **score >= min && **score <= max)
                .count();
            return Ok(count as u64);
        }
        Ok(0)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, CacheError> {
        if let Some(mut set) = self.zsets.get_mut(key) {
            let before = set.members.len();
            set.members.retain(|_, score| *score < min || *score > max);
            return Ok((before - set.members.len()) as u64);
        }
        Ok(0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let at = expiry(Some(ttl));
        let mut touched = false;
        if let Some(mut entry) = self.kv.get_mut(key) {
            entry.expires_at = at;
            touched = true;
        }
        if let Some(mut set) = self.zsets.get_mut(key) {
            set.expires_at = at;
            touched = true;
        }
        Ok(touched)
    }

    async fn exec_pipeline(
        &self,
        ops: Vec<PipelineOp>,
    ) -> Result<Vec<Result<PipelineValue, CacheError>>, CacheError> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let result = match op {
                PipelineOp::Set { key, value, ttl } => {
                    self.set(&key, &value, ttl).await.map(|_| PipelineValue::Unit)
                }
                PipelineOp::Delete { key } => self.delete(&key).await.map(|_| PipelineValue::Unit),
                PipelineOp::ZAdd { key, score, member } => {
                    self.zadd(&key, score, &member).await.map(|_| PipelineValue::Unit)
                }
                PipelineOp::ZRemRangeByScore { key, min, max } => self
                    .zremrangebyscore(&key, min, max)
                    .await
                    .map(|n| PipelineValue::Int(n as i64)),
                PipelineOp::Expire { key, ttl } => self
                    .expire(&key, ttl)
                    .await
                    .map(|set| PipelineValue::Int(set as i64)),
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn purge_expired(&self) -> u64 {
        let now = Utc::now();
        let kv_before = self.kv.len();
        self.kv.retain(|_, entry| !entry.expired(now));
        let zsets_before = self.zsets.len();
        self.zsets.retain(|_, set| !set.expired(now));
        ((kv_before - self.kv.len()) + (zsets_before - self.zsets.len())) as u64
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
