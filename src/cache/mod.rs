//! Cache Abstraction Module
//! ========================
//! Unified KV + sorted-set + pipeline operations over an in-memory map or
//! a shared Redis store.
//!
//! Copyright © 2025 PhishTriage Maintainers. All rights reserved.
//! Licensed under GPL-3.0.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

pub mod memory;
pub mod redis;

pub use memory::MemoryCache;
pub use redis::RedisCache;

/// Bump to invalidate every namespace after a semantic change to stored values.
pub const SCHEMA_VERSION: u32 = 1;

/// Key namespaces. Versioned keys keep replicas interoperable.
pub mod ns {
    pub const DEDUP: &str = "dedup";
    pub const RATE: &str = "rate";
    pub const BREAKER: &str = "cb";
    pub const INTEL: &str = "intel";
}

/// Build the external key layout: `<prefix>:v<version>:<namespace>:<key>`.
pub fn versioned_key(prefix: &str, namespace: &str, key: &str) -> String {
    format!("{}:v{}:{}:{}", prefix, SCHEMA_VERSION, namespace, key)
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// The store is configured but unreachable.
    #[error("cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend rejected the operation.
    #[error("cache operation failed: {0}")]
    Operation(String),
}

/// One queued pipeline operation.
#[derive(Debug, Clone)]
pub enum PipelineOp {
    Set { key: String, value: String, ttl: Option<Duration> },
    Delete { key: String },
    ZAdd { key: String, score: f64, member: String },
    ZRemRangeByScore { key: String, min: f64, max: f64 },
    Expire { key: String, ttl: Duration },
}

/// Result value for one pipeline operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineValue {
    Unit,
    Int(i64),
}

/// Uniform cache capability set. Two implementations: [`MemoryCache`] and
/// [`RedisCache`]. All stateful components talk to `Arc<dyn Cache>`.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Atomic set-if-absent. Returns true when this call created the key.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    /// Atomic increment; creates the key at 1 (applying `ttl`) when missing.
    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError>;

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), CacheError>;

    /// Count sorted-set members with `min <= score <= max`.
    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, CacheError>;

    /// Remove sorted-set members with `min <= score <= max`; returns removed count.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, CacheError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Run queued operations in submission order, yielding one result per op.
    async fn exec_pipeline(
        &self,
        ops: Vec<PipelineOp>,
    ) -> Result<Vec<Result<PipelineValue, CacheError>>, CacheError>;

    /// Drop expired entries eagerly. Redis expires server-side, so the shared
    /// implementation reports zero.
    async fn purge_expired(&self) -> u64;

    /// Whether the backing store is usable. Callers select an implementation
    /// based on this at construction time.
    fn is_ready(&self) -> bool;

    /// Implementation tag for health reporting.
    fn backend_name(&self) -> &'static str;
}

/// Builder for a batch of operations executed in submission order.
pub struct Pipeline {
    cache: Arc<dyn Cache>,
    ops: Vec<PipelineOp>,
}

impl Pipeline {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Pipeline { cache, ops: Vec::new() }
    }

    pub fn set(mut self, key: &str, value: &str, ttl: Option<Duration>) -> Self {
        self.ops.push(PipelineOp::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        });
        self
    }

    pub fn delete(mut self, key: &str) -> Self {
        self.ops.push(PipelineOp::Delete { key: key.to_string() });
        self
    }

    pub fn zadd(mut self, key: &str, score: f64, member: &str) -> Self {
        self.ops.push(PipelineOp::ZAdd {
            key: key.to_string(),
            score,
            member: member.to_string(),
        });
        self
    }

    pub fn zremrangebyscore(mut self, key: &str, min: f64, max: f64) -> Self {
        self.ops.push(PipelineOp::ZRemRangeByScore {
            key: key.to_string(),
            min,
            max,
        });
        self
    }

    pub fn expire(mut self, key: &str, ttl: Duration) -> Self {
        self.ops.push(PipelineOp::Expire { key: key.to_string(), ttl });
        self
    }

    pub async fn exec(self) -> Result<Vec<Result<PipelineValue, CacheError>>, CacheError> {
        self.cache.exec_pipeline(self.ops).await
    }
}

/// Convenience: start a pipeline from a shared cache handle.
pub trait CacheExt {
    fn pipeline(&self) -> Pipeline;
}

impl CacheExt for Arc<dyn Cache> {
    fn pipeline(&self) -> Pipeline {
        Pipeline::new(Arc::clone(self))
    }
}

/// Select the cache backend: Redis when configured and reachable, otherwise
/// the in-memory implementation with identical semantics.
pub async fn connect(redis_url: Option<&str>) -> Arc<dyn Cache> {
    if let Some(url) = redis_url {
        match RedisCache::connect(url).await {
            Ok(cache) => {
                info!(backend = "redis", "cache backend ready");
                return Arc::new(cache);
            }
            Err(err) => {
                warn!(error = %err, "redis configured but unreachable, falling back to in-memory cache");
            }
        }
    }
    info!(backend = "memory", "cache backend ready");
    Arc::new(MemoryCache::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_key_layout() {
        assert_eq!(versioned_key("pt", ns::RATE, "send-log"), "pt:v1:rate:send-log");
    }

    #[test]
    fn test_versioned_keys_are_collision_free_across_namespaces() {
        // Same raw key in different namespaces must never collide.
        let a = versioned_key("pt", ns::DEDUP, "k");
        let b = versioned_key("pt", ns::RATE, "k");
        let c = versioned_key("pt", ns::BREAKER, "k");
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }
}
