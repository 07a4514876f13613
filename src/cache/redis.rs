//! Redis cache backend
//!
//! Shared-store implementation used when `REDIS_URL` is configured. A PING
//! probe at construction decides readiness; connection-level failures after
//! that surface as [`CacheError::BackendUnavailable`] and flip the readiness
//! flag so health reporting reflects the outage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Value};

use super::{Cache, CacheError, PipelineOp, PipelineValue};

pub struct RedisCache {
    conn: ConnectionManager,
    ready: AtomicBool,
}

impl RedisCache {
    /// Open a managed connection and verify it with a PING.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(RedisCache {
            conn,
            ready: AtomicBool::new(true),
        })
    }

    fn map_err(&self, err: RedisError) -> CacheError {
        if err.is_connection_refusal() || err.is_io_error() || err.is_timeout() {
            self.ready.store(false, Ordering::Relaxed);
            CacheError::BackendUnavailable(err.to_string())
        } else {
            CacheError::Operation(err.to_string())
        }
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        ttl.as_millis().max(1) as u64
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| self.map_err(e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn
                .pset_ex(key, value, Self::ttl_millis(ttl))
                .await
                .map_err(|e| self.map_err(e)),
            None => conn.set(key, value).await.map_err(|e| self.map_err(e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del(key).await.map_err(|e| self.map_err(e))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(|e| self.map_err(e))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(Self::ttl_millis(ttl));
        }
        let reply: Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(!matches!(reply, Value::Nil))
    }

    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError> {
        let mut conn = self.conn.clone();
        let next: i64 = conn.incr(key, 1).await.map_err(|e| self.map_err(e))?;
        if next == 1 {
            if let Some(ttl) = ttl {
                let _: bool = conn
                    .pexpire(key, Self::ttl_millis(ttl) as i64)
                    .await
                    .map_err(|e| self.map_err(e))?;
            }
        }
        Ok(next)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.zadd(key, member, score).await.map_err(|e| self.map_err(e))
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        conn.zcount(key, min, max).await.map_err(|e| self.map_err(e))
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        conn.zrembyscore(key, min, max).await.map_err(|e| self.map_err(e))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        conn.pexpire(key, Self::ttl_millis(ttl) as i64)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn exec_pipeline(
        &self,
        ops: Vec<PipelineOp>,
    ) -> Result<Vec<Result<PipelineValue, CacheError>>, CacheError> {
        let mut pipe = redis::pipe();
        for op in &ops {
            match op {
                PipelineOp::Set { key, value, ttl } => match ttl {
                    Some(ttl) => {
                        pipe.cmd("SET")
                            .arg(key)
                            .arg(value)
                            .arg("PX")
                            .arg(Self::ttl_millis(*ttl));
                    }
                    None => {
                        pipe.cmd("SET").arg(key).arg(value);
                    }
                },
                PipelineOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key);
                }
                PipelineOp::ZAdd { key, score, member } => {
                    pipe.cmd("ZADD").arg(key).arg(*score).arg(member);
                }
                PipelineOp::ZRemRangeByScore { key, min, max } => {
                    pipe.cmd("ZREMRANGEBYSCORE").arg(key).arg(*min).arg(*max);
                }
                PipelineOp::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE").arg(key).arg(Self::ttl_millis(*ttl));
                }
            }
        }
        let mut conn = self.conn.clone();
        let replies: Vec<Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;

        let results = ops
            .iter()
            .zip(replies)
            .map(|(op, reply)| match op {
                PipelineOp::ZRemRangeByScore { .. } | PipelineOp::Expire { .. } | PipelineOp::Delete { .. } => {
                    match reply {
                        Value::Int(n) => Ok(PipelineValue::Int(n)),
                        _ => Ok(PipelineValue::Unit),
                    }
                }
                _ => Ok(PipelineValue::Unit),
            })
            .collect();
        Ok(results)
    }

    async fn purge_expired(&self) -> u64 {
        // Redis expires keys server-side.
        0
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
