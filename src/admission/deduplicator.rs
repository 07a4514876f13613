//! Content-and-sender deduplication
//!
//! Two records per processed message: a content hash with a TTL, and the
//! sender's last-send time for the cooldown window. The content hash is
//! SHA-256 over the canonicalised `subject || "||" || body[:1000]`, so a
//! re-forwarded report hits the same hash regardless of provider id.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cache::{ns, versioned_key, Cache};
use crate::config::DedupConfig;

use super::Decision;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

pub struct Deduplicator {
    cache: Arc<dyn Cache>,
    cfg: DedupConfig,
    key_prefix: String,
}

/// SHA-256 of the lower-cased, trimmed `subject || "||" || body[:1000]`.
pub fn content_hash(subject: &str, body: &str) -> String {
    let body_head: String = body.chars().take(1000).collect();
    let canonical = format!("{}||{}", subject, body_head).trim().to_lowercase();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

impl Deduplicator {
    pub fn new(cache: Arc<dyn Cache>, cfg: DedupConfig, key_prefix: &str) -> Self {
        Deduplicator {
            cache,
            cfg,
            key_prefix: key_prefix.to_string(),
        }
    }

    fn hash_key(&self, hash: &str) -> String {
        versioned_key(&self.key_prefix, ns::DEDUP, &format!("hash-{}", hash))
    }

    fn sender_key(&self, sender: &str) -> String {
        versioned_key(
            &self.key_prefix,
            ns::DEDUP,
            &format!("sender-{}", sender.trim().to_lowercase()),
        )
    }

    /// Content-hash check first, then sender cooldown. Expired entries found
    /// along the way are deleted opportunistically.
    pub async fn should_process(&self, sender: &str, subject: &str, body: &str) -> Decision {
        if !self.cfg.enabled {
            return Decision::allow();
        }
        match self.evaluate(sender, subject, body).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = %err, "dedup check failed, allowing message");
                Decision::allow()
            }
        }
    }

    async fn evaluate(
        &self,
        sender: &str,
        subject: &str,
        body: &str,
    ) -> Result<Decision, crate::cache::CacheError> {
        let now_ms = Utc::now().timestamp_millis();

        let hash = content_hash(subject, body);
        let hash_key = self.hash_key(&hash);
        if let Some(raw) = self.cache.get(&hash_key).await? {
            let expires_ms: i64 = raw.parse().unwrap_or(0);
            if expires_ms > now_ms {
                return Ok(Decision::deny(format!(
                    "Duplicate email already processed (hash: {})",
                    &hash[..8]
                )));
            }
            self.cache.delete(&hash_key).await?;
        }

        let sender_key = self.sender_key(sender);
        if let Some(raw) = self.cache.get(&sender_key).await? {
            let last_ms: i64 = raw.parse().unwrap_or(0);
            let next_allowed = last_ms + self.cfg.sender_cooldown.as_millis() as i64;
            if next_allowed > now_ms {
                let next_iso = Utc
                    .timestamp_millis_opt(next_allowed)
                    .single()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                return Ok(Decision::deny(format!(
                    "Sender in cooldown period (next allowed: {})",
                    next_iso
                )));
            }
            self.cache.delete(&sender_key).await?;
        }

        Ok(Decision::allow())
    }

    /// Store both records. Called only after the reply send succeeded.
    pub async fn record_processed(&self, sender: &str, subject: &str, body: &str) {
        if !self.cfg.enabled {
            return;
        }
        let now_ms = Utc::now().timestamp_millis();
        let hash = content_hash(subject, body);
        let expires_ms = now_ms + self.cfg.content_hash_ttl.as_millis() as i64;

        if let Err(err) = self
            .cache
            .set(
                &self.hash_key(&hash),
                &expires_ms.to_string(),
                Some(self.cfg.content_hash_ttl),
            )
            .await
        {
            warn!(error = %err, "failed to record content hash");
        }
        if let Err(err) = self
            .cache
            .set(
                &self.sender_key(sender),
                &now_ms.to_string(),
                Some(self.cfg.sender_cooldown),
            )
            .await
        {
            warn!(error = %err, "failed to record sender cooldown");
        }
        debug!(hash = %&hash[..8], "message recorded as processed");
    }

    /// Background cleanup: sweep expired entries every 5 minutes until
    /// shutdown. The Redis backend expires server-side, so its sweep is free.
    pub fn spawn_cleanup(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let dedup = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {
                        let removed = dedup.cache.purge_expired().await;
                        if removed > 0 {
                            debug!(removed, "dedup cleanup swept expired entries");
                        }
                    }
                }
            }
        });
    }
}
