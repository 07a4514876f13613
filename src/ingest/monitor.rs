//! Mailbox pollers
//!
//! The periodic poller fetches messages received since the last check
//! (minus a small overlap) and runs them through the pipeline with bounded
//! parallelism. The slower catch-up poller always runs as a safety net for
//! webhook gaps; a subscription failure can also trigger an immediate
//! catch-up pass.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::config::PollerConfig;
use crate::mail::MailProvider;
use crate::metrics::POLL_CYCLES_TOTAL;

use super::TriagePipeline;

/// Overlap subtracted from the watermark so boundary messages are not lost.
const WATERMARK_EPSILON_SECS: i64 = 30;
/// Page size per list call.
const PAGE_SIZE: usize = 50;

pub struct MailboxMonitor {
    provider: Arc<dyn MailProvider>,
    pipeline: Arc<TriagePipeline>,
    cfg: PollerConfig,
    mailbox: String,
    last_check: RwLock<DateTime<Utc>>,
}

impl MailboxMonitor {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        pipeline: Arc<TriagePipeline>,
        cfg: PollerConfig,
        mailbox: String,
    ) -> Self {
        MailboxMonitor {
            provider,
            pipeline,
            cfg,
            mailbox,
            last_check: RwLock::new(Utc::now()),
        }
    }

    /// Spawn the periodic poller. No-op when polling is disabled.
    pub fn spawn_poller(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) {
        if !self.cfg.polling_enabled {
            info!("periodic poller disabled by configuration");
            return;
        }
        let monitor = Arc::clone(self);
        let mut shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.cfg.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {
                        POLL_CYCLES_TOTAL.with_label_values(&["periodic"]).inc();
                        monitor.poll_incremental().await;
                    }
                }
            }
            info!("periodic poller stopped");
        });
    }

    /// Spawn the slow catch-up poller that closes webhook gaps.
    pub fn spawn_catchup(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) {
        if !self.cfg.monitor_enabled {
            info!("catch-up poller disabled by configuration");
            return;
        }
        let monitor = Arc::clone(self);
        let mut shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.cfg.monitor_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {
                        POLL_CYCLES_TOTAL.with_label_values(&["catch-up"]).inc();
                        monitor.poll_window(monitor.lookback_start()).await;
                    }
                }
            }
            info!("catch-up poller stopped");
        });
    }

    fn lookback_start(&self) -> DateTime<Utc> {
        Utc::now()
            - ChronoDuration::from_std(self.cfg.monitor_lookback)
                .unwrap_or_else(|_| ChronoDuration::minutes(30))
    }

    /// One incremental pass from the watermark; advances it on success.
    pub async fn poll_incremental(&self) {
        let since = {
            let last = *self.last_check.read().await;
            last - ChronoDuration::seconds(WATERMARK_EPSILON_SECS)
        };
        let cycle_start = Utc::now();
        if self.poll_window(since).await {
            *self.last_check.write().await = cycle_start;
        }
    }

    /// One catch-up pass over an explicit window. Used by the catch-up
    /// poller and by the subscription manager after renewal failures.
    pub async fn poll_window(&self, since: DateTime<Utc>) -> bool {
        let mut fetched_any = false;
        let mut cursor = since;

        for page in 0..self.cfg.max_pages {
            let batch = match self
                .provider
                .list_messages(&self.mailbox, cursor, PAGE_SIZE)
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(error = %err, page, "mailbox poll failed");
                    return fetched_any;
                }
            };
            if batch.is_empty() {
                break;
            }
            fetched_any = true;
            debug!(count = batch.len(), page, "poll fetched messages");

            if let Some(last) = batch.last() {
                cursor = last.received_at + ChronoDuration::seconds(1);
            }
            let full_page = batch.len() == PAGE_SIZE;

            // Bounded parallelism across messages of one page.
            stream::iter(batch)
                .for_each_concurrent(self.cfg.parallel_limit, |message| {
                    let pipeline = Arc::clone(&self.pipeline);
                    async move {
                        pipeline.process(message).await;
                    }
                })
                .await;

            if !full_page {
                break;
            }
        }
        true
    }
}
