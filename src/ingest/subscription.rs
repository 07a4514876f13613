//! Subscription lifecycle
//!
//! Creates the provider push subscription at startup, renews it with a
//! margin before expiry, and falls back to a catch-up poll when renewal
//! keeps failing. Stop cancels the renewal loop and best-effort deletes
//! the subscription.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::config::WebhookConfig;
use crate::intel::retry::{retry, RetryPolicy};
use crate::mail::{MailProvider, Subscription, SubscriptionRequest};

use super::MailboxMonitor;

/// Provider cap on subscription lifetime for mailbox resources.
const MAX_SUBSCRIPTION_MINUTES: i64 = 4230;

pub struct SubscriptionManager {
    provider: Arc<dyn MailProvider>,
    monitor: Arc<MailboxMonitor>,
    cfg: WebhookConfig,
    current: RwLock<Option<Subscription>>,
}

impl SubscriptionManager {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        monitor: Arc<MailboxMonitor>,
        cfg: WebhookConfig,
    ) -> Self {
        SubscriptionManager {
            provider,
            monitor,
            cfg,
            current: RwLock::new(None),
        }
    }

    fn request(&self) -> Option<SubscriptionRequest> {
        let notification_url = self.cfg.notification_url.clone()?;
        let client_state = self.cfg.client_state.clone()?;
        Some(SubscriptionRequest {
            resource: self.cfg.subscription_resource.clone(),
            notification_url,
            client_state,
            expires_at: Utc::now() + ChronoDuration::minutes(MAX_SUBSCRIPTION_MINUTES),
        })
    }

    /// Create the subscription and run the renewal loop until shutdown.
    /// Returns immediately when webhooks are not configured.
    pub fn spawn(self: Arc<Self>, shutdown: &broadcast::Sender<()>) {
        let Some(request) = self.request() else {
            info!("no webhook notification url configured, skipping subscription");
            return;
        };
        let mut shutdown_rx = shutdown.subscribe();
        let manager = self;
        tokio::spawn(async move {
            match manager.provider.create_subscription(&request).await {
                Ok(subscription) => {
                    info!(
                        subscription_id = %subscription.id,
                        expires_at = %subscription.expires_at,
                        "push subscription created"
                    );
                    *manager.current.write().await = Some(subscription);
                }
                Err(err) => {
                    warn!(error = %err, "subscription create failed, relying on pollers");
                    return;
                }
            }

            loop {
                let sleep_for = manager.renewal_delay().await;
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(sleep_for) => {
                        manager.renew_or_catch_up().await;
                    }
                }
            }

            manager.stop().await;
        });
    }

    async fn renewal_delay(&self) -> Duration {
        let current = self.current.read().await;
        let Some(subscription) = current.as_ref() else {
            return Duration::from_secs(60);
        };
        let margin =
            ChronoDuration::from_std(self.cfg.renewal_margin).unwrap_or_else(|_| ChronoDuration::minutes(5));
        let renew_at = subscription.expires_at - margin;
        (renew_at - Utc::now()).to_std().unwrap_or(Duration::from_secs(1))
    }

    async fn renew_or_catch_up(&self) {
        let id = {
            let current = self.current.read().await;
            match current.as_ref() {
                Some(subscription) => subscription.id.clone(),
                None => return,
            }
        };
        let expires_at = Utc::now() + ChronoDuration::minutes(MAX_SUBSCRIPTION_MINUTES);

        let renewed = retry(&RetryPolicy::default(), "subscription-renew", || {
            self.provider.renew_subscription(&id, expires_at)
        })
        .await;

        match renewed {
            Ok(subscription) => {
                info!(
                    subscription_id = %subscription.id,
                    expires_at = %subscription.expires_at,
                    "subscription renewed"
                );
                *self.current.write().await = Some(subscription);
            }
            Err(err) => {
                // Persistent failure: the webhook may already be dark, so
                // close the gap by polling and try a fresh create.
                warn!(error = %err, "subscription renewal failed, triggering catch-up poll");
                self.monitor
                    .poll_window(Utc::now() - ChronoDuration::hours(1))
                    .await;
                if let Some(request) = self.request() {
                    match self.provider.create_subscription(&request).await {
                        Ok(subscription) => {
                            info!(subscription_id = %subscription.id, "subscription recreated");
                            *self.current.write().await = Some(subscription);
                        }
                        Err(err) => {
                            warn!(error = %err, "subscription recreate failed");
                            *self.current.write().await = None;
                        }
                    }
                }
            }
        }
    }

    /// Cancel and best-effort delete the subscription.
    pub async fn stop(&self) {
        let current = self.current.write().await.take();
        if let Some(subscription) = current {
            if let Err(err) = self.provider.delete_subscription(&subscription.id).await {
                warn!(error = %err, "subscription delete failed during shutdown");
            } else {
                info!(subscription_id = %subscription.id, "subscription deleted");
            }
        }
    }

    /// Whether a live subscription exists, for deep health.
    pub async fn is_active(&self) -> bool {
        self.current.read().await.is_some()
    }
}
