//! Mail Provider Module
//! ====================
//! The provider seam (list/get/send/subscriptions), the Microsoft-Graph
//! client behind it, and the reply dispatcher that answers reporters.
//!
//! Copyright © 2025 PhishTriage Maintainers. All rights reserved.
//! Licensed under GPL-3.0.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod graph;
pub mod reply;

pub use graph::GraphMailClient;
pub use reply::ReplyDispatcher;

use crate::analysis::InboundMessage;
use crate::error::TriageError;

/// Push subscription request against the provider.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRequest {
    pub resource: String,
    pub notification_url: String,
    pub client_state: String,
    pub expires_at: DateTime<Utc>,
}

/// A live push subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub expires_at: DateTime<Utc>,
}

/// The four provider operations the core depends on, plus a health probe.
/// Tests fake this trait; production uses [`GraphMailClient`].
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Messages received in `mailbox` since `since`, newest last.
    async fn list_messages(
        &self,
        mailbox: &str,
        since: DateTime<Utc>,
        top: usize,
    ) -> Result<Vec<InboundMessage>, TriageError>;

    /// Fetch one full message by provider id.
    async fn get_message(&self, mailbox: &str, id: &str) -> Result<InboundMessage, TriageError>;

    /// Send an HTML mail from `mailbox`.
    async fn send_mail(
        &self,
        mailbox: &str,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), TriageError>;

    async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<Subscription, TriageError>;

    async fn renew_subscription(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Subscription, TriageError>;

    async fn delete_subscription(&self, id: &str) -> Result<(), TriageError>;

    /// Cheap reachability probe used by readiness and deep health.
    async fn probe(&self) -> Result<(), TriageError>;
}
