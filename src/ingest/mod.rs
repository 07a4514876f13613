//! Ingestion Coordinator Module
//! ============================
//! Webhook intake, the bounded notification queue with its worker pool,
//! the periodic and catch-up pollers, and the subscription lifecycle. Both
//! intake paths converge on [`TriagePipeline::process`].
//!
//! Copyright © 2025 PhishTriage Maintainers. All rights reserved.
//! Licensed under GPL-3.0.

pub mod monitor;
pub mod pipeline;
pub mod queue;
pub mod subscription;
pub mod webhook;

pub use monitor::MailboxMonitor;
pub use pipeline::TriagePipeline;
pub use queue::NotificationQueue;
pub use subscription::SubscriptionManager;
