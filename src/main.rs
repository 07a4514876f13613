//! PhishTriage Node
//! ================
//! Main entry point for the phishing-triage daemon.
//!
//! Copyright © 2025 PhishTriage Maintainers. All rights reserved.
//! Licensed under GPL-3.0.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::format::json;

use phish_triage::admission::{Deduplicator, GuardChain, RateLimiter};
use phish_triage::analysis::AnalysisPipeline;
use phish_triage::config::Config;
use phish_triage::ingest::webhook::WebhookState;
use phish_triage::ingest::{
    queue, MailboxMonitor, NotificationQueue, SubscriptionManager, TriagePipeline,
};
use phish_triage::intel::ThreatIntelService;
use phish_triage::llm::LlmExplainer;
use phish_triage::mail::{GraphMailClient, MailProvider, ReplyDispatcher};
use phish_triage::metrics::{init_metrics, update_system_metrics};
use phish_triage::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing with JSON format for structured logging
    tracing_subscriber::fmt()
        .event_format(json())
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            // Fatal: print to the console and exit non-zero.
            eprintln!("configuration error: {}", err);
            std::process::exit(1);
        }
    };

    init_metrics();
    info!("Prometheus metrics initialized");
    info!(
        "Starting PhishTriage Node v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Cache backend: Redis when configured and reachable, memory otherwise.
    let cache = phish_triage::cache::connect(config.redis_url.as_deref()).await;

    // Mail provider.
    let provider: Arc<dyn MailProvider> = match &config.graph {
        Some(graph_cfg) => Arc::new(GraphMailClient::new(graph_cfg.clone())),
        None => {
            error!("no mail provider credentials configured");
            eprintln!("configuration error: mail provider credentials are required");
            std::process::exit(1);
        }
    };
    if let Err(err) = provider.probe().await {
        // Mailbox inaccessible at startup is fatal.
        eprintln!("mail provider unreachable at startup: {}", err);
        std::process::exit(1);
    }

    // Admission layer.
    let limiter = Arc::new(RateLimiter::new(
        Arc::clone(&cache),
        config.rate_limit.clone(),
        &config.redis_key_prefix,
    ));
    let dedup = Arc::new(Deduplicator::new(
        Arc::clone(&cache),
        config.dedup.clone(),
        &config.redis_key_prefix,
    ));
    let guards = GuardChain::new(&config);

    // Analysis stack.
    let intel = if config.intel.enabled {
        Some(Arc::new(ThreatIntelService::new(
            Arc::clone(&cache),
            config.intel.clone(),
            &config.redis_key_prefix,
        )))
    } else {
        info!("threat-intel enrichment disabled");
        None
    };
    let explainer = LlmExplainer::from_config(&config.llm).map(Arc::new);
    if explainer.is_none() {
        info!("llm explainer disabled (no API key)");
    }

    let analyzer = AnalysisPipeline::new(intel.clone(), explainer.clone());
    let reply = ReplyDispatcher::new(
        Arc::clone(&provider),
        Arc::clone(&limiter),
        Arc::clone(&dedup),
        config.mailbox_address.clone(),
    );
    let pipeline = Arc::new(TriagePipeline::new(guards, Arc::clone(&dedup), analyzer, reply));

    // Shutdown fan-out.
    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    // Ingestion: queue + workers, pollers, subscription.
    let (notification_queue, queue_rx) = NotificationQueue::new(config.queue_capacity);
    let worker_handles = queue::spawn_workers(
        config.poller.parallel_limit,
        queue_rx,
        Arc::clone(&provider),
        Arc::clone(&pipeline),
        config.mailbox_address.clone(),
        &shutdown_tx,
    );

    let monitor = Arc::new(MailboxMonitor::new(
        Arc::clone(&provider),
        Arc::clone(&pipeline),
        config.poller.clone(),
        config.mailbox_address.clone(),
    ));
    monitor.spawn_poller(&shutdown_tx);
    monitor.spawn_catchup(&shutdown_tx);

    let subscriptions = if config.webhook.notification_url.is_some() {
        let manager = Arc::new(SubscriptionManager::new(
            Arc::clone(&provider),
            Arc::clone(&monitor),
            config.webhook.clone(),
        ));
        Arc::clone(&manager).spawn(&shutdown_tx);
        Some(manager)
    } else {
        info!("webhooks not configured, running on pollers only");
        None
    };

    dedup.spawn_cleanup(shutdown_tx.subscribe());

    // System metrics refresh task.
    {
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => update_system_metrics(),
                }
            }
        });
    }

    // Operational HTTP surface.
    let webhook_state = Arc::new(WebhookState {
        queue: notification_queue,
        client_state: config.webhook.client_state.clone(),
    });
    let state = Arc::new(AppState::new(
        config,
        cache,
        Arc::clone(&provider),
        intel,
        explainer,
        webhook_state,
        subscriptions.clone(),
    ));

    let server_shutdown = {
        let mut rx = shutdown_tx.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    };
    let server_handle = tokio::spawn(server::serve(Arc::clone(&state), server_shutdown));

    info!("PhishTriage Node initialized successfully");

    // Wait for a termination signal, then drain.
    shutdown_signal().await;
    info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(());

    for handle in worker_handles {
        if let Err(err) = handle.await {
            warn!(error = %err, "worker did not stop cleanly");
        }
    }
    if let Some(manager) = subscriptions {
        manager.stop().await;
    }
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "http server exited with error"),
        Err(err) => warn!(error = %err, "http server task panicked"),
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
