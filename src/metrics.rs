//! Prometheus metrics for PhishTriage
//!
//! This module provides metrics collection for:
//! - Pipeline throughput and admission decisions
//! - Reply dispatch and rate limiting
//! - Threat-intel and LLM circuit breakers
//! - Notification queue pressure
//! - System resource usage

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, TextEncoder,
};

// Global metrics registry
lazy_static! {
    pub static ref METRICS_REGISTRY: prometheus::Registry = {
        let registry = prometheus::Registry::new();

        registry.register(Box::new(EMAILS_PROCESSED_TOTAL.clone())).unwrap();
        registry.register(Box::new(EMAILS_BLOCKED_TOTAL.clone())).unwrap();
        registry.register(Box::new(RATE_LIMIT_HITS_TOTAL.clone())).unwrap();
        registry.register(Box::new(REPLIES_SENT_TOTAL.clone())).unwrap();
        registry.register(Box::new(REPLY_FAILURES_TOTAL.clone())).unwrap();
        registry.register(Box::new(REPLY_LATENCY_SECONDS.clone())).unwrap();
        registry.register(Box::new(ANALYSIS_DURATION_SECONDS.clone())).unwrap();
        registry.register(Box::new(ANALYSIS_RISK_SCORE.clone())).unwrap();
        registry.register(Box::new(INTEL_REQUESTS_TOTAL.clone())).unwrap();
        registry.register(Box::new(BREAKER_STATE.clone())).unwrap();
        registry.register(Box::new(QUEUE_DEPTH.clone())).unwrap();
        registry.register(Box::new(QUEUE_DROPPED_TOTAL.clone())).unwrap();
        registry.register(Box::new(WEBHOOK_NOTIFICATIONS_TOTAL.clone())).unwrap();
        registry.register(Box::new(POLL_CYCLES_TOTAL.clone())).unwrap();
        registry.register(Box::new(SYSTEM_MEMORY_USAGE_BYTES.clone())).unwrap();

        registry
    };

    // Pipeline metrics
    pub static ref EMAILS_PROCESSED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("phishtriage_emails_processed_total", "Messages that entered the pipeline"),
        &["outcome"]
    ).unwrap();

    pub static ref EMAILS_BLOCKED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("phishtriage_emails_blocked_total", "Messages dropped by the guard/limit layer"),
        &["reason"]
    ).unwrap();

    pub static ref ANALYSIS_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("phishtriage_analysis_duration_seconds", "End-to-end analysis time per message")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).unwrap();

    pub static ref ANALYSIS_RISK_SCORE: Histogram = Histogram::with_opts(
        HistogramOpts::new("phishtriage_analysis_risk_score", "Distribution of final risk scores")
            .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0])
    ).unwrap();

    // Reply dispatch metrics
    pub static ref RATE_LIMIT_HITS_TOTAL: IntCounter = IntCounter::new(
        "phishtriage_rate_limit_hits_total",
        "Replies suppressed by the rate limiter"
    ).unwrap();

    pub static ref REPLIES_SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("phishtriage_replies_sent_total", "Replies delivered to reporters"),
        &["kind"]
    ).unwrap();

    pub static ref REPLY_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "phishtriage_reply_failures_total",
        "Reply send attempts that failed"
    ).unwrap();

    pub static ref REPLY_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("phishtriage_reply_latency_seconds", "Time spent sending a reply")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    ).unwrap();

    // External dependency metrics
    pub static ref INTEL_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("phishtriage_intel_requests_total", "Threat-intel API calls"),
        &["api", "outcome"]
    ).unwrap();

    pub static ref BREAKER_STATE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("phishtriage_breaker_state", "Circuit breaker state (0=closed, 1=open, 2=half-open)"),
        &["service"]
    ).unwrap();

    // Ingestion metrics
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "phishtriage_notification_queue_depth",
        "Provider ids waiting in the notification queue"
    ).unwrap();

    pub static ref QUEUE_DROPPED_TOTAL: IntCounter = IntCounter::new(
        "phishtriage_notification_queue_dropped_total",
        "Enqueue attempts dropped because the queue was full"
    ).unwrap();

    pub static ref WEBHOOK_NOTIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("phishtriage_webhook_notifications_total", "Webhook notifications by outcome"),
        &["outcome"]
    ).unwrap();

    pub static ref POLL_CYCLES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("phishtriage_poll_cycles_total", "Mailbox poll cycles by poller kind"),
        &["kind"]
    ).unwrap();

    // System metrics
    pub static ref SYSTEM_MEMORY_USAGE_BYTES: Gauge = Gauge::new(
        "phishtriage_system_memory_usage_bytes",
        "Resident memory of the triage process in bytes"
    ).unwrap();
}

/// Encode the registry in Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&METRICS_REGISTRY.gather(), &mut buffer).is_err() {
        return "# Error encoding metrics".to_string();
    }
    String::from_utf8(buffer).unwrap_or_else(|_| "# Error encoding metrics".to_string())
}

/// Encode the registry as a flat JSON object keyed by metric name.
pub fn encode_metrics_json() -> serde_json::Value {
    let mut out = serde_json::Map::new();
    for family in METRICS_REGISTRY.gather() {
        let mut samples = Vec::new();
        for metric in family.get_metric() {
            let labels: serde_json::Map<String, serde_json::Value> = metric
                .get_label()
                .iter()
                .map(|l| (l.get_name().to_string(), l.get_value().into()))
                .collect();
            let value = if metric.has_counter() {
                metric.get_counter().get_value()
            } else if metric.has_gauge() {
                metric.get_gauge().get_value()
            } else if metric.has_histogram() {
                metric.get_histogram().get_sample_sum()
            } else {
                0.0
            };
            samples.push(serde_json::json!({ "labels": labels, "value": value }));
        }
        out.insert(family.get_name().to_string(), serde_json::Value::Array(samples));
    }
    serde_json::Value::Object(out)
}

/// Initialize metrics with default values so every series exists on scrape.
pub fn init_metrics() {
    QUEUE_DEPTH.set(0);
    for service in ["virustotal", "abuseipdb", "domain-age", "llm"] {
        BREAKER_STATE.with_label_values(&[service]).set(0);
    }
    for outcome in ["analyzed", "blocked", "failed"] {
        EMAILS_PROCESSED_TOTAL.with_label_values(&[outcome]).inc_by(0);
    }
}

/// Update system metrics
pub fn update_system_metrics() {
    SYSTEM_MEMORY_USAGE_BYTES.set(process_memory_bytes() as f64);
}

/// Current resident memory of this process in bytes, for deep health.
pub fn process_memory_bytes() -> u64 {
    use sysinfo::{Pid, System};

    let mut sys = System::new();
    let pid = Pid::from_u32(std::process::id());
    sys.refresh_process(pid);
    sys.process(pid).map(|p| p.memory()).unwrap_or(0)
}
