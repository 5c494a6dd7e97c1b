//! # Prometheus Metrics
//!
//! Exposes operational metrics for the approval daemon. Scraped by
//! Prometheus at the `/metrics` HTTP endpoint on the configured metrics
//! port.
//!
//! The counters are fed from the protocol's audit stream: a background
//! task subscribes to the [`AuditEmitter`] broadcast and maps every
//! [`AuditEvent`] onto a metric, so the numbers stay consistent with the
//! audit log without the orchestrator knowing metrics exist.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so
//! they do not collide with any default global registry consumers.
//!
//! [`AuditEmitter`]: vigil_protocol::audit::AuditEmitter
//! [`AuditEvent`]: vigil_protocol::audit::AuditEvent

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use vigil_protocol::audit::{AuditEmitter, AuditEvent, AuditKind};

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (wraps `Arc` internally via prometheus handles) so it can
/// be shared across request handlers and background tasks.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Total number of approval sessions opened.
    pub sessions_started_total: IntCounter,
    /// Total number of sessions that reached their approval threshold.
    pub sessions_approved_total: IntCounter,
    /// Total number of sessions that expired before threshold.
    pub sessions_expired_total: IntCounter,
    /// Total number of sessions cancelled by the initiator.
    pub sessions_cancelled_total: IntCounter,
    /// Total number of responses that passed every check and were counted.
    pub responses_accepted_total: IntCounter,
    /// Total number of responses silently discarded (replay, bad
    /// signature, ineligible sender, rate limit...).
    pub responses_discarded_total: IntCounter,
    /// Total number of consumed nonces seen a second time.
    pub replays_rejected_total: IntCounter,
    /// Total number of card counter regressions. Any nonzero value means
    /// a credential was cloned and has been disabled.
    pub cloning_detected_total: IntCounter,
    /// Total number of approvers that exhausted every delivery attempt.
    pub approvers_unreachable_total: IntCounter,
    /// Number of sessions currently awaiting a terminal state.
    pub active_sessions: IntGauge,
    /// Histogram of end-to-end authorization round latency in seconds.
    pub approval_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("vigil".into()), None)
            .expect("failed to create prometheus registry");

        fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
            let c = IntCounter::new(name, help).expect("metric creation");
            registry
                .register(Box::new(c.clone()))
                .expect("metric registration");
            c
        }

        let sessions_started_total = counter(
            &registry,
            "sessions_started_total",
            "Total number of approval sessions opened",
        );
        let sessions_approved_total = counter(
            &registry,
            "sessions_approved_total",
            "Total number of sessions that reached their approval threshold",
        );
        let sessions_expired_total = counter(
            &registry,
            "sessions_expired_total",
            "Total number of sessions that expired before threshold",
        );
        let sessions_cancelled_total = counter(
            &registry,
            "sessions_cancelled_total",
            "Total number of sessions cancelled by the initiator",
        );
        let responses_accepted_total = counter(
            &registry,
            "responses_accepted_total",
            "Total number of approval responses counted",
        );
        let responses_discarded_total = counter(
            &registry,
            "responses_discarded_total",
            "Total number of approval responses silently discarded",
        );
        let replays_rejected_total = counter(
            &registry,
            "replays_rejected_total",
            "Total number of replayed nonces rejected",
        );
        let cloning_detected_total = counter(
            &registry,
            "cloning_detected_total",
            "Total number of card counter regressions detected",
        );
        let approvers_unreachable_total = counter(
            &registry,
            "approvers_unreachable_total",
            "Total number of approvers that exhausted all delivery attempts",
        );

        let active_sessions = IntGauge::new(
            "active_sessions",
            "Number of approval sessions currently pending",
        )
        .expect("metric creation");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("metric registration");

        let approval_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "approval_latency_seconds",
                "End-to-end authorization round latency in seconds",
            )
            .buckets(vec![
                0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 60.0, 120.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(approval_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            sessions_started_total,
            sessions_approved_total,
            sessions_expired_total,
            sessions_cancelled_total,
            responses_accepted_total,
            responses_discarded_total,
            replays_rejected_total,
            cloning_detected_total,
            approvers_unreachable_total,
            active_sessions,
            approval_latency_seconds,
        }
    }

    /// Map one audit event onto the counters.
    ///
    /// Session lifecycle events also move the active-sessions gauge; the
    /// security-alert kinds (replay, rate limit, bad signature, cloning)
    /// count both in their own series and as discards, matching how the
    /// orchestrator reports them.
    pub fn observe(&self, event: &AuditEvent) {
        match event.kind {
            AuditKind::SessionStarted => {
                self.sessions_started_total.inc();
                self.active_sessions.inc();
            }
            AuditKind::SessionApproved => {
                self.sessions_approved_total.inc();
                self.active_sessions.dec();
            }
            AuditKind::SessionExpired => {
                self.sessions_expired_total.inc();
                self.active_sessions.dec();
            }
            AuditKind::SessionCancelled => {
                self.sessions_cancelled_total.inc();
                self.active_sessions.dec();
            }
            AuditKind::ResponseAccepted | AuditKind::ResponseRejected => {
                self.responses_accepted_total.inc();
            }
            AuditKind::ResponseDiscarded => {
                self.responses_discarded_total.inc();
            }
            AuditKind::ReplayRejected => {
                self.replays_rejected_total.inc();
                self.responses_discarded_total.inc();
            }
            AuditKind::RateLimited | AuditKind::SignatureFailure => {
                self.responses_discarded_total.inc();
            }
            AuditKind::CloningDetected => {
                self.cloning_detected_total.inc();
                self.responses_discarded_total.inc();
            }
            AuditKind::ApproverUnreachable => {
                self.approvers_unreachable_total.inc();
            }
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers via extension.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Spawn the pump that drains the audit broadcast into the counters.
///
/// Runs until the emitter is dropped. A lagged subscription only skips
/// events, so a slow scrape can undercount but never stall the
/// orchestrator.
pub fn spawn_audit_pump(
    metrics: SharedMetrics,
    emitter: &AuditEmitter,
) -> tokio::task::JoinHandle<()> {
    let mut rx = emitter.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => metrics.observe(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "metrics pump lagged behind audit stream");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_protocol::operation::OperationHash;

    fn event(kind: AuditKind) -> AuditEvent {
        AuditEvent::new(kind, &OperationHash([7u8; 32]))
    }

    #[test]
    fn session_lifecycle_moves_gauge_and_counters() {
        let m = NodeMetrics::new();

        m.observe(&event(AuditKind::SessionStarted));
        m.observe(&event(AuditKind::SessionStarted));
        assert_eq!(m.active_sessions.get(), 2);

        m.observe(&event(AuditKind::SessionApproved));
        m.observe(&event(AuditKind::SessionExpired));
        assert_eq!(m.active_sessions.get(), 0);
        assert_eq!(m.sessions_started_total.get(), 2);
        assert_eq!(m.sessions_approved_total.get(), 1);
        assert_eq!(m.sessions_expired_total.get(), 1);
    }

    #[test]
    fn security_alerts_count_as_discards_too() {
        let m = NodeMetrics::new();

        m.observe(&event(AuditKind::ReplayRejected));
        m.observe(&event(AuditKind::CloningDetected));
        m.observe(&event(AuditKind::ResponseDiscarded));

        assert_eq!(m.replays_rejected_total.get(), 1);
        assert_eq!(m.cloning_detected_total.get(), 1);
        assert_eq!(m.responses_discarded_total.get(), 3);
    }

    #[test]
    fn rejections_count_as_accepted_responses() {
        // A recorded rejection went through the same acceptance pipeline
        // as an approval; only discards mean the response was dropped.
        let m = NodeMetrics::new();
        m.observe(&event(AuditKind::ResponseRejected));
        assert_eq!(m.responses_accepted_total.get(), 1);
        assert_eq!(m.responses_discarded_total.get(), 0);
    }

    #[test]
    fn encode_exposes_prefixed_names() {
        let m = NodeMetrics::new();
        m.observe(&event(AuditKind::SessionStarted));
        let text = m.encode().unwrap();
        assert!(text.contains("vigil_sessions_started_total"));
        assert!(text.contains("vigil_active_sessions"));
        assert!(text.contains("vigil_approval_latency_seconds"));
    }

    #[tokio::test]
    async fn audit_pump_feeds_counters() {
        let m: SharedMetrics = Arc::new(NodeMetrics::new());
        let emitter = AuditEmitter::new(16);
        let pump = spawn_audit_pump(Arc::clone(&m), &emitter);

        emitter.emit(event(AuditKind::SessionStarted));
        emitter.emit(event(AuditKind::ResponseAccepted));

        // Give the pump a moment to drain the channel.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(m.sessions_started_total.get(), 1);
        assert_eq!(m.responses_accepted_total.get(), 1);
        pump.abort();
    }
}
