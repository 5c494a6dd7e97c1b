//! # Status API
//!
//! Builds the axum router that exposes the daemon's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path        | Description                                 |
//! |--------|-------------|---------------------------------------------|
//! | GET    | `/health`   | Liveness probe                              |
//! | GET    | `/status`   | Daemon status summary                       |
//! | GET    | `/sessions` | Sanitized snapshots of tracked sessions     |
//!
//! Everything served here is built from sanitized session snapshots:
//! operation hashes appear as short prefixes and amounts, recipients, and
//! purposes never reach a handler, so the API surface cannot leak what a
//! round was about.

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use vigil_protocol::approval::{Orchestrator, SessionStatus};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The daemon's reported version string.
    pub version: String,
    /// Name of the hosted federation (e.g., "demo", "staging").
    pub federation: String,
    /// The requesting steward's address.
    pub identity: String,
    /// When the daemon started, for uptime reporting.
    pub started_at: Instant,
    /// The approval orchestrator whose sessions this API reports on.
    pub orchestrator: Arc<Orchestrator>,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
///
/// The returned router is ready to be served on the configured RPC port.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/sessions", get(sessions_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Daemon software version.
    pub version: String,
    /// Federation name.
    pub federation: String,
    /// The requesting steward's address.
    pub identity: String,
    /// Sessions still awaiting a terminal state.
    pub pending_sessions: u64,
    /// All sessions currently tracked, terminal included, until their
    /// retention window lapses.
    pub tracked_sessions: u64,
    /// Seconds since the daemon started.
    pub uptime_secs: u64,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the daemon is alive.
///
/// This is the liveness probe for orchestration (k8s, systemd, etc.).
/// It intentionally does not check internal subsystem health — that
/// belongs in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — returns a daemon status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshots = state.orchestrator.session_snapshots();
    let pending = snapshots
        .iter()
        .filter(|s| s.status == SessionStatus::Pending)
        .count() as u64;

    let resp = StatusResponse {
        version: state.version.clone(),
        federation: state.federation.clone(),
        identity: state.identity.clone(),
        pending_sessions: pending,
        tracked_sessions: snapshots.len() as u64,
        uptime_secs: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    Json(resp)
}

/// `GET /sessions` — returns sanitized snapshots of every tracked
/// session, newest first.
async fn sessions_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.session_snapshots())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use vigil_protocol::approval::{StaticRegistry, StewardProfile};
    use vigil_protocol::audit::AuditEmitter;
    use vigil_protocol::card::{CardCredential, CounterLedger, MockCard};
    use vigil_protocol::crypto::keys::StewardKeypair;
    use vigil_protocol::guard::ReplayGuard;
    use vigil_protocol::identity::StewardId;
    use vigil_protocol::operation::{Operation, OperationType};
    use vigil_protocol::transport::{InMemoryRelay, MessagingKeypair, RelayTransport};

    /// A minimal three-steward federation backing the API under test. The
    /// receivers keep the relay inboxes open so request fan-out does not
    /// error in the background.
    struct TestNode {
        state: AppState,
        actor: StewardId,
        _inboxes: Vec<tokio::sync::mpsc::Receiver<vigil_protocol::transport::InboundEnvelope>>,
    }

    fn test_node() -> TestNode {
        let relay = Arc::new(InMemoryRelay::new());
        let mut registry = StaticRegistry::new(2);
        let mut inboxes = Vec::new();

        for _ in 0..3 {
            let identity = StewardKeypair::generate();
            let messaging = MessagingKeypair::generate();
            let card = MockCard::new();
            let profile = StewardProfile::new(
                identity.public_key(),
                card.public_key(),
                messaging.public_key(),
            );
            relay.register(profile.id.clone(), messaging.public_key(), true);
            inboxes.push(relay.subscribe(&profile.id));
            registry = registry.add_approver_for_all(profile);
        }

        let requester = StewardKeypair::generate();
        let actor = StewardId::from_public_key(&requester.public_key());
        let messaging = MessagingKeypair::generate();
        relay.register(actor.clone(), messaging.public_key(), true);

        let orchestrator = Arc::new(Orchestrator::new(
            actor.clone(),
            messaging,
            Arc::new(MockCard::new()),
            Arc::new(registry),
            relay,
            Arc::new(CounterLedger::new()),
            Arc::new(ReplayGuard::new()),
            AuditEmitter::default(),
        ));

        let state = AppState {
            version: "0.1.0-test".into(),
            federation: "devnet".into(),
            identity: actor.to_address(),
            started_at: Instant::now(),
            orchestrator,
            metrics: Arc::new(crate::metrics::NodeMetrics::new()),
        };
        TestNode {
            state,
            actor,
            _inboxes: inboxes,
        }
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let node = test_node();
        let router = create_router(node.state.clone());
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_identity_and_zero_sessions() {
        let node = test_node();
        let router = create_router(node.state.clone());
        let (status, body) = get(&router, "/status").await;

        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.federation, "devnet");
        assert_eq!(resp.identity, node.actor.to_address());
        assert_eq!(resp.pending_sessions, 0);
        assert_eq!(resp.tracked_sessions, 0);
    }

    #[tokio::test]
    async fn sessions_endpoint_reflects_an_open_round() {
        let node = test_node();
        let op = Operation::new(
            OperationType::Payment,
            5_000,
            "acct-442",
            "license renewal",
            node.actor.clone(),
        )
        .unwrap();
        let _handle = node
            .state
            .orchestrator
            .request_approval(&op)
            .await
            .expect("round opens");

        let router = create_router(node.state.clone());

        let (status, body) = get(&router, "/sessions").await;
        assert_eq!(status, StatusCode::OK);
        let sessions: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let list = sessions.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["status"], "Pending");
        assert_eq!(list[0]["threshold"], 2);
        assert_eq!(list[0]["eligible"], 3);
        // Only the hash prefix is exposed, never operation fields.
        assert_eq!(list[0]["hash_prefix"].as_str().unwrap().len(), 8);
        assert!(body.windows(8).all(|w| w != "acct-442".as_bytes()));

        let (_, body) = get(&router, "/status").await;
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.pending_sessions, 1);
        assert_eq!(resp.tracked_sessions, 1);
    }
}
