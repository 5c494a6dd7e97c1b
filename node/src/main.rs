// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # VIGIL Approval Daemon
//!
//! Entry point for the `vigil-node` binary. Parses CLI arguments,
//! initializes logging and metrics, wires an approval orchestrator onto an
//! in-process relay, and serves the status API.
//!
//! The binary supports four subcommands:
//!
//! - `run`          — start the approval daemon
//! - `keygen`       — generate steward identity and messaging keys
//! - `demo-approve` — run one k-of-n round against a simulated federation
//! - `version`      — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use vigil_protocol::approval::{
    decode_request, encode_response, response_signing_digest, ApprovalResponse, Decision,
    Orchestrator, StaticRegistry, StewardProfile, TransitPolicy,
};
use vigil_protocol::audit::AuditEmitter;
use vigil_protocol::card::{CardCredential, CounterLedger, MockCard, SigningPurpose};
use vigil_protocol::config;
use vigil_protocol::crypto::keys::StewardKeypair;
use vigil_protocol::guard::ReplayGuard;
use vigil_protocol::identity::StewardId;
use vigil_protocol::operation::{Operation, OperationType};
use vigil_protocol::transport::{
    open, EncryptionTier, InMemoryRelay, MessagingKeypair, RelayTransport, TierFallbackTransport,
};

use cli::{Commands, VigilNodeCli};
use metrics::NodeMetrics;

/// How often the housekeeping loop drops retained terminal sessions and
/// stale rate-limit windows.
const HOUSEKEEPING_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = VigilNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Keygen(args) => keygen(args),
        Commands::DemoApprove(args) => demo_approve(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Federation Wiring
// ---------------------------------------------------------------------------

/// One orchestrator and a set of simulated stewards wired onto a shared
/// in-memory relay. Each steward runs as a background auto-responder that
/// taps its mock card for every request it can open.
struct Federation {
    orchestrator: Arc<Orchestrator>,
    actor: StewardId,
    responders: Vec<tokio::task::JoinHandle<()>>,
}

impl Federation {
    fn shutdown(&self) {
        for task in &self.responders {
            task.abort();
        }
    }
}

/// Builds the federation: `steward_count` approvers of which the last
/// `rejectors` answer Reject, a requesting orchestrator with its own
/// identity and messaging keys, and a dispatcher draining the requester's
/// inbox.
fn spawn_federation(
    steward_count: u32,
    threshold: u32,
    rejectors: u32,
    identity: Option<StewardKeypair>,
) -> Result<Federation> {
    if steward_count == 0 {
        bail!("a federation needs at least one steward");
    }
    if rejectors > steward_count {
        bail!("rejectors ({}) exceed steward count ({})", rejectors, steward_count);
    }

    let relay = Arc::new(InMemoryRelay::new());
    let mut registry = StaticRegistry::new(threshold);
    let mut responders = Vec::new();

    for i in 0..steward_count {
        let identity = StewardKeypair::generate();
        let messaging = Arc::new(MessagingKeypair::generate());
        let card = Arc::new(MockCard::new());
        let profile = StewardProfile::new(
            identity.public_key(),
            card.public_key(),
            messaging.public_key(),
        );
        let id = profile.id.clone();
        relay.register(id.clone(), messaging.public_key(), true);
        registry = registry.add_approver_for_all(profile);

        let decision = if i >= steward_count - rejectors {
            Decision::Reject
        } else {
            Decision::Approve
        };
        responders.push(spawn_steward(&relay, id, messaging, card, decision));
    }

    let requester = identity.unwrap_or_else(StewardKeypair::generate);
    let actor = StewardId::from_public_key(&requester.public_key());
    let messaging = MessagingKeypair::generate();
    relay.register(actor.clone(), messaging.public_key(), true);

    let transport = Arc::new(TierFallbackTransport::new(relay));
    let orchestrator = Arc::new(Orchestrator::new(
        actor.clone(),
        messaging,
        Arc::new(MockCard::new()),
        Arc::new(registry),
        transport,
        Arc::new(CounterLedger::new()),
        Arc::new(ReplayGuard::new()),
        AuditEmitter::default(),
    ));
    orchestrator.spawn_dispatcher();

    Ok(Federation {
        orchestrator,
        actor,
        responders,
    })
}

/// Run one simulated steward: open every inbound request, tap the mock
/// card with the fixed decision, seal the response back to whoever asked.
fn spawn_steward(
    relay: &Arc<InMemoryRelay>,
    id: StewardId,
    messaging: Arc<MessagingKeypair>,
    card: Arc<MockCard>,
    decision: Decision,
) -> tokio::task::JoinHandle<()> {
    let mut inbox = relay.subscribe(&id);
    let relay = Arc::clone(relay);

    tokio::spawn(async move {
        while let Some(envelope) = inbox.recv().await {
            let Ok(plaintext) = open(envelope.tier, &messaging, &envelope.ciphertext) else {
                tracing::warn!(steward = %id.short(), "discarding envelope that failed to open");
                continue;
            };
            let Ok(request) = decode_request(&plaintext) else {
                continue;
            };
            let digest = response_signing_digest(&request.operation_hash, &request.nonce, decision);
            let Ok(card_op) = card.sign(digest, SigningPurpose::GuardianApproval).await else {
                continue;
            };
            let response = ApprovalResponse {
                operation_hash: request.operation_hash,
                nonce: request.nonce,
                decision,
                approver: id.clone(),
                card_op,
                responded_at: config::now_ms(),
            };
            let Ok(bytes) = encode_response(&response, &TransitPolicy::permissive()) else {
                continue;
            };
            if let Err(e) = relay
                .send_encrypted(&request.requester, &bytes, EncryptionTier::Sealed)
                .await
            {
                tracing::warn!(steward = %id.short(), "response delivery failed: {}", e);
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

/// Starts the full daemon: hosted federation, status API, and metrics
/// endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init("vigil_node=info,vigil_protocol=info,tower_http=debug");

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        stewards = args.stewards,
        threshold = args.threshold,
        "starting vigil-node"
    );

    // Identity resolution: explicit flag wins, then a key file written by
    // `keygen`, then a fresh throwaway identity.
    let identity = match &args.identity_key {
        Some(hex_key) => Some(
            StewardKeypair::from_hex(hex_key)
                .map_err(|e| anyhow::anyhow!("invalid identity key: {}", e))?,
        ),
        None => {
            let key_path = args.data_dir.join("identity.key");
            match std::fs::read_to_string(&key_path) {
                Ok(hex_key) => {
                    let kp = StewardKeypair::from_hex(hex_key.trim()).map_err(|e| {
                        anyhow::anyhow!("corrupt identity key at {}: {}", key_path.display(), e)
                    })?;
                    tracing::info!(path = %key_path.display(), "loaded steward identity");
                    Some(kp)
                }
                Err(_) => {
                    tracing::info!("no identity key found, generating a throwaway identity");
                    None
                }
            }
        }
    };

    // --- Federation ---
    let federation = spawn_federation(args.stewards, args.threshold, 0, identity)?;
    tracing::info!(actor = %federation.actor, "federation wired");

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());
    let metrics_pump =
        metrics::spawn_audit_pump(Arc::clone(&node_metrics), federation.orchestrator.audit());

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            config::PROTOCOL_VERSION,
        ),
        federation: "demo".to_string(),
        identity: federation.actor.to_address(),
        started_at: std::time::Instant::now(),
        orchestrator: Arc::clone(&federation.orchestrator),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("status API listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Housekeeping ---
    let housekeeper = {
        let orchestrator = Arc::clone(&federation.orchestrator);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                HOUSEKEEPING_INTERVAL_SECS,
            ));
            loop {
                interval.tick().await;
                orchestrator.purge_expired();
                tracing::debug!("housekeeping pass completed");
            }
        })
    };

    // --- Exercise loop ---
    // Optional traffic generator: authorizes a small payment on a timer so
    // the audit, metrics, and snapshot pipelines carry live data.
    let exercise = args.exercise_interval.map(|secs| {
        let orchestrator = Arc::clone(&federation.orchestrator);
        let actor = federation.actor.clone();
        let latency = node_metrics.approval_latency_seconds.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(secs));
            let mut round: u64 = 0;
            loop {
                interval.tick().await;
                round += 1;
                let op = match Operation::new(
                    OperationType::Payment,
                    1_000 + round,
                    format!("acct-exercise-{}", round),
                    "scheduled exercise round",
                    actor.clone(),
                ) {
                    Ok(op) => op,
                    Err(e) => {
                        tracing::error!("exercise operation rejected: {}", e);
                        continue;
                    }
                };
                let started = std::time::Instant::now();
                match orchestrator.authorize(&op).await {
                    Ok(result) => {
                        latency.observe(started.elapsed().as_secs_f64());
                        tracing::info!(
                            round,
                            approved = result.approved,
                            approvals = result.approvals,
                            "exercise round settled"
                        );
                    }
                    Err(e) => tracing::warn!(round, "exercise round failed: {}", e),
                }
            }
        })
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    if let Some(task) = exercise {
        task.abort();
    }
    housekeeper.abort();
    metrics_pump.abort();
    federation.shutdown();
    tracing::info!("vigil-node stopped");
    Ok(())
}

/// Generates a steward identity keypair and a messaging keypair, writing
/// both secrets into the data directory.
fn keygen(args: cli::KeygenArgs) -> Result<()> {
    logging::init("vigil_node=info");

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "generating steward keys");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let identity = StewardKeypair::generate();
    let address = StewardId::from_public_key(&identity.public_key()).to_address();

    // The messaging key is kept as a seed so it can be reconstructed
    // deterministically at startup.
    let mut messaging_seed = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut messaging_seed);
    let messaging = MessagingKeypair::from_seed(messaging_seed);

    let identity_path = data_dir.join("identity.key");
    std::fs::write(&identity_path, hex::encode(identity.secret_key_bytes()))
        .with_context(|| format!("failed to write identity key to {}", identity_path.display()))?;

    let messaging_path = data_dir.join("messaging.key");
    std::fs::write(&messaging_path, hex::encode(messaging_seed))
        .with_context(|| format!("failed to write messaging key to {}", messaging_path.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&identity_path, std::fs::Permissions::from_mode(0o600))?;
        std::fs::set_permissions(&messaging_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(
        address = %address,
        identity_key = %identity_path.display(),
        messaging_key = %messaging_path.display(),
        "steward keys generated"
    );

    println!("Steward keys generated.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Address        : {}", address);
    println!("  Identity key   : {}", identity_path.display());
    println!("  Identity pub   : {}", identity.public_key_hex());
    println!("  Messaging key  : {}", messaging_path.display());
    println!(
        "  Messaging pub  : {}",
        hex::encode(messaging.public_key().as_bytes())
    );

    Ok(())
}

/// Runs a single approval round against a freshly wired federation and
/// prints the verdict to stdout.
async fn demo_approve(args: cli::DemoApproveArgs) -> Result<()> {
    logging::init("vigil_node=info,vigil_protocol=info");

    let federation = spawn_federation(args.stewards, args.threshold, args.rejectors, None)?;

    let operation = Operation::new(
        OperationType::Payment,
        args.amount,
        args.recipient.clone(),
        args.purpose.clone(),
        federation.actor.clone(),
    )
    .map_err(|e| anyhow::anyhow!("invalid operation: {}", e))?;

    let started = std::time::Instant::now();
    let result = federation
        .orchestrator
        .authorize(&operation)
        .await
        .map_err(|e| anyhow::anyhow!("round failed to open: {}", e))?;
    let elapsed = started.elapsed();

    federation.shutdown();

    println!("Approval round settled.");
    println!("  Operation  : {}", result.operation_hash.short());
    println!("  Verdict    : {}", result.status.as_str());
    println!(
        "  Approvals  : {} of {} required",
        result.approvals, result.threshold
    );
    println!("  Elapsed    : {:.3}s", elapsed.as_secs_f64());

    if !result.approved {
        std::process::exit(1);
    }
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("vigil-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol   {}", config::PROTOCOL_VERSION);
    println!("fingerprint {}", config::PROTOCOL_FINGERPRINT);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_protocol::approval::SessionStatus;

    #[tokio::test]
    async fn federation_settles_a_two_of_three_round() {
        let fed = spawn_federation(3, 2, 0, None).unwrap();
        let op = Operation::new(
            OperationType::Payment,
            10_000,
            "acct-main-test",
            "wiring check",
            fed.actor.clone(),
        )
        .unwrap();

        let result = fed.orchestrator.authorize(&op).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.status, SessionStatus::Approved);
        fed.shutdown();
    }

    #[tokio::test]
    async fn rejecting_minority_does_not_block_quorum() {
        let fed = spawn_federation(3, 2, 1, None).unwrap();
        let op = Operation::new(
            OperationType::Payment,
            500,
            "acct-main-test",
            "wiring check",
            fed.actor.clone(),
        )
        .unwrap();

        let result = fed.orchestrator.authorize(&op).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.approvals, 2);
        fed.shutdown();
    }

    #[test]
    fn federation_rejects_impossible_shapes() {
        assert!(spawn_federation(0, 1, 0, None).is_err());
        assert!(spawn_federation(2, 1, 3, None).is_err());
    }
}
