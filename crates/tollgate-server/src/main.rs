// crates/tollgate-server/src/main.rs
// ============================================================================
// Module: Tollgate Binary
// Description: Command-line entry point for the gateway.
// Purpose: Load configuration, assemble stores and services, and serve.
// Dependencies: tollgate-config, tollgate-core, tollgate-server, clap, tokio
// ============================================================================

//! ## Overview
//! The `tollgate` binary loads configuration, builds the configured store
//! backend, wires the governance engine to the model endpoint, and serves
//! the HTTP surface. Startup posture warnings are routed through the audit
//! sink so they land in the same stream as request events.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use tollgate_config::StoreKind;
use tollgate_config::TollgateConfig;
use tollgate_core::AlertSink;
use tollgate_core::ContentGate;
use tollgate_core::ConversationStore;
use tollgate_core::CostModel;
use tollgate_core::CounterStore;
use tollgate_core::GovernanceEngine;
use tollgate_core::InMemoryConversationStore;
use tollgate_core::InMemoryCounterStore;
use tollgate_core::InMemoryLedgerStore;
use tollgate_core::InMemoryUsageStore;
use tollgate_core::LedgerStore;
use tollgate_core::UsageStore;
use tollgate_server::AuditAlertSink;
use tollgate_server::AuditSink;
use tollgate_server::ChatService;
use tollgate_server::HttpModelClient;
use tollgate_server::IdentityResolver;
use tollgate_server::NoopMetrics;
use tollgate_server::PostureAuditEvent;
use tollgate_server::ServerError;
use tollgate_server::ServerState;
use tollgate_server::StderrAuditSink;
use tollgate_server::serve;
use tollgate_store_sqlite::SqliteGovernanceStore;
use tollgate_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: CLI
// ============================================================================

/// Tollgate gateway command-line interface.
#[derive(Debug, Parser)]
#[command(name = "tollgate", about = "Usage-governed chat gateway")]
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the gateway over HTTP.
    Serve {
        /// Path to the configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Bundle of store seams selected by configuration.
struct StoreSet {
    /// Counter store for the rate limiter.
    counters: Arc<dyn CounterStore>,
    /// Per-subject daily usage store.
    usage: Arc<dyn UsageStore>,
    /// Global spend ledger store.
    ledger: Arc<dyn LedgerStore>,
    /// Conversation and turn store.
    conversations: Arc<dyn ConversationStore>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            config,
        } => run_serve(config.as_deref()).await,
    }
}

/// Builds and runs the gateway.
async fn run_serve(config_path: Option<&std::path::Path>) -> Result<(), ServerError> {
    let config = TollgateConfig::load(config_path)
        .map_err(|err| ServerError::Config(err.to_string()))?;

    let audit = Arc::new(StderrAuditSink);
    let alerts: Arc<dyn AlertSink> = Arc::new(AuditAlertSink::new(audit.clone()));

    let gate = ContentGate::with_extra_rules(&config.gate.extra_rules())
        .map_err(|err| ServerError::Config(err.to_string()))?;
    let stores = build_stores(&config)?;

    let engine = GovernanceEngine::new(
        stores.counters,
        stores.usage,
        stores.ledger,
        stores.conversations,
        alerts,
        gate,
        CostModel::new(config.pricing.price_table()),
        config.governance_policy(),
    );

    let model = HttpModelClient::new(config.model.clone())
        .map_err(|err| ServerError::Init(err.to_string()))?;
    let resolver = IdentityResolver::from_config(&config.server.auth_tokens);
    if resolver.is_anonymous_only() {
        audit.record_posture(&PostureAuditEvent::new(
            "anonymous_only",
            Some(
                "no auth tokens configured; all callers resolve to the anonymous tier".to_string(),
            ),
        ));
    }

    let service =
        ChatService::new(engine, Arc::new(model), audit, Arc::new(NoopMetrics));
    let state = Arc::new(ServerState {
        service,
        resolver,
        max_body_bytes: config.server.max_body_bytes,
        max_message_chars: config.server.max_message_chars,
    });
    serve(&config.server.bind, state).await
}

/// Builds the configured store backend.
fn build_stores(config: &TollgateConfig) -> Result<StoreSet, ServerError> {
    match config.store.kind {
        StoreKind::Memory => Ok(StoreSet {
            counters: Arc::new(InMemoryCounterStore::new()),
            usage: Arc::new(InMemoryUsageStore::new()),
            ledger: Arc::new(InMemoryLedgerStore::new()),
            conversations: Arc::new(InMemoryConversationStore::new()),
        }),
        StoreKind::Sqlite => {
            let path = config
                .store
                .path
                .clone()
                .ok_or_else(|| ServerError::Config("sqlite store requires path".to_string()))?;
            let store = Arc::new(
                SqliteGovernanceStore::new(&SqliteStoreConfig {
                    path,
                    busy_timeout_ms: config.store.busy_timeout_ms,
                })
                .map_err(|err| ServerError::Init(err.to_string()))?,
            );
            Ok(StoreSet {
                counters: store.clone(),
                usage: store.clone(),
                ledger: store.clone(),
                conversations: store,
            })
        }
    }
}
