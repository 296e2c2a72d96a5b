// crates/tollgate-server/src/lib.rs
// ============================================================================
// Module: Tollgate Server Library
// Description: Public API surface for the gateway server.
// Purpose: Expose the chat service, transports, and collaborator adapters.
// Dependencies: crate::{audit, chat, identity, model, server, telemetry}
// ============================================================================

//! ## Overview
//! The server crate owns everything outside the governance core: identity
//! resolution, the HTTP model client, request orchestration, audit logging,
//! metrics seams, and the axum transport. All governance decisions are
//! delegated to `tollgate-core`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod chat;
pub mod identity;
pub mod model;
pub mod server;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditAlertSink;
pub use audit::AuditSink;
pub use audit::ChatAuditEvent;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::PostureAuditEvent;
pub use audit::StderrAuditSink;
pub use chat::ChatFailure;
pub use chat::ChatService;
pub use chat::ChatSuccess;
pub use chat::RemediationSuccess;
pub use identity::AuthError;
pub use identity::IdentityResolver;
pub use model::HttpModelClient;
pub use server::ServerError;
pub use server::ServerState;
pub use server::serve;
pub use telemetry::GatewayMetrics;
pub use telemetry::NoopMetrics;
