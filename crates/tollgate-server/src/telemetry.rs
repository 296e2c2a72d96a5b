// crates/tollgate-server/src/telemetry.rs
// ============================================================================
// Module: Tollgate Telemetry
// Description: Observability hooks for gateway request handling.
// Purpose: Provide metric events and latency buckets without hard deps.
// Dependencies: tollgate-core
// ============================================================================

//! ## Overview
//! This module exposes a thin metrics interface for request counters and
//! latency histograms. It is intentionally dependency-light so deployments
//! can plug in Prometheus or OpenTelemetry without redesign. Labels carry
//! decision outcomes only, never message content.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default latency buckets in milliseconds for request histograms.
pub const REQUEST_LATENCY_BUCKETS_MS: &[u64] =
    &[1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000];

// ============================================================================
// SECTION: Metric Labels
// ============================================================================

/// Gateway endpoint classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum GatewayEndpoint {
    /// Chat completion endpoint.
    Chat,
    /// Conversation remediation endpoint.
    Remediate,
}

impl GatewayEndpoint {
    /// Returns a stable label for the endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Remediate => "remediate",
        }
    }
}

/// Gateway request outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum GatewayOutcome {
    /// Request succeeded.
    Ok,
    /// Request was rejected by a governance component.
    Rejected,
    /// The model call failed.
    ModelFailed,
    /// An internal commit failed after the model call.
    Internal,
}

impl GatewayOutcome {
    /// Returns a stable label for the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Rejected => "rejected",
            Self::ModelFailed => "model_failed",
            Self::Internal => "internal",
        }
    }
}

/// Gateway request metric event payload.
#[derive(Debug, Clone)]
pub struct GatewayMetricEvent {
    /// Endpoint handling the request.
    pub endpoint: GatewayEndpoint,
    /// Request outcome.
    pub outcome: GatewayOutcome,
    /// Rejection reason label when rejected.
    pub reject_reason: Option<&'static str>,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Metrics sink for gateway requests and latencies.
pub trait GatewayMetrics: Send + Sync {
    /// Records a request counter event.
    fn record_request(&self, event: GatewayMetricEvent);
    /// Records a latency observation for the request.
    fn record_latency(&self, event: GatewayMetricEvent, latency: Duration);
}

/// No-op metrics sink.
///
/// # Invariants
/// - Metrics are intentionally discarded.
pub struct NoopMetrics;

impl GatewayMetrics for NoopMetrics {
    fn record_request(&self, _event: GatewayMetricEvent) {}

    fn record_latency(&self, _event: GatewayMetricEvent, _latency: Duration) {}
}
