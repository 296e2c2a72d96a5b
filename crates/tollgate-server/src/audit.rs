// crates/tollgate-server/src/audit.rs
// ============================================================================
// Module: Tollgate Audit Logging
// Description: Structured audit events for gateway request handling.
// Purpose: Emit redacted audit logs without hard dependencies.
// Dependencies: tollgate-core, serde
// ============================================================================

//! ## Overview
//! This module defines audit event payloads and sinks for gateway request
//! logging. Events carry enough context to diagnose governance decisions
//! (peer address, subject, failed component, reason, token and cost
//! figures) and never carry message text. Sinks are intentionally lightweight so deployments
//! can route events to their preferred logging pipeline without redesign.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tollgate_core::AlertSink;
use tollgate_core::BudgetAlert;
use tollgate_core::Tier;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Chat request audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Request identifier when provided.
    pub request_id: Option<String>,
    /// Peer address the identity resolved from.
    pub peer_addr: String,
    /// Authenticated subject when present.
    pub subject: Option<String>,
    /// Tier the request was evaluated against.
    pub tier: Tier,
    /// Request outcome label.
    pub outcome: &'static str,
    /// Rejection reason label when rejected.
    pub reject_reason: Option<String>,
    /// Conversation identifier when resolved.
    pub conversation_id: Option<String>,
    /// Estimated tokens used for pre-flight checks.
    pub estimated_tokens: Option<u64>,
    /// Input tokens from the model's usage report.
    pub input_tokens: Option<u64>,
    /// Output tokens from the model's usage report.
    pub output_tokens: Option<u64>,
    /// Actual committed cost in minor units.
    pub cost_minor: Option<u64>,
}

/// Inputs required to construct a chat audit event.
pub struct ChatAuditEventParams {
    /// Request identifier when provided.
    pub request_id: Option<String>,
    /// Peer address the identity resolved from.
    pub peer_addr: String,
    /// Authenticated subject when present.
    pub subject: Option<String>,
    /// Tier the request was evaluated against.
    pub tier: Tier,
    /// Request outcome label.
    pub outcome: &'static str,
    /// Rejection reason label when rejected.
    pub reject_reason: Option<String>,
    /// Conversation identifier when resolved.
    pub conversation_id: Option<String>,
    /// Estimated tokens used for pre-flight checks.
    pub estimated_tokens: Option<u64>,
    /// Input tokens from the model's usage report.
    pub input_tokens: Option<u64>,
    /// Output tokens from the model's usage report.
    pub output_tokens: Option<u64>,
    /// Actual committed cost in minor units.
    pub cost_minor: Option<u64>,
}

impl ChatAuditEvent {
    /// Creates a new chat audit event with a consistent timestamp.
    #[must_use]
    pub fn new(params: ChatAuditEventParams) -> Self {
        Self {
            event: "chat_request",
            timestamp_ms: now_millis(),
            request_id: params.request_id,
            peer_addr: params.peer_addr,
            subject: params.subject,
            tier: params.tier,
            outcome: params.outcome,
            reject_reason: params.reject_reason,
            conversation_id: params.conversation_id,
            estimated_tokens: params.estimated_tokens,
            input_tokens: params.input_tokens,
            output_tokens: params.output_tokens,
            cost_minor: params.cost_minor,
        }
    }
}

/// Remediation audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct RemediationAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Conversation being remediated.
    pub conversation_id: String,
    /// Successor conversation when remediation completed.
    pub new_conversation_id: Option<String>,
    /// Outcome label.
    pub outcome: &'static str,
    /// Rejection reason label when rejected.
    pub reject_reason: Option<String>,
    /// Tokens consumed by the summarization call.
    pub summary_tokens: Option<u64>,
}

impl RemediationAuditEvent {
    /// Creates a new remediation audit event with a consistent timestamp.
    #[must_use]
    pub fn new(
        conversation_id: String,
        new_conversation_id: Option<String>,
        outcome: &'static str,
        reject_reason: Option<String>,
        summary_tokens: Option<u64>,
    ) -> Self {
        Self {
            event: "remediation",
            timestamp_ms: now_millis(),
            conversation_id,
            new_conversation_id,
            outcome,
            reject_reason,
            summary_tokens,
        }
    }
}

/// Budget threshold audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlertAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// UTC day key the alert applies to.
    pub day: String,
    /// Threshold percentage that was crossed.
    pub threshold_pct: u8,
    /// Spend total at the time of the alert, in minor units.
    pub total_spend_minor: u64,
    /// Configured daily cap, in minor units.
    pub cap_minor: u64,
}

impl BudgetAlertAuditEvent {
    /// Creates a new budget alert audit event from a core alert.
    #[must_use]
    pub fn from_alert(alert: &BudgetAlert) -> Self {
        Self {
            event: "budget_alert",
            timestamp_ms: now_millis(),
            day: alert.day.key(),
            threshold_pct: alert.threshold_pct,
            total_spend_minor: alert.total_spend_minor,
            cap_minor: alert.cap_minor,
        }
    }
}

/// Security posture audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct PostureAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Posture event kind.
    pub kind: String,
    /// Optional message.
    pub message: Option<String>,
}

impl PostureAuditEvent {
    /// Creates a new posture audit event with a consistent timestamp.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: Option<String>) -> Self {
        Self {
            event: "security_posture",
            timestamp_ms: now_millis(),
            kind: kind.into(),
            message,
        }
    }
}

/// Returns wall-clock milliseconds since the unix epoch.
fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for gateway events.
pub trait AuditSink: Send + Sync {
    /// Records a chat request event.
    fn record_chat(&self, event: &ChatAuditEvent);

    /// Records a remediation event.
    fn record_remediation(&self, _event: &RemediationAuditEvent) {}

    /// Records a budget threshold event.
    fn record_budget_alert(&self, _event: &BudgetAlertAuditEvent) {}

    /// Records a security posture event.
    fn record_posture(&self, _event: &PostureAuditEvent) {}
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record_chat(&self, event: &ChatAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }

    fn record_remediation(&self, event: &RemediationAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }

    fn record_budget_alert(&self, event: &BudgetAlertAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }

    fn record_posture(&self, event: &PostureAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Writes one serialized event line.
    fn write_line(&self, payload: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

impl AuditSink for FileAuditSink {
    fn record_chat(&self, event: &ChatAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            self.write_line(&payload);
        }
    }

    fn record_remediation(&self, event: &RemediationAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            self.write_line(&payload);
        }
    }

    fn record_budget_alert(&self, event: &BudgetAlertAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            self.write_line(&payload);
        }
    }

    fn record_posture(&self, event: &PostureAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            self.write_line(&payload);
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record_chat(&self, _event: &ChatAuditEvent) {}
}

// ============================================================================
// SECTION: Alert Adapter
// ============================================================================

/// Routes core budget alerts into the audit sink.
pub struct AuditAlertSink {
    /// Underlying audit sink.
    sink: Arc<dyn AuditSink>,
}

impl AuditAlertSink {
    /// Builds an adapter over an audit sink.
    #[must_use]
    pub const fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
        }
    }
}

impl AlertSink for AuditAlertSink {
    fn budget_threshold(&self, alert: &BudgetAlert) {
        self.sink.record_budget_alert(&BudgetAlertAuditEvent::from_alert(alert));
    }
}
