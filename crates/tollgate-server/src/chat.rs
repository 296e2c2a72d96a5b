// crates/tollgate-server/src/chat.rs
// ============================================================================
// Module: Tollgate Chat Service
// Description: Orchestration of admit, model call, and commit per request.
// Purpose: Run the governance pipeline around the model collaborator.
// Dependencies: tollgate-core, crate::{audit, telemetry}
// ============================================================================

//! ## Overview
//! The chat service wires the governance engine to the model collaborator:
//! admit first, then the model call outside any lock, then commit whatever
//! the model actually reported. A failed model call commits only the
//! model-reported partial usage; an aborted call commits nothing and the
//! speculative budget reservation stands (conservatism over generosity).
//! Every outcome emits one audit event and one metric event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use time::OffsetDateTime;
use tollgate_core::ChatRejection;
use tollgate_core::ConversationId;
use tollgate_core::GovernanceEngine;
use tollgate_core::ModelClient;
use tollgate_core::ModelRequest;
use tollgate_core::ModelTurn;
use tollgate_core::RequestIdentity;
use tollgate_core::TokenUsage;

use crate::audit::AuditSink;
use crate::audit::ChatAuditEvent;
use crate::audit::ChatAuditEventParams;
use crate::audit::RemediationAuditEvent;
use crate::telemetry::GatewayEndpoint;
use crate::telemetry::GatewayMetricEvent;
use crate::telemetry::GatewayMetrics;
use crate::telemetry::GatewayOutcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Instruction context for the remediation summarization call.
const SUMMARY_CONTEXT: &str = "You are producing a short continuation summary of a conversation \
                               so it can resume under a new thread. Capture the topics discussed, \
                               decisions reached, and any user preferences. Do not add new \
                               information.";

/// User-side message for the remediation summarization call.
const SUMMARY_MESSAGE: &str = "Summarize the conversation so far in a concise paragraph.";

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Successful chat response.
#[derive(Debug, Clone)]
pub struct ChatSuccess {
    /// Conversation the turn was committed to.
    pub conversation_id: ConversationId,
    /// Assistant reply text.
    pub reply: String,
    /// Token usage reported by the model.
    pub usage: TokenUsage,
}

/// Successful remediation response.
#[derive(Debug, Clone)]
pub struct RemediationSuccess {
    /// Successor conversation seeded with the summary.
    pub new_conversation_id: ConversationId,
    /// Summary text seeding the successor.
    pub summary: String,
}

/// Request failure surfaced to the transport layer.
#[derive(Debug)]
pub enum ChatFailure {
    /// A governance component rejected the request.
    Rejected(ChatRejection),
    /// The model call failed; any partial usage has been committed.
    ModelFailed,
    /// A commit failed after the model call; details are in the audit log.
    Internal,
}

// ============================================================================
// SECTION: Service
// ============================================================================

/// Chat orchestration service.
pub struct ChatService {
    /// Governance engine.
    engine: GovernanceEngine,
    /// Model collaborator.
    model: Arc<dyn ModelClient>,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Metrics sink.
    metrics: Arc<dyn GatewayMetrics>,
}

impl ChatService {
    /// Builds a chat service.
    #[must_use]
    pub fn new(
        engine: GovernanceEngine,
        model: Arc<dyn ModelClient>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn GatewayMetrics>,
    ) -> Self {
        Self {
            engine,
            model,
            audit,
            metrics,
        }
    }

    /// Returns the audit sink for posture events at startup.
    #[must_use]
    pub fn audit_sink(&self) -> Arc<dyn AuditSink> {
        self.audit.clone()
    }

    /// Handles one chat request end to end.
    ///
    /// # Errors
    ///
    /// Returns [`ChatFailure`] for governance rejections, model failures,
    /// and post-call commit failures.
    pub fn handle_chat(
        &self,
        identity: &RequestIdentity,
        message: &str,
        conversation_id: Option<&ConversationId>,
        request_id: Option<String>,
        now: OffsetDateTime,
    ) -> Result<ChatSuccess, ChatFailure> {
        let started = Instant::now();
        let admission = match self.engine.admit_chat(identity, message, conversation_id, now) {
            Ok(admission) => admission,
            Err(rejection) => {
                self.audit_chat_rejection(identity, request_id, &rejection);
                self.finish(GatewayEndpoint::Chat, GatewayOutcome::Rejected,
                    Some(rejection.reason_label()), started);
                return Err(ChatFailure::Rejected(rejection));
            }
        };

        let history = match self.engine.transcript(identity, &admission.conversation.id) {
            Ok(turns) => turns
                .into_iter()
                .map(|turn| ModelTurn {
                    user_text: turn.user_text,
                    assistant_text: turn.assistant_text,
                })
                .collect(),
            Err(rejection) => {
                self.audit_chat_rejection(identity, request_id, &rejection);
                self.finish(GatewayEndpoint::Chat, GatewayOutcome::Rejected,
                    Some(rejection.reason_label()), started);
                return Err(ChatFailure::Rejected(rejection));
            }
        };

        let request = ModelRequest {
            context: admission.conversation.summary_context.clone(),
            history,
            message: message.to_string(),
            max_output_tokens: admission.max_output_tokens,
        };
        // The model call blocks for up to the configured timeout; it runs
        // outside any lock and its result is committed afterward.
        let reply = match self.model.complete(&request) {
            Ok(reply) => reply,
            Err(err) => {
                let partial = err.partial_usage().copied();
                // Best effort: a failed partial-usage commit is still visible
                // in the audit trail below.
                let _ = self.engine.record_model_failure(identity, admission.day, partial.as_ref());
                self.audit.record_chat(&ChatAuditEvent::new(ChatAuditEventParams {
                    request_id,
                    peer_addr: identity.address.clone(),
                    subject: identity.subject.as_ref().map(|s| s.as_str().to_string()),
                    tier: identity.tier,
                    outcome: "model_failed",
                    reject_reason: None,
                    conversation_id: Some(admission.conversation.id.as_str().to_string()),
                    estimated_tokens: Some(admission.estimated_tokens),
                    input_tokens: partial.map(|usage| usage.input_tokens),
                    output_tokens: partial.map(|usage| usage.output_tokens),
                    cost_minor: partial
                        .map(|usage| self.engine.cost_model().actual_cost_minor(&usage)),
                }));
                self.finish(GatewayEndpoint::Chat, GatewayOutcome::ModelFailed, None, started);
                return Err(ChatFailure::ModelFailed);
            }
        };

        match self.engine.commit_chat(identity, &admission, message, &reply.text, &reply.usage) {
            Ok(record) => {
                self.audit.record_chat(&ChatAuditEvent::new(ChatAuditEventParams {
                    request_id,
                    peer_addr: identity.address.clone(),
                    subject: identity.subject.as_ref().map(|s| s.as_str().to_string()),
                    tier: identity.tier,
                    outcome: "ok",
                    reject_reason: None,
                    conversation_id: Some(record.id.as_str().to_string()),
                    estimated_tokens: Some(admission.estimated_tokens),
                    input_tokens: Some(reply.usage.input_tokens),
                    output_tokens: Some(reply.usage.output_tokens),
                    cost_minor: Some(
                        self.engine.cost_model().actual_cost_minor(&reply.usage),
                    ),
                }));
                self.finish(GatewayEndpoint::Chat, GatewayOutcome::Ok, None, started);
                Ok(ChatSuccess {
                    conversation_id: record.id,
                    reply: reply.text,
                    usage: reply.usage,
                })
            }
            Err(err) => {
                self.audit.record_chat(&ChatAuditEvent::new(ChatAuditEventParams {
                    request_id,
                    peer_addr: identity.address.clone(),
                    subject: identity.subject.as_ref().map(|s| s.as_str().to_string()),
                    tier: identity.tier,
                    outcome: "commit_failed",
                    reject_reason: Some(err.to_string()),
                    conversation_id: Some(admission.conversation.id.as_str().to_string()),
                    estimated_tokens: Some(admission.estimated_tokens),
                    input_tokens: Some(reply.usage.input_tokens),
                    output_tokens: Some(reply.usage.output_tokens),
                    cost_minor: None,
                }));
                self.finish(GatewayEndpoint::Chat, GatewayOutcome::Internal, None, started);
                Err(ChatFailure::Internal)
            }
        }
    }

    /// Handles one remediation request end to end.
    ///
    /// # Errors
    ///
    /// Returns [`ChatFailure`] for governance rejections, summarization
    /// failures, and post-call commit failures.
    pub fn handle_remediation(
        &self,
        identity: &RequestIdentity,
        conversation_id: &ConversationId,
        now: OffsetDateTime,
    ) -> Result<RemediationSuccess, ChatFailure> {
        let started = Instant::now();
        let admission = match self.engine.admit_remediation(identity, conversation_id, now) {
            Ok(admission) => admission,
            Err(rejection) => {
                self.audit.record_remediation(&RemediationAuditEvent::new(
                    conversation_id.as_str().to_string(),
                    None,
                    "rejected",
                    Some(audit_reason(&rejection)),
                    None,
                ));
                self.finish(GatewayEndpoint::Remediate, GatewayOutcome::Rejected,
                    Some(rejection.reason_label()), started);
                return Err(ChatFailure::Rejected(rejection));
            }
        };

        let history = admission
            .transcript
            .iter()
            .map(|turn| ModelTurn {
                user_text: turn.user_text.clone(),
                assistant_text: turn.assistant_text.clone(),
            })
            .collect();
        let request = ModelRequest {
            context: Some(SUMMARY_CONTEXT.to_string()),
            history,
            message: SUMMARY_MESSAGE.to_string(),
            max_output_tokens: admission.max_output_tokens,
        };
        let reply = match self.model.complete(&request) {
            Ok(reply) => reply,
            Err(err) => {
                let partial = err.partial_usage().copied();
                let _ = self.engine.record_model_failure(identity, admission.day, partial.as_ref());
                self.audit.record_remediation(&RemediationAuditEvent::new(
                    conversation_id.as_str().to_string(),
                    None,
                    "model_failed",
                    None,
                    partial.map(|usage| usage.total()),
                ));
                self.finish(GatewayEndpoint::Remediate, GatewayOutcome::ModelFailed, None, started);
                return Err(ChatFailure::ModelFailed);
            }
        };

        if self
            .engine
            .commit_remediation_usage(identity, admission.day, &reply.usage)
            .is_err()
        {
            self.audit.record_remediation(&RemediationAuditEvent::new(
                conversation_id.as_str().to_string(),
                None,
                "commit_failed",
                None,
                Some(reply.usage.total()),
            ));
            self.finish(GatewayEndpoint::Remediate, GatewayOutcome::Internal, None, started);
            return Err(ChatFailure::Internal);
        }

        match self.engine.finish_remediation(identity, conversation_id, &reply.text, now) {
            Ok(successor) => {
                self.audit.record_remediation(&RemediationAuditEvent::new(
                    conversation_id.as_str().to_string(),
                    Some(successor.id.as_str().to_string()),
                    "ok",
                    None,
                    Some(reply.usage.total()),
                ));
                self.finish(GatewayEndpoint::Remediate, GatewayOutcome::Ok, None, started);
                Ok(RemediationSuccess {
                    new_conversation_id: successor.id,
                    summary: successor.summary_context.unwrap_or_else(|| reply.text.clone()),
                })
            }
            Err(err) => {
                self.audit.record_remediation(&RemediationAuditEvent::new(
                    conversation_id.as_str().to_string(),
                    None,
                    "finish_failed",
                    Some(err.to_string()),
                    Some(reply.usage.total()),
                ));
                self.finish(GatewayEndpoint::Remediate, GatewayOutcome::ModelFailed, None, started);
                Err(ChatFailure::ModelFailed)
            }
        }
    }

    /// Emits the rejection audit event for a chat request.
    fn audit_chat_rejection(
        &self,
        identity: &RequestIdentity,
        request_id: Option<String>,
        rejection: &ChatRejection,
    ) {
        self.audit.record_chat(&ChatAuditEvent::new(ChatAuditEventParams {
            request_id,
            peer_addr: identity.address.clone(),
            subject: identity.subject.as_ref().map(|s| s.as_str().to_string()),
            tier: identity.tier,
            outcome: "rejected",
            reject_reason: Some(audit_reason(rejection)),
            conversation_id: None,
            estimated_tokens: None,
            input_tokens: None,
            output_tokens: None,
            cost_minor: None,
        }));
    }

    /// Emits the metric pair for a finished request.
    fn finish(
        &self,
        endpoint: GatewayEndpoint,
        outcome: GatewayOutcome,
        reject_reason: Option<&'static str>,
        started: Instant,
    ) {
        let event = GatewayMetricEvent {
            endpoint,
            outcome,
            reject_reason,
        };
        self.metrics.record_request(event.clone());
        self.metrics.record_latency(event, started.elapsed());
    }
}

/// Returns the audit reason label, carrying the failed component for
/// fail-closed rejections.
fn audit_reason(rejection: &ChatRejection) -> String {
    match rejection {
        ChatRejection::Unavailable {
            component,
        } => format!("unavailable:{component}"),
        other => other.reason_label().to_string(),
    }
}
