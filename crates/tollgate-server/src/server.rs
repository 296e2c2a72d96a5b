// crates/tollgate-server/src/server.rs
// ============================================================================
// Module: Tollgate HTTP Server
// Description: Axum routes, request bounds, and rejection status mapping.
// Purpose: Expose the chat and remediation endpoints over HTTP.
// Dependencies: tollgate-core, axum, tokio
// ============================================================================

//! ## Overview
//! The HTTP server exposes `POST /v1/chat` and
//! `POST /v1/conversations/{id}/remediate`. Bodies are bounded before
//! parsing and messages are bounded before reaching the governance layer.
//! Policy rejections map to structured deny responses; store and model
//! failures map to generic unavailable responses that never expose internal
//! error detail.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::header::RETRY_AFTER;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tollgate_core::ChatRejection;
use tollgate_core::ConversationId;

use crate::chat::ChatFailure;
use crate::chat::ChatService;
use crate::identity::AuthError;
use crate::identity::IdentityResolver;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Gateway server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared server state for HTTP handlers.
pub struct ServerState {
    /// Chat orchestration service.
    pub service: ChatService,
    /// Identity resolver.
    pub resolver: IdentityResolver,
    /// Maximum allowed request body size.
    pub max_body_bytes: usize,
    /// Maximum allowed message length in characters.
    pub max_message_chars: usize,
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Chat request payload.
#[derive(Debug, Deserialize)]
struct ChatRequestBody {
    /// Existing conversation identifier, when continuing a thread.
    #[serde(default)]
    conversation_id: Option<String>,
    /// User message text.
    message: String,
}

/// Token usage block in responses.
#[derive(Debug, Serialize)]
struct UsageBody {
    /// Prompt-side tokens consumed.
    input_tokens: u64,
    /// Completion-side tokens produced.
    output_tokens: u64,
}

/// Successful chat response payload.
#[derive(Debug, Serialize)]
struct ChatResponseBody {
    /// Conversation the turn was committed to.
    conversation_id: String,
    /// Assistant reply text.
    reply: String,
    /// Token usage report.
    usage: UsageBody,
}

/// Successful remediation response payload.
#[derive(Debug, Serialize)]
struct RemediationResponseBody {
    /// Successor conversation identifier.
    new_conversation_id: String,
    /// Summary text seeding the successor.
    summary: String,
}

/// Structured error response payload.
#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Stable error code.
    error: &'static str,
    /// Human-readable message; never internal detail.
    message: String,
    /// Retry hint in seconds, for rate-limit denials.
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
    /// Tokens already used today, for quota denials.
    #[serde(skip_serializing_if = "Option::is_none")]
    used: Option<u64>,
    /// Daily token limit, for quota denials.
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
    /// Remediation action reference, for conversation-ceiling denials.
    #[serde(skip_serializing_if = "Option::is_none")]
    remediation: Option<String>,
}

impl ErrorBody {
    /// Builds a minimal error body.
    fn new(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            retry_after_secs: None,
            used: None,
            limit: None,
            remediation: None,
        }
    }
}

// ============================================================================
// SECTION: Serving
// ============================================================================

/// Serves the gateway on the configured bind address.
///
/// # Errors
///
/// Returns [`ServerError`] when binding or serving fails.
pub async fn serve(bind: &str, state: Arc<ServerState>) -> Result<(), ServerError> {
    let addr: SocketAddr =
        bind.parse().map_err(|_| ServerError::Config("invalid bind address".to_string()))?;
    let app = Router::new()
        .route("/v1/chat", post(handle_chat))
        .route("/v1/conversations/{id}/remediate", post(handle_remediate))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|_| ServerError::Transport("http bind failed".to_string()))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|_| ServerError::Transport("http server failed".to_string()))
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles `POST /v1/chat`.
async fn handle_chat(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    if bytes.len() > state.max_body_bytes {
        return payload_too_large();
    }
    let Ok(body) = serde_json::from_slice::<ChatRequestBody>(&bytes) else {
        return bad_request("invalid request body");
    };
    if body.message.is_empty() {
        return bad_request("message is empty");
    }
    if body.message.chars().count() > state.max_message_chars {
        return bad_request("message too long");
    }
    let identity = match resolve_identity(&state, peer, &headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    let conversation_id = body.conversation_id.map(ConversationId::new);
    let request_id = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let outcome = dispatch_blocking(move || {
        state.service.handle_chat(
            &identity,
            &body.message,
            conversation_id.as_ref(),
            request_id,
            OffsetDateTime::now_utc(),
        )
    });
    match outcome {
        Ok(success) => (
            StatusCode::OK,
            axum::Json(ChatResponseBody {
                conversation_id: success.conversation_id.as_str().to_string(),
                reply: success.reply,
                usage: UsageBody {
                    input_tokens: success.usage.input_tokens,
                    output_tokens: success.usage.output_tokens,
                },
            }),
        )
            .into_response(),
        Err(failure) => failure_response(failure),
    }
}

/// Handles `POST /v1/conversations/{id}/remediate`.
async fn handle_remediate(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let identity = match resolve_identity(&state, peer, &headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    let conversation_id = ConversationId::new(id);
    let outcome = dispatch_blocking(move || {
        state.service.handle_remediation(&identity, &conversation_id, OffsetDateTime::now_utc())
    });
    match outcome {
        Ok(success) => (
            StatusCode::OK,
            axum::Json(RemediationResponseBody {
                new_conversation_id: success.new_conversation_id.as_str().to_string(),
                summary: success.summary,
            }),
        )
            .into_response(),
        Err(failure) => failure_response(failure),
    }
}

/// Resolves the request identity, mapping auth failures to responses.
fn resolve_identity(
    state: &ServerState,
    peer: SocketAddr,
    headers: &HeaderMap,
) -> Result<tollgate_core::RequestIdentity, Response> {
    let auth_header = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    state.resolver.resolve(peer.ip(), auth_header).map_err(|err| {
        let message = match err {
            AuthError::MalformedHeader => "malformed authorization header",
            AuthError::UnknownToken => "unknown credentials",
        };
        (StatusCode::UNAUTHORIZED, axum::Json(ErrorBody::new("unauthorized", message)))
            .into_response()
    })
}

/// Runs governance work on a blocking thread when one is available.
fn dispatch_blocking<T>(work: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

// ============================================================================
// SECTION: Status Mapping
// ============================================================================

/// Maps a service failure to an HTTP response.
fn failure_response(failure: ChatFailure) -> Response {
    match failure {
        ChatFailure::Rejected(rejection) => rejection_response(rejection),
        ChatFailure::ModelFailed => (
            StatusCode::BAD_GATEWAY,
            axum::Json(ErrorBody::new("upstream_failure", "the assistant is unavailable; try again")),
        )
            .into_response(),
        ChatFailure::Internal => (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(ErrorBody::new("internal", "internal error")),
        )
            .into_response(),
    }
}

/// Maps a governance rejection to its collaborator-facing status and body.
fn rejection_response(rejection: ChatRejection) -> Response {
    match rejection {
        ChatRejection::RateLimited {
            retry_after_secs,
            ..
        } => {
            let mut body = ErrorBody::new("rate_limited", "too many requests; slow down");
            body.retry_after_secs = Some(retry_after_secs);
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, retry_after_secs.to_string())],
                axum::Json(body),
            )
                .into_response()
        }
        ChatRejection::ContentBlocked {
            ..
        } => (
            StatusCode::BAD_REQUEST,
            axum::Json(ErrorBody::new(
                "content_blocked",
                "that message cannot be processed; please rephrase",
            )),
        )
            .into_response(),
        ChatRejection::QuotaExceeded {
            used,
            limit,
        } => {
            let mut body =
                ErrorBody::new("quota_exceeded", "daily token quota exceeded; try again tomorrow");
            body.used = Some(used);
            body.limit = Some(limit);
            (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response()
        }
        ChatRejection::BudgetExhausted => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(ErrorBody::new(
                "budget_exhausted",
                "daily capacity exhausted; try again tomorrow",
            )),
        )
            .into_response(),
        ChatRejection::ConversationLimitReached {
            conversation_id,
        } => {
            let mut body = ErrorBody::new(
                "conversation_limit_reached",
                "this conversation reached its length limit; remediate to continue",
            );
            body.remediation =
                Some(format!("/v1/conversations/{}/remediate", conversation_id.as_str()));
            (StatusCode::CONFLICT, axum::Json(body)).into_response()
        }
        ChatRejection::ConversationArchived {
            ..
        } => (
            StatusCode::CONFLICT,
            axum::Json(ErrorBody::new(
                "conversation_archived",
                "this conversation is archived; start a new one",
            )),
        )
            .into_response(),
        ChatRejection::UnknownConversation {
            ..
        } => (
            StatusCode::NOT_FOUND,
            axum::Json(ErrorBody::new("unknown_conversation", "conversation not found")),
        )
            .into_response(),
        ChatRejection::RemediationNotRequired {
            ..
        } => (
            StatusCode::CONFLICT,
            axum::Json(ErrorBody::new(
                "remediation_not_required",
                "this conversation is still accepting messages",
            )),
        )
            .into_response(),
        ChatRejection::Unavailable {
            ..
        } => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(ErrorBody::new("unavailable", "service unavailable; try later")),
        )
            .into_response(),
    }
}

/// Builds the payload-too-large response.
fn payload_too_large() -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        axum::Json(ErrorBody::new("payload_too_large", "request body too large")),
    )
        .into_response()
}

/// Builds a generic bad-request response.
fn bad_request(message: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, axum::Json(ErrorBody::new("bad_request", message))).into_response()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
