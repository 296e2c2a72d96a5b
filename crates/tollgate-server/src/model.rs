// crates/tollgate-server/src/model.rs
// ============================================================================
// Module: Tollgate Model Client
// Description: HTTP client for the hosted language-model endpoint.
// Purpose: Issue bounded completions with strict transport limits.
// Dependencies: tollgate-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! The HTTP model client posts a bounded prompt to the configured endpoint
//! and reads back text plus a token-usage report. Limits are strict and fail
//! closed: HTTPS unless explicitly allowed, redirects disabled, request
//! timeout, response size cap. A failed call surfaces any usage the endpoint
//! reported before failing so the governance layer can commit exactly that.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde::Serialize;
use tollgate_config::ModelConfig;
use tollgate_core::ModelClient;
use tollgate_core::ModelError;
use tollgate_core::ModelReply;
use tollgate_core::ModelRequest;
use tollgate_core::ModelTurn;
use tollgate_core::TokenUsage;

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Outbound completion request payload.
#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    /// Seed context, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
    /// Prior turns in sequence order.
    history: &'a [ModelTurn],
    /// Current user message.
    message: &'a str,
    /// Output-length ceiling for the call.
    max_output_tokens: u32,
}

/// Token usage block in wire responses.
#[derive(Debug, Deserialize)]
struct WireUsage {
    /// Prompt-side tokens consumed.
    input_tokens: u64,
    /// Completion-side tokens produced.
    output_tokens: u64,
}

/// Successful completion response payload.
#[derive(Debug, Deserialize)]
struct WireReply {
    /// Assistant text.
    text: String,
    /// Usage report.
    usage: WireUsage,
}

/// Failure response payload; usage is present when the endpoint metered the
/// call before failing.
#[derive(Debug, Deserialize)]
struct WireFailure {
    /// Partial usage report, if any.
    #[serde(default)]
    usage: Option<WireUsage>,
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// HTTP client for the hosted model endpoint.
pub struct HttpModelClient {
    /// Endpoint configuration, including limits.
    config: ModelConfig,
    /// HTTP client used for outbound requests.
    client: Client,
}

impl HttpModelClient {
    /// Creates a client from the model endpoint configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the HTTP client cannot be created.
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .build()
            .map_err(|_| ModelError::Failed {
                reason: "model client build failed".to_string(),
                partial_usage: None,
            })?;
        Ok(Self {
            config,
            client,
        })
    }

    /// Reads a response body up to the configured size cap.
    fn read_bounded(&self, response: reqwest::blocking::Response) -> Result<Vec<u8>, ModelError> {
        let cap = self.config.max_response_bytes;
        let mut body = Vec::new();
        let mut limited = response.take(cap as u64 + 1);
        limited.read_to_end(&mut body).map_err(|_| ModelError::Failed {
            reason: "model response read failed".to_string(),
            partial_usage: None,
        })?;
        if body.len() > cap {
            return Err(ModelError::Failed {
                reason: "model response too large".to_string(),
                partial_usage: None,
            });
        }
        Ok(body)
    }
}

impl ModelClient for HttpModelClient {
    fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        if !self.config.allow_http && !self.config.endpoint.starts_with("https://") {
            return Err(ModelError::Failed {
                reason: "cleartext model endpoint without allow_http".to_string(),
                partial_usage: None,
            });
        }
        let payload = WireRequest {
            context: request.context.as_deref(),
            history: &request.history,
            message: &request.message,
            max_output_tokens: request.max_output_tokens,
        };
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&payload)
            .send()
            .map_err(|err| ModelError::Failed {
                reason: format!("model request failed: {err}"),
                partial_usage: None,
            })?;
        let status = response.status();
        let body = self.read_bounded(response)?;
        if !status.is_success() {
            // The endpoint may have metered tokens before failing; that
            // report is the only thing the caller is allowed to commit.
            let partial = serde_json::from_slice::<WireFailure>(&body)
                .ok()
                .and_then(|failure| failure.usage)
                .map(|usage| TokenUsage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                });
            return Err(ModelError::Failed {
                reason: format!("model endpoint returned status {status}"),
                partial_usage: partial,
            });
        }
        let reply: WireReply = serde_json::from_slice(&body).map_err(|_| ModelError::Failed {
            reason: "model response parse failed".to_string(),
            partial_usage: None,
        })?;
        Ok(ModelReply {
            text: reply.text,
            usage: TokenUsage {
                input_tokens: reply.usage.input_tokens,
                output_tokens: reply.usage.output_tokens,
            },
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions."
    )]

    use tollgate_config::ModelConfig;

    use super::HttpModelClient;
    use tollgate_core::ModelClient;
    use tollgate_core::ModelRequest;

    fn config(endpoint: &str, allow_http: bool) -> ModelConfig {
        ModelConfig {
            endpoint: endpoint.to_string(),
            timeout_ms: 1_000,
            max_response_bytes: 1024,
            user_agent: "tollgate-test/0.1".to_string(),
            allow_http,
        }
    }

    #[test]
    fn cleartext_endpoints_are_refused_without_opt_in() {
        let client =
            HttpModelClient::new(config("http://model.internal/complete", false)).expect("client");
        let request = ModelRequest {
            context: None,
            history: Vec::new(),
            message: "hello".to_string(),
            max_output_tokens: 16,
        };
        let err = client.complete(&request).expect_err("must refuse cleartext");
        assert!(err.partial_usage().is_none());
    }
}
