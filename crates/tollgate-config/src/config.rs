// crates/tollgate-config/src/config.rs
// ============================================================================
// Module: Tollgate Configuration
// Description: Configuration loading and validation for the gateway.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: tollgate-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and content
//! limits. Every section validates fail-closed: zero caps, empty tier
//! tables, or malformed thresholds refuse to load rather than degrade to a
//! permissive posture. The tier table is data, not code; adding a tier is
//! a configuration change.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use tollgate_core::BudgetPolicy;
use tollgate_core::GateSignature;
use tollgate_core::GovernancePolicy;
use tollgate_core::PriceTable;
use tollgate_core::SignatureCategory;
use tollgate_core::Tier;
use tollgate_core::TierPolicy;
use tollgate_core::TierTable;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "tollgate.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "TOLLGATE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum number of auth token entries.
pub(crate) const MAX_AUTH_TOKENS: usize = 1_024;
/// Maximum length of a single auth token.
pub(crate) const MAX_AUTH_TOKEN_LENGTH: usize = 256;
/// Maximum number of extra gate signatures.
pub(crate) const MAX_EXTRA_SIGNATURES: usize = 128;
/// Maximum request body size accepted by the server.
pub(crate) const MAX_BODY_BYTES_CEILING: usize = 10 * 1024 * 1024;
/// Default maximum request body size in bytes.
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;
/// Default maximum message length in characters.
const DEFAULT_MAX_MESSAGE_CHARS: usize = 8_000;
/// Default model request timeout in milliseconds.
const DEFAULT_MODEL_TIMEOUT_MS: u64 = 30_000;
/// Default maximum model response size in bytes.
const DEFAULT_MODEL_MAX_RESPONSE_BYTES: usize = 1024 * 1024;
/// Default model user agent.
const DEFAULT_MODEL_USER_AGENT: &str = "tollgate/0.1";
/// Default SQLite busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default conversation token ceiling.
const DEFAULT_CONVERSATION_TOKEN_CEILING: u64 = 150_000;
/// Default summarization output ceiling in tokens.
const DEFAULT_SUMMARY_MAX_OUTPUT_TOKENS: u32 = 512;
/// Default budget alert thresholds (percent of cap).
const DEFAULT_ALERT_THRESHOLDS_PCT: [u8; 3] = [50, 75, 90];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// The config file could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// The config file exceeds the size limit.
    #[error("config file too large: {0} bytes")]
    TooLarge(usize),
    /// A config value failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Server Section
// ============================================================================

/// One bearer token mapped to a subject and tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthTokenConfig {
    /// Bearer token value presented by the client.
    pub token: String,
    /// Subject the token authenticates.
    pub subject: String,
    /// Tier granted to the subject.
    pub tier: Tier,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address, e.g. `127.0.0.1:8080`.
    pub bind: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Maximum message length in characters, enforced before governance.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Bearer token table; empty means anonymous-only access.
    #[serde(default)]
    pub auth_tokens: Vec<AuthTokenConfig>,
}

impl ServerConfig {
    /// Validates server settings.
    fn validate(&self) -> Result<(), ConfigError> {
        self.bind
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Invalid(format!("invalid bind address: {}", self.bind)))?;
        if self.max_body_bytes == 0 || self.max_body_bytes > MAX_BODY_BYTES_CEILING {
            return Err(ConfigError::Invalid("max_body_bytes out of range".to_string()));
        }
        if self.max_message_chars == 0 {
            return Err(ConfigError::Invalid(
                "max_message_chars must be greater than zero".to_string(),
            ));
        }
        if self.auth_tokens.len() > MAX_AUTH_TOKENS {
            return Err(ConfigError::Invalid("too many auth tokens".to_string()));
        }
        let mut seen = BTreeSet::new();
        for entry in &self.auth_tokens {
            if entry.token.is_empty() || entry.token.len() > MAX_AUTH_TOKEN_LENGTH {
                return Err(ConfigError::Invalid("auth token length out of range".to_string()));
            }
            if entry.subject.is_empty() {
                return Err(ConfigError::Invalid("auth token subject is empty".to_string()));
            }
            if entry.tier == Tier::Anonymous {
                return Err(ConfigError::Invalid(
                    "auth tokens cannot grant the anonymous tier".to_string(),
                ));
            }
            if !seen.insert(entry.token.as_str()) {
                return Err(ConfigError::Invalid("duplicate auth token".to_string()));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Model Section
// ============================================================================

/// Hosted model endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Endpoint URL for completions.
    pub endpoint: String,
    /// Request timeout in milliseconds.
    #[serde(default = "default_model_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum response size in bytes.
    #[serde(default = "default_model_max_response_bytes")]
    pub max_response_bytes: usize,
    /// User agent for outbound requests.
    #[serde(default = "default_model_user_agent")]
    pub user_agent: String,
    /// Allow cleartext HTTP endpoints (disabled by default).
    #[serde(default)]
    pub allow_http: bool,
}

impl ModelConfig {
    /// Validates model endpoint settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::Invalid("model endpoint is empty".to_string()));
        }
        let https = self.endpoint.starts_with("https://");
        let http = self.endpoint.starts_with("http://");
        if !https && !http {
            return Err(ConfigError::Invalid("model endpoint must be http(s)".to_string()));
        }
        if http && !self.allow_http {
            return Err(ConfigError::Invalid(
                "cleartext model endpoint requires allow_http".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("model timeout_ms must be greater than zero".to_string()));
        }
        if self.max_response_bytes == 0 {
            return Err(ConfigError::Invalid(
                "model max_response_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Store Section
// ============================================================================

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// In-memory stores; single-process only.
    Memory,
    /// SQLite-backed durable stores.
    Sqlite,
}

/// Governance store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store backend.
    pub kind: StoreKind,
    /// Database path; required for the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    /// Validates store settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == StoreKind::Sqlite && self.path.is_none() {
            return Err(ConfigError::Invalid("sqlite store requires path".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Pricing Section
// ============================================================================

/// Token pricing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Price per million input tokens, in minor units.
    pub input_minor_per_million: u64,
    /// Price per million output tokens, in minor units.
    pub output_minor_per_million: u64,
    /// Average characters per token for input approximation.
    #[serde(default = "default_avg_chars_per_token")]
    pub avg_chars_per_token: u32,
}

impl PricingConfig {
    /// Validates pricing settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.input_minor_per_million == 0 && self.output_minor_per_million == 0 {
            return Err(ConfigError::Invalid("pricing is entirely zero".to_string()));
        }
        if self.avg_chars_per_token == 0 {
            return Err(ConfigError::Invalid(
                "avg_chars_per_token must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Converts the section into the core price table.
    #[must_use]
    pub const fn price_table(&self) -> PriceTable {
        PriceTable {
            input_minor_per_million: self.input_minor_per_million,
            output_minor_per_million: self.output_minor_per_million,
            avg_chars_per_token: self.avg_chars_per_token,
        }
    }
}

// ============================================================================
// SECTION: Budget Section
// ============================================================================

/// Daily budget configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    /// Daily spend cap in minor currency units.
    pub daily_cap_minor: u64,
    /// Alert thresholds as percentages of the cap, strictly increasing.
    #[serde(default = "default_alert_thresholds")]
    pub alert_thresholds_pct: Vec<u8>,
}

impl BudgetConfig {
    /// Validates budget settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.daily_cap_minor == 0 {
            return Err(ConfigError::Invalid("daily_cap_minor must be greater than zero".to_string()));
        }
        let mut previous = 0_u8;
        for pct in &self.alert_thresholds_pct {
            if *pct == 0 || *pct > 100 {
                return Err(ConfigError::Invalid(
                    "alert thresholds must be within (0, 100]".to_string(),
                ));
            }
            if *pct <= previous {
                return Err(ConfigError::Invalid(
                    "alert thresholds must be strictly increasing".to_string(),
                ));
            }
            previous = *pct;
        }
        Ok(())
    }

    /// Converts the section into the core budget policy.
    #[must_use]
    pub fn budget_policy(&self) -> BudgetPolicy {
        BudgetPolicy {
            daily_cap_minor: self.daily_cap_minor,
            alert_thresholds_pct: self.alert_thresholds_pct.clone(),
        }
    }
}

// ============================================================================
// SECTION: Conversation Section
// ============================================================================

/// Conversation governance configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationConfig {
    /// Hard token ceiling per conversation.
    #[serde(default = "default_conversation_token_ceiling")]
    pub token_ceiling: u64,
    /// Output ceiling for the remediation summarization call.
    #[serde(default = "default_summary_max_output_tokens")]
    pub summary_max_output_tokens: u32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            token_ceiling: DEFAULT_CONVERSATION_TOKEN_CEILING,
            summary_max_output_tokens: DEFAULT_SUMMARY_MAX_OUTPUT_TOKENS,
        }
    }
}

impl ConversationConfig {
    /// Validates conversation settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.token_ceiling == 0 {
            return Err(ConfigError::Invalid("token_ceiling must be greater than zero".to_string()));
        }
        if self.summary_max_output_tokens == 0 {
            return Err(ConfigError::Invalid(
                "summary_max_output_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Gate Section
// ============================================================================

/// One extra gate signature from configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateSignatureConfig {
    /// Category supplying the reason tag on match.
    pub category: SignatureCategory,
    /// Regular-expression pattern source.
    pub pattern: String,
}

/// Content gate configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// Extra signatures appended after the builtin set.
    #[serde(default)]
    pub extra_signatures: Vec<GateSignatureConfig>,
}

impl GateConfig {
    /// Validates gate settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.extra_signatures.len() > MAX_EXTRA_SIGNATURES {
            return Err(ConfigError::Invalid("too many extra gate signatures".to_string()));
        }
        for signature in &self.extra_signatures {
            if signature.pattern.is_empty() {
                return Err(ConfigError::Invalid("gate signature pattern is empty".to_string()));
            }
        }
        Ok(())
    }

    /// Converts extras into core gate signatures.
    #[must_use]
    pub fn extra_rules(&self) -> Vec<GateSignature> {
        self.extra_signatures
            .iter()
            .map(|signature| GateSignature::new(signature.category, signature.pattern.clone()))
            .collect()
    }
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TollgateConfig {
    /// HTTP server section.
    pub server: ServerConfig,
    /// Model endpoint section.
    pub model: ModelConfig,
    /// Store backend section.
    pub store: StoreConfig,
    /// Pricing section.
    pub pricing: PricingConfig,
    /// Budget section.
    pub budget: BudgetConfig,
    /// Conversation governance section.
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// Content gate section.
    #[serde(default)]
    pub gate: GateConfig,
    /// Per-tier limits, keyed by tier name.
    pub tiers: BTreeMap<Tier, TierPolicy>,
}

impl TollgateConfig {
    /// Loads configuration from an explicit path, the `TOLLGATE_CONFIG`
    /// environment variable, or the default filename, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is missing, oversized,
    /// unparsable, or fails validation.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit_path {
            Some(path) => path.to_path_buf(),
            None => env::var(CONFIG_ENV_VAR)
                .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME), PathBuf::from),
        };
        let metadata = fs::metadata(&path).map_err(|err| ConfigError::Io(err.to_string()))?;
        let size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if size > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge(size));
        }
        let contents = fs::read_to_string(&path).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_toml(&contents)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the whole configuration, fail closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.model.validate()?;
        self.store.validate()?;
        self.pricing.validate()?;
        self.budget.validate()?;
        self.conversation.validate()?;
        self.gate.validate()?;
        self.validate_tiers()
    }

    /// Validates the tier table: every tier present, every limit positive.
    fn validate_tiers(&self) -> Result<(), ConfigError> {
        for tier in [Tier::Anonymous, Tier::Standard, Tier::Elevated] {
            let Some(policy) = self.tiers.get(&tier) else {
                return Err(ConfigError::Invalid(format!("missing tier entry: {tier}")));
            };
            if policy.requests_per_minute == 0
                || policy.requests_per_hour == 0
                || policy.requests_per_day == 0
            {
                return Err(ConfigError::Invalid(format!(
                    "tier {tier} has a zero request limit"
                )));
            }
            if policy.max_output_tokens == 0 {
                return Err(ConfigError::Invalid(format!(
                    "tier {tier} has a zero output ceiling"
                )));
            }
            if tier != Tier::Anonymous && policy.daily_token_limit == 0 {
                return Err(ConfigError::Invalid(format!(
                    "tier {tier} has a zero daily token limit"
                )));
            }
        }
        Ok(())
    }

    /// Assembles the core governance policy from the validated sections.
    #[must_use]
    pub fn governance_policy(&self) -> GovernancePolicy {
        GovernancePolicy {
            tiers: TierTable::new(self.tiers.clone()),
            budget: self.budget.budget_policy(),
            conversation_token_ceiling: self.conversation.token_ceiling,
            summary_max_output_tokens: self.conversation.summary_max_output_tokens,
        }
    }
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default maximum request body size.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Default maximum message length in characters.
const fn default_max_message_chars() -> usize {
    DEFAULT_MAX_MESSAGE_CHARS
}

/// Default model request timeout.
const fn default_model_timeout_ms() -> u64 {
    DEFAULT_MODEL_TIMEOUT_MS
}

/// Default maximum model response size.
const fn default_model_max_response_bytes() -> usize {
    DEFAULT_MODEL_MAX_RESPONSE_BYTES
}

/// Default model user agent string.
fn default_model_user_agent() -> String {
    DEFAULT_MODEL_USER_AGENT.to_string()
}

/// Default SQLite busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Default average characters per token.
const fn default_avg_chars_per_token() -> u32 {
    tollgate_core::DEFAULT_AVG_CHARS_PER_TOKEN
}

/// Default budget alert thresholds.
fn default_alert_thresholds() -> Vec<u8> {
    DEFAULT_ALERT_THRESHOLDS_PCT.to_vec()
}

/// Default conversation token ceiling.
const fn default_conversation_token_ceiling() -> u64 {
    DEFAULT_CONVERSATION_TOKEN_CEILING
}

/// Default summarization output ceiling.
const fn default_summary_max_output_tokens() -> u32 {
    DEFAULT_SUMMARY_MAX_OUTPUT_TOKENS
}
