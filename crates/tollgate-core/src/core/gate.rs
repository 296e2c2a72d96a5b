// crates/tollgate-core/src/core/gate.rs
// ============================================================================
// Module: Tollgate Content Gate
// Description: Ordered signature matching for instruction-override attempts.
// Purpose: Cheap pre-flight triage before any budget is consumed.
// Dependencies: regex, serde, thiserror
// ============================================================================

//! ## Overview
//! The content gate pattern-matches raw user text against a fixed, ordered
//! signature list grouped by intent category. The first matching signature
//! wins and supplies the reason tag; no match means pass. The gate is a pure
//! function with no external state and runs before any request is counted
//! against token or spend budgets. It is triage, not the sole defense: false
//! positives only ask the user to rephrase, and false negatives are caught by
//! the hardened operating instructions downstream.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use regex::Regex;
use regex::RegexBuilder;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum compiled pattern length accepted from configuration.
pub const MAX_SIGNATURE_PATTERN_LENGTH: usize = 512;
/// Maximum number of signatures the gate will compile.
pub const MAX_SIGNATURES: usize = 256;
/// Compiled-regex size limit per signature, in bytes.
const SIGNATURE_REGEX_SIZE_LIMIT: usize = 1 << 20;

// ============================================================================
// SECTION: Categories
// ============================================================================

/// Intent category a signature belongs to.
///
/// # Invariants
/// - Variants are stable reason tags for audit logs and client responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureCategory {
    /// Attempts to override or discard the operating instructions.
    InstructionOverride,
    /// Attempts to reassign the assistant's role or persona.
    RoleReassignment,
    /// Attempts to extract the system prompt or hidden instructions.
    PromptExfiltration,
    /// Injection of chat-template delimiters or control tokens.
    DelimiterInjection,
    /// Requests to roleplay outside the assistant's domain.
    NonDomainRoleplay,
    /// Requests to execute code or shell commands.
    CodeExecution,
}

impl SignatureCategory {
    /// Returns the stable reason tag for the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InstructionOverride => "instruction_override",
            Self::RoleReassignment => "role_reassignment",
            Self::PromptExfiltration => "prompt_exfiltration",
            Self::DelimiterInjection => "delimiter_injection",
            Self::NonDomainRoleplay => "non_domain_roleplay",
            Self::CodeExecution => "code_execution",
        }
    }
}

impl fmt::Display for SignatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Signatures
// ============================================================================

/// One signature in source (uncompiled) form.
///
/// # Invariants
/// - `pattern` is a regular expression; case-insensitivity is applied at
///   compile time, not in the pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSignature {
    /// Category supplying the reason tag on match.
    pub category: SignatureCategory,
    /// Regular-expression pattern source.
    pub pattern: String,
}

impl GateSignature {
    /// Builds a signature from a category and pattern source.
    #[must_use]
    pub fn new(category: SignatureCategory, pattern: impl Into<String>) -> Self {
        Self {
            category,
            pattern: pattern.into(),
        }
    }
}

/// Builtin signature set, in evaluation order.
///
/// Ordering is part of the contract: the first matching signature supplies
/// the reason tag, so more specific override signatures precede broader
/// roleplay signatures.
#[must_use]
pub fn builtin_signatures() -> Vec<GateSignature> {
    use SignatureCategory as C;
    vec![
        GateSignature::new(
            C::InstructionOverride,
            r"\bignore\s+(?:all\s+|any\s+)?(?:previous|prior|above|earlier)\s+instructions?\b",
        ),
        GateSignature::new(
            C::InstructionOverride,
            r"\bdisregard\s+(?:all\s+|any\s+)?(?:previous|prior|above|earlier|your)\s+(?:instructions?|rules|guidelines)\b",
        ),
        GateSignature::new(
            C::InstructionOverride,
            r"\bforget\s+(?:all\s+|everything\s+)?(?:your|previous|prior)\s+(?:instructions?|rules|training)\b",
        ),
        GateSignature::new(
            C::InstructionOverride,
            r"\boverride\s+(?:your|the)\s+(?:instructions?|rules|system\s+prompt)\b",
        ),
        GateSignature::new(C::RoleReassignment, r"\byou\s+are\s+now\s+(?:a|an|the)\b"),
        GateSignature::new(C::RoleReassignment, r"\bpretend\s+(?:you\s+are|to\s+be)\b"),
        GateSignature::new(C::RoleReassignment, r"\bfrom\s+now\s+on\s+you\b"),
        GateSignature::new(
            C::PromptExfiltration,
            r"\b(?:reveal|show|print|repeat|display|output)\b.{0,40}\b(?:system\s+prompt|initial\s+prompt|your\s+instructions|hidden\s+instructions)\b",
        ),
        GateSignature::new(
            C::PromptExfiltration,
            r"\bwhat\s+(?:is|are)\s+your\s+(?:system\s+prompt|instructions)\b",
        ),
        GateSignature::new(C::DelimiterInjection, r"<\|im_(?:start|end)\|>"),
        GateSignature::new(C::DelimiterInjection, r"\[/?(?:INST|SYS)\]"),
        GateSignature::new(C::DelimiterInjection, r"<<\s*/?\s*SYS\s*>>"),
        GateSignature::new(C::DelimiterInjection, r"###\s*(?:system|instruction)"),
        GateSignature::new(C::NonDomainRoleplay, r"\broleplay\s+as\b"),
        GateSignature::new(C::NonDomainRoleplay, r"\bjailbreak\b"),
        GateSignature::new(C::NonDomainRoleplay, r"\bdan\s+mode\b"),
        GateSignature::new(C::NonDomainRoleplay, r"\bdeveloper\s+mode\b"),
        GateSignature::new(
            C::CodeExecution,
            r"\b(?:execute|run)\s+(?:this\s+|the\s+following\s+)?(?:code|script|command|shell)\b",
        ),
        GateSignature::new(C::CodeExecution, r"\beval\s*\("),
    ]
}

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// Gate classification result.
///
/// # Invariants
/// - `reason` is `Some` exactly when `blocked` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Whether the message is blocked.
    pub blocked: bool,
    /// Reason tag of the first matching signature.
    pub reason: Option<SignatureCategory>,
}

impl GateDecision {
    /// Returns the pass decision.
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            blocked: false,
            reason: None,
        }
    }

    /// Returns a block decision tagged with a category.
    #[must_use]
    pub const fn block(reason: SignatureCategory) -> Self {
        Self {
            blocked: true,
            reason: Some(reason),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Content gate construction errors.
#[derive(Debug, Error)]
pub enum GateError {
    /// A signature pattern failed validation or compilation.
    #[error("invalid gate signature: {0}")]
    InvalidSignature(String),
    /// The signature list exceeds the configured bound.
    #[error("too many gate signatures: {count} (max {max})")]
    TooManySignatures {
        /// Number of signatures supplied.
        count: usize,
        /// Maximum accepted.
        max: usize,
    },
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// One compiled signature.
#[derive(Debug, Clone)]
struct CompiledSignature {
    /// Category supplying the reason tag on match.
    category: SignatureCategory,
    /// Compiled case-insensitive pattern.
    regex: Regex,
}

/// Pattern-matching content gate.
///
/// # Invariants
/// - Classification is deterministic: the same input always yields the same
///   decision and reason tag.
#[derive(Debug, Clone)]
pub struct ContentGate {
    /// Compiled signatures in evaluation order.
    rules: Vec<CompiledSignature>,
}

impl ContentGate {
    /// Compiles a gate from an ordered signature list.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when a pattern is oversized, fails to compile,
    /// or the list exceeds [`MAX_SIGNATURES`].
    pub fn new(signatures: &[GateSignature]) -> Result<Self, GateError> {
        if signatures.len() > MAX_SIGNATURES {
            return Err(GateError::TooManySignatures {
                count: signatures.len(),
                max: MAX_SIGNATURES,
            });
        }
        let mut rules = Vec::with_capacity(signatures.len());
        for signature in signatures {
            if signature.pattern.len() > MAX_SIGNATURE_PATTERN_LENGTH {
                return Err(GateError::InvalidSignature(format!(
                    "pattern too long ({} bytes)",
                    signature.pattern.len()
                )));
            }
            let regex = RegexBuilder::new(&signature.pattern)
                .case_insensitive(true)
                .size_limit(SIGNATURE_REGEX_SIZE_LIMIT)
                .build()
                .map_err(|err| GateError::InvalidSignature(err.to_string()))?;
            rules.push(CompiledSignature {
                category: signature.category,
                regex,
            });
        }
        Ok(Self {
            rules,
        })
    }

    /// Compiles a gate over the builtin signature set.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when a builtin pattern fails to compile; this
    /// indicates a programming error and is surfaced rather than ignored.
    pub fn with_builtin_rules() -> Result<Self, GateError> {
        Self::new(&builtin_signatures())
    }

    /// Compiles a gate over the builtin set followed by extra signatures.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when any pattern is invalid or the combined list
    /// exceeds [`MAX_SIGNATURES`].
    pub fn with_extra_rules(extras: &[GateSignature]) -> Result<Self, GateError> {
        let mut signatures = builtin_signatures();
        signatures.extend(extras.iter().cloned());
        Self::new(&signatures)
    }

    /// Classifies a message; the first matching signature wins.
    #[must_use]
    pub fn classify(&self, text: &str) -> GateDecision {
        for rule in &self.rules {
            if rule.regex.is_match(text) {
                return GateDecision::block(rule.category);
            }
        }
        GateDecision::pass()
    }

    /// Returns the number of compiled signatures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true when the gate has no signatures.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
