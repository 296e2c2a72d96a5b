// crates/tollgate-core/src/core/estimate.rs
// ============================================================================
// Module: Tollgate Cost Estimator
// Description: Token approximation and integer minor-unit pricing.
// Purpose: Provide the single estimate used by quota and ledger call sites.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The estimator is a pure function over message size and the tier's output
//! ceiling. The same [`CostModel`] instance feeds both the pre-flight token
//! quota check and the budget-ledger reservation, so both are computed on a
//! consistent basis. Only the model's post-call usage report is ever
//! persisted as ground truth; estimates exist to gate, not to bill.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default average characters per token for input approximation.
pub const DEFAULT_AVG_CHARS_PER_TOKEN: u32 = 4;

// ============================================================================
// SECTION: Usage Reports
// ============================================================================

/// Token usage reported by a completed model call.
///
/// # Invariants
/// - Values come from the model's usage report, never from estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt-side tokens consumed.
    pub input_tokens: u64,
    /// Completion-side tokens produced.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Returns the combined token count.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

// ============================================================================
// SECTION: Pricing
// ============================================================================

/// Unit prices in minor currency units per million tokens.
///
/// # Invariants
/// - Prices are integers; all arithmetic rounds up so estimates never
///   undercount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTable {
    /// Price per million input tokens, in minor units.
    pub input_minor_per_million: u64,
    /// Price per million output tokens, in minor units.
    pub output_minor_per_million: u64,
    /// Average characters per token used for input approximation.
    pub avg_chars_per_token: u32,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            input_minor_per_million: 300,
            output_minor_per_million: 1_500,
            avg_chars_per_token: DEFAULT_AVG_CHARS_PER_TOKEN,
        }
    }
}

// ============================================================================
// SECTION: Cost Model
// ============================================================================

/// Pure cost model shared by every governance call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostModel {
    /// Unit prices applied by this model.
    prices: PriceTable,
}

impl CostModel {
    /// Builds a cost model from a price table.
    #[must_use]
    pub const fn new(prices: PriceTable) -> Self {
        Self {
            prices,
        }
    }

    /// Approximates input tokens from a character count, rounding up.
    #[must_use]
    pub const fn estimate_input_tokens(&self, chars: u64) -> u64 {
        let divisor = if self.prices.avg_chars_per_token == 0 {
            DEFAULT_AVG_CHARS_PER_TOKEN as u64
        } else {
            self.prices.avg_chars_per_token as u64
        };
        chars.div_ceil(divisor)
    }

    /// Estimates total tokens for a request: approximated input plus the
    /// tier's full output ceiling.
    #[must_use]
    pub const fn estimate_request_tokens(&self, message_chars: u64, max_output_tokens: u32) -> u64 {
        self.estimate_input_tokens(message_chars).saturating_add(max_output_tokens as u64)
    }

    /// Converts a token split into a minor-unit cost, rounding up per side.
    #[must_use]
    pub fn cost_minor(&self, input_tokens: u64, output_tokens: u64) -> u64 {
        let input = per_million(input_tokens, self.prices.input_minor_per_million);
        let output = per_million(output_tokens, self.prices.output_minor_per_million);
        input.saturating_add(output)
    }

    /// Estimates the minor-unit cost of a request before the model call.
    #[must_use]
    pub fn estimate_cost_minor(&self, message_chars: u64, max_output_tokens: u32) -> u64 {
        self.cost_minor(
            self.estimate_input_tokens(message_chars),
            u64::from(max_output_tokens),
        )
    }

    /// Converts a model usage report into the actual minor-unit cost.
    #[must_use]
    pub fn actual_cost_minor(&self, usage: &TokenUsage) -> u64 {
        self.cost_minor(usage.input_tokens, usage.output_tokens)
    }
}

/// Applies a per-million-token price to a token count, rounding up.
fn per_million(tokens: u64, minor_per_million: u64) -> u64 {
    let product = u128::from(tokens) * u128::from(minor_per_million);
    let minor = product.div_ceil(1_000_000);
    u64::try_from(minor).unwrap_or(u64::MAX)
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

    use proptest::prelude::proptest;

    use super::CostModel;
    use super::PriceTable;
    use super::TokenUsage;

    fn model() -> CostModel {
        CostModel::new(PriceTable {
            input_minor_per_million: 300,
            output_minor_per_million: 1_500,
            avg_chars_per_token: 4,
        })
    }

    #[test]
    fn input_tokens_round_up() {
        let model = model();
        assert_eq!(model.estimate_input_tokens(0), 0);
        assert_eq!(model.estimate_input_tokens(1), 1);
        assert_eq!(model.estimate_input_tokens(4), 1);
        assert_eq!(model.estimate_input_tokens(5), 2);
    }

    #[test]
    fn request_estimate_includes_full_output_ceiling() {
        let model = model();
        assert_eq!(model.estimate_request_tokens(400, 1_000), 100 + 1_000);
    }

    #[test]
    fn cost_rounds_up_per_side() {
        let model = model();
        // 1 input token at 300 minor units per million rounds up to 1.
        assert_eq!(model.cost_minor(1, 0), 1);
        assert_eq!(model.cost_minor(0, 1), 1);
        assert_eq!(model.cost_minor(1_000_000, 1_000_000), 300 + 1_500);
    }

    #[test]
    fn actual_cost_uses_reported_usage() {
        let model = model();
        let usage = TokenUsage {
            input_tokens: 2_000_000,
            output_tokens: 0,
        };
        assert_eq!(model.actual_cost_minor(&usage), 600);
    }

    proptest! {
        #[test]
        fn estimate_is_monotone_in_message_size(chars in 0_u64..100_000, extra in 0_u64..1_000) {
            let model = model();
            let base = model.estimate_request_tokens(chars, 256);
            let bigger = model.estimate_request_tokens(chars + extra, 256);
            assert!(bigger >= base);
        }

        #[test]
        fn cost_never_undercounts_tokens(input in 0_u64..10_000_000, output in 0_u64..10_000_000) {
            let model = model();
            let cost = model.cost_minor(input, output);
            let exact_floor =
                (u128::from(input) * 300 + u128::from(output) * 1_500) / 1_000_000;
            assert!(u128::from(cost) >= exact_floor);
        }
    }
}
