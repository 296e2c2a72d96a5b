// crates/tollgate-core/src/core/mod.rs
// ============================================================================
// Module: Tollgate Core Types
// Description: Canonical identity, counter, gate, cost, and conversation types.
// Purpose: Provide stable, serializable types for the governance layer.
// Dependencies: regex, serde, time
// ============================================================================

//! ## Overview
//! Core types define the vocabulary of the governance layer: request
//! identities and tiers, windowed counter keys, the content gate, the cost
//! estimator, and conversation lifecycle records. These types are the
//! canonical source of truth for any derived API surfaces.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod conversation;
pub mod counter;
pub mod estimate;
pub mod gate;
pub mod identity;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use conversation::ConversationRecord;
pub use conversation::ConversationState;
pub use conversation::ConversationTransitionError;
pub use conversation::TurnRecord;
pub use counter::CounterKey;
pub use counter::CounterSample;
pub use counter::CounterScope;
pub use counter::CounterStore;
pub use counter::CounterStoreError;
pub use counter::InMemoryCounterStore;
pub use estimate::CostModel;
pub use estimate::DEFAULT_AVG_CHARS_PER_TOKEN;
pub use estimate::PriceTable;
pub use estimate::TokenUsage;
pub use gate::ContentGate;
pub use gate::GateDecision;
pub use gate::GateError;
pub use gate::GateSignature;
pub use gate::SignatureCategory;
pub use gate::builtin_signatures;
pub use identity::ConversationId;
pub use identity::RequestIdentity;
pub use identity::SubjectId;
pub use identity::Tier;
pub use identity::TierPolicy;
pub use identity::TierTable;
pub use self::time::DayStamp;
pub use self::time::Window;
