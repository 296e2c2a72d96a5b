// crates/tollgate-store-sqlite/src/lib.rs
// ============================================================================
// Module: Tollgate SQLite Store Library
// Description: Public API surface for the durable governance stores.
// Purpose: Expose the SQLite-backed store implementation.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! SQLite-backed implementations of the governance store seams. Every
//! check-and-increment is a single SQL statement, so the stores stay correct
//! when multiple gateway instances share one database file.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteGovernanceStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
