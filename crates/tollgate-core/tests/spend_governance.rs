// crates/tollgate-core/tests/spend_governance.rs
// ============================================================================
// Module: Spend Governance Tests
// Description: Ledger cap, threshold alerting, and quota properties.
// Purpose: Verify the spend invariants the budget owner relies on.
// Dependencies: tollgate-core
// ============================================================================

//! ## Overview
//! Exercises the budget ledger and token quota through the public surface:
//! the cap-plus-one-estimate bound, once-per-day threshold alerts, day-based
//! breaker recovery, and the concrete quota denial scenario.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions."
)]

use std::sync::Arc;
use std::sync::Mutex;

use tollgate_core::AlertSink;
use tollgate_core::BudgetAlert;
use tollgate_core::BudgetDecision;
use tollgate_core::BudgetLedger;
use tollgate_core::BudgetPolicy;
use tollgate_core::DayStamp;
use tollgate_core::InMemoryLedgerStore;
use tollgate_core::InMemoryUsageStore;
use tollgate_core::LedgerStore;
use tollgate_core::QuotaDecision;
use tollgate_core::SubjectId;
use tollgate_core::TokenQuota;

struct RecordingAlerts {
    fired: Mutex<Vec<(u8, u64)>>,
}

impl AlertSink for RecordingAlerts {
    fn budget_threshold(&self, alert: &BudgetAlert) {
        if let Ok(mut fired) = self.fired.lock() {
            fired.push((alert.threshold_pct, alert.total_spend_minor));
        }
    }
}

fn day() -> DayStamp {
    DayStamp {
        year: 2026,
        month: 8,
        day: 7,
    }
}

#[test]
fn ledger_total_never_exceeds_cap_plus_one_estimate() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let ledger = BudgetLedger::new(
        store.clone(),
        Arc::new(tollgate_core::NoopAlertSink),
        BudgetPolicy {
            daily_cap_minor: 10_000,
            alert_thresholds_pct: vec![50, 75, 90],
        },
    );
    let estimate = 777_u64;
    loop {
        match ledger.check_and_reserve(day(), estimate).expect("store") {
            BudgetDecision::Allowed {
                total_after,
            } => assert!(total_after <= 10_000),
            BudgetDecision::Exhausted {
                ..
            } => break,
        }
    }
    let entry = store.entry(day()).expect("entry");
    assert!(entry.total_spend_minor <= 10_000 + estimate);
}

#[test]
fn thresholds_fire_once_each_in_ascending_order() {
    let alerts = Arc::new(RecordingAlerts {
        fired: Mutex::new(Vec::new()),
    });
    let ledger = BudgetLedger::new(
        Arc::new(InMemoryLedgerStore::new()),
        alerts.clone(),
        BudgetPolicy {
            daily_cap_minor: 1_000,
            alert_thresholds_pct: vec![50, 75, 90],
        },
    );
    // Spend creeps up through commits; each threshold fires exactly once.
    for _ in 0..10 {
        ledger.commit(day(), 100, 1_000, None).expect("commit");
    }
    let fired: Vec<u8> =
        alerts.fired.lock().expect("lock").iter().map(|(pct, _)| *pct).collect();
    assert_eq!(fired, vec![50, 75, 90]);
}

#[test]
fn breaker_recovery_is_day_based_only() {
    let ledger = BudgetLedger::new(
        Arc::new(InMemoryLedgerStore::new()),
        Arc::new(tollgate_core::NoopAlertSink),
        BudgetPolicy {
            daily_cap_minor: 100,
            alert_thresholds_pct: vec![],
        },
    );
    match ledger.check_and_reserve(day(), 100).expect("store") {
        BudgetDecision::Allowed {
            ..
        } => {}
        BudgetDecision::Exhausted {
            ..
        } => panic!("first reservation fits exactly"),
    }
    // Same day: denied regardless of how many times the caller retries.
    for _ in 0..3 {
        match ledger.check_and_reserve(day(), 1).expect("store") {
            BudgetDecision::Exhausted {
                ..
            } => {}
            BudgetDecision::Allowed {
                ..
            } => panic!("breaker must stay open"),
        }
    }
    // Next day: the fresh row admits again.
    let tomorrow = DayStamp {
        year: 2026,
        month: 8,
        day: 8,
    };
    match ledger.check_and_reserve(tomorrow, 100).expect("store") {
        BudgetDecision::Allowed {
            ..
        } => {}
        BudgetDecision::Exhausted {
            ..
        } => panic!("day rollover must close the breaker"),
    }
}

#[test]
fn quota_denial_reports_used_and_limit() {
    let quota = TokenQuota::new(Arc::new(InMemoryUsageStore::new()));
    let subject = SubjectId::new("alice");
    quota.commit(&subject, day(), 96_000).expect("commit");
    match quota.reserve(&subject, 100_000, 5_000, day()).expect("store") {
        QuotaDecision::Denied(denial) => {
            assert_eq!(denial.used, 96_000);
            assert_eq!(denial.limit, 100_000);
        }
        QuotaDecision::Allowed => panic!("5,000 over 96,000/100,000 must deny"),
    }
}
