// crates/tollgate-config/tests/load_validation.rs
// ============================================================================
// Module: Config Load Validation Tests
// Description: Fail-closed parsing and validation behavior.
// Purpose: Verify that malformed configuration refuses to load.
// Dependencies: tollgate-config
// ============================================================================

//! ## Overview
//! Exercises the strict TOML loader: a complete config parses and converts
//! into the core policy; every relaxed or malformed variant is rejected.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions."
)]

use tollgate_config::TollgateConfig;
use tollgate_core::Tier;

fn base_toml() -> String {
    r#"
[server]
bind = "127.0.0.1:8080"

[[server.auth_tokens]]
token = "tok-alice"
subject = "alice"
tier = "standard"

[model]
endpoint = "https://model.internal/v1/complete"

[store]
kind = "memory"

[pricing]
input_minor_per_million = 300
output_minor_per_million = 1500

[budget]
daily_cap_minor = 500000

[tiers.anonymous]
requests_per_minute = 3
requests_per_hour = 20
requests_per_day = 50
daily_token_limit = 0
max_output_tokens = 256

[tiers.standard]
requests_per_minute = 10
requests_per_hour = 200
requests_per_day = 2000
daily_token_limit = 100000
max_output_tokens = 1024

[tiers.elevated]
requests_per_minute = 30
requests_per_hour = 600
requests_per_day = 6000
daily_token_limit = 500000
max_output_tokens = 4096
"#
    .to_string()
}

#[test]
fn complete_config_loads_and_builds_policy() {
    let config = TollgateConfig::from_toml(&base_toml()).expect("config loads");
    let policy = config.governance_policy();
    assert_eq!(policy.budget.daily_cap_minor, 500_000);
    assert_eq!(policy.budget.alert_thresholds_pct, vec![50, 75, 90]);
    assert_eq!(policy.conversation_token_ceiling, 150_000);
    let standard = policy.tiers.policy_for(Tier::Standard).expect("standard tier");
    assert_eq!(standard.daily_token_limit, 100_000);
}

#[test]
fn missing_tier_entry_is_rejected() {
    let toml = base_toml().replace("[tiers.elevated]", "[tiers_elevated_typo]");
    assert!(TollgateConfig::from_toml(&toml).is_err());
}

#[test]
fn zero_budget_cap_is_rejected() {
    let toml = base_toml().replace("daily_cap_minor = 500000", "daily_cap_minor = 0");
    assert!(TollgateConfig::from_toml(&toml).is_err());
}

#[test]
fn non_increasing_thresholds_are_rejected() {
    let toml = base_toml().replace(
        "daily_cap_minor = 500000",
        "daily_cap_minor = 500000\nalert_thresholds_pct = [75, 50]",
    );
    assert!(TollgateConfig::from_toml(&toml).is_err());
}

#[test]
fn threshold_above_hundred_is_rejected() {
    let toml = base_toml().replace(
        "daily_cap_minor = 500000",
        "daily_cap_minor = 500000\nalert_thresholds_pct = [50, 120]",
    );
    assert!(TollgateConfig::from_toml(&toml).is_err());
}

#[test]
fn cleartext_model_endpoint_requires_opt_in() {
    let toml = base_toml()
        .replace("https://model.internal/v1/complete", "http://model.internal/v1/complete");
    assert!(TollgateConfig::from_toml(&toml).is_err());
    let toml = toml.replace(
        "endpoint = \"http://model.internal/v1/complete\"",
        "endpoint = \"http://model.internal/v1/complete\"\nallow_http = true",
    );
    assert!(TollgateConfig::from_toml(&toml).is_ok());
}

#[test]
fn sqlite_store_requires_a_path() {
    let toml = base_toml().replace("kind = \"memory\"", "kind = \"sqlite\"");
    assert!(TollgateConfig::from_toml(&toml).is_err());
    let toml = base_toml()
        .replace("kind = \"memory\"", "kind = \"sqlite\"\npath = \"/var/lib/tollgate.db\"");
    assert!(TollgateConfig::from_toml(&toml).is_ok());
}

#[test]
fn anonymous_auth_tokens_are_rejected() {
    let toml = base_toml().replace("tier = \"standard\"", "tier = \"anonymous\"");
    assert!(TollgateConfig::from_toml(&toml).is_err());
}

#[test]
fn duplicate_auth_tokens_are_rejected() {
    let toml = base_toml().replace(
        "[model]",
        "[[server.auth_tokens]]\ntoken = \"tok-alice\"\nsubject = \"alice2\"\ntier = \"standard\"\n\n[model]",
    );
    assert!(TollgateConfig::from_toml(&toml).is_err());
}

#[test]
fn unknown_fields_are_rejected() {
    let toml = base_toml().replace("bind = \"127.0.0.1:8080\"", "bind = \"127.0.0.1:8080\"\nbanner = \"hi\"");
    assert!(TollgateConfig::from_toml(&toml).is_err());
}

#[test]
fn invalid_bind_address_is_rejected() {
    let toml = base_toml().replace("127.0.0.1:8080", "not-an-address");
    assert!(TollgateConfig::from_toml(&toml).is_err());
}

#[test]
fn zero_standard_token_limit_is_rejected_but_anonymous_zero_is_fine() {
    // Anonymous callers are exempt from the quota, so a zero limit is valid
    // for that tier only.
    let toml = base_toml().replace("daily_token_limit = 100000", "daily_token_limit = 0");
    assert!(TollgateConfig::from_toml(&toml).is_err());
    assert!(TollgateConfig::from_toml(&base_toml()).is_ok());
}

#[test]
fn load_reads_from_an_explicit_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tollgate.toml");
    std::fs::write(&path, base_toml()).expect("write config");
    let config = TollgateConfig::load(Some(&path)).expect("config loads");
    assert_eq!(config.server.bind, "127.0.0.1:8080");
}

#[test]
fn load_rejects_a_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");
    assert!(TollgateConfig::load(Some(&path)).is_err());
}

#[test]
fn extra_gate_signatures_parse() {
    let toml = base_toml().replace(
        "[tiers.anonymous]",
        "[[gate.extra_signatures]]\ncategory = \"code_execution\"\npattern = \"sudo\"\n\n[tiers.anonymous]",
    );
    let config = TollgateConfig::from_toml(&toml).expect("config loads");
    assert_eq!(config.gate.extra_rules().len(), 1);
}
