//! Unused-key report.
//!
//! # Invariants under test
//! - Every documented key is consumed: a config using all of them is clean.
//! - A misspelt key is reported under Warn and is an error under Fail.
//! - Alert kinds under `/alerts/min_interval_secs` are free-form.

use rg_config::{load_layered_yaml_from_strings, report_unused_keys, UnusedKeyPolicy};

const FULL_YAML: &str = r#"
state: { dir: ".riskguard" }
log: { dir: "logs", hash_chain: true }
loop: { interval_secs: 2.0, snapshot_max_fails: 3, pause_stale_secs: 60, pause_alert_secs: 10 }
per_trade: { max_risk_pct: 1.0, mode: interactive, decision_timeout_min: 15 }
aggregate: { max_risk_pct: 5.0, max_attempts: 3 }
drawdown: { enabled: true, limit_pct: 20.0, cooldown_days: 30 }
alerts:
  default_interval_secs: 5
  min_interval_secs: { PER_TRADE: 5, LIMITS: 30, SOMETHING_NEW: 1 }
closer:
  direct_attempts: 3
  direct_deviation: 50
  attempt_gap_ms: 150
  forced_deviation: 9999
  toggle_settle_ms: 500
  post_retry_ms: 500
  toggle_off_settle_ms: 400
notifier: { kind: file, dir: "notify", ident: "desk-1" }
secrets: { unlock_env: RG_UNLOCK_SECRET }
"#;

#[test]
fn full_config_is_clean() {
    let loaded = load_layered_yaml_from_strings(&[FULL_YAML]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).unwrap();
    assert!(report.is_clean(), "{:?}", report.unused_leaf_pointers);
    assert!(loaded.typed().is_ok());
}

#[test]
fn typo_is_reported_under_warn() {
    let loaded =
        load_layered_yaml_from_strings(&[FULL_YAML, "per_trade:\n  max_risk: 2.0\n"]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(report.unused_leaf_pointers, vec!["/per_trade/max_risk".to_string()]);
}

#[test]
fn typo_fails_under_fail() {
    let loaded = load_layered_yaml_from_strings(&["aggregat:\n  max_attempts: 2\n"]).unwrap();
    let err = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("CONFIG_UNUSED_KEYS"));
    assert!(msg.contains("/aggregat/max_attempts"));
}
