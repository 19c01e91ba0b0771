use anyhow::{bail, Context, Result};
use rg_execution::CloserConfig;
use rg_risk::{AggregateConfig, DrawdownConfig, PerTradeConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::secrets::DEFAULT_UNLOCK_SECRET_ENV;

pub const DEFAULT_ALERT_INTERVAL_SECS: f64 = 5.0;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSection {
    pub dir: PathBuf,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".riskguard"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub dir: PathBuf,
    pub hash_chain: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            hash_chain: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSection {
    pub interval_secs: f64,
    /// Consecutive snapshot failures before SNAPSHOT_STALE goes out.
    pub snapshot_max_fails: u32,
    /// A pause marker older than this is left over from a dead closer and
    /// is removed.
    pub pause_stale_secs: f64,
    /// Skipped passes longer than this are logged as a PAUSED event.
    pub pause_alert_secs: f64,
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            interval_secs: 2.0,
            snapshot_max_fails: 3,
            pause_stale_secs: 60.0,
            pause_alert_secs: 10.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsSection {
    pub default_interval_secs: f64,
    /// Per alert kind (`PER_TRADE`, `LIMITS`, `DD_KILL`, ...).
    pub min_interval_secs: BTreeMap<String, f64>,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            default_interval_secs: DEFAULT_ALERT_INTERVAL_SECS,
            min_interval_secs: BTreeMap::new(),
        }
    }
}

impl AlertsSection {
    pub fn interval_for(&self, kind: &str) -> f64 {
        self.min_interval_secs
            .get(kind)
            .copied()
            .unwrap_or(self.default_interval_secs)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    None,
    #[default]
    Tracing,
    File,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierSection {
    pub kind: NotifierKind,
    /// Outbox / inbox directory for the file notifier.
    pub dir: PathBuf,
    /// Name this instance signs its messages with.
    pub ident: String,
}

impl Default for NotifierSection {
    fn default() -> Self {
        Self {
            kind: NotifierKind::Tracing,
            dir: PathBuf::from("notify"),
            ident: "riskguard".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsSection {
    /// Env var NAME holding the drawdown unlock secret.
    pub unlock_env: String,
}

impl Default for SecretsSection {
    fn default() -> Self {
        Self {
            unlock_env: DEFAULT_UNLOCK_SECRET_ENV.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// RiskGuardConfig
// ---------------------------------------------------------------------------

/// Effective engine configuration. Every section defaults independently, so
/// an empty config is a valid one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskGuardConfig {
    pub state: StateSection,
    pub log: LogSection,
    #[serde(rename = "loop")]
    pub run_loop: LoopSection,
    pub per_trade: PerTradeConfig,
    pub aggregate: AggregateConfig,
    pub drawdown: DrawdownConfig,
    pub alerts: AlertsSection,
    pub closer: CloserConfig,
    pub notifier: NotifierSection,
    pub secrets: SecretsSection,
}

impl RiskGuardConfig {
    /// Extract and validate. Type errors (an unknown per-trade mode, a string
    /// where a number belongs) and out-of-range values are both reported as
    /// CONFIG_INVALID.
    pub fn from_json(config_json: &Value) -> Result<Self> {
        let cfg: RiskGuardConfig = serde_json::from_value(config_json.clone())
            .context("CONFIG_INVALID: config does not match the RiskGuard schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        positive("/per_trade/max_risk_pct", self.per_trade.max_risk_pct)?;
        if self.per_trade.decision_timeout_min <= 0 {
            bail!("CONFIG_INVALID: /per_trade/decision_timeout_min must be > 0");
        }
        positive("/aggregate/max_risk_pct", self.aggregate.max_risk_pct)?;
        if self.aggregate.max_attempts == 0 {
            bail!("CONFIG_INVALID: /aggregate/max_attempts must be > 0");
        }
        positive("/drawdown/limit_pct", self.drawdown.limit_pct)?;
        if self.drawdown.limit_pct >= 100.0 {
            bail!("CONFIG_INVALID: /drawdown/limit_pct must be < 100");
        }
        if self.drawdown.cooldown_days <= 0 {
            bail!("CONFIG_INVALID: /drawdown/cooldown_days must be > 0");
        }
        positive("/loop/interval_secs", self.run_loop.interval_secs)?;
        if self.run_loop.snapshot_max_fails == 0 {
            bail!("CONFIG_INVALID: /loop/snapshot_max_fails must be > 0");
        }
        positive("/loop/pause_stale_secs", self.run_loop.pause_stale_secs)?;
        non_negative("/loop/pause_alert_secs", self.run_loop.pause_alert_secs)?;
        if self.closer.direct_attempts == 0 {
            bail!("CONFIG_INVALID: /closer/direct_attempts must be > 0");
        }
        non_negative("/alerts/default_interval_secs", self.alerts.default_interval_secs)?;
        for (kind, secs) in &self.alerts.min_interval_secs {
            non_negative(&format!("/alerts/min_interval_secs/{kind}"), *secs)?;
        }
        if self.notifier.kind == NotifierKind::File && self.notifier.dir.as_os_str().is_empty() {
            bail!("CONFIG_INVALID: /notifier/dir is required for the file notifier");
        }
        Ok(())
    }
}

fn positive(ptr: &str, v: f64) -> Result<()> {
    if !v.is_finite() || v <= 0.0 {
        bail!("CONFIG_INVALID: {ptr} must be > 0 (got {v})");
    }
    Ok(())
}

fn non_negative(ptr: &str, v: f64) -> Result<()> {
    if !v.is_finite() || v < 0.0 {
        bail!("CONFIG_INVALID: {ptr} must be >= 0 (got {v})");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rg_risk::PerTradeMode;

    #[test]
    fn defaults_match_documented_table() {
        let c = RiskGuardConfig::default();
        assert_eq!(c.state.dir, PathBuf::from(".riskguard"));
        assert_eq!(c.log.dir, PathBuf::from("logs"));
        assert!(!c.log.hash_chain);
        assert_eq!(c.run_loop.interval_secs, 2.0);
        assert_eq!(c.run_loop.snapshot_max_fails, 3);
        assert_eq!(c.run_loop.pause_stale_secs, 60.0);
        assert_eq!(c.per_trade.max_risk_pct, 1.0);
        assert_eq!(c.per_trade.mode, PerTradeMode::Interactive);
        assert_eq!(c.per_trade.decision_timeout_min, 15);
        assert_eq!(c.aggregate.max_risk_pct, 5.0);
        assert_eq!(c.aggregate.max_attempts, 3);
        assert!(c.drawdown.enabled);
        assert_eq!(c.drawdown.limit_pct, 20.0);
        assert_eq!(c.drawdown.cooldown_days, 30);
        assert_eq!(c.alerts.interval_for("DD_KILL"), 5.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn per_kind_interval_overrides_default() {
        let mut a = AlertsSection::default();
        a.min_interval_secs.insert("LIMITS".into(), 60.0);
        assert_eq!(a.interval_for("LIMITS"), 60.0);
        assert_eq!(a.interval_for("PER_TRADE"), DEFAULT_ALERT_INTERVAL_SECS);
    }

    #[test]
    fn loop_key_maps_to_run_loop() {
        let v = serde_json::json!({"loop": {"interval_secs": 0.5}});
        let c = RiskGuardConfig::from_json(&v).unwrap();
        assert_eq!(c.run_loop.interval_secs, 0.5);
        assert_eq!(c.run_loop.snapshot_max_fails, 3);
    }
}
