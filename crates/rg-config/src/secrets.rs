//! Unlock secret resolution.
//!
//! The config stores only the **name** of the environment variable holding
//! the drawdown unlock secret (`/secrets/unlock_env`). The value is read once
//! at startup and never appears in errors or `Debug` output.

use anyhow::{bail, Result};
use rg_risk::MIN_SECRET_LEN;

use crate::typed::RiskGuardConfig;

pub const DEFAULT_UNLOCK_SECRET_ENV: &str = "RG_UNLOCK_SECRET";

#[derive(Clone)]
pub struct ResolvedUnlockSecret {
    /// Env var the value came from.
    pub env_name: String,
    pub value: String,
}

impl std::fmt::Debug for ResolvedUnlockSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedUnlockSecret")
            .field("env_name", &self.env_name)
            .field("value", &"<REDACTED>")
            .finish()
    }
}

/// Read the unlock secret named by the config.
///
/// Unset or blank → `Ok(None)`: the operator provisions it later with
/// `rg set-secret`. A value shorter than [`MIN_SECRET_LEN`] is a startup
/// configuration error naming the variable, never the value.
pub fn resolve_unlock_secret(cfg: &RiskGuardConfig) -> Result<Option<ResolvedUnlockSecret>> {
    resolve_with(cfg, |name| std::env::var(name).ok())
}

fn resolve_with(
    cfg: &RiskGuardConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<ResolvedUnlockSecret>> {
    let env_name = cfg.secrets.unlock_env.trim();
    if env_name.is_empty() {
        return Ok(None);
    }
    let value = match lookup(env_name) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return Ok(None),
    };
    if value.chars().count() < MIN_SECRET_LEN {
        bail!("SECRET_TOO_SHORT: env var {env_name} must hold at least {MIN_SECRET_LEN} characters");
    }
    Ok(Some(ResolvedUnlockSecret {
        env_name: env_name.to_string(),
        value,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RiskGuardConfig {
        RiskGuardConfig::default()
    }

    #[test]
    fn unset_or_blank_is_none() {
        assert!(resolve_with(&cfg(), |_| None).unwrap().is_none());
        assert!(resolve_with(&cfg(), |_| Some("   ".into())).unwrap().is_none());
    }

    #[test]
    fn short_value_names_variable_not_value() {
        let err = resolve_with(&cfg(), |_| Some("ab1".into())).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("SECRET_TOO_SHORT"));
        assert!(msg.contains(DEFAULT_UNLOCK_SECRET_ENV));
        assert!(!msg.contains("ab1"));
    }

    #[test]
    fn debug_redacts_value() {
        let s = resolve_with(&cfg(), |_| Some("hunter22".into()))
            .unwrap()
            .unwrap();
        assert_eq!(s.value, "hunter22");
        let dbg = format!("{s:?}");
        assert!(dbg.contains("<REDACTED>"));
        assert!(!dbg.contains("hunter22"));
    }

    #[test]
    fn custom_env_name_is_used() {
        let mut c = cfg();
        c.secrets.unlock_env = "DESK_PIN".into();
        let s = resolve_with(&c, |name| (name == "DESK_PIN").then(|| "9911".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(s.env_name, "DESK_PIN");
    }
}
