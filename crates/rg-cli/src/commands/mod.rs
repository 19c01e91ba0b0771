//! Command handlers for `rg`.
//!
//! Shared utilities used by multiple command paths live here.

pub mod engine;
pub mod operator;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rg_audit::VerifyResult;
use rg_config::{report_unused_keys, resolve_unlock_secret, LoadedConfig, RiskGuardConfig, UnusedKeyPolicy};
use rg_risk::drawdown;
use rg_state::StateStore;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn load_layers(paths: &[PathBuf]) -> Result<LoadedConfig> {
    rg_config::load_layered_yaml(paths)
}

/// Effective, validated config. Unused keys are warned about, not fatal.
pub fn load_config(paths: &[PathBuf]) -> Result<RiskGuardConfig> {
    let loaded = load_layers(paths)?;
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for leaf in &report.unused_leaf_pointers {
        warn!(leaf = %leaf, "config key is not read by anything");
    }
    let cfg = loaded.typed()?;
    info!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");
    Ok(cfg)
}

/// Install the env-provided unlock secret when none is stored yet. A stored
/// secret is never replaced implicitly; use `rg set-secret` for that.
pub fn provision_unlock_secret(cfg: &RiskGuardConfig, store: &StateStore) -> Result<()> {
    let Some(secret) = resolve_unlock_secret(cfg)? else {
        return Ok(());
    };
    if drawdown::status(store, Utc::now()).secret_configured {
        return Ok(());
    }
    drawdown::set_secret(store, &secret.value)?;
    info!(env = %secret.env_name, "unlock secret provisioned from environment");
    Ok(())
}

pub fn config_hash(paths: &[PathBuf]) -> Result<()> {
    let loaded = load_layers(paths)?;
    loaded.typed()?;
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(())
}

pub fn verify_log(path: &Path) -> Result<()> {
    match rg_audit::verify_hash_chain(path).context("verify event log")? {
        VerifyResult::Valid { lines } => {
            println!("chain_ok=true lines={lines}");
            Ok(())
        }
        VerifyResult::Broken { line, reason } => {
            println!("chain_ok=false line={line}");
            bail!("CHAIN_BROKEN at line {line}: {reason}")
        }
    }
}
