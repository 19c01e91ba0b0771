use anyhow::{Context, Result};
use rg_audit::{EventLogger, JsonlEventLog};
use rg_config::{NotifierKind, RiskGuardConfig};
use rg_notify::{FileNotifier, NoopNotifier, Notifier, TracingNotifier};
use rg_state::StateStore;
use tracing::info;

/// The long-lived collaborators an `Engine` borrows, built from config.
pub struct Services {
    pub store: StateStore,
    pub logger: Box<dyn EventLogger>,
    pub notifier: Box<dyn Notifier>,
}

impl Services {
    pub fn open(cfg: &RiskGuardConfig) -> Result<Self> {
        let store = StateStore::open(&cfg.state.dir)
            .with_context(|| format!("open state dir {:?}", cfg.state.dir))?;
        let logger = JsonlEventLog::new(&cfg.log.dir, cfg.log.hash_chain)
            .with_context(|| format!("open log dir {:?}", cfg.log.dir))?;
        let notifier = build_notifier(cfg)?;
        info!(
            state_dir = ?cfg.state.dir,
            log_dir = ?cfg.log.dir,
            hash_chain = cfg.log.hash_chain,
            notifier = ?cfg.notifier.kind,
            "services ready"
        );
        Ok(Self {
            store,
            logger: Box::new(logger),
            notifier,
        })
    }
}

pub fn build_notifier(cfg: &RiskGuardConfig) -> Result<Box<dyn Notifier>> {
    let n: Box<dyn Notifier> = match cfg.notifier.kind {
        NotifierKind::None => Box::new(NoopNotifier),
        NotifierKind::Tracing => Box::new(TracingNotifier::new(cfg.notifier.ident.clone())),
        NotifierKind::File => Box::new(file_notifier(cfg)?),
    };
    Ok(n)
}

/// The file channel named by the config, whatever `notifier.kind` says. The
/// CLI's `reply` writes into its inbox.
pub fn file_notifier(cfg: &RiskGuardConfig) -> Result<FileNotifier> {
    FileNotifier::new(&cfg.notifier.dir, cfg.notifier.ident.clone())
        .with_context(|| format!("open notifier dir {:?}", cfg.notifier.dir))
}
