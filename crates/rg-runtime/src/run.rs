use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::engine::Engine;

/// Tick until `shutdown` resolves, sleeping the remainder of `interval`
/// after each pass. A failed tick is logged and the loop carries on.
/// Returns the number of passes run.
///
/// A pass blocks (file locks, closer back-off sleeps), so it runs under
/// `block_in_place` and needs the multi-threaded runtime.
pub async fn run_loop<F>(engine: &mut Engine<'_>, interval: Duration, shutdown: F) -> u64
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    info!(interval_ms = interval.as_millis() as u64, "enforcement loop started");

    let mut passes: u64 = 0;
    loop {
        let started = Instant::now();
        match tokio::task::block_in_place(|| engine.tick()) {
            Ok(r) if !r.errors.is_empty() => {
                warn!(errors = r.errors.len(), "tick finished with module errors")
            }
            Ok(_) => {}
            Err(e) => error!(error = %format!("{e:#}"), "tick failed"),
        }
        passes += 1;

        let wait = interval.saturating_sub(started.elapsed());
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    info!(passes, "enforcement loop stopped");
    passes
}

/// Interval from config seconds. Sub-millisecond values round up to 1 ms.
pub fn loop_interval(secs: f64) -> Duration {
    Duration::from_millis(((secs * 1000.0).round() as u64).max(1))
}
