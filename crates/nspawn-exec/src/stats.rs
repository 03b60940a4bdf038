//! Resource sampling from `/proc/<pid>/stat`.

use std::time::SystemTime;

use nspawn_model::TaskResourceUsage;
use procfs::{ProcError, page_size, process::Process};
use tokio::{sync::mpsc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::util::is_alive;

/// Spawn a sampler feeding `tx` every `interval` while `pid` is alive.
pub(crate) fn spawn_sampler(
    pid: u32,
    interval: Duration,
    cancel: CancellationToken,
) -> mpsc::Receiver<TaskResourceUsage> {
    let (tx, rx) = mpsc::channel(16);
    let page_size = page_size();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
            }
            if !is_alive(pid) {
                break;
            }
            let usage = match sample(pid, page_size) {
                Ok(usage) => usage,
                Err(e) => {
                    trace!(target: "nspawn.exec.stats", pid, error = %e, "stat unavailable");
                    break;
                }
            };
            if tx.send(usage).await.is_err() {
                break;
            }
        }
    });

    rx
}

/// Read utime, stime and rss of `pid` from procfs.
pub(crate) fn sample(pid: u32, page_size: u64) -> Result<TaskResourceUsage, ProcError> {
    let stat = Process::new(pid as i32)?.stat()?;
    Ok(TaskResourceUsage {
        timestamp: SystemTime::now(),
        rss_bytes: stat.rss * page_size,
        cpu_user_ticks: stat.utime,
        cpu_system_ticks: stat.stime,
    })
}
