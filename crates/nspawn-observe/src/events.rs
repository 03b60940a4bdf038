//! Mirrors the driver's task events into the diagnostic log.

use nspawn_model::TaskEvent;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Log one task event; failures at `error`, progress at `info`.
pub fn log_task_event(e: &TaskEvent) {
    let annotations = annotations(e);
    match &e.err {
        Some(err) => error!(
            target: "nspawn.events",
            task_id = %e.task_id,
            alloc_id = %e.alloc_id,
            task = %e.task_name,
            err = %err,
            annotations = %annotations,
            "{}",
            e.message
        ),
        None => info!(
            target: "nspawn.events",
            task_id = %e.task_id,
            alloc_id = %e.alloc_id,
            task = %e.task_name,
            annotations = %annotations,
            "{}",
            e.message
        ),
    }
}

/// Follow `rx` until `cancel` fires or the sender is gone.
pub fn spawn_event_journal(
    mut rx: broadcast::Receiver<TaskEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                recv = rx.recv() => match recv {
                    Ok(event) => log_task_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(target: "nspawn.events", skipped = n, "event journal lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

fn annotations(e: &TaskEvent) -> String {
    e.annotations
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}
