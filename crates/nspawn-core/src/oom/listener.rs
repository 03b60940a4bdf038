use std::collections::HashMap;

use nspawn_model::OomEvent;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const QUEUE: usize = 64;

enum Command {
    Register {
        machine: String,
        tx: oneshot::Sender<OomEvent>,
    },
    Deregister {
        machine: String,
    },
}

struct Registration {
    tx: oneshot::Sender<OomEvent>,
    registered_at: Instant,
}

/// Routes kernel OOM kills to the task owning the machine.
///
/// The registration map lives inside a single actor task. Register and
/// deregister requests share one ordered queue and are always drained before
/// pending kill events, so a caller that registered (or deregistered) before
/// an event was submitted sees the effect of its request.
///
/// Each registration receives at most one event; delivery removes it.
#[derive(Clone)]
pub struct OomListener {
    commands: mpsc::Sender<Command>,
    events: mpsc::Sender<OomEvent>,
}

impl OomListener {
    /// Start the actor. It runs until `cancel` fires.
    pub fn spawn(cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (commands, cmd_rx) = mpsc::channel(QUEUE);
        let (events, ev_rx) = mpsc::channel(QUEUE);
        let task = tokio::spawn(run(cmd_rx, ev_rx, cancel));
        (Self { commands, events }, task)
    }

    /// Watch `machine` for an OOM kill. Replaces an earlier registration.
    ///
    /// The receiver errors once the registration is dropped without an event
    /// (deregistered, replaced or the listener stopped).
    pub async fn register(&self, machine: &str) -> oneshot::Receiver<OomEvent> {
        let (tx, rx) = oneshot::channel();
        let cmd = Command::Register {
            machine: machine.to_string(),
            tx,
        };
        if self.commands.send(cmd).await.is_err() {
            debug!(target: "nspawn.oom", machine, "listener stopped; registration dropped");
        }
        rx
    }

    /// Stop watching `machine`. Unknown machines are ignored.
    pub async fn deregister(&self, machine: &str) {
        let cmd = Command::Deregister {
            machine: machine.to_string(),
        };
        let _ = self.commands.send(cmd).await;
    }

    /// Submit a parsed kill event.
    pub async fn notify(&self, event: OomEvent) {
        let _ = self.events.send(event).await;
    }
}

async fn run(
    mut commands: mpsc::Receiver<Command>,
    mut events: mpsc::Receiver<OomEvent>,
    cancel: CancellationToken,
) {
    let mut registrations: HashMap<String, Registration> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(cmd) = commands.recv() => match cmd {
                Command::Register { machine, tx } => {
                    debug!(target: "nspawn.oom", %machine, "register listening for OOM");
                    registrations.insert(machine, Registration { tx, registered_at: Instant::now() });
                }
                Command::Deregister { machine } => {
                    debug!(target: "nspawn.oom", %machine, "deregister listening for OOM");
                    registrations.remove(&machine);
                }
            },
            Some(event) = events.recv() => {
                debug!(target: "nspawn.oom", machine = %event.machine_id, task = %event.task, pid = event.pid, "received OOM");
                if let Some(reg) = registrations.remove(&event.machine_id) {
                    trace!(target: "nspawn.oom", age = ?reg.registered_at.elapsed(), "delivering OOM");
                    let _ = reg.tx.send(event);
                }
            }
            else => break,
        }
    }
    debug!(target: "nspawn.oom", pending = registrations.len(), "OOM listener stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn kill(machine: &str) -> OomEvent {
        OomEvent {
            machine_id: machine.into(),
            task: "bash".into(),
            pid: 4242,
        }
    }

    #[tokio::test]
    async fn registered_machine_gets_its_event() {
        let (oom, _task) = OomListener::spawn(CancellationToken::new());
        let rx = oom.register("web-a1").await;
        oom.notify(kill("other-a2")).await;
        oom.notify(kill("web-a1")).await;

        let ev = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
        assert_eq!(ev.machine_id, "web-a1");
        assert_eq!(ev.pid, 4242);
    }

    #[tokio::test]
    async fn deregistered_machine_gets_nothing() {
        let (oom, _task) = OomListener::spawn(CancellationToken::new());
        let rx = oom.register("web-a1").await;
        oom.deregister("web-a1").await;
        oom.notify(kill("web-a1")).await;

        // the sender was dropped by the deregistration
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn one_registration_one_delivery() {
        let (oom, _task) = OomListener::spawn(CancellationToken::new());
        let rx = oom.register("web-a1").await;
        oom.notify(kill("web-a1")).await;
        oom.notify(kill("web-a1")).await;
        assert!(rx.await.is_ok());

        // the second event found no registration; a fresh one sees only new events
        let rx = oom.register("web-a1").await;
        oom.deregister("web-a1").await;
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn deregistering_unknown_machine_is_harmless() {
        let (oom, _task) = OomListener::spawn(CancellationToken::new());
        oom.deregister("never-registered").await;
        let rx = oom.register("web-a1").await;
        oom.notify(kill("web-a1")).await;
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn reregistration_replaces_the_old_receiver() {
        let (oom, _task) = OomListener::spawn(CancellationToken::new());
        let old = oom.register("web-a1").await;
        let new = oom.register("web-a1").await;
        oom.notify(kill("web-a1")).await;

        assert!(old.await.is_err());
        assert!(new.await.is_ok());
    }

    #[tokio::test]
    async fn cancel_stops_the_actor() {
        let cancel = CancellationToken::new();
        let (oom, task) = OomListener::spawn(cancel.clone());
        let rx = oom.register("web-a1").await;
        cancel.cancel();
        task.await.unwrap();
        assert!(rx.await.is_err());
    }
}
