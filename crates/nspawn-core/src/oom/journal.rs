use std::{process::Stdio, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::oom::{
    listener::OomListener,
    parse::{JournalRecord, parse_line},
};

/// Follows the kernel log and feeds OOM kills into an [`OomListener`].
///
/// The tailing process is restarted whenever it exits, for as long as the
/// tail is not cancelled.
#[derive(Debug, Clone)]
pub struct JournalTail {
    program: String,
    args: Vec<String>,
    restart_delay: Duration,
}

impl JournalTail {
    pub fn new() -> Self {
        Self::with_command(
            "journalctl",
            ["-e", "-f", "-k", "-o", "json", "-g", "oom-kill:"]
                .map(String::from)
                .to_vec(),
        )
    }

    /// Any command printing one journal JSON record per line.
    pub fn with_command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            restart_delay: Duration::from_secs(1),
        }
    }

    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub async fn run(self, listener: OomListener, cancel: CancellationToken) {
        info!(target: "nspawn.oom", program = %self.program, "following kernel log");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.follow(&listener) => match res {
                    Ok(()) => debug!(target: "nspawn.oom", "kernel log stream ended"),
                    Err(e) => warn!(target: "nspawn.oom", error = %e, "failed following kernel log"),
                },
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.restart_delay) => {}
            }
        }
        debug!(target: "nspawn.oom", "kernel log tail stopped");
    }

    /// One session of the tailing process, until its stdout closes.
    async fn follow(&self, listener: &OomListener) -> std::io::Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
        let mut lines = BufReader::new(stdout).lines();

        while let Some(line) = lines.next_line().await? {
            let record: JournalRecord = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    trace!(target: "nspawn.oom", error = %e, "skipping undecodable record");
                    continue;
                }
            };
            if !record.is_kernel() {
                continue;
            }
            if let Some(event) = parse_line(&record.message) {
                listener.notify(event).await;
            }
        }

        let status = child.wait().await?;
        debug!(target: "nspawn.oom", %status, "kernel log process exited");
        Ok(())
    }
}

impl Default for JournalTail {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printing(script: &str) -> JournalTail {
        JournalTail::with_command("sh", vec!["-c".into(), script.into()])
            .restart_delay(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn kernel_kills_reach_the_listener() {
        let cancel = CancellationToken::new();
        let (oom, _actor) = OomListener::spawn(cancel.clone());
        let rx = oom.register("web-a1").await;

        let script = r#"
            printf '%s\n' 'not json'
            printf '%s\n' '{"MESSAGE":"oom-kill:oom_memcg=/machine.slice/machine-web\\x2da1.scope,task=sh,pid=7","SYSLOG_IDENTIFIER":"systemd"}'
            printf '%s\n' '{"MESSAGE":"oom-kill:oom_memcg=/machine.slice/machine-web\\x2da1.scope,task=bash,pid=9","SYSLOG_IDENTIFIER":"kernel"}'
        "#;
        let tail = tokio::spawn(printing(script).run(oom.clone(), cancel.clone()));

        let ev = tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert_eq!(ev.task, "bash");
        assert_eq!(ev.pid, 9);

        cancel.cancel();
        tail.await.unwrap();
    }

    #[tokio::test]
    async fn exited_tail_is_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let count = dir.path().join("runs");
        let script = format!("echo run >> {}", count.display());

        let cancel = CancellationToken::new();
        let (oom, _actor) = OomListener::spawn(cancel.clone());
        let tail = tokio::spawn(printing(&script).run(oom, cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let runs = std::fs::read_to_string(&count).unwrap_or_default();
                if runs.lines().count() >= 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tail.await.unwrap();
    }
}
