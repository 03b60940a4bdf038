use std::time::Duration;

use nspawn_exec::ExecStream;
use nspawn_model::{ExecTaskResult, ExitResult, TaskId};
use tokio::time::Instant;
use tracing::instrument;

use crate::{
    driver::{Driver, DriverError},
    machine::read_environ,
};

impl Driver {
    /// Run `cmd` inside the machine through `systemd-run` and collect its output.
    #[instrument(level = "debug", skip(self))]
    pub async fn exec_task(&self, id: &TaskId, cmd: &[String], timeout: Duration) -> Result<ExecTaskResult, DriverError> {
        if cmd.is_empty() {
            return Err(DriverError::EmptyCommand);
        }
        let task = self.handle(id)?;

        let mut args: Vec<String> = ["--wait", "--service-type=exec", "--collect", "--quiet", "--machine"]
            .map(String::from)
            .to_vec();
        args.push(task.machine.name.clone());
        args.push("--pipe".to_string());
        args.extend(cmd.iter().cloned());

        let out = task
            .session
            .exec(Instant::now() + timeout, "systemd-run", &args)
            .await?;
        Ok(ExecTaskResult {
            stdout: out.stdout,
            exit_result: ExitResult::new(out.exit_code, 0),
        })
    }

    /// Run `cmd` in the namespaces and environment of the machine's leader,
    /// with stdio bridged to `stream`.
    #[instrument(level = "debug", skip(self, stream))]
    pub async fn exec_task_streaming(
        &self,
        id: &TaskId,
        cmd: &[String],
        tty: bool,
        stream: ExecStream,
    ) -> Result<ExitResult, DriverError> {
        if cmd.is_empty() {
            return Err(DriverError::EmptyCommand);
        }
        let task = self.handle(id)?;
        let leader = task.machine.leader;

        let environ = read_environ(leader).map_err(|source| DriverError::Environ { pid: leader, source })?;
        let command = nsenter_command(leader, &environ, cmd);

        let code = task.session.exec_streaming(&command, tty, stream).await?;
        Ok(ExitResult::new(code, 0))
    }
}

pub(crate) fn nsenter_command(
    leader: u32,
    environ: &std::collections::BTreeMap<String, String>,
    cmd: &[String],
) -> Vec<String> {
    let mut command: Vec<String> = vec![
        "nsenter".into(),
        "--target".into(),
        leader.to_string(),
        "--all".into(),
        "/bin/env".into(),
        "-i".into(),
        "-".into(),
    ];
    command.extend(environ.iter().map(|(k, v)| format!("{k}={v}")));
    command.extend(cmd.iter().cloned());
    command
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn nsenter_wraps_the_command() {
        let env = BTreeMap::from([
            ("PATH".to_string(), "/bin".to_string()),
            ("container".to_string(), "systemd-nspawn".to_string()),
        ]);
        let cmd = nsenter_command(812, &env, &["ls".to_string(), "-l".to_string()]);
        assert_eq!(
            cmd,
            [
                "nsenter", "--target", "812", "--all", "/bin/env", "-i", "-",
                "PATH=/bin", "container=systemd-nspawn", "ls", "-l"
            ]
        );
    }
}
