use nspawn_model::OomEvent;
use serde::Deserialize;
use tracing::warn;

const OOM_KILL: &str = "oom-kill:";
const SCOPE_PREFIX: &str = "/machine.slice/machine-";
const SCOPE_SUFFIX: &str = ".scope";

/// One record of `journalctl -o json`; other fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JournalRecord {
    #[serde(rename = "MESSAGE", default)]
    pub message: String,
    #[serde(rename = "SYSLOG_IDENTIFIER", default)]
    pub syslog_identifier: String,
}

impl JournalRecord {
    pub fn is_kernel(&self) -> bool {
        self.syslog_identifier == "kernel"
    }
}

/// Parse a kernel `oom-kill:` line.
///
/// ```text
/// oom-kill:constraint=CONSTRAINT_MEMCG,...,oom_memcg=/machine.slice/machine-web\x2d9706e99d.scope,...,task=bash,pid=980323,uid=0
/// ```
///
/// Returns `None` for every other kernel line (memory cgroup summaries,
/// reaper reports) and for kills outside a machine scope.
pub fn parse_line(line: &str) -> Option<OomEvent> {
    let fields = line.strip_prefix(OOM_KILL)?;

    let mut event = OomEvent::default();
    for field in fields.split(',') {
        let Some((key, value)) = field.split_once('=') else {
            warn!(target: "nspawn.oom", line, "unexpected format of oom-kill");
            continue;
        };
        match key {
            "oom_memcg" => match machine_id(value) {
                Some(id) => event.machine_id = id,
                None => warn!(target: "nspawn.oom", line, "unexpected format of oom_memcg"),
            },
            "pid" => match value.parse() {
                Ok(pid) => event.pid = pid,
                Err(e) => warn!(target: "nspawn.oom", line, error = %e, "unexpected format of pid"),
            },
            "task" => event.task = value.to_string(),
            _ => {}
        }
    }

    (!event.machine_id.is_empty()).then_some(event)
}

/// Machine name of a `machine-<name>.scope` cgroup, with `\x2d` unescaped.
fn machine_id(memcg: &str) -> Option<String> {
    let scope = memcg.replace("\\x2d", "-");
    let id = scope.strip_prefix(SCOPE_PREFIX)?.strip_suffix(SCOPE_SUFFIX)?;
    (!id.is_empty()).then(|| id.to_string())
}
