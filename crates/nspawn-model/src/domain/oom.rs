/// A kernel out-of-memory kill attributed to a machine.
///
/// Produced by parsing one kernel log line and consumed exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OomEvent {
    /// Machine name recovered from the `machine-<id>.scope` cgroup.
    pub machine_id: String,
    /// Command name of the killed process.
    pub task: String,
    /// PID of the killed process.
    pub pid: u64,
}
