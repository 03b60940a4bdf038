use serde::{Deserialize, Serialize};

/// Outcome of a task, merging the process exit with the OOM signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitResult {
    pub exit_code: i32,
    pub signal: i32,
    /// Set when the kernel killed a process of the container for exceeding its memory limit.
    pub oom_killed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl ExitResult {
    pub fn new(exit_code: i32, signal: i32) -> Self {
        Self {
            exit_code,
            signal,
            oom_killed: false,
            err: None,
        }
    }

    /// Result reported when waiting on the process itself failed.
    pub fn failed(err: impl Into<String>) -> Self {
        Self {
            err: Some(err.into()),
            ..Self::default()
        }
    }

    pub fn oom() -> Self {
        Self::default().into_oom()
    }

    /// Overwrite this result with an out-of-memory kill, keeping the raw codes.
    pub fn into_oom(mut self) -> Self {
        self.oom_killed = true;
        self.err = Some("Out of memory".to_string());
        self
    }

    pub fn successful(&self) -> bool {
        self.exit_code == 0 && self.signal == 0 && !self.oom_killed && self.err.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_exit_is_not_oom() {
        let r = ExitResult::new(137, 0);
        assert!(!r.oom_killed);
        assert!(!r.successful());
        assert!(r.err.is_none());
    }

    #[test]
    fn into_oom_overrides_outcome() {
        let r = ExitResult::new(0, 0).into_oom();
        assert!(r.oom_killed);
        assert_eq!(r.err.as_deref(), Some("Out of memory"));
        assert!(!r.successful());
    }

    #[test]
    fn zero_exit_is_successful() {
        assert!(ExitResult::new(0, 0).successful());
        assert!(!ExitResult::failed("wait failed").successful());
    }
}
