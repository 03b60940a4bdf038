use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::trace;

use crate::netfilter::{Firewall, error::NetfilterError};

/// [`Firewall`] backed by the `iptables` binary.
#[derive(Debug, Clone)]
pub struct Iptables {
    program: String,
}

impl Iptables {
    pub fn new() -> Self {
        Self::with_program("iptables")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, op: &str, table: &str, chain: &str, rule: &[String]) -> Result<Output, NetfilterError> {
        let mut args = vec!["--wait".to_string(), "-t".into(), table.into(), op.into(), chain.into()];
        args.extend(rule.iter().cloned());
        trace!(target: "nspawn.netfilter", ?args, "iptables");

        let out = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(out)
    }

    async fn check(&self, op: &str, table: &str, chain: &str, rule: &[String]) -> Result<(), NetfilterError> {
        let out = self.run(op, table, chain, rule).await?;
        if out.status.success() {
            return Ok(());
        }
        Err(rule_error(op, chain, rule, &out))
    }
}

impl Default for Iptables {
    fn default() -> Self {
        Self::new()
    }
}

fn rule_error(op: &str, chain: &str, rule: &[String], out: &Output) -> NetfilterError {
    NetfilterError::Rule {
        args: format!("{op} {chain} {}", rule.join(" ")),
        code: out.status.code(),
        stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
    }
}

#[async_trait]
impl Firewall for Iptables {
    async fn exists(&self, table: &str, chain: &str, rule: &[String]) -> Result<bool, NetfilterError> {
        let out = self.run("-C", table, chain, rule).await?;
        match out.status.code() {
            Some(0) => Ok(true),
            // -C exits 1 when the rule is not in the chain
            Some(1) => Ok(false),
            _ => Err(rule_error("-C", chain, rule, &out)),
        }
    }

    async fn append(&self, table: &str, chain: &str, rule: &[String]) -> Result<(), NetfilterError> {
        self.check("-A", table, chain, rule).await
    }

    async fn delete(&self, table: &str, chain: &str, rule: &[String]) -> Result<(), NetfilterError> {
        self.check("-D", table, chain, rule).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> Vec<String> {
        ["-i", "ve-x", "-j", "ACCEPT"].iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn check_exit_code_maps_to_presence() {
        assert!(Iptables::with_program("true").exists("filter", "FORWARD", &rule()).await.unwrap());
        assert!(!Iptables::with_program("false").exists("filter", "FORWARD", &rule()).await.unwrap());
    }

    #[tokio::test]
    async fn other_failures_are_errors() {
        // sh rejects the leading --wait option with exit status 2
        let fw = Iptables::with_program("sh");
        let err = fw.exists("filter", "FORWARD", &rule()).await.unwrap_err();
        match err {
            NetfilterError::Rule { code, stderr, .. } => {
                assert_eq!(code, Some(2));
                assert!(!stderr.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fw.append("filter", "FORWARD", &rule()).await.is_err());
        assert!(Iptables::with_program("false").delete("filter", "FORWARD", &rule()).await.is_err());
    }

    #[tokio::test]
    async fn arguments_are_passed_through() {
        let out = Iptables::with_program("echo")
            .run("-A", "filter", "FORWARD", &rule())
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&out.stdout).trim(),
            "--wait -t filter -A FORWARD -i ve-x -j ACCEPT"
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let fw = Iptables::with_program("/nonexistent/iptables");
        let err = fw.append("filter", "FORWARD", &rule()).await.unwrap_err();
        assert!(matches!(err, NetfilterError::Spawn(_)));
    }
}
