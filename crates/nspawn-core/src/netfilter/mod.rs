//! Forwarding rules for container interfaces.

mod error;
mod iptables;

pub use error::NetfilterError;
pub use iptables::Iptables;

use async_trait::async_trait;
use tracing::debug;

pub const FILTER: &str = "filter";
pub const FORWARD: &str = "FORWARD";

/// Idempotent rule primitives of the host firewall.
#[async_trait]
pub trait Firewall: Send + Sync + 'static {
    async fn exists(&self, table: &str, chain: &str, rule: &[String]) -> Result<bool, NetfilterError>;

    async fn append(&self, table: &str, chain: &str, rule: &[String]) -> Result<(), NetfilterError>;

    async fn delete(&self, table: &str, chain: &str, rule: &[String]) -> Result<(), NetfilterError>;
}

/// The three forwarding rules each container interface needs.
pub fn forwarding_rules(iface: &str) -> [Vec<String>; 3] {
    let rule = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    [
        rule(&["-o", iface, "-m", "conntrack", "--ctstate", "RELATED,ESTABLISHED", "-j", "ACCEPT"]),
        rule(&["-i", iface, "!", "-o", iface, "-j", "ACCEPT"]),
        rule(&["-i", iface, "-o", iface, "-j", "ACCEPT"]),
    ]
}

/// Install (or, with `remove`, delete) the forwarding rules of `interfaces`.
///
/// Existing rules are never duplicated and absent rules are never deleted.
pub async fn configure_forwarding(
    fw: &dyn Firewall,
    remove: bool,
    interfaces: &[String],
) -> Result<(), NetfilterError> {
    if interfaces.is_empty() {
        return Err(NetfilterError::NoInterfaces);
    }

    for iface in interfaces {
        for rule in forwarding_rules(iface) {
            let present = fw.exists(FILTER, FORWARD, &rule).await?;
            match (remove, present) {
                (false, false) => fw.append(FILTER, FORWARD, &rule).await?,
                (true, true) => fw.delete(FILTER, FORWARD, &rule).await?,
                _ => debug!(iface = %iface, remove, "rule already in place"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFirewall;

    fn ifaces(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let fw = FakeFirewall::default();
        configure_forwarding(&fw, false, &ifaces(&["ve-web"])).await.unwrap();
        configure_forwarding(&fw, false, &ifaces(&["ve-web"])).await.unwrap();

        assert_eq!(fw.rules().len(), 3);
        assert_eq!(fw.appends(), 3);
    }

    #[tokio::test]
    async fn remove_only_deletes_present_rules() {
        let fw = FakeFirewall::default();
        configure_forwarding(&fw, true, &ifaces(&["ve-web"])).await.unwrap();
        assert_eq!(fw.appends(), 0);
        assert_eq!(fw.deletes(), 0);

        configure_forwarding(&fw, false, &ifaces(&["ve-web", "ve-db"])).await.unwrap();
        configure_forwarding(&fw, true, &ifaces(&["ve-web"])).await.unwrap();
        assert_eq!(fw.deletes(), 3);
        assert_eq!(fw.rules().len(), 3);
        assert!(fw.rules().iter().all(|r| r.contains(&"ve-db".to_string())));
    }

    #[tokio::test]
    async fn no_interfaces_is_an_error() {
        let fw = FakeFirewall::default();
        let err = configure_forwarding(&fw, false, &[]).await.unwrap_err();
        assert!(matches!(err, NetfilterError::NoInterfaces));
        assert_eq!(fw.calls(), 0);
    }

    #[test]
    fn rule_shapes() {
        let [established, outbound, internal] = forwarding_rules("ve-x");
        assert_eq!(established[..2], ["-o".to_string(), "ve-x".to_string()]);
        assert!(established.contains(&"RELATED,ESTABLISHED".to_string()));
        assert_eq!(outbound[2], "!");
        assert_eq!(internal, ["-i", "ve-x", "-o", "ve-x", "-j", "ACCEPT"]);
    }
}
