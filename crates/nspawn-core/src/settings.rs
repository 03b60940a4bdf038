use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Plugin configuration, replaceable at runtime through `set_config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Report the driver as usable.
    pub enabled: bool,
    /// Allow host volumes to be bound into containers.
    pub volumes: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            volumes: true,
        }
    }
}

/// Tunables of the engine. Durations are written in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// How long to wait for a fresh machine to show up on the bus.
    #[serde(with = "millis")]
    pub machine_properties_timeout: Duration,
    /// How long to wait for a fresh machine to report a routable address.
    #[serde(with = "millis")]
    pub machine_address_timeout: Duration,
    /// Pause between two introspection attempts.
    #[serde(with = "millis")]
    pub introspection_backoff: Duration,
    /// Window after process exit during which an OOM kill is still attributed.
    #[serde(with = "millis")]
    pub oom_grace: Duration,
    #[serde(with = "millis")]
    pub fingerprint_period: Duration,
    /// Poll interval of image transfers.
    #[serde(with = "millis")]
    pub transfer_poll: Duration,
    /// Maximum length of the sanitized task name inside a machine name.
    pub name_prefix_len: usize,
    /// Container supervisor program.
    pub supervisor_binary: String,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            machine_properties_timeout: Duration::from_secs(30),
            machine_address_timeout: Duration::from_secs(30),
            introspection_backoff: Duration::from_millis(10),
            oom_grace: Duration::from_secs(5),
            fingerprint_period: Duration::from_secs(30),
            transfer_poll: Duration::from_secs(2),
            name_prefix_len: 27,
            supervisor_binary: "systemd-nspawn".to_string(),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_keep_defaults() {
        let s: DriverSettings = serde_json::from_str(r#"{"oom_grace": 250}"#).unwrap();
        assert_eq!(s.oom_grace, Duration::from_millis(250));
        assert_eq!(s.name_prefix_len, 27);
        assert_eq!(s.machine_properties_timeout, Duration::from_secs(30));
        assert_eq!(s.supervisor_binary, "systemd-nspawn");
    }

    #[test]
    fn driver_config_defaults_to_enabled() {
        let c: DriverConfig = serde_json::from_str("{}").unwrap();
        assert!(c.enabled);
        assert!(c.volumes);

        let c: DriverConfig = serde_json::from_str(r#"{"volumes": false}"#).unwrap();
        assert!(c.enabled);
        assert!(!c.volumes);
    }
}
