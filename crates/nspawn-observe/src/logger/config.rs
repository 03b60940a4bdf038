use serde::Deserialize;

use crate::logger::format::LoggerFormat;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directive, e.g. `info` or `info,nspawn.oom=debug`.
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
    /// Syslog identifier for journald output.
    pub identifier: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let use_color = cfg!(test) || atty::is(atty::Stream::Stdout);
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color,
            identifier: "nspawn-agentd".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: LoggerConfig = serde_json::from_str(r#"{"format":"json","level":"debug"}"#).unwrap();
        assert_eq!(cfg.format, LoggerFormat::Json);
        assert_eq!(cfg.level, "debug");
        assert!(cfg.with_targets);
        assert_eq!(cfg.identifier, "nspawn-agentd");
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = serde_json::from_str::<LoggerConfig>(r#"{"format":"yaml"}"#).unwrap_err();
        assert!(err.to_string().contains("yaml"));
    }
}
