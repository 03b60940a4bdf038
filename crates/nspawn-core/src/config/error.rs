use thiserror::Error;

/// Invalid or contradictory container configuration.
///
/// Always raised before anything is built or launched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid parameter for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
    #[error("{0} and {1} may not be combined")]
    Conflict(&'static str, &'static str),
    #[error("{0} is not an absolute path")]
    NotAbsolute(&'static str),
    #[error("starting a container from the root directory is not supported. Use ephemeral or volatile")]
    HostRoot,
    #[error("volumes are not enabled; cannot mount host paths")]
    VolumesDisabled,
    #[error("invalid port declaration; use of port_map and ports")]
    PortDeclaration,
    #[error("trying to map ports but no network interface is available")]
    NoNetwork,
    #[error("no ports defined in network stanza")]
    NoPorts,
    #[error("port {0:?} not found, check network stanza")]
    UnknownPort(String),
}
