//! Subscriber assembly: one output layer, filtered, installed globally.

use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, fmt::time::OffsetTime, layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::logger::{config::LoggerConfig, error::LoggerError, format::LoggerFormat};

/// Overrides `LoggerConfig::level` when set and non-empty.
pub const LEVEL_ENV: &str = "NSPAWN_LOG";

type Output = Box<dyn Layer<Registry> + Send + Sync + 'static>;

pub(crate) fn install(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    if tracing::dispatcher::has_been_set() {
        return Err(LoggerError::AlreadyInitialized);
    }
    let env = std::env::var(LEVEL_ENV).ok();
    let filter = mk_filter(&cfg.level, env.as_deref())?;
    let output = output_layer(cfg)?;

    tracing_subscriber::registry()
        .with(output.with_filter(filter))
        .try_init()
        .map_err(|e| LoggerError::InitializationFailed(e.to_string()))
}

/// Console output goes to stderr; stdout belongs to whoever runs the agent.
pub(crate) fn output_layer(cfg: &LoggerConfig) -> Result<Output, LoggerError> {
    let layer: Output = match cfg.format {
        LoggerFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(cfg.use_color)
            .with_target(cfg.with_targets)
            .with_timer(mk_timer())
            .boxed(),
        // task spans carry task_id; keep them on every line, flat
        LoggerFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .with_target(cfg.with_targets)
            .with_timer(mk_timer())
            .boxed(),
        LoggerFormat::Journald => journald(&cfg.identifier)?,
    };
    Ok(layer)
}

pub(crate) fn mk_filter(level: &str, env: Option<&str>) -> Result<EnvFilter, LoggerError> {
    let directive = env.map(str::trim).filter(|d| !d.is_empty()).unwrap_or(level);
    EnvFilter::try_new(directive).map_err(|_| LoggerError::InvalidLogLevel(directive.to_string()))
}

fn mk_timer() -> OffsetTime<Rfc3339> {
    // must be read before any thread is spawned, see `time::UtcOffset`
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

/// Fields go out unprefixed, so `journalctl TASK_ID=<id>` selects one task.
#[cfg(all(target_os = "linux", feature = "journald"))]
fn journald(identifier: &str) -> Result<Output, LoggerError> {
    let layer = tracing_journald::layer()
        .map_err(|e| LoggerError::InitializationFailed(format!("journald: {e}")))?
        .with_syslog_identifier(identifier.to_string())
        .with_field_prefix(None);
    Ok(layer.boxed())
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn journald(_identifier: &str) -> Result<Output, LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}
