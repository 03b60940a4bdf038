//! Container configuration: validation of the user's block and translation
//! into the supervisor's argument vector.

mod args;
mod build;
mod error;
mod options;
mod validate;

pub use build::{BuildOptions, ContainerConfig, DownloadSpec, ImagePath, sanitize_name};
pub use error::ConfigError;
pub use options::{Console, ImageKind, LinkJournal, ResolvConf, Verify, Volatile};
pub use validate::validate;
