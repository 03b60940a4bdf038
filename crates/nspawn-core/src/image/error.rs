use std::io;

use thiserror::Error;

use crate::machine::MachineError;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("unexpected output of {command}: {reason}")]
    Output { command: String, reason: String },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("build of {target} failed: {source}")]
    Build {
        target: String,
        #[source]
        source: Box<ImageError>,
    },
    #[error("couldn't determine requisites of {path}: {source}")]
    Requisites {
        path: String,
        #[source]
        source: Box<ImageError>,
    },
    #[error("failed to locate image {name:?}: {source}")]
    Locate {
        name: String,
        #[source]
        source: MachineError,
    },
    #[error("failed to download image: {0}")]
    Download(#[source] MachineError),
}

impl ImageError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| ImageError::Io { context, source }
    }

    pub(crate) fn build(target: impl Into<String>) -> impl FnOnce(Self) -> Self {
        let target = target.into();
        move |source| ImageError::Build {
            target,
            source: Box::new(source),
        }
    }
}
