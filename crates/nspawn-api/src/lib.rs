//! Local control surface of the container driver.
//!
//! [`ApiHandler`] is the driver contract as seen by an orchestrator;
//! [`DriverApiAdapter`] implements it on top of [`nspawn_core::Driver`] and
//! [`HttpApi`] serves any handler over HTTP.

mod error;
pub use error::ApiError;

mod handler;
pub use handler::{ApiHandler, PluginDescription, StartedTask};

mod adapter;
pub use adapter::DriverApiAdapter;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpApi;

#[cfg(feature = "http")]
pub use axum;
