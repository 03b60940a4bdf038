//! Plain data model shared by the container driver crates.
//!
//! Nothing in here talks to the host: these are the values that cross the
//! boundary between the orchestrator, the driver and the execution facility.

mod domain;
pub use domain::*;

mod machine;
pub use machine::*;
