mod config;
pub use config::{ImageDownload, MachineConfig};
