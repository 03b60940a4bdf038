//! Root file systems: nix builds, image downloads and image lookup.

mod download;
mod error;
mod nix;
mod path;
mod resolve;
mod tool;

pub use download::ImageDownloader;
pub use error::ImageError;
pub use nix::NixCli;
pub use path::resolve_image_path;
pub use resolve::{ImageResolver, ResolvedImage};
pub use tool::BuildTool;
