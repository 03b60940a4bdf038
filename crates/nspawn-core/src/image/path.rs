use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{config::ImagePath, image::error::ImageError, machine::MachineBus};

/// Locate `image` on the host.
///
/// Relative names are looked up below the working directory first; anything
/// not found on disk is asked for by name from the machine manager's image
/// registry.
pub async fn resolve_image_path(image: &str, bus: &dyn MachineBus) -> Result<ImagePath, ImageError> {
    let candidate = if Path::new(image).is_absolute() {
        PathBuf::from(image)
    } else {
        std::env::current_dir()
            .map_err(ImageError::io("current directory"))?
            .join(image)
    };

    if let Ok(meta) = tokio::fs::metadata(&candidate).await {
        debug!(image, path = %candidate.display(), "image found on disk");
        return Ok(classify(candidate, meta.is_dir()));
    }

    let props = bus
        .describe_image(image)
        .await
        .map_err(|source| ImageError::Locate {
            name: image.to_string(),
            source,
        })?;
    debug!(image, path = %props.path.display(), kind = %props.image_type, "image found in registry");

    let is_dir = matches!(props.image_type.as_str(), "directory" | "subvolume");
    Ok(classify(props.path, is_dir))
}

fn classify(path: PathBuf, is_dir: bool) -> ImagePath {
    if is_dir {
        ImagePath::Directory(path)
    } else {
        ImagePath::File(path)
    }
}
