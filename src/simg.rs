//
// simg.rs
// xnat2bids-launcher
//
// Picks the xnat-tools Singularity image: the configured version, or the newest one on disk.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::ConfigError;

const IMAGE_PREFIX: &str = "xnat-tools-";
const IMAGE_SUFFIX: &str = ".sif";

/// Image path for `version`, or the most recently created image when no version is set.
pub fn resolve_image(simg_dir: &Path, version: Option<&str>) -> Result<PathBuf, ConfigError> {
    match version.filter(|v| !v.is_empty()) {
        Some(version) => {
            let path = simg_dir.join(format!("{}{}{}", IMAGE_PREFIX, version, IMAGE_SUFFIX));
            if path.is_file() {
                Ok(path)
            } else {
                Err(ConfigError::Image {
                    dir: simg_dir.to_path_buf(),
                    reason: format!("version {} is not installed", version),
                })
            }
        }
        None => {
            let path = latest_image(simg_dir)?;
            tracing::info!(image = %path.display(), "using latest xnat-tools image");
            Ok(path)
        }
    }
}

/// Version encoded in an image file name: `xnat-tools-1.4.2.sif` -> `1.4.2`.
pub fn image_version(path: &Path) -> Option<&str> {
    path.file_name()?
        .to_str()?
        .strip_prefix(IMAGE_PREFIX)?
        .strip_suffix(IMAGE_SUFFIX)
}

fn latest_image(simg_dir: &Path) -> Result<PathBuf, ConfigError> {
    let images: Vec<(SystemTime, PathBuf)> = WalkDir::new(simg_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && image_version(e.path()).is_some())
        .filter_map(|e| {
            let metadata = e.metadata().ok()?;
            let stamp = metadata.created().or_else(|_| metadata.modified()).ok()?;
            Some((stamp, e.into_path()))
        })
        .collect();

    images
        .into_iter()
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
        .ok_or_else(|| ConfigError::Image {
            dir: simg_dir.to_path_buf(),
            reason: format!("no {}*{} files", IMAGE_PREFIX, IMAGE_SUFFIX),
        })
}
