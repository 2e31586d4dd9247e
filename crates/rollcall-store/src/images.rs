//! Reference-image directory: one image per identity, file stem is the
//! identity. Feeds encoding-database rebuilds.

use crate::photos::decode_rgb;
use image::RgbImage;
use rollcall_core::store::{ReferenceImageSource, StoreError};
use std::path::PathBuf;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct DirImageSource {
    dir: PathBuf,
}

impl DirImageSource {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Store a new reference image for an identity (written as `<id>.jpg`).
    pub fn put(&self, id: &str, img: &RgbImage) -> Result<(), StoreError> {
        img.save(self.dir.join(format!("{id}.jpg")))
            .map_err(|e| StoreError::Image(e.to_string()))?;
        Ok(())
    }

    /// Remove an identity's reference image, tolerating absence.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        for ext in IMAGE_EXTENSIONS {
            let path = self.dir.join(format!("{id}.{ext}"));
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl ReferenceImageSource for DirImageSource {
    fn list_images(&self) -> Result<Vec<(String, RgbImage)>, StoreError> {
        let mut images = Vec::new();

        let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        for path in entries {
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                continue;
            }
            let Some(identity) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_rgb(&path) {
                Ok(img) => images.push((identity.to_string(), img)),
                Err(err) => {
                    // A corrupt file loses its own enrollment, not the batch.
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable reference image");
                }
            }
        }

        Ok(images)
    }
}
