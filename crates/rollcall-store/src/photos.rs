//! Filesystem enrollment-photo store: one `<id>.jpg` per identity.

use image::RgbImage;
use rollcall_core::store::{PhotoStore, StoreError};
use std::path::{Path, PathBuf};

pub struct DirPhotoStore {
    dir: PathBuf,
}

impl DirPhotoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.jpg"))
    }
}

impl PhotoStore for DirPhotoStore {
    fn get(&self, id: &str) -> Result<Option<RgbImage>, StoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let img = image::open(&path).map_err(|e| StoreError::Image(e.to_string()))?;
        Ok(Some(img.to_rgb8()))
    }

    fn put(&self, id: &str, photo: &RgbImage) -> Result<(), StoreError> {
        photo
            .save(self.path_for(id))
            .map_err(|e| StoreError::Image(e.to_string()))?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Shared helper for photo and reference-image stores: decode a file the
/// `image` crate recognizes into RGB.
pub(crate) fn decode_rgb(path: &Path) -> Result<RgbImage, StoreError> {
    Ok(image::open(path)
        .map_err(|e| StoreError::Image(format!("{}: {e}", path.display())))?
        .to_rgb8())
}
