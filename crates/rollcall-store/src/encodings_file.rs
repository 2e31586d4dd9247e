//! Encoding-database persistence as JSON, plus the rebuild-and-save step
//! the enrollment workflow runs after any change.

use rollcall_core::encodings::{self, EncodingDatabase, RebuildSkip};
use rollcall_core::pipeline::{FaceDetector, FaceEncoder};
use rollcall_core::store::{ReferenceImageSource, StoreError};
use std::path::Path;

/// Write the database to `path`, via a temp file so a crash mid-write
/// never leaves a truncated encodings file behind.
pub fn save_database(db: &EncodingDatabase, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json =
        serde_json::to_vec_pretty(db).map_err(|e| StoreError::Backend(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    tracing::info!(path = %path.display(), entries = db.len(), "encoding database saved");
    Ok(())
}

pub fn load_database(path: &Path) -> Result<EncodingDatabase, StoreError> {
    let raw = std::fs::read(path)?;
    let db: EncodingDatabase =
        serde_json::from_slice(&raw).map_err(|e| StoreError::Backend(e.to_string()))?;
    // The matcher indexes identities by embedding position, so a file with
    // mismatched lengths must never reach it.
    if db.embeddings.len() != db.identities.len() {
        return Err(StoreError::Backend(format!(
            "corrupt encodings file {}: {} embeddings but {} identities",
            path.display(),
            db.embeddings.len(),
            db.identities.len()
        )));
    }
    Ok(db)
}

/// Full rebuild from the reference-image source, persisted to `path`.
/// Explicitly O(n) in enrolled identities; every embedding is recomputed.
pub fn rebuild_and_save(
    source: &dyn ReferenceImageSource,
    detector: &mut dyn FaceDetector,
    encoder: &mut dyn FaceEncoder,
    path: &Path,
) -> Result<(EncodingDatabase, Vec<RebuildSkip>), StoreError> {
    let images = source.list_images()?;
    let (db, skipped) = encodings::rebuild(&images, detector, encoder);
    save_database(&db, path)?;
    Ok((db, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::DirImageSource;
    use image::RgbImage;
    use rollcall_core::pipeline::testing::{StubDetector, StubEncoder};
    use rollcall_core::types::{BoundingBox, Embedding};
    use tempfile::TempDir;

    fn db_fixture() -> EncodingDatabase {
        EncodingDatabase {
            embeddings: vec![Embedding { values: vec![0.25, -1.5, 3.0] }],
            identities: vec!["alice".into()],
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("encodings.json");

        let db = db_fixture();
        save_database(&db, &path).unwrap();
        let loaded = load_database(&path).unwrap();

        assert_eq!(loaded.identities, db.identities);
        assert_eq!(loaded.embeddings[0].values, db.embeddings[0].values);
        // No temp file left behind.
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_rejects_mismatched_lengths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("encodings.json");
        // Well-formed JSON, but two embeddings against one identity. Left
        // unchecked this would index out of bounds inside the matcher.
        std::fs::write(
            &path,
            r#"{"embeddings":[{"values":[0.0,0.0]},{"values":[1.0,1.0]}],"identities":["only-one"]}"#,
        )
        .unwrap();

        let result = load_database(&path);
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(load_database(&dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn test_rebuild_and_save_from_directory() {
        let dir = TempDir::new().unwrap();
        let source = DirImageSource::new(dir.path().join("refs")).unwrap();
        source.put("alice", &RgbImage::new(32, 32)).unwrap();
        source.put("bob", &RgbImage::new(32, 32)).unwrap();

        let mut detector = StubDetector::always(vec![BoundingBox {
            x: 4.0,
            y: 4.0,
            width: 8.0,
            height: 8.0,
            confidence: 0.9,
        }]);
        let mut encoder = StubEncoder::constant(vec![1.0; 4]);

        let path = dir.path().join("encodings.json");
        let (db, skipped) =
            rebuild_and_save(&source, &mut detector, &mut encoder, &path).unwrap();

        assert!(skipped.is_empty());
        assert_eq!(db.identities, vec!["alice", "bob"]);
        assert_eq!(load_database(&path).unwrap().len(), 2);
    }
}
