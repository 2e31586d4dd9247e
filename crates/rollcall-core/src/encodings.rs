//! Encoding database — the known-identity embedding gallery.
//!
//! Rebuilt wholesale from the reference-image collection on every
//! enrollment change (an explicit O(n) cost at this scale) and swapped
//! atomically so in-flight matches never observe a torn database.

use crate::pipeline::{FaceDetector, FaceEncoder, PipelineError};
use crate::types::Embedding;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("no face found in reference image for {0}")]
    NoFaceFound(String),
    #[error("pipeline error for {identity}: {source}")]
    Pipeline {
        identity: String,
        source: PipelineError,
    },
}

/// Parallel sequences of embeddings and identities; index `i` in one
/// corresponds to index `i` in the other. Replaced wholesale, never
/// mutated in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncodingDatabase {
    pub embeddings: Vec<Embedding>,
    pub identities: Vec<String>,
}

impl EncodingDatabase {
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// A reference image that contributed no embedding during a rebuild.
#[derive(Debug)]
pub struct RebuildSkip {
    pub identity: String,
    pub error: EncodingError,
}

/// Rebuild the encoding database from reference images.
///
/// Computes exactly one embedding per image: faces are detected on the
/// full-resolution image and the first detected face wins. An image with
/// zero faces (or a failing encode) is skipped and reported — the batch
/// never aborts for one bad enrollment photo.
pub fn rebuild(
    images: &[(String, RgbImage)],
    detector: &mut dyn FaceDetector,
    encoder: &mut dyn FaceEncoder,
) -> (EncodingDatabase, Vec<RebuildSkip>) {
    let mut db = EncodingDatabase::default();
    let mut skipped = Vec::new();

    for (identity, img) in images {
        let (width, height) = img.dimensions();
        let faces = match detector.detect(img.as_raw(), width, height) {
            Ok(faces) => faces,
            Err(source) => {
                skipped.push(RebuildSkip {
                    identity: identity.clone(),
                    error: EncodingError::Pipeline {
                        identity: identity.clone(),
                        source,
                    },
                });
                continue;
            }
        };

        let Some(face) = faces.first() else {
            tracing::warn!(identity = %identity, "reference image has no detectable face, skipping");
            skipped.push(RebuildSkip {
                identity: identity.clone(),
                error: EncodingError::NoFaceFound(identity.clone()),
            });
            continue;
        };

        match encoder.encode(img.as_raw(), width, height, face) {
            Ok(embedding) => {
                db.embeddings.push(embedding);
                db.identities.push(identity.clone());
            }
            Err(source) => {
                skipped.push(RebuildSkip {
                    identity: identity.clone(),
                    error: EncodingError::Pipeline {
                        identity: identity.clone(),
                        source,
                    },
                });
            }
        }
    }

    tracing::info!(
        enrolled = db.len(),
        skipped = skipped.len(),
        "encoding database rebuilt"
    );
    (db, skipped)
}

/// Shared handle to the current encoding database.
///
/// Any number of streams read a consistent snapshot while matching;
/// enrollment installs a freshly rebuilt database by swapping the `Arc`.
#[derive(Default)]
pub struct SharedDatabase {
    inner: RwLock<Arc<EncodingDatabase>>,
}

impl SharedDatabase {
    pub fn new(db: EncodingDatabase) -> Self {
        Self {
            inner: RwLock::new(Arc::new(db)),
        }
    }

    /// Current database snapshot. Holds no lock after returning.
    pub fn snapshot(&self) -> Arc<EncodingDatabase> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Install a new database. Readers holding the previous snapshot keep
    /// a valid (stale) view until their next `snapshot()` call.
    pub fn swap(&self, db: EncodingDatabase) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(db);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{StubDetector, StubEncoder};
    use crate::types::BoundingBox;

    fn blank_image() -> RgbImage {
        RgbImage::new(64, 48)
    }

    fn one_face() -> Vec<BoundingBox> {
        vec![BoundingBox {
            x: 8.0,
            y: 8.0,
            width: 16.0,
            height: 16.0,
            confidence: 0.99,
        }]
    }

    #[test]
    fn test_rebuild_parallel_sequences() {
        let images = vec![
            ("alice".to_string(), blank_image()),
            ("bob".to_string(), blank_image()),
        ];
        let mut detector = StubDetector::always(one_face());
        let mut encoder = StubEncoder::constant(vec![0.5; 4]);

        let (db, skipped) = rebuild(&images, &mut detector, &mut encoder);
        assert!(skipped.is_empty());
        assert_eq!(db.len(), 2);
        assert_eq!(db.embeddings.len(), db.identities.len());
        assert_eq!(db.identities, vec!["alice", "bob"]);
    }

    #[test]
    fn test_rebuild_skips_faceless_image() {
        let images = vec![
            ("alice".to_string(), blank_image()),
            ("ghost".to_string(), blank_image()),
        ];
        // First image yields a face, second yields none.
        let mut detector = StubDetector::per_frame(vec![one_face(), vec![]]);
        let mut encoder = StubEncoder::constant(vec![0.5; 4]);

        let (db, skipped) = rebuild(&images, &mut detector, &mut encoder);
        assert_eq!(db.len(), 1);
        assert_eq!(db.identities, vec!["alice"]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].identity, "ghost");
        assert!(matches!(skipped[0].error, EncodingError::NoFaceFound(_)));
    }

    #[test]
    fn test_serde_round_trip_preserves_matches() {
        let db = EncodingDatabase {
            embeddings: vec![
                Embedding { values: vec![1.0, 0.0, 0.0] },
                Embedding { values: vec![0.0, 1.0, 0.0] },
            ],
            identities: vec!["alice".into(), "bob".into()],
        };

        let json = serde_json::to_string(&db).unwrap();
        let restored: EncodingDatabase = serde_json::from_str(&json).unwrap();

        for probe in &db.embeddings {
            let before = crate::matcher::match_embedding(probe, &db, 0.6);
            let after = crate::matcher::match_embedding(probe, &restored, 0.6);
            assert_eq!(before, after);
        }
    }

    #[test]
    fn test_shared_database_swap() {
        let shared = SharedDatabase::new(EncodingDatabase::default());
        let before = shared.snapshot();
        assert!(before.is_empty());

        shared.swap(EncodingDatabase {
            embeddings: vec![Embedding { values: vec![1.0] }],
            identities: vec!["alice".into()],
        });

        // The old snapshot stays valid, the new one sees the swap.
        assert!(before.is_empty());
        assert_eq!(shared.snapshot().len(), 1);
    }
}
