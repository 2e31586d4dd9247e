use serde::{Deserialize, Serialize};

/// Dimension of a face embedding (dlib-style 128-d vectors).
pub const EMBEDDING_DIM: usize = 128;

/// Bounding box for a detected face, in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Scale all coordinates by a uniform factor. Used to map boxes found
    /// on the downsampled frame back into full-frame space.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
        }
    }
}

/// Face embedding vector, fixed length [`EMBEDDING_DIM`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Compute Euclidean distance between two embeddings.
    /// Lower = more similar; iterates all dimensions.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found in a single frame: its full-frame bounding box and the
/// embedding computed from the downsampled image. Ephemeral — lives for
/// one frame's processing only.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Result of matching one detection against the encoding database.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Identity of the nearest neighbor, if it passed the accept threshold.
    pub identity: Option<String>,
    pub accepted: bool,
    /// Distance to the nearest neighbor; `None` when the database is empty.
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            identity: None,
            accepted: false,
            distance: None,
        }
    }
}

/// Student record as persisted in the record store. The core only ever
/// reads full records and writes `total_attendance` / `last_attendance_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub name: String,
    pub major: String,
    pub starting_year: i32,
    pub total_attendance: u32,
    pub standing: String,
    pub year: i32,
    /// `"%Y-%m-%d %H:%M:%S"` local time; `None` for a never-marked student.
    pub last_attendance_time: Option<String>,
}
