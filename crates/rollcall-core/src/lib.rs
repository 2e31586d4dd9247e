//! rollcall-core — face-attendance pipeline.
//!
//! Consumes camera frames, detects and identifies faces against a known
//! encoding database, and drives the per-stream attendance state machine
//! that decides when a student is marked present.

pub mod encodings;
pub mod ledger;
pub mod matcher;
pub mod onnx;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod types;

pub use encodings::{EncodingDatabase, SharedDatabase};
pub use ledger::{AttendanceLedger, SessionRegistry};
pub use matcher::match_embedding;
pub use pipeline::{FaceDetector, FaceEncoder, FramePipeline};
pub use session::SessionState;
pub use types::{BoundingBox, Detection, Embedding, MatchResult, StudentRecord};
