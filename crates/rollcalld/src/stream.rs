//! Per-stream frame loop.
//!
//! One dedicated OS thread runs the whole sequential pipeline for a
//! stream — capture, detect, match, state transition — and hands a
//! renderer-facing `FrameUpdate` per frame to async consumers over a
//! bounded channel. Dropping the handle cancels the stream; the first
//! capture failure ends it.

use chrono::Local;
use rollcall_core::encodings::SharedDatabase;
use rollcall_core::ledger::AttendanceLedger;
use rollcall_core::pipeline::{FaceDetector, FaceEncoder, FramePipeline};
use rollcall_core::session::{Mode, RenderHint, SessionState};
use rollcall_core::store::PhotoStore;
use rollcall_core::types::{BoundingBox, StudentRecord};
use rollcall_hw::FrameSource;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Profile fields surfaced to the overlay renderer during dwell.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    pub id: String,
    pub name: String,
    pub major: String,
    pub standing: String,
    pub year: i32,
    pub starting_year: i32,
    pub total_attendance: u32,
}

impl From<&StudentRecord> for ProfileView {
    fn from(record: &StudentRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            major: record.major.clone(),
            standing: record.standing.clone(),
            year: record.year,
            starting_year: record.starting_year,
            total_attendance: record.total_attendance,
        }
    }
}

/// One frame's renderer-facing snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct FrameUpdate {
    pub sequence: u32,
    pub mode: Mode,
    pub dwell: u32,
    pub hint: Option<RenderHint>,
    pub profile: Option<ProfileView>,
    pub boxes: Vec<BoundingBox>,
}

/// Async handle to a running stream.
pub struct StreamHandle {
    updates: mpsc::Receiver<FrameUpdate>,
}

impl StreamHandle {
    /// Next per-frame update; `None` once the stream has ended.
    pub async fn next_update(&mut self) -> Option<FrameUpdate> {
        self.updates.recv().await
    }
}

/// Spawn the stream loop on a dedicated OS thread.
///
/// The loop owns its `SessionState`; the encoding database is snapshotted
/// per frame so enrollment swaps never tear mid-match.
pub fn spawn_stream<S, D, E>(
    mut source: S,
    mut pipeline: FramePipeline<D, E>,
    database: Arc<SharedDatabase>,
    ledger: Arc<AttendanceLedger>,
    photos: Arc<dyn PhotoStore>,
    tolerance: f32,
) -> StreamHandle
where
    S: FrameSource + Send + 'static,
    D: FaceDetector + Send + 'static,
    E: FaceEncoder + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<FrameUpdate>(4);

    std::thread::Builder::new()
        .name("rollcall-stream".into())
        .spawn(move || {
            tracing::info!("stream started");
            let mut session = SessionState::new(tolerance);

            loop {
                let frame = match source.next_frame() {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::info!(error = %err, "capture failed, ending stream");
                        break;
                    }
                };

                let Some(img) = frame.to_image() else {
                    tracing::warn!(sequence = frame.sequence, "undecodable frame, ending stream");
                    break;
                };

                let detections = match pipeline.process(&img) {
                    Ok(detections) => detections,
                    Err(err) => {
                        tracing::error!(error = %err, "pipeline failed, ending stream");
                        break;
                    }
                };

                let snapshot = database.snapshot();
                let now = Local::now().naive_local();
                let decision =
                    session.advance(&detections, &snapshot, &ledger, photos.as_ref(), now);

                let update = FrameUpdate {
                    sequence: frame.sequence,
                    mode: decision.mode,
                    dwell: decision.dwell,
                    hint: decision.hint,
                    profile: session.active_profile().map(|p| ProfileView::from(&p.record)),
                    boxes: decision.boxes,
                };

                // Receiver gone means the stream was cancelled.
                if tx.blocking_send(update).is_err() {
                    tracing::info!("consumer dropped, stopping stream");
                    break;
                }
            }
            tracing::info!("stream loop exiting");
        })
        .expect("failed to spawn stream thread");

    StreamHandle { updates: rx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use rollcall_core::encodings::EncodingDatabase;
    use rollcall_core::ledger::SessionRegistry;
    use rollcall_core::pipeline::testing::{StubDetector, StubEncoder};
    use rollcall_core::store::{MemoryPhotoStore, MemoryRecordStore, RecordStore};
    use rollcall_core::types::Embedding;
    use rollcall_hw::camera::CameraError;
    use rollcall_hw::Frame;

    /// Frame source that yields a fixed number of blank frames then fails.
    struct ScriptedSource {
        remaining: usize,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            if self.remaining == 0 {
                return Err(CameraError::EndOfStream);
            }
            self.remaining -= 1;
            let img = RgbImage::new(640, 480);
            Ok(Frame {
                data: img.into_raw(),
                width: 640,
                height: 480,
                timestamp: std::time::Instant::now(),
                sequence: self.remaining as u32,
            })
        }
    }

    fn known_db() -> EncodingDatabase {
        EncodingDatabase {
            embeddings: vec![Embedding { values: vec![0.0; 4] }],
            identities: vec!["a".into()],
        }
    }

    fn student_a() -> StudentRecord {
        StudentRecord {
            id: "a".into(),
            name: "Student A".into(),
            major: "Art".into(),
            starting_year: 2025,
            total_attendance: 0,
            standing: "Good".into(),
            year: 1,
            last_attendance_time: None,
        }
    }

    fn face() -> BoundingBox {
        BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 30.0,
            height: 30.0,
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn test_stream_marks_and_ends() {
        // One frame with a known face, two idle frames, then the source
        // fails and the stream ends.
        let source = ScriptedSource { remaining: 3 };
        let detector = StubDetector::per_frame(vec![vec![face()], vec![], vec![]]);
        let encoder = StubEncoder::constant(vec![0.0; 4]);
        let pipeline = FramePipeline::new(detector, encoder);

        let store = Arc::new(MemoryRecordStore::with_records([student_a()]));
        let ledger = Arc::new(AttendanceLedger::new(
            store.clone(),
            Arc::new(SessionRegistry::new()),
        ));
        let photos: Arc<dyn PhotoStore> = Arc::new(MemoryPhotoStore::new());
        let database = Arc::new(SharedDatabase::new(known_db()));

        let mut handle = spawn_stream(source, pipeline, database, ledger, photos, 0.6);

        let first = handle.next_update().await.unwrap();
        assert_eq!(first.mode, Mode::ProfileDisplay);
        assert_eq!(first.dwell, 1);
        assert_eq!(first.boxes.len(), 1);
        let profile = first.profile.unwrap();
        assert_eq!(profile.id, "a");
        assert_eq!(profile.total_attendance, 1);

        // Dwell continues through the idle frames.
        let second = handle.next_update().await.unwrap();
        assert_eq!(second.mode, Mode::ProfileDisplay);
        assert_eq!(second.dwell, 2);
        assert!(second.boxes.is_empty());

        let third = handle.next_update().await.unwrap();
        assert_eq!(third.mode, Mode::ProfileDisplay);

        // Capture failure ends the stream: channel closes.
        assert!(handle.next_update().await.is_none());

        // Exactly one ledger write happened.
        assert_eq!(store.get("a").unwrap().unwrap().total_attendance, 1);
    }

    #[tokio::test]
    async fn test_idle_stream_stays_scanning() {
        let source = ScriptedSource { remaining: 4 };
        let detector = StubDetector::always(vec![]);
        let encoder = StubEncoder::constant(vec![0.0; 4]);
        let pipeline = FramePipeline::new(detector, encoder);

        let store = Arc::new(MemoryRecordStore::with_records([student_a()]));
        let ledger = Arc::new(AttendanceLedger::new(
            store.clone(),
            Arc::new(SessionRegistry::new()),
        ));
        let photos: Arc<dyn PhotoStore> = Arc::new(MemoryPhotoStore::new());
        let database = Arc::new(SharedDatabase::new(known_db()));

        let mut handle = spawn_stream(source, pipeline, database, ledger, photos, 0.6);

        for _ in 0..4 {
            let update = handle.next_update().await.unwrap();
            assert_eq!(update.mode, Mode::Scanning);
            assert!(update.profile.is_none());
        }
        assert!(handle.next_update().await.is_none());
    }

    #[tokio::test]
    async fn test_database_swap_picked_up_mid_stream() {
        // Stream starts with an empty database: the face only ever flashes
        // rejections. After the swap, later frames verify the same face.
        // The channel is bounded, so frames near the end of the script are
        // guaranteed to be processed after the swap below.
        let source = ScriptedSource { remaining: 8 };
        let detector = StubDetector::always(vec![face()]);
        let encoder = StubEncoder::constant(vec![0.0; 4]);
        let pipeline = FramePipeline::new(detector, encoder);

        let store = Arc::new(MemoryRecordStore::with_records([student_a()]));
        let ledger = Arc::new(AttendanceLedger::new(
            store.clone(),
            Arc::new(SessionRegistry::new()),
        ));
        let photos: Arc<dyn PhotoStore> = Arc::new(MemoryPhotoStore::new());
        let database = Arc::new(SharedDatabase::new(EncodingDatabase::default()));

        let mut handle = spawn_stream(
            source,
            pipeline,
            database.clone(),
            ledger,
            photos,
            0.6,
        );

        let first = handle.next_update().await.unwrap();
        assert_eq!(first.mode, Mode::RejectDisplay);

        database.swap(known_db());

        let mut saw_profile = false;
        while let Some(update) = handle.next_update().await {
            if update.mode == Mode::ProfileDisplay {
                saw_profile = true;
            }
        }
        assert!(saw_profile, "swapped database never produced a match");
        assert_eq!(store.get("a").unwrap().unwrap().total_attendance, 1);
    }
}
