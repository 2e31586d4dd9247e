//! Per-stream attendance state machine.
//!
//! One `SessionState` per active video stream, mutated exactly once per
//! frame. Detections only gate the exit from Scanning; a committed dwell
//! sequence always runs to completion so the viewer sees feedback for a
//! minimum duration.

use crate::encodings::EncodingDatabase;
use crate::ledger::AttendanceLedger;
use crate::matcher::match_embedding;
use crate::store::PhotoStore;
use crate::types::{BoundingBox, Detection, StudentRecord};
use chrono::NaiveDateTime;
use image::RgbImage;
use serde::Serialize;

/// Frames of detailed profile display before the hint switches to summary.
pub const DWELL_DETAIL_FRAMES: u32 = 5;
/// Total profile dwell in frames before the session returns to Scanning.
pub const DWELL_TOTAL_FRAMES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    Scanning,
    /// Intra-frame transition only: verification resolves to a display
    /// state within the same `advance` call, so this mode is never the
    /// standing mode of a returned decision.
    Verifying,
    RejectDisplay,
    AlreadyMarkedDisplay,
    ProfileDisplay,
}

/// What the overlay renderer should show during profile dwell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RenderHint {
    /// Full profile fields: name, major, id, standing, attendance count, photo.
    Detailed,
    /// Extended/summary card for the tail of the dwell.
    Summary,
}

/// Transient read copy of the verified student, held for the dwell only.
#[derive(Debug, Clone)]
pub struct ActiveProfile {
    pub record: StudentRecord,
    pub photo: Option<RgbImage>,
}

/// Read-only per-frame outputs for the overlay renderer.
#[derive(Debug, Clone)]
pub struct FrameDecision {
    pub mode: Mode,
    pub dwell: u32,
    pub hint: Option<RenderHint>,
    /// Full-frame bounding boxes of every face in this frame.
    pub boxes: Vec<BoundingBox>,
}

/// Mutable state for one video stream. Exclusively owned by its stream;
/// destroyed when the stream ends.
pub struct SessionState {
    mode: Mode,
    dwell: u32,
    active_identity: Option<String>,
    active_profile: Option<ActiveProfile>,
    tolerance: f32,
}

impl SessionState {
    pub fn new(tolerance: f32) -> Self {
        Self {
            mode: Mode::Scanning,
            dwell: 0,
            active_identity: None,
            active_profile: None,
            tolerance,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn dwell(&self) -> u32 {
        self.dwell
    }

    pub fn active_identity(&self) -> Option<&str> {
        self.active_identity.as_deref()
    }

    pub fn active_profile(&self) -> Option<&ActiveProfile> {
        self.active_profile.as_ref()
    }

    /// Consume one frame's detections and advance the machine.
    ///
    /// Store failures never escape: a failed verification is logged and the
    /// session stays in Scanning with nothing advanced.
    pub fn advance(
        &mut self,
        detections: &[Detection],
        db: &EncodingDatabase,
        ledger: &AttendanceLedger,
        photos: &dyn PhotoStore,
        now: NaiveDateTime,
    ) -> FrameDecision {
        let boxes: Vec<BoundingBox> = detections.iter().map(|d| d.bbox.clone()).collect();

        match self.mode {
            Mode::ProfileDisplay => {
                if self.dwell >= DWELL_TOTAL_FRAMES {
                    // Dwell complete: back to Scanning. This frame's
                    // detections are not re-evaluated.
                    self.reset();
                } else {
                    self.dwell += 1;
                }
            }
            Mode::RejectDisplay | Mode::AlreadyMarkedDisplay => {
                // Single-frame flash states: the very next frame returns
                // evaluation to Scanning.
                self.reset();
                self.scan(detections, db, ledger, photos, now);
            }
            Mode::Scanning | Mode::Verifying => {
                self.scan(detections, db, ledger, photos, now);
            }
        }

        FrameDecision {
            mode: self.mode,
            dwell: self.dwell,
            hint: self.render_hint(),
            boxes,
        }
    }

    fn render_hint(&self) -> Option<RenderHint> {
        match self.mode {
            Mode::ProfileDisplay if self.dwell <= DWELL_DETAIL_FRAMES => Some(RenderHint::Detailed),
            Mode::ProfileDisplay => Some(RenderHint::Summary),
            _ => None,
        }
    }

    /// Scanning evaluation: match every detection, flash a rejection, or
    /// enter verification for an accepted identity.
    fn scan(
        &mut self,
        detections: &[Detection],
        db: &EncodingDatabase,
        ledger: &AttendanceLedger,
        photos: &dyn PhotoStore,
        now: NaiveDateTime,
    ) {
        if detections.is_empty() {
            return;
        }

        let results: Vec<_> = detections
            .iter()
            .map(|d| match_embedding(&d.embedding, db, self.tolerance))
            .collect();

        // A rejection anywhere in the frame wins over an acceptance.
        if results.iter().any(|r| !r.accepted) {
            tracing::debug!("unknown face in frame, flashing rejection");
            self.mode = Mode::RejectDisplay;
            self.dwell = 0;
            return;
        }

        let Some(identity) = results.iter().find_map(|r| r.identity.clone()) else {
            return;
        };

        self.verify(&identity, ledger, photos, now);
    }

    /// Verification: debounced ledger write, then profile or already-marked
    /// display.
    fn verify(
        &mut self,
        identity: &str,
        ledger: &AttendanceLedger,
        photos: &dyn PhotoStore,
        now: NaiveDateTime,
    ) {
        self.mode = Mode::Verifying;

        let outcome = match ledger.record_if_due(identity, now) {
            Ok(outcome) => outcome,
            Err(err) => {
                // Well-defined fallback: treat as not due, keep scanning.
                tracing::warn!(identity, error = %err, "verification store failure, staying in Scanning");
                self.reset();
                return;
            }
        };

        if !outcome.written {
            tracing::info!(identity, elapsed = ?outcome.elapsed_secs, "already marked within window");
            ledger.registry().mark(identity);
            self.mode = Mode::AlreadyMarkedDisplay;
            self.dwell = 0;
            self.active_identity = Some(identity.to_string());
            return;
        }

        let photo = match photos.get(identity) {
            Ok(photo) => photo,
            Err(err) => {
                tracing::warn!(identity, error = %err, "enrollment photo unavailable");
                None
            }
        };

        self.active_identity = Some(identity.to_string());
        self.active_profile = Some(ActiveProfile {
            record: outcome.record,
            photo,
        });
        self.mode = Mode::ProfileDisplay;
        self.dwell = 1;
    }

    fn reset(&mut self) {
        self.mode = Mode::Scanning;
        self.dwell = 0;
        self.active_identity = None;
        self.active_profile = None;
    }
}
