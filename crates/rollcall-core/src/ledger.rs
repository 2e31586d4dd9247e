//! Attendance ledger — the debounce/record-write policy.
//!
//! One write per identity per 60-second window, with a serialized
//! read-modify-write so concurrent streams never lose an increment, plus
//! the process-lifetime "already marked" session sets used for admin
//! listing. The sets and the 60-second data debounce are deliberately
//! separate mechanisms.

use crate::store::{RecordStore, StoreError};
use crate::types::StudentRecord;
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Timestamp format persisted in `last_attendance_time` (local time,
/// second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Re-entry suppression window in whole seconds.
pub const DEBOUNCE_SECS: i64 = 60;

pub fn format_timestamp(t: NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
}

/// Which session set an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Student,
    Admin,
}

/// Process-wide "already marked this session" sets.
///
/// Append-only during normal operation; an explicit `clear` empties one
/// scope on administrator request. Unbounded growth is accepted at this
/// scale. Shared across all streams.
#[derive(Default)]
pub struct SessionRegistry {
    student: Mutex<HashSet<String>>,
    admin: Mutex<HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an identity seen inside the suppression window. Inserts into
    /// both scopes.
    pub fn mark(&self, identity: &str) {
        self.student.lock().unwrap().insert(identity.to_string());
        self.admin.lock().unwrap().insert(identity.to_string());
    }

    pub fn clear(&self, scope: Scope) {
        self.set(scope).lock().unwrap().clear();
    }

    /// Identities in one scope, sorted for stable listing.
    pub fn list(&self, scope: Scope) -> Vec<String> {
        let mut ids: Vec<String> = self.set(scope).lock().unwrap().iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, scope: Scope, identity: &str) -> bool {
        self.set(scope).lock().unwrap().contains(identity)
    }

    fn set(&self, scope: Scope) -> &Mutex<HashSet<String>> {
        match scope {
            Scope::Student => &self.student,
            Scope::Admin => &self.admin,
        }
    }
}

/// Outcome of a debounced attendance write.
#[derive(Debug, Clone)]
pub struct LedgerOutcome {
    pub written: bool,
    /// Record after the write (or unchanged when suppressed).
    pub record: StudentRecord,
    /// Whole seconds since the previous mark; `None` for a first mark.
    pub elapsed_secs: Option<i64>,
}

/// Debounced attendance writer over the record store.
pub struct AttendanceLedger {
    store: Arc<dyn RecordStore>,
    registry: Arc<SessionRegistry>,
    /// Serializes read-modify-write across streams; last-writer-wins is
    /// fine for the display sets but not for the attendance counter.
    write_lock: Mutex<()>,
}

impl AttendanceLedger {
    pub fn new(store: Arc<dyn RecordStore>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            store,
            registry,
            write_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Write an attendance mark unless one landed within the last
    /// [`DEBOUNCE_SECS`] seconds.
    ///
    /// On a due mark, increments `total_attendance` and stamps
    /// `last_attendance_time = now` in one serialized step. A missing
    /// record or any store failure surfaces to the caller; the caller
    /// decides what the session does with it.
    pub fn record_if_due(
        &self,
        identity: &str,
        now: NaiveDateTime,
    ) -> Result<LedgerOutcome, StoreError> {
        let _guard = self.write_lock.lock().unwrap();

        let mut record = self
            .store
            .get(identity)?
            .ok_or_else(|| StoreError::NotFound(identity.to_string()))?;

        let elapsed_secs = match record.last_attendance_time.as_deref() {
            Some(raw) => match parse_timestamp(raw) {
                Ok(last) => Some((now - last).num_seconds()),
                Err(err) => {
                    // An unreadable timestamp is treated as no prior mark.
                    tracing::warn!(identity, raw, error = %err, "unparseable last_attendance_time");
                    None
                }
            },
            None => None,
        };

        let due = match elapsed_secs {
            Some(elapsed) => elapsed > DEBOUNCE_SECS,
            None => true,
        };

        if !due {
            tracing::debug!(identity, ?elapsed_secs, "attendance suppressed, within window");
            return Ok(LedgerOutcome {
                written: false,
                record,
                elapsed_secs,
            });
        }

        let stamp = format_timestamp(now);
        let new_total = record.total_attendance + 1;
        self.store.update_attendance(identity, new_total, &stamp)?;

        record.total_attendance = new_total;
        record.last_attendance_time = Some(stamp);
        tracing::info!(identity, total = new_total, "attendance recorded");

        Ok(LedgerOutcome {
            written: true,
            record,
            elapsed_secs,
        })
    }
}
