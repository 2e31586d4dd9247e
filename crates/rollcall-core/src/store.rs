//! Narrow contracts for the external collaborators: the persistent student
//! record store, the enrollment-photo blob store, and the reference-image
//! source that feeds encoding rebuilds.

use crate::types::StudentRecord;
use image::RgbImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("image error: {0}")]
    Image(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Keyed student-record store. The attendance core only ever reads full
/// records and writes the two attendance fields.
pub trait RecordStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<StudentRecord>, StoreError>;
    fn set(&self, record: &StudentRecord) -> Result<(), StoreError>;
    fn update_attendance(
        &self,
        id: &str,
        total_attendance: u32,
        last_attendance_time: &str,
    ) -> Result<(), StoreError>;
    fn delete(&self, id: &str) -> Result<(), StoreError>;
    fn list_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// Per-identity enrollment photo, shown during profile display.
pub trait PhotoStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<RgbImage>, StoreError>;
    fn put(&self, id: &str, photo: &RgbImage) -> Result<(), StoreError>;
    fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// One reference image per identity, keyed by identity-derived filename.
pub trait ReferenceImageSource {
    fn list_images(&self) -> Result<Vec<(String, RgbImage)>, StoreError>;
}

/// In-memory record store. Stands in for the persistent backend in tests
/// and store-less demo runs, the same role the original deployment's mock
/// database filled.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, StudentRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = StudentRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.lock().unwrap();
            for record in records {
                map.insert(record.id.clone(), record);
            }
        }
        store
    }

    /// Make subsequent writes fail with a backend error. Lets tests drive
    /// the "store failure must not crash the frame loop" path.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Backend("write refused".into()))
        } else {
            Ok(())
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, id: &str) -> Result<Option<StudentRecord>, StoreError> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    fn set(&self, record: &StudentRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn update_attendance(
        &self,
        id: &str,
        total_attendance: u32,
        last_attendance_time: &str,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.total_attendance = total_attendance;
        record.last_attendance_time = Some(last_attendance_time.to_string());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.records.lock().unwrap().remove(id);
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.records.lock().unwrap().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// In-memory photo store counterpart of [`MemoryRecordStore`].
#[derive(Default)]
pub struct MemoryPhotoStore {
    photos: Mutex<HashMap<String, RgbImage>>,
}

impl MemoryPhotoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PhotoStore for MemoryPhotoStore {
    fn get(&self, id: &str) -> Result<Option<RgbImage>, StoreError> {
        Ok(self.photos.lock().unwrap().get(id).cloned())
    }

    fn put(&self, id: &str, photo: &RgbImage) -> Result<(), StoreError> {
        self.photos
            .lock()
            .unwrap()
            .insert(id.to_string(), photo.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.photos.lock().unwrap().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> StudentRecord {
        StudentRecord {
            id: id.into(),
            name: "Test Student".into(),
            major: "Physics".into(),
            starting_year: 2023,
            total_attendance: 0,
            standing: "Good".into(),
            year: 2,
            last_attendance_time: None,
        }
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryRecordStore::new();
        store.set(&record("s1")).unwrap();
        assert_eq!(store.get("s1").unwrap().unwrap().name, "Test Student");
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_update_attendance_writes_both_fields() {
        let store = MemoryRecordStore::with_records([record("s1")]);
        store
            .update_attendance("s1", 7, "2026-03-01 09:00:00")
            .unwrap();
        let updated = store.get("s1").unwrap().unwrap();
        assert_eq!(updated.total_attendance, 7);
        assert_eq!(
            updated.last_attendance_time.as_deref(),
            Some("2026-03-01 09:00:00")
        );
    }

    #[test]
    fn test_update_attendance_missing_record() {
        let store = MemoryRecordStore::new();
        let result = store.update_attendance("nobody", 1, "2026-03-01 09:00:00");
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_fail_writes() {
        let store = MemoryRecordStore::with_records([record("s1")]);
        store.set_fail_writes(true);
        assert!(store
            .update_attendance("s1", 1, "2026-03-01 09:00:00")
            .is_err());
        // Reads still work.
        assert!(store.get("s1").unwrap().is_some());
    }

    #[test]
    fn test_list_ids_sorted() {
        let store = MemoryRecordStore::with_records([record("b"), record("a"), record("c")]);
        assert_eq!(store.list_ids().unwrap(), vec!["a", "b", "c"]);
    }
}
