//! rollcall-store — concrete backends for the core's collaborator
//! contracts: SQLite student records, filesystem enrollment photos and
//! reference images, and encoding-database file persistence.

pub mod encodings_file;
pub mod images;
pub mod photos;
pub mod sqlite;

pub use encodings_file::{load_database, rebuild_and_save, save_database};
pub use images::DirImageSource;
pub use photos::DirPhotoStore;
pub use sqlite::SqliteRecordStore;
