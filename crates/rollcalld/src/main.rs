use anyhow::{Context, Result};
use rollcall_core::encodings::SharedDatabase;
use rollcall_core::ledger::{AttendanceLedger, SessionRegistry};
use rollcall_core::onnx::{OnnxFaceDetector, OnnxFaceEncoder};
use rollcall_core::pipeline::FramePipeline;
use rollcall_core::session::Mode;
use rollcall_core::store::{PhotoStore, RecordStore};
use rollcall_hw::Camera;
use rollcall_store::{load_database, rebuild_and_save, DirImageSource, DirPhotoStore, SqliteRecordStore};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

mod config;
mod stream;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");
    let config = Config::from_env();

    let store: Arc<dyn RecordStore> = Arc::new(
        SqliteRecordStore::open(&config.db_path).context("opening student database")?,
    );
    let photos: Arc<dyn PhotoStore> =
        Arc::new(DirPhotoStore::new(&config.photos_dir).context("opening photo store")?);
    let images = DirImageSource::new(&config.images_dir).context("opening reference images")?;

    let registry = Arc::new(SessionRegistry::new());
    let ledger = Arc::new(AttendanceLedger::new(store, registry));

    let mut detector = OnnxFaceDetector::load(&config.detector_model_path())
        .context("loading detection model")?;
    let mut encoder = OnnxFaceEncoder::load(&config.encoder_model_path())
        .context("loading embedding model")?;

    // Load the persisted encoding database; rebuild from reference images
    // when it does not exist yet.
    let db = match load_database(&config.encodings_path) {
        Ok(db) => {
            tracing::info!(entries = db.len(), "encoding database loaded");
            db
        }
        Err(err) => {
            tracing::warn!(error = %err, "no usable encodings file, rebuilding");
            let (db, skipped) =
                rebuild_and_save(&images, &mut detector, &mut encoder, &config.encodings_path)
                    .context("rebuilding encoding database")?;
            for skip in &skipped {
                tracing::warn!(identity = %skip.identity, error = %skip.error, "enrollment image skipped");
            }
            db
        }
    };
    let database = Arc::new(SharedDatabase::new(db));

    let camera = Camera::open(&config.camera_device).context("opening camera")?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        "camera ready"
    );

    let pipeline = FramePipeline::new(detector, encoder);
    let mut handle = stream::spawn_stream(
        camera,
        pipeline,
        database.clone(),
        ledger,
        photos,
        config.match_tolerance,
    );

    // SIGHUP = "encoding database changed, reload".
    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let mut last_mode = Mode::Scanning;

    loop {
        tokio::select! {
            update = handle.next_update() => {
                let Some(update) = update else {
                    tracing::info!("stream ended");
                    break;
                };
                if update.mode != last_mode {
                    tracing::info!(
                        from = ?last_mode,
                        to = ?update.mode,
                        identity = update.profile.as_ref().map(|p| p.id.as_str()),
                        "session transition"
                    );
                    last_mode = update.mode;
                }
            }
            _ = hangup.recv() => {
                match load_database(&config.encodings_path) {
                    Ok(db) => {
                        tracing::info!(entries = db.len(), "encoding database reloaded");
                        database.swap(db);
                    }
                    Err(err) => tracing::error!(error = %err, "encoding reload failed, keeping current database"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("rollcalld shutting down");
                break;
            }
        }
    }

    Ok(())
}
