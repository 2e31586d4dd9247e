use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::onnx::{OnnxFaceDetector, OnnxFaceEncoder};
use rollcall_core::store::{PhotoStore, RecordStore};
use rollcall_core::types::StudentRecord;
use rollcall_store::{load_database, rebuild_and_save, DirImageSource, DirPhotoStore, SqliteRecordStore};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance enrollment CLI")]
struct Cli {
    /// Data directory (database, photos, reference images, encodings)
    #[arg(long, env = "ROLLCALL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory containing the ONNX model files
    #[arg(long, env = "ROLLCALL_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student: insert the record, store the reference image, and
    /// rebuild the encoding database
    Enroll {
        /// Student id (used as the identity everywhere)
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        major: String,
        #[arg(long)]
        starting_year: i32,
        #[arg(long, default_value = "Good")]
        standing: String,
        #[arg(long, default_value_t = 1)]
        year: i32,
        /// Path to the reference face image
        #[arg(long)]
        image: PathBuf,
    },
    /// Remove a student and rebuild the encoding database
    Remove { id: String },
    /// List enrolled students
    List,
    /// Rebuild the encoding database from the reference images
    Rebuild,
    /// Show store and encoding counts
    Status,
}

struct Paths {
    db_path: PathBuf,
    encodings_path: PathBuf,
    images_dir: PathBuf,
    photos_dir: PathBuf,
    model_dir: PathBuf,
}

impl Paths {
    fn resolve(data_dir: Option<PathBuf>, model_dir: Option<PathBuf>) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        Self {
            db_path: data_dir.join("students.db"),
            encodings_path: data_dir.join("encodings.json"),
            images_dir: data_dir.join("images"),
            photos_dir: data_dir.join("photos"),
            model_dir: model_dir.unwrap_or_else(|| data_dir.join("models")),
        }
    }
}

/// `$XDG_DATA_HOME/rollcall` or `~/.local/share/rollcall`, matching the
/// daemon's default.
fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn rebuild_encodings(paths: &Paths) -> Result<()> {
    let images = DirImageSource::new(&paths.images_dir)?;
    let mut detector = OnnxFaceDetector::load(
        &paths.model_dir.join("version-RFB-320.onnx").to_string_lossy(),
    )
    .context("loading detection model")?;
    let mut encoder = OnnxFaceEncoder::load(
        &paths.model_dir.join("mobilefacenet.onnx").to_string_lossy(),
    )
    .context("loading embedding model")?;

    let (db, skipped) =
        rebuild_and_save(&images, &mut detector, &mut encoder, &paths.encodings_path)?;
    println!("encodings rebuilt: {} identities", db.len());
    for skip in &skipped {
        eprintln!("warning: skipped {}: {}", skip.identity, skip.error);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let paths = Paths::resolve(cli.data_dir, cli.model_dir);

    match cli.command {
        Commands::Enroll {
            id,
            name,
            major,
            starting_year,
            standing,
            year,
            image,
        } => {
            let store = SqliteRecordStore::open(&paths.db_path)?;
            if store.get(&id)?.is_some() {
                bail!("student {id} already enrolled");
            }

            let img = image::open(&image)
                .with_context(|| format!("reading {}", image.display()))?
                .to_rgb8();

            let images = DirImageSource::new(&paths.images_dir)?;
            images.put(&id, &img)?;
            let photos = DirPhotoStore::new(&paths.photos_dir)?;
            photos.put(&id, &img)?;

            store.set(&StudentRecord {
                id: id.clone(),
                name,
                major,
                starting_year,
                total_attendance: 0,
                standing,
                year,
                last_attendance_time: None,
            })?;

            rebuild_encodings(&paths)?;
            println!("enrolled {id}");
            println!("signal the daemon (SIGHUP) to pick up the new encodings");
        }
        Commands::Remove { id } => {
            let store = SqliteRecordStore::open(&paths.db_path)?;
            store.delete(&id)?;
            DirImageSource::new(&paths.images_dir)?.delete(&id)?;
            let photos = DirPhotoStore::new(&paths.photos_dir)?;
            photos.delete(&id)?;

            rebuild_encodings(&paths)?;
            println!("removed {id}");
        }
        Commands::List => {
            let store = SqliteRecordStore::open(&paths.db_path)?;
            let ids = store.list_ids()?;
            if ids.is_empty() {
                println!("no students enrolled");
                return Ok(());
            }
            for id in ids {
                if let Some(record) = store.get(&id)? {
                    println!(
                        "{:<12} {:<24} {:<16} attendance {:>3}  last {}",
                        record.id,
                        record.name,
                        record.major,
                        record.total_attendance,
                        record.last_attendance_time.as_deref().unwrap_or("never"),
                    );
                }
            }
        }
        Commands::Rebuild => rebuild_encodings(&paths)?,
        Commands::Status => {
            let store = SqliteRecordStore::open(&paths.db_path)?;
            let students = store.list_ids()?.len();
            let encodings = match load_database(&paths.encodings_path) {
                Ok(db) => db.len().to_string(),
                Err(_) => "missing".to_string(),
            };
            println!("students:  {students}");
            println!("encodings: {encodings} ({})", paths.encodings_path.display());
        }
    }

    Ok(())
}
