use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::analyzer::OnnxAnalyzer;
use facegate_core::matcher::MatchOutcome;
use facegate_core::service::{FaceService, RegisterOutcome, VerifyOutcome, VerifyReport};
use facegate_core::settings::Settings;
use facegate_core::store::{EmbeddingStore, SqliteStore};
use facegate_core::types::{EmbeddingSummary, IdentityId, ValidationError};
use image::RgbImage;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face registration and verification CLI")]
struct Cli {
    /// Database path (overrides FACEGATE_DB_PATH and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a face sample for a student
    Enroll {
        #[arg(short, long)]
        student: i64,
        /// Image file containing exactly one face
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Verify a face, against one student or everyone
    Verify {
        #[arg(short, long)]
        image: PathBuf,
        /// Restrict the search to this student
        #[arg(short, long)]
        student: Option<i64>,
    },
    /// List a student's registered face samples
    List {
        #[arg(short, long)]
        student: i64,
    },
    /// Remove one face sample
    Remove {
        #[arg(short, long)]
        student: i64,
        /// Embedding ID to remove
        id: String,
    },
    /// Show database and model status
    Status,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load().context("failed to load configuration")?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    let (ok, output) = match cli.command {
        Commands::Enroll { student, image } => {
            enroll(&settings, IdentityId::new(student)?, &image)?
        }
        Commands::Verify { image, student } => {
            let student = student.map(IdentityId::new).transpose()?;
            verify(&settings, student, &image)?
        }
        Commands::List { student } => (true, list_faces(&settings, IdentityId::new(student)?)?),
        Commands::Remove { student, id } => remove_face(&settings, IdentityId::new(student)?, &id)?,
        Commands::Status => (true, status(&settings)),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn open_store(settings: &Settings) -> Result<SqliteStore> {
    SqliteStore::open_existing(&settings.db_path, settings.store_options())
        .with_context(|| format!("cannot open {}", settings.db_path.display()))
}

/// A database that was never created holds no faces.
fn open_store_if_present(settings: &Settings) -> Result<Option<SqliteStore>> {
    if !settings.db_path.exists() {
        return Ok(None);
    }
    open_store(settings).map(Some)
}

fn open_service(settings: &Settings) -> Result<FaceService<SqliteStore, OnnxAnalyzer>> {
    let store = SqliteStore::open(&settings.db_path, settings.store_options())
        .with_context(|| format!("cannot open {}", settings.db_path.display()))?;
    let analyzer = OnnxAnalyzer::load(
        &settings.detector_model_path(),
        &settings.recognizer_model_path(),
    )
    .context("failed to load face models")?;
    Ok(FaceService::new(store, analyzer, settings.service_config()))
}

fn load_image(path: &Path) -> Result<RgbImage> {
    let image =
        image::open(path).with_context(|| format!("cannot read image {}", path.display()))?;
    Ok(image.to_rgb8())
}

fn enroll(settings: &Settings, student: IdentityId, path: &Path) -> Result<(bool, Value)> {
    let image = load_image(path)?;
    let mut service = open_service(settings)?;

    Ok(match service.register(student, &image)? {
        RegisterOutcome::Registered { record, confidence } => (
            true,
            json!({
                "student_id": student,
                "embedding_id": record.embedding_id,
                "confidence": confidence,
                "created_at": record.created_at.to_rfc3339(),
            }),
        ),
        RegisterOutcome::Rejected(reason) => (false, json!({ "rejected": reason.to_string() })),
    })
}

fn verify(
    settings: &Settings,
    student: Option<IdentityId>,
    path: &Path,
) -> Result<(bool, Value)> {
    let image = load_image(path)?;
    let mut service = open_service(settings)?;

    Ok(match service.verify(student, &image)? {
        VerifyOutcome::Rejected(reason) => (false, json!({ "rejected": reason.to_string() })),
        VerifyOutcome::Completed(MatchOutcome::NoCandidates) => {
            (false, json!({ "verified": false, "message": "No registered faces found" }))
        }
        VerifyOutcome::Completed(outcome) => {
            let report = VerifyReport::from(&outcome);
            (report.matched, serde_json::to_value(&report)?)
        }
    })
}

fn list_faces(settings: &Settings, student: IdentityId) -> Result<Value> {
    let records = match open_store_if_present(settings)? {
        Some(store) => store.list(student)?,
        None => Vec::new(),
    };
    let faces: Vec<_> = records.iter().map(EmbeddingSummary::from).collect();
    Ok(json!({ "student_id": student, "face_count": faces.len(), "faces": faces }))
}

fn remove_face(settings: &Settings, student: IdentityId, id: &str) -> Result<(bool, Value)> {
    if id.trim().is_empty() {
        return Err(ValidationError::MissingInput("embedding_id").into());
    }
    let removed = match open_store_if_present(settings)? {
        Some(store) => store.delete(student, id)?,
        None => false,
    };
    Ok((removed, json!({ "student_id": student, "embedding_id": id, "removed": removed })))
}

fn status(settings: &Settings) -> Value {
    let embeddings = match open_store(settings).and_then(|store| Ok(store.count()?)) {
        Ok(count) => json!(count),
        Err(e) => json!({ "error": format!("{e:#}") }),
    };
    let detector = settings.detector_model_path();
    let recognizer = settings.recognizer_model_path();

    json!({
        "db_path": settings.db_path.display().to_string(),
        "total_embeddings": embeddings,
        "registration": settings.registration,
        "metric": settings.matching.metric,
        "threshold": settings.matching.threshold,
        "min_detection_confidence": settings.gate.min_confidence,
        "models": {
            "detector": { "path": &detector, "present": Path::new(&detector).exists() },
            "recognizer": { "path": &recognizer, "present": Path::new(&recognizer).exists() },
        },
    })
}
