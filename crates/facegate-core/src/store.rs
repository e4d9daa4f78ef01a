//! Durable embedding store backed by a single SQLite table.
//!
//! Vectors are persisted as little-endian `f32` blobs next to an explicit
//! dimension column, so reading a record never involves parsing text.

use crate::types::{Embedding, EmbeddingRecord, IdentityId};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS face_embeddings (
    embedding_id TEXT PRIMARY KEY,
    identity_id  INTEGER NOT NULL,
    dim          INTEGER NOT NULL,
    vector       BLOB NOT NULL,
    model_tag    TEXT NOT NULL,
    detector_tag TEXT NOT NULL,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_face_embeddings_identity ON face_embeddings (identity_id);
";

const SELECT_COLUMNS: &str =
    "SELECT identity_id, embedding_id, dim, vector, model_tag, detector_tag, created_at \
     FROM face_embeddings";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database not found: {0}")]
    NotFound(PathBuf),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record {embedding_id}: {reason}")]
    Corrupt {
        embedding_id: String,
        reason: String,
    },
}

/// What `put` does when the identity already has records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationPolicy {
    /// Keep earlier samples; every registration adds one.
    #[default]
    Append,
    /// Drop the identity's earlier samples in the same transaction.
    Replace,
}

impl FromStr for RegistrationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            other => Err(format!("unknown registration policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Upper bound on how long a call waits for a locked database.
    pub busy_timeout: Duration,
    pub registration: RegistrationPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            registration: RegistrationPolicy::Append,
        }
    }
}

/// Persistence contract for enrollment samples.
///
/// Records are returned in insertion order.
pub trait EmbeddingStore {
    /// Persist a new sample under a freshly generated id.
    fn put(
        &self,
        identity_id: IdentityId,
        embedding: &Embedding,
        model_tag: &str,
        detector_tag: &str,
    ) -> Result<EmbeddingRecord, StoreError>;

    fn list(&self, identity_id: IdentityId) -> Result<Vec<EmbeddingRecord>, StoreError>;

    fn list_all(&self) -> Result<Vec<EmbeddingRecord>, StoreError>;

    /// Remove one sample. Returns `false` if it did not exist.
    fn delete(&self, identity_id: IdentityId, embedding_id: &str) -> Result<bool, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;
}

/// SQLite implementation of [`EmbeddingStore`].
pub struct SqliteStore {
    path: PathBuf,
    conn: Connection,
    options: StoreOptions,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(path, conn, options)
    }

    /// Open a database that must already exist. Used by read-only tooling
    /// that should not leave an empty database behind.
    pub fn open_existing(path: &Path, options: StoreOptions) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        Self::init(path, conn, options)
    }

    fn init(path: &Path, conn: Connection, options: StoreOptions) -> Result<Self, StoreError> {
        conn.busy_timeout(options.busy_timeout)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!(
            path = %path.display(),
            journal_mode = %mode,
            policy = ?options.registration,
            "embedding store opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            conn,
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn query(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawRecord::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.decode()?);
        }
        Ok(records)
    }
}

impl EmbeddingStore for SqliteStore {
    fn put(
        &self,
        identity_id: IdentityId,
        embedding: &Embedding,
        model_tag: &str,
        detector_tag: &str,
    ) -> Result<EmbeddingRecord, StoreError> {
        let record = EmbeddingRecord {
            identity_id,
            embedding_id: uuid::Uuid::new_v4().to_string(),
            embedding: embedding.clone(),
            model_tag: model_tag.to_string(),
            detector_tag: detector_tag.to_string(),
            // Stored with microsecond precision.
            created_at: Utc::now().trunc_subsecs(6),
        };

        let tx = self.conn.unchecked_transaction()?;
        if self.options.registration == RegistrationPolicy::Replace {
            let replaced = tx.execute(
                "DELETE FROM face_embeddings WHERE identity_id = ?1",
                params![identity_id.get()],
            )?;
            if replaced > 0 {
                tracing::debug!(student_id = %identity_id, replaced, "replacing earlier samples");
            }
        }
        tx.execute(
            "INSERT INTO face_embeddings \
             (embedding_id, identity_id, dim, vector, model_tag, detector_tag, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.embedding_id,
                identity_id.get(),
                embedding.dim() as i64,
                encode_vector(&embedding.values),
                record.model_tag,
                record.detector_tag,
                record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        tx.commit()?;

        Ok(record)
    }

    fn list(&self, identity_id: IdentityId) -> Result<Vec<EmbeddingRecord>, StoreError> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE identity_id = ?1 ORDER BY created_at, rowid"),
            params![identity_id.get()],
        )
    }

    fn list_all(&self) -> Result<Vec<EmbeddingRecord>, StoreError> {
        self.query(&format!("{SELECT_COLUMNS} ORDER BY created_at, rowid"), [])
    }

    fn delete(&self, identity_id: IdentityId, embedding_id: &str) -> Result<bool, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM face_embeddings WHERE identity_id = ?1 AND embedding_id = ?2",
            params![identity_id.get(), embedding_id],
        )?;
        Ok(deleted > 0)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM face_embeddings", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

/// Row as read from SQLite, before the blob and timestamp are validated.
struct RawRecord {
    identity_id: i64,
    embedding_id: String,
    dim: i64,
    vector: Vec<u8>,
    model_tag: String,
    detector_tag: String,
    created_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity_id: row.get(0)?,
            embedding_id: row.get(1)?,
            dim: row.get(2)?,
            vector: row.get(3)?,
            model_tag: row.get(4)?,
            detector_tag: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<EmbeddingRecord, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            embedding_id: self.embedding_id.clone(),
            reason,
        };

        let identity_id = IdentityId::new(self.identity_id).map_err(|e| corrupt(e.to_string()))?;
        let values = decode_vector(&self.vector, self.dim).map_err(&corrupt)?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(EmbeddingRecord {
            identity_id,
            embedding_id: self.embedding_id,
            embedding: Embedding::new(values),
            model_tag: self.model_tag,
            detector_tag: self.detector_tag,
            created_at,
        })
    }
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8], dim: i64) -> Result<Vec<f32>, String> {
    let expected = usize::try_from(dim).map_err(|_| format!("negative dimension {dim}"))? * 4;
    if blob.len() != expected {
        return Err(format!(
            "vector blob is {} bytes, expected {expected} for dim {dim}",
            blob.len()
        ));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
