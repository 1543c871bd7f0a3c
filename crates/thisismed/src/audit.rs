//! Inference audit log.
//!
//! Every successful prediction is recorded in a SQLite `inference` table and,
//! optionally, the upload is archived under its storage key. Writes happen on
//! a dedicated thread; request handlers only enqueue.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use thisisme_core::types::TOP_K;
use thisisme_core::Recognition;
use tokio::sync::mpsc;
use uuid::Uuid;

const QUEUE_DEPTH: usize = 64;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of the `inference` table.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub filename: String,
    pub storage_key: String,
    pub image_sha256: String,
    pub n_components: u32,
    pub policy: String,
    /// `(label, probability)`, most likely first.
    pub top: [(String, f64); TOP_K],
}

impl InferenceRecord {
    pub fn new(filename: &str, upload: &[u8], recognition: &Recognition) -> Self {
        let created_at = Utc::now();
        let top: [(String, f64); TOP_K] = std::array::from_fn(|i| {
            let entry = &recognition.ranking.entries[i];
            (entry.label.clone(), entry.probability)
        });
        let filename = sanitize(filename);
        let storage_key = storage_key(&top[0].0, recognition.n_components, created_at, &filename);

        Self {
            id: Uuid::new_v4(),
            created_at,
            filename,
            storage_key,
            image_sha256: format!("{:x}", Sha256::digest(upload)),
            n_components: recognition.n_components,
            policy: recognition.policy.to_string(),
            top,
        }
    }
}

/// Transliterate to ASCII and neutralize anything that could escape a path
/// segment.
pub fn sanitize(name: &str) -> String {
    let ascii = unidecode::unidecode(name);
    let cleaned: String = ascii
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_ascii_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// `<top1>/<n_components>/<timestamp>_<filename>`.
pub fn storage_key(top1: &str, n_components: u32, created_at: DateTime<Utc>, filename: &str) -> String {
    format!(
        "{}/{}/{}_{}",
        sanitize(top1),
        n_components,
        created_at.format("%Y%m%dT%H%M%S%.6fZ"),
        sanitize(filename)
    )
}

/// Synchronous SQLite writer; owned by the audit thread.
pub struct AuditStore {
    conn: Connection,
}

impl AuditStore {
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, AuditError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS inference (
                id            TEXT PRIMARY KEY,
                created_at    TEXT NOT NULL,
                filename      TEXT NOT NULL,
                storage_key   TEXT NOT NULL,
                image_sha256  TEXT NOT NULL,
                n_components  INTEGER NOT NULL,
                policy        TEXT NOT NULL,
                top1 TEXT NOT NULL, top2 TEXT NOT NULL, top3 TEXT NOT NULL,
                top4 TEXT NOT NULL, top5 TEXT NOT NULL,
                top1_chance REAL NOT NULL, top2_chance REAL NOT NULL, top3_chance REAL NOT NULL,
                top4_chance REAL NOT NULL, top5_chance REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_inference_created_at ON inference(created_at);",
        )?;
        Ok(Self { conn })
    }

    pub fn insert(&self, record: &InferenceRecord) -> Result<(), AuditError> {
        let [t1, t2, t3, t4, t5] = &record.top;
        self.conn.execute(
            "INSERT INTO inference (
                id, created_at, filename, storage_key, image_sha256, n_components, policy,
                top1, top2, top3, top4, top5,
                top1_chance, top2_chance, top3_chance, top4_chance, top5_chance
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                record.id.to_string(),
                record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                record.filename,
                record.storage_key,
                record.image_sha256,
                record.n_components,
                record.policy,
                t1.0,
                t2.0,
                t3.0,
                t4.0,
                t5.0,
                t1.1,
                t2.1,
                t3.1,
                t4.1,
                t5.1,
            ],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub fn count(&self) -> Result<u64, AuditError> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM inference", [], |row| row.get(0))?)
    }
}

/// Write `upload` to `archive_dir/<storage_key>`.
fn archive(archive_dir: &Path, record: &InferenceRecord, upload: &[u8]) -> Result<PathBuf, AuditError> {
    let path = archive_dir.join(&record.storage_key);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, upload)?;
    Ok(path)
}

struct AuditJob {
    record: InferenceRecord,
    upload: Option<Vec<u8>>,
}

/// Clone-safe handle to the audit thread.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditJob>,
    archiving: bool,
}

impl AuditHandle {
    /// Whether submitted uploads are archived; callers can skip copying the
    /// bytes otherwise.
    pub fn archiving(&self) -> bool {
        self.archiving
    }

    /// Enqueue a record without waiting. A full or closed queue drops the
    /// record with a warning.
    pub fn submit(&self, record: InferenceRecord, upload: Option<Vec<u8>>) {
        let id = record.id;
        if let Err(e) = self.tx.try_send(AuditJob { record, upload }) {
            tracing::warn!(%id, error = %e, "audit record dropped");
        }
    }
}

/// Open the database and spawn the writer on a dedicated OS thread. Fails fast
/// if the database cannot be opened.
pub fn spawn_audit_writer(db_path: &Path, archive_dir: Option<PathBuf>) -> Result<AuditHandle, AuditError> {
    let store = AuditStore::open(db_path)?;
    tracing::info!(path = %db_path.display(), "audit database opened");
    spawn_with_store(store, archive_dir)
}

fn spawn_with_store(store: AuditStore, archive_dir: Option<PathBuf>) -> Result<AuditHandle, AuditError> {
    let (tx, mut rx) = mpsc::channel::<AuditJob>(QUEUE_DEPTH);
    let archiving = archive_dir.is_some();

    std::thread::Builder::new()
        .name("thisisme-audit".into())
        .spawn(move || {
            tracing::info!("audit thread started");
            while let Some(job) = rx.blocking_recv() {
                match store.insert(&job.record) {
                    Ok(()) => tracing::debug!(id = %job.record.id, key = %job.record.storage_key, "inference recorded"),
                    Err(e) => tracing::error!(id = %job.record.id, error = %e, "failed to record inference"),
                }
                if let (Some(dir), Some(upload)) = (&archive_dir, &job.upload) {
                    match archive(dir, &job.record, upload) {
                        Ok(path) => tracing::debug!(path = %path.display(), "upload archived"),
                        Err(e) => tracing::warn!(key = %job.record.storage_key, error = %e, "failed to archive upload"),
                    }
                }
            }
            tracing::info!("audit thread exiting");
        })?;

    Ok(AuditHandle { tx, archiving })
}
