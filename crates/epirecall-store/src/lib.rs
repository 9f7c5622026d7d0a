//! `epirecall-store` – SQLite-backed clip-record store.
//!
//! Persists [`ClipRecord`]s (identifier, label, category and the dense
//! embedding vector) to a local SQLite database and loads them back in a
//! stable order for the matching pipeline. This is the persistence boundary
//! of the system; the pipeline itself only ever sees in-memory records.
//!
//! # Storage layout
//!
//! A single table `clip_records` is created on open:
//!
//! | column    | type | description                              |
//! |-----------|------|------------------------------------------|
//! | id        | TEXT | Opaque clip identifier, primary key      |
//! | label     | TEXT | Fine-grained label                       |
//! | category  | TEXT | Coarse class                             |
//! | embedding | BLOB | Little-endian f64 vector (8 × N bytes)   |
//!
//! # Example
//!
//! ```rust
//! use epirecall_store::ClipStore;
//! use epirecall_types::ClipRecord;
//!
//! let store = ClipStore::open_in_memory().unwrap();
//! store.insert(&ClipRecord::new("7_9", "pour_cup", "pour", vec![0.2, 0.8])).unwrap();
//!
//! let records = store.load_all().unwrap();
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].category, "pour");
//! ```

use epirecall_types::ClipRecord;
use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from clip-store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Embedding vectors must be non-empty and equal in length")]
    DimensionMismatch,
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding serialisation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_bytes(embedding: &[f64]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// ClipStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed store of [`ClipRecord`]s.
///
/// Iteration order is stable: [`ClipStore::load_all`] always returns records
/// ordered by insertion rowid, so repeated loads of the same database see the
/// same sequence (the matcher's tie-breaking depends on input order).
pub struct ClipStore {
    conn: Connection,
}

impl ClipStore {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS clip_records (
                id        TEXT NOT NULL PRIMARY KEY,
                label     TEXT NOT NULL,
                category  TEXT NOT NULL,
                embedding BLOB NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Persist a single record. An existing record with the same id is
    /// replaced.
    pub fn insert(&self, record: &ClipRecord) -> Result<(), StoreError> {
        if record.embedding.is_empty() {
            return Err(StoreError::DimensionMismatch);
        }
        let blob = embedding_to_bytes(&record.embedding);
        self.conn.execute(
            "INSERT OR REPLACE INTO clip_records (id, label, category, embedding)
             VALUES (?1, ?2, ?3, ?4)",
            params![record.id, record.label, record.category, blob],
        )?;
        Ok(())
    }

    /// Persist a batch of records inside one transaction.
    pub fn insert_all(&mut self, records: &[ClipRecord]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        for record in records {
            if record.embedding.is_empty() {
                return Err(StoreError::DimensionMismatch);
            }
            tx.execute(
                "INSERT OR REPLACE INTO clip_records (id, label, category, embedding)
                 VALUES (?1, ?2, ?3, ?4)",
                params![record.id, record.label, record.category, embedding_to_bytes(&record.embedding)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Load every record, ordered by insertion rowid (stable across loads).
    ///
    /// Returns [`StoreError::DimensionMismatch`] if the stored embeddings do
    /// not all share one dimensionality; the matching pipeline relies on a
    /// uniform dimension, so a corrupt store is rejected here.
    pub fn load_all(&self) -> Result<Vec<ClipRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, label, category, embedding
             FROM clip_records
             ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let label: String = row.get(1)?;
            let category: String = row.get(2)?;
            let blob: Vec<u8> = row.get(3)?;
            Ok(ClipRecord {
                id,
                label,
                category,
                embedding: bytes_to_embedding(&blob),
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }

        if let Some(first) = records.first() {
            let dim = first.embedding.len();
            if records.iter().any(|r| r.embedding.len() != dim) {
                return Err(StoreError::DimensionMismatch);
            }
        }

        debug!(count = records.len(), "loaded clip records");
        Ok(records)
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM clip_records", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
