use crate::core::hash::FixedHash;
use crate::services::store::{AnalysisStore, StoreError, StoredAnalysis};
use rusqlite::{params, Connection, OptionalExtension};
use sled::Db;
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed analysis store, one row per identity.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM media_analysis", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS media_analysis (
            identity TEXT PRIMARY KEY,
            file_size INTEGER NOT NULL,
            average_hash TEXT NOT NULL,
            difference_hash TEXT NOT NULL,
            perceptual_hash TEXT NOT NULL,
            quality_score REAL NOT NULL,
            sub_scores TEXT NOT NULL,
            is_ai_enhanced INTEGER NOT NULL,
            ai_confidence REAL NOT NULL,
            ai_indicators TEXT NOT NULL,
            technical_metrics TEXT NOT NULL,
            analyzed_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_average_hash ON media_analysis(average_hash)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_perceptual_hash ON media_analysis(perceptual_hash)",
        [],
    )?;
    Ok(())
}

struct Row {
    average_hash: String,
    difference_hash: String,
    perceptual_hash: String,
    quality_score: f64,
    sub_scores: String,
    is_ai_enhanced: bool,
    ai_confidence: f64,
    ai_indicators: String,
    technical_metrics: String,
}

impl Row {
    fn decode(self, identity: &str) -> Result<StoredAnalysis, StoreError> {
        let hash = |value: &str| {
            value.parse::<FixedHash>().map_err(|e| StoreError::Corrupt {
                identity: identity.to_string(),
                message: e.to_string(),
            })
        };

        Ok(StoredAnalysis {
            average_hash: hash(&self.average_hash)?,
            difference_hash: hash(&self.difference_hash)?,
            perceptual_hash: hash(&self.perceptual_hash)?,
            quality_score: self.quality_score,
            sub_scores: serde_json::from_str(&self.sub_scores)?,
            is_ai_enhanced: self.is_ai_enhanced,
            ai_confidence: self.ai_confidence,
            ai_indicators: serde_json::from_str(&self.ai_indicators)?,
            technical_metrics: serde_json::from_str(&self.technical_metrics)?,
        })
    }
}

impl AnalysisStore for SqliteStore {
    fn get(&self, identity: &str) -> Result<Option<StoredAnalysis>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT average_hash, difference_hash, perceptual_hash, quality_score,
                        sub_scores, is_ai_enhanced, ai_confidence, ai_indicators,
                        technical_metrics
                 FROM media_analysis WHERE identity = ?1",
                params![identity],
                |row| {
                    Ok(Row {
                        average_hash: row.get(0)?,
                        difference_hash: row.get(1)?,
                        perceptual_hash: row.get(2)?,
                        quality_score: row.get(3)?,
                        sub_scores: row.get(4)?,
                        is_ai_enhanced: row.get(5)?,
                        ai_confidence: row.get(6)?,
                        ai_indicators: row.get(7)?,
                        technical_metrics: row.get(8)?,
                    })
                },
            )
            .optional()?;

        row.map(|row| row.decode(identity)).transpose()
    }

    fn put(&self, identity: &str, analysis: &StoredAnalysis) -> Result<(), StoreError> {
        let sub_scores = serde_json::to_string(&analysis.sub_scores)?;
        let indicators = serde_json::to_string(&analysis.ai_indicators)?;
        let metrics = serde_json::to_string(&analysis.technical_metrics)?;
        let analyzed_at = chrono::Utc::now().timestamp();

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO media_analysis
             (identity, file_size, average_hash, difference_hash, perceptual_hash,
              quality_score, sub_scores, is_ai_enhanced, ai_confidence, ai_indicators,
              technical_metrics, analyzed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                identity,
                analysis.technical_metrics.file_size as i64,
                analysis.average_hash.to_string(),
                analysis.difference_hash.to_string(),
                analysis.perceptual_hash.to_string(),
                analysis.quality_score,
                sub_scores,
                analysis.is_ai_enhanced,
                analysis.ai_confidence,
                indicators,
                metrics,
                analyzed_at,
            ],
        )?;
        Ok(())
    }
}

/// Embedded key-value store holding JSON-encoded entries keyed by identity.
pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl AnalysisStore for SledStore {
    fn get(&self, identity: &str) -> Result<Option<StoredAnalysis>, StoreError> {
        match self.db.get(identity)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, identity: &str, analysis: &StoredAnalysis) -> Result<(), StoreError> {
        self.db.insert(identity, serde_json::to_vec(analysis)?)?;
        Ok(())
    }
}
