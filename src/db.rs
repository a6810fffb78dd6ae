//! SQLite database layer for Stock Insight

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, OptionalExtension, Result as SqliteResult, Row, Transaction,
    TransactionBehavior,
};
use std::path::Path;

use crate::error::{InsightError, Result};
use crate::lifecycle::check_weekly_data;
use crate::models::{
    timestamp, Direction, Prediction, PredictionPatch, PredictionStatus, UsageCounter,
    WeeklyUpdate,
};

const PREDICTION_COLUMNS: &str = "id, ticker, chart_image, user_prediction, user_reasoning, \
    target_price, gemini_prediction, gemini_reasoning, gemini_alignment_score, \
    gemini_alignment_reason, initial_price, created_at, status, weekly_data, final_retrospective";

/// Database wrapper for prediction storage
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Initialize database schema
    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        // Run migrations for existing databases
        self.run_migrations()?;
        log::debug!("[OK] Database schema initialized");
        Ok(())
    }

    /// Bring databases created by older schemas up to date
    fn run_migrations(&self) -> Result<()> {
        let columns: Vec<String> = self
            .conn
            .prepare("PRAGMA table_info(predictions)")?
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<SqliteResult<Vec<_>>>()?;

        for (name, sql_type) in [
            ("target_price", "REAL"),
            ("gemini_alignment_score", "REAL"),
            ("gemini_alignment_reason", "TEXT"),
        ] {
            if !columns.iter().any(|c| c == name) {
                self.conn.execute(
                    &format!("ALTER TABLE predictions ADD COLUMN {} {}", name, sql_type),
                    [],
                )?;
                log::info!("[MIGRATION] Added {} column to predictions", name);
            }
        }

        // Rows written with CURRENT_TIMESTAMP sort wrongly against RFC 3339 text
        let normalized = self.conn.execute(
            "UPDATE predictions SET created_at = strftime('%Y-%m-%dT%H:%M:%fZ', created_at)
             WHERE created_at NOT LIKE '%T%' AND strftime('%s', created_at) IS NOT NULL",
            [],
        )?;
        if normalized > 0 {
            log::info!("[MIGRATION] Normalized created_at on {} predictions", normalized);
        }

        Ok(())
    }

    // ========================================================================
    // Predictions
    // ========================================================================

    /// Insert a new prediction. Fails with `Conflict` if the id exists.
    pub fn insert_prediction(&self, prediction: &Prediction) -> Result<()> {
        prediction.check_invariants()?;
        insert_prediction_row(&self.conn, prediction)?;
        log::info!("Stored prediction {} ({})", prediction.id, prediction.ticker);
        Ok(())
    }

    /// All predictions, newest first
    pub fn get_predictions(&self) -> Result<Vec<Prediction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM predictions ORDER BY created_at DESC, rowid DESC",
            PREDICTION_COLUMNS
        ))?;

        let predictions = stmt
            .query_map([], map_prediction_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(predictions)
    }

    pub fn get_prediction(&self, id: &str) -> Result<Option<Prediction>> {
        Ok(load_prediction(&self.conn, id)?)
    }

    /// Apply a partial update to status / weekly data / retrospective.
    ///
    /// The merged record must still satisfy the lifecycle invariants: weekly
    /// data only grows, a completed prediction never reverts, and the
    /// retrospective is written at most once.
    pub fn update_prediction_fields(&self, id: &str, patch: &PredictionPatch) -> Result<Prediction> {
        self.mutate_prediction(id, |prediction| apply_patch(prediction, patch))
    }

    /// Read-modify-write one prediction inside a single IMMEDIATE transaction.
    ///
    /// If `mutate` fails nothing is written. Only the mutable columns are
    /// persisted; creation fields are never rewritten.
    pub fn mutate_prediction<F>(&self, id: &str, mutate: F) -> Result<Prediction>
    where
        F: FnOnce(&mut Prediction) -> Result<()>,
    {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let mut prediction = load_prediction(&tx, id)?
            .ok_or_else(|| InsightError::NotFound(id.to_string()))?;
        mutate(&mut prediction)?;
        prediction.check_invariants()?;

        let weekly_json = serde_json::to_string(&prediction.weekly_data)?;
        tx.execute(
            r#"
            UPDATE predictions
            SET status = ?1, weekly_data = ?2, final_retrospective = ?3
            WHERE id = ?4
            "#,
            params![
                prediction.status.as_str(),
                weekly_json,
                prediction.final_retrospective,
                id,
            ],
        )?;
        tx.commit()?;

        Ok(prediction)
    }

    /// Delete a prediction. Returns the number of rows removed (0 or 1).
    pub fn delete_prediction(&self, id: &str) -> Result<usize> {
        log::debug!("Attempting to delete prediction with id: {}", id);
        let changes = self
            .conn
            .execute("DELETE FROM predictions WHERE id = ?1", params![id])?;
        log::info!("Delete result: {} row(s) affected", changes);
        Ok(changes)
    }

    // ========================================================================
    // API usage
    // ========================================================================

    /// Count one AI call against `date`. Returns the new count.
    pub fn increment_usage(&self, date: NaiveDate) -> Result<u32> {
        self.conn.execute(
            r#"
            INSERT INTO api_usage (date, count)
            VALUES (?1, 1)
            ON CONFLICT(date) DO UPDATE SET count = count + 1
            "#,
            params![date.to_string()],
        )?;
        self.get_usage(date)
    }

    /// Calls counted for `date`; 0 when nothing was recorded. Never inserts.
    pub fn get_usage(&self, date: NaiveDate) -> Result<u32> {
        let count = self
            .conn
            .query_row(
                "SELECT count FROM api_usage WHERE date = ?1",
                params![date.to_string()],
                |row| row.get::<_, u32>(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    /// Every recorded day, oldest first
    pub fn get_usage_history(&self) -> Result<Vec<UsageCounter>> {
        let mut stmt = self
            .conn
            .prepare("SELECT date, count FROM api_usage ORDER BY date ASC")?;

        let rows = stmt
            .query_map([], map_usage_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(rows)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?1, ?2, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// Returns true if a value was removed
    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let changes = self
            .conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(changes > 0)
    }
}

/// Insert one prediction row. Shared by `insert_prediction` and restore.
pub(crate) fn insert_prediction_row(conn: &Connection, p: &Prediction) -> Result<()> {
    let weekly_json = serde_json::to_string(&p.weekly_data)?;
    let result = conn.execute(
        &format!(
            "INSERT INTO predictions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            PREDICTION_COLUMNS
        ),
        params![
            p.id,
            p.ticker,
            p.chart_image,
            p.user_prediction.as_str(),
            p.user_reasoning,
            p.target_price,
            p.gemini_prediction.as_str(),
            p.gemini_reasoning,
            p.gemini_alignment_score,
            p.gemini_alignment_reason,
            p.initial_price,
            timestamp::format(&p.created_at),
            p.status.as_str(),
            weekly_json,
            p.final_retrospective,
        ],
    );

    match result.map_err(InsightError::from) {
        Ok(_) => Ok(()),
        Err(err) if err.is_duplicate_key() => Err(InsightError::Conflict(p.id.clone())),
        Err(err) => Err(err),
    }
}

pub(crate) fn insert_usage_row(conn: &Connection, usage: &UsageCounter) -> Result<()> {
    let result = conn.execute(
        "INSERT INTO api_usage (date, count) VALUES (?1, ?2)",
        params![usage.date.to_string(), usage.count],
    );

    match result.map_err(InsightError::from) {
        Ok(_) => Ok(()),
        Err(err) if err.is_duplicate_key() => Err(InsightError::Conflict(format!(
            "usage row for {}",
            usage.date
        ))),
        Err(err) => Err(err),
    }
}

fn load_prediction(conn: &Connection, id: &str) -> SqliteResult<Option<Prediction>> {
    conn.query_row(
        &format!("SELECT {} FROM predictions WHERE id = ?1", PREDICTION_COLUMNS),
        params![id],
        map_prediction_row,
    )
    .optional()
}

fn apply_patch(prediction: &mut Prediction, patch: &PredictionPatch) -> Result<()> {
    if let Some(weekly) = &patch.weekly_data {
        check_weekly_data(weekly)?;
        let existing = &prediction.weekly_data;
        if weekly.len() < existing.len() || weekly[..existing.len()] != existing[..] {
            return Err(InsightError::InvalidState(format!(
                "weekly data for {} is append-only",
                prediction.id
            )));
        }
        prediction.weekly_data = weekly.clone();
    }

    if let Some(status) = patch.status {
        if prediction.is_completed() && status == PredictionStatus::Active {
            return Err(InsightError::InvalidState(format!(
                "prediction {} is completed and cannot be reactivated",
                prediction.id
            )));
        }
        prediction.status = status;
    }

    if let Some(text) = &patch.final_retrospective {
        prediction.set_retrospective(text)?;
    }

    Ok(())
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_direction(idx: usize, raw: Option<String>) -> SqliteResult<Direction> {
    let raw = raw.unwrap_or_default();
    Direction::parse(&raw).ok_or_else(|| conversion_error(idx, format!("invalid direction '{}'", raw)))
}

fn map_prediction_row(row: &Row) -> SqliteResult<Prediction> {
    let created_raw: String = row.get(11)?;
    let created_at = timestamp::parse(&created_raw)
        .ok_or_else(|| conversion_error(11, format!("invalid created_at '{}'", created_raw)))?;

    let status_raw: String = row.get(12)?;
    let status = PredictionStatus::parse(&status_raw)
        .ok_or_else(|| conversion_error(12, format!("invalid status '{}'", status_raw)))?;

    let weekly_raw: Option<String> = row.get(13)?;
    let weekly_data: Vec<WeeklyUpdate> = match weekly_raw.as_deref() {
        None | Some("") => Vec::new(),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(13, Type::Text, Box::new(e)))?,
    };

    Ok(Prediction {
        id: row.get(0)?,
        ticker: row.get(1)?,
        chart_image: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        user_prediction: parse_direction(3, row.get(3)?)?,
        user_reasoning: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        target_price: row.get(5)?,
        gemini_prediction: parse_direction(6, row.get(6)?)?,
        gemini_reasoning: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        gemini_alignment_score: row.get(8)?,
        gemini_alignment_reason: row.get(9)?,
        initial_price: row.get::<_, Option<f64>>(10)?.unwrap_or_default(),
        created_at,
        status,
        weekly_data,
        final_retrospective: row.get(14)?,
    })
}

fn map_usage_row(row: &Row) -> SqliteResult<UsageCounter> {
    let date_str: String = row.get(0)?;
    Ok(UsageCounter {
        date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
        count: row.get(1)?,
    })
}

const SCHEMA_SQL: &str = r#"
-- Tracked predictions (weekly_data holds a JSON array of weekly updates)
CREATE TABLE IF NOT EXISTS predictions (
    id TEXT PRIMARY KEY,
    ticker TEXT NOT NULL,
    chart_image TEXT NOT NULL,
    user_prediction TEXT NOT NULL CHECK(user_prediction IN ('up', 'down')),
    user_reasoning TEXT NOT NULL,
    target_price REAL,
    gemini_prediction TEXT NOT NULL CHECK(gemini_prediction IN ('up', 'down')),
    gemini_reasoning TEXT NOT NULL,
    gemini_alignment_score REAL,
    gemini_alignment_reason TEXT,
    initial_price REAL NOT NULL,
    created_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active', 'completed')),
    weekly_data TEXT NOT NULL DEFAULT '[]',
    final_retrospective TEXT
);

CREATE INDEX IF NOT EXISTS idx_predictions_created ON predictions(created_at);
CREATE INDEX IF NOT EXISTS idx_predictions_status ON predictions(status);

-- AI calls per UTC day
CREATE TABLE IF NOT EXISTS api_usage (
    date TEXT PRIMARY KEY,
    count INTEGER NOT NULL DEFAULT 0 CHECK(count >= 0)
);

-- Saved user settings (API key)
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
"#;
