//! SQLite-backed round persistence.
//!
//! Rounds are keyed by `round_number` for audit and replay: a row is
//! inserted when a round starts and completed when it resolves. The
//! in-memory slot stays the source of truth for the live round; the
//! store is what survives restarts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{Direction, ResolutionReport, Round};

const SCHEMA_SQL: &str = r#"
-- WAL keeps API reads cheap while the scheduler writes
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS rounds (
    round_number INTEGER PRIMARY KEY,
    start_price REAL NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    predicted_direction TEXT NOT NULL,
    confidence INTEGER NOT NULL,
    sma5 REAL,
    sma10 REAL,
    momentum REAL,
    end_price REAL,
    actual_direction TEXT,
    prediction_correct INTEGER,
    resolved_at INTEGER
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_rounds_resolved_at
    ON rounds(resolved_at DESC);
"#;

/// A persisted round row, resolution columns null while the round is
/// still open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRound {
    pub round_number: u64,
    pub start_price: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub predicted_direction: Direction,
    pub confidence: u8,
    pub end_price: Option<f64>,
    pub actual_direction: Option<Direction>,
    pub prediction_correct: Option<bool>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Aggregate forecast performance over all resolved rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStats {
    pub resolved_rounds: u64,
    pub correct_predictions: u64,
    pub accuracy_pct: f64,
}

pub struct RoundStore {
    conn: Mutex<Connection>,
}

impl RoundStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize round schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM rounds", [], |row| row.get(0))
            .unwrap_or(0);
        info!("🗄️  Round store ready at {} ({} rounds on record)", db_path, count);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert the freshly started round. Idempotent so a scheduler
    /// retry cannot duplicate a row.
    pub fn record_started(&self, round: &Round) -> Result<()> {
        let indicators = round.prediction.indicators;
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO rounds (
                round_number, start_price, start_time, end_time,
                predicted_direction, confidence, sma5, sma10, momentum
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                round.round_number as i64,
                round.start_price,
                round.start_time.timestamp(),
                round.end_time.timestamp(),
                round.prediction.direction.as_str(),
                round.prediction.confidence as i64,
                indicators.map(|i| i.sma5),
                indicators.map(|i| i.sma10),
                indicators.map(|i| i.momentum),
            ],
        )
        .context("Failed to persist started round")?;
        Ok(())
    }

    /// Attach the resolution to the persisted row.
    pub fn record_resolved(&self, report: &ResolutionReport) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                r#"
                UPDATE rounds SET
                    end_price = ?2,
                    actual_direction = ?3,
                    prediction_correct = ?4,
                    resolved_at = ?5
                WHERE round_number = ?1
                "#,
                params![
                    report.round_number as i64,
                    report.end_price,
                    report.actual_direction.as_str(),
                    report.prediction_correct as i64,
                    report.timestamp.timestamp(),
                ],
            )
            .context("Failed to persist round resolution")?;

        if updated == 0 {
            warn!(
                round = report.round_number,
                "resolution had no persisted start row to attach to"
            );
        }
        Ok(())
    }

    /// Most recent rounds, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<StoredRound>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT round_number, start_price, start_time, end_time,
                   predicted_direction, confidence,
                   end_price, actual_direction, prediction_correct, resolved_at
            FROM rounds
            ORDER BY round_number DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            let predicted: String = row.get(4)?;
            let actual: Option<String> = row.get(7)?;
            Ok(StoredRound {
                round_number: row.get::<_, i64>(0)? as u64,
                start_price: row.get(1)?,
                start_time: datetime_from_secs(row.get(2)?),
                end_time: datetime_from_secs(row.get(3)?),
                predicted_direction: direction_from_sql(4, predicted)?,
                confidence: row.get::<_, i64>(5)? as u8,
                end_price: row.get(6)?,
                actual_direction: actual.map(|s| direction_from_sql(7, s)).transpose()?,
                prediction_correct: row.get::<_, Option<i64>>(8)?.map(|v| v != 0),
                resolved_at: row.get::<_, Option<i64>>(9)?.map(datetime_from_secs),
            })
        })?;

        let mut rounds = Vec::new();
        for row in rows {
            rounds.push(row?);
        }
        Ok(rounds)
    }

    /// Forecast accuracy over everything resolved so far.
    pub fn stats(&self) -> Result<RoundStats> {
        let conn = self.conn.lock();
        let (resolved, correct): (i64, i64) = conn.query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(prediction_correct), 0)
            FROM rounds
            WHERE resolved_at IS NOT NULL
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let accuracy_pct = if resolved > 0 {
            (correct as f64 / resolved as f64) * 100.0
        } else {
            0.0
        };

        Ok(RoundStats {
            resolved_rounds: resolved as u64,
            correct_predictions: correct as u64,
            accuracy_pct,
        })
    }

    /// Highest persisted round number; seeds the manager at boot so
    /// numbering never repeats across restarts.
    pub fn last_round_number(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let last: i64 = conn.query_row(
            "SELECT COALESCE(MAX(round_number), 0) FROM rounds",
            [],
            |row| row.get(0),
        )?;
        Ok(last as u64)
    }
}

fn datetime_from_secs(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

fn direction_from_sql(column: usize, raw: String) -> rusqlite::Result<Direction> {
    Direction::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            format!("unknown direction {raw:?}").into(),
        )
    })
}
