//! Append-only chart history in SQLite.
//!
//! Only this module talks to the database. Pacing loops append one
//! [`ChartSample`] per tick, the status API reads ranges back.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::{BoosterError, Result};
use crate::types::SkillId;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS skill_chart (
    skill_id      INTEGER NOT NULL,
    calc_time     TEXT    NOT NULL,
    cnt_online    INTEGER NOT NULL,
    cnt_busy      INTEGER NOT NULL,
    cnt_wait_oper INTEGER NOT NULL,
    power         INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_skill_chart_skill_time
    ON skill_chart (skill_id, calc_time);
";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSample {
    pub skill_id: SkillId,
    pub calc_time: DateTime<Utc>,
    pub cnt_online: u32,
    pub cnt_busy: u32,
    pub cnt_wait: u32,
    pub power: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartQuery {
    pub skill_id: SkillId,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: u32,
}

impl ChartQuery {
    pub fn latest(skill_id: SkillId, limit: u32) -> Self {
        Self {
            skill_id,
            from: None,
            to: None,
            limit,
        }
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// ChartStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ChartStore {
    conn: Mutex<Connection>,
    max_rows: u32,
}

impl ChartStore {
    /// Open (or create) the chart database at `path`.
    pub fn open(path: &Path, max_rows: u32) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self {
            conn: Mutex::new(conn),
            max_rows,
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store, used by tests and `--no-persist` runs.
    pub fn in_memory(max_rows: u32) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            max_rows,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn max_rows(&self) -> u32 {
        self.max_rows
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| BoosterError::StorePoisoned)
    }

    pub fn append(&self, sample: &ChartSample) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO skill_chart
                 (skill_id, calc_time, cnt_online, cnt_busy, cnt_wait_oper, power)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                sample.skill_id,
                format_time(&sample.calc_time),
                sample.cnt_online,
                sample.cnt_busy,
                sample.cnt_wait,
                sample.power,
            ],
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM skill_chart", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Most recent rows for a skill within the optional bounds, returned
    /// oldest first. The requested limit is capped at the store's maximum.
    pub fn query(&self, query: &ChartQuery) -> Result<Vec<ChartSample>> {
        let limit = query.limit.min(self.max_rows);
        let from = query.from.as_ref().map(format_time);
        let to = query.to.as_ref().map(format_time);

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT skill_id, calc_time, cnt_online, cnt_busy, cnt_wait_oper, power
             FROM (
                 SELECT rowid AS id, * FROM skill_chart
                 WHERE skill_id = ?1
                   AND (?2 IS NULL OR calc_time >= ?2)
                   AND (?3 IS NULL OR calc_time <= ?3)
                 ORDER BY calc_time DESC, id DESC
                 LIMIT ?4
             )
             ORDER BY calc_time ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![query.skill_id, from, to, limit], |row| {
                let raw: String = row.get(1)?;
                let calc_time = DateTime::parse_from_rfc3339(&raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                Ok(ChartSample {
                    skill_id: row.get(0)?,
                    calc_time,
                    cnt_online: row.get(2)?,
                    cnt_busy: row.get(3)?,
                    cnt_wait: row.get(4)?,
                    power: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// ChartSeries
// ---------------------------------------------------------------------------

/// Column layout consumed by the dashboard chart widget.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartSeries {
    pub skill_id: SkillId,
    /// Row limit actually applied, after the store cap.
    pub batch_size: u32,
    pub labels: Vec<String>,
    /// Online operators.
    pub dataset1: Vec<u32>,
    /// Busy operators.
    pub dataset2: Vec<u32>,
    /// Waiting callers.
    pub dataset3: Vec<u32>,
    /// Power.
    pub dataset4: Vec<f64>,
}

impl ChartSeries {
    pub fn new(skill_id: SkillId, batch_size: u32, samples: &[ChartSample]) -> Self {
        let mut series = ChartSeries {
            skill_id,
            batch_size,
            ..Default::default()
        };
        for sample in samples {
            series.labels.push(format_time(&sample.calc_time));
            series.dataset1.push(sample.cnt_online);
            series.dataset2.push(sample.cnt_busy);
            series.dataset3.push(sample.cnt_wait);
            series.dataset4.push(sample.power);
        }
        series
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
