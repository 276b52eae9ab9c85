//! SQLite persistence for executed trades and run summaries.
//!
//! Trades are append-only and indexed by `(instrument, timestamp, quantity)`.
//! Each run also leaves one summary row so past runs can be reviewed with
//! the `status` command.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::engine::RunSummary;
use crate::market::TradeIntent;

/// Storage seam for the orchestrator.
#[cfg_attr(test, mockall::automock)]
pub trait TradeStore: Send {
    /// Append a batch of trades for `run_id`. Returns rows written.
    fn store(&self, run_id: &str, trades: &[TradeIntent]) -> Result<usize>;

    /// Persist the end-of-run summary.
    fn record_run(&self, summary: &RunSummary) -> Result<()>;
}

/// SQLite-backed trade store.
pub struct SqliteTradeStore {
    conn: Connection,
}

impl SqliteTradeStore {
    /// Open (or create) the database at `db_path`. `":memory:"` is accepted.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Trade store initialized at {:?}", path);
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                instrument TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                quantity INTEGER NOT NULL,
                price REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_trades_key
                ON trades(instrument, timestamp, quantity);
            CREATE INDEX IF NOT EXISTS idx_trades_run ON trades(run_id);

            CREATE TABLE IF NOT EXISTS run_summaries (
                run_id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                days_processed INTEGER NOT NULL,
                skipped_days TEXT NOT NULL,
                dropped_records INTEGER NOT NULL,
                failed_segments INTEGER NOT NULL,
                failed_persists INTEGER NOT NULL,
                initial_cash REAL NOT NULL,
                final_cash REAL NOT NULL,
                realized_pnl REAL NOT NULL,
                equity REAL NOT NULL,
                trade_counts TEXT NOT NULL
            );
            "#,
            )
            .context("Failed to initialize schema")?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Number of persisted trades per instrument, across all runs.
    pub fn trade_counts(&self) -> Result<BTreeMap<String, usize>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT instrument, COUNT(*)
            FROM trades
            GROUP BY instrument
            "#,
        )?;

        let counts = stmt
            .query_map([], |row| {
                let instrument: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((instrument, count as usize))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        Ok(counts)
    }

    /// Trades recorded for one run, in insertion order.
    pub fn trades_for_run(&self, run_id: &str) -> Result<Vec<TradeIntent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT instrument, timestamp, quantity, price
            FROM trades
            WHERE run_id = ?1
            ORDER BY id
            "#,
        )?;

        let trades = stmt
            .query_map([run_id], |row| {
                Ok(TradeIntent {
                    instrument: row.get(0)?,
                    timestamp: row.get(1)?,
                    quantity: row.get(2)?,
                    price: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(trades)
    }

    /// Most recent run summaries, newest first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT run_id, started_at, finished_at, days_processed, skipped_days,
                   dropped_records, failed_segments, failed_persists, initial_cash,
                   final_cash, realized_pnl, equity, trade_counts
            FROM run_summaries
            ORDER BY finished_at DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(SummaryRow {
                    run_id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    days_processed: row.get(3)?,
                    skipped_days: row.get(4)?,
                    dropped_records: row.get(5)?,
                    failed_segments: row.get(6)?,
                    failed_persists: row.get(7)?,
                    initial_cash: row.get(8)?,
                    final_cash: row.get(9)?,
                    realized_pnl: row.get(10)?,
                    equity: row.get(11)?,
                    trade_counts: row.get(12)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(SummaryRow::into_summary).collect()
    }
}

impl TradeStore for SqliteTradeStore {
    fn store(&self, run_id: &str, trades: &[TradeIntent]) -> Result<usize> {
        if trades.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let recorded_at = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO trades (run_id, instrument, timestamp, quantity, price, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for trade in trades {
                stmt.execute(params![
                    run_id,
                    trade.instrument,
                    trade.timestamp,
                    trade.quantity,
                    trade.price,
                    recorded_at,
                ])?;
            }
        }
        tx.commit().context("Failed to commit trades")?;

        debug!(run_id, trades = trades.len(), "Trades stored");
        Ok(trades.len())
    }

    fn record_run(&self, summary: &RunSummary) -> Result<()> {
        let skipped_days = serde_json::to_string(&summary.skipped_days)?;
        let trade_counts = serde_json::to_string(&summary.trade_counts)?;

        self.conn
            .execute(
                r#"
            INSERT OR REPLACE INTO run_summaries (run_id, started_at, finished_at, days_processed,
                                                  skipped_days, dropped_records, failed_segments,
                                                  failed_persists, initial_cash, final_cash,
                                                  realized_pnl, equity, trade_counts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
                params![
                    summary.run_id,
                    summary.started_at.to_rfc3339(),
                    summary.finished_at.to_rfc3339(),
                    summary.days_processed as i64,
                    skipped_days,
                    summary.dropped_records as i64,
                    summary.failed_segments as i64,
                    summary.failed_persists as i64,
                    summary.initial_cash,
                    summary.final_cash,
                    summary.realized_pnl,
                    summary.equity,
                    trade_counts,
                ],
            )
            .with_context(|| format!("Failed to record run {}", summary.run_id))?;

        Ok(())
    }
}

/// Raw `run_summaries` row before JSON and timestamp decoding.
struct SummaryRow {
    run_id: String,
    started_at: String,
    finished_at: String,
    days_processed: i64,
    skipped_days: String,
    dropped_records: i64,
    failed_segments: i64,
    failed_persists: i64,
    initial_cash: f64,
    final_cash: f64,
    realized_pnl: f64,
    equity: f64,
    trade_counts: String,
}

impl SummaryRow {
    fn into_summary(self) -> Result<RunSummary> {
        let skipped_days: Vec<NaiveDate> = serde_json::from_str(&self.skipped_days)
            .with_context(|| format!("Bad skipped_days for run {}", self.run_id))?;
        let trade_counts: BTreeMap<String, usize> = serde_json::from_str(&self.trade_counts)
            .with_context(|| format!("Bad trade_counts for run {}", self.run_id))?;

        Ok(RunSummary {
            started_at: parse_time(&self.started_at)?,
            finished_at: parse_time(&self.finished_at)?,
            run_id: self.run_id,
            days_processed: self.days_processed as usize,
            skipped_days,
            dropped_records: self.dropped_records as usize,
            failed_segments: self.failed_segments as usize,
            failed_persists: self.failed_persists as usize,
            initial_cash: self.initial_cash,
            final_cash: self.final_cash,
            realized_pnl: self.realized_pnl,
            equity: self.equity,
            trade_counts,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Bad timestamp {:?}", s))?
        .with_timezone(&Utc))
}
