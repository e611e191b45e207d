//! SQLite store for the settlement engine
//!
//! Key properties:
//! - WAL mode for concurrent reads during writes
//! - Prepared statement caching on hot lookups
//! - Multi-row writes (bet + lines) inside BEGIN IMMEDIATE transactions
//! - The pending -> won/lost transition is a conditional update so that
//!   concurrent settlement attempts have at most one winner

use crate::ledger::Ledger;
use crate::models::{
    Account, AccountRole, Bet, BetLine, BetStatus, CommissionRates, DrawResult,
};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::sync::Arc;
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    username TEXT UNIQUE NOT NULL,
    role TEXT NOT NULL,
    parent_id TEXT REFERENCES accounts(id),
    credit REAL NOT NULL DEFAULT 0.0,
    commission_rates_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS draw_results (
    draw_id TEXT PRIMARY KEY,
    three_top TEXT,
    two_top TEXT,
    two_bottom TEXT,
    run_top_json TEXT NOT NULL DEFAULT '[]',
    run_bottom_json TEXT NOT NULL DEFAULT '[]',
    published_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bets (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id),
    draw_id TEXT NOT NULL,
    category TEXT NOT NULL,
    stake_total REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    total_win_amount REAL NOT NULL DEFAULT 0.0,
    placed_at TEXT NOT NULL,
    settled_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_bets_draw_status ON bets(draw_id, status);
CREATE INDEX IF NOT EXISTS idx_bets_account ON bets(account_id, placed_at DESC);

CREATE TABLE IF NOT EXISTS bet_lines (
    bet_id TEXT NOT NULL REFERENCES bets(id),
    line_no INTEGER NOT NULL,
    bet_type TEXT NOT NULL,
    number TEXT NOT NULL,
    stake REAL NOT NULL,
    payout_rate REAL NOT NULL,
    potential_win REAL NOT NULL,
    is_win INTEGER,
    win_amount REAL,
    PRIMARY KEY (bet_id, line_no)
) WITHOUT ROWID;

-- Append-only ledger. seq gives each account's entries a total order so the
-- before/after chain can be replayed and audited.
CREATE TABLE IF NOT EXISTS credit_transactions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT UNIQUE NOT NULL,
    account_id TEXT NOT NULL REFERENCES accounts(id),
    action TEXT NOT NULL,
    amount REAL NOT NULL,
    credit_before REAL NOT NULL,
    credit_after REAL NOT NULL,
    reason TEXT NOT NULL,
    ref_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credit_tx_account ON credit_transactions(account_id, seq);
CREATE INDEX IF NOT EXISTS idx_credit_tx_ref ON credit_transactions(ref_id);
"#;

/// SQLite-backed store shared across request handlers
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📊 Settlement database initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Ledger recorder bound to the same connection, so ledger writes
    /// serialize with every other mutation.
    pub fn ledger(&self) -> Ledger {
        Ledger::new(self.conn.clone())
    }

    // ===== Accounts =====

    pub fn create_account(
        &self,
        username: &str,
        role: AccountRole,
        parent_id: Option<&str>,
        commission_rates: &CommissionRates,
    ) -> Result<Account> {
        if role != AccountRole::Master && parent_id.is_none() {
            bail!("non-master account {} requires a parent", username);
        }

        let rates_json = serde_json::to_string(commission_rates)
            .context("Failed to serialize commission rates")?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let conn = self.conn.lock();
        if let Some(parent) = parent_id {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM accounts WHERE id = ?1",
                    [parent],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                bail!("parent account {} not found", parent);
            }
        }

        conn.execute(
            "INSERT INTO accounts (id, username, role, parent_id, credit, commission_rates_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0.0, ?5, ?6, ?6)",
            params![id, username, role.as_str(), parent_id, rates_json, now.to_rfc3339()],
        )
        .with_context(|| format!("Failed to insert account {}", username))?;

        Ok(Account {
            id,
            username: username.to_string(),
            role,
            parent_id: parent_id.map(str::to_string),
            credit: 0.0,
            commission_rates: commission_rates.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, username, role, parent_id, credit, commission_rates_json, created_at, updated_at
             FROM accounts WHERE id = ?1",
        )?;
        let account = stmt
            .query_row([id], Self::row_to_account)
            .optional()
            .context("Failed to load account")?;
        Ok(account)
    }

    fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
        let role_str: String = row.get(2)?;
        let rates_json: String = row.get(5)?;
        let created_at: String = row.get(6)?;
        let updated_at: String = row.get(7)?;

        Ok(Account {
            id: row.get(0)?,
            username: row.get(1)?,
            role: role_str
                .parse()
                .map_err(|e: String| to_sql_err(e.as_str()))?,
            parent_id: row.get(3)?,
            credit: row.get(4)?,
            commission_rates: serde_json::from_str(&rates_json)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    // ===== Draw results =====

    /// Store a published result. Results are insert-only: publishing the
    /// same draw twice is rejected.
    pub fn insert_draw_result(&self, result: &DrawResult) -> Result<()> {
        let run_top = serde_json::to_string(&result.run_top)?;
        let run_bottom = serde_json::to_string(&result.run_bottom)?;

        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO draw_results
             (draw_id, three_top, two_top, two_bottom, run_top_json, run_bottom_json, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.draw_id,
                result.three_top,
                result.two_top,
                result.two_bottom,
                run_top,
                run_bottom,
                result.published_at.to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            bail!("result for draw {} already published", result.draw_id);
        }
        Ok(())
    }

    pub fn get_draw_result(&self, draw_id: &str) -> Result<Option<DrawResult>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT draw_id, three_top, two_top, two_bottom, run_top_json, run_bottom_json, published_at
             FROM draw_results WHERE draw_id = ?1",
        )?;
        let result = stmt
            .query_row([draw_id], |row| {
                let run_top_json: String = row.get(4)?;
                let run_bottom_json: String = row.get(5)?;
                let published_at: String = row.get(6)?;
                Ok(DrawResult {
                    draw_id: row.get(0)?,
                    three_top: row.get(1)?,
                    two_top: row.get(2)?,
                    two_bottom: row.get(3)?,
                    run_top: serde_json::from_str(&run_top_json)
                        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
                    run_bottom: serde_json::from_str(&run_bottom_json)
                        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
                    published_at: parse_ts(&published_at)?,
                })
            })
            .optional()
            .context("Failed to load draw result")?;
        Ok(result)
    }

    // ===== Bets =====

    /// Insert a bet with its lines as one atomic unit.
    pub fn insert_bet(&self, bet: &Bet) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let outcome = (|| -> Result<()> {
            conn.execute(
                "INSERT INTO bets (id, account_id, draw_id, category, stake_total, status, total_win_amount, placed_at, settled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
                params![
                    bet.id,
                    bet.account_id,
                    bet.draw_id,
                    bet.category,
                    bet.stake_total,
                    bet.status.as_str(),
                    bet.total_win_amount,
                    bet.placed_at.to_rfc3339(),
                ],
            )?;
            for (line_no, line) in bet.lines.iter().enumerate() {
                conn.execute(
                    "INSERT INTO bet_lines (bet_id, line_no, bet_type, number, stake, payout_rate, potential_win, is_win, win_amount)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL)",
                    params![
                        bet.id,
                        line_no as i64,
                        line.bet_type.as_str(),
                        line.number,
                        line.stake,
                        line.payout_rate,
                        line.potential_win,
                    ],
                )?;
            }
            Ok(())
        })();

        match outcome {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e).with_context(|| format!("Failed to insert bet {}", bet.id))
            }
        }
    }

    pub fn get_bet(&self, id: &str) -> Result<Option<Bet>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare_cached(
            "SELECT id, account_id, draw_id, category, stake_total, status, total_win_amount, placed_at, settled_at
             FROM bets WHERE id = ?1",
        )?;
        let header = stmt
            .query_row([id], |row| {
                let status: String = row.get(5)?;
                let placed_at: String = row.get(7)?;
                let settled_at: Option<String> = row.get(8)?;
                Ok(Bet {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    draw_id: row.get(2)?,
                    category: row.get(3)?,
                    lines: Vec::new(),
                    stake_total: row.get(4)?,
                    status: status.parse().map_err(|e: String| to_sql_err(&e))?,
                    total_win_amount: row.get(6)?,
                    placed_at: parse_ts(&placed_at)?,
                    settled_at: match settled_at {
                        Some(ts) => Some(parse_ts(&ts)?),
                        None => None,
                    },
                })
            })
            .optional()
            .context("Failed to load bet")?;

        let Some(mut bet) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare_cached(
            "SELECT bet_type, number, stake, payout_rate, potential_win, is_win, win_amount
             FROM bet_lines WHERE bet_id = ?1 ORDER BY line_no",
        )?;
        bet.lines = stmt
            .query_map([id], |row| {
                let bet_type: String = row.get(0)?;
                let is_win: Option<i64> = row.get(5)?;
                Ok(BetLine {
                    bet_type: bet_type.parse().map_err(|e: String| to_sql_err(&e))?,
                    number: row.get(1)?,
                    stake: row.get(2)?,
                    payout_rate: row.get(3)?,
                    potential_win: row.get(4)?,
                    is_win: is_win.map(|v| v == 1),
                    win_amount: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load bet lines")?;

        Ok(Some(bet))
    }

    /// Ids of bets still pending for a draw, oldest first.
    pub fn pending_bet_ids(&self, draw_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id FROM bets WHERE draw_id = ?1 AND status = 'pending' ORDER BY placed_at, id",
        )?;
        let ids = stmt
            .query_map([draw_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Check-and-set transition pending -> won/lost, persisting per-line
    /// outcomes in the same transaction. Returns false when the bet was not
    /// pending anymore; the caller treats that as an idempotent no-op.
    pub fn finalize_bet(
        &self,
        bet_id: &str,
        status: BetStatus,
        total_win_amount: f64,
        settled_at: DateTime<Utc>,
        lines: &[BetLine],
    ) -> Result<bool> {
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let outcome = (|| -> Result<bool> {
            let changed = conn.execute(
                "UPDATE bets SET status = ?1, total_win_amount = ?2, settled_at = ?3
                 WHERE id = ?4 AND status = 'pending'",
                params![
                    status.as_str(),
                    total_win_amount,
                    settled_at.to_rfc3339(),
                    bet_id,
                ],
            )?;
            if changed == 0 {
                return Ok(false);
            }

            for (line_no, line) in lines.iter().enumerate() {
                conn.execute(
                    "UPDATE bet_lines SET is_win = ?1, win_amount = ?2
                     WHERE bet_id = ?3 AND line_no = ?4",
                    params![
                        line.is_win.map(|v| v as i64),
                        line.win_amount,
                        bet_id,
                        line_no as i64,
                    ],
                )?;
            }
            Ok(true)
        })();

        match outcome {
            Ok(settled) => {
                conn.execute("COMMIT", [])?;
                Ok(settled)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e).with_context(|| format!("Failed to finalize bet {}", bet_id))
            }
        }
    }
}

fn parse_ts(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn to_sql_err(msg: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        msg.to_string(),
    )))
}
