//! Credit Ledger Recorder
//!
//! Every balance change in the system goes through `Ledger::apply`: it
//! reads the account's current credit, writes the new value, and appends
//! an immutable CreditTransaction capturing before/after state, all inside
//! one BEGIN IMMEDIATE transaction. The cached `accounts.credit` column is
//! therefore always equal to the last recorded `credit_after`, and
//! `replay_balance` / `verify_chain` can reconcile it against the log.

use crate::models::{CreditAction, CreditReason, CreditTransaction};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tracing::debug;

/// Tolerance for comparing monetary f64 values when auditing the chain.
const AMOUNT_EPS: f64 = 1e-6;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("adjustment amount must be positive, got {0}")]
    InvalidAmount(f64),

    #[error("insufficient credit: {available} < {required}")]
    InsufficientCredit { available: f64, required: f64 },

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("ledger write lost a serialization race, retry")]
    Conflict,

    #[error("transaction chain broken for account {account_id}: {detail}")]
    ChainBroken { account_id: String, detail: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy)
            | Some(rusqlite::ErrorCode::DatabaseLocked) => LedgerError::Conflict,
            _ => LedgerError::Storage(e.to_string()),
        }
    }
}

/// Recorder for credit adjustments against hierarchical accounts
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
}

impl Ledger {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Apply one signed adjustment to an account as an atomic
    /// read-compute-write-append unit.
    ///
    /// Deducts larger than the current credit fail with
    /// `InsufficientCredit` and leave the account untouched; amounts are
    /// never clamped.
    pub fn apply(
        &self,
        account_id: &str,
        action: CreditAction,
        amount: f64,
        reason: CreditReason,
        ref_id: Option<&str>,
    ) -> Result<CreditTransaction, LedgerError> {
        if !(amount > 0.0) || !amount.is_finite() {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let outcome = (|| -> Result<CreditTransaction, LedgerError> {
            let credit_before: f64 = conn
                .query_row(
                    "SELECT credit FROM accounts WHERE id = ?1",
                    [account_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

            let credit_after = match action {
                CreditAction::Add => credit_before + amount,
                CreditAction::Deduct => {
                    if credit_before < amount {
                        return Err(LedgerError::InsufficientCredit {
                            available: credit_before,
                            required: amount,
                        });
                    }
                    credit_before - amount
                }
            };

            let now = Utc::now();
            conn.execute(
                "UPDATE accounts SET credit = ?1, updated_at = ?2 WHERE id = ?3",
                params![credit_after, now.to_rfc3339(), account_id],
            )?;

            let tx = CreditTransaction {
                id: uuid::Uuid::new_v4().to_string(),
                account_id: account_id.to_string(),
                action,
                amount,
                credit_before,
                credit_after,
                reason,
                ref_id: ref_id.map(str::to_string),
                created_at: now,
            };
            conn.execute(
                "INSERT INTO credit_transactions
                 (id, account_id, action, amount, credit_before, credit_after, reason, ref_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    tx.id,
                    tx.account_id,
                    tx.action.as_str(),
                    tx.amount,
                    tx.credit_before,
                    tx.credit_after,
                    tx.reason.as_str(),
                    tx.ref_id,
                    tx.created_at.to_rfc3339(),
                ],
            )?;

            Ok(tx)
        })();

        match outcome {
            Ok(tx) => {
                conn.execute("COMMIT", [])?;
                debug!(
                    account = %tx.account_id,
                    action = tx.action.as_str(),
                    amount = tx.amount,
                    after = tx.credit_after,
                    "ledger entry recorded"
                );
                Ok(tx)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    /// Audit history for an account, most recent first.
    pub fn history(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<CreditTransaction>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, account_id, action, amount, credit_before, credit_after, reason, ref_id, created_at
             FROM credit_transactions WHERE account_id = ?1 ORDER BY seq DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![account_id, limit as i64], row_to_transaction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Every entry that traces back to one bet (payout plus commissions).
    pub fn by_ref(&self, ref_id: &str) -> Result<Vec<CreditTransaction>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, account_id, action, amount, credit_before, credit_after, reason, ref_id, created_at
             FROM credit_transactions WHERE ref_id = ?1 ORDER BY seq",
        )?;
        let entries = stmt
            .query_map([ref_id], row_to_transaction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn chain(&self, account_id: &str) -> Result<Vec<CreditTransaction>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, account_id, action, amount, credit_before, credit_after, reason, ref_id, created_at
             FROM credit_transactions WHERE account_id = ?1 ORDER BY seq",
        )?;
        let entries = stmt
            .query_map([account_id], row_to_transaction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Recompute the balance as a fold over the transaction log. Accounts
    /// open at zero credit, so the fold starts from zero.
    pub fn replay_balance(&self, account_id: &str) -> Result<f64, LedgerError> {
        let chain = self.chain(account_id)?;
        Ok(chain.iter().fold(0.0, |acc, tx| match tx.action {
            CreditAction::Add => acc + tx.amount,
            CreditAction::Deduct => acc - tx.amount,
        }))
    }

    /// Walk the account's transaction log asserting the before/after chain:
    /// each entry balances, consecutive entries link, and the cached credit
    /// equals the last `credit_after`.
    pub fn verify_chain(&self, account_id: &str) -> Result<(), LedgerError> {
        let chain = self.chain(account_id)?;

        let mut prev_after: Option<f64> = None;
        for tx in &chain {
            let expected_after = match tx.action {
                CreditAction::Add => tx.credit_before + tx.amount,
                CreditAction::Deduct => tx.credit_before - tx.amount,
            };
            if (tx.credit_after - expected_after).abs() > AMOUNT_EPS {
                return Err(LedgerError::ChainBroken {
                    account_id: account_id.to_string(),
                    detail: format!(
                        "entry {} does not balance: {} {} {} -> {}",
                        tx.id,
                        tx.credit_before,
                        tx.action.as_str(),
                        tx.amount,
                        tx.credit_after
                    ),
                });
            }
            if let Some(prev) = prev_after {
                if (tx.credit_before - prev).abs() > AMOUNT_EPS {
                    return Err(LedgerError::ChainBroken {
                        account_id: account_id.to_string(),
                        detail: format!(
                            "entry {} starts at {} but previous entry ended at {}",
                            tx.id, tx.credit_before, prev
                        ),
                    });
                }
            }
            prev_after = Some(tx.credit_after);
        }

        let cached: f64 = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT credit FROM accounts WHERE id = ?1",
                [account_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?
        };
        let last_after = prev_after.unwrap_or(0.0);
        if (cached - last_after).abs() > AMOUNT_EPS {
            return Err(LedgerError::ChainBroken {
                account_id: account_id.to_string(),
                detail: format!(
                    "cached credit {} != last recorded credit_after {}",
                    cached, last_after
                ),
            });
        }

        Ok(())
    }
}

fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<CreditTransaction> {
    let action: String = row.get(2)?;
    let reason: String = row.get(6)?;
    let created_at: String = row.get(8)?;

    Ok(CreditTransaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        action: action
            .parse()
            .map_err(|e: String| invalid_column(&e))?,
        amount: row.get(3)?,
        credit_before: row.get(4)?,
        credit_after: row.get(5)?,
        reason: reason
            .parse()
            .map_err(|e: String| invalid_column(&e))?,
        ref_id: row.get(7)?,
        created_at: parse_ts(&created_at)?,
    })
}

fn parse_ts(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn invalid_column(msg: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        msg.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountRole;
    use crate::storage::Store;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn store_with_account() -> (Arc<Store>, String) {
        let store = Arc::new(Store::new(":memory:").expect("Failed to create database"));
        let account = store
            .create_account("master", AccountRole::Master, None, &HashMap::new())
            .unwrap();
        (store, account.id)
    }

    #[test]
    fn applies_chain_of_adds_and_deducts() {
        let (store, id) = store_with_account();
        let ledger = store.ledger();

        ledger
            .apply(&id, CreditAction::Add, 1000.0, CreditReason::Adjust, None)
            .unwrap();
        ledger
            .apply(&id, CreditAction::Deduct, 300.0, CreditReason::Stake, Some("bet-1"))
            .unwrap();
        ledger
            .apply(&id, CreditAction::Add, 50.0, CreditReason::Commission, Some("bet-1"))
            .unwrap();

        let account = store.get_account(&id).unwrap().unwrap();
        assert_eq!(account.credit, 750.0);
        assert_eq!(ledger.replay_balance(&id).unwrap(), 750.0);
        ledger.verify_chain(&id).unwrap();

        let history = ledger.history(&id, 10).unwrap();
        assert_eq!(history.len(), 3);
        // Most recent first, and entries link into a gapless chain.
        assert_eq!(history[0].reason, CreditReason::Commission);
        assert_eq!(history[0].credit_before, history[1].credit_after);
        assert_eq!(history[1].credit_before, history[2].credit_after);
    }

    #[test]
    fn over_deduct_fails_and_leaves_credit_unchanged() {
        let (store, id) = store_with_account();
        let ledger = store.ledger();

        ledger
            .apply(&id, CreditAction::Add, 100.0, CreditReason::Adjust, None)
            .unwrap();
        let err = ledger
            .apply(&id, CreditAction::Deduct, 100.01, CreditReason::Stake, None)
            .unwrap_err();

        match err {
            LedgerError::InsufficientCredit {
                available,
                required,
            } => {
                assert_eq!(available, 100.0);
                assert_eq!(required, 100.01);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(store.get_account(&id).unwrap().unwrap().credit, 100.0);
        assert_eq!(ledger.history(&id, 10).unwrap().len(), 1);
        ledger.verify_chain(&id).unwrap();
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        let (store, id) = store_with_account();
        let ledger = store.ledger();

        for bad in [0.0, -5.0, f64::NAN] {
            let err = ledger
                .apply(&id, CreditAction::Add, bad, CreditReason::Adjust, None)
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)));
        }
        assert!(ledger.history(&id, 10).unwrap().is_empty());
    }

    #[test]
    fn unknown_account_is_reported() {
        let (store, _) = store_with_account();
        let ledger = store.ledger();
        let err = ledger
            .apply("nope", CreditAction::Add, 1.0, CreditReason::Adjust, None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_applies_keep_the_chain_gapless() {
        let (store, id) = store_with_account();
        let ledger = store.ledger();
        ledger
            .apply(&id, CreditAction::Add, 1000.0, CreditReason::Adjust, None)
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            let id = id.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let action = if i % 2 == 0 {
                    CreditAction::Add
                } else {
                    CreditAction::Deduct
                };
                ledger.apply(&id, action, 10.0, CreditReason::Adjust, None)
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // 10 adds and 10 deducts of 10.0 cancel out.
        let account = store.get_account(&id).unwrap().unwrap();
        assert_eq!(account.credit, 1000.0);
        assert_eq!(ledger.replay_balance(&id).unwrap(), 1000.0);
        ledger.verify_chain(&id).unwrap();
    }
}
