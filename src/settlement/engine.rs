//! Bet settlement: line aggregation and the pending -> won/lost transition
//!
//! `evaluate_lines` is the pure part: it never touches storage and never
//! mutates its input. `SettlementEngine` owns the impure orchestration:
//! the check-and-set status transition, persisting line outcomes, crediting
//! the payout, and triggering the commission cascade exactly once per bet.

use crate::ledger::{Ledger, LedgerError};
use crate::models::{Bet, BetLine, BetStatus, CreditAction, CreditReason, CreditTransaction, DrawResult};
use crate::settlement::cascade::{self, CascadeError};
use crate::storage::Store;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SettleError {
    #[error("bet not found: {0}")]
    BetNotFound(String),

    #[error("bet belongs to draw {bet_draw}, result is for draw {result_draw}")]
    DrawMismatch {
        bet_draw: String,
        result_draw: String,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for SettleError {
    fn from(e: anyhow::Error) -> Self {
        SettleError::Storage(e.to_string())
    }
}

/// Outcome of evaluating every line of a bet against a result
#[derive(Debug, Clone)]
pub struct LineOutcomes {
    pub lines: Vec<BetLine>,
    pub total_win: f64,
    pub won: bool,
}

/// Apply the match rule to every line, producing settled line records.
///
/// Winning lines pay their precomputed `potential_win`; losing lines pay
/// zero. The input is left untouched.
pub fn evaluate_lines(lines: &[BetLine], result: &DrawResult) -> LineOutcomes {
    let mut settled = Vec::with_capacity(lines.len());
    let mut total_win = 0.0;

    for line in lines {
        let matched = line.bet_type.matches(&line.number, result);
        let win_amount = if matched { line.potential_win } else { 0.0 };
        total_win += win_amount;

        let mut line = line.clone();
        line.is_win = Some(matched);
        line.win_amount = Some(win_amount);
        settled.push(line);
    }

    LineOutcomes {
        lines: settled,
        total_win,
        won: total_win > 0.0,
    }
}

/// Settlement result surfaced to callers and the API layer
#[derive(Debug, Clone, Serialize)]
pub struct SettlementSummary {
    pub bet_id: String,
    pub status: BetStatus,
    pub total_win_amount: f64,
    /// Ledger entries recorded for this bet (payout and commissions).
    pub transactions: Vec<CreditTransaction>,
    /// Set when the commission cascade did not fully commit; the entries in
    /// `transactions` show which tiers did.
    pub cascade_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedSettlement {
    pub bet_id: String,
    pub error: String,
}

/// Outcome of settling every pending bet of one draw
#[derive(Debug, Clone, Serialize)]
pub struct DrawSettlementReport {
    pub draw_id: String,
    pub settled: usize,
    pub won: usize,
    pub lost: usize,
    pub failures: Vec<FailedSettlement>,
    pub summaries: Vec<SettlementSummary>,
}

/// Orchestrates the one-time transition of bets from pending to settled
#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<Store>,
    ledger: Ledger,
}

impl SettlementEngine {
    pub fn new(store: Arc<Store>) -> Self {
        let ledger = store.ledger();
        Self { store, ledger }
    }

    /// Settle one bet against a published result.
    ///
    /// Safe to retry: a bet that already left pending (including losing a
    /// concurrent race on the status check-and-set) returns its stored
    /// outcome instead of settling twice.
    pub async fn settle_bet(
        &self,
        bet_id: &str,
        result: &DrawResult,
    ) -> Result<SettlementSummary, SettleError> {
        let bet = self
            .store
            .get_bet(bet_id)?
            .ok_or_else(|| SettleError::BetNotFound(bet_id.to_string()))?;

        if bet.draw_id != result.draw_id {
            return Err(SettleError::DrawMismatch {
                bet_draw: bet.draw_id,
                result_draw: result.draw_id.clone(),
            });
        }

        if bet.status != BetStatus::Pending {
            return self.stored_summary(bet);
        }

        let outcomes = evaluate_lines(&bet.lines, result);
        let status = if outcomes.won {
            BetStatus::Won
        } else {
            BetStatus::Lost
        };

        let transitioned = self.store.finalize_bet(
            bet_id,
            status,
            outcomes.total_win,
            Utc::now(),
            &outcomes.lines,
        )?;
        if !transitioned {
            // Lost the race against a concurrent settler; its outcome stands.
            let bet = self
                .store
                .get_bet(bet_id)?
                .ok_or_else(|| SettleError::BetNotFound(bet_id.to_string()))?;
            return self.stored_summary(bet);
        }

        let mut transactions = Vec::new();
        if outcomes.won {
            let payout = self.ledger.apply(
                &bet.account_id,
                CreditAction::Add,
                outcomes.total_win,
                CreditReason::Payout,
                Some(bet_id),
            )?;
            transactions.push(payout);
        }

        let cascade_error = match cascade::distribute(&self.store, &self.ledger, &bet) {
            Ok(mut recorded) => {
                transactions.append(&mut recorded);
                None
            }
            Err(CascadeError::Partial {
                mut succeeded,
                failed_tier,
                reason,
            }) => {
                transactions.append(&mut succeeded);
                error!(
                    bet = bet_id,
                    failed_tier = %failed_tier,
                    reason = %reason,
                    "commission cascade partially applied, reconciliation required"
                );
                Some(format!(
                    "tier {} failed: {} (prior tiers committed)",
                    failed_tier, reason
                ))
            }
            Err(e) => {
                error!(bet = bet_id, error = %e, "commission cascade failed");
                Some(e.to_string())
            }
        };

        info!(
            bet = bet_id,
            status = status.as_str(),
            total_win = outcomes.total_win,
            "💰 bet settled"
        );

        Ok(SettlementSummary {
            bet_id: bet_id.to_string(),
            status,
            total_win_amount: outcomes.total_win,
            transactions,
            cascade_error,
        })
    }

    /// Settle every pending bet of a draw. Bets are processed as
    /// independent tasks; one failure never blocks or rolls back another.
    pub async fn settle_draw(&self, result: &DrawResult) -> Result<DrawSettlementReport, SettleError> {
        let bet_ids = self.store.pending_bet_ids(&result.draw_id)?;
        info!(
            draw = %result.draw_id,
            pending = bet_ids.len(),
            "🎯 settling draw"
        );

        let mut handles = Vec::with_capacity(bet_ids.len());
        for bet_id in bet_ids {
            let engine = self.clone();
            let result = result.clone();
            let task_id = bet_id.clone();
            let handle =
                tokio::spawn(async move { engine.settle_bet(&task_id, &result).await });
            handles.push((bet_id, handle));
        }

        let mut report = DrawSettlementReport {
            draw_id: result.draw_id.clone(),
            settled: 0,
            won: 0,
            lost: 0,
            failures: Vec::new(),
            summaries: Vec::new(),
        };

        for (bet_id, handle) in handles {
            match handle.await {
                Ok(Ok(summary)) => {
                    report.settled += 1;
                    match summary.status {
                        BetStatus::Won => report.won += 1,
                        BetStatus::Lost => report.lost += 1,
                        BetStatus::Pending => {}
                    }
                    report.summaries.push(summary);
                }
                Ok(Err(e)) => {
                    warn!(bet = %bet_id, error = %e, "bet settlement failed");
                    report.failures.push(FailedSettlement {
                        bet_id,
                        error: e.to_string(),
                    });
                }
                Err(join_err) => {
                    error!(bet = %bet_id, error = %join_err, "settlement task panicked");
                    report.failures.push(FailedSettlement {
                        bet_id,
                        error: join_err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Summary for a bet that already settled, rebuilt from stored state.
    fn stored_summary(&self, bet: Bet) -> Result<SettlementSummary, SettleError> {
        let transactions = self.ledger.by_ref(&bet.id)?;
        Ok(SettlementSummary {
            bet_id: bet.id,
            status: bet.status,
            total_win_amount: bet.total_win_amount,
            transactions,
            cascade_error: None,
        })
    }
}
