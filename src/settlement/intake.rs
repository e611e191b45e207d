//! Bet intake: placement-time validation and stake collection
//!
//! Malformed lines are rejected here, before a bet ever reaches storage or
//! settlement. The stake is collected through the ledger so every movement
//! of money leaves an audit entry.

use crate::ledger::{Ledger, LedgerError};
use crate::models::{Bet, BetLine, BetStatus, BetType, CreditAction, CreditReason};
use crate::storage::Store;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("bet must contain at least one line")]
    EmptyBet,

    #[error("stake must be a positive amount, got {0}")]
    BadStake(f64),

    #[error("payout rate must be a positive amount, got {0}")]
    BadPayoutRate(f64),

    #[error("number {number:?} must be {expected} digit(s) for bet type {bet_type}")]
    BadNumberLength {
        number: String,
        expected: usize,
        bet_type: &'static str,
    },

    #[error("number {0:?} must be decimal digits only")]
    NonNumeric(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PlaceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("placing account not found: {0}")]
    AccountNotFound(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("storage error: {0}")]
    Storage(String),
}

/// One requested line of a new bet
#[derive(Debug, Clone, Deserialize)]
pub struct NewBetLine {
    pub bet_type: BetType,
    pub number: String,
    pub stake: f64,
    pub payout_rate: f64,
}

/// A bet placement request
#[derive(Debug, Clone, Deserialize)]
pub struct NewBet {
    pub account_id: String,
    pub draw_id: String,
    pub category: String,
    pub lines: Vec<NewBetLine>,
}

/// Reject malformed lines: zero/negative/non-finite amounts and numbers
/// whose length or characters do not fit the bet type.
pub fn validate_line(line: &NewBetLine) -> Result<(), ValidationError> {
    if !(line.stake > 0.0) || !line.stake.is_finite() {
        return Err(ValidationError::BadStake(line.stake));
    }
    if !(line.payout_rate > 0.0) || !line.payout_rate.is_finite() {
        return Err(ValidationError::BadPayoutRate(line.payout_rate));
    }
    if !line.number.chars().all(|c| c.is_ascii_digit()) || line.number.is_empty() {
        return Err(ValidationError::NonNumeric(line.number.clone()));
    }
    if line.number.len() != line.bet_type.number_len() {
        return Err(ValidationError::BadNumberLength {
            number: line.number.clone(),
            expected: line.bet_type.number_len(),
            bet_type: line.bet_type.as_str(),
        });
    }
    Ok(())
}

pub fn validate_bet(bet: &NewBet) -> Result<(), ValidationError> {
    if bet.lines.is_empty() {
        return Err(ValidationError::EmptyBet);
    }
    for line in &bet.lines {
        validate_line(line)?;
    }
    Ok(())
}

/// Validate a placement request, deduct the total stake from the placing
/// account, and store the bet as pending.
///
/// Insufficient credit rejects the bet before anything is stored. If the
/// bet insert itself fails after the stake was taken, the stake is
/// returned through a compensating ledger entry.
pub fn place_bet(store: &Store, ledger: &Ledger, request: NewBet) -> Result<Bet, PlaceError> {
    validate_bet(&request)?;

    store
        .get_account(&request.account_id)
        .map_err(|e| PlaceError::Storage(e.to_string()))?
        .ok_or_else(|| PlaceError::AccountNotFound(request.account_id.clone()))?;

    let lines: Vec<BetLine> = request
        .lines
        .iter()
        .map(|l| BetLine::new(l.bet_type, &l.number, l.stake, l.payout_rate))
        .collect();
    let stake_total: f64 = lines.iter().map(|l| l.stake).sum();

    let bet = Bet {
        id: uuid::Uuid::new_v4().to_string(),
        account_id: request.account_id,
        draw_id: request.draw_id,
        category: request.category,
        lines,
        stake_total,
        status: BetStatus::Pending,
        total_win_amount: 0.0,
        placed_at: Utc::now(),
        settled_at: None,
    };

    ledger.apply(
        &bet.account_id,
        CreditAction::Deduct,
        stake_total,
        CreditReason::Stake,
        Some(&bet.id),
    )?;

    if let Err(e) = store.insert_bet(&bet) {
        warn!(bet = %bet.id, error = %e, "bet insert failed after stake deduction, refunding");
        let refund = ledger.apply(
            &bet.account_id,
            CreditAction::Add,
            stake_total,
            CreditReason::Adjust,
            Some(&bet.id),
        );
        if let Err(refund_err) = refund {
            // Stake is gone and the bet does not exist; needs operator attention.
            tracing::error!(
                bet = %bet.id,
                account = %bet.account_id,
                error = %refund_err,
                "stake refund failed, manual reconciliation required"
            );
        }
        return Err(PlaceError::Storage(e.to_string()));
    }

    info!(
        bet = %bet.id,
        account = %bet.account_id,
        draw = %bet.draw_id,
        stake = stake_total,
        lines = bet.lines.len(),
        "🎫 bet placed"
    );

    Ok(bet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountRole;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn new_line(bet_type: BetType, number: &str) -> NewBetLine {
        NewBetLine {
            bet_type,
            number: number.to_string(),
            stake: 10.0,
            payout_rate: 90.0,
        }
    }

    fn member_with_credit(store: &Store, credit: f64) -> String {
        let master = store
            .create_account("master", AccountRole::Master, None, &HashMap::new())
            .unwrap();
        let member = store
            .create_account("member01", AccountRole::Member, Some(&master.id), &HashMap::new())
            .unwrap();
        if credit > 0.0 {
            store
                .ledger()
                .apply(&member.id, CreditAction::Add, credit, CreditReason::Adjust, None)
                .unwrap();
        }
        member.id
    }

    #[test]
    fn rejects_wrong_number_lengths() {
        let cases = [
            (BetType::ThreeTop, "12"),
            (BetType::ThreeTod, "1234"),
            (BetType::TwoTop, "123"),
            (BetType::TwoBottom, "5"),
            (BetType::RunTop, "12"),
        ];
        for (bet_type, number) in cases {
            let err = validate_line(&new_line(bet_type, number)).unwrap_err();
            assert!(
                matches!(err, ValidationError::BadNumberLength { .. }),
                "{bet_type:?} {number}"
            );
        }
    }

    #[test]
    fn rejects_non_numeric_numbers() {
        for number in ["12a", "-12", "1.5", ""] {
            let err = validate_line(&new_line(BetType::ThreeTop, number)).unwrap_err();
            assert!(matches!(err, ValidationError::NonNumeric(_)), "{number}");
        }
    }

    #[test]
    fn rejects_bad_amounts() {
        let mut line = new_line(BetType::TwoTop, "57");
        line.stake = 0.0;
        assert!(matches!(
            validate_line(&line).unwrap_err(),
            ValidationError::BadStake(_)
        ));

        let mut line = new_line(BetType::TwoTop, "57");
        line.stake = -5.0;
        assert!(matches!(
            validate_line(&line).unwrap_err(),
            ValidationError::BadStake(_)
        ));

        let mut line = new_line(BetType::TwoTop, "57");
        line.payout_rate = f64::INFINITY;
        assert!(matches!(
            validate_line(&line).unwrap_err(),
            ValidationError::BadPayoutRate(_)
        ));
    }

    #[test]
    fn placement_deducts_stake_and_stores_pending_bet() {
        let store = Arc::new(Store::new(":memory:").unwrap());
        let member_id = member_with_credit(&store, 500.0);
        let ledger = store.ledger();

        let bet = place_bet(
            &store,
            &ledger,
            NewBet {
                account_id: member_id.clone(),
                draw_id: "2026-08-01".to_string(),
                category: "thai_gov".to_string(),
                lines: vec![
                    new_line(BetType::TwoTop, "57"),
                    new_line(BetType::RunBottom, "7"),
                ],
            },
        )
        .unwrap();

        assert_eq!(bet.stake_total, 20.0);
        assert_eq!(bet.status, BetStatus::Pending);
        assert_eq!(store.get_account(&member_id).unwrap().unwrap().credit, 480.0);

        let stored = store.get_bet(&bet.id).unwrap().unwrap();
        assert_eq!(stored.lines.len(), 2);
        assert_eq!(stored.lines[0].potential_win, 900.0);
    }

    #[test]
    fn placement_fails_on_insufficient_credit() {
        let store = Arc::new(Store::new(":memory:").unwrap());
        let member_id = member_with_credit(&store, 5.0);
        let ledger = store.ledger();

        let err = place_bet(
            &store,
            &ledger,
            NewBet {
                account_id: member_id.clone(),
                draw_id: "2026-08-01".to_string(),
                category: "thai_gov".to_string(),
                lines: vec![new_line(BetType::TwoTop, "57")],
            },
        )
        .unwrap_err();

        assert!(matches!(
            err,
            PlaceError::Ledger(LedgerError::InsufficientCredit { .. })
        ));
        assert_eq!(store.get_account(&member_id).unwrap().unwrap().credit, 5.0);
    }

    #[test]
    fn empty_bet_is_rejected() {
        let store = Arc::new(Store::new(":memory:").unwrap());
        let member_id = member_with_credit(&store, 100.0);
        let ledger = store.ledger();

        let err = place_bet(
            &store,
            &ledger,
            NewBet {
                account_id: member_id,
                draw_id: "2026-08-01".to_string(),
                category: "thai_gov".to_string(),
                lines: vec![],
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlaceError::Validation(ValidationError::EmptyBet)
        ));
    }
}
