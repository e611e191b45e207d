//! Commission Cascade
//!
//! After a bet settles (win or loss), each account above the placing
//! member earns commission as a percentage of the wagered stake. Tiers are
//! credited from the immediate parent upward to the root, one independent
//! ledger entry per tier; a failing tier never rolls back the tiers that
//! already committed.

use crate::ledger::Ledger;
use crate::models::{Account, Bet, CreditAction, CreditReason, CreditTransaction};
use crate::storage::Store;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Upper bound on the parent walk; a longer chain indicates corrupt data.
pub const MAX_CHAIN_DEPTH: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    #[error("ownership chain broken: {0}")]
    BrokenChain(String),

    #[error("cascade partially applied: tier {failed_tier} failed: {reason}")]
    Partial {
        succeeded: Vec<CreditTransaction>,
        failed_tier: String,
        reason: String,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

/// Resolve the upline of an account: immediate parent first, root last.
///
/// The walk is bounded and cycle-checked so corrupt parent links surface
/// as `BrokenChain` instead of looping.
pub fn ownership_chain(store: &Store, account_id: &str) -> Result<Vec<Account>, CascadeError> {
    let start = store
        .get_account(account_id)
        .map_err(|e| CascadeError::Storage(e.to_string()))?
        .ok_or_else(|| CascadeError::BrokenChain(format!("account {} not found", account_id)))?;

    let mut seen: HashSet<String> = HashSet::from([start.id.clone()]);
    let mut chain = Vec::new();
    let mut next = start.parent_id;

    while let Some(parent_id) = next {
        if !seen.insert(parent_id.clone()) {
            return Err(CascadeError::BrokenChain(format!(
                "cycle through account {}",
                parent_id
            )));
        }
        if chain.len() >= MAX_CHAIN_DEPTH {
            return Err(CascadeError::BrokenChain(format!(
                "chain exceeds {} tiers above {}",
                MAX_CHAIN_DEPTH, account_id
            )));
        }
        let parent = store
            .get_account(&parent_id)
            .map_err(|e| CascadeError::Storage(e.to_string()))?
            .ok_or_else(|| {
                CascadeError::BrokenChain(format!("parent account {} not found", parent_id))
            })?;
        next = parent.parent_id.clone();
        chain.push(parent);
    }

    Ok(chain)
}

/// Commission owed to one tier for a bet: per line, the tier's configured
/// rate for the bet's category and line's type, applied to the line stake.
pub fn tier_commission(tier: &Account, bet: &Bet) -> f64 {
    bet.lines
        .iter()
        .map(|line| line.stake * tier.commission_rate(&bet.category, line.bet_type) / 100.0)
        .sum()
}

/// Record commission for every tier above the bet's placing account.
///
/// Invoked exactly once per settled bet, regardless of outcome; commission
/// is a percentage of stake, not of winnings. Tiers whose commission comes
/// to zero get no ledger entry. On a tier failure the entries already
/// committed are reported in `CascadeError::Partial` for reconciliation.
pub fn distribute(
    store: &Store,
    ledger: &Ledger,
    bet: &Bet,
) -> Result<Vec<CreditTransaction>, CascadeError> {
    let tiers = ownership_chain(store, &bet.account_id)?;
    let mut recorded = Vec::new();

    for tier in &tiers {
        let commission = tier_commission(tier, bet);
        if commission <= 0.0 {
            debug!(tier = %tier.username, bet = %bet.id, "no commission configured, tier skipped");
            continue;
        }

        match ledger.apply(
            &tier.id,
            CreditAction::Add,
            commission,
            CreditReason::Commission,
            Some(&bet.id),
        ) {
            Ok(tx) => recorded.push(tx),
            Err(e) => {
                warn!(
                    tier = %tier.id,
                    bet = %bet.id,
                    error = %e,
                    committed = recorded.len(),
                    "commission cascade stopped mid-chain"
                );
                return Err(CascadeError::Partial {
                    succeeded: recorded,
                    failed_tier: tier.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(recorded)
}
