//! Settlement core: match rules, bet settlement, commission cascade, and
//! bet intake.
//!
//! Flow: DrawResult -> match evaluation (per line) -> settlement
//! aggregation (per bet) -> payout + commission cascade (per tier) ->
//! ledger entries.

pub mod cascade;
pub mod engine;
pub mod intake;
pub mod matcher;

pub use cascade::{distribute, ownership_chain, CascadeError, MAX_CHAIN_DEPTH};
pub use engine::{
    evaluate_lines, DrawSettlementReport, FailedSettlement, LineOutcomes, SettleError,
    SettlementEngine, SettlementSummary,
};
pub use intake::{place_bet, validate_bet, NewBet, NewBetLine, PlaceError, ValidationError};
