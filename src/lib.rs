//! Lottodesk Backend Library
//!
//! Settlement & ledger engine for numeric lottery bets: match evaluation,
//! bet settlement, hierarchical commission cascade, and an append-only
//! credit ledger. Exposed as a library so the server binary and the
//! integration tests share one implementation.

pub mod api;
pub mod ledger;
pub mod models;
pub mod settlement;
pub mod storage;
