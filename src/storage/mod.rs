//! Persistence layer: SQLite-backed store for accounts, bets, draw
//! results, and the credit transaction log.

pub mod db;

pub use db::Store;
