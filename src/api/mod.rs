//! HTTP surface: thin glue over the settlement engine and ledger.

pub mod routes;

pub use routes::{create_router, AppState};
