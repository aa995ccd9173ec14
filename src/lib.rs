//! crashcore: server-side core for a real-money crash game. Round engine,
//! ledger, deposit indexer, payout dispatcher, realtime bus and the
//! admin/health surface all live here as a library so the binary in
//! `main.rs` is just wiring, and integration tests can drive each component
//! directly.

pub mod admin;
pub mod api;
pub mod book;
pub mod config;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod ledger;
pub mod model;
pub mod payout;
pub mod realtime;
pub mod rng;
pub mod round_history;
