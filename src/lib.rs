//! tradesim library
//!
//! Simulated equity trading: random-walk prices, an execution engine over a
//! transactional store, and per-account / per-instrument push channels.

pub mod application;
pub mod auth;
pub mod config;
pub mod domain;
pub mod persistence;
