//! # Position Engine
//!
//! Position-targeting order execution for crypto futures strategies. Callers
//! state a desired holding; the engine reads the exchange, places market
//! orders and re-reads until the holding matches or the budget runs out.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `registry`: Immutable account and instrument snapshot
//! - `exchange`: Adapter trait, Binance futures client, paper exchange
//! - `cache`: Latest top of book per symbol
//! - `engine`: Diff, convergence, percentage and multi-leg routines
//! - `executor`: RPC messages and the `Executor` trait handed to strategies
//! - `server`: In-process service, HTTP front and remote client
//! - `persistence`: SQLite registry and audit store
//! - `notify`: Trade summary delivery
//! - `utils`: Shared decimal arithmetic

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod notify;
pub mod persistence;
pub mod registry;
pub mod server;
pub mod utils;

pub use config::Config;
pub use error::ExecutionError;
pub use executor::Executor;
