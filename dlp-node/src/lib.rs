//! DLP Engine Host Node
//!
//! Hosts a single [`dlp_core::Engine`] and applies a stream of transactions
//! against it, one at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            Transaction stream (JSON lines)           │
//! └────────────────────┬────────────────────────────────┘
//!                      │ decode
//!                      ↓
//! ┌─────────────────────────────────────────────────────┐
//! │              DlpApp                                  │
//! │  deliver → Receipt { ok, error, output, events }    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//!                      ↓
//! ┌─────────────────────────────────────────────────────┐
//! │              DLP Core                                │
//! │  Registry + stakes + epochs + rewards               │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - A rejected transaction leaves state untouched and emits no events
//! - Queries never mutate state
//! - Snapshot restore reproduces the same state digest

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod app;
pub mod config;
pub mod error;

// Re-exports
pub use app::{Command, ConfigUpdate, DlpApp, NodeSnapshot, Receipt, Transaction};
pub use config::Config;
pub use error::{Error, Result};
