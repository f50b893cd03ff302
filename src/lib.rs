//! settle-up: group expense ledgers, balances and debt simplification.
//!
//! The [`settle`] module holds the pure settlement engine. The rest of the crate stores ledgers
//! in SQLite and exposes them through the `settle` CLI and an MCP server.

pub mod args;
mod backup;
pub mod commands;
mod config;
mod db;
mod error;
mod mcp;
pub mod model;
pub mod settle;
mod utils;


pub use backup::Backup;
pub use config::Config;
pub use db::{EntryReceipt, LinkReport};
pub use error::{Error, ErrorType, Result};
