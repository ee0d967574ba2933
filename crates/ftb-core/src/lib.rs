//! Core domain + application logic for the forum-to-Telegram relay bot.
//!
//! This crate is intentionally framework-agnostic. The forum HTTP client and
//! the Telegram messenger live behind ports (traits) implemented in adapter
//! crates.

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod fetcher;
pub mod formatting;
pub mod ledger;
pub mod logging;
pub mod poller;
pub mod ports;
pub mod session;

pub use errors::{Error, Result};
