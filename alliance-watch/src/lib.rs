//! alliance-watch library crate.
//!
//! Serializes every game API call through one queue worker and keeps the
//! stored alliance rosters in sync with the game.

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod queue;
pub mod scheduler;
pub mod services;

pub use error::{Error, Result};
