//! Core logic for the Warden group-moderation bot.
//!
//! Everything in this crate is transport-agnostic: the Telegram API lives
//! behind the [`ports::ChatPort`] trait, implemented by the adapter crate
//! and by in-memory fakes in tests.

pub mod audit;
pub mod channels;
pub mod clock;
pub mod config;
pub mod content;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod mutes;
pub mod ports;
pub mod security;
pub mod store;
pub mod throttle;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{ChannelUnusable, Error, Result};
