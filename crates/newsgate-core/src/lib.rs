//! Core library for newsgate, a news-aggregation republishing gateway.
//!
//! Pulls posts from heterogeneous upstream platforms (Twitter via webhook +
//! scraper, a decentralised social graph, RSS/Atom feeds, a video platform)
//! and republishes them onto a single target microblog account. This crate
//! contains the full business logic; `newsgate-cli` and `newsgate-server`
//! are thin entry points over it.

pub mod adapters;
pub mod automation;
pub mod config;
pub mod error;
pub mod formatter;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod publisher;
pub mod queue;
pub mod safety;
pub mod storage;
pub mod tier;

pub use error::*;

/// Returns the version of the newsgate-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
