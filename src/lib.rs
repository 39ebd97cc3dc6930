//! gator: a command-line RSS aggregator.
//!
//! Users register, add and follow RSS feeds, and run `gator agg` to fetch
//! one feed per interval into SQLite; `gator browse` shows the newest posts.
//!
//! - [`feed`]: fetcher, parser and the scheduler loop over a [`feed::FeedStore`]
//! - [`storage`]: the SQLite-backed store
//! - [`commands`]: the CLI surface

pub mod commands;
pub mod config;
pub mod feed;
pub mod session;
pub mod storage;
pub mod util;
