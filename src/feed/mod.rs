//! The feed-fetch pipeline: fetch, parse, and periodically store RSS feeds.
//!
//! - [`fetcher`] - bounded HTTP GET with a caller-supplied timeout
//! - [`parser`] - RSS 2.0 decoding into a [`Channel`] with HTML-unescaped text
//! - [`scheduler`] - the fixed-interval loop that refreshes one feed per tick
//! - [`store`] - the persistence contract the scheduler consumes

mod fetcher;
mod parser;
mod scheduler;
mod store;

pub use fetcher::{FetchError, Fetcher};
pub use parser::{parse, Channel, Item, ParseError};
pub use scheduler::{FeedError, Scheduler, SchedulerError, Shutdown, TickOutcome};
pub use store::{FeedStore, StoreError};
