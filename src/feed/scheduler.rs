//! Periodic aggregation loop: one feed fetched and committed per tick.
//!
//! Each tick asks the [`FeedStore`] for the least recently fetched feed,
//! downloads and parses it, marks it fetched, and inserts any posts the store
//! has not seen. Feed-level failures (network, HTTP status, bad XML) are
//! logged and swallowed so one broken feed cannot stop aggregation; store
//! failures end the loop because nothing useful can happen without storage.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::fetcher::{FetchError, Fetcher};
use super::parser::{self, Channel, ParseError};
use super::store::{FeedStore, StoreError};
use crate::storage::{Feed, NewPost};

/// Why a single feed could not be refreshed. Never fatal to the loop.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Fatal scheduler failure: the store is unusable.
#[derive(Debug, Error)]
#[error("Feed store failed during tick: {0}")]
pub struct SchedulerError(#[from] pub StoreError);

/// What one tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// The store holds no feeds
    Idle,
    /// The feed was fetched and parsed; counts refer to its items
    Fetched {
        feed_id: i64,
        inserted: usize,
        duplicates: usize,
        /// Items without a link cannot be deduplicated and are dropped
        skipped: usize,
    },
    /// Fetching or parsing failed; the feed was still marked fetched
    Failed { feed_id: i64, error: FeedError },
}

/// Sender half of the scheduler's stop signal.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Sender<bool>);

impl Shutdown {
    /// Create a stop signal and the receiver to hand to [`Scheduler::run`].
    pub fn channel() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self(tx), rx)
    }

    /// Ask the loop to stop after the tick in flight, if any.
    pub fn trigger(&self) {
        // send_replace never fails, even when every receiver is gone
        self.0.send_replace(true);
    }
}

/// Fixed-interval driver over a [`FeedStore`].
pub struct Scheduler<S> {
    store: S,
    fetcher: Fetcher,
    interval: Duration,
    fetch_timeout: Duration,
}

impl<S: FeedStore> Scheduler<S> {
    pub fn new(store: S, fetcher: Fetcher, interval: Duration, fetch_timeout: Duration) -> Self {
        Self {
            store,
            fetcher,
            interval,
            fetch_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one fetch cycle.
    ///
    /// # Errors
    ///
    /// Only store failures are returned; fetch and parse failures are
    /// reported as [`TickOutcome::Failed`].
    pub async fn tick(&self) -> Result<TickOutcome, SchedulerError> {
        let feed = match self.store.next_feed_to_fetch().await {
            Ok(feed) => feed,
            Err(StoreError::Empty) => {
                tracing::debug!("No feeds to fetch");
                return Ok(TickOutcome::Idle);
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(feed_id = feed.id, url = %feed.url, "Fetching feed");
        let result = self.fetch_channel(&feed).await;

        // Marked even on failure so a broken feed drops to the back of the queue
        self.store
            .mark_fetched(feed.id, chrono::Utc::now().timestamp_millis())
            .await?;

        let channel = match result {
            Ok(channel) => channel,
            Err(error) => {
                tracing::warn!(
                    feed_id = feed.id,
                    url = %feed.url,
                    error = %error,
                    "Feed refresh failed"
                );
                return Ok(TickOutcome::Failed {
                    feed_id: feed.id,
                    error,
                });
            }
        };

        let (inserted, duplicates, skipped) = self.store_items(&feed, channel).await?;
        tracing::info!(
            feed_id = feed.id,
            feed = %feed.name,
            inserted = inserted,
            duplicates = duplicates,
            skipped = skipped,
            "Feed refreshed"
        );

        Ok(TickOutcome::Fetched {
            feed_id: feed.id,
            inserted,
            duplicates,
            skipped,
        })
    }

    /// Tick every `interval` until `shutdown` fires.
    ///
    /// The first tick runs immediately. Ticks never overlap: if a tick runs
    /// longer than the interval the next one starts right after it. The stop
    /// signal is observed between ticks, so a tick in flight always finishes.
    ///
    /// # Errors
    ///
    /// Returns the first store failure, ending the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), SchedulerError> {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval = ?self.interval,
            timeout = ?self.fetch_timeout,
            "Scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = timer.tick() => {
                    self.tick().await?;
                }
                changed = shutdown.changed() => {
                    // A dropped sender can never signal again; treat it as a stop
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }

    async fn fetch_channel(&self, feed: &Feed) -> Result<Channel, FeedError> {
        let bytes = self.fetcher.fetch(&feed.url, self.fetch_timeout).await?;
        Ok(parser::parse(&bytes)?)
    }

    async fn store_items(
        &self,
        feed: &Feed,
        channel: Channel,
    ) -> Result<(usize, usize, usize), StoreError> {
        let (mut inserted, mut duplicates, mut skipped) = (0, 0, 0);

        for item in channel.items {
            let Some(post) = post_from_item(item) else {
                skipped += 1;
                continue;
            };
            if self.store.insert_post_if_absent(feed.id, &post).await? {
                inserted += 1;
            } else {
                duplicates += 1;
            }
        }

        Ok((inserted, duplicates, skipped))
    }
}

/// Turn a parsed item into a storable post. Items without a link have no
/// identity to deduplicate on and yield `None`.
fn post_from_item(item: parser::Item) -> Option<NewPost> {
    let url = item.link.trim();
    if url.is_empty() {
        return None;
    }
    let description = Some(item.description).filter(|d| !d.trim().is_empty());

    Some(NewPost {
        title: item.title,
        url: url.to_string(),
        description,
        published_at: item.pub_date,
    })
}
