//! `gator <command>` handlers.
//!
//! Every command is a variant of [`Command`] and is dispatched by one
//! exhaustive `match` in [`run`]. Handlers receive the open database, the
//! loaded config and the session through [`Context`] and write their
//! user-facing output to the supplied writer (stdout in `main`).
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Subcommand;
use thiserror::Error;

use crate::config::Config;
use crate::feed::{self, Fetcher, Scheduler, Shutdown};
use crate::session::Session;
use crate::storage::{Database, DatabaseError, User};
use crate::util::{self, UrlValidationError};

/// Width used when printing feed-supplied descriptions.
const DESCRIPTION_COLUMNS: usize = 200;

/// Failures a user can fix by changing what they typed.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("You must be logged in to run '{0}'. Use `gator login <name>` or `gator register <name>`.")]
    NotLoggedIn(&'static str),

    #[error("Logged in as '{0}', but that user no longer exists. Log in again.")]
    StaleSession(String),

    #[error("User '{0}' does not exist")]
    UnknownUser(String),

    #[error("User '{0}' already exists")]
    UserExists(String),

    #[error("A feed with URL '{0}' already exists; use `gator follow` instead")]
    FeedExists(String),

    #[error("No feed with URL '{0}'")]
    UnknownFeed(String),

    #[error("Already following '{0}'")]
    AlreadyFollowing(String),

    #[error("Not following '{0}'")]
    NotFollowing(String),

    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),

    #[error("Limit must be at least 1, got {0}")]
    InvalidLimit(i64),

    #[error("Interval must be greater than zero")]
    ZeroInterval,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Log in as an existing user
    Login { name: String },
    /// Forget the logged-in user
    Logout,
    /// List registered users
    Users,
    /// Delete every user along with their feeds, follows and posts
    Reset,
    /// Add a feed and follow it
    Addfeed { name: String, url: String },
    /// List every feed and who added it
    Feeds,
    /// Follow an existing feed by URL
    Follow { url: String },
    /// List the feeds you follow
    Following,
    /// Stop following a feed
    Unfollow { url: String },
    /// Show the newest posts from the feeds you follow
    Browse {
        /// Number of posts (defaults to `browse_limit` from the config)
        limit: Option<i64>,
    },
    /// Fetch feeds forever, one per interval (e.g. 30s, 1m, 1h30m)
    Agg {
        #[arg(value_parser = util::parse_duration)]
        interval: Duration,
    },
    /// Download a feed once and print it without storing anything
    Fetch { url: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::Login { .. } => "login",
            Command::Logout => "logout",
            Command::Users => "users",
            Command::Reset => "reset",
            Command::Addfeed { .. } => "addfeed",
            Command::Feeds => "feeds",
            Command::Follow { .. } => "follow",
            Command::Following => "following",
            Command::Unfollow { .. } => "unfollow",
            Command::Browse { .. } => "browse",
            Command::Agg { .. } => "agg",
            Command::Fetch { .. } => "fetch",
        }
    }
}

/// Everything a handler may touch.
pub struct Context {
    pub db: Database,
    pub config: Config,
    pub session: Session,
    /// Where `session` is persisted after login/logout
    pub session_path: PathBuf,
}

/// Run `command`, writing user output to `out`. `agg` stops on Ctrl-C.
pub async fn run<W: Write>(command: Command, ctx: &mut Context, out: &mut W) -> Result<()> {
    tracing::debug!(command = command.name(), "Running command");
    match command {
        Command::Register { name } => register(ctx, out, &name).await,
        Command::Login { name } => login(ctx, out, &name).await,
        Command::Logout => logout(ctx, out),
        Command::Users => users(ctx, out).await,
        Command::Reset => reset(ctx, out).await,
        Command::Addfeed { name, url } => add_feed(ctx, out, &name, &url).await,
        Command::Feeds => feeds(ctx, out).await,
        Command::Follow { url } => follow(ctx, out, &url).await,
        Command::Following => following(ctx, out).await,
        Command::Unfollow { url } => unfollow(ctx, out, &url).await,
        Command::Browse { limit } => browse(ctx, out, limit).await,
        Command::Agg { interval } => {
            let ctrl_c = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            };
            aggregate(ctx, out, interval, ctrl_c).await
        }
        Command::Fetch { url } => fetch_once(ctx, out, &url).await,
    }
}

/// Resolve the logged-in user for commands that need one.
pub async fn require_user(ctx: &Context, command: &'static str) -> Result<User> {
    let name = ctx
        .session
        .current_user
        .as_deref()
        .ok_or(CommandError::NotLoggedIn(command))?;

    match ctx.db.get_user_by_name(name).await {
        Ok(user) => Ok(user),
        Err(DatabaseError::NotFound(_)) => Err(CommandError::StaleSession(name.to_string()).into()),
        Err(e) => Err(e.into()),
    }
}

fn save_session(ctx: &Context) -> Result<()> {
    ctx.session.save(&ctx.session_path).with_context(|| {
        format!(
            "Failed to save session to '{}'",
            ctx.session_path.display()
        )
    })
}

// ============================================================================
// Users
// ============================================================================

async fn register<W: Write>(ctx: &mut Context, out: &mut W, name: &str) -> Result<()> {
    let user = match ctx.db.create_user(name).await {
        Ok(user) => user,
        Err(DatabaseError::Conflict(_)) => return Err(CommandError::UserExists(name.into()).into()),
        Err(e) => return Err(e.into()),
    };

    ctx.session.login(&user.name);
    save_session(ctx)?;
    writeln!(out, "User '{}' was created and is now logged in", user.name)?;
    Ok(())
}

async fn login<W: Write>(ctx: &mut Context, out: &mut W, name: &str) -> Result<()> {
    let user = match ctx.db.get_user_by_name(name).await {
        Ok(user) => user,
        Err(DatabaseError::NotFound(_)) => {
            return Err(CommandError::UnknownUser(name.into()).into())
        }
        Err(e) => return Err(e.into()),
    };

    ctx.session.login(&user.name);
    save_session(ctx)?;
    writeln!(out, "Logged in as '{}'", user.name)?;
    Ok(())
}

fn logout<W: Write>(ctx: &mut Context, out: &mut W) -> Result<()> {
    match ctx.session.current_user.take() {
        Some(name) => {
            save_session(ctx)?;
            writeln!(out, "'{name}' was logged out")?;
        }
        None => writeln!(out, "Nobody is logged in")?,
    }
    Ok(())
}

async fn users<W: Write>(ctx: &Context, out: &mut W) -> Result<()> {
    let users = ctx.db.list_users().await?;
    if users.is_empty() {
        writeln!(out, "No users registered")?;
    }
    for user in users {
        if ctx.session.current_user.as_deref() == Some(user.name.as_str()) {
            writeln!(out, "* {} (current)", user.name)?;
        } else {
            writeln!(out, "* {}", user.name)?;
        }
    }
    Ok(())
}

async fn reset<W: Write>(ctx: &mut Context, out: &mut W) -> Result<()> {
    let removed = ctx.db.reset().await.context("Failed to reset database")?;
    ctx.session.logout();
    save_session(ctx)?;
    tracing::info!(users = removed, "Database reset");
    writeln!(out, "Removed {removed} user(s) and everything they owned")?;
    Ok(())
}

// ============================================================================
// Feeds and follows
// ============================================================================

async fn add_feed<W: Write>(ctx: &Context, out: &mut W, name: &str, url: &str) -> Result<()> {
    let user = require_user(ctx, "addfeed").await?;
    let url = util::validate_feed_url(url).map_err(CommandError::from)?;

    let feed = match ctx.db.create_feed(name, url.as_str(), user.id).await {
        Ok(feed) => feed,
        Err(DatabaseError::Conflict(_)) => {
            return Err(CommandError::FeedExists(url.to_string()).into())
        }
        Err(e) => return Err(e.into()),
    };
    let follow = ctx.db.follow_feed(user.id, feed.id).await?;

    writeln!(out, "Added feed '{}' ({})", feed.name, feed.url)?;
    writeln!(out, "'{}' now follows '{}'", follow.user_name, follow.feed_name)?;
    Ok(())
}

async fn feeds<W: Write>(ctx: &Context, out: &mut W) -> Result<()> {
    let feeds = ctx.db.list_feeds().await?;
    if feeds.is_empty() {
        writeln!(out, "No feeds yet. Add one with `gator addfeed <name> <url>`.")?;
    }
    for feed in feeds {
        writeln!(out, "* {}", feed.name)?;
        writeln!(out, "  url:      {}", feed.url)?;
        writeln!(out, "  added by: {}", feed.owner_name)?;
        let posts = ctx.db.count_posts_for_feed(feed.id).await?;
        writeln!(out, "  posts:    {posts}")?;
    }
    Ok(())
}

async fn follow<W: Write>(ctx: &Context, out: &mut W, url: &str) -> Result<()> {
    let user = require_user(ctx, "follow").await?;
    let feed = feed_by_url(ctx, url).await?;

    let follow = match ctx.db.follow_feed(user.id, feed.id).await {
        Ok(follow) => follow,
        Err(DatabaseError::Conflict(_)) => {
            return Err(CommandError::AlreadyFollowing(feed.url).into())
        }
        Err(e) => return Err(e.into()),
    };

    writeln!(out, "'{}' now follows '{}'", follow.user_name, follow.feed_name)?;
    Ok(())
}

async fn following<W: Write>(ctx: &Context, out: &mut W) -> Result<()> {
    let user = require_user(ctx, "following").await?;
    let follows = ctx.db.feeds_followed_by(user.id).await?;

    if follows.is_empty() {
        writeln!(out, "'{}' is not following any feeds", user.name)?;
        return Ok(());
    }
    writeln!(out, "'{}' is following:", user.name)?;
    for follow in follows {
        writeln!(out, "* {} ({})", follow.feed_name, follow.feed_url)?;
    }
    Ok(())
}

async fn unfollow<W: Write>(ctx: &Context, out: &mut W, url: &str) -> Result<()> {
    let user = require_user(ctx, "unfollow").await?;
    let feed = feed_by_url(ctx, url).await?;

    match ctx.db.unfollow_feed(user.id, feed.id).await {
        Ok(()) => {}
        Err(DatabaseError::NotFound(_)) => return Err(CommandError::NotFollowing(feed.url).into()),
        Err(e) => return Err(e.into()),
    }

    writeln!(out, "Unfollowed '{}'", feed.name)?;
    Ok(())
}

async fn feed_by_url(ctx: &Context, url: &str) -> Result<crate::storage::Feed> {
    // Stored URLs are normalized by validate_feed_url; accept either form
    let normalized = util::validate_feed_url(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string());

    for candidate in [normalized.as_str(), url] {
        match ctx.db.get_feed_by_url(candidate).await {
            Ok(feed) => return Ok(feed),
            Err(DatabaseError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Err(CommandError::UnknownFeed(url.to_string()).into())
}

// ============================================================================
// Posts
// ============================================================================

async fn browse<W: Write>(ctx: &Context, out: &mut W, limit: Option<i64>) -> Result<()> {
    let user = require_user(ctx, "browse").await?;
    let limit = limit.unwrap_or(ctx.config.browse_limit);
    if limit < 1 {
        return Err(CommandError::InvalidLimit(limit).into());
    }

    let posts = ctx.db.posts_for_user(user.id, limit).await?;
    if posts.is_empty() {
        writeln!(out, "No posts yet. Follow some feeds and run `gator agg`.")?;
        return Ok(());
    }

    for (idx, post) in posts.iter().enumerate() {
        writeln!(out, "{}. {}", idx + 1, util::one_line(&post.title))?;
        writeln!(out, "   feed: {}", util::one_line(&post.feed_name))?;
        writeln!(out, "   link: {}", util::one_line(&post.url))?;
        if !post.published_at.is_empty() {
            writeln!(out, "   date: {}", util::one_line(&post.published_at))?;
        }
        if let Some(description) = &post.description {
            let line = util::one_line(description);
            writeln!(out, "   {}", util::excerpt(&line, DESCRIPTION_COLUMNS))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Run the scheduler against the database until `stop` resolves or the
/// store fails. A tick in flight when `stop` fires is allowed to finish.
pub async fn aggregate<W, F>(ctx: &Context, out: &mut W, interval: Duration, stop: F) -> Result<()>
where
    W: Write,
    F: Future<Output = ()>,
{
    if interval.is_zero() {
        return Err(CommandError::ZeroInterval.into());
    }

    let fetcher = Fetcher::from_config(&ctx.config).context("Failed to build HTTP client")?;
    let scheduler = Scheduler::new(
        ctx.db.clone(),
        fetcher,
        interval,
        ctx.config.fetch_timeout(),
    );
    let (shutdown, rx) = Shutdown::channel();

    writeln!(out, "Collecting feeds every {interval:?}. Press Ctrl-C to stop.")?;
    out.flush()?;

    let run = scheduler.run(rx);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result?,
        () = stop => {
            tracing::info!("Stop requested, finishing current tick");
            shutdown.trigger();
            run.await?;
        }
    }

    writeln!(out, "Stopped collecting feeds")?;
    Ok(())
}

async fn fetch_once<W: Write>(ctx: &Context, out: &mut W, url: &str) -> Result<()> {
    let url = util::validate_feed_url(url).map_err(CommandError::from)?;
    let fetcher = Fetcher::from_config(&ctx.config).context("Failed to build HTTP client")?;

    let bytes = fetcher
        .fetch(url.as_str(), ctx.config.fetch_timeout())
        .await
        .with_context(|| format!("Failed to fetch {url}"))?;
    let channel = feed::parse(&bytes).with_context(|| format!("Failed to parse {url}"))?;

    writeln!(out, "{}", util::one_line(&channel.title))?;
    if !channel.link.is_empty() {
        writeln!(out, "{}", util::one_line(&channel.link))?;
    }
    if !channel.description.is_empty() {
        let line = util::one_line(&channel.description);
        writeln!(out, "{}", util::excerpt(&line, DESCRIPTION_COLUMNS))?;
    }
    writeln!(out)?;
    for item in &channel.items {
        writeln!(out, "* {}", util::one_line(&item.title))?;
        if !item.link.is_empty() {
            writeln!(out, "  {}", util::one_line(&item.link))?;
        }
    }
    Ok(())
}
