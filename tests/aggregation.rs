//! Integration tests for the aggregation pipeline: scheduler + SQLite store +
//! a mock HTTP server.
//!
//! Each test creates its own in-memory SQLite database and `MockServer`.

use std::time::Duration;

use gator::feed::{FeedError, FetchError, Fetcher, Scheduler, Shutdown, TickOutcome};
use gator::storage::{Database, Feed};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn scheduler(db: Database, timeout: Duration) -> Scheduler<Database> {
    let fetcher = Fetcher::new("gator", 1024 * 1024).unwrap();
    Scheduler::new(db, fetcher, Duration::from_millis(20), timeout)
}

fn rss(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link)| format!("<item><title>{title}</title><link>{link}</link></item>"))
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>{items}</channel></rss>"#)
}

async fn serve(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

/// One user owning one feed per route on `server`.
async fn seed(db: &Database, server: &MockServer, routes: &[&str]) -> Vec<Feed> {
    let user = db.create_user("kahya").await.unwrap();
    let mut feeds = Vec::new();
    for route in routes {
        let url = format!("{}{route}", server.uri());
        let feed = db.create_feed(route, &url, user.id).await.unwrap();
        db.follow_feed(user.id, feed.id).await.unwrap();
        feeds.push(feed);
    }
    feeds
}

fn fetched_id(outcome: &TickOutcome) -> i64 {
    match outcome {
        TickOutcome::Fetched { feed_id, .. } | TickOutcome::Failed { feed_id, .. } => *feed_id,
        TickOutcome::Idle => panic!("expected a feed to be picked"),
    }
}

// ============================================================================
// Selection order
// ============================================================================

#[tokio::test]
async fn test_never_fetched_feed_goes_first() {
    let server = MockServer::start().await;
    serve(&server, "/a", ResponseTemplate::new(200).set_body_string(rss(&[]))).await;
    serve(&server, "/b", ResponseTemplate::new(200).set_body_string(rss(&[]))).await;

    let db = test_db().await;
    let feeds = seed(&db, &server, &["/a", "/b"]).await;
    let (a, b) = (&feeds[0], &feeds[1]);

    // B was fetched an hour ago, A never
    let hour_ago = chrono::Utc::now().timestamp_millis() - 3_600_000;
    db.mark_feed_fetched(b.id, hour_ago).await.unwrap();

    let s = scheduler(db.clone(), FETCH_TIMEOUT);
    assert_eq!(fetched_id(&s.tick().await.unwrap()), a.id);
    assert_eq!(fetched_id(&s.tick().await.unwrap()), b.id);

    let a_after = db.get_feed_by_url(&a.url).await.unwrap();
    let b_after = db.get_feed_by_url(&b.url).await.unwrap();
    assert!(b_after.last_fetched_at.unwrap() >= a_after.last_fetched_at.unwrap());
}

#[tokio::test]
async fn test_n_ticks_visit_n_feeds() {
    let server = MockServer::start().await;
    let routes = ["/1", "/2", "/3", "/4", "/5"];
    for route in routes {
        serve(&server, route, ResponseTemplate::new(200).set_body_string(rss(&[]))).await;
    }

    let db = test_db().await;
    let feeds = seed(&db, &server, &routes).await;
    let s = scheduler(db.clone(), FETCH_TIMEOUT);

    let mut seen = Vec::new();
    for _ in 0..feeds.len() {
        seen.push(fetched_id(&s.tick().await.unwrap()));
    }
    seen.sort_unstable();
    let mut expected: Vec<i64> = feeds.iter().map(|f| f.id).collect();
    expected.sort_unstable();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_empty_database_is_idle() {
    let s = scheduler(test_db().await, FETCH_TIMEOUT);
    assert!(matches!(s.tick().await.unwrap(), TickOutcome::Idle));
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_404_is_logged_and_marked() {
    let server = MockServer::start().await;
    serve(&server, "/gone", ResponseTemplate::new(404)).await;
    serve(
        &server,
        "/ok",
        ResponseTemplate::new(200).set_body_string(rss(&[("x", "https://example.com/x")])),
    )
    .await;

    let db = test_db().await;
    let feeds = seed(&db, &server, &["/gone", "/ok"]).await;
    let s = scheduler(db.clone(), FETCH_TIMEOUT);

    let outcome = s.tick().await.unwrap();
    assert!(matches!(
        outcome,
        TickOutcome::Failed {
            error: FeedError::Fetch(FetchError::HttpStatus(404)),
            ..
        }
    ));
    assert!(db.get_feed_by_url(&feeds[0].url).await.unwrap().last_fetched_at.is_some());

    // The loop carries on with the next feed
    assert!(matches!(s.tick().await.unwrap(), TickOutcome::Fetched { inserted: 1, .. }));
}

#[tokio::test]
async fn test_timeout_advances_and_next_tick_moves_on() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/slow",
        ResponseTemplate::new(200)
            .set_body_string(rss(&[]))
            .set_delay(Duration::from_secs(10)),
    )
    .await;
    serve(&server, "/fast", ResponseTemplate::new(200).set_body_string(rss(&[]))).await;

    let db = test_db().await;
    let feeds = seed(&db, &server, &["/slow", "/fast"]).await;
    let s = scheduler(db.clone(), Duration::from_millis(200));

    let first = s.tick().await.unwrap();
    assert!(matches!(
        first,
        TickOutcome::Failed {
            error: FeedError::Fetch(FetchError::Timeout(_)),
            ..
        }
    ));
    assert_eq!(fetched_id(&first), feeds[0].id);
    assert!(db.get_feed_by_url(&feeds[0].url).await.unwrap().last_fetched_at.is_some());

    assert_eq!(fetched_id(&s.tick().await.unwrap()), feeds[1].id);
}

#[tokio::test]
async fn test_store_failure_stops_run() {
    let db = test_db().await;
    let s = scheduler(db.clone(), FETCH_TIMEOUT);
    db.close().await;

    let (_shutdown, rx) = Shutdown::channel();
    let result = tokio::time::timeout(Duration::from_secs(5), s.run(rx))
        .await
        .expect("run should end on its own");
    assert!(result.is_err());
}

// ============================================================================
// Post storage
// ============================================================================

#[tokio::test]
async fn test_duplicate_links_stored_once() {
    let server = MockServer::start().await;
    let body = rss(&[
        ("First", "https://example.com/same"),
        ("First again", "https://example.com/same"),
        ("Other", "https://example.com/other"),
    ]);
    serve(&server, "/rss", ResponseTemplate::new(200).set_body_string(body)).await;

    let db = test_db().await;
    let feeds = seed(&db, &server, &["/rss"]).await;
    let s = scheduler(db.clone(), FETCH_TIMEOUT);

    s.tick().await.unwrap();
    assert_eq!(db.count_posts_for_feed(feeds[0].id).await.unwrap(), 2);

    // Re-fetching the unchanged feed adds nothing
    match s.tick().await.unwrap() {
        TickOutcome::Fetched { inserted, duplicates, .. } => {
            assert_eq!(inserted, 0);
            assert_eq!(duplicates, 3);
        }
        other => panic!("expected Fetched, got {other:?}"),
    }
    assert_eq!(db.count_posts_for_feed(feeds[0].id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_same_link_in_two_feeds_is_two_posts() {
    let server = MockServer::start().await;
    let body = rss(&[("Shared", "https://example.com/shared")]);
    serve(&server, "/a", ResponseTemplate::new(200).set_body_string(body.clone())).await;
    serve(&server, "/b", ResponseTemplate::new(200).set_body_string(body)).await;

    let db = test_db().await;
    let feeds = seed(&db, &server, &["/a", "/b"]).await;
    let s = scheduler(db.clone(), FETCH_TIMEOUT);
    s.tick().await.unwrap();
    s.tick().await.unwrap();

    assert_eq!(db.count_posts_for_feed(feeds[0].id).await.unwrap(), 1);
    assert_eq!(db.count_posts_for_feed(feeds[1].id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_entities_unescaped_before_storage() {
    let server = MockServer::start().await;
    let body = r#"<rss version="2.0"><channel><title>T</title>
        <item>
            <title>Tom &amp;amp; Jerry</title>
            <link>https://example.com/tj</link>
            <description>Cats &amp; mice</description>
            <pubDate>Mon, 06 Sep 2021 16:45:00 +0000</pubDate>
        </item>
    </channel></rss>"#;
    serve(&server, "/rss", ResponseTemplate::new(200).set_body_string(body)).await;

    let db = test_db().await;
    seed(&db, &server, &["/rss"]).await;
    scheduler(db.clone(), FETCH_TIMEOUT).tick().await.unwrap();

    let user = db.get_user_by_name("kahya").await.unwrap();
    let posts = db.posts_for_user(user.id, 10).await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].title, "Tom & Jerry");
    assert_eq!(posts[0].description.as_deref(), Some("Cats & mice"));
    assert_eq!(posts[0].published_at, "Mon, 06 Sep 2021 16:45:00 +0000");
}

#[tokio::test]
async fn test_user_agent_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .and(header("user-agent", "gator"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[])))
        .expect(1)
        .mount(&server)
        .await;

    let db = test_db().await;
    seed(&db, &server, &["/rss"]).await;
    let outcome = scheduler(db, FETCH_TIMEOUT).tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Fetched { .. }));
}

// ============================================================================
// Run loop
// ============================================================================

#[tokio::test]
async fn test_run_fills_posts_until_shutdown() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/a",
        ResponseTemplate::new(200).set_body_string(rss(&[("a1", "https://a.example/1")])),
    )
    .await;
    serve(
        &server,
        "/b",
        ResponseTemplate::new(200).set_body_string(rss(&[("b1", "https://b.example/1")])),
    )
    .await;

    let db = test_db().await;
    let feeds = seed(&db, &server, &["/a", "/b"]).await;
    let user = db.get_user_by_name("kahya").await.unwrap();
    let s = scheduler(db.clone(), FETCH_TIMEOUT);
    let (shutdown, rx) = Shutdown::channel();

    let stopper = async {
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if db.posts_for_user(user.id, 10).await.unwrap().len() == 2 {
                break;
            }
        }
        shutdown.trigger();
    };
    let (result, ()) = tokio::join!(s.run(rx), stopper);
    result.unwrap();

    let posts = db.posts_for_user(user.id, 10).await.unwrap();
    assert_eq!(posts.len(), 2);
    for feed in &feeds {
        assert!(db.get_feed_by_url(&feed.url).await.unwrap().last_fetched_at.is_some());
    }
}
