mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feedbrief_core::{
    DedupSettings, FeedIngestor, HttpFetcher, JsonStore, NewArticle, NewFeed, Store,
};
use reqwest::Client;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{add_feed, entries, rss_document, temp_dir, StubFetcher};

#[tokio::test]
async fn ingesting_the_same_document_twice_yields_nothing_new() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_document(&[
            ("Rates on hold", "https://news.test/rates"),
            ("Harvest festival opens", "https://news.test/harvest"),
        ])))
        .mount(&server)
        .await;

    let store = Arc::new(JsonStore::in_memory());
    let feed = store
        .insert_feed(NewFeed::new("News", format!("{}/feed.xml", server.uri())), Utc::now())
        .await
        .unwrap();
    let fetcher = Arc::new(HttpFetcher::new(Client::new(), Duration::from_secs(5)));
    let ingestor = FeedIngestor::new(store.clone(), fetcher, DedupSettings::default());

    let first = ingestor.ingest(&feed, 10).await;
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|a| a.source == "News"));

    let second = ingestor.ingest(&feed, 10).await;
    assert!(second.is_empty());
}

#[tokio::test]
async fn existing_urls_are_skipped_and_last_fetched_is_stamped() {
    let store = Arc::new(JsonStore::in_memory());
    let feed = add_feed(&*store, "FeedA", "https://a.test/rss").await;
    assert!(feed.last_fetched.is_none());

    let raw = entries(5, "a");
    for known in &raw[1..3] {
        store
            .insert_article(NewArticle::new(known.link.clone(), known.title.clone(), Utc::now()).with_source("FeedA"))
            .await
            .unwrap();
    }

    let fetcher = Arc::new(StubFetcher::new());
    fetcher.serve("https://a.test/rss", raw.clone());
    let ingestor = FeedIngestor::new(store.clone(), fetcher, DedupSettings::default());

    let before = Utc::now();
    let saved = ingestor.ingest(&feed, 5).await;
    let after = Utc::now();

    let urls: Vec<_> = saved.iter().map(|a| a.url.as_str()).collect();
    assert_eq!(urls, vec![raw[0].link.as_str(), raw[3].link.as_str(), raw[4].link.as_str()]);

    let stamped = store.feed(feed.id).await.unwrap().unwrap().last_fetched.unwrap();
    assert!(stamped >= before && stamped <= after);
}

#[tokio::test]
async fn max_articles_caps_candidates_in_source_order() {
    let store = Arc::new(JsonStore::in_memory());
    let feed = add_feed(&*store, "Big", "https://big.test/rss").await;
    let fetcher = Arc::new(StubFetcher::new());
    fetcher.serve("https://big.test/rss", entries(10, "big"));
    let ingestor = FeedIngestor::new(store.clone(), fetcher, DedupSettings::default());

    let saved = ingestor.ingest(&feed, 3).await;
    assert_eq!(saved.len(), 3);
    assert_eq!(saved[0].url, "https://big.test/articles/1");
}

#[tokio::test]
async fn fetch_failure_is_empty_and_leaves_last_fetched_alone() {
    let store = Arc::new(JsonStore::in_memory());
    let feed = add_feed(&*store, "Down", "https://down.test/rss").await;
    let fetcher = Arc::new(StubFetcher::new());
    fetcher.fail("https://down.test/rss");
    let ingestor = FeedIngestor::new(store.clone(), fetcher, DedupSettings::default());

    assert!(ingestor.ingest(&feed, 5).await.is_empty());
    assert!(store.feed(feed.id).await.unwrap().unwrap().last_fetched.is_none());
}

#[tokio::test]
async fn one_failing_feed_does_not_affect_the_others() {
    let store = Arc::new(JsonStore::in_memory());
    add_feed(&*store, "One", "https://one.test/rss").await;
    add_feed(&*store, "Two", "https://two.test/rss").await;
    add_feed(&*store, "Three", "https://three.test/rss").await;

    let fetcher = Arc::new(StubFetcher::new());
    fetcher.serve("https://one.test/rss", entries(2, "one"));
    fetcher.fail("https://two.test/rss");
    fetcher.serve("https://three.test/rss", entries(3, "three"));
    let ingestor = Arc::new(FeedIngestor::new(store.clone(), fetcher, DedupSettings::default()));

    let results = ingestor.ingest_all(5).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results["One"].len(), 2);
    assert!(results["Two"].is_empty());
    assert_eq!(results["Three"].len(), 3);
}

#[tokio::test]
async fn inactive_feeds_are_not_polled() {
    let store = Arc::new(JsonStore::in_memory());
    let mut quiet = add_feed(&*store, "Quiet", "https://quiet.test/rss").await;
    quiet.active = false;
    store.update_feed(&quiet).await.unwrap();
    add_feed(&*store, "Loud", "https://loud.test/rss").await;

    let fetcher = Arc::new(StubFetcher::new());
    fetcher.serve("https://loud.test/rss", entries(1, "loud"));
    fetcher.serve("https://quiet.test/rss", entries(1, "quiet"));
    let ingestor = Arc::new(FeedIngestor::new(store.clone(), fetcher.clone(), DedupSettings::default()));

    let results = ingestor.ingest_all(5).await;
    assert!(!results.contains_key("Quiet"));
    assert_eq!(fetcher.calls(), vec!["https://loud.test/rss".to_owned()]);
}

#[tokio::test]
async fn refresh_reports_missing_and_inactive_feeds() {
    let store = Arc::new(JsonStore::in_memory());
    let mut paused = add_feed(&*store, "Paused", "https://paused.test/rss").await;
    paused.active = false;
    store.update_feed(&paused).await.unwrap();
    let ingestor = Arc::new(FeedIngestor::new(
        store.clone(),
        Arc::new(StubFetcher::new()),
        DedupSettings::default(),
    ));

    let missing = ingestor.refresh_feed(999, 5).await;
    assert!(!missing.success);
    assert_eq!(missing.error.as_deref(), Some("feed not found"));

    let inactive = ingestor.refresh_feed(paused.id, 5).await;
    assert!(!inactive.success);
    assert_eq!(inactive.feed_name.as_deref(), Some("Paused"));
}

#[tokio::test]
async fn refresh_all_sums_per_feed_counts() {
    let store = Arc::new(JsonStore::in_memory());
    add_feed(&*store, "One", "https://one.test/rss").await;
    add_feed(&*store, "Two", "https://two.test/rss").await;
    let fetcher = Arc::new(StubFetcher::new());
    fetcher.serve("https://one.test/rss", entries(2, "one"));
    fetcher.serve("https://two.test/rss", entries(4, "two"));
    let ingestor = Arc::new(FeedIngestor::new(store.clone(), fetcher, DedupSettings::default()));

    let report = ingestor.refresh_all(3).await;
    assert!(report.success);
    assert_eq!(report.feeds_processed, 2);
    assert_eq!(report.new_articles, 5);
    assert_eq!(report.per_feed["Two"], 3);
}

#[tokio::test]
async fn article_lost_to_a_failed_write_is_reported_on_the_next_poll() {
    let dir = temp_dir("feedbrief_ingest_unwritable");
    let store = Arc::new(JsonStore::load_from(dir.join("store.json")).await);
    let feed = add_feed(&*store, "FeedA", "https://a.test/rss").await;
    let fetcher = Arc::new(StubFetcher::new());
    fetcher.serve("https://a.test/rss", entries(1, "a"));
    let ingestor = FeedIngestor::new(store.clone(), fetcher, DedupSettings::default());

    tokio::fs::remove_dir_all(&dir).await.unwrap();
    tokio::fs::write(&dir, b"").await.unwrap();
    assert!(ingestor.ingest(&feed, 10).await.is_empty());
    assert!(store
        .article_by_url("https://a.test/articles/1")
        .await
        .unwrap()
        .is_none());

    tokio::fs::remove_file(&dir).await.unwrap();
    let retried = ingestor.ingest(&feed, 10).await;
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].url, "https://a.test/articles/1");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
