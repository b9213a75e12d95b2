mod common;

use chrono::{Duration, Utc};
use feedbrief_core::{
    ArticlePriority, ArticleStatus, FeedScope, JsonStore, NewArticle, NewFeed, ScheduleConfig, Store,
    StoreError,
};

use common::temp_dir;

#[tokio::test]
async fn records_survive_a_reload() {
    let dir = temp_dir("feedbrief_store");
    let path = dir.join("store.json");

    let store = JsonStore::load_from(&path).await;
    let feed = store
        .insert_feed(NewFeed::new("Wire", "https://wire.test/rss"), Utc::now())
        .await
        .unwrap();
    store
        .insert_article(NewArticle::new("https://wire.test/1", "One", Utc::now()).with_source("Wire"))
        .await
        .unwrap();
    let mut schedule = ScheduleConfig::new("hourly", FeedScope::Single(feed.id), 60, 5);
    schedule.arm(Utc::now());
    store.upsert_schedule(&schedule).await.unwrap();

    let reopened = JsonStore::load_from(&path).await;
    assert_eq!(reopened.feed(feed.id).await.unwrap().unwrap().name, "Wire");
    assert!(reopened.article_by_url("https://wire.test/1").await.unwrap().is_some());
    assert_eq!(reopened.list_schedules().await.unwrap(), vec![schedule]);

    // ids keep counting after a reload
    let second = reopened
        .insert_feed(NewFeed::new("Other", "https://other.test/rss"), Utc::now())
        .await
        .unwrap();
    assert!(second.id > feed.id);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn corrupt_store_falls_back_to_tmp_copy() {
    let dir = temp_dir("feedbrief_corrupt");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join("store.json");

    let healthy = JsonStore::load_from(&path).await;
    healthy
        .insert_feed(NewFeed::new("Wire", "https://wire.test/rss"), Utc::now())
        .await
        .unwrap();
    let snapshot = tokio::fs::read(&path).await.unwrap();
    tokio::fs::write(dir.join("store.json.tmp"), snapshot).await.unwrap();
    tokio::fs::write(&path, b"{ this is not json ").await.unwrap();

    let recovered = JsonStore::load_from(&path).await;
    let feeds = recovered.list_feeds(false).await.unwrap();
    assert_eq!(feeds.len(), 1, "should fall back to tmp file when main is corrupted");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn missing_file_starts_empty() {
    let dir = temp_dir("feedbrief_empty");
    let store = JsonStore::load_from(dir.join("store.json")).await;
    assert!(store.list_feeds(false).await.unwrap().is_empty());
    assert!(store.list_schedules().await.unwrap().is_empty());
}

#[tokio::test]
async fn listings_are_newest_first_and_bounded() {
    let store = JsonStore::in_memory();
    let now = Utc::now();
    for minutes_ago in [30, 10, 20, 5] {
        store
            .insert_article(
                NewArticle::new(
                    format!("https://wire.test/{minutes_ago}"),
                    format!("t{minutes_ago}"),
                    now - Duration::minutes(minutes_ago),
                )
                .with_source("Wire"),
            )
            .await
            .unwrap();
    }

    let recent = store.articles_by_source("Wire", 3).await.unwrap();
    let urls: Vec<_> = recent.iter().map(|a| a.url.as_str()).collect();
    assert_eq!(
        urls,
        vec!["https://wire.test/5", "https://wire.test/10", "https://wire.test/20"]
    );

    let since = store
        .articles_since(now - Duration::minutes(15), 100)
        .await
        .unwrap();
    assert_eq!(since.len(), 2);
}

#[tokio::test]
async fn feeds_list_sorted_by_name_and_filtered_by_activity() {
    let store = JsonStore::in_memory();
    store.insert_feed(NewFeed::new("Zeta", "https://z.test"), Utc::now()).await.unwrap();
    let mut alpha = store
        .insert_feed(NewFeed::new("Alpha", "https://a.test"), Utc::now())
        .await
        .unwrap();
    alpha.active = false;
    assert!(store.update_feed(&alpha).await.unwrap());

    let all: Vec<_> = store.list_feeds(false).await.unwrap().into_iter().map(|f| f.name).collect();
    assert_eq!(all, vec!["Alpha", "Zeta"]);
    let active = store.list_feeds(true).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "Zeta");
}

#[tokio::test]
async fn failed_write_leaves_memory_untouched() {
    let dir = temp_dir("feedbrief_unwritable");
    let store = JsonStore::load_from(dir.join("store.json")).await;
    let feed = store
        .insert_feed(NewFeed::new("Wire", "https://wire.test/rss"), Utc::now())
        .await
        .unwrap();
    let article = store
        .insert_article(NewArticle::new("https://wire.test/1", "One", Utc::now()).with_source("Wire"))
        .await
        .unwrap();
    let mut schedule = ScheduleConfig::new("hourly", FeedScope::All, 60, 5);
    schedule.arm(Utc::now());
    store.upsert_schedule(&schedule).await.unwrap();

    // a plain file where the store directory was makes every write fail
    tokio::fs::remove_dir_all(&dir).await.unwrap();
    tokio::fs::write(&dir, b"").await.unwrap();

    assert!(store
        .insert_feed(NewFeed::new("Other", "https://other.test/rss"), Utc::now())
        .await
        .is_err());
    assert_eq!(store.list_feeds(false).await.unwrap().len(), 1);

    let mut renamed = feed.clone();
    renamed.name = "Renamed".into();
    assert!(store.update_feed(&renamed).await.is_err());
    assert!(store.delete_feed(feed.id).await.is_err());
    assert_eq!(store.feed(feed.id).await.unwrap().unwrap().name, "Wire");

    assert!(store
        .insert_article(NewArticle::new("https://wire.test/2", "Two", Utc::now()).with_source("Wire"))
        .await
        .is_err());
    assert!(store.article_by_url("https://wire.test/2").await.unwrap().is_none());

    assert!(store
        .update_article_state(article.id, ArticleStatus::Delivered, ArticlePriority::Urgent)
        .await
        .is_err());
    assert!(store.delete_article(article.id).await.is_err());
    let kept = store.article(article.id).await.unwrap().unwrap();
    assert_eq!(kept.status, ArticleStatus::Fetched);
    assert_eq!(kept.priority, ArticlePriority::Medium);

    assert!(store.delete_schedule("hourly").await.is_err());
    assert_eq!(store.list_schedules().await.unwrap(), vec![schedule]);

    // ids handed out by failed inserts are not burned
    tokio::fs::remove_file(&dir).await.unwrap();
    let next = store
        .insert_article(NewArticle::new("https://wire.test/2", "Two", Utc::now()).with_source("Wire"))
        .await
        .unwrap();
    assert_eq!(next.id, article.id + 1);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn feed_urls_are_unique() {
    let store = JsonStore::in_memory();
    let wire = store
        .insert_feed(NewFeed::new("Wire", "https://wire.test/rss"), Utc::now())
        .await
        .unwrap();
    let dup = store
        .insert_feed(NewFeed::new("Copy", "https://wire.test/rss"), Utc::now())
        .await;
    assert!(matches!(dup, Err(StoreError::DuplicateFeedUrl(url)) if url == "https://wire.test/rss"));

    let mut other = store
        .insert_feed(NewFeed::new("Other", "https://other.test/rss"), Utc::now())
        .await
        .unwrap();
    other.url = wire.url.clone();
    assert!(matches!(store.update_feed(&other).await, Err(StoreError::DuplicateFeedUrl(_))));

    // re-saving a feed under its own url is fine
    assert!(store.update_feed(&wire).await.unwrap());
}
