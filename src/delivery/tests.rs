use super::*;
use crate::config::{BotConfig, CaptionPlacement, DeliveryConfig, RetryConfig};
use crate::db::Database;
use crate::error::{DeliveryError, Error};
use crate::types::{Event, ItemRef, ItemStatus};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::{TempDir, tempdir};

/// Channel that records every album and answers from a script of outcomes
#[derive(Default)]
struct RecordingChannel {
    outcomes: Mutex<VecDeque<Result<(), DeliveryError>>>,
    albums: Mutex<Vec<(String, Vec<MediaItem>)>>,
    calls: AtomicU32,
}

impl RecordingChannel {
    fn scripted(outcomes: Vec<Result<(), DeliveryError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Default::default()
        })
    }

    fn always_failing(error: DeliveryError) -> Arc<Self> {
        Self::scripted(vec![Err(error); 10])
    }

    fn albums(&self) -> Vec<(String, Vec<MediaItem>)> {
        self.albums.lock().unwrap().clone()
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn send_album(&self, target: &str, album: &[MediaItem]) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.albums
            .lock()
            .unwrap()
            .push((target.to_string(), album.to_vec()));
        self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

fn settings(images_per_album: usize) -> DeliveryConfig {
    DeliveryConfig {
        chat_target: "@pins".to_string(),
        images_per_album,
        inter_batch_delay: Duration::ZERO,
        ..Default::default()
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        initial_delay: Duration::from_millis(20),
        ..Default::default()
    }
}

/// Record and stage `count` items, returning them in order
async fn stage(db: &Database, dir: &Path, count: usize) -> Vec<ItemRef> {
    let mut items = Vec::new();
    for i in 0..count {
        let item = ItemRef::new(format!("{i}.jpg"), format!("https://i.example.com/{i}.jpg"));
        db.record_new("cats", &item.filename, &item.url).await.unwrap();
        std::fs::write(dir.join(&item.filename), format!("image {i}")).unwrap();
        items.push(item);
    }
    items
}

async fn setup() -> (Arc<Database>, TempDir) {
    let temp_dir = tempdir().unwrap();
    let db = Arc::new(Database::new(&temp_dir.path().join("test.db")).await.unwrap());
    (db, temp_dir)
}

#[tokio::test]
async fn one_full_album_is_sent_marked_and_cleaned_up() {
    let (db, temp_dir) = setup().await;
    let items = stage(&db, temp_dir.path(), 9).await;
    let channel = RecordingChannel::scripted(vec![]);

    let deliverer = BatchDeliverer::new(channel.clone(), db.clone(), settings(9), fast_retry());
    let report = deliverer.deliver(&items, temp_dir.path()).await;

    assert_eq!(
        report,
        DeliveryReport {
            sent: 9,
            failed_batches: 0,
            missing: 0
        }
    );

    let albums = channel.albums();
    assert_eq!(albums.len(), 1);
    assert_eq!(albums[0].0, "@pins");
    assert_eq!(albums[0].1.len(), 9);
    assert_eq!(albums[0].1[0].bytes, b"image 0".to_vec());

    for item in &items {
        assert_eq!(
            db.get_item(&item.filename).await.unwrap().unwrap().status,
            ItemStatus::Sent
        );
        assert!(!temp_dir.path().join(&item.filename).exists());
    }
}

#[tokio::test]
async fn items_are_chunked_in_order() {
    let (db, temp_dir) = setup().await;
    let items = stage(&db, temp_dir.path(), 20).await;
    let channel = RecordingChannel::scripted(vec![]);

    let deliverer = BatchDeliverer::new(channel.clone(), db.clone(), settings(9), fast_retry());
    let report = deliverer.deliver(&items, temp_dir.path()).await;

    assert_eq!(report.sent, 20);
    let sizes: Vec<usize> = channel.albums().iter().map(|(_, a)| a.len()).collect();
    assert_eq!(sizes, vec![9, 9, 2]);
    assert_eq!(channel.albums()[1].1[0].filename, "9.jpg");
}

#[tokio::test]
async fn album_succeeds_on_third_attempt_after_two_timeouts() {
    let (db, temp_dir) = setup().await;
    let items = stage(&db, temp_dir.path(), 3).await;
    let channel = RecordingChannel::scripted(vec![
        Err(DeliveryError::Timeout),
        Err(DeliveryError::Timeout),
        Ok(()),
    ]);
    let (event_tx, mut events) = tokio::sync::broadcast::channel(16);

    let deliverer = BatchDeliverer::new(channel.clone(), db.clone(), settings(9), fast_retry())
        .with_events(event_tx);
    let started = Instant::now();
    let report = deliverer.deliver(&items, temp_dir.path()).await;

    assert_eq!(report.sent, 3);
    assert_eq!(report.failed_batches, 0);
    assert_eq!(channel.calls(), 3);
    // two waits of 20ms each
    assert!(started.elapsed() >= Duration::from_millis(40));

    match events.try_recv().unwrap() {
        Event::BatchDelivered { count, attempts } => {
            assert_eq!(count, 3);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(db.count_by_status("cats").await.unwrap().sent, 3);
}

#[tokio::test]
async fn exhausted_retries_leave_items_pending_and_delete_files() {
    let (db, temp_dir) = setup().await;
    let items = stage(&db, temp_dir.path(), 4).await;
    let channel = RecordingChannel::always_failing(DeliveryError::Timeout);
    let (event_tx, mut events) = tokio::sync::broadcast::channel(16);

    let deliverer = BatchDeliverer::new(channel.clone(), db.clone(), settings(9), fast_retry())
        .with_events(event_tx);
    let report = deliverer.deliver(&items, temp_dir.path()).await;

    assert_eq!(report.sent, 0);
    assert_eq!(report.failed_batches, 1);
    assert_eq!(channel.calls(), 3);
    assert!(matches!(
        events.try_recv().unwrap(),
        Event::BatchFailed { count: 4, .. }
    ));

    let unsent = db.list_unsent("cats", 10).await.unwrap();
    assert_eq!(unsent, items);
    for item in &items {
        assert!(!temp_dir.path().join(&item.filename).exists());
    }
}

#[tokio::test]
async fn rejected_album_is_not_retried() {
    let (db, temp_dir) = setup().await;
    let items = stage(&db, temp_dir.path(), 2).await;
    let channel =
        RecordingChannel::always_failing(DeliveryError::Rejected("chat not found".into()));

    let deliverer = BatchDeliverer::new(channel.clone(), db.clone(), settings(9), fast_retry());
    let report = deliverer.deliver(&items, temp_dir.path()).await;

    assert_eq!(report.failed_batches, 1);
    assert_eq!(channel.calls(), 1);
}

#[tokio::test]
async fn failure_of_one_album_does_not_stop_the_next() {
    let (db, temp_dir) = setup().await;
    let items = stage(&db, temp_dir.path(), 4).await;
    let channel =
        RecordingChannel::scripted(vec![Err(DeliveryError::Rejected("bad".into())), Ok(())]);

    let deliverer = BatchDeliverer::new(channel.clone(), db.clone(), settings(2), fast_retry());
    let report = deliverer.deliver(&items, temp_dir.path()).await;

    assert_eq!(report.sent, 2);
    assert_eq!(report.failed_batches, 1);
    let unsent: Vec<String> = db
        .list_unsent("cats", 10)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.filename)
        .collect();
    assert_eq!(unsent, vec!["0.jpg".to_string(), "1.jpg".to_string()]);
}

#[tokio::test]
async fn missing_file_is_marked_error_and_excluded() {
    let (db, temp_dir) = setup().await;
    let items = stage(&db, temp_dir.path(), 3).await;
    std::fs::remove_file(temp_dir.path().join("1.jpg")).unwrap();
    let channel = RecordingChannel::scripted(vec![]);

    let deliverer = BatchDeliverer::new(channel.clone(), db.clone(), settings(9), fast_retry());
    let report = deliverer.deliver(&items, temp_dir.path()).await;

    assert_eq!(report.sent, 2);
    assert_eq!(report.missing, 1);
    let names: Vec<String> = channel.albums()[0]
        .1
        .iter()
        .map(|m| m.filename.clone())
        .collect();
    assert_eq!(names, vec!["0.jpg".to_string(), "2.jpg".to_string()]);
    assert_eq!(
        db.get_item("1.jpg").await.unwrap().unwrap().status,
        ItemStatus::Error
    );
}

#[tokio::test]
async fn album_with_every_file_missing_is_not_sent() {
    let (db, temp_dir) = setup().await;
    let items = stage(&db, temp_dir.path(), 2).await;
    for item in &items {
        std::fs::remove_file(temp_dir.path().join(&item.filename)).unwrap();
    }
    let channel = RecordingChannel::scripted(vec![]);

    let deliverer = BatchDeliverer::new(channel.clone(), db.clone(), settings(9), fast_retry());
    let report = deliverer.deliver(&items, temp_dir.path()).await;

    assert_eq!(channel.calls(), 0);
    assert_eq!(report.missing, 2);
    assert_eq!(report.failed_batches, 0);
}

#[tokio::test]
async fn caption_goes_on_first_item_by_default() {
    let (db, temp_dir) = setup().await;
    let items = stage(&db, temp_dir.path(), 3).await;
    let channel = RecordingChannel::scripted(vec![]);
    let mut settings = settings(9);
    settings.caption = Some("[Main channel](https://t.me/example)".to_string());

    BatchDeliverer::new(channel.clone(), db.clone(), settings, fast_retry())
        .deliver(&items, temp_dir.path())
        .await;

    let captions: Vec<Option<String>> = channel.albums()[0]
        .1
        .iter()
        .map(|m| m.caption.clone())
        .collect();
    assert_eq!(
        captions,
        vec![
            Some("[Main channel](https://t.me/example)".to_string()),
            None,
            None
        ]
    );
}

#[tokio::test]
async fn caption_can_go_on_last_item() {
    let (db, temp_dir) = setup().await;
    let items = stage(&db, temp_dir.path(), 5).await;
    let channel = RecordingChannel::scripted(vec![]);
    let mut settings = settings(3);
    settings.caption = Some("cap".to_string());
    settings.caption_placement = CaptionPlacement::Last;

    BatchDeliverer::new(channel.clone(), db.clone(), settings, fast_retry())
        .deliver(&items, temp_dir.path())
        .await;

    for (_, album) in channel.albums() {
        let with_caption: Vec<usize> = album
            .iter()
            .enumerate()
            .filter(|(_, m)| m.caption.is_some())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(with_caption, vec![album.len() - 1]);
    }
}

mod telegram {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn media(name: &str, caption: Option<&str>) -> MediaItem {
        MediaItem {
            filename: name.to_string(),
            bytes: format!("bytes of {name}").into_bytes(),
            caption: caption.map(str::to_string),
        }
    }

    fn channel(server: &MockServer) -> TelegramChannel {
        TelegramChannel::with_client(reqwest::Client::new(), server.uri(), "123:abc")
    }

    #[tokio::test]
    async fn album_goes_out_as_media_group() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMediaGroup"))
            .and(body_string_contains("@pins"))
            .and(body_string_contains("attach://file0"))
            .and(body_string_contains("attach://file1"))
            .and(body_string_contains("bytes of b.jpg"))
            .and(body_string_contains(r#""parse_mode":"Markdown""#))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "ok": true, "result": [] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let album = vec![media("a.jpg", Some("cap")), media("b.jpg", None)];
        channel(&server).send_album("@pins", &album).await.unwrap();
    }

    #[tokio::test]
    async fn single_item_goes_out_as_photo() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendPhoto"))
            .and(body_string_contains("bytes of only.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "ok": true, "result": {} })),
            )
            .expect(1)
            .mount(&server)
            .await;

        channel(&server)
            .send_album("@pins", &[media("only.jpg", None)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited_with_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests: retry after 7",
                "parameters": { "retry_after": 7 }
            })))
            .mount(&server)
            .await;

        let result = channel(&server)
            .send_album("@pins", &[media("a.jpg", None), media("b.jpg", None)])
            .await;

        match result {
            Err(DeliveryError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn bad_request_is_rejected_with_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let result = channel(&server)
            .send_album("@nowhere", &[media("a.jpg", None)])
            .await;

        match result {
            Err(DeliveryError::Rejected(description)) => {
                assert_eq!(description, "Bad Request: chat not found");
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn slow_response_is_a_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "ok": true }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let channel = TelegramChannel::with_client(client, server.uri(), "123:abc");

        assert!(matches!(
            channel.send_album("@pins", &[media("a.jpg", None)]).await,
            Err(DeliveryError::Timeout)
        ));
    }

    #[tokio::test]
    async fn empty_album_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        channel(&server).send_album("@pins", &[]).await.unwrap();
    }

    #[test]
    fn missing_token_is_a_config_error() {
        match TelegramChannel::new(&BotConfig::default()) {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("bot.token")),
            other => panic!("expected Config error, got {:?}", other.map(|_| ())),
        }
    }
}
