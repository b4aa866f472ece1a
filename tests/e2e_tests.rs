//! Full service over a real socket.

use std::time::Duration;

use request_counter::api::ErrorBody;
use request_counter::{Config, RequestCount};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

struct RunningService {
    base_url: String,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl RunningService {
    async fn start(config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(request_counter::serve(
            config,
            listener,
            shutdown.clone(),
        ));
        Self {
            base_url,
            shutdown,
            handle,
        }
    }

    async fn count(&self, client: &reqwest::Client) -> u64 {
        let response = client
            .get(format!("{}/requestcount", self.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        response.json::<RequestCount>().await.unwrap().count
    }

    async fn stop(self) {
        self.shutdown.cancel();
        timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("service did not stop")
            .unwrap()
            .unwrap();
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.counter.interval_count = 10;
    config.counter.interval_duration_ms = 60_000;
    config
}

#[tokio::test]
async fn test_requests_are_counted_over_http() {
    let service = RunningService::start(config()).await;
    let client = reqwest::Client::new();

    assert_eq!(service.count(&client).await, 1);
    assert_eq!(service.count(&client).await, 2);

    let head = client
        .head(format!("{}/requestcount", service.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(head.status(), reqwest::StatusCode::OK);
    assert!(head.headers().contains_key("x-trace-id"));

    assert_eq!(service.count(&client).await, 4);
    service.stop().await;
}

#[tokio::test]
async fn test_unknown_path_returns_error_body() {
    let service = RunningService::start(config()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/missing", service.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.code, 404);

    service.stop().await;
}

#[tokio::test]
async fn test_persistent_counts_survive_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.counter.interval_count = 1000;
    config.counter.interval_duration_ms = 100;
    config.counter.persistent = true;
    config.counter.filename = dir.path().join("counts.dat");
    config.counter.persist_duration_ms = 50;

    let client = reqwest::Client::new();
    let service = RunningService::start(config.clone()).await;
    for expected in 1..=3 {
        assert_eq!(service.count(&client).await, expected);
    }
    // Let a few advances stamp the file with a recent timestamp.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(service.count(&client).await >= 4);
    assert!(service.count(&client).await >= 5);
    service.stop().await;

    assert_eq!(
        std::fs::metadata(&config.counter.filename).unwrap().len(),
        (1000 + 2) * 8
    );

    // Restarted within a bucket of the last advance: nothing from the last
    // 100 seconds is stale yet.
    let service = RunningService::start(config).await;
    assert!(service.count(&client).await > 5);
    service.stop().await;
}

#[tokio::test]
async fn test_invalid_storage_path_fails_startup() {
    let dir = TempDir::new().unwrap();
    let mut config = config();
    config.counter.persistent = true;
    config.counter.filename = dir.path().join("missing").join("counts.dat");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let result = request_counter::serve(config, listener, CancellationToken::new()).await;
    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("storage open failed"));
}
