//! Integration tests against a real Redis using testcontainers.
//!
//! These tests spin up a Redis container, exercise `RedisStore` and
//! `RedisUserDirectory` directly, then start the application server and run
//! end-to-end requests over HTTP. Docker is required, so the tests are
//! ignored by default.
//!
//! Run with: `cargo test --test integration_tests -- --ignored`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use redis::AsyncCommands;
use reqwest::{Client, StatusCode};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};
use tokio::time::sleep;

use storefront_edge::auth::{AuthenticatedUser, RedisUserDirectory, UserResolver, issue_token};
use storefront_edge::store::{CacheStore, CounterStore, ExpiryPolicy, RedisStore};

const SECRET: &str = "integration-secret";

/// Redis container configuration
struct RedisContainer {
    port: u16,
}

impl RedisContainer {
    // EXPIRE ... NX needs 7.0+
    const IMAGE: &'static str = "redis";
    const TAG: &'static str = "7-alpine";
    const PORT: u16 = 6379;

    async fn start() -> (ContainerAsync<GenericImage>, Self) {
        let container = GenericImage::new(Self::IMAGE, Self::TAG)
            .with_exposed_port(Self::PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(Self::PORT)
            .await
            .expect("Failed to get Redis port");

        (container, Self { port })
    }

    fn url(&self) -> String {
        format!("redis://127.0.0.1:{}", self.port)
    }
}

/// Find an available port for the test server
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to ephemeral port")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

async fn seed_user(url: &str, user: &AuthenticatedUser) {
    let client = redis::Client::open(url).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = conn
        .set(
            RedisUserDirectory::user_key(&user.id),
            serde_json::to_string(user).unwrap(),
        )
        .await
        .unwrap();
}

fn user(id: &str, role: &str) -> AuthenticatedUser {
    AuthenticatedUser {
        id: id.to_string(),
        email: format!("{id}@example.com"),
        name: id.to_string(),
        role: role.to_string(),
    }
}

// =============================================================================
// Store
// =============================================================================

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_counter_rolling_and_fixed() {
    let (_container, redis) = RedisContainer::start().await;
    let store = RedisStore::open(&redis.url()).unwrap();
    let window = Duration::from_secs(30);

    for expected in 1..=3 {
        let count = store
            .increment("rate_limit:10.0.0.1", window, ExpiryPolicy::Rolling)
            .await
            .unwrap();
        assert_eq!(count, expected);
    }
    let ttl = store.ttl("rate_limit:10.0.0.1").await.unwrap().unwrap();
    assert!(ttl <= window && ttl > Duration::from_secs(25));

    // Fixed policy keeps the first expiry
    store
        .increment("rate_limit:10.0.0.2", window, ExpiryPolicy::Fixed)
        .await
        .unwrap();
    store
        .increment("rate_limit:10.0.0.2", Duration::from_secs(500), ExpiryPolicy::Fixed)
        .await
        .unwrap();
    let ttl = store.ttl("rate_limit:10.0.0.2").await.unwrap().unwrap();
    assert!(ttl <= window);

    assert!(store.ttl("rate_limit:missing").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_cache_entries_and_pattern_delete() {
    let (_container, redis) = RedisContainer::start().await;
    let store = RedisStore::open(&redis.url()).unwrap();
    let ttl = Duration::from_secs(60);

    store.ping().await.unwrap();
    assert!(store.get("cache:a").await.unwrap().is_none());

    store.set("cache:a", b"first", ttl).await.unwrap();
    store.set("cache:b", b"second", ttl).await.unwrap();
    store.set("session:c", b"other", ttl).await.unwrap();
    assert_eq!(store.get("cache:a").await.unwrap().unwrap(), b"first");

    let removed = store.delete_by_pattern("cache:*").await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.get("cache:b").await.unwrap().is_none());
    assert!(store.get("session:c").await.unwrap().is_some());

    // Nothing left to match
    assert_eq!(store.delete_by_pattern("cache:*").await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_cache_entry_expires() {
    let (_container, redis) = RedisContainer::start().await;
    let store = RedisStore::open(&redis.url()).unwrap();

    store
        .set("cache:short", b"gone soon", Duration::from_secs(1))
        .await
        .unwrap();
    sleep(Duration::from_millis(2100)).await;
    assert!(store.get("cache:short").await.unwrap().is_none());
}

/// `total_connections_received` from `INFO stats`.
async fn connections_received(url: &str) -> u64 {
    let client = redis::Client::open(url).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let info: String = redis::cmd("INFO").arg("stats").query_async(&mut conn).await.unwrap();
    info.lines()
        .find_map(|l| l.strip_prefix("total_connections_received:"))
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_store_reuses_one_connection() {
    let (_container, redis) = RedisContainer::start().await;
    let store = RedisStore::open(&redis.url()).unwrap();
    let directory = RedisUserDirectory::new(store.shared_connection());
    store.ping().await.unwrap();

    let before = connections_received(&redis.url()).await;
    for i in 0..50 {
        let key = format!("rate_limit:10.0.0.{i}");
        store
            .increment(&key, Duration::from_secs(30), ExpiryPolicy::Rolling)
            .await
            .unwrap();
        store.ttl(&key).await.unwrap();
        store.get("cache:x").await.unwrap();
        let _ = directory.get_by_id("nobody").await;
    }
    let after = connections_received(&redis.url()).await;

    // The only new connection is the one the second INFO call made
    assert_eq!(after - before, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_user_directory() {
    let (_container, redis) = RedisContainer::start().await;
    let alice = user("alice", "user");
    seed_user(&redis.url(), &alice).await;

    let store = RedisStore::open(&redis.url()).unwrap();
    let directory = RedisUserDirectory::new(store.shared_connection());
    assert_eq!(directory.get_by_id("alice").await.unwrap(), alice);
    assert!(directory.get_by_id("nobody").await.is_err());
}

// =============================================================================
// End-to-end
// =============================================================================

/// Test fixture that manages the Redis container and app server
struct TestFixture {
    _redis_container: ContainerAsync<GenericImage>,
    redis_url: String,
    base_url: String,
    client: Client,
}

impl TestFixture {
    async fn new(rate_limit_requests: u32) -> Self {
        let (redis_container, redis) = RedisContainer::start().await;
        let redis_url = redis.url();

        let app_port = find_available_port();
        let base_url = format!("http://127.0.0.1:{app_port}");

        let (tx, mut rx) = tokio::sync::oneshot::channel::<Result<(), String>>();
        let url = redis_url.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::start_server(app_port, &url, rate_limit_requests).await {
                let _ = tx.send(Err(e));
            }
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self::wait_for_server(&client, &base_url, &mut rx).await;

        Self {
            _redis_container: redis_container,
            redis_url,
            base_url,
            client,
        }
    }

    async fn start_server(port: u16, redis_url: &str, limit: u32) -> Result<(), String> {
        use storefront_edge::{AppState, Config, build_router};

        let config = Config {
            host: "127.0.0.1".to_string(),
            port,
            redis_url: redis_url.to_string(),
            jwt_secret: SECRET.to_string(),
            rate_limit_requests: limit,
            rate_limit_window: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(60),
            trusted_proxies: vec![], // Empty = trust all (test mode)
            metrics_port: 0,
            ..Config::default()
        };

        let state = AppState::from_config(config).map_err(|e| format!("State: {e}"))?;
        let app = build_router(state).map_err(|e| format!("Router: {e}"))?;

        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{port}"))
            .await
            .map_err(|e| format!("Failed to bind server: {e}"))?;

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| format!("Server failed: {e}"))
    }

    /// Readiness means both the server and its Redis connection are up.
    async fn wait_for_server(
        client: &Client,
        base_url: &str,
        error_rx: &mut tokio::sync::oneshot::Receiver<Result<(), String>>,
    ) {
        let ready_url = format!("{base_url}/ready");

        for _ in 0..60 {
            if let Ok(Err(e)) = error_rx.try_recv() {
                panic!("Server failed to start: {e}");
            }
            if let Ok(response) = client.get(&ready_url).send().await {
                if response.status().is_success() {
                    return;
                }
            }
            sleep(Duration::from_millis(250)).await;
        }
        panic!("Server did not become ready at {ready_url}");
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn cookie(subject: &str) -> String {
        let token = issue_token(subject, SECRET, Duration::from_secs(300)).unwrap();
        format!("auth_token={token}")
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_e2e_rate_limit_over_http() {
    let fixture = TestFixture::new(3).await;

    // Readiness probes already spent part of the 127.0.0.1 budget, so use a
    // forwarded address of our own.
    let mut statuses = Vec::new();
    for _ in 0..4 {
        let response = fixture
            .client
            .get(fixture.url("/health"))
            .header("x-forwarded-for", "203.0.113.9")
            .send()
            .await
            .unwrap();
        statuses.push(response.status());
    }

    assert_eq!(
        statuses,
        [
            StatusCode::OK,
            StatusCode::OK,
            StatusCode::OK,
            StatusCode::TOO_MANY_REQUESTS
        ]
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_e2e_auth_and_purge() {
    let fixture = TestFixture::new(1000).await;
    seed_user(&fixture.redis_url, &user("alice", "user")).await;
    seed_user(&fixture.redis_url, &user("root", "admin")).await;

    let response = fixture.client.get(fixture.url("/me")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = fixture
        .client
        .get(fixture.url("/me"))
        .header("cookie", TestFixture::cookie("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"], "alice");

    // Warm the cache, then purge it as admin
    fixture.client.get(fixture.url("/stats")).send().await.unwrap();
    let store = RedisStore::open(&fixture.redis_url).unwrap();

    let response = fixture
        .client
        .post(fixture.url("/admin/cache/purge"))
        .header("cookie", TestFixture::cookie("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = fixture
        .client
        .post(fixture.url("/admin/cache/purge"))
        .header("cookie", TestFixture::cookie("root"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(store.delete_by_pattern("cache:*").await.unwrap(), 0);
}
