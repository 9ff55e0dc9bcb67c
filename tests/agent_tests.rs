//! End-to-end agent tests
//!
//! These tests run the full crawl loop against wiremock servers: seed a
//! URL, let the loop expand the frontier through the shared queue, and
//! verify what landed in the store.

use tempfile::TempDir;
use trawler::agent::build_http_client;
use trawler::agent::runner::Agent;
use trawler::config::{AgentConfig, SharedConfig};
use trawler::plugins::Registry;
use trawler::{Context, Store};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    _dir: TempDir,
    config: AgentConfig,
}

fn fixture(dir: TempDir, mutate: impl FnOnce(&mut AgentConfig)) -> Fixture {
    let mut config = AgentConfig {
        id: "test-agent".to_string(),
        run_dir: Some(dir.path().join("run")),
        db_path: dir.path().join("trawler.db"),
        ..Default::default()
    };
    trawler::config::finalize(&mut config);
    mutate(&mut config);
    Fixture { _dir: dir, config }
}

fn build_agent(fx: &Fixture) -> Agent {
    let shared = SharedConfig::new(fx.config.clone());
    let context = Context::new();
    let registry = Registry::load(&fx.config);
    let client = build_http_client(&fx.config).unwrap();
    let store = Store::open(&fx.config.db_path).unwrap();
    Agent::new(client, store, context, shared, registry)
}

async fn mount_page(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_seed_expands_through_the_queue() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(
        &server,
        "/",
        format!(
            r#"<html><body>
            <a href="{base}/page1">One</a>
            <a href="{base}/page2">Two</a>
            </body></html>"#
        ),
    )
    .await;
    mount_page(&server, "/page1", "<html><body>Content 1</body></html>".to_string()).await;
    mount_page(&server, "/page2", "<html><body>Content 2</body></html>".to_string()).await;

    let fx = fixture(TempDir::new().unwrap(), |config| {
        config.level = 1;
        config.queue_links = true;
        config.use_parsers = false;
    });

    let mut agent = build_agent(&fx);
    agent.run(vec![format!("{base}/")]).await.unwrap();

    // All three pages were fetched and stored, and the queue drained
    let store = Store::open(&fx.config.db_path).unwrap();
    for route in ["/", "/page1", "/page2"] {
        let record = store
            .url_record(&format!("{base}{route}"))
            .unwrap()
            .unwrap_or_else(|| panic!("missing record for {route}"));
        let content = store.current_content(record.uuid).unwrap().unwrap();
        assert!(content.data.is_some(), "no content stored for {route}");
        assert!(record.last_retrieved.is_some());
    }
    assert_eq!(store.list_queue().unwrap().number_queued, 0);
}

#[tokio::test]
async fn test_cached_urls_are_not_refetched() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/once"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body>once</body></html>")
                .insert_header("content-type", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fx = fixture(TempDir::new().unwrap(), |config| {
        config.use_parsers = false;
    });

    // The same URL twice in one run: the second pass is a cache hit
    let mut agent = build_agent(&fx);
    agent
        .run(vec![format!("{base}/once"), format!("{base}/once")])
        .await
        .unwrap();

    server.verify().await;
}

#[tokio::test]
async fn test_paused_queue_leaves_the_network_alone() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("nope"))
        .expect(0)
        .mount(&server)
        .await;

    let fx = fixture(TempDir::new().unwrap(), |config| {
        config.use_parsers = false;
    });

    let url = format!("{base}/held");
    {
        let mut store = Store::open(&fx.config.db_path).unwrap();
        store.enqueue_urls(&[url.clone()], false, None, None).unwrap();
        store.pause_urls(&[url.clone()]).unwrap();
    }

    // Nothing leasable, not a daemon: the loop exits without fetching
    let mut agent = build_agent(&fx);
    agent.run(Vec::new()).await.unwrap();

    server.verify().await;
    let store = Store::open(&fx.config.db_path).unwrap();
    assert_eq!(store.list_queue().unwrap().number_queued, 1);
}

#[tokio::test]
async fn test_single_mode_processes_one_url() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(&server, "/a", "<html><body>a</body></html>".to_string()).await;
    mount_page(&server, "/b", "<html><body>b</body></html>".to_string()).await;

    let fx = fixture(TempDir::new().unwrap(), |config| {
        config.single = true;
        config.use_parsers = false;
    });

    let mut agent = build_agent(&fx);
    agent
        .run(vec![format!("{base}/a"), format!("{base}/b")])
        .await
        .unwrap();

    let store = Store::open(&fx.config.db_path).unwrap();
    assert!(store.url_record(&format!("{base}/a")).unwrap().is_some());
    assert!(store.url_record(&format!("{base}/b")).unwrap().is_none());
}

#[tokio::test]
async fn test_pattern_cooldown_pauses_queued_siblings() {
    let server = MockServer::start().await;
    let base = server.uri();
    let host = base.trim_start_matches("http://").to_string();

    mount_page(&server, "/first", "<html><body>first</body></html>".to_string()).await;

    let fx = fixture(TempDir::new().unwrap(), |config| {
        config.single = true;
        config.use_parsers = false;
    });

    let sibling = format!("{base}/second");
    {
        let mut store = Store::open(&fx.config.db_path).unwrap();
        store.enqueue_urls(&[sibling.clone()], false, None, None).unwrap();
        store.add_pattern_wait(&regex::escape(&host), 120).unwrap();
    }

    let mut agent = build_agent(&fx);
    agent.run(vec![format!("{base}/first")]).await.unwrap();

    // Crawling one URL of the throttled host spaced out the queued one
    let mut store = Store::open(&fx.config.db_path).unwrap();
    assert_eq!(store.list_queue().unwrap().number_queued, 1);
    assert!(store.lease_next("agent-2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_force_refetch_appends_a_version() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(&server, "/page", "<html><body>body</body></html>".to_string()).await;

    let fx = fixture(TempDir::new().unwrap(), |config| {
        config.force = true;
        config.use_parsers = false;
    });

    let url = format!("{base}/page");
    let mut agent = build_agent(&fx);
    agent.run(vec![url.clone(), url.clone()]).await.unwrap();

    let store = Store::open(&fx.config.db_path).unwrap();
    let record = store.url_record(&url).unwrap().unwrap();
    let oldest = store.current_content(record.uuid).unwrap().unwrap();
    let latest = store.latest_content(record.uuid).unwrap().unwrap();
    assert_ne!(oldest.id, latest.id, "second fetch should add a version");
}

#[tokio::test]
async fn test_overwrite_replaces_the_latest_version() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(&server, "/page", "<html><body>body</body></html>".to_string()).await;

    let fx = fixture(TempDir::new().unwrap(), |config| {
        config.force = true;
        config.overwrite = true;
        config.use_parsers = false;
    });

    let url = format!("{base}/page");
    let mut agent = build_agent(&fx);
    agent.run(vec![url.clone(), url.clone()]).await.unwrap();

    let store = Store::open(&fx.config.db_path).unwrap();
    let record = store.url_record(&url).unwrap().unwrap();
    let oldest = store.current_content(record.uuid).unwrap().unwrap();
    let latest = store.latest_content(record.uuid).unwrap().unwrap();
    assert_eq!(oldest.id, latest.id, "overwrite must not grow the history");
}

#[tokio::test]
async fn test_bad_urls_do_not_abort_the_run() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(&server, "/good", "<html><body>good</body></html>".to_string()).await;

    let fx = fixture(TempDir::new().unwrap(), |config| {
        config.use_parsers = false;
    });

    let mut agent = build_agent(&fx);
    agent
        .run(vec![
            "not-even-a-url".to_string(),
            format!("{base}/good"),
        ])
        .await
        .unwrap();

    // The malformed URL was skipped; the good one still landed
    let store = Store::open(&fx.config.db_path).unwrap();
    assert!(store.url_record(&format!("{base}/good")).unwrap().is_some());
}
