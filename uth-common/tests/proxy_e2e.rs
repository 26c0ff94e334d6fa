//! Fault-injection proxy E2E over real sockets.
//!
//! Each test generates a fixture tree, starts the proxy (and its backing
//! origin server) on ephemeral ports, and drives it with scripted dice so
//! the fault policy is deterministic.

use std::path::Path;

use tempfile::TempDir;
use uth_common::{
    fixtures, FaultProxy, ProcessManager, ScenarioConfig, ScriptedDice,
};

fn scenario(tmp: &TempDir, name: &str) -> ScenarioConfig {
    ScenarioConfig::named(0, name, tmp.path()).with(|c| {
        // Ephemeral ports so E2E tests can run concurrently.
        c.ports.proxy = 0;
        c.ports.origin = 0;
        c.ports.reporter = 0;
    })
}

fn generate(cfg: &ScenarioConfig) {
    let mut procs = ProcessManager::new();
    fixtures::generate_all(cfg, &mut procs).unwrap();
}

fn file_url(proxy: &FaultProxy, cfg: &ScenarioConfig, name: &str) -> String {
    format!("{}{}/{}", proxy.base_url(), cfg.version, name)
}

#[tokio::test]
async fn test_passthrough_relays_origin_bytes() {
    let tmp = TempDir::new().unwrap();
    let cfg = scenario(&tmp, "proxy_passthrough");
    generate(&cfg);

    // All draws low: nothing is ever eligible.
    let mut proxy = FaultProxy::start(&cfg, Box::new(ScriptedDice::new([0])))
        .await
        .unwrap();

    let url = file_url(&proxy, &cfg, "test2.txt");
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.bytes().await.unwrap();

    let on_disk = std::fs::read(cfg.version_dir().join("test2.txt")).unwrap();
    assert_eq!(&body[..], &on_disk[..]);
    assert_eq!(proxy.requests_served(), 1);

    proxy.stop().await;
}

#[tokio::test]
async fn test_not_found_fault_then_recovery() {
    let tmp = TempDir::new().unwrap();
    let cfg = scenario(&tmp, "proxy_404").with(|c| {
        c.faults.not_found = true;
        c.faults.trouble_budget = 1;
    });
    generate(&cfg);

    // First draw eligible, everything after passes through.
    let mut proxy = FaultProxy::start(&cfg, Box::new(ScriptedDice::new([99, 0])))
        .await
        .unwrap();

    let url = file_url(&proxy, &cfg, "test2.txt");
    let faulted = reqwest::get(&url).await.unwrap();
    assert_eq!(faulted.status(), 404);

    let recovered = reqwest::get(&url).await.unwrap();
    assert_eq!(recovered.status(), 200);
    assert_eq!(proxy.budget_remaining(), 0);

    proxy.stop().await;
}

#[tokio::test]
async fn test_trouble_budget_caps_faults() {
    let tmp = TempDir::new().unwrap();
    let cfg = scenario(&tmp, "proxy_budget").with(|c| {
        c.faults.not_found = true;
        c.faults.trouble_budget = 2;
    });
    generate(&cfg);

    // Every draw is eligible; the budget must still cap injections at two.
    let mut proxy = FaultProxy::start(&cfg, Box::new(ScriptedDice::new([99])))
        .await
        .unwrap();

    let url = file_url(&proxy, &cfg, "file2.jpeg");
    let mut faults = 0;
    for _ in 0..8 {
        let response = reqwest::get(&url).await.unwrap();
        if response.status() == 404 {
            faults += 1;
        }
    }
    assert_eq!(faults, 2);
    assert_eq!(proxy.budget_remaining(), 0);

    proxy.stop().await;
}

#[tokio::test]
async fn test_manifest_stays_reachable_under_faults() {
    let tmp = TempDir::new().unwrap();
    let cfg = scenario(&tmp, "proxy_manifest").with(|c| {
        c.faults.not_found = true;
    });
    generate(&cfg);

    let mut proxy = FaultProxy::start(&cfg, Box::new(ScriptedDice::new([99])))
        .await
        .unwrap();

    let url = format!(
        "{}{}",
        proxy.base_url(),
        cfg.manifest_request_path().trim_start_matches('/')
    );
    for _ in 0..4 {
        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    proxy.stop().await;
}

#[tokio::test]
async fn test_sticky_blocked_path_fails_persistently() {
    let tmp = TempDir::new().unwrap();
    let cfg = scenario(&tmp, "proxy_sticky").with(|c| {
        c.faults.not_found = true;
        c.faults.block_one_file = true;
        c.faults.sticky_after = 1;
        c.faults.trouble_budget = 100;
    });
    generate(&cfg);

    // Low draws: only the sticky selection can make a request eligible.
    let mut proxy = FaultProxy::start(&cfg, Box::new(ScriptedDice::new([0])))
        .await
        .unwrap();

    let first = file_url(&proxy, &cfg, "test2.txt");
    let second = file_url(&proxy, &cfg, "file2.jpeg");

    assert_eq!(reqwest::get(&first).await.unwrap().status(), 200);
    // Crosses the serve-count threshold: sticky-selected and faulted.
    assert_eq!(reqwest::get(&second).await.unwrap().status(), 404);
    assert!(proxy.blocked_path().is_some());

    // The sticky path keeps failing; other paths keep passing.
    assert_eq!(reqwest::get(&second).await.unwrap().status(), 404);
    assert_eq!(reqwest::get(&first).await.unwrap().status(), 200);
    assert_eq!(
        proxy.blocked_path().unwrap(),
        format!("/{}/file2.jpeg", cfg.version)
    );

    proxy.stop().await;
}

#[tokio::test]
async fn test_drop_fault_closes_without_response() {
    let tmp = TempDir::new().unwrap();
    let cfg = scenario(&tmp, "proxy_drop").with(|c| {
        c.faults.drop = true;
        c.faults.trouble_budget = 1;
    });
    generate(&cfg);

    let mut proxy = FaultProxy::start(&cfg, Box::new(ScriptedDice::new([99, 0])))
        .await
        .unwrap();

    let url = file_url(&proxy, &cfg, "test2.txt");
    // The dropped connection surfaces as a transport error, not a status.
    assert!(reqwest::get(&url).await.is_err());
    // And the client can recover on the next attempt.
    assert_eq!(reqwest::get(&url).await.unwrap().status(), 200);

    proxy.stop().await;
}

#[tokio::test]
async fn test_wrong_header_fault_mismatches_content_type() {
    let tmp = TempDir::new().unwrap();
    let cfg = scenario(&tmp, "proxy_wrong_header").with(|c| {
        c.faults.wrong_header = true;
        c.faults.trouble_budget = 1;
    });
    generate(&cfg);

    let mut proxy = FaultProxy::start(&cfg, Box::new(ScriptedDice::new([99, 0])))
        .await
        .unwrap();

    let url = file_url(&proxy, &cfg, "test2.txt");
    let faulted = reqwest::get(&url).await.unwrap();
    assert_eq!(faulted.status(), 200);
    assert_eq!(
        faulted.headers()[reqwest::header::CONTENT_TYPE],
        "text/html"
    );
    let body = faulted.bytes().await.unwrap();
    let on_disk = std::fs::read(cfg.version_dir().join("test2.txt")).unwrap();
    assert_ne!(&body[..], &on_disk[..]);

    proxy.stop().await;
}

#[tokio::test]
async fn test_stop_closes_both_listeners() {
    let tmp = TempDir::new().unwrap();
    let cfg = scenario(&tmp, "proxy_stop");
    generate(&cfg);

    let mut proxy = FaultProxy::start(&cfg, Box::new(ScriptedDice::new([0])))
        .await
        .unwrap();
    let addr = proxy.addr();

    proxy.stop().await;
    proxy.stop().await; // idempotent

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_gzip_sibling_served_through_proxy() {
    let tmp = TempDir::new().unwrap();
    let cfg = scenario(&tmp, "proxy_gzip");
    generate(&cfg);

    let mut proxy = FaultProxy::start(&cfg, Box::new(ScriptedDice::new([0])))
        .await
        .unwrap();

    let url = file_url(&proxy, &cfg, "test2.txt.gz");
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "application/gzip"
    );

    proxy.stop().await;
}

#[tokio::test]
async fn test_unknown_path_is_origin_404_not_a_fault() {
    let tmp = TempDir::new().unwrap();
    let cfg = scenario(&tmp, "proxy_origin_404");
    generate(&cfg);

    let mut proxy = FaultProxy::start(&cfg, Box::new(ScriptedDice::new([0])))
        .await
        .unwrap();

    let url = file_url(&proxy, &cfg, "never_generated.bin");
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 404);
    // The trouble budget is untouched: this 404 came from the origin.
    assert_eq!(proxy.budget_remaining(), cfg.faults.trouble_budget);

    proxy.stop().await;
}

#[tokio::test]
async fn test_concurrent_requests_do_not_serialize() {
    let tmp = TempDir::new().unwrap();
    let cfg = scenario(&tmp, "proxy_concurrent").with(|c| c.more_big_files = true);
    generate(&cfg);

    let mut proxy = FaultProxy::start(&cfg, Box::new(ScriptedDice::new([0])))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..6 {
        let url = file_url(&proxy, &cfg, &format!("bigfile{i}.bin"));
        handles.push(tokio::spawn(async move {
            reqwest::get(&url).await.unwrap().status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 200);
    }
    assert_eq!(proxy.requests_served(), 6);

    proxy.stop().await;
}

#[tokio::test]
async fn test_proxy_requires_generated_fixtures() {
    // Sanity: starting against a missing tree still serves (origin 404s),
    // because the origin only resolves paths at request time.
    let tmp = TempDir::new().unwrap();
    let cfg = scenario(&tmp, "proxy_no_fixtures");
    std::fs::create_dir_all(Path::new(&cfg.dirs.server)).unwrap();

    let mut proxy = FaultProxy::start(&cfg, Box::new(ScriptedDice::new([0])))
        .await
        .unwrap();
    let url = file_url(&proxy, &cfg, "anything.txt");
    assert_eq!(reqwest::get(&url).await.unwrap().status(), 404);

    proxy.stop().await;
}
