//! Integration tests for the gateway server lifecycle.
//!
//! These tests bind a real TCP port and talk to it with `reqwest`.

mod common;

use std::time::Duration;

use common::TestBridge;
use davbridge_core::upstream::mock::MockUpstream;
use davbridge_daemon::start_server;
use tokio::time::sleep;

#[tokio::test]
async fn test_serves_and_shuts_down_gracefully() {
    let fixture = TestBridge::new(MockUpstream::new(common::PASSWORD));
    let password = fixture.enroll("alice").await;

    let handle = start_server("127.0.0.1:0".parse().unwrap(), fixture.bridge.clone(), None)
        .await
        .expect("Failed to start server");
    let url = format!("http://{}/contacts/", handle.local_addr());

    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .basic_auth("alice", Some(&password))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "instance-1 GET /contacts/");

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["www-authenticate"], "Basic");

    let session = fixture.bridge.sessions().get("alice").unwrap();
    handle.stop().await.expect("Server stop should succeed");

    assert!(fixture.bridge.sessions().is_empty());
    assert!(session.relay_stopped());
    assert!(reqwest::Client::new().get(&url).send().await.is_err());
}

#[tokio::test]
async fn test_idle_sessions_are_swept() {
    let fixture = TestBridge::new(MockUpstream::new(common::PASSWORD));
    let password = fixture.enroll("alice").await;

    let handle = start_server(
        "127.0.0.1:0".parse().unwrap(),
        fixture.bridge.clone(),
        Some(Duration::from_millis(50)),
    )
    .await
    .unwrap();
    let url = format!("http://{}/", handle.local_addr());

    let response = reqwest::Client::new()
        .get(&url)
        .basic_auth("alice", Some(&password))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    for _ in 0..50 {
        if fixture.bridge.sessions().is_empty() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(fixture.bridge.sessions().is_empty());

    // The next request cold-starts again with the rotated token.
    let response = reqwest::Client::new()
        .get(&url)
        .basic_auth("alice", Some(&password))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(fixture.refresh_calls(), 2);

    handle.stop().await.unwrap();
}
