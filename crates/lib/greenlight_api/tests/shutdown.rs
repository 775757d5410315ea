//! Graceful serve: accept, drain, stop.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::TestApp;
use greenlight_core::auth::permissions::MOVIES_READ;
use greenlight_core::lifecycle::{DrainOutcome, Phase};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn raw_get(addr: std::net::SocketAddr, path: &str) -> String {
    raw_get_as(addr, path, None).await
}

async fn raw_get_as(addr: std::net::SocketAddr, path: &str, token: Option<&str>) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let auth = token
        .map(|t| format!("Authorization: Bearer {t}\r\n"))
        .unwrap_or_default();
    let req = format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\n{auth}Connection: close\r\n\r\n"
    );
    stream.write_all(req.as_bytes()).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn serves_until_drain_then_stops_cleanly() {
    let app = TestApp::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(greenlight_api::serve(
        listener,
        app.router.clone(),
        app.lifecycle.clone(),
    ));

    let response = raw_get(addr, "/v1/healthcheck").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");

    // Background work dispatched before the signal must finish before stop.
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    app.lifecycle
        .spawn("slow job", async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

    app.lifecycle.begin_drain();
    let outcome = server.await.unwrap().unwrap();

    assert_eq!(outcome, DrainOutcome::Clean);
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(app.lifecycle.phase(), Phase::Stopped);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn stuck_background_work_times_out_with_failure_outcome() {
    let app = TestApp::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let server = tokio::spawn(greenlight_api::serve(
        listener,
        app.router.clone(),
        app.lifecycle.clone(),
    ));

    app.lifecycle
        .spawn("never finishes", std::future::pending())
        .unwrap();

    // 5s deadline from the harness; pause so it elapses instantly.
    tokio::time::pause();
    app.lifecycle.begin_drain();
    let outcome = server.await.unwrap().unwrap();

    assert_eq!(outcome, DrainOutcome::TimedOut { outstanding: 1 });
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn request_in_flight_at_drain_gets_its_normal_response() {
    let app = TestApp::new();
    let (_user, token) = app
        .seed_user("reader@example.com", true, &[MOVIES_READ])
        .await;
    // Every storage call now takes a while, so the request outlives the signal.
    app.store.set_latency(Duration::from_millis(300));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(greenlight_api::serve(
        listener,
        app.router.clone(),
        app.lifecycle.clone(),
    ));

    let client = tokio::spawn(async move { raw_get_as(addr, "/v1/movies/1", Some(&token)).await });
    tokio::time::timeout(Duration::from_secs(1), async {
        while app.lifecycle.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("request never started");

    app.lifecycle.begin_drain();
    let response = client.await.unwrap();
    let outcome = server.await.unwrap().unwrap();

    assert!(response.starts_with("HTTP/1.1 404"), "{response}");
    assert_eq!(outcome, DrainOutcome::Clean);
    assert_eq!(app.lifecycle.in_flight(), 0);
}
