//! Rate limit, authentication and authorization as seen over HTTP.

mod common;

use axum::http::{Method, StatusCode, header};
use chrono::Duration as ChronoDuration;
use common::{TestApp, get, request};
use greenlight_core::auth::permissions::{MOVIES_READ, MOVIES_WRITE};
use greenlight_core::ratelimit::LimiterConfig;
use serde_json::json;

#[tokio::test]
async fn healthcheck_is_public() {
    let app = TestApp::new();
    let resp = app.send(get("/v1/healthcheck", None)).await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["status"], "available");
    assert_eq!(resp.body["system_info"]["environment"], "testing");
    assert_eq!(app.lifecycle.in_flight(), 0);
}

#[tokio::test]
async fn burst_is_admitted_then_rejected_with_retry_after() {
    let app = TestApp::with_limiter(LimiterConfig {
        rps: 2.0,
        burst: 4,
        enabled: true,
    });
    let client = Some([192, 0, 2, 1]);

    for _ in 0..4 {
        let resp = app
            .send(request(Method::GET, "/v1/healthcheck", None, None, client))
            .await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    let resp = app
        .send(request(Method::GET, "/v1/healthcheck", None, None, client))
        .await;
    assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.body["error"], "rate_limited");
    assert_eq!(resp.headers[header::RETRY_AFTER], "1");

    // Another client is unaffected.
    let resp = app
        .send(request(
            Method::GET,
            "/v1/healthcheck",
            None,
            None,
            Some([192, 0, 2, 2]),
        ))
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    app.clock.advance(ChronoDuration::milliseconds(500));
    let resp = app
        .send(request(Method::GET, "/v1/healthcheck", None, None, client))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_is_checked_before_the_token() {
    let app = TestApp::with_limiter(LimiterConfig {
        rps: 1.0,
        burst: 1,
        enabled: true,
    });
    let client = Some([198, 51, 100, 7]);
    let bogus = "A".repeat(32);

    let first = app
        .send(request(Method::GET, "/v1/movies/1", None, Some(&bogus), client))
        .await;
    assert_eq!(first.status, StatusCode::UNAUTHORIZED);

    let second = app
        .send(request(Method::GET, "/v1/movies/1", None, Some(&bogus), client))
        .await;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn disabled_limiter_never_rejects() {
    let app = TestApp::with_limiter(LimiterConfig {
        rps: 1.0,
        burst: 1,
        enabled: false,
    });
    for _ in 0..10 {
        let resp = app
            .send(request(
                Method::GET,
                "/v1/healthcheck",
                None,
                None,
                Some([203, 0, 113, 5]),
            ))
            .await;
        assert_eq!(resp.status, StatusCode::OK);
    }
}

#[tokio::test]
async fn invalid_token_is_rejected_even_on_public_routes() {
    let app = TestApp::new();
    let resp = app.send(get("/v1/healthcheck", Some("not-a-real-token"))).await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.body["error"], "invalid_token");
    assert_eq!(resp.headers[header::WWW_AUTHENTICATE], "Bearer");
}

#[tokio::test]
async fn anonymous_caller_on_permission_route_is_forbidden() {
    let app = TestApp::new();
    let resp = app.send(get("/v1/movies/1", None)).await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.body["error"], "forbidden");
}

#[tokio::test]
async fn anonymous_logout_requires_authentication() {
    let app = TestApp::new();
    let resp = app
        .send(request(
            Method::DELETE,
            "/v1/tokens/authentication",
            None,
            None,
            None,
        ))
        .await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.body["error"], "authentication_required");
}

#[tokio::test]
async fn unactivated_user_is_told_to_activate() {
    let app = TestApp::new();
    let (_user, token) = app
        .seed_user("inactive@example.com", false, &[MOVIES_READ])
        .await;

    let resp = app.send(get("/v1/movies/1", Some(&token))).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.body["error"], "activation_required");
}

#[tokio::test]
async fn read_permission_does_not_grant_write() {
    let app = TestApp::new();
    let (_user, token) = app
        .seed_user("reader@example.com", true, &[MOVIES_READ])
        .await;

    let resp = app.send(get("/v1/movies/1", Some(&token))).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = app
        .send(request(
            Method::POST,
            "/v1/movies",
            Some(json!({"title": "Moana", "year": 2016, "runtime": 107, "genres": ["animation"]})),
            Some(&token),
            None,
        ))
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn permission_granted_later_is_seen_on_next_request() {
    let app = TestApp::new();
    let (user, token) = app.seed_user("grow@example.com", true, &[]).await;
    let body = json!({"title": "Moana", "year": 2016, "runtime": 107, "genres": ["animation"]});

    let resp = app
        .send(request(Method::POST, "/v1/movies", Some(body.clone()), Some(&token), None))
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    app.state
        .pipeline
        .gate()
        .add_for_user(user.id, &[MOVIES_WRITE])
        .await
        .unwrap();

    let resp = app
        .send(request(Method::POST, "/v1/movies", Some(body), Some(&token), None))
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
}

#[tokio::test]
async fn expired_token_fails_authentication() {
    let app = TestApp::new();
    let (_user, token) = app
        .seed_user("expiring@example.com", true, &[MOVIES_READ])
        .await;

    app.clock.advance(ChronoDuration::hours(24) + ChronoDuration::seconds(1));
    let resp = app.send(get("/v1/movies/1", Some(&token))).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.body["error"], "invalid_token");
}

#[tokio::test]
async fn requests_are_refused_while_draining() {
    let app = TestApp::new();
    app.lifecycle.begin_drain();

    let resp = app.send(get("/v1/healthcheck", None)).await;
    assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.body["error"], "shutting_down");
    assert_eq!(app.lifecycle.in_flight(), 0);
}

#[tokio::test]
async fn unmatched_paths_spend_the_same_bucket() {
    let app = TestApp::with_limiter(LimiterConfig {
        rps: 1.0,
        burst: 1,
        enabled: true,
    });
    let client = Some([192, 0, 2, 50]);

    let first = app
        .send(request(Method::GET, "/v1/no-such-route", None, None, client))
        .await;
    assert_eq!(first.status, StatusCode::NOT_FOUND);

    for _ in 0..4 {
        let resp = app
            .send(request(Method::GET, "/v1/no-such-route", None, None, client))
            .await;
        assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
    }

    // Wrong method on a real path and real routes share the exhausted bucket.
    let resp = app
        .send(request(Method::POST, "/v1/healthcheck", None, None, client))
        .await;
    assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
    let resp = app
        .send(request(Method::GET, "/v1/healthcheck", None, None, client))
        .await;
    assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn debug_vars_report_runtime_counters() {
    let app = TestApp::new();
    let resp = app
        .send(request(
            Method::GET,
            "/debug/vars",
            None,
            None,
            Some([192, 0, 2, 60]),
        ))
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(resp.body["phase"], "running");
    // The request reading the counters is itself in flight.
    assert_eq!(resp.body["in_flight"], 1);
    assert_eq!(resp.body["rate_limiter"]["enabled"], true);
    assert_eq!(resp.body["rate_limiter"]["tracked_clients"], 1);
    assert!(resp.body["database"].is_null());
    assert!(resp.body["timestamp"].as_i64().unwrap() > 0);
}
