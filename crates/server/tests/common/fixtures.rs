//! Test fixtures for generating test data and driving the router.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde_json::Value;
use tower::ServiceExt;

/// Test users from `AuthConfig::for_testing`.
#[allow(dead_code)]
pub const ALICE: (&str, &str) = ("alice", "alice-secret");
#[allow(dead_code)]
pub const BOB: (&str, &str) = ("bob", "bob-secret");

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Build a Basic `Authorization` header value.
#[allow(dead_code)]
pub fn basic_auth((user, secret): (&str, &str)) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{secret}")))
}

/// Send a request with a raw body and return status, headers, and body bytes.
#[allow(dead_code)]
pub async fn raw_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Bytes,
    user: Option<(&str, &str)>,
) -> (StatusCode, HeaderMap, Bytes) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("Authorization", basic_auth(user));
    }

    let request = builder.body(Body::from(body)).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body_bytes)
}

/// Helper to make JSON requests.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    user: Option<(&str, &str)>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(user) = user {
        builder = builder.header("Authorization", basic_auth(user));
    }

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

/// Upload `data` as a standalone file in one request and return its file ID.
#[allow(dead_code)]
pub async fn put_file(
    router: &axum::Router,
    user: (&str, &str),
    name: &str,
    data: &'static [u8],
    extra_query: &str,
) -> String {
    let uri = format!("/v1/files?name={name}{extra_query}");
    let (status, _, body) =
        raw_request(router, "POST", &uri, Bytes::from_static(data), Some(user)).await;
    assert_eq!(status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&body));
    let json: Value = serde_json::from_slice(&body).unwrap();
    json["item_ref"].as_str().unwrap().to_string()
}

/// Issue a link and return the token.
#[allow(dead_code)]
pub async fn issue_link(
    router: &axum::Router,
    user: (&str, &str),
    resource_id: &str,
    purpose: &str,
) -> String {
    let (status, json) = json_request(
        router,
        "POST",
        "/v1/links",
        Some(serde_json::json!({ "resource_id": resource_id, "purpose": purpose })),
        Some(user),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["token"].as_str().unwrap().to_string()
}
