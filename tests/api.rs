//! HTTP surface, exercised through the router without binding a socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use tokenq::config::Config;
use tokenq::store::memory::MemoryStore;
use tokenq::{api, AppState};

fn app_with(config: Config) -> Router {
    let state = AppState::new(config, Arc::new(MemoryStore::new()), CancellationToken::new());
    api::router(Arc::new(state))
}

fn app() -> Router {
    app_with(Config::default())
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    fn error(&self) -> String {
        self.json()["error"].as_str().unwrap_or_default().to_string()
    }
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Reply {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    Reply {
        status,
        headers,
        body,
    }
}

async fn get(app: &Router, uri: &str) -> Reply {
    call(app, Method::GET, uri, None).await
}

fn token_body() -> Value {
    json!({
        "svg": "<svg xmlns=\"http://www.w3.org/2000/svg\"/>",
        "generated": "2021-05-01T10:00:00.000Z",
        "keywords": ["sun", "sea", "salt"]
    })
}

// ── Health ───────────────────────────────────────────────────

#[tokio::test]
async fn test_health_and_request_id() {
    let app = app();
    let reply = get(&app, "/healthz").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, b"ok");
    assert!(reply.headers.contains_key("x-request-id"));

    let reply = get(&app, "/").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["store"], "ok");
}

// ── Tokens ───────────────────────────────────────────────────

#[tokio::test]
async fn test_put_and_get_token() {
    let app = app();

    let reply = call(&app, Method::PUT, "/put_token", Some(token_body())).await;
    assert_eq!(reply.status, StatusCode::OK);
    let id = reply.json()["id"].as_str().unwrap().to_string();

    let reply = get(&app, &format!("/get_token?id={}", id)).await;
    assert_eq!(reply.status, StatusCode::OK);
    let token = reply.json();
    assert_eq!(token["id"], id.as_str());
    assert_eq!(token["keywords"], json!(["sun", "sea", "salt"]));
    assert_eq!(token["generated"], "2021-05-01T10:00:00.000Z");

    let reply = get(&app, &format!("/get_svg?id={}", id.to_lowercase())).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers[header::CONTENT_TYPE], "image/svg+xml");
    assert!(String::from_utf8_lossy(&reply.body).starts_with("<svg"));
}

#[tokio::test]
async fn test_token_errors() {
    let app = app();

    let reply = get(&app, "/get_token").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error(), "id missing");

    let reply = get(&app, "/get_token?id=ZZZZ").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.error(), "token not found");

    let mut incomplete = token_body();
    incomplete["keywords"] = json!([]);
    let reply = call(&app, Method::PUT, "/put_token", Some(incomplete)).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error(), "required attribute(s) missing");
}

#[tokio::test]
async fn test_get_tokens() {
    let app = app();
    for _ in 0..3 {
        let reply = call(&app, Method::PUT, "/put_token", Some(token_body())).await;
        assert_eq!(reply.status, StatusCode::OK);
    }

    let reply = get(&app, "/get_tokens?count=2").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error(), "need offset, start_id, or end_id");

    let reply = get(&app, "/get_tokens?offset=0&count=0").await;
    assert_eq!(reply.error(), "count out of range");

    let reply = get(&app, "/get_tokens?offset=0&count=2").await;
    assert_eq!(reply.status, StatusCode::OK);
    let page = reply.json();
    assert_eq!(page["total_rows"], 3);
    assert_eq!(page["offset"], 0);
    assert_eq!(page["newest_first"], true);
    assert_eq!(page["rows"].as_array().unwrap().len(), 2);
    assert!(page["prev"].is_null());
    assert!(page["next"].is_string());

    let reply = get(&app, "/get_tokens?offset=-1&newest_first=false").await;
    let page = reply.json();
    assert_eq!(page["rows"].as_array().unwrap().len(), 1);
    assert!(page["next"].is_null());
}

// ── Interactions ─────────────────────────────────────────────

#[tokio::test]
async fn test_interaction_lifecycle() {
    let app = app();

    let reply = get(&app, "/request_interaction").await;
    assert_eq!(reply.status, StatusCode::OK);
    let ticket = reply.json();
    let id = ticket["id"].as_str().unwrap().to_string();
    assert!(ticket["color"].as_str().unwrap().starts_with('#'));
    assert!(ticket["requested_at"].as_str().unwrap().ends_with('Z'));

    let reply = get(&app, &format!("/deposit_interaction?id={}&keywords=a,b", id)).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error(), "exactly three keywords needed");

    let reply = get(&app, &format!("/deposit_interaction?id={}&keywords=a,b,c", id)).await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = get(&app, &format!("/deposit_interaction?id={}&keywords=a,b,c", id)).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error(), "already deposited");

    let reply = get(&app, &format!("/update_interaction?id={}", id)).await;
    assert_eq!(reply.error(), "queue_position or token_id required");

    let reply = get(&app, &format!("/update_interaction?id={}&queue_position=-2", id)).await;
    assert_eq!(reply.error(), "invalid queue_position");

    let reply = get(&app, &format!("/update_interaction?id={}&queue_position=2", id)).await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = get(&app, &format!("/interaction_updates?id={}&timeout=100", id)).await;
    assert_eq!(reply.status, StatusCode::OK);
    let update = reply.json();
    assert_eq!(update["id"], id.as_str());
    assert_eq!(update["queue_position"], 2);
    assert!(update["token_id"].is_null());

    let reply = get(&app, "/waiting_interactions").await;
    let waiting = reply.json();
    assert_eq!(waiting.as_array().unwrap().len(), 1);
    assert_eq!(waiting[0]["status"], "waiting");

    let reply = get(&app, "/waiting_interactions?since=2999-01-01T00:00:00.000Z").await;
    assert_eq!(reply.json().as_array().unwrap().len(), 0);

    let reply = get(&app, "/waiting_interactions?since=2021-05-01").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json().as_array().unwrap().len(), 1);

    let reply = get(&app, "/waiting_interactions?since=xyz").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error(), "invalid timestamp");

    let reply = call(&app, Method::PUT, "/put_token", Some(token_body())).await;
    let token_id = reply.json()["id"].as_str().unwrap().to_string();
    let reply = get(
        &app,
        &format!("/update_interaction?id={}&token_id={}", id, token_id),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);

    let since = update["seq"].as_str().unwrap();
    let reply = get(
        &app,
        &format!("/interaction_updates?id={}&since={}&timeout=100", id, since),
    )
    .await;
    let done = reply.json();
    assert_eq!(done["status"], "done");
    assert_eq!(done["queue_position"], 0);
    assert_eq!(done["token_id"], token_id.as_str());
}

#[tokio::test]
async fn test_unknown_interaction() {
    let app = app();
    let reply = get(&app, "/deposit_interaction?id=nope&keywords=a,b,c").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.error(), "not found");

    let reply = get(&app, "/update_interaction?id=nope&queue_position=1").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.error(), "interaction not found");

    let reply = get(&app, "/deposit_interaction?keywords=a,b,c").await;
    assert_eq!(reply.error(), "id missing");
}

#[tokio::test]
async fn test_update_with_unknown_token_is_404() {
    let app = app();
    let ticket = get(&app, "/request_interaction").await.json();
    let id = ticket["id"].as_str().unwrap();

    for query in ["token_id=abc", "queue_position=&token_id=abc"] {
        let reply = get(&app, &format!("/update_interaction?id={}&{}", id, query)).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert_eq!(reply.error(), "token not found");
    }

    let reply = get(&app, "/update_interaction?id=xyz&queue_position=&token_id=abc").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.error(), "interaction not found");
}

#[tokio::test]
async fn test_queue_limit_is_locked() {
    let app = app_with(Config {
        queue_limit: 1,
        ..Config::default()
    });

    let ticket = get(&app, "/request_interaction").await.json();
    let id = ticket["id"].as_str().unwrap();
    get(&app, &format!("/deposit_interaction?id={}&keywords=a,b,c", id)).await;

    let reply = get(&app, "/request_interaction").await;
    assert_eq!(reply.status, StatusCode::LOCKED);
    assert_eq!(reply.error(), "queue limit reached");
}

#[tokio::test]
async fn test_longpoll_timeout_is_504() {
    let app = app();
    let reply = get(&app, "/new_interaction_updates?timeout=50").await;
    assert_eq!(reply.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(reply.error(), "timeout");
    assert_eq!(reply.headers["retry-after"], "0");

    let reply = get(&app, "/new_interaction_updates?timeout=soon").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error(), "invalid timeout");
}

#[tokio::test]
async fn test_new_interaction_updates_delivers_deposits() {
    let app = app();
    let ticket = get(&app, "/request_interaction").await.json();
    let id = ticket["id"].as_str().unwrap();
    get(&app, &format!("/deposit_interaction?id={}&keywords=red,green,blue", id)).await;

    let reply = get(&app, "/new_interaction_updates?since=0&timeout=100").await;
    assert_eq!(reply.status, StatusCode::OK);
    let update = reply.json();
    assert_eq!(update["id"], id);
    assert_eq!(update["keywords"], json!(["red", "green", "blue"]));
    assert_eq!(update["color"], ticket["color"]);
    assert!(update["seq"].is_string());
}
