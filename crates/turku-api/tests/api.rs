#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use argon2::Params;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use tower::ServiceExt;

use turku_api::auth::SecretHasher;
use turku_api::broker::{Broker, Clock};
use turku_api::routes::{AppState, build_router};
use turku_api::storage::{AuthCredential, SecretKind, TurkuDatabase};

const MACHINE_UUID: &str = "0f6c5c1e-1b7a-4f5e-9d43-2c8e2b1d7a10";

/// Always 2024-01-15 12:00:00 UTC.
struct StoppedClock;

impl Clock for StoppedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }
}

async fn app() -> axum::Router {
    let db = TurkuDatabase::open_in_memory().await.unwrap();
    let hasher = SecretHasher::with_params(Params::new(8, 1, 1, None).unwrap());
    for (id, name, secret, kind) in [
        ("auth-m", "machines", "machine-reg", SecretKind::MachineReg),
        ("auth-s", "storages", "storage-reg", SecretKind::StorageReg),
    ] {
        db.insert_auth(&AuthCredential {
            id: id.into(),
            name: name.into(),
            secret_hash: hasher.hash(secret).unwrap(),
            secret_type: kind.as_str().into(),
            comment: None,
            active: true,
            date_added: 0,
        })
        .await
        .unwrap();
    }
    let broker = Broker::new(db, Arc::new(hasher), Arc::new(StoppedClock));
    build_router(AppState {
        broker: Arc::new(broker),
    })
}

/// Send a request to the app and return (status, body text).
async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    content_type: Option<&str>,
    body: &str,
) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(ct) = content_type {
        builder = builder.header("content-type", ct);
    }
    let resp = app
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

/// POST a JSON value and parse a successful JSON response.
async fn post_json(app: &axum::Router, uri: &str, body: &Value) -> Value {
    let (status, text) = send(app, "POST", uri, Some("application/json"), &body.to_string()).await;
    assert_eq!(status, StatusCode::OK, "{uri}: {text}");
    serde_json::from_str(&text).unwrap()
}

fn storage_update_config() -> Value {
    json!({
        "auth": {"name": "storages", "secret": "storage-reg"},
        "storage": {
            "name": "storage-01",
            "secret": "storage-secret",
            "ssh_ping_host": "storage-01.example.com",
            "ssh_ping_port": 22,
            "ssh_ping_user": "turku",
            "ssh_ping_host_keys": ["ssh-ed25519 AAAAstorage"],
            "space_total": 2000,
            "space_available": 1000
        }
    })
}

fn update_config() -> Value {
    json!({
        "auth": {"name": "machines", "secret": "machine-reg"},
        "machine": {
            "uuid": MACHINE_UUID,
            "secret": "machine-secret",
            "unit_name": "web/0",
            "ssh_public_key": "ssh-ed25519 AAAAmachine",
            "sources": {
                "etc": {"path": "/etc", "frequency": "daily", "exclude": ["*.bak"]}
            }
        }
    })
}

fn agent_auth() -> Value {
    json!({"machine": {"uuid": MACHINE_UUID, "secret": "machine-secret"}})
}

#[tokio::test]
async fn health_answers_get_and_post() {
    let app = app().await;
    for method in ["GET", "POST"] {
        let (status, text) = send(&app, method, "/v1/health", None, "").await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["healthy"], true);
        assert_eq!(body["date"], "2024-01-15T12:00:00+00:00");
        assert_eq!(body["counts"]["auth"], 2);
        assert_eq!(body["counts"]["machine"], 0);
    }
}

#[tokio::test]
async fn wrong_method_is_405() {
    let app = app().await;
    let (status, _) = send(&app, "GET", "/v1/update_config", None, "").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_path_is_404() {
    let app = app().await;
    let (status, _) = send(&app, "POST", "/v2/update_config", Some("application/json"), "{}").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_json_content_type_is_rejected() {
    let app = app().await;
    let body = agent_auth().to_string();
    for ct in [None, Some("text/plain"), Some("application/x-www-form-urlencoded")] {
        let (status, text) = send(&app, "POST", "/v1/agent_ping_checkin", ct, &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "Bad Content-Type (expected application/json)");
    }
}

#[tokio::test]
async fn malformed_bodies_are_400() {
    let app = app().await;
    for body in ["{not json", "[]", r#"{"machine": {"uuid": "x"}}"#] {
        let (status, _) = send(
            &app,
            "POST",
            "/v1/agent_ping_checkin",
            Some("application/json"),
            body,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    }
}

#[tokio::test]
async fn bad_auth_is_403() {
    let app = app().await;
    let (status, text) = send(
        &app,
        "POST",
        "/v1/agent_ping_checkin",
        Some("application/json; charset=utf-8"),
        &agent_auth().to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(text, "Bad auth");
}

#[tokio::test]
async fn registration_without_storage_is_404() {
    let app = app().await;
    let (status, text) = send(
        &app,
        "POST",
        "/v1/update_config",
        Some("application/json"),
        &update_config().to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(text, "No storages are currently available");
}

#[tokio::test]
async fn validation_errors_name_the_field() {
    let app = app().await;
    post_json(&app, "/v1/storage_update_config", &storage_update_config()).await;

    let mut body = update_config();
    body["machine"]["uuid"] = json!("not-a-uuid");
    let (status, text) = send(
        &app,
        "POST",
        "/v1/update_config",
        Some("application/json"),
        &body.to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(text.starts_with("Validation error: uuid: "), "{text}");
}

#[tokio::test]
async fn backup_cycle() {
    let app = app().await;

    let resp = post_json(&app, "/v1/storage_update_config", &storage_update_config()).await;
    assert_eq!(resp, json!({"machines": {}}));

    let resp = post_json(&app, "/v1/update_config", &update_config()).await;
    assert_eq!(resp["storage_name"], "storage-01");
    assert_eq!(resp["ssh_ping_host_keys"], json!(["ssh-ed25519 AAAAstorage"]));

    let resp = post_json(&app, "/v1/storage_update_config", &storage_update_config()).await;
    assert_eq!(resp["machines"][MACHINE_UUID]["unit_name"], "web/0");

    let resp = post_json(&app, "/v1/agent_ping_checkin", &agent_auth()).await;
    let etc = &resp["machine"]["scheduled_sources"]["etc"];
    assert_eq!(etc["path"], "/etc");
    assert_eq!(etc["exclude"], json!(["*.bak"]));
    assert_eq!(etc["storage"]["name"], "storage-01");
    assert_eq!(resp["scheduled_sources"], resp["machine"]["scheduled_sources"]);

    let storage_auth = json!({"name": "storage-01", "secret": "storage-secret"});
    let resp = post_json(
        &app,
        "/v1/storage_ping_checkin",
        &json!({"storage": storage_auth, "machine": {"uuid": MACHINE_UUID}}),
    )
    .await;
    assert_eq!(resp["machine"]["unit_name"], "web/0");
    assert!(resp["machine"]["scheduled_sources"]["etc"].is_object());

    let resp = post_json(
        &app,
        "/v1/storage_ping_source_update",
        &json!({
            "storage": storage_auth,
            "machine": {
                "uuid": MACHINE_UUID,
                "sources": {
                    "etc": {
                        "success": true,
                        "snapshot": "2024-01-15T12:00:00",
                        "summary": "ok",
                        "time_begin": 1_705_319_000.5,
                        "time_end": 1_705_320_000.25
                    }
                }
            }
        }),
    )
    .await;
    assert_eq!(resp, json!({}));

    let resp = post_json(&app, "/v1/agent_ping_checkin", &agent_auth()).await;
    assert_eq!(resp["scheduled_sources"], json!({}));

    let resp = post_json(&app, "/v1/agent_ping_restore", &agent_auth()).await;
    assert!(resp["machine"]["sources"]["etc"].is_object());

    let (status, text) = send(
        &app,
        "POST",
        "/v1/storage_ping_source_update",
        Some("application/json"),
        &json!({
            "storage": storage_auth,
            "machine": {"uuid": MACHINE_UUID, "sources": {"nope": {"success": true}}}
        })
        .to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(text, "Source not found");

    let (_, text) = send(&app, "GET", "/v1/health", None, "").await;
    let health: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(health["counts"]["backup_log"], 1);
    assert_eq!(health["counts"]["source"], 1);
}
