//! REST API integration tests.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;
use common::test_app;

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(method)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let app = test_app();

    let response = app.router.oneshot(get_request("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn create_session_returns_created_session() {
    let app = test_app();
    let work_dir = app.work_dir.path().to_str().unwrap().to_string();

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/sessions",
            json!({"workDir": work_dir, "label": "demo"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let session = body_json(response).await;
    assert_eq!(session["state"], "active");
    assert_eq!(session["workDir"], work_dir.as_str());
    assert_eq!(session["label"], "demo");
    let id = session["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    // The session is listed and fetchable.
    let list = body_json(
        app.router
            .clone()
            .oneshot(get_request("/api/sessions"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let fetched = body_json(
        app.router
            .clone()
            .oneshot(get_request(&format!("/api/sessions/{id}")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(fetched["id"], id.as_str());

    // Clean up the subprocess.
    let deleted = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/sessions/{id}"))
                .method(Method::DELETE)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);
    assert_eq!(body_json(deleted).await["status"], "terminated");
}

#[tokio::test]
async fn create_requires_work_dir() {
    let app = test_app();

    let response = app
        .router
        .oneshot(json_request(Method::POST, "/api/sessions", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn create_rejects_missing_directory() {
    let app = test_app();

    let response = app
        .router
        .oneshot(json_request(
            Method::POST,
            "/api/sessions",
            json!({"workDir": "/nonexistent/path/xyz"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let app = test_app();

    let get = app
        .router
        .clone()
        .oneshot(get_request("/api/sessions/nope"))
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(get).await["code"], "NOT_FOUND");

    let prompt = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/sessions/nope/prompt",
            json!({"prompt": "hello"}),
        ))
        .await
        .unwrap();
    assert_eq!(prompt.status(), StatusCode::NOT_FOUND);

    let delete = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/sessions/nope")
                .method(Method::DELETE)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn prompt_requires_text() {
    let app = test_app();
    let work_dir = app.work_dir.path().to_str().unwrap().to_string();

    let created = body_json(
        app.router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/sessions",
                json!({"workDir": work_dir}),
            ))
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let empty = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/sessions/{id}/prompt"),
            json!({"prompt": ""}),
        ))
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let ok = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/sessions/{id}/prompt"),
            json!({"prompt": "hello"}),
        ))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(body_json(ok).await["status"], "sent");

    let _ = app
        .router
        .oneshot(
            Request::builder()
                .uri(format!("/api/sessions/{id}"))
                .method(Method::DELETE)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn saturation_maps_to_conflict() {
    let app = test_app();
    let work_dir = app.work_dir.path().to_str().unwrap().to_string();

    // Fill the pool (test config allows 4 concurrent sessions).
    let mut ids = Vec::new();
    for _ in 0..4 {
        let created = app
            .router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/sessions",
                json!({"workDir": work_dir}),
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        ids.push(body_json(created).await["id"].as_str().unwrap().to_string());
    }

    let overflow = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/sessions",
            json!({"workDir": work_dir}),
        ))
        .await
        .unwrap();
    assert_eq!(overflow.status(), StatusCode::CONFLICT);

    for id in ids {
        let _ = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{id}"))
                    .method(Method::DELETE)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
    }
}
