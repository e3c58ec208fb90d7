//! HTTP 绑定测试（tower oneshot，不监听端口）

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use shopsync::auth::api_key_for;
use shopsync::sync::JsonRecordFormatter;
use shopsync::{
    AdapterRegistry, EntityAdapter, EntityType, KvStore, NativeEntity, RemoteClient,
    RemoteResponse, RequestRouter, SqliteCatalog, StaticShopContext, SyncConfig, SyncService,
    WireRecord,
};
use shopsync_server::create_router;

const SECRET: &str = "http-secret";

struct AcceptAll;

#[async_trait]
impl RemoteClient for AcceptAll {
    async fn bulk_save(&self, _: EntityType, _: Option<u64>, _: &[WireRecord]) -> shopsync::Result<RemoteResponse> {
        Ok(RemoteResponse::ok())
    }

    async fn bulk_update(&self, _: EntityType, _: Option<u64>, _: &[WireRecord]) -> shopsync::Result<RemoteResponse> {
        Ok(RemoteResponse::ok())
    }

    async fn delete(&self, _: EntityType, _: Option<u64>, _: u64) -> shopsync::Result<RemoteResponse> {
        Ok(RemoteResponse::ok())
    }
}

async fn app() -> (Router, Arc<SyncService>) {
    let catalog = SqliteCatalog::open_in_memory().unwrap();
    for id in 1..=3 {
        catalog
            .upsert(EntityType::Orders, &NativeEntity::new(id, Utc::now()))
            .unwrap();
    }

    let mut registry = AdapterRegistry::new();
    for entity_type in EntityType::ALL {
        registry.register(
            entity_type,
            EntityAdapter::new(
                Arc::new(catalog.reader(entity_type)),
                Arc::new(JsonRecordFormatter::default()),
            ),
        );
    }
    let config = SyncConfig::builder().api_secret(SECRET).build().unwrap();
    let service = Arc::new(
        SyncService::new(
            config,
            Arc::new(KvStore::temporary().unwrap()),
            registry,
            Arc::new(StaticShopContext::new(vec!["en".to_string()], false)),
            Arc::new(AcceptAll),
        )
        .unwrap(),
    );
    service.start().await.unwrap();
    (create_router(Arc::new(RequestRouter::new(service.clone()))), service)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };
    (status, body)
}

fn sync_request(key: &str, run_id: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/sync")
        .header("X-Api-Key", key)
        .header("X-Sync-Run-Id", run_id)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_check() {
    let (app, _) = app().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
}

#[tokio::test]
async fn trigger_then_poll_status() {
    let (app, service) = app().await;
    let key = api_key_for(SECRET);

    let (status, body) = send(
        &app,
        sync_request(&key, "run-1", json!({"data": {"type": "orders"}, "hmac": "sig"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "count": 3}));

    service.wait_idle().await;

    let request = Request::builder()
        .uri("/sync/status")
        .header("X-Api-Key", &key)
        .header("X-Sync-Run-Id", "run-1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["statuses"]["orders"]["status"], json!("completed"));
    assert_eq!(body["statuses"]["orders"]["sent_successful_count"], json!(3));

    let request = Request::builder()
        .method("POST")
        .uri("/sync/status")
        .header("X-Api-Key", &key)
        .header("X-Sync-Run-Id", "run-1")
        .body(Body::from(r#"{"status": "completed"}"#))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn bad_credentials_and_payloads_map_to_http_codes() {
    let (app, _) = app().await;

    let (status, _) = send(&app, sync_request("nope", "run-1", json!({"data": {"type": "orders"}}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        sync_request(&api_key_for(SECRET), "run-1", json!({"data": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"success": false, "message": "type is required. "}));

    let request = Request::builder()
        .uri("/sync/status")
        .header("X-Api-Key", api_key_for(SECRET))
        .header("X-Sync-Run-Id", "never-seen")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
