//! shopsync 的 axum 绑定
//!
//! 路由：
//! - `POST /sync`：同步触发
//! - `GET /sync/status`、`POST /sync/status`：会话状态
//! - `GET /health`
//!
//! 凭证取自 `X-Api-Key`，运行 id 取自 `X-Sync-Run-Id`；
//! [`RouterResponse`] 原样映射为 HTTP 状态码与 JSON 体。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use shopsync::{RequestRouter, RouterResponse, SyncConfig};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const RUN_ID_HEADER: &str = "x-sync-run-id";
pub const DEFAULT_PORT: u16 = 8080;

/// 创建 HTTP 路由
pub fn create_router(router: Arc<RequestRouter>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/sync", post(trigger_sync))
        .route("/sync/status", get(read_status).post(write_status))
        .with_state(router)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn into_http(response: RouterResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body)).into_response()
}

async fn trigger_sync(
    State(router): State<Arc<RequestRouter>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    into_http(
        router
            .handle_sync(header(&headers, API_KEY_HEADER), header(&headers, RUN_ID_HEADER), &body)
            .await,
    )
}

async fn read_status(State(router): State<Arc<RequestRouter>>, headers: HeaderMap) -> Response {
    into_http(
        router
            .handle_status_get(header(&headers, API_KEY_HEADER), header(&headers, RUN_ID_HEADER))
            .await,
    )
}

async fn write_status(
    State(router): State<Arc<RequestRouter>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    into_http(
        router
            .handle_status_post(header(&headers, API_KEY_HEADER), header(&headers, RUN_ID_HEADER), &body)
            .await,
    )
}

/// 服务端配置：同步配置 + 监听端口
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub sync: SyncConfig,
    pub port: u16,
}

/// 读取配置
///
/// `SHOPSYNC_CONFIG` 指向 JSON 配置文件（缺省用默认值），
/// `DATA_DIR`、`PORT`、`SHOPSYNC_API_SECRET` 覆盖对应字段。
pub fn load_config() -> anyhow::Result<ServerConfig> {
    load_config_from(|name| std::env::var(name).ok())
}

pub fn load_config_from<F>(env: F) -> anyhow::Result<ServerConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut sync = match env("SHOPSYNC_CONFIG") {
        Some(path) => {
            let path = PathBuf::from(path);
            info!("读取配置文件: {}", path.display());
            SyncConfig::from_json_file(&path)
                .with_context(|| format!("无法加载配置文件 {}", path.display()))?
        }
        None => SyncConfig::default(),
    };

    if let Some(data_dir) = env("DATA_DIR") {
        sync.data_dir = PathBuf::from(data_dir);
    }
    if let Some(secret) = env("SHOPSYNC_API_SECRET") {
        sync.api_secret = secret;
    }
    let port = match env("PORT") {
        Some(port) => port
            .parse::<u16>()
            .with_context(|| format!("PORT 不是合法端口: {}", port))?,
        None => DEFAULT_PORT,
    };

    sync.validate().context("配置校验失败")?;
    Ok(ServerConfig { sync, port })
}
