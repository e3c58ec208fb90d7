//! 基于 reqwest 的远端平台客户端
//!
//! 端点格式：
//! - `{base}/{entity}/bulk`
//! - `{base}/{parent}/{parent_id}/{entity}/bulk`（地址、商品图片、商品规格）
//! - `{base}/{entity}/{id}`（删除）

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::RemoteConfig;
use crate::error::{Result, SyncError};
use crate::sync::{EntityType, WireRecord};
use crate::version::user_agent;
use super::{InvalidRecord, RemoteClient, RemoteResponse};

const API_KEY_HEADER: &str = "X-Api-Key";
const MAX_ERROR_BODY_CHARS: usize = 512;

/// 远端返回体中的校验错误列表
#[derive(Debug, Default, Deserialize)]
struct BulkResponseBody {
    #[serde(default)]
    errors: Vec<InvalidRecord>,
}

pub struct HttpRemoteClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpRemoteClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(SyncError::Config("remote.base_url 不能为空".to_string()));
        }

        let mut builder = Client::builder().user_agent(user_agent());
        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }
        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let client = builder
            .build()
            .map_err(|e| SyncError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!("✅ 远端平台客户端已创建 (base_url: {})", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub(crate) fn bulk_url(&self, entity_type: EntityType, parent_id: Option<u64>) -> String {
        match (entity_type.parent_scope(), parent_id) {
            (Some(scope), Some(parent_id)) => format!(
                "{}/{}/{}/{}/bulk",
                self.base_url,
                scope.path(),
                parent_id,
                entity_type.as_str()
            ),
            _ => format!("{}/{}/bulk", self.base_url, entity_type.as_str()),
        }
    }

    pub(crate) fn item_url(&self, entity_type: EntityType, parent_id: Option<u64>, id: u64) -> String {
        match (entity_type.parent_scope(), parent_id) {
            (Some(scope), Some(parent_id)) => format!(
                "{}/{}/{}/{}/{}",
                self.base_url,
                scope.path(),
                parent_id,
                entity_type.as_str(),
                id
            ),
            _ => format!("{}/{}/{}", self.base_url, entity_type.as_str(), id),
        }
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        body: Option<&[WireRecord]>,
    ) -> Result<RemoteResponse> {
        debug!("→ {} {}", method, url);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(API_KEY_HEADER, &self.api_key);
        if let Some(records) = body {
            request = request.json(records);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                debug!("读取远端响应体失败: {} {} ({})", method, url, e);
                String::new()
            }
        };

        if !status.is_success() {
            warn!("❌ 远端平台返回 HTTP {}: {} {} ({})", status, method, url, text);
        }
        parse_response(status.as_u16(), &text)
    }
}

/// 解析响应体
///
/// 非 2xx 且没有逐条校验错误时返回 [`SyncError::RemoteStatus`]；
/// 带逐条错误的非 2xx 保留状态码，由调用方整批计为失败并记录明细。
pub(crate) fn parse_response(status_code: u16, body: &str) -> Result<RemoteResponse> {
    let invalid = if body.trim().is_empty() {
        Vec::new()
    } else {
        match serde_json::from_str::<BulkResponseBody>(body) {
            Ok(parsed) => parsed.errors,
            Err(e) => {
                debug!("远端响应体不是预期格式: {}", e);
                Vec::new()
            }
        }
    };
    let response = RemoteResponse {
        status_code: Some(status_code),
        invalid,
    };
    if !response.is_success() && response.invalid.is_empty() {
        return Err(SyncError::RemoteStatus {
            code: status_code,
            message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        });
    }
    Ok(response)
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn bulk_save(
        &self,
        entity_type: EntityType,
        parent_id: Option<u64>,
        records: &[WireRecord],
    ) -> Result<RemoteResponse> {
        self.send(Method::POST, self.bulk_url(entity_type, parent_id), Some(records))
            .await
    }

    async fn bulk_update(
        &self,
        entity_type: EntityType,
        parent_id: Option<u64>,
        records: &[WireRecord],
    ) -> Result<RemoteResponse> {
        self.send(Method::PUT, self.bulk_url(entity_type, parent_id), Some(records))
            .await
    }

    async fn delete(
        &self,
        entity_type: EntityType,
        parent_id: Option<u64>,
        id: u64,
    ) -> Result<RemoteResponse> {
        self.send(Method::DELETE, self.item_url(entity_type, parent_id, id), None)
            .await
    }
}
