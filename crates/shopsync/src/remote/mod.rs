//! 远端平台客户端
//!
//! 引擎只依赖 [`RemoteClient`]；[`HttpRemoteClient`] 是基于 reqwest 的默认实现。

mod http;

pub use http::HttpRemoteClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sync::{EntityType, WireRecord};

/// 远端平台逐条校验失败的记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidRecord {
    /// 在本次批量中的下标
    pub index: usize,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// 批量调用的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status_code: Option<u16>,
    pub invalid: Vec<InvalidRecord>,
}

impl RemoteResponse {
    pub fn ok() -> Self {
        Self {
            status_code: Some(200),
            invalid: Vec::new(),
        }
    }

    pub fn with_invalid(mut self, invalid: Vec<InvalidRecord>) -> Self {
        self.invalid = invalid;
        self
    }

    /// 没有状态码视为成功（部分传输层不回传状态码）
    pub fn is_success(&self) -> bool {
        self.status_code
            .map(|code| (200..300).contains(&code))
            .unwrap_or(true)
    }

    /// 将结果折算为（成功数, 失败数）
    pub fn tally(&self, batch_size: usize) -> (u64, u64) {
        if !self.is_success() {
            return (0, batch_size as u64);
        }
        let failed = self.invalid.len().min(batch_size);
        ((batch_size - failed) as u64, failed as u64)
    }
}

/// 远端平台批量接口
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// 创建或更新（远端自行 upsert）
    async fn bulk_save(
        &self,
        entity_type: EntityType,
        parent_id: Option<u64>,
        records: &[WireRecord],
    ) -> Result<RemoteResponse>;

    async fn bulk_update(
        &self,
        entity_type: EntityType,
        parent_id: Option<u64>,
        records: &[WireRecord],
    ) -> Result<RemoteResponse>;

    async fn delete(
        &self,
        entity_type: EntityType,
        parent_id: Option<u64>,
        id: u64,
    ) -> Result<RemoteResponse>;
}
