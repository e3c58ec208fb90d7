//! 批量上传失败记录
//!
//! 格式：sync_error:{run_id}:{seq:020} → [`SyncErrorRecord`]，seq 单调递增，前缀扫描即按写入顺序。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::storage::kv::{trees, KvStore};
use super::EntityType;

const PREFIX: &str = "sync_error";

/// 远端平台拒收的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    pub run_id: String,
    pub object_type: EntityType,
    pub error_code: Option<String>,
    pub error_message: String,
    pub offending_payload: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SyncErrorLog {
    kv: Arc<KvStore>,
}

impl SyncErrorLog {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn run_prefix(run_id: &str) -> String {
        format!("{}:{}:", PREFIX, run_id)
    }

    pub async fn record(&self, record: &SyncErrorRecord) -> Result<()> {
        let seq = self.kv.generate_id()?;
        let key = format!("{}{:020}", Self::run_prefix(&record.run_id), seq);
        self.kv.set(trees::SYNC_ERRORS, &key, record).await
    }

    pub async fn list(&self, run_id: &str) -> Result<Vec<SyncErrorRecord>> {
        let entries: Vec<(String, SyncErrorRecord)> = self
            .kv
            .scan_prefix(trees::SYNC_ERRORS, &Self::run_prefix(run_id))
            .await?;
        Ok(entries.into_iter().map(|(_, record)| record).collect())
    }

    pub async fn list_for_type(
        &self,
        run_id: &str,
        entity_type: EntityType,
    ) -> Result<Vec<SyncErrorRecord>> {
        Ok(self
            .list(run_id)
            .await?
            .into_iter()
            .filter(|r| r.object_type == entity_type)
            .collect())
    }

    /// 导出一个会话的全部失败记录（JSON 数组）
    pub async fn export_json(&self, run_id: &str) -> Result<String> {
        let records = self.list(run_id).await?;
        Ok(serde_json::to_string_pretty(&records)?)
    }

    /// 删除一个会话的失败记录，返回删除条数
    pub async fn clear(&self, run_id: &str) -> Result<usize> {
        let entries: Vec<(String, Value)> = self
            .kv
            .scan_prefix(trees::SYNC_ERRORS, &Self::run_prefix(run_id))
            .await?;
        for (key, _) in &entries {
            self.kv.delete(trees::SYNC_ERRORS, key).await?;
        }
        Ok(entries.len())
    }
}
