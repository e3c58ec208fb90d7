//! 同步状态存储
//!
//! 格式：sync_run:{run_id} → [`SyncRun`]（一个会话一条记录，内含各实体类型的进度）
//!
//! 所有写入都是整条记录的原子读改写（KvStore::update），同一 (run_id, type)
//! 的并发计数累加不会丢失。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::storage::kv::{trees, KvStore};
use super::EntityType;

const PREFIX: &str = "sync_run";

/// 单个实体类型的状态，只能前进：pending → in_progress → completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeStatus {
    Pending,
    InProgress,
    Completed,
}

impl TypeStatus {
    /// 取两者中更靠后的状态
    pub fn advance(self, next: TypeStatus) -> TypeStatus {
        self.max(next)
    }
}

/// 会话整体状态（由远端平台设置，仅作展示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalState {
    InProgress,
    Completed,
}

impl std::str::FromStr for GlobalState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(SyncError::InvalidInput(format!("unknown status {}", other))),
        }
    }
}

/// 单个实体类型在一次会话中的进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeProgress {
    pub status: TypeStatus,
    pub total_objects_count: u64,
    pub sent_successful_count: u64,
    pub sent_failed_count: u64,
    /// 最近处理记录的本地更新时间（水位）
    pub last_object_update: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
}

impl TypeProgress {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: TypeStatus::Pending,
            total_objects_count: 0,
            sent_successful_count: 0,
            sent_failed_count: 0,
            last_object_update: None,
            last_update: now,
        }
    }

    fn apply(&mut self, patch: &TypeProgressPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = self.status.advance(status);
        }
        if let Some(total) = patch.total_objects_count {
            // 一旦 > 0 不再缩小；新算出的 0 不能覆盖之前的非零值
            self.total_objects_count = self.total_objects_count.max(total);
        }
        self.sent_successful_count += patch.add_successful;
        self.sent_failed_count += patch.add_failed;
        if let Some(watermark) = patch.last_object_update {
            self.last_object_update = Some(match self.last_object_update {
                Some(prev) => prev.max(watermark),
                None => watermark,
            });
        }
        self.last_update = now;
    }
}

/// 一次局部更新
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeProgressPatch {
    pub status: Option<TypeStatus>,
    pub total_objects_count: Option<u64>,
    pub add_successful: u64,
    pub add_failed: u64,
    pub last_object_update: Option<DateTime<Utc>>,
}

impl TypeProgressPatch {
    pub fn status(status: TypeStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total_objects_count = Some(total);
        self
    }
}

/// 一次由远端平台发起的同步会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    #[serde(rename = "id")]
    pub run_id: String,
    pub global_state: GlobalState,
    pub current_data_type: Option<EntityType>,
    #[serde(rename = "first_call")]
    pub first_seen_at: DateTime<Utc>,
    #[serde(rename = "statuses")]
    pub per_type_status: BTreeMap<EntityType, TypeProgress>,
}

impl SyncRun {
    fn new(run_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.to_string(),
            global_state: GlobalState::InProgress,
            current_data_type: None,
            first_seen_at: now,
            per_type_status: BTreeMap::new(),
        }
    }
}

/// 会话状态的持久化访问
#[derive(Clone)]
pub struct SyncStatusStore {
    kv: Arc<KvStore>,
}

impl SyncStatusStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn key(run_id: &str) -> String {
        format!("{}:{}", PREFIX, run_id)
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<SyncRun>> {
        self.kv.get(trees::SYNC_RUNS, &Self::key(run_id)).await
    }

    /// 首次访问时创建会话记录
    pub async fn get_or_create(&self, run_id: &str) -> Result<SyncRun> {
        self.kv
            .update(trees::SYNC_RUNS, &Self::key(run_id), |current: Option<SyncRun>| {
                current.unwrap_or_else(|| SyncRun::new(run_id, Utc::now()))
            })
            .await
    }

    /// 原子合并一个实体类型的局部进度，返回合并后的结果
    pub async fn update_type(
        &self,
        run_id: &str,
        entity_type: EntityType,
        patch: TypeProgressPatch,
    ) -> Result<TypeProgress> {
        let run = self
            .kv
            .update(trees::SYNC_RUNS, &Self::key(run_id), |current: Option<SyncRun>| {
                let now = Utc::now();
                let mut run = current.unwrap_or_else(|| SyncRun::new(run_id, now));
                run.current_data_type = Some(entity_type);
                run.per_type_status
                    .entry(entity_type)
                    .or_insert_with(|| TypeProgress::new(now))
                    .apply(&patch, now);
                run
            })
            .await?;

        let progress = run
            .per_type_status
            .get(&entity_type)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("{}/{}", run_id, entity_type)))?;
        debug!(
            "同步状态已更新: run_id={}, type={}, status={:?}, total={}, ok={}, failed={}",
            run_id,
            entity_type,
            progress.status,
            progress.total_objects_count,
            progress.sent_successful_count,
            progress.sent_failed_count
        );
        Ok(progress)
    }

    pub async fn get_type_status(
        &self,
        run_id: &str,
        entity_type: EntityType,
    ) -> Result<Option<TypeProgress>> {
        Ok(self
            .get(run_id)
            .await?
            .and_then(|run| run.per_type_status.get(&entity_type).cloned()))
    }

    /// 一页上传结束后累加计数并推进水位
    pub async fn record_page(
        &self,
        run_id: &str,
        entity_type: EntityType,
        successful: u64,
        failed: u64,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<TypeProgress> {
        self.update_type(
            run_id,
            entity_type,
            TypeProgressPatch {
                add_successful: successful,
                add_failed: failed,
                last_object_update: watermark,
                ..Default::default()
            },
        )
        .await
    }

    /// 只更新会话整体状态
    pub async fn set_global_state(&self, run_id: &str, state: GlobalState) -> Result<SyncRun> {
        self.kv
            .update(trees::SYNC_RUNS, &Self::key(run_id), |current: Option<SyncRun>| {
                let mut run = current.unwrap_or_else(|| SyncRun::new(run_id, Utc::now()));
                run.global_state = state;
                run
            })
            .await
    }
}
