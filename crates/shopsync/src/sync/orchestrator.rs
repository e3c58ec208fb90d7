//! 同步请求受理
//!
//! 计算总数 → 写入 in_progress 状态 → 抢占运行锁 → 入队后台任务，然后立即返回。
//! 真正的上传由 [`BulkSyncWorker`](super::worker::BulkSyncWorker) 在后台完成。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use super::adapter::{locale_factor, AdapterRegistry, ShopContext, SyncFilter};
use super::job_queue::{JobQueue, SyncJob};
use super::run_lock::RunLock;
use super::status_store::{SyncStatusStore, TypeProgressPatch, TypeStatus};
use super::EntityType;

pub const ALREADY_RUNNING_MESSAGE: &str = "A previous process is still running.";
pub const SCHEDULE_FAILED_MESSAGE: &str = "Unable to schedule the synchronization.";

/// 一次同步请求
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptRequest {
    pub last_update: Option<DateTime<Utc>>,
    pub ids: Option<Vec<u64>>,
    pub requested_by: Option<String>,
    pub run_id: Option<String>,
}

/// 受理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptOutcome {
    pub accepted: bool,
    /// 按语言展开后的记录总数
    pub count: u64,
    pub message: Option<String>,
}

impl AcceptOutcome {
    fn accepted(count: u64) -> Self {
        Self {
            accepted: true,
            count,
            message: None,
        }
    }

    fn rejected(count: u64, message: &str) -> Self {
        Self {
            accepted: false,
            count,
            message: Some(message.to_string()),
        }
    }
}

/// 解析请求中的 ids 参数
///
/// null / false / 0 / "" / "0" / [] 视为未指定；单个 id 视为一元列表。
pub fn normalize_ids(value: &Value) -> Result<Option<Vec<u64>>> {
    let ids = match value {
        Value::Null | Value::Bool(false) => return Ok(None),
        Value::Array(items) => items.iter().map(parse_id).collect::<Result<Vec<u64>>>()?,
        Value::String(s) if s.trim().is_empty() || s.trim() == "0" => return Ok(None),
        Value::Number(n) if n.as_u64() == Some(0) => return Ok(None),
        scalar => vec![parse_id(scalar)?],
    };
    Ok(if ids.is_empty() { None } else { Some(ids) })
}

fn parse_id(value: &Value) -> Result<u64> {
    let id = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    id.ok_or_else(|| SyncError::InvalidInput(format!("invalid id {}", value)))
}

pub struct SyncOrchestrator {
    registry: Arc<AdapterRegistry>,
    shop: Arc<dyn ShopContext>,
    lock: RunLock,
    status: SyncStatusStore,
    queue: Arc<JobQueue>,
    reader_timeout: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        shop: Arc<dyn ShopContext>,
        lock: RunLock,
        status: SyncStatusStore,
        queue: Arc<JobQueue>,
        reader_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            shop,
            lock,
            status,
            queue,
            reader_timeout,
        }
    }

    /// 受理一次同步请求
    pub async fn accept(&self, entity_type: EntityType, request: AcceptRequest) -> Result<AcceptOutcome> {
        let adapter = self.registry.get(entity_type)?;
        let filter = SyncFilter::new(request.ids.filter(|ids| !ids.is_empty()), request.last_update);

        let native_count = tokio::time::timeout(self.reader_timeout, adapter.reader.count(&filter))
            .await
            .map_err(|_| SyncError::Timeout(format!("统计 {} 记录数超时", entity_type)))??;
        let locales = if entity_type.is_translatable() {
            self.shop.active_locales().await?
        } else {
            Vec::new()
        };
        let count = native_count * locale_factor(entity_type, &locales);

        if let Some(run_id) = &request.run_id {
            self.status
                .update_type(
                    run_id,
                    entity_type,
                    TypeProgressPatch::status(TypeStatus::InProgress).with_total(count),
                )
                .await?;
        }

        if count == 0 {
            if let Some(run_id) = &request.run_id {
                self.status
                    .update_type(run_id, entity_type, TypeProgressPatch::status(TypeStatus::Completed))
                    .await?;
            }
            info!("没有需要同步的记录: type={}", entity_type);
            return Ok(AcceptOutcome::accepted(0));
        }

        // 锁的持有者就是任务 id，worker 终结时凭它释放
        let job = SyncJob::new(entity_type, filter, request.requested_by, request.run_id.clone())
            .with_expected_count(native_count);
        let job_id = job.id;
        if !self.lock.try_acquire(entity_type, job_id).await? {
            info!("同类型同步仍在进行，拒绝本次请求: type={}", entity_type);
            return Ok(AcceptOutcome::rejected(count, ALREADY_RUNNING_MESSAGE));
        }

        if let Err(e) = self.queue.enqueue(job).await {
            warn!("入队失败，回滚运行锁: type={}, error={}", entity_type, e);
            self.lock.release(entity_type, job_id).await?;
            if let Some(run_id) = &request.run_id {
                self.status
                    .update_type(run_id, entity_type, TypeProgressPatch::status(TypeStatus::Completed))
                    .await?;
            }
            return Ok(AcceptOutcome::rejected(count, SCHEDULE_FAILED_MESSAGE));
        }

        info!("📥 同步任务已入队: type={}, count={}, job={}", entity_type, count, job_id);
        Ok(AcceptOutcome::accepted(count))
    }
}
