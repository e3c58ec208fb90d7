//! 后台批量上传 worker
//!
//! 一个任务处理一种实体类型：按页读取本地记录 → 格式化 → 按父实体分组批量上传 →
//! 累加同步状态，直到取到不满一页的结果或达到接受请求时统计的记录数。
//!
//! 无论循环以何种方式结束（正常、本地查询失败、panic），都会执行终结动作：
//! 写入 completed 状态并释放该类型的运行锁。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::remote::RemoteClient;
use super::adapter::{AdapterRegistry, EntityAdapter, NativeEntity, ShopContext, WireRecord};
use super::error_log::{SyncErrorLog, SyncErrorRecord};
use super::job_queue::{JobHandler, SyncJob};
use super::run_lock::RunLock;
use super::status_store::{SyncStatusStore, TypeProgressPatch, TypeStatus};
use super::EntityType;

/// worker 运行参数
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub page_size: u64,
    pub reader_timeout: Duration,
    pub remote_timeout: Duration,
    pub record_errors: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            page_size: 20,
            reader_timeout: Duration::from_secs(60),
            remote_timeout: Duration::from_secs(120),
            record_errors: true,
        }
    }
}

/// 一次任务的执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub pages: u64,
    pub fetched: u64,
    pub sent_successful: u64,
    pub sent_failed: u64,
    /// 导致循环提前结束的错误
    pub error: Option<String>,
}

/// 多语言实体每页条数按语言数缩小，保证每页展开后的记录数不超过 page_size
pub fn effective_page_size(entity_type: EntityType, page_size: u64, locale_count: usize) -> u64 {
    if entity_type.is_translatable() {
        (page_size / locale_count.max(1) as u64).max(1)
    } else {
        page_size.max(1)
    }
}

/// 按父实体分组，保持首次出现顺序
fn group_by_parent(
    entity_type: EntityType,
    records: Vec<(Option<u64>, WireRecord)>,
) -> Vec<(Option<u64>, Vec<WireRecord>)> {
    if entity_type.parent_scope().is_none() {
        let batch: Vec<WireRecord> = records.into_iter().map(|(_, record)| record).collect();
        return if batch.is_empty() { Vec::new() } else { vec![(None, batch)] };
    }

    let mut groups: Vec<(Option<u64>, Vec<WireRecord>)> = Vec::new();
    for (parent_id, record) in records {
        match groups.iter_mut().find(|(p, _)| *p == parent_id) {
            Some((_, batch)) => batch.push(record),
            None => groups.push((parent_id, vec![record])),
        }
    }
    groups
}

pub struct BulkSyncWorker {
    registry: Arc<AdapterRegistry>,
    shop: Arc<dyn ShopContext>,
    remote: Arc<dyn RemoteClient>,
    lock: RunLock,
    status: SyncStatusStore,
    errors: SyncErrorLog,
    settings: WorkerSettings,
}

impl BulkSyncWorker {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        shop: Arc<dyn ShopContext>,
        remote: Arc<dyn RemoteClient>,
        lock: RunLock,
        status: SyncStatusStore,
        errors: SyncErrorLog,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            registry,
            shop,
            remote,
            lock,
            status,
            errors,
            settings,
        }
    }

    /// 执行一个任务，终结动作总会执行
    pub async fn run(&self, job: &SyncJob) -> WorkerReport {
        let mut report = WorkerReport::default();
        info!(
            "🔄 开始批量同步: type={}, run_id={:?}, requested_by={:?}",
            job.entity_type, job.run_id, job.requested_by
        );

        let outcome = AssertUnwindSafe(self.run_pages(job, &mut report))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("批量同步中止: type={}, error={}", job.entity_type, e);
                report.error = Some(e.to_string());
            }
            Err(_) => {
                error!("批量同步 panic: type={}", job.entity_type);
                report.error = Some("worker panicked".to_string());
            }
        }

        self.finalize(job).await;
        info!(
            "✅ 批量同步结束: type={}, pages={}, fetched={}, ok={}, failed={}",
            job.entity_type, report.pages, report.fetched, report.sent_successful, report.sent_failed
        );
        report
    }

    async fn finalize(&self, job: &SyncJob) {
        if let Some(run_id) = &job.run_id {
            if let Err(e) = self
                .status
                .update_type(run_id, job.entity_type, TypeProgressPatch::status(TypeStatus::Completed))
                .await
            {
                error!("写入完成状态失败: type={}, error={}", job.entity_type, e);
            }
        }
        match self.lock.release(job.entity_type, job.id).await {
            Ok(true) => {}
            Ok(false) => debug!("运行锁不属于本任务，未释放: type={}, job={}", job.entity_type, job.id),
            Err(e) => error!("释放运行锁失败: type={}, error={}", job.entity_type, e),
        }
    }

    async fn run_pages(&self, job: &SyncJob, report: &mut WorkerReport) -> Result<()> {
        let adapter = self.registry.get(job.entity_type)?.clone();
        let locales = if job.entity_type.is_translatable() {
            self.shop.active_locales().await?
        } else {
            Vec::new()
        };
        if job.entity_type.is_translatable() && locales.is_empty() {
            warn!("没有活跃语言，跳过多语言实体: type={}", job.entity_type);
            return Ok(());
        }

        let page_size = effective_page_size(job.entity_type, self.settings.page_size, locales.len());
        let mut offset = 0u64;
        loop {
            let page = tokio::time::timeout(
                self.settings.reader_timeout,
                adapter.reader.page(&job.filter, offset, page_size),
            )
            .await
            .map_err(|_| SyncError::Timeout(format!("读取 {} 第 {} 条起的分页超时", job.entity_type, offset)))??;

            report.pages += 1;
            report.fetched += page.len() as u64;
            let short_page = (page.len() as u64) < page_size;
            debug!(
                "读取分页: type={}, offset={}, size={}",
                job.entity_type,
                offset,
                page.len()
            );

            if !page.is_empty() {
                let (ok, failed) = self.upload_page(job, &adapter, &locales, &page).await?;
                report.sent_successful += ok;
                report.sent_failed += failed;
            }

            let reached_expected = job
                .expected_native_count
                .map(|expected| report.fetched >= expected)
                .unwrap_or(false);
            if short_page || reached_expected {
                return Ok(());
            }
            offset += page_size;
        }
    }

    /// 上传一页，返回（成功数, 失败数）；远端失败不会中止循环
    async fn upload_page(
        &self,
        job: &SyncJob,
        adapter: &EntityAdapter,
        locales: &[String],
        page: &[NativeEntity],
    ) -> Result<(u64, u64)> {
        let mut successful = 0u64;
        let mut failed = 0u64;

        let mut records = Vec::with_capacity(page.len() * locales.len().max(1));
        for entity in page {
            if job.entity_type.is_translatable() {
                for locale in locales {
                    match adapter.formatter.format(entity, Some(locale)) {
                        Ok(record) => records.push((entity.parent_id, record)),
                        Err(e) => {
                            warn!("格式化失败: type={}, id={}, locale={}, error={}", job.entity_type, entity.id, locale, e);
                            failed += 1;
                        }
                    }
                }
            } else {
                match adapter.formatter.format(entity, None) {
                    Ok(record) => records.push((entity.parent_id, record)),
                    Err(e) => {
                        warn!("格式化失败: type={}, id={}, error={}", job.entity_type, entity.id, e);
                        failed += 1;
                    }
                }
            }
        }

        for (parent_id, batch) in group_by_parent(job.entity_type, records) {
            let (ok, bad) = self.send_batch(job, parent_id, &batch).await;
            successful += ok;
            failed += bad;
        }

        if let Some(run_id) = &job.run_id {
            let watermark = page.iter().map(|entity| entity.updated_at).max();
            self.status
                .record_page(run_id, job.entity_type, successful, failed, watermark)
                .await?;
        }
        Ok((successful, failed))
    }

    async fn send_batch(&self, job: &SyncJob, parent_id: Option<u64>, batch: &[WireRecord]) -> (u64, u64) {
        let call = self.remote.bulk_save(job.entity_type, parent_id, batch);
        let response = match tokio::time::timeout(self.settings.remote_timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("批量上传失败: type={}, parent={:?}, size={}, error={}", job.entity_type, parent_id, batch.len(), e);
                return (0, batch.len() as u64);
            }
            Err(_) => {
                warn!("批量上传超时: type={}, parent={:?}, size={}", job.entity_type, parent_id, batch.len());
                return (0, batch.len() as u64);
            }
        };

        if !response.is_success() {
            warn!(
                "远端拒绝批量上传: type={}, status={:?}, size={}",
                job.entity_type,
                response.status_code,
                batch.len()
            );
        }

        if let (Some(run_id), true) = (&job.run_id, self.settings.record_errors) {
            for invalid in &response.invalid {
                let record = SyncErrorRecord {
                    run_id: run_id.clone(),
                    object_type: job.entity_type,
                    error_code: invalid.code.clone(),
                    error_message: invalid.message.clone(),
                    offending_payload: batch.get(invalid.index).cloned().unwrap_or_default(),
                    timestamp: Utc::now(),
                };
                if let Err(e) = self.errors.record(&record).await {
                    warn!("记录失败明细出错: type={}, error={}", job.entity_type, e);
                }
            }
        }

        response.tally(batch.len())
    }
}

#[async_trait]
impl JobHandler for BulkSyncWorker {
    async fn handle(&self, job: SyncJob) {
        self.run(&job).await;
    }
}
