//! 同步任务队列
//!
//! 接受请求的一方只负责入队并立即返回，真正的分页上传在后台 runner 中执行，
//! 与请求生命周期完全解耦。
//!
//! - 入队先持久化（sync_job:{id}），再投递到进程内 channel
//! - worker 终结后 `ack` 删除持久化记录；进程崩溃后 `recover` 重新投递（至少一次）
//! - runner 已停止时任务转入死信（sync_dead_letter:{id}），入队返回错误

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::storage::kv::{trees, KvStore};
use super::run_lock::RunLock;
use super::{EntityType, SyncFilter};

const JOB_PREFIX: &str = "sync_job";
const DEAD_LETTER_PREFIX: &str = "sync_dead_letter";

/// 一次后台同步任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub filter: SyncFilter,
    pub requested_by: Option<String>,
    pub run_id: Option<String>,
    /// 接受请求时统计到的本地记录数（未按语言展开）
    pub expected_native_count: Option<u64>,
    pub enqueued_at: DateTime<Utc>,
}

impl SyncJob {
    pub fn new(
        entity_type: EntityType,
        filter: SyncFilter,
        requested_by: Option<String>,
        run_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type,
            filter,
            requested_by,
            run_id,
            expected_native_count: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_expected_count(mut self, count: u64) -> Self {
        self.expected_native_count = Some(count);
        self
    }
}

/// 无法投递的任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job: SyncJob,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// 任务处理者（BulkSyncWorker 实现）
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// 必须自行完成终结动作（释放锁、写完成状态），不得向上抛错
    async fn handle(&self, job: SyncJob);
}

pub struct JobQueue {
    kv: Arc<KvStore>,
    sender: mpsc::UnboundedSender<SyncJob>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<SyncJob>>>,
    /// 已入队但尚未 ack 的任务数
    in_flight: AtomicUsize,
    idle: Notify,
}

impl JobQueue {
    pub fn new(kv: Arc<KvStore>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            kv,
            sender,
            receiver: Mutex::new(Some(receiver)),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    fn job_key(id: &Uuid) -> String {
        format!("{}:{}", JOB_PREFIX, id)
    }

    fn dead_letter_key(id: &Uuid) -> String {
        format!("{}:{}", DEAD_LETTER_PREFIX, id)
    }

    /// 持久化并投递
    pub async fn enqueue(&self, job: SyncJob) -> Result<()> {
        self.kv
            .set(trees::SYNC_JOBS, &Self::job_key(&job.id), &job)
            .await?;
        debug!("任务已持久化: id={}, type={}", job.id, job.entity_type);
        self.deliver(job).await
    }

    async fn deliver(&self, job: SyncJob) -> Result<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match self.sender.send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(job)) => {
                self.finish_one();
                let reason = "job runner is not running".to_string();
                self.dead_letter(&job, &reason).await?;
                Err(SyncError::QueueClosed(format!("{} ({})", reason, job.id)))
            }
        }
    }

    async fn dead_letter(&self, job: &SyncJob, reason: &str) -> Result<()> {
        error!("任务转入死信: id={}, type={}, reason={}", job.id, job.entity_type, reason);
        let letter = DeadLetter {
            job: job.clone(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };
        self.kv
            .set(trees::DEAD_LETTERS, &Self::dead_letter_key(&job.id), &letter)
            .await?;
        self.kv.delete(trees::SYNC_JOBS, &Self::job_key(&job.id)).await?;
        Ok(())
    }

    /// worker 终结后删除持久化记录
    pub async fn ack(&self, job_id: &Uuid) -> Result<()> {
        self.kv.delete(trees::SYNC_JOBS, &Self::job_key(job_id)).await?;
        Ok(())
    }

    pub async fn pending_jobs(&self) -> Result<Vec<SyncJob>> {
        let entries: Vec<(String, SyncJob)> =
            self.kv.scan_prefix(trees::SYNC_JOBS, JOB_PREFIX).await?;
        let mut jobs: Vec<SyncJob> = entries.into_iter().map(|(_, job)| job).collect();
        jobs.sort_by_key(|job| job.enqueued_at);
        Ok(jobs)
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let entries: Vec<(String, DeadLetter)> = self
            .kv
            .scan_prefix(trees::DEAD_LETTERS, DEAD_LETTER_PREFIX)
            .await?;
        Ok(entries.into_iter().map(|(_, letter)| letter).collect())
    }

    /// 重新投递上一个进程遗留的任务，返回实际投递数
    ///
    /// 投递前以任务 id 重新获取运行锁：锁仍属于该任务、已空闲或已过期时续期后投递；
    /// 已被其他任务持有时转入死信。
    pub async fn recover(&self, lock: &RunLock) -> Result<usize> {
        let mut delivered = 0;
        for job in self.pending_jobs().await? {
            if !lock.try_acquire(job.entity_type, job.id).await? {
                warn!("遗留任务的运行锁已被其他任务持有: id={}, type={}", job.id, job.entity_type);
                self.dead_letter(&job, "run lock is held by another job").await?;
                continue;
            }
            info!("♻️ 恢复遗留任务: id={}, type={}", job.id, job.entity_type);
            self.deliver(job).await?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// 启动后台 runner：每个任务一个 tokio 任务，不同实体类型互不阻塞
    pub fn start<H: JobHandler>(
        self: &Arc<Self>,
        handler: Arc<H>,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| SyncError::Other("job runner already started".to_string()))?;
        let queue = Arc::clone(self);

        Ok(tokio::spawn(async move {
            info!("🚀 同步任务 runner 已启动");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("同步任务 runner 收到停止信号");
                        break;
                    }
                    next = receiver.recv() => {
                        let Some(job) = next else { break };
                        let queue = Arc::clone(&queue);
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            let job_id = job.id;
                            handler.handle(job).await;
                            if let Err(e) = queue.ack(&job_id).await {
                                warn!("任务 ack 失败: id={}, error={}", job_id, e);
                            }
                            queue.finish_one();
                        });
                    }
                }
            }
            // receiver 在此 drop，之后的入队会转入死信
        }))
    }

    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 等待所有已入队任务执行完毕
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Recorder {
        seen: Mutex<Vec<EntityType>>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: SyncJob) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.seen.lock().push(job.entity_type);
        }
    }

    fn job(entity_type: EntityType) -> SyncJob {
        SyncJob::new(entity_type, SyncFilter::all(), None, Some("r1".to_string()))
    }

    #[tokio::test]
    async fn jobs_are_handled_and_acked() {
        let queue = Arc::new(JobQueue::new(Arc::new(KvStore::temporary().unwrap())));
        let handler = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        let token = CancellationToken::new();
        queue.start(handler.clone(), token.clone()).unwrap();

        queue.enqueue(job(EntityType::Orders)).await.unwrap();
        queue.enqueue(job(EntityType::Products)).await.unwrap();
        queue.wait_idle().await;

        let mut seen = handler.seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![EntityType::Orders, EntityType::Products]);
        assert!(queue.pending_jobs().await.unwrap().is_empty());
        token.cancel();
    }

    async fn orphaned(kv: &Arc<KvStore>, entity_type: EntityType) -> SyncJob {
        // 上一个进程入队后崩溃：只有持久化记录
        let orphan = job(entity_type);
        kv.set(trees::SYNC_JOBS, &JobQueue::job_key(&orphan.id), &orphan)
            .await
            .unwrap();
        orphan
    }

    #[tokio::test]
    async fn persisted_jobs_are_recovered() {
        let kv = Arc::new(KvStore::temporary().unwrap());
        let orphan = orphaned(&kv, EntityType::Vouchers).await;
        let lock = RunLock::new(kv.clone(), None);

        let queue = Arc::new(JobQueue::new(kv));
        let handler = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        queue.start(handler.clone(), CancellationToken::new()).unwrap();

        assert_eq!(queue.recover(&lock).await.unwrap(), 1);
        // 恢复的任务重新持有自己的锁
        assert_eq!(lock.holder(EntityType::Vouchers).await.unwrap(), Some(orphan.id));
        queue.wait_idle().await;
        assert_eq!(*handler.seen.lock(), vec![EntityType::Vouchers]);
        assert!(queue.pending_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recovered_job_whose_lock_belongs_to_another_job_is_dead_lettered() {
        let kv = Arc::new(KvStore::temporary().unwrap());
        let orphan = orphaned(&kv, EntityType::Orders).await;
        let lock = RunLock::new(kv.clone(), None);
        let other = Uuid::new_v4();
        assert!(lock.try_acquire(EntityType::Orders, other).await.unwrap());

        let queue = Arc::new(JobQueue::new(kv));
        let handler = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        queue.start(handler.clone(), CancellationToken::new()).unwrap();

        assert_eq!(queue.recover(&lock).await.unwrap(), 0);
        queue.wait_idle().await;
        assert!(handler.seen.lock().is_empty());
        assert!(queue.pending_jobs().await.unwrap().is_empty());
        let letters = queue.dead_letters().await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].job.id, orphan.id);
        assert_eq!(lock.holder(EntityType::Orders).await.unwrap(), Some(other));
    }

    #[tokio::test]
    async fn stopped_runner_dead_letters_new_jobs() {
        let queue = Arc::new(JobQueue::new(Arc::new(KvStore::temporary().unwrap())));
        let handler = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        let token = CancellationToken::new();
        let runner = queue.start(handler, token.clone()).unwrap();
        token.cancel();
        runner.await.unwrap();

        let result = queue.enqueue(job(EntityType::Orders)).await;
        assert!(matches!(result, Err(SyncError::QueueClosed(_))));
        assert_eq!(queue.in_flight(), 0);
        assert!(queue.pending_jobs().await.unwrap().is_empty());
        let letters = queue.dead_letters().await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].job.entity_type, EntityType::Orders);
    }

    #[tokio::test]
    async fn runner_can_only_start_once() {
        let queue = Arc::new(JobQueue::new(Arc::new(KvStore::temporary().unwrap())));
        let handler = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        queue.start(handler.clone(), CancellationToken::new()).unwrap();
        assert!(queue.start(handler, CancellationToken::new()).is_err());
    }
}
