//! 同步服务装配
//!
//! 按层构建 KV 存储、运行锁、状态存储、任务队列、worker 与受理入口，
//! 所有组件通过构造函数注入依赖，没有全局状态。

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::remote::{HttpRemoteClient, RemoteClient};
use crate::storage::{KvStore, SqliteCatalog};
use crate::sync::{
    AcceptOutcome, AcceptRequest, AdapterRegistry, BulkSyncWorker, EntityAdapter, EntityType,
    JobQueue, JsonRecordFormatter, PushForwarder, RecordFormatter, RunLock, ShopContext,
    StaticShopContext, SyncErrorLog, SyncOrchestrator, SyncStatusStore, WorkerSettings,
};

pub struct SyncService {
    config: SyncConfig,
    kv: Arc<KvStore>,
    registry: Arc<AdapterRegistry>,
    shop: Arc<dyn ShopContext>,
    remote: Arc<dyn RemoteClient>,
    lock: RunLock,
    status: SyncStatusStore,
    errors: SyncErrorLog,
    queue: Arc<JobQueue>,
    worker: Arc<BulkSyncWorker>,
    orchestrator: SyncOrchestrator,
    shutdown: CancellationToken,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    /// 使用注入的协作者装配服务
    pub fn new(
        config: SyncConfig,
        kv: Arc<KvStore>,
        registry: AdapterRegistry,
        shop: Arc<dyn ShopContext>,
        remote: Arc<dyn RemoteClient>,
    ) -> Result<Self> {
        config.validate()?;

        // === 第1层：共享状态 ===
        let registry = Arc::new(registry);
        let lock = RunLock::new(kv.clone(), config.lock_ttl());
        let status = SyncStatusStore::new(kv.clone());
        let errors = SyncErrorLog::new(kv.clone());

        // === 第2层：任务队列与 worker ===
        let queue = Arc::new(JobQueue::new(kv.clone()));
        let worker = Arc::new(BulkSyncWorker::new(
            registry.clone(),
            shop.clone(),
            remote.clone(),
            lock.clone(),
            status.clone(),
            errors.clone(),
            WorkerSettings {
                page_size: config.page_size,
                reader_timeout: config.reader_timeout(),
                remote_timeout: config.remote_timeout(),
                record_errors: config.record_errors,
            },
        ));

        // === 第3层：受理入口 ===
        let orchestrator = SyncOrchestrator::new(
            registry.clone(),
            shop.clone(),
            lock.clone(),
            status.clone(),
            queue.clone(),
            config.reader_timeout(),
        );
        info!("同步服务装配完成: {} 个实体适配器", registry.len());

        Ok(Self {
            config,
            kv,
            registry,
            shop,
            remote,
            lock,
            status,
            errors,
            queue,
            worker,
            orchestrator,
            shutdown: CancellationToken::new(),
            runner: Mutex::new(None),
        })
    }

    /// 使用默认实现装配：SQLite 商城目录 + JSON 格式化 + HTTP 远端 + 配置中的商城上下文
    pub async fn open(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let catalog_path = config
            .catalog_db
            .clone()
            .ok_or_else(|| SyncError::Config("catalog_db 未配置".to_string()))?;
        let catalog = SqliteCatalog::open(&catalog_path)?;
        let kv = Arc::new(KvStore::open(&config.data_dir).await?);

        let formatter: Arc<dyn RecordFormatter> =
            Arc::new(JsonRecordFormatter::new(config.money_fields.clone()));
        let mut registry = AdapterRegistry::new();
        for entity_type in EntityType::ALL {
            registry.register(
                entity_type,
                EntityAdapter::new(Arc::new(catalog.reader(entity_type)), formatter.clone()),
            );
        }

        let shop: Arc<dyn ShopContext> = Arc::new(StaticShopContext::new(
            config.active_locales.clone(),
            config.segmentation_enabled,
        ));
        let remote: Arc<dyn RemoteClient> = Arc::new(HttpRemoteClient::new(&config.remote)?);

        Self::new(config, kv, registry, shop, remote)
    }

    /// 启动后台 runner 并恢复上次遗留的任务，返回恢复的任务数
    pub async fn start(&self) -> Result<usize> {
        let handle = self.queue.start(self.worker.clone(), self.shutdown.clone())?;
        *self.runner.lock() = Some(handle);
        let recovered = self.queue.recover(&self.lock).await?;
        if recovered > 0 {
            info!("已恢复 {} 个遗留同步任务", recovered);
        }
        Ok(recovered)
    }

    /// 受理一次同步请求
    pub async fn accept(&self, entity_type: EntityType, request: AcceptRequest) -> Result<AcceptOutcome> {
        self.orchestrator.accept(entity_type, request).await
    }

    /// 等待所有已入队任务结束
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await
    }

    /// 停止 runner 并刷盘；正在执行的任务会继续执行到终结
    pub async fn shutdown(&self) -> Result<()> {
        info!("正在关闭同步服务...");
        self.shutdown.cancel();
        let runner = self.runner.lock().take();
        if let Some(runner) = runner {
            runner
                .await
                .map_err(|e| SyncError::Other(format!("runner 退出异常: {}", e)))?;
        }
        self.kv.flush().await?;
        info!("同步服务已关闭");
        Ok(())
    }

    pub fn push_forwarder(&self) -> PushForwarder {
        PushForwarder::new(
            self.registry.clone(),
            self.shop.clone(),
            self.remote.clone(),
            self.config.remote_timeout(),
        )
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn shop(&self) -> &Arc<dyn ShopContext> {
        &self.shop
    }

    pub fn status_store(&self) -> &SyncStatusStore {
        &self.status
    }

    pub fn run_lock(&self) -> &RunLock {
        &self.lock
    }

    pub fn error_log(&self) -> &SyncErrorLog {
        &self.errors
    }

    pub fn job_queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn supports(&self, entity_type: EntityType) -> bool {
        self.registry.contains(entity_type)
    }
}
