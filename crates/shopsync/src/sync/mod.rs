//! 拉取式批量同步
//!
//! - `entity_type`：固定的实体类型集合
//! - `adapter`：读取 / 格式化 / 商城上下文的 trait 与注册表
//! - `run_lock` / `status_store` / `error_log`：持久化在 KV 中的共享状态
//! - `job_queue` / `worker`：后台任务与分页上传
//! - `orchestrator`：请求受理
//! - `push`：实时推送

pub mod adapter;
pub mod entity_type;
pub mod error_log;
pub mod formatter;
pub mod job_queue;
pub mod orchestrator;
pub mod push;
pub mod run_lock;
pub mod status_store;
pub mod worker;

pub use adapter::{
    locale_factor, AdapterRegistry, EntityAdapter, EntityReader, NativeEntity, RecordFormatter,
    ShopContext, StaticShopContext, SyncFilter, WireRecord,
};
pub use entity_type::{EntityType, ParentScope};
pub use error_log::{SyncErrorLog, SyncErrorRecord};
pub use formatter::JsonRecordFormatter;
pub use job_queue::{DeadLetter, JobHandler, JobQueue, SyncJob};
pub use orchestrator::{normalize_ids, AcceptOutcome, AcceptRequest, SyncOrchestrator, ALREADY_RUNNING_MESSAGE};
pub use push::PushForwarder;
pub use run_lock::{LockEntry, RunLock};
pub use status_store::{
    GlobalState, SyncRun, SyncStatusStore, TypeProgress, TypeProgressPatch, TypeStatus,
};
pub use worker::{effective_page_size, BulkSyncWorker, WorkerReport, WorkerSettings};
