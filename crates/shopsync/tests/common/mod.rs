//! 集成测试共用的内存实现

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;

use shopsync::sync::JsonRecordFormatter;
use shopsync::{
    AdapterRegistry, EntityAdapter, EntityReader, EntityType, InvalidRecord, KvStore,
    NativeEntity, RemoteClient, RemoteResponse, Result, StaticShopContext, SyncConfig,
    SyncError, SyncFilter, SyncService, WireRecord,
};

pub const SECRET: &str = "integration-secret";

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

/// 按 updated_at 递增生成 n 条实体
pub fn entities(n: u64) -> Vec<NativeEntity> {
    (1..=n)
        .map(|id| {
            NativeEntity::new(id, base_time() + Duration::minutes(id as i64))
                .with_field("name", json!(format!("item-{}", id)))
        })
        .collect()
}

/// 内存中的 EntityReader，记录分页调用次数
#[derive(Default)]
pub struct MemoryReader {
    rows: Mutex<Vec<NativeEntity>>,
    pub page_calls: AtomicUsize,
    panic_on_page: bool,
}

impl MemoryReader {
    pub fn new(mut rows: Vec<NativeEntity>) -> Self {
        rows.sort_by_key(|e| (e.parent_id, e.updated_at, e.id));
        Self {
            rows: Mutex::new(rows),
            page_calls: AtomicUsize::new(0),
            panic_on_page: false,
        }
    }

    pub fn panicking(rows: Vec<NativeEntity>) -> Self {
        Self {
            panic_on_page: true,
            ..Self::new(rows)
        }
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityReader for MemoryReader {
    async fn count(&self, filter: &SyncFilter) -> Result<u64> {
        Ok(self.rows.lock().iter().filter(|e| filter.matches(e)).count() as u64)
    }

    async fn page(&self, filter: &SyncFilter, offset: u64, limit: u64) -> Result<Vec<NativeEntity>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_page {
            panic!("reader exploded");
        }
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|e| filter.matches(e))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct RemoteCall {
    pub entity_type: EntityType,
    pub parent_id: Option<u64>,
    pub records: Vec<WireRecord>,
}

/// 远端行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    Accept,
    /// 每批第一条记录被判为非法
    RejectFirst,
    /// 所有调用都返回传输错误
    Fail,
}

/// 记录所有调用的 RemoteClient；可选闸门让 bulk_save 阻塞直到放行
pub struct RecordingRemote {
    pub calls: Mutex<Vec<RemoteCall>>,
    mode: RemoteMode,
    gate: Option<Semaphore>,
}

impl RecordingRemote {
    pub fn new(mode: RemoteMode) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            mode,
            gate: None,
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(RemoteMode::Accept)
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1_000_000);
        }
    }

    pub fn sent_records(&self) -> Vec<WireRecord> {
        self.calls
            .lock()
            .iter()
            .flat_map(|call| call.records.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteClient for RecordingRemote {
    async fn bulk_save(
        &self,
        entity_type: EntityType,
        parent_id: Option<u64>,
        records: &[WireRecord],
    ) -> Result<RemoteResponse> {
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| SyncError::Transport(e.to_string()))?;
            permit.forget();
        }
        self.calls.lock().push(RemoteCall {
            entity_type,
            parent_id,
            records: records.to_vec(),
        });
        match self.mode {
            RemoteMode::Accept => Ok(RemoteResponse::ok()),
            RemoteMode::RejectFirst => Ok(RemoteResponse::ok().with_invalid(vec![InvalidRecord {
                index: 0,
                code: Some("invalid_field".to_string()),
                message: "name is invalid".to_string(),
            }])),
            RemoteMode::Fail => Err(SyncError::Transport("connection refused".to_string())),
        }
    }

    async fn bulk_update(
        &self,
        entity_type: EntityType,
        parent_id: Option<u64>,
        records: &[WireRecord],
    ) -> Result<RemoteResponse> {
        self.bulk_save(entity_type, parent_id, records).await
    }

    async fn delete(&self, _: EntityType, _: Option<u64>, _: u64) -> Result<RemoteResponse> {
        Ok(RemoteResponse::ok())
    }
}

pub struct Harness {
    pub service: Arc<SyncService>,
    pub remote: Arc<RecordingRemote>,
    pub kv: Arc<KvStore>,
}

pub struct HarnessBuilder {
    readers: Vec<(EntityType, Arc<MemoryReader>)>,
    locales: Vec<String>,
    segmentation: bool,
    page_size: u64,
    remote: Arc<RecordingRemote>,
    kv: Option<Arc<KvStore>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            readers: Vec::new(),
            locales: vec!["en".to_string()],
            segmentation: false,
            page_size: 20,
            remote: Arc::new(RecordingRemote::new(RemoteMode::Accept)),
            kv: None,
        }
    }

    pub fn reader(mut self, entity_type: EntityType, reader: Arc<MemoryReader>) -> Self {
        self.readers.push((entity_type, reader));
        self
    }

    pub fn locales(mut self, locales: &[&str]) -> Self {
        self.locales = locales.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn segmentation(mut self, enabled: bool) -> Self {
        self.segmentation = enabled;
        self
    }

    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn remote(mut self, remote: Arc<RecordingRemote>) -> Self {
        self.remote = remote;
        self
    }

    pub fn kv(mut self, kv: Arc<KvStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// 装配但不启动 runner
    pub fn assemble(self) -> Harness {
        let config = SyncConfig::builder()
            .api_secret(SECRET)
            .page_size(self.page_size)
            .active_locales(self.locales.clone())
            .segmentation_enabled(self.segmentation)
            .remote_timeout_secs(5)
            .build()
            .unwrap();
        let kv = self
            .kv
            .unwrap_or_else(|| Arc::new(KvStore::temporary().unwrap()));

        let mut registry = AdapterRegistry::new();
        for (entity_type, reader) in self.readers {
            registry.register(
                entity_type,
                EntityAdapter::new(reader, Arc::new(JsonRecordFormatter::new(["price"]))),
            );
        }

        let service = SyncService::new(
            config,
            kv.clone(),
            registry,
            Arc::new(StaticShopContext::new(self.locales, self.segmentation)),
            self.remote.clone(),
        )
        .unwrap();

        Harness {
            service: Arc::new(service),
            remote: self.remote,
            kv,
        }
    }

    pub async fn start(self) -> Harness {
        let harness = self.assemble();
        harness.service.start().await.unwrap();
        harness
    }
}
