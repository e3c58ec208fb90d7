//! 实时推送
//!
//! 宿主商城的数据变更事件直接转发给远端平台，不经过运行锁与任务队列。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::remote::{RemoteClient, RemoteResponse};
use super::adapter::{AdapterRegistry, NativeEntity, ShopContext, WireRecord};
use super::EntityType;

#[derive(Clone)]
pub struct PushForwarder {
    registry: Arc<AdapterRegistry>,
    shop: Arc<dyn ShopContext>,
    remote: Arc<dyn RemoteClient>,
    remote_timeout: Duration,
}

impl PushForwarder {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        shop: Arc<dyn ShopContext>,
        remote: Arc<dyn RemoteClient>,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            shop,
            remote,
            remote_timeout,
        }
    }

    /// 单条实体 → 远端记录（多语言实体每个活跃语言一条）
    async fn format(&self, entity_type: EntityType, entity: &NativeEntity) -> Result<Vec<WireRecord>> {
        let formatter = &self.registry.get(entity_type)?.formatter;
        if !entity_type.is_translatable() {
            return Ok(vec![formatter.format(entity, None)?]);
        }
        self.shop
            .active_locales()
            .await?
            .iter()
            .map(|locale| formatter.format(entity, Some(locale)))
            .collect()
    }

    async fn with_timeout<F>(&self, entity_type: EntityType, call: F) -> Result<RemoteResponse>
    where
        F: std::future::Future<Output = Result<RemoteResponse>>,
    {
        let response = tokio::time::timeout(self.remote_timeout, call)
            .await
            .map_err(|_| SyncError::Timeout(format!("推送 {} 超时", entity_type)))?
            .map_err(|e| {
                warn!("推送失败: type={}, error={}", entity_type, e);
                e
            })?;
        if !response.is_success() {
            warn!("远端拒绝推送: type={}, status={:?}", entity_type, response.status_code);
        }
        Ok(response)
    }

    /// 新建实体
    pub async fn on_created(&self, entity_type: EntityType, entity: &NativeEntity) -> Result<RemoteResponse> {
        let records = self.format(entity_type, entity).await?;
        debug!("推送新建: type={}, id={}, records={}", entity_type, entity.id, records.len());
        self.with_timeout(
            entity_type,
            self.remote.bulk_save(entity_type, entity.parent_id, &records),
        )
        .await
    }

    /// 更新实体
    pub async fn on_updated(&self, entity_type: EntityType, entity: &NativeEntity) -> Result<RemoteResponse> {
        let records = self.format(entity_type, entity).await?;
        debug!("推送更新: type={}, id={}, records={}", entity_type, entity.id, records.len());
        self.with_timeout(
            entity_type,
            self.remote.bulk_update(entity_type, entity.parent_id, &records),
        )
        .await
    }

    /// 保存事件不区分新建与更新时使用（远端自行 upsert）
    pub async fn on_saved(&self, entity_type: EntityType, entity: &NativeEntity) -> Result<RemoteResponse> {
        self.on_created(entity_type, entity).await
    }

    pub async fn on_deleted(
        &self,
        entity_type: EntityType,
        parent_id: Option<u64>,
        id: u64,
    ) -> Result<RemoteResponse> {
        debug!("推送删除: type={}, id={}", entity_type, id);
        self.with_timeout(entity_type, self.remote.delete(entity_type, parent_id, id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::adapter::{EntityAdapter, EntityReader, StaticShopContext, SyncFilter};
    use crate::sync::formatter::JsonRecordFormatter;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use serde_json::json;

    struct NoReader;

    #[async_trait]
    impl EntityReader for NoReader {
        async fn count(&self, _filter: &SyncFilter) -> Result<u64> {
            Ok(0)
        }

        async fn page(&self, _filter: &SyncFilter, _offset: u64, _limit: u64) -> Result<Vec<NativeEntity>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(String, EntityType, Option<u64>, usize)>>,
    }

    #[async_trait]
    impl RemoteClient for Recording {
        async fn bulk_save(&self, t: EntityType, p: Option<u64>, r: &[WireRecord]) -> Result<RemoteResponse> {
            self.calls.lock().push(("save".into(), t, p, r.len()));
            Ok(RemoteResponse::ok())
        }

        async fn bulk_update(&self, t: EntityType, p: Option<u64>, r: &[WireRecord]) -> Result<RemoteResponse> {
            self.calls.lock().push(("update".into(), t, p, r.len()));
            Ok(RemoteResponse::ok())
        }

        async fn delete(&self, t: EntityType, p: Option<u64>, _id: u64) -> Result<RemoteResponse> {
            self.calls.lock().push(("delete".into(), t, p, 0));
            Ok(RemoteResponse::ok())
        }
    }

    fn forwarder(remote: Arc<Recording>) -> PushForwarder {
        let mut registry = AdapterRegistry::new();
        for entity_type in [EntityType::Products, EntityType::ProductImages] {
            registry.register(
                entity_type,
                EntityAdapter::new(Arc::new(NoReader), Arc::new(JsonRecordFormatter::default())),
            );
        }
        PushForwarder::new(
            Arc::new(registry),
            Arc::new(StaticShopContext::new(vec!["en".into(), "fr".into()], false)),
            remote,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn translatable_entity_is_pushed_once_per_locale() {
        let remote = Arc::new(Recording::default());
        let forwarder = forwarder(remote.clone());
        let product = NativeEntity::new(1, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .with_field("translations", json!({"en": {"name": "A"}, "fr": {"name": "B"}}));

        forwarder.on_saved(EntityType::Products, &product).await.unwrap();
        forwarder.on_updated(EntityType::Products, &product).await.unwrap();

        let calls = remote.calls.lock().clone();
        assert_eq!(calls[0], ("save".to_string(), EntityType::Products, None, 2));
        assert_eq!(calls[1], ("update".to_string(), EntityType::Products, None, 2));
    }

    #[tokio::test]
    async fn child_entities_carry_parent_scope() {
        let remote = Arc::new(Recording::default());
        let forwarder = forwarder(remote.clone());
        let image = NativeEntity::new(3, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()).with_parent(9);

        forwarder.on_created(EntityType::ProductImages, &image).await.unwrap();
        forwarder.on_deleted(EntityType::ProductImages, Some(9), 3).await.unwrap();

        let calls = remote.calls.lock().clone();
        assert_eq!(calls[0], ("save".to_string(), EntityType::ProductImages, Some(9), 1));
        assert_eq!(calls[1], ("delete".to_string(), EntityType::ProductImages, Some(9), 0));
    }

    #[tokio::test]
    async fn unregistered_type_is_an_error() {
        let forwarder = forwarder(Arc::new(Recording::default()));
        let entity = NativeEntity::new(1, Utc::now());
        assert!(matches!(
            forwarder.on_saved(EntityType::Orders, &entity).await,
            Err(SyncError::AdapterMissing(EntityType::Orders))
        ));
    }
}
