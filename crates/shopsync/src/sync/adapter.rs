//! 实体适配层
//!
//! 同步引擎只通过这里的 trait 接触外部：
//! - [`EntityReader`]：本地实体的只读分页查询
//! - [`RecordFormatter`]：本地实体 → 远端记录的纯映射
//! - [`ShopContext`]：活跃语言、可选模块开关
//!
//! 每个实体类型在 [`AdapterRegistry`] 中注册一个 [`EntityAdapter`]，引擎本身与类型无关。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use super::EntityType;

/// 远端记录（线上格式）
pub type WireRecord = Value;

/// 查询过滤条件：id 集合 AND updated_at >= last_update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFilter {
    pub ids: Option<Vec<u64>>,
    pub last_update: Option<DateTime<Utc>>,
}

impl SyncFilter {
    pub fn new(ids: Option<Vec<u64>>, last_update: Option<DateTime<Utc>>) -> Self {
        Self { ids, last_update }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, entity: &NativeEntity) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&entity.id) {
                return false;
            }
        }
        match self.last_update {
            Some(since) => entity.updated_at >= since,
            None => true,
        }
    }
}

/// 本地实体（宿主商城的一行数据）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeEntity {
    pub id: u64,
    /// 父实体 id（地址 → 客户，图片/规格 → 商品）
    pub parent_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

impl NativeEntity {
    pub fn new(id: u64, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            parent_id: None,
            created_at: updated_at,
            updated_at,
            fields: Map::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }
}

/// 本地实体集合的只读访问
#[async_trait]
pub trait EntityReader: Send + Sync {
    /// 满足过滤条件的本地记录数（未按语言展开）
    async fn count(&self, filter: &SyncFilter) -> Result<u64>;

    /// 按稳定顺序取一页
    async fn page(&self, filter: &SyncFilter, offset: u64, limit: u64) -> Result<Vec<NativeEntity>>;
}

/// 本地实体 → 远端记录
pub trait RecordFormatter: Send + Sync {
    /// `locale` 仅对多语言实体传入
    fn format(&self, entity: &NativeEntity, locale: Option<&str>) -> Result<WireRecord>;
}

/// 宿主商城上下文
#[async_trait]
pub trait ShopContext: Send + Sync {
    async fn active_locales(&self) -> Result<Vec<String>>;

    async fn segmentation_enabled(&self) -> Result<bool>;
}

/// 由配置提供的固定上下文
#[derive(Debug, Clone)]
pub struct StaticShopContext {
    locales: Vec<String>,
    segmentation_enabled: bool,
}

impl StaticShopContext {
    pub fn new(locales: Vec<String>, segmentation_enabled: bool) -> Self {
        Self {
            locales,
            segmentation_enabled,
        }
    }
}

#[async_trait]
impl ShopContext for StaticShopContext {
    async fn active_locales(&self) -> Result<Vec<String>> {
        Ok(self.locales.clone())
    }

    async fn segmentation_enabled(&self) -> Result<bool> {
        Ok(self.segmentation_enabled)
    }
}

/// 单个实体类型的读取 + 格式化
#[derive(Clone)]
pub struct EntityAdapter {
    pub reader: Arc<dyn EntityReader>,
    pub formatter: Arc<dyn RecordFormatter>,
}

impl EntityAdapter {
    pub fn new(reader: Arc<dyn EntityReader>, formatter: Arc<dyn RecordFormatter>) -> Self {
        Self { reader, formatter }
    }
}

/// 实体类型 → 适配器
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<EntityType, EntityAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity_type: EntityType, adapter: EntityAdapter) -> &mut Self {
        if self.adapters.insert(entity_type, adapter).is_some() {
            tracing::warn!("实体适配器被覆盖: {}", entity_type);
        }
        self
    }

    pub fn get(&self, entity_type: EntityType) -> Result<&EntityAdapter> {
        self.adapters
            .get(&entity_type)
            .ok_or(SyncError::AdapterMissing(entity_type))
    }

    pub fn contains(&self, entity_type: EntityType) -> bool {
        self.adapters.contains_key(&entity_type)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// 多语言实体按语言数展开，其余实体恒为 1
pub fn locale_factor(entity_type: EntityType, locales: &[String]) -> u64 {
    if entity_type.is_translatable() {
        locales.len() as u64
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn filter_matches_ids_and_inclusive_last_update() {
        let entity = NativeEntity::new(7, at(10));

        assert!(SyncFilter::all().matches(&entity));
        assert!(SyncFilter::new(Some(vec![1, 7]), None).matches(&entity));
        assert!(!SyncFilter::new(Some(vec![1, 2]), None).matches(&entity));
        // >= 为闭区间
        assert!(SyncFilter::new(None, Some(at(10))).matches(&entity));
        assert!(!SyncFilter::new(None, Some(at(11))).matches(&entity));
        assert!(!SyncFilter::new(Some(vec![7]), Some(at(11))).matches(&entity));
    }

    #[test]
    fn locale_factor_only_expands_translatable_types() {
        let locales = vec!["en".to_string(), "fr".to_string(), "de".to_string()];
        assert_eq!(locale_factor(EntityType::Products, &locales), 3);
        assert_eq!(locale_factor(EntityType::Vouchers, &locales), 3);
        assert_eq!(locale_factor(EntityType::Customers, &locales), 1);
        assert_eq!(locale_factor(EntityType::Products, &[]), 0);
    }

    #[test]
    fn registry_reports_missing_adapter() {
        let registry = AdapterRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get(EntityType::Orders),
            Err(SyncError::AdapterMissing(EntityType::Orders))
        ));
    }
}
