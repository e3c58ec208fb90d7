//! 实体类型枚举 - 受控枚举
//!
//! entity_type 为受控枚举，新增需与远端平台同步升级。

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::SyncError;

/// 可同步的实体类型（与远端平台的批量接口一一对应）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Customers,
    CustomerAddresses,
    CustomerGroups,
    NewsletterSubscribers,
    Orders,
    OrderStatuses,
    Products,
    ProductVariations,
    ProductImages,
    ProductCategories,
    Manufacturers,
    Vouchers,
}

/// 父级实体（远端接口按父 id 分组的实体使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentScope {
    Customer,
    Product,
}

impl ParentScope {
    pub fn path(self) -> &'static str {
        match self {
            Self::Customer => "customers",
            Self::Product => "products",
        }
    }
}

impl EntityType {
    pub const ALL: [EntityType; 12] = [
        Self::Customers,
        Self::CustomerAddresses,
        Self::CustomerGroups,
        Self::NewsletterSubscribers,
        Self::Orders,
        Self::OrderStatuses,
        Self::Products,
        Self::ProductVariations,
        Self::ProductImages,
        Self::ProductCategories,
        Self::Manufacturers,
        Self::Vouchers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::CustomerAddresses => "customer-addresses",
            Self::CustomerGroups => "customer-groups",
            Self::NewsletterSubscribers => "newsletter-subscribers",
            Self::Orders => "orders",
            Self::OrderStatuses => "order-statuses",
            Self::Products => "products",
            Self::ProductVariations => "product-variations",
            Self::ProductImages => "product-images",
            Self::ProductCategories => "product-categories",
            Self::Manufacturers => "manufacturers",
            Self::Vouchers => "vouchers",
        }
    }

    /// 每个活跃语言产出一条远端记录
    pub fn is_translatable(self) -> bool {
        matches!(
            self,
            Self::CustomerGroups
                | Self::OrderStatuses
                | Self::Products
                | Self::ProductCategories
                | Self::Vouchers
        )
    }

    /// 远端接口按父 id 划分的实体（地址按客户，图片/规格按商品）
    pub fn parent_scope(self) -> Option<ParentScope> {
        match self {
            Self::CustomerAddresses => Some(ParentScope::Customer),
            Self::ProductImages | Self::ProductVariations => Some(ParentScope::Product),
            _ => None,
        }
    }

    /// 依赖可选「客户分群」模块的实体
    pub fn requires_segmentation(self) -> bool {
        matches!(self, Self::CustomerGroups)
    }
}

impl FromStr for EntityType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SyncError::UnknownEntityType(s.to_string()))
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
