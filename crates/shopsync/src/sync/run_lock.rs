//! 实体类型运行锁
//!
//! 每个实体类型一把锁，进程级、持久化在 KV 中，跨请求可见。
//! 格式：run_lock:{entity_type} → [`LockEntry`]
//!
//! 锁记录持有者（任务 id）。`try_acquire` 与 `release` 都是 compare_and_swap，
//! 只有持有者本人能释放；过期锁被接管后，原持有者的释放不会影响新持有者。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::storage::kv::{trees, KvStore};
use super::EntityType;

const PREFIX: &str = "run_lock";

/// 锁记录；`held = false` 等价于键不存在
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub held: bool,
    #[serde(default)]
    pub owner: Option<Uuid>,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RunLock {
    kv: Arc<KvStore>,
    /// 超过该时长的锁视为遗留锁，可被接管（worker 进程被杀的情况）
    ttl: Option<Duration>,
}

impl RunLock {
    pub fn new(kv: Arc<KvStore>, ttl: Option<Duration>) -> Self {
        Self { kv, ttl }
    }

    fn key(entity_type: EntityType) -> String {
        format!("{}:{}", PREFIX, entity_type.as_str())
    }

    /// 以 `owner` 身份原子获取
    ///
    /// 已被其他任务持有（且未过期）时返回 false；同一 owner 重复获取视为续期。
    pub async fn try_acquire(&self, entity_type: EntityType, owner: Uuid) -> Result<bool> {
        let key = Self::key(entity_type);
        let current = self.kv.get_raw(trees::RUN_LOCKS, &key).await?;

        if let Some(bytes) = &current {
            let entry: LockEntry = serde_json::from_slice(bytes)?;
            if entry.held && entry.owner == Some(owner) {
                debug!("运行锁续期: type={}, owner={}", entity_type, owner);
            } else if entry.held && !self.is_stale(&entry) {
                debug!("运行锁已被持有: type={}, since={}", entity_type, entry.acquired_at);
                return Ok(false);
            } else if entry.held {
                warn!(
                    "接管过期运行锁: type={}, previous_owner={:?}, acquired_at={}",
                    entity_type, entry.owner, entry.acquired_at
                );
            }
        }

        let new_entry = LockEntry {
            held: true,
            owner: Some(owner),
            acquired_at: Utc::now(),
        };
        let swapped = self
            .kv
            .compare_and_swap(
                trees::RUN_LOCKS,
                &key,
                current.as_deref(),
                Some(serde_json::to_vec(&new_entry)?),
            )
            .await?;

        if swapped {
            info!("🔒 运行锁已获取: type={}, owner={}", entity_type, owner);
        } else {
            // 另一个请求在读与交换之间抢先写入
            debug!("运行锁竞争失败: type={}", entity_type);
        }
        Ok(swapped)
    }

    /// 由持有者释放；锁已空闲或属于其他任务时返回 false 且不做修改
    pub async fn release(&self, entity_type: EntityType, owner: Uuid) -> Result<bool> {
        let key = Self::key(entity_type);
        loop {
            let current = self.kv.get_raw(trees::RUN_LOCKS, &key).await?;
            let Some(bytes) = &current else {
                return Ok(false);
            };
            let entry: LockEntry = serde_json::from_slice(bytes)?;
            if !entry.held {
                return Ok(false);
            }
            if entry.owner != Some(owner) {
                warn!(
                    "运行锁已被其他任务持有，跳过释放: type={}, holder={:?}, releaser={}",
                    entity_type, entry.owner, owner
                );
                return Ok(false);
            }

            let free = LockEntry {
                held: false,
                owner: None,
                acquired_at: Utc::now(),
            };
            let swapped = self
                .kv
                .compare_and_swap(
                    trees::RUN_LOCKS,
                    &key,
                    current.as_deref(),
                    Some(serde_json::to_vec(&free)?),
                )
                .await?;
            if swapped {
                info!("🔓 运行锁已释放: type={}, owner={}", entity_type, owner);
                return Ok(true);
            }
        }
    }

    /// 管理端强制清除（不论是否过期、属于谁）
    pub async fn force_release(&self, entity_type: EntityType) -> Result<bool> {
        let was_held = self.is_held(entity_type).await?;
        self.kv
            .delete(trees::RUN_LOCKS, &Self::key(entity_type))
            .await?;
        if was_held {
            warn!("运行锁被强制释放: type={}", entity_type);
        }
        Ok(was_held)
    }

    pub async fn is_held(&self, entity_type: EntityType) -> Result<bool> {
        Ok(self.holder(entity_type).await?.is_some())
    }

    /// 当前持有者；未持有返回 None
    pub async fn holder(&self, entity_type: EntityType) -> Result<Option<Uuid>> {
        let entry: Option<LockEntry> = self
            .kv
            .get(trees::RUN_LOCKS, &Self::key(entity_type))
            .await?;
        Ok(entry
            .filter(|e| e.held)
            .map(|e| e.owner.unwrap_or_else(Uuid::nil)))
    }

    fn is_stale(&self, entry: &LockEntry) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        let age = Utc::now().signed_duration_since(entry.acquired_at);
        age.to_std().map(|age| age > ttl).unwrap_or(false)
    }
}
