//! KV 存储模块 - 基于 sled 的持久化键值存储
//!
//! 本模块提供：
//! - 跨请求存活的进程级状态（运行锁、同步状态、任务队列、错误记录）
//! - 按用途划分的命名 Tree
//! - 基于 compare_and_swap 的原子读改写

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, IVec, Tree};

use crate::error::{Result, SyncError};

/// 常用的 Tree 名称
pub mod trees {
    /// 实体类型运行锁
    pub const RUN_LOCKS: &str = "run_locks";
    /// 同步会话状态（按 run_id）
    pub const SYNC_RUNS: &str = "sync_runs";
    /// 批量上传失败记录
    pub const SYNC_ERRORS: &str = "sync_errors";
    /// 待执行 / 执行中的同步任务
    pub const SYNC_JOBS: &str = "sync_jobs";
    /// 无法投递的任务
    pub const DEAD_LETTERS: &str = "sync_dead_letters";
}

/// KV 存储组件
#[derive(Debug, Clone)]
pub struct KvStore {
    base_path: Option<PathBuf>,
    db: Db,
}

impl KvStore {
    /// 打开（或创建）`base_path/kv` 下的 sled 数据库
    pub async fn open(base_path: &Path) -> Result<Self> {
        let kv_path = base_path.join("kv");
        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| SyncError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 上一个进程可能刚释放目录锁，重试多次带退避
        const MAX_OPEN_RETRIES: u32 = 6;
        const RETRY_DELAY_MS: u64 = 200;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(db) => {
                    tracing::info!("KV 存储已打开: {}", kv_path.display());
                    return Ok(Self {
                        base_path: Some(base_path.to_path_buf()),
                        db,
                    });
                }
                Err(e) => {
                    let msg = e.to_string();
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        Err(SyncError::KvStore(
            last_err
                .map(|e| format!("打开 sled 数据库失败: {}", e))
                .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
        ))
    }

    /// 临时数据库（drop 后删除），用于测试
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { base_path: None, db })
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    fn tree(&self, name: &str) -> Result<Tree> {
        self.db
            .open_tree(name)
            .map_err(|e| SyncError::KvStore(format!("打开 Tree {} 失败: {}", name, e)))
    }

    /// 设置键值对（JSON 编码）
    pub async fn set<V>(&self, tree: &str, key: &str, value: &V) -> Result<()>
    where
        V: Serialize,
    {
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| SyncError::Serialization(format!("序列化值失败: {}", e)))?;
        self.tree(tree)?
            .insert(key, value_bytes)
            .map_err(|e| SyncError::KvStore(format!("设置键值对失败: {}", e)))?;
        Ok(())
    }

    /// 获取键值对
    pub async fn get<V>(&self, tree: &str, key: &str) -> Result<Option<V>>
    where
        V: DeserializeOwned,
    {
        match self.get_raw(tree, key).await? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// 获取原始字节（compare_and_swap 需要原值）
    pub async fn get_raw(&self, tree: &str, key: &str) -> Result<Option<IVec>> {
        self.tree(tree)?
            .get(key)
            .map_err(|e| SyncError::KvStore(format!("获取键值对失败: {}", e)))
    }

    /// 删除键值对，返回是否存在
    pub async fn delete(&self, tree: &str, key: &str) -> Result<bool> {
        let removed = self
            .tree(tree)?
            .remove(key)
            .map_err(|e| SyncError::KvStore(format!("删除键值对失败: {}", e)))?;
        Ok(removed.is_some())
    }

    /// 获取指定前缀的所有键值对（按键字节序）
    pub async fn scan_prefix<V>(&self, tree: &str, prefix: &str) -> Result<Vec<(String, V)>>
    where
        V: DeserializeOwned,
    {
        let mut results = Vec::new();
        for item in self.tree(tree)?.scan_prefix(prefix) {
            let (key, value_bytes) =
                item.map_err(|e| SyncError::KvStore(format!("扫描前缀失败: {}", e)))?;
            let key = String::from_utf8_lossy(&key).into_owned();
            results.push((key, decode(&value_bytes)?));
        }
        Ok(results)
    }

    /// 单次原子比较交换；`expected` 为 None 表示键必须不存在
    pub async fn compare_and_swap(
        &self,
        tree: &str,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<bool> {
        let result = self
            .tree(tree)?
            .compare_and_swap(key, expected, new)
            .map_err(|e| SyncError::KvStore(format!("原子交换失败: {}", e)))?;
        Ok(result.is_ok())
    }

    /// 原子读改写：读出旧值交给 `f`，用 compare_and_swap 写回，冲突则重试
    pub async fn update<V, F>(&self, tree: &str, key: &str, mut f: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnMut(Option<V>) -> V,
    {
        let tree_handle = self.tree(tree)?;
        loop {
            let current_bytes = tree_handle
                .get(key)
                .map_err(|e| SyncError::KvStore(format!("读取旧值失败: {}", e)))?;
            let current = match &current_bytes {
                Some(bytes) => Some(decode::<V>(bytes)?),
                None => None,
            };

            let next = f(current);
            let next_bytes = serde_json::to_vec(&next)
                .map_err(|e| SyncError::Serialization(format!("序列化值失败: {}", e)))?;

            let swapped = tree_handle
                .compare_and_swap(key, current_bytes, Some(next_bytes))
                .map_err(|e| SyncError::KvStore(format!("原子更新失败: {}", e)))?;

            match swapped {
                Ok(()) => return Ok(next),
                Err(_) => {
                    // 并发写入，重读后重试
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        }
    }

    /// 单调递增 id（用于生成有序键）
    pub fn generate_id(&self) -> Result<u64> {
        self.db
            .generate_id()
            .map_err(|e| SyncError::KvStore(format!("生成 id 失败: {}", e)))
    }

    /// 落盘
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| SyncError::KvStore(format!("flush 失败: {}", e)))?;
        Ok(())
    }
}

fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    serde_json::from_slice(bytes)
        .map_err(|e| SyncError::Serialization(format!("反序列化值失败: {}", e)))
}
