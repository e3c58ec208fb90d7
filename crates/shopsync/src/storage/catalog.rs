//! 商城目录的 SQLite 只读访问
//!
//! 所有实体类型共用一张表：
//!
//! ```sql
//! shop_entities(entity_type TEXT, id INTEGER, parent_id INTEGER NULL,
//!               created_at INTEGER, updated_at INTEGER, payload TEXT)
//! ```
//!
//! 时间为 UTC 毫秒时间戳，payload 为 JSON 对象。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::sync::{EntityReader, EntityType, NativeEntity, SyncFilter};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS shop_entities (
    entity_type TEXT    NOT NULL,
    id          INTEGER NOT NULL,
    parent_id   INTEGER,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    payload     TEXT    NOT NULL DEFAULT '{}',
    PRIMARY KEY (entity_type, id)
);
CREATE INDEX IF NOT EXISTS idx_shop_entities_updated
    ON shop_entities (entity_type, updated_at, id);
";

/// 商城目录数据库
#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        debug!("商城目录已打开: {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 写入 / 覆盖一条实体（宿主商城写入路径，测试与演示数据使用）
    pub fn upsert(&self, entity_type: EntityType, entity: &NativeEntity) -> Result<()> {
        let payload = serde_json::to_string(&entity.fields)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO shop_entities
                (entity_type, id, parent_id, created_at, updated_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entity_type.as_str(),
                to_sql_id(entity.id)?,
                entity.parent_id.map(to_sql_id).transpose()?,
                entity.created_at.timestamp_millis(),
                entity.updated_at.timestamp_millis(),
                payload,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, entity_type: EntityType, id: u64) -> Result<Option<NativeEntity>> {
        let conn = self.conn.lock();
        let entity = conn
            .query_row(
                "SELECT id, parent_id, created_at, updated_at, payload
                 FROM shop_entities WHERE entity_type = ?1 AND id = ?2",
                params![entity_type.as_str(), to_sql_id(id)?],
                read_row,
            )
            .optional()?;
        entity.transpose()
    }

    pub fn reader(&self, entity_type: EntityType) -> SqliteEntityReader {
        SqliteEntityReader {
            conn: self.conn.clone(),
            entity_type,
        }
    }
}

/// 单个实体类型的分页读取
#[derive(Clone)]
pub struct SqliteEntityReader {
    conn: Arc<Mutex<Connection>>,
    entity_type: EntityType,
}

impl SqliteEntityReader {
    /// WHERE 子句与参数；ids 为空列表时不匹配任何记录
    fn where_clause(&self, filter: &SyncFilter) -> Result<(String, Vec<SqlValue>)> {
        let mut sql = String::from("entity_type = ?");
        let mut values = vec![SqlValue::Text(self.entity_type.as_str().to_string())];

        if let Some(ids) = &filter.ids {
            if ids.is_empty() {
                sql.push_str(" AND 0");
            } else {
                let placeholders = vec!["?"; ids.len()].join(", ");
                sql.push_str(&format!(" AND id IN ({})", placeholders));
                for id in ids {
                    values.push(SqlValue::Integer(to_sql_id(*id)?));
                }
            }
        }
        if let Some(since) = filter.last_update {
            sql.push_str(" AND updated_at >= ?");
            values.push(SqlValue::Integer(since.timestamp_millis()));
        }
        Ok((sql, values))
    }

    fn order_clause(&self) -> &'static str {
        if self.entity_type.parent_scope().is_some() {
            "ORDER BY parent_id, updated_at, id"
        } else {
            "ORDER BY updated_at, id"
        }
    }
}

#[async_trait]
impl EntityReader for SqliteEntityReader {
    async fn count(&self, filter: &SyncFilter) -> Result<u64> {
        let (where_sql, values) = self.where_clause(filter)?;
        let conn = self.conn.clone();
        let sql = format!("SELECT COUNT(*) FROM shop_entities WHERE {}", where_sql);

        let count: i64 = tokio::task::spawn_blocking(move || {
            conn.lock()
                .query_row(&sql, params_from_iter(values), |row| row.get(0))
        })
        .await
        .map_err(|e| SyncError::Other(format!("SQLite 任务失败: {}", e)))??;

        Ok(count.max(0) as u64)
    }

    async fn page(&self, filter: &SyncFilter, offset: u64, limit: u64) -> Result<Vec<NativeEntity>> {
        let (where_sql, mut values) = self.where_clause(filter)?;
        values.push(SqlValue::Integer(limit.min(i64::MAX as u64) as i64));
        values.push(SqlValue::Integer(offset.min(i64::MAX as u64) as i64));
        let sql = format!(
            "SELECT id, parent_id, created_at, updated_at, payload FROM shop_entities
             WHERE {} {} LIMIT ? OFFSET ?",
            where_sql,
            self.order_clause()
        );
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<NativeEntity>> {
            let conn = conn.lock();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), read_row)?;
            let mut entities = Vec::new();
            for row in rows {
                entities.push(row??);
            }
            Ok(entities)
        })
        .await
        .map_err(|e| SyncError::Other(format!("SQLite 任务失败: {}", e)))?
    }
}

/// 行 → 实体；payload 解析失败作为内层错误返回
fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<NativeEntity>> {
    let id: i64 = row.get(0)?;
    let parent_id: Option<i64> = row.get(1)?;
    let created_at: i64 = row.get(2)?;
    let updated_at: i64 = row.get(3)?;
    let payload: String = row.get(4)?;

    Ok(build_entity(id, parent_id, created_at, updated_at, &payload))
}

fn build_entity(
    id: i64,
    parent_id: Option<i64>,
    created_at: i64,
    updated_at: i64,
    payload: &str,
) -> Result<NativeEntity> {
    let fields: Map<String, Value> = serde_json::from_str(payload)?;
    Ok(NativeEntity {
        id: id as u64,
        parent_id: parent_id.map(|p| p as u64),
        created_at: from_millis(created_at)?,
        updated_at: from_millis(updated_at)?,
        fields,
    })
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| SyncError::Serialization(format!("非法时间戳: {}", ms)))
}

fn to_sql_id(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| SyncError::InvalidInput(format!("id {} out of range", id)))
}
