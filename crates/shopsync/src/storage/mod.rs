//! 存储层
//!
//! - `kv`：sled 键值存储，保存运行锁、同步状态、任务队列与失败记录
//! - `catalog`：商城目录的 SQLite 只读访问（默认 EntityReader）

pub mod catalog;
pub mod kv;

pub use catalog::{SqliteCatalog, SqliteEntityReader};
pub use kv::KvStore;
