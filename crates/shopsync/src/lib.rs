//! ShopSync - 商城数据与远端营销平台的同步引擎
//!
//! 提供两种同步方式：
//! - 📥 拉取：远端平台按实体类型发起同步请求，引擎立即返回记录数，
//!   由后台任务分页读取本地数据并批量上传，进度写入同步状态供远端轮询
//! - 📤 推送：宿主商城的单条变更事件实时转发给远端平台
//!
//! 并发安全：每个实体类型一把持久化运行锁（compare-and-swap），
//! 状态计数为原子读改写，worker 终结时总会释放锁。
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shopsync::{EntityType, RequestRouter, SyncConfig, SyncService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .data_dir("/var/lib/shopsync")
//!         .catalog_db("/var/lib/shop/catalog.db")
//!         .api_secret("shared-secret")
//!         .build()?;
//!
//!     // 装配默认实现并启动后台 runner
//!     let service = Arc::new(SyncService::open(config).await?);
//!     service.start().await?;
//!
//!     // 入站请求交给路由处理
//!     let router = RequestRouter::new(service.clone());
//!     let key = shopsync::auth::api_key_for("shared-secret");
//!     let body = br#"{"data": {"type": "products"}}"#;
//!     let response = router.handle_sync(Some(&key), Some("run-1"), body).await;
//!     println!("{} {}", response.status, response.body);
//!
//!     service.wait_idle().await;
//!     let progress = service
//!         .status_store()
//!         .get_type_status("run-1", EntityType::Products)
//!         .await?;
//!     println!("{:?}", progress);
//!
//!     service.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod remote;
pub mod router;
pub mod service;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod version;

pub use config::{RemoteConfig, SyncConfig, SyncConfigBuilder};
pub use error::{Result, SyncError};
pub use remote::{HttpRemoteClient, InvalidRecord, RemoteClient, RemoteResponse};
pub use router::{RequestRouter, RouterResponse};
pub use service::SyncService;
pub use storage::{KvStore, SqliteCatalog};
pub use sync::{
    AcceptOutcome, AcceptRequest, AdapterRegistry, EntityAdapter, EntityReader, EntityType,
    GlobalState, NativeEntity, PushForwarder, RecordFormatter, ShopContext, StaticShopContext,
    SyncFilter, SyncRun, TypeProgress, TypeStatus, WireRecord,
};
pub use version::SDK_VERSION;
