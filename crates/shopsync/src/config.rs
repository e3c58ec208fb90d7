//! 同步服务配置

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SyncError};

/// 远端平台客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// 批量接口基础 URL，例如 https://api.example-crm.com/v1
    pub base_url: String,
    /// 出站请求携带的 API key
    pub api_key: String,
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            api_key: String::new(),
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(60),
        }
    }
}

/// 同步服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// KV 存储目录（运行锁、同步状态、任务队列）
    pub data_dir: PathBuf,
    /// 与远端平台共享的密钥，入站凭证 = hex(sha256(api_secret))
    pub api_secret: String,
    /// 远端平台客户端
    pub remote: RemoteConfig,
    /// 非多语言实体的每页条数；多语言实体按语言数缩小
    pub page_size: u64,
    /// 单次本地查询超时（秒）
    pub reader_timeout_secs: u64,
    /// 单次远端调用超时（秒）
    pub remote_timeout_secs: u64,
    /// 运行锁过期时间（秒）；None 表示永不过期
    pub lock_ttl_secs: Option<u64>,
    /// 是否持久化远端拒收的记录
    pub record_errors: bool,
    /// 需截断到两位小数的金额字段
    pub money_fields: Vec<String>,
    /// 商城目录 SQLite 文件
    pub catalog_db: Option<PathBuf>,
    /// 活跃语言
    pub active_locales: Vec<String>,
    /// 客户分群模块是否启用
    pub segmentation_enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            api_secret: String::new(),
            remote: RemoteConfig::default(),
            page_size: 20,
            reader_timeout_secs: 60,
            remote_timeout_secs: 120,
            lock_ttl_secs: Some(2 * 60 * 60),
            record_errors: true,
            money_fields: [
                "price",
                "wholesale_price",
                "total_paid",
                "total_products",
                "total_shipping",
                "total_discounts",
                "reduction_amount",
                "unit_price",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            catalog_db: None,
            active_locales: vec!["en".to_string()],
            segmentation_enabled: false,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// 从 JSON 文件加载，缺省字段取默认值
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("读取配置文件 {} 失败: {}", path.display(), e)))?;
        let config: SyncConfig = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("解析配置文件 {} 失败: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(SyncError::Config("page_size 必须大于 0".to_string()));
        }
        if self.reader_timeout_secs == 0 || self.remote_timeout_secs == 0 {
            return Err(SyncError::Config("超时时间必须大于 0".to_string()));
        }
        if self.api_secret.is_empty() {
            warn!("api_secret 为空，所有入站请求都会被拒绝");
        }
        Ok(())
    }

    pub fn reader_timeout(&self) -> Duration {
        Duration::from_secs(self.reader_timeout_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn lock_ttl(&self) -> Option<Duration> {
        self.lock_ttl_secs.map(Duration::from_secs)
    }
}

/// 获取默认数据目录 ~/.shopsync/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".shopsync")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        home_dir.join(".shopsync")
    } else {
        PathBuf::from("./shopsync_data")
    }
}

/// 配置构建器
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn api_secret<S: Into<String>>(mut self, secret: S) -> Self {
        self.config.api_secret = secret.into();
        self
    }

    pub fn remote(mut self, remote: RemoteConfig) -> Self {
        self.config.remote = remote;
        self
    }

    pub fn page_size(mut self, page_size: u64) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn reader_timeout_secs(mut self, secs: u64) -> Self {
        self.config.reader_timeout_secs = secs;
        self
    }

    pub fn remote_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remote_timeout_secs = secs;
        self
    }

    pub fn lock_ttl_secs(mut self, ttl: Option<u64>) -> Self {
        self.config.lock_ttl_secs = ttl;
        self
    }

    pub fn record_errors(mut self, enabled: bool) -> Self {
        self.config.record_errors = enabled;
        self
    }

    pub fn catalog_db<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.catalog_db = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn active_locales<I, S>(mut self, locales: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.active_locales = locales.into_iter().map(Into::into).collect();
        self
    }

    pub fn segmentation_enabled(mut self, enabled: bool) -> Self {
        self.config.segmentation_enabled = enabled;
        self
    }

    pub fn build(self) -> Result<SyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builder_overrides_defaults() {
        let config = SyncConfig::builder()
            .api_secret("s3cret")
            .page_size(50)
            .active_locales(["en", "fr"])
            .build()
            .unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.active_locales, vec!["en", "fr"]);
        assert_eq!(config.lock_ttl(), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        assert!(matches!(
            SyncConfig::builder().page_size(0).build(),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn json_file_fills_missing_fields_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"api_secret": "abc", "remote": {"base_url": "https://crm.test"}}"#,
        )
        .unwrap();
        let config = SyncConfig::from_json_file(&path).unwrap();
        assert_eq!(config.api_secret, "abc");
        assert_eq!(config.remote.base_url, "https://crm.test");
        assert_eq!(config.remote.request_timeout_secs, Some(60));
        assert_eq!(config.page_size, 20);
    }
}
