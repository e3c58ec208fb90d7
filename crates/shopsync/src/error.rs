use crate::sync::EntityType;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IO(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),
    #[error("No adapter registered for entity type {0}")]
    AdapterMissing(EntityType),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Remote platform answered HTTP {code}: {message}")]
    RemoteStatus { code: u16, message: String },
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Job queue closed: {0}")]
    QueueClosed(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Other error: {0}")]
    Other(String),
}

impl From<sled::Error> for SyncError {
    fn from(error: sled::Error) -> Self {
        SyncError::KvStore(error.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(error: std::io::Error) -> Self {
        SyncError::IO(error.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            SyncError::Timeout(error.to_string())
        } else {
            SyncError::Transport(error.to_string())
        }
    }
}

impl SyncError {
    /// 是否属于调用方输入问题（同步返回给调用方，不修改任何状态）
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidInput(_) | SyncError::Unauthorized(_) | SyncError::UnknownEntityType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
