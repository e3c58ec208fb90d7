//! 入站凭证校验
//!
//! 远端平台在 `X-Api-Key` 头中携带 hex(sha256(api_secret))。

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

/// 由共享密钥派生入站凭证
pub fn api_key_for(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// 预先计算好的期望凭证
#[derive(Debug, Clone)]
pub struct ApiKeyVerifier {
    expected: Option<String>,
}

impl ApiKeyVerifier {
    /// 密钥为空时拒绝所有请求
    pub fn new(secret: &str) -> Self {
        if secret.is_empty() {
            warn!("未配置 api_secret，所有入站请求都将被拒绝");
            return Self { expected: None };
        }
        Self {
            expected: Some(api_key_for(secret)),
        }
    }

    pub fn verify(&self, credential: Option<&str>) -> bool {
        match (&self.expected, credential) {
            (Some(expected), Some(given)) => {
                bool::from(expected.as_bytes().ct_eq(given.trim().as_bytes()))
            }
            _ => false,
        }
    }
}
