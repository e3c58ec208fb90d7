//! 版本元信息
//!
//! 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。

/// crate semver，来自 Cargo.toml
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 出站 User-Agent
pub fn user_agent() -> String {
    format!("shopsync/{}", SDK_VERSION)
}
