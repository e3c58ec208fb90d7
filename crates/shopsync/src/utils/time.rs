//! 时间处理工具模块
//!
//! # 设计原则
//!
//! - **存储层 / 业务层**: 统一使用 `DateTime<Utc>`
//! - **入站参数**: 远端平台传入的 `last_update` 可能带引号、可能不带时区，统一在这里归一化
//! - **出站**: RFC 3339，秒精度

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{Result, SyncError};

/// 去掉首尾空白和包裹的引号（单引号或双引号，可多层）
pub fn strip_quotes(raw: &str) -> &str {
    raw.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

/// 解析 `last_update` 参数
///
/// 支持：
/// - RFC 3339 / ISO 8601（`2024-05-01T10:00:00Z`、`2024-05-01T10:00:00+02:00`）
/// - 商城数据库格式（`2024-05-01 10:00:00`，按 UTC 处理）
/// - 纯日期（`2024-05-01`，当天 00:00:00 UTC）
pub fn parse_last_update(raw: &str) -> Result<DateTime<Utc>> {
    let value = strip_quotes(raw);
    if value.is_empty() {
        return Err(SyncError::InvalidInput("last_update is empty".to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(SyncError::InvalidInput(format!(
        "last_update {} is not a valid timestamp",
        value
    )))
}

/// 出站时间格式
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}
