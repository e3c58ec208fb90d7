//! 金额字段处理
//!
//! 远端计费依赖「截断」而非「四舍五入」：有小数部分时截断到两位小数，
//! 整数值原样保留为数字（不转成定点字符串）。

use serde_json::{Number, Value};

/// 截断到两位小数（向零截断）
///
/// 按十进制字符串截断，避免 `19.99 * 100` 之类的二进制误差。
pub fn truncate_2dp(value: f64) -> f64 {
    if !value.is_finite() || value.fract() == 0.0 {
        return value;
    }
    let repr = value.to_string();
    let truncated = match repr.find('.') {
        Some(dot) => &repr[..(dot + 3).min(repr.len())],
        None => repr.as_str(),
    };
    truncated.parse().unwrap_or(value)
}

/// 对 JSON 金额值应用截断；非数字值原样返回
pub fn truncate_money(value: &Value) -> Value {
    match value {
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return value.clone();
            }
            match n.as_f64() {
                Some(f) if f.fract() != 0.0 => number(truncate_2dp(f)),
                _ => value.clone(),
            }
        }
        // 商城库中金额常以字符串存储
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Value::from(f as i64)
            }
            Ok(f) if f.is_finite() => number(truncate_2dp(f)),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

fn number(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}
