//! 默认记录格式化器
//!
//! 本地实体的 `fields` 原样输出，附加 id / 时间戳；
//! 多语言实体从 `fields.translations.{locale}` 合并该语言的字段并写入 `locale`；
//! 配置的金额字段截断到两位小数。

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::utils::{format_timestamp, truncate_money};
use super::adapter::{NativeEntity, RecordFormatter, WireRecord};

const TRANSLATIONS_KEY: &str = "translations";

#[derive(Debug, Clone, Default)]
pub struct JsonRecordFormatter {
    money_fields: HashSet<String>,
}

impl JsonRecordFormatter {
    pub fn new<I, S>(money_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            money_fields: money_fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl RecordFormatter for JsonRecordFormatter {
    fn format(&self, entity: &NativeEntity, locale: Option<&str>) -> Result<WireRecord> {
        let mut record = Map::new();
        record.insert("id".to_string(), Value::from(entity.id));
        if let Some(parent_id) = entity.parent_id {
            record.insert("parent_id".to_string(), Value::from(parent_id));
        }
        record.insert(
            "created_at".to_string(),
            Value::from(format_timestamp(&entity.created_at)),
        );
        record.insert(
            "updated_at".to_string(),
            Value::from(format_timestamp(&entity.updated_at)),
        );

        for (key, value) in &entity.fields {
            if key != TRANSLATIONS_KEY {
                record.insert(key.clone(), value.clone());
            }
        }

        if let Some(locale) = locale {
            record.insert("locale".to_string(), Value::from(locale));
            let translated = entity
                .fields
                .get(TRANSLATIONS_KEY)
                .and_then(|t| t.get(locale))
                .and_then(Value::as_object);
            if let Some(translated) = translated {
                for (key, value) in translated {
                    record.insert(key.clone(), value.clone());
                }
            }
        }

        for field in &self.money_fields {
            if let Some(value) = record.get_mut(field) {
                *value = truncate_money(value);
            }
        }

        Ok(Value::Object(record))
    }
}
