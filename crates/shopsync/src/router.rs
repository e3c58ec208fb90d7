//! 入站请求路由
//!
//! 与传输层无关：输入为凭证、运行 id 与原始请求体，输出为 [`RouterResponse`]
//! （HTTP 状态码 + JSON 体），由服务端绑定直接映射为 HTTP 响应。
//!
//! 鉴权与参数校验失败时不修改任何状态。

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::auth::ApiKeyVerifier;
use crate::error::SyncError;
use crate::service::SyncService;
use crate::sync::{normalize_ids, AcceptRequest, EntityType, GlobalState, TypeProgressPatch, TypeStatus};
use crate::utils::{parse_last_update, strip_quotes};

/// 路由结果
#[derive(Debug, Clone, PartialEq)]
pub struct RouterResponse {
    pub status: u16,
    pub body: Value,
}

impl RouterResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({"success": false, "message": message.into()}),
        }
    }

    fn unauthorized() -> Self {
        Self::failure(401, "Unauthorized")
    }
}

/// 解析后的同步请求
#[derive(Debug)]
struct TriggerPayload {
    entity_type: String,
    request: AcceptRequest,
}

pub struct RequestRouter {
    service: Arc<SyncService>,
    verifier: ApiKeyVerifier,
}

impl RequestRouter {
    pub fn new(service: Arc<SyncService>) -> Self {
        let verifier = ApiKeyVerifier::new(&service.config().api_secret);
        Self { service, verifier }
    }

    pub fn service(&self) -> &Arc<SyncService> {
        &self.service
    }

    /// POST 同步触发
    pub async fn handle_sync(
        &self,
        credential: Option<&str>,
        run_id: Option<&str>,
        body: &[u8],
    ) -> RouterResponse {
        if !self.verifier.verify(credential) {
            warn!("同步请求鉴权失败");
            return RouterResponse::unauthorized();
        }

        let payload = match parse_trigger(body, normalize_run_id(run_id)) {
            Ok(payload) => payload,
            Err(message) => {
                debug!("同步请求参数错误: {}", message);
                return RouterResponse::failure(400, message);
            }
        };

        let entity_type: EntityType = match payload.entity_type.parse() {
            Ok(entity_type) => entity_type,
            Err(_) => {
                info!("忽略未知实体类型: {}", payload.entity_type);
                return RouterResponse::ok(json!({
                    "success": false,
                    "message": format!("Unsupported type {}. ", payload.entity_type),
                }));
            }
        };
        if !self.service.supports(entity_type) {
            info!("实体类型未注册适配器: {}", entity_type);
            return RouterResponse::ok(json!({
                "success": false,
                "message": format!("Unsupported type {}. ", entity_type),
            }));
        }

        if entity_type.requires_segmentation() {
            match self.service.shop().segmentation_enabled().await {
                Ok(true) => {}
                Ok(false) => return self.skip_disabled_type(entity_type, &payload.request).await,
                Err(e) => return internal_error(e),
            }
        }

        match self.service.accept(entity_type, payload.request).await {
            Ok(outcome) if outcome.accepted => {
                RouterResponse::ok(json!({"success": true, "count": outcome.count}))
            }
            Ok(outcome) => RouterResponse::ok(json!({
                "success": false,
                "message": outcome.message.unwrap_or_default(),
            })),
            Err(e) if e.is_input_error() => RouterResponse::failure(400, e.to_string()),
            Err(e) => internal_error(e),
        }
    }

    /// 模块未启用：直接报告「完成，0 条」，不经过受理流程与运行锁
    async fn skip_disabled_type(&self, entity_type: EntityType, request: &AcceptRequest) -> RouterResponse {
        info!("客户分群模块未启用，跳过: type={}", entity_type);
        if let Some(run_id) = &request.run_id {
            let patch = TypeProgressPatch::status(TypeStatus::Completed).with_total(0);
            if let Err(e) = self.service.status_store().update_type(run_id, entity_type, patch).await {
                return internal_error(e);
            }
        }
        RouterResponse::ok(json!({"success": true, "count": 0}))
    }

    /// GET 会话状态
    pub async fn handle_status_get(&self, credential: Option<&str>, run_id: Option<&str>) -> RouterResponse {
        if !self.verifier.verify(credential) {
            return RouterResponse::unauthorized();
        }
        let Some(run_id) = normalize_run_id(run_id) else {
            return RouterResponse::unauthorized();
        };
        match self.service.status_store().get(&run_id).await {
            Ok(Some(run)) => match serde_json::to_value(&run) {
                Ok(body) => RouterResponse::ok(body),
                Err(e) => internal_error(e.into()),
            },
            Ok(None) => {
                debug!("未知的同步会话: {}", run_id);
                RouterResponse::unauthorized()
            }
            Err(e) => internal_error(e),
        }
    }

    /// POST 会话状态：只更新 global_state
    pub async fn handle_status_post(
        &self,
        credential: Option<&str>,
        run_id: Option<&str>,
        body: &[u8],
    ) -> RouterResponse {
        if !self.verifier.verify(credential) {
            return RouterResponse::unauthorized();
        }
        let Some(run_id) = normalize_run_id(run_id) else {
            return RouterResponse::unauthorized();
        };

        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => return RouterResponse::failure(400, format!("Invalid JSON payload: {}. ", e)),
        };
        let state: GlobalState = match value.get("status").and_then(Value::as_str).map(str::parse::<GlobalState>) {
            Some(Ok(state)) => state,
            Some(Err(_)) => return RouterResponse::failure(400, "status is invalid. "),
            None => return RouterResponse::failure(400, "status is required. "),
        };

        match self.service.status_store().set_global_state(&run_id, state).await {
            Ok(run) => {
                info!("同步会话状态已更新: run_id={}, state={:?}", run_id, run.global_state);
                RouterResponse::ok(json!({"success": true}))
            }
            Err(e) => internal_error(e),
        }
    }
}

fn normalize_run_id(run_id: Option<&str>) -> Option<String> {
    run_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn internal_error(e: SyncError) -> RouterResponse {
    error!("同步请求处理失败: {}", e);
    RouterResponse::failure(500, e.to_string())
}

/// 校验请求体，错误信息按字段拼接（每条以 ". " 结尾）
fn parse_trigger(body: &[u8], run_id: Option<String>) -> Result<TriggerPayload, String> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| format!("Invalid JSON payload: {}. ", e))?;
    // hmac 字段由远端附带，这里不校验
    let empty = Value::Object(Default::default());
    let data = value.get("data").filter(|d| d.is_object()).unwrap_or(&empty);

    let mut message = String::new();

    let entity_type = data
        .get("type")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if entity_type.is_empty() {
        message.push_str("type is required. ");
    }

    let last_update = match data.get("last_update") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) if strip_quotes(raw).is_empty() => None,
        Some(Value::String(raw)) => match parse_last_update(raw) {
            Ok(ts) => Some(ts),
            Err(_) => {
                message.push_str("last_update is invalid. ");
                None
            }
        },
        Some(_) => {
            message.push_str("last_update is invalid. ");
            None
        }
    };

    let ids = match normalize_ids(data.get("ids").unwrap_or(&Value::Null)) {
        Ok(ids) => ids,
        Err(_) => {
            message.push_str("ids is invalid. ");
            None
        }
    };

    let requested_by = data
        .get("requested-by")
        .or_else(|| data.get("requested_by"))
        .and_then(Value::as_str)
        .map(str::to_string);

    if !message.is_empty() {
        return Err(message);
    }
    Ok(TriggerPayload {
        entity_type,
        request: AcceptRequest {
            last_update,
            ids,
            requested_by,
            run_id,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_type_is_reported() {
        let err = parse_trigger(br#"{"data": {"ids": [1]}, "hmac": "x"}"#, None).unwrap_err();
        assert_eq!(err, "type is required. ");
        let err = parse_trigger(br#"{"hmac": "x"}"#, None).unwrap_err();
        assert_eq!(err, "type is required. ");
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = parse_trigger(b"{not json", None).unwrap_err();
        assert!(err.starts_with("Invalid JSON payload"));
    }

    #[test]
    fn fields_are_normalized() {
        let payload = parse_trigger(
            br#"{"data": {"type": "orders", "last_update": "\"2024-05-01 10:00:00\"", "ids": 0, "requested-by": "crm"}}"#,
            Some("r1".to_string()),
        )
        .unwrap();
        assert_eq!(payload.entity_type, "orders");
        assert_eq!(payload.request.ids, None);
        assert_eq!(payload.request.requested_by.as_deref(), Some("crm"));
        assert_eq!(payload.request.run_id.as_deref(), Some("r1"));
        assert_eq!(
            payload.request.last_update.map(|t| t.to_rfc3339()),
            Some("2024-05-01T10:00:00+00:00".to_string())
        );
    }

    #[test]
    fn invalid_fields_are_collected() {
        let err = parse_trigger(
            br#"{"data": {"type": "orders", "last_update": "yesterday", "ids": {"a": 1}}}"#,
            None,
        )
        .unwrap_err();
        assert_eq!(err, "last_update is invalid. ids is invalid. ");
    }

    #[test]
    fn run_id_header_is_trimmed() {
        assert_eq!(normalize_run_id(Some("  r1 ")), Some("r1".to_string()));
        assert_eq!(normalize_run_id(Some("  ")), None);
        assert_eq!(normalize_run_id(None), None);
    }
}
