//! # 渠道请求头覆盖
//!
//! 模板语言：
//! - `{api_key}`：替换为渠道凭证
//! - `{client_header:<name>}`：必须是整个模板值，取入站请求头 `<name>`；缺失或空白时不设置该头
//!
//! 覆盖在适配器设置请求头之后应用，因此可以替换适配器写入的任何头（包括 `Authorization`）。

use crate::error::{RelayError, Result};
use crate::ldebug;
use crate::logging::{LogComponent, LogStage};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const API_KEY_PLACEHOLDER: &str = "{api_key}";
const CLIENT_HEADER_PREFIX: &str = "{client_header:";

/// 展开后的覆盖结果：请求头名 -> 值
pub type ResolvedOverride = BTreeMap<String, String>;

/// 展开单个模板；`Ok(None)` 表示不设置该请求头
pub fn expand_template(template: &str, api_key: &str, client_headers: &HeaderMap) -> Result<Option<String>> {
    let trimmed = template.trim();

    if let Some(after_prefix) = trimmed.strip_prefix(CLIENT_HEADER_PREFIX) {
        let name = match after_prefix.find('}') {
            Some(end) if end == after_prefix.len() - 1 => after_prefix[..end].trim(),
            _ => {
                return Err(RelayError::header_override_invalid(format!(
                    "client_header placeholder must be the full value: {template:?}"
                )));
            }
        };
        if name.is_empty() {
            return Err(RelayError::header_override_invalid(format!(
                "client_header placeholder name is empty: {template:?}"
            )));
        }

        // 客户端内容原样使用，不做 {api_key} 替换
        return Ok(client_headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string));
    }

    if trimmed.contains(CLIENT_HEADER_PREFIX) {
        return Err(RelayError::header_override_invalid(format!(
            "client_header placeholder must be the full value: {template:?}"
        )));
    }

    let expanded = template.replace(API_KEY_PLACEHOLDER, api_key);
    if expanded.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(expanded))
}

/// 展开渠道的全部覆盖模板
pub fn resolve_header_override(
    templates: &Map<String, Value>,
    api_key: &str,
    client_headers: &HeaderMap,
) -> Result<ResolvedOverride> {
    let mut resolved = ResolvedOverride::new();
    for (name, value) in templates {
        let Some(template) = value.as_str() else {
            return Err(RelayError::header_override_invalid(format!(
                "header override value for {name:?} must be a string"
            )));
        };
        if let Some(value) = expand_template(template, api_key, client_headers)? {
            resolved.insert(name.clone(), value);
        }
    }
    Ok(resolved)
}

/// 把覆盖结果写入出站请求头；覆盖了 `Host` 时同时返回新的目标主机
pub fn apply_header_override(
    headers: &mut HeaderMap,
    resolved: &ResolvedOverride,
    request_id: &str,
) -> Result<Option<String>> {
    let mut host = None;
    for (name, value) in resolved {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            RelayError::header_override_invalid_with_source(format!("invalid header name: {name:?}"), e)
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            RelayError::header_override_invalid_with_source(format!("invalid value for header {name:?}"), e)
        })?;
        if header_name == header::HOST {
            host = Some(value.clone());
        }
        headers.insert(header_name, header_value);
    }

    if !resolved.is_empty() {
        ldebug!(
            request_id,
            LogStage::RequestModify,
            LogComponent::HeaderOverride,
            "header_override_applied",
            "已应用渠道请求头覆盖",
            names = ?resolved.keys().collect::<Vec<_>>()
        );
    }
    Ok(host)
}
