//! # 调试诊断日志
//!
//! 仅在 `relay.debug` 打开时使用。凭证类请求头脱敏，正文超过 2000 字符截断。

use crate::linfo;
use crate::logging::{LogComponent, LogStage};
use crate::relay::context::RelayContext;
use axum::http::{HeaderMap, Method, StatusCode};
use std::fmt::Write as _;

/// 日志中正文的最大字符数
pub const MAX_LOGGED_BODY_CHARS: usize = 2000;
const TRUNCATED_SUFFIX: &str = "...[truncated]";

/// 是否为携带凭证的请求头
#[must_use]
pub fn is_sensitive_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "authorization" || name == "proxy-authorization" || name.contains("api-key")
}

/// 凭证脱敏：长于 20 字符保留前 10 后 5，否则整体遮盖
#[must_use]
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..10].iter().collect();
        let tail: String = chars[chars.len() - 5..].iter().collect();
        format!("{head}***{tail}")
    } else {
        "***masked***".to_string()
    }
}

/// 截断过长正文
#[must_use]
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_LOGGED_BODY_CHARS) {
        Some((cut, _)) => format!("{}{TRUNCATED_SUFFIX}", &body[..cut]),
        None => body.to_string(),
    }
}

/// 渲染请求头并脱敏
///
/// 凭证类请求头整体脱敏；其余请求头中出现的渠道凭证（例如经 `{api_key}`
/// 覆盖写入自定义请求头）也会被替换为脱敏值。
#[must_use]
pub fn render_headers(headers: &HeaderMap, credential: &str) -> String {
    let credential = credential.trim();
    let mut out = String::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        let value = if is_sensitive_header(name.as_str()) {
            mask_secret(&value)
        } else if !credential.is_empty() && value.contains(credential) {
            value.replace(credential, &mask_secret(credential))
        } else {
            value.into_owned()
        };
        let _ = writeln!(out, "{name}: {value}");
    }
    out
}

pub fn log_request_url(ctx: &RelayContext, method: &Method, url: &str) {
    linfo!(
        ctx.request_id(),
        LogStage::UpstreamRequest,
        LogComponent::Dispatcher,
        "relay_request_url",
        &format!("[RELAY REQUEST] URL: {method} {url}")
    );
}

pub fn log_request_details(ctx: &RelayContext, headers: &HeaderMap, body: Option<&[u8]>) {
    linfo!(
        ctx.request_id(),
        LogStage::UpstreamRequest,
        LogComponent::Dispatcher,
        "relay_request_headers",
        &format!(
            "[RELAY REQUEST] Channel: {} ({}) Model: {}\n[RELAY REQUEST] Headers:\n{}",
            ctx.channel_id(),
            ctx.channel_type().display_name(),
            ctx.upstream_model_name,
            render_headers(headers, ctx.api_key())
        )
    );

    if let Some(body) = body.filter(|b| !b.is_empty()) {
        linfo!(
            ctx.request_id(),
            LogStage::UpstreamRequest,
            LogComponent::Dispatcher,
            "relay_request_body",
            &format!(
                "[RELAY REQUEST] Body: {}",
                truncate_body(&String::from_utf8_lossy(body))
            )
        );
    }
}

pub fn log_response_head(ctx: &RelayContext, status: StatusCode, headers: &HeaderMap) {
    linfo!(
        ctx.request_id(),
        LogStage::Response,
        LogComponent::Dispatcher,
        "relay_response_status",
        &format!("[RELAY RESPONSE] Status: {status}")
    );
    linfo!(
        ctx.request_id(),
        LogStage::Response,
        LogComponent::Dispatcher,
        "relay_response_headers",
        &format!("[RELAY RESPONSE] Headers:\n{}", render_headers(headers, ctx.api_key()))
    );
}

pub fn log_error_body(ctx: &RelayContext, body: &[u8]) {
    linfo!(
        ctx.request_id(),
        LogStage::ResponseFailure,
        LogComponent::Dispatcher,
        "relay_response_error_body",
        &format!(
            "[RELAY RESPONSE] Error Body: {}",
            truncate_body(&String::from_utf8_lossy(body))
        )
    );
}
