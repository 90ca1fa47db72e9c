//! Claude Code（OAuth）适配器
//!
//! 与 Claude 相同的子模式规则，区别在于 Bearer 鉴权、`?beta=true` 以及必带的 OAuth beta 标记。

use super::claude::{ClaudeRequestMode, anthropic_version, claude_url, passthrough_claude};
use super::header_value;
use crate::error::Result;
use crate::ldebug;
use crate::logging::{LogComponent, LogStage};
use crate::relay::adaptor::Adaptor;
use crate::relay::context::{ClientContext, RelayContext};
use crate::relay::dispatcher::setup_api_request_header;
use crate::relay::dto::ClaudeRequest;
use crate::relay::request::UpstreamResponse;
use crate::relay::response::{Usage, relay_response};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use serde_json::Value;

pub const CHANNEL_NAME: &str = "claude_code";
pub const OAUTH_BETA: &str = "oauth-2025-04-20";
const DEFAULT_USER_AGENT: &str = "claude-code-proxy/1.0";

const MODEL_LIST: &[&str] = &[
    "claude-sonnet-4-5-20250929",
    "claude-opus-4-5-20251101",
    "claude-haiku-4-5-20251001",
];

/// 保证 beta 列表包含 OAuth 标记（只在缺失时前置一次）
#[must_use]
pub fn with_oauth_beta(client_beta: Option<&str>) -> String {
    match client_beta.map(str::trim).filter(|v| !v.is_empty()) {
        Some(beta) if beta.contains(OAUTH_BETA) => beta.to_string(),
        Some(beta) => format!("{OAUTH_BETA},{beta}"),
        None => OAUTH_BETA.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeCodeAdaptor {
    request_mode: ClaudeRequestMode,
}

#[async_trait]
impl Adaptor for ClaudeCodeAdaptor {
    fn init(&mut self, ctx: &RelayContext) {
        self.request_mode = ClaudeRequestMode::for_model(&ctx.upstream_model_name);
    }

    fn get_request_url(&self, ctx: &RelayContext) -> Result<String> {
        Ok(format!("{}?beta=true", claude_url(ctx, self.request_mode)?))
    }

    fn setup_request_header(
        &self,
        client: &ClientContext,
        headers: &mut HeaderMap,
        ctx: &RelayContext,
    ) -> Result<()> {
        setup_api_request_header(ctx, client, headers);

        headers.insert(
            header::AUTHORIZATION,
            header_value("authorization", &format!("Bearer {}", ctx.api_key()))?,
        );
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            header_value("anthropic-version", anthropic_version(client))?,
        );
        headers.insert(
            HeaderName::from_static("anthropic-beta"),
            header_value("anthropic-beta", &with_oauth_beta(client.header("anthropic-beta")))?,
        );
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }

        ldebug!(
            ctx.request_id(),
            LogStage::RequestModify,
            LogComponent::ClaudeAdaptor,
            "claude_code_headers_set",
            "Claude Code 请求头设置完成",
            request_mode = ?self.request_mode
        );
        Ok(())
    }

    fn convert_claude_request(&self, ctx: &RelayContext, request: ClaudeRequest) -> Result<Value> {
        passthrough_claude(ctx, request)
    }

    async fn do_response(
        &self,
        client: &ClientContext,
        ctx: &RelayContext,
        response: UpstreamResponse,
    ) -> Result<Usage> {
        relay_response(client, ctx, response).await
    }

    fn get_model_list(&self) -> Vec<String> {
        MODEL_LIST.iter().map(ToString::to_string).collect()
    }

    fn get_channel_name(&self) -> &'static str {
        CHANNEL_NAME
    }
}
