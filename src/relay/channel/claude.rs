//! Claude 适配器
//!
//! `claude-2*` / `claude-instant*` 走旧版 `/v1/complete`，其余模型走 `/v1/messages`。

use super::header_value;
use crate::error::Result;
use crate::{ldebug, request_build_error};
use crate::logging::{LogComponent, LogStage};
use crate::relay::adaptor::Adaptor;
use crate::relay::context::{ClientContext, RelayContext};
use crate::relay::dispatcher::setup_api_request_header;
use crate::relay::dto::ClaudeRequest;
use crate::relay::request::UpstreamResponse;
use crate::relay::response::{Usage, relay_response};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName};
use serde_json::Value;

pub const CHANNEL_NAME: &str = "claude";
/// 客户端未指定时使用的 API 版本
pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

const MODEL_LIST: &[&str] = &[
    "claude-3-5-haiku-20241022",
    "claude-3-5-sonnet-20241022",
    "claude-3-7-sonnet-20250219",
    "claude-sonnet-4-20250514",
    "claude-opus-4-20250514",
    "claude-sonnet-4-5-20250929",
];

/// Claude 请求子模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClaudeRequestMode {
    #[default]
    Message,
    Completion,
}

impl ClaudeRequestMode {
    /// 按上游模型名确定子模式
    #[must_use]
    pub fn for_model(model: &str) -> Self {
        if model.starts_with("claude-2") || model.starts_with("claude-instant") {
            Self::Completion
        } else {
            Self::Message
        }
    }

    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Message => "/v1/messages",
            Self::Completion => "/v1/complete",
        }
    }
}

/// 拼接 Claude 接口地址
pub(crate) fn claude_url(ctx: &RelayContext, mode: ClaudeRequestMode) -> Result<String> {
    let base = ctx.base_url().trim_end_matches('/');
    if base.is_empty() {
        return Err(request_build_error!("channel {} has no base url", ctx.channel_id()));
    }
    Ok(format!("{base}{}", mode.path()))
}

/// 客户端 `anthropic-version`，缺省为固定版本
pub(crate) fn anthropic_version(client: &ClientContext) -> &str {
    client
        .header("anthropic-version")
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(DEFAULT_ANTHROPIC_VERSION)
}

/// 透传 Claude 原生请求，只替换模型名
pub(crate) fn passthrough_claude(ctx: &RelayContext, mut request: ClaudeRequest) -> Result<Value> {
    if !ctx.upstream_model_name.is_empty() {
        request.model.clone_from(&ctx.upstream_model_name);
    }
    Ok(serde_json::to_value(request)?)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeAdaptor {
    request_mode: ClaudeRequestMode,
}

impl ClaudeAdaptor {
    #[must_use]
    pub const fn request_mode(&self) -> ClaudeRequestMode {
        self.request_mode
    }
}

#[async_trait]
impl Adaptor for ClaudeAdaptor {
    fn init(&mut self, ctx: &RelayContext) {
        self.request_mode = ClaudeRequestMode::for_model(&ctx.upstream_model_name);
    }

    fn get_request_url(&self, ctx: &RelayContext) -> Result<String> {
        claude_url(ctx, self.request_mode)
    }

    fn setup_request_header(
        &self,
        client: &ClientContext,
        headers: &mut HeaderMap,
        ctx: &RelayContext,
    ) -> Result<()> {
        setup_api_request_header(ctx, client, headers);
        headers.insert(
            HeaderName::from_static("x-api-key"),
            header_value("x-api-key", ctx.api_key())?,
        );
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            header_value("anthropic-version", anthropic_version(client))?,
        );
        if let Some(beta) = client.header("anthropic-beta").filter(|v| !v.trim().is_empty()) {
            headers.insert(
                HeaderName::from_static("anthropic-beta"),
                header_value("anthropic-beta", beta)?,
            );
        }

        ldebug!(
            ctx.request_id(),
            LogStage::RequestModify,
            LogComponent::ClaudeAdaptor,
            "claude_headers_set",
            "Claude 请求头设置完成",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelType;
    use crate::error::RelayError;
    use crate::relay::context::{ChannelBinding, RelayMode};
    use crate::relay::dto::GeneralOpenAIRequest;
    use crate::relay::writer::ResponseWriter;
    use axum::http::{HeaderValue, Method, Uri};
    use rstest::rstest;
    use tokio_util::sync::CancellationToken;

    fn ctx(model: &str) -> RelayContext {
        RelayContext::new(
            ChannelBinding::new(14, ChannelType::Claude, "https://api.anthropic.com/"),
            "sk-ant-api03-xyz",
            RelayMode::ChatCompletions,
        )
        .with_model(model)
    }

    fn client(headers: HeaderMap) -> ClientContext {
        let (writer, _rx) = ResponseWriter::channel(1);
        ClientContext::new(Method::POST, Uri::from_static("/v1/messages"), headers, writer, CancellationToken::new())
    }

    #[rstest]
    #[case("claude-2.1", ClaudeRequestMode::Completion, "https://api.anthropic.com/v1/complete")]
    #[case("claude-instant-1.2", ClaudeRequestMode::Completion, "https://api.anthropic.com/v1/complete")]
    #[case("claude-3-5-sonnet-20241022", ClaudeRequestMode::Message, "https://api.anthropic.com/v1/messages")]
    fn init_selects_sub_mode(#[case] model: &str, #[case] mode: ClaudeRequestMode, #[case] url: &str) {
        let ctx = ctx(model);
        let mut adaptor = ClaudeAdaptor::default();
        adaptor.init(&ctx);
        adaptor.init(&ctx);
        assert_eq!(adaptor.request_mode(), mode);
        assert_eq!(adaptor.get_request_url(&ctx).unwrap(), url);
    }

    #[test]
    fn headers_use_api_key_and_default_version() {
        let mut inbound = HeaderMap::new();
        inbound.insert("anthropic-beta", HeaderValue::from_static("prompt-caching-2024-07-31"));
        let mut out = HeaderMap::new();
        ClaudeAdaptor::default()
            .setup_request_header(&client(inbound), &mut out, &ctx("claude-3-haiku"))
            .unwrap();
        assert_eq!(out["x-api-key"], "sk-ant-api03-xyz");
        assert_eq!(out["anthropic-version"], DEFAULT_ANTHROPIC_VERSION);
        assert_eq!(out["anthropic-beta"], "prompt-caching-2024-07-31");
        assert!(out.get("authorization").is_none());
    }

    #[test]
    fn claude_request_passes_through_with_upstream_model() {
        let mut ctx = ctx("claude-3-haiku");
        ctx.upstream_model_name = "claude-3-haiku-20240307".to_string();
        let request: ClaudeRequest =
            serde_json::from_str(r#"{"model":"claude-3-haiku","max_tokens":8,"messages":[]}"#).unwrap();
        let converted = ClaudeAdaptor::default().convert_claude_request(&ctx, request).unwrap();
        assert_eq!(converted["model"], "claude-3-haiku-20240307");
        assert_eq!(converted["max_tokens"], 8);
    }

    #[test]
    fn openai_conversion_is_not_implemented() {
        let err = ClaudeAdaptor::default()
            .convert_openai_request(&ctx("claude-3-haiku"), GeneralOpenAIRequest::default())
            .unwrap_err();
        assert!(matches!(err, RelayError::NotImplemented { .. }));
    }
}
