//! OpenAI 适配器
//!
//! 聊天走 JSON 调用，音频走 multipart 表单调用，实时接口使用 ws/wss 地址。

use super::header_value;
use crate::error::{RelayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, request_build_error};
use crate::relay::adaptor::Adaptor;
use crate::relay::context::{ClientContext, RelayContext, RelayMode};
use crate::relay::dispatcher::{Dispatcher, setup_api_request_header};
use crate::relay::dto::{AudioRequest, GeneralOpenAIRequest};
use crate::relay::request::{RequestBody, UpstreamResponse};
use crate::relay::response::{Usage, relay_response};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use bytes::Bytes;
use serde_json::Value;

pub const CHANNEL_NAME: &str = "openai";

const MODEL_LIST: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4.1",
    "o3-mini",
    "whisper-1",
    "gpt-4o-realtime-preview",
];

/// http(s) 地址换成 ws(s)
fn websocket_base(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAIAdaptor;

#[async_trait]
impl Adaptor for OpenAIAdaptor {
    fn init(&mut self, _ctx: &RelayContext) {}

    fn get_request_url(&self, ctx: &RelayContext) -> Result<String> {
        let base = ctx.base_url().trim_end_matches('/');
        if base.is_empty() {
            return Err(request_build_error!("channel {} has no base url", ctx.channel_id()));
        }
        let url = match ctx.relay_mode {
            RelayMode::ChatCompletions => format!("{base}/v1/chat/completions"),
            RelayMode::AudioTranscription => format!("{base}/v1/audio/transcriptions"),
            RelayMode::AudioTranslation => format!("{base}/v1/audio/translations"),
            RelayMode::Realtime => format!(
                "{}/v1/realtime?model={}",
                websocket_base(base),
                ctx.upstream_model_name
            ),
            RelayMode::Task => {
                return Err(RelayError::not_implemented("openai: task request"));
            }
        };
        Ok(url)
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
        if ctx.relay_mode == RelayMode::Realtime {
            headers.insert(HeaderName::from_static("openai-beta"), HeaderValue::from_static("realtime=v1"));
        }

        ldebug!(
            ctx.request_id(),
            LogStage::RequestModify,
            LogComponent::OpenAIAdaptor,
            "openai_headers_set",
            "OpenAI 请求头设置完成",
            relay_mode = %ctx.relay_mode
        );
        Ok(())
    }

    fn convert_openai_request(&self, ctx: &RelayContext, mut request: GeneralOpenAIRequest) -> Result<Value> {
        if !ctx.upstream_model_name.is_empty() {
            request.model.clone_from(&ctx.upstream_model_name);
        }
        Ok(serde_json::to_value(request)?)
    }

    fn convert_audio_request(&self, _ctx: &RelayContext, _request: &AudioRequest, body: Bytes) -> Result<Bytes> {
        Ok(body)
    }

    async fn do_request(
        &self,
        dispatcher: &Dispatcher,
        client: &ClientContext,
        ctx: &RelayContext,
        body: RequestBody,
    ) -> Result<UpstreamResponse> {
        if ctx.relay_mode.is_audio() {
            dispatcher.do_form_request(self, client, ctx, body).await
        } else {
            dispatcher.do_api_request(self, client, ctx, body).await
        }
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
