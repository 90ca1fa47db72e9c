//! # 适配器契约
//!
//! 每个上游厂商族实现一个 [`Adaptor`]。适配器在 `init` 中确定子模式，之后只读。
//! `setup_request_header` 不读写请求头覆盖模板，覆盖由分发器在其后单独应用。

use crate::error::{RelayError, Result};
use crate::relay::context::{ClientContext, RelayContext};
use crate::relay::dispatcher::Dispatcher;
use crate::relay::dto::{AudioRequest, ClaudeRequest, GeneralOpenAIRequest};
use crate::relay::request::{RequestBody, UpstreamRequest, UpstreamResponse};
use crate::relay::response::Usage;
use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::Bytes;
use serde_json::Value;

fn unsupported<T>(adaptor: &str, kind: &str) -> Result<T> {
    Err(RelayError::not_implemented(format!("{adaptor}: {kind} request")))
}

/// 上游适配器
#[async_trait]
pub trait Adaptor: Send + Sync {
    /// 按请求确定子模式，无 I/O，可重复调用
    fn init(&mut self, ctx: &RelayContext);

    /// 上游完整 URL
    fn get_request_url(&self, ctx: &RelayContext) -> Result<String>;

    /// 设置出站请求头（鉴权、内容协商、协议标记）
    fn setup_request_header(
        &self,
        client: &ClientContext,
        headers: &mut HeaderMap,
        ctx: &RelayContext,
    ) -> Result<()>;

    fn convert_openai_request(&self, _ctx: &RelayContext, _request: GeneralOpenAIRequest) -> Result<Value> {
        unsupported(self.get_channel_name(), "openai")
    }

    fn convert_claude_request(&self, _ctx: &RelayContext, _request: ClaudeRequest) -> Result<Value> {
        unsupported(self.get_channel_name(), "claude")
    }

    fn convert_gemini_request(&self, _ctx: &RelayContext, _request: Value) -> Result<Value> {
        unsupported(self.get_channel_name(), "gemini")
    }

    /// 音频请求以原始 multipart 正文转发
    fn convert_audio_request(&self, _ctx: &RelayContext, _request: &AudioRequest, _body: Bytes) -> Result<Bytes> {
        unsupported(self.get_channel_name(), "audio")
    }

    fn convert_image_request(&self, _ctx: &RelayContext, _request: Value) -> Result<Value> {
        unsupported(self.get_channel_name(), "image")
    }

    fn convert_embedding_request(&self, _ctx: &RelayContext, _request: Value) -> Result<Value> {
        unsupported(self.get_channel_name(), "embedding")
    }

    fn convert_rerank_request(&self, _ctx: &RelayContext, _request: Value) -> Result<Value> {
        unsupported(self.get_channel_name(), "rerank")
    }

    fn convert_responses_request(&self, _ctx: &RelayContext, _request: Value) -> Result<Value> {
        unsupported(self.get_channel_name(), "responses")
    }

    /// 通过分发器发送请求，默认走 JSON 调用
    async fn do_request(
        &self,
        dispatcher: &Dispatcher,
        client: &ClientContext,
        ctx: &RelayContext,
        body: RequestBody,
    ) -> Result<UpstreamResponse> {
        dispatcher.do_api_request(self, client, ctx, body).await
    }

    /// 把上游响应写回客户端并返回用量
    async fn do_response(
        &self,
        client: &ClientContext,
        ctx: &RelayContext,
        response: UpstreamResponse,
    ) -> Result<Usage>;

    fn get_model_list(&self) -> Vec<String>;

    fn get_channel_name(&self) -> &'static str;
}

/// 异步任务提交的适配器契约
#[async_trait]
pub trait TaskAdaptor: Send + Sync {
    fn init(&mut self, ctx: &RelayContext);

    fn build_request_url(&self, ctx: &RelayContext) -> Result<String>;

    /// 直接修改出站请求（头、目标主机），不应用渠道覆盖
    fn build_request_header(
        &self,
        client: &ClientContext,
        request: &mut UpstreamRequest,
        ctx: &RelayContext,
    ) -> Result<()>;

    async fn do_request(
        &self,
        dispatcher: &Dispatcher,
        client: &ClientContext,
        ctx: &RelayContext,
        body: Bytes,
    ) -> Result<UpstreamResponse> {
        dispatcher.do_task_api_request(self, client, ctx, body).await
    }

    fn get_model_list(&self) -> Vec<String>;

    fn get_channel_name(&self) -> &'static str;
}
