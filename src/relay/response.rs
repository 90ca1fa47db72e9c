//! # 响应转发与用量提取
//!
//! 流式响应逐块写回客户端，同时用 SSE 解码器提取 token 用量；
//! 非流式响应完整读取后按上游状态码写回。

use crate::error::Result;
use crate::{ldebug, lwarn};
use crate::logging::{LogComponent, LogStage};
use crate::relay::context::{ClientContext, RelayContext};
use crate::relay::request::UpstreamResponse;
use crate::utils::event_stream::SseDecoder;
use axum::http::{HeaderMap, header};
use bytes::BytesMut;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

fn token_field(usage: &Value, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| usage.get(*name).and_then(Value::as_u64))
}

impl Usage {
    /// 从响应 JSON 中读取用量，兼容 OpenAI 与 Claude 字段
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let usage = value
            .get("usage")
            .or_else(|| value.get("message").and_then(|m| m.get("usage")))
            .filter(|u| u.is_object())?;

        let prompt = token_field(usage, &["prompt_tokens", "input_tokens"]).unwrap_or(0);
        let completion = token_field(usage, &["completion_tokens", "output_tokens"]).unwrap_or(0);
        let total = token_field(usage, &["total_tokens"]).unwrap_or(prompt + completion);
        Some(Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
        })
    }

    /// 合并流式事件中的用量：非零字段覆盖，总数按需重算
    pub fn merge(&mut self, other: Self) {
        if other.prompt_tokens > 0 {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens > 0 {
            self.completion_tokens = other.completion_tokens;
        }
        self.total_tokens = other
            .total_tokens
            .max(self.prompt_tokens + self.completion_tokens);
    }
}

/// 从上游头中挑出需要回传给客户端的
fn forwarded_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in [header::CONTENT_TYPE, header::CACHE_CONTROL] {
        if let Some(value) = upstream.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    for (name, value) in upstream {
        let lower = name.as_str();
        if lower.starts_with("x-request-id") || lower.starts_with("request-id") || lower.starts_with("x-ratelimit") {
            headers.insert(name.clone(), value.clone());
        }
    }
    headers
}

/// 转发上游响应并返回用量
pub async fn relay_response(
    client: &ClientContext,
    ctx: &RelayContext,
    response: UpstreamResponse,
) -> Result<Usage> {
    let writer = client.writer();
    writer
        .write_head(response.status, forwarded_headers(&response.headers))
        .await;

    let usage = if response.is_event_stream() {
        relay_stream(client, ctx, response).await?
    } else {
        let body = response.into_bytes().await?;
        let usage = serde_json::from_slice::<Value>(&body)
            .ok()
            .as_ref()
            .and_then(Usage::from_value)
            .unwrap_or_default();
        writer.write(body).await?;
        usage
    };

    ldebug!(
        ctx.request_id(),
        LogStage::Response,
        LogComponent::Adaptor,
        "response_relayed",
        "响应转发完成",
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens
    );
    Ok(usage)
}

async fn relay_stream(client: &ClientContext, ctx: &RelayContext, response: UpstreamResponse) -> Result<Usage> {
    let writer = client.writer();
    let mut decoder = SseDecoder::new();
    let mut pending = BytesMut::new();
    let mut usage = Usage::default();
    let mut stream = response.into_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        pending.extend_from_slice(&chunk);
        writer.write(chunk).await?;
        let drained = decoder.drain(&mut pending);
        if drained.invalid_lines > 0 {
            lwarn!(
                ctx.request_id(),
                LogStage::Response,
                LogComponent::Adaptor,
                "sse_invalid_lines",
                "上游 SSE 含无法解码的行，已跳过",
                invalid_lines = drained.invalid_lines
            );
        }
        for event in drained.events {
            if let Some(found) = Usage::from_value(&event.data) {
                usage.merge(found);
            }
        }
    }
    Ok(usage)
}
