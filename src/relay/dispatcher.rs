//! # 请求分发器
//!
//! 四个入口共享同一个执行骨架：
//! 构建 URL → 适配器设置请求头 → 应用渠道覆盖 → 执行传输。
//!
//! - JSON 调用：调试模式下缓冲请求体用于日志，再以等价的请求体继续
//! - 表单调用：在适配器设置请求头之前复制入站 `Content-Type`（保留 multipart boundary）
//! - WebSocket 调用：同样的请求头流程，最后握手而不是发 HTTP 请求
//! - 任务调用：使用任务适配器自己的 URL / 请求头构建，并附带请求体重放函数
//!
//! 流式请求在发出前设置 SSE 响应头并启动心跳，心跳在本次调用返回时停止。

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::relay::adaptor::{Adaptor, TaskAdaptor};
use crate::relay::context::{ClientContext, RelayContext};
use crate::relay::debug_log;
use crate::relay::header_override::{apply_header_override, resolve_header_override};
use crate::relay::http_client::HttpClientPool;
use crate::relay::keepalive::{HeartbeatSink, KeepAliveConfig, PingGuard, start_keepalive};
use crate::relay::request::{RequestBody, UpstreamRequest, UpstreamResponse};
use crate::{ldebug, lerror, linfo};
use axum::http::{HeaderMap, HeaderValue, header};
use bytes::Bytes;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// 上游 WebSocket 连接
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 分发选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// 记录出站请求/响应详情
    pub debug: bool,
    pub ping_enabled: bool,
    pub keepalive: KeepAliveConfig,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            debug: false,
            ping_enabled: true,
            keepalive: KeepAliveConfig::default(),
        }
    }
}

impl DispatchOptions {
    #[must_use]
    pub fn from_relay(relay: &RelayConfig) -> Self {
        Self {
            debug: relay.debug,
            ping_enabled: relay.ping_interval_enabled,
            keepalive: KeepAliveConfig::from_relay(relay),
        }
    }
}

/// 请求分发器
#[derive(Debug)]
pub struct Dispatcher {
    options: DispatchOptions,
    clients: HttpClientPool,
}

/// 通用请求头：非音频、非实时模式下复制入站 `Content-Type` / `Accept`
pub fn setup_api_request_header(ctx: &RelayContext, client: &ClientContext, headers: &mut HeaderMap) {
    if ctx.relay_mode.is_audio() || ctx.relay_mode == crate::relay::context::RelayMode::Realtime {
        return;
    }
    if let Some(content_type) = client.headers.get(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, content_type.clone());
    }
    match client.headers.get(header::ACCEPT) {
        Some(accept) if !accept.is_empty() => {
            headers.insert(header::ACCEPT, accept.clone());
        }
        _ if ctx.is_stream => {
            headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        }
        _ => {}
    }
}

impl Dispatcher {
    #[must_use]
    pub const fn new(options: DispatchOptions, clients: HttpClientPool) -> Self {
        Self { options, clients }
    }

    /// 按中继配置创建
    pub fn from_config(relay: &RelayConfig) -> Result<Self> {
        let clients = HttpClientPool::new(relay.request_timeout())?;
        Ok(Self::new(DispatchOptions::from_relay(relay), clients))
    }

    #[must_use]
    pub const fn options(&self) -> &DispatchOptions {
        &self.options
    }

    #[must_use]
    pub const fn clients(&self) -> &HttpClientPool {
        &self.clients
    }

    /// JSON API 调用
    pub async fn do_api_request<A: Adaptor + ?Sized>(
        &self,
        adaptor: &A,
        client: &ClientContext,
        ctx: &RelayContext,
        body: RequestBody,
    ) -> Result<UpstreamResponse> {
        let url = adaptor.get_request_url(ctx).map_err(|e| build_error("get request url failed", e))?;

        // 调试模式下缓冲请求体，换成等价的可重读请求体
        let (body, logged_body) = if self.options.debug {
            let bytes = body.buffer().await?;
            (RequestBody::Bytes(bytes.clone()), Some(bytes))
        } else {
            (body, None)
        };

        if self.options.debug {
            debug_log::log_request_url(ctx, &client.method, &url);
        }

        let mut request = UpstreamRequest::new(client.method.clone(), &url, body)?;
        adaptor
            .setup_request_header(client, &mut request.headers, ctx)
            .map_err(|e| build_error("setup request header failed", e))?;
        self.apply_override(client, ctx, &mut request)?;

        if self.options.debug {
            debug_log::log_request_details(ctx, &request.headers, logged_body.as_deref());
        }

        let response = self.do_request(client, ctx, request).await?;
        if self.options.debug {
            return self.log_response(ctx, response).await;
        }
        Ok(response)
    }

    /// multipart 表单调用
    pub async fn do_form_request<A: Adaptor + ?Sized>(
        &self,
        adaptor: &A,
        client: &ClientContext,
        ctx: &RelayContext,
        body: RequestBody,
    ) -> Result<UpstreamResponse> {
        let url = adaptor.get_request_url(ctx).map_err(|e| build_error("get request url failed", e))?;
        if self.options.debug {
            debug_log::log_request_url(ctx, &client.method, &url);
        }

        let mut request = UpstreamRequest::new(client.method.clone(), &url, body)?;
        if let Some(content_type) = client.headers.get(header::CONTENT_TYPE) {
            request.headers.insert(header::CONTENT_TYPE, content_type.clone());
        }
        adaptor
            .setup_request_header(client, &mut request.headers, ctx)
            .map_err(|e| build_error("setup request header failed", e))?;
        self.apply_override(client, ctx, &mut request)?;

        self.do_request(client, ctx, request).await
    }

    /// 构建 WebSocket 握手的目标 URL 与请求头
    pub fn build_wss_request<A: Adaptor + ?Sized>(
        &self,
        adaptor: &A,
        client: &ClientContext,
        ctx: &RelayContext,
    ) -> Result<(String, HeaderMap)> {
        let url = adaptor.get_request_url(ctx).map_err(|e| build_error("get request url failed", e))?;
        let mut headers = HeaderMap::new();
        adaptor
            .setup_request_header(client, &mut headers, ctx)
            .map_err(|e| build_error("setup request header failed", e))?;

        let resolved = resolve_header_override(ctx.headers_override(), ctx.api_key(), &client.headers)?;
        apply_header_override(&mut headers, &resolved, ctx.request_id())?;
        if let Some(content_type) = client.headers.get(header::CONTENT_TYPE) {
            headers.insert(header::CONTENT_TYPE, content_type.clone());
        }
        Ok((url, headers))
    }

    /// WebSocket 调用；握手失败对本次请求不可重试
    pub async fn do_wss_request<A: Adaptor + ?Sized>(
        &self,
        adaptor: &A,
        client: &ClientContext,
        ctx: &RelayContext,
    ) -> Result<UpstreamSocket> {
        let (url, headers) = self.build_wss_request(adaptor, client, ctx)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::websocket_dial(url.clone(), e))?;
        for (name, value) in &headers {
            request.headers_mut().insert(name.clone(), value.clone());
        }

        match tokio_tungstenite::connect_async(request).await {
            Ok((socket, _response)) => {
                linfo!(
                    ctx.request_id(),
                    LogStage::UpstreamRequest,
                    LogComponent::Dispatcher,
                    "wss_connected",
                    "上游 WebSocket 已连接",
                    channel_id = ctx.channel_id()
                );
                Ok(socket)
            }
            Err(e) => {
                lerror!(
                    ctx.request_id(),
                    LogStage::UpstreamRequest,
                    LogComponent::Dispatcher,
                    "wss_dial_failed",
                    &format!("dial failed to {url}"),
                    error = %e
                );
                Err(RelayError::websocket_dial(url, e))
            }
        }
    }

    /// 异步任务提交；不应用渠道覆盖，附带请求体重放
    pub async fn do_task_api_request<A: TaskAdaptor + ?Sized>(
        &self,
        adaptor: &A,
        client: &ClientContext,
        ctx: &RelayContext,
        body: Bytes,
    ) -> Result<UpstreamResponse> {
        let url = adaptor.build_request_url(ctx)?;
        let replay = body.clone();
        let mut request = UpstreamRequest::new(client.method.clone(), &url, RequestBody::Bytes(body))?
            .with_rewind(Arc::new(move || RequestBody::Bytes(replay.clone())));
        adaptor
            .build_request_header(client, &mut request, ctx)
            .map_err(|e| build_error("setup request header failed", e))?;

        self.do_request(client, ctx, request).await
    }

    /// HTTP 传输：选择客户端，流式请求启动心跳，执行请求
    pub async fn do_request(
        &self,
        client: &ClientContext,
        ctx: &RelayContext,
        request: UpstreamRequest,
    ) -> Result<UpstreamResponse> {
        let http = self.clients.client_for(ctx.proxy())?;

        let ping_guard = if ctx.is_stream {
            client.writer().set_event_stream_headers().await;
            self.start_ping(client, ctx)
        } else {
            None
        };

        let rewindable = request.is_rewindable();
        let request = request.into_reqwest(&http)?;
        let outcome = tokio::select! {
            result = http.execute(request) => Some(result),
            () = client.cancellation().cancelled() => None,
        };
        // 停止心跳后才把响应交给调用方
        drop(ping_guard);

        match outcome {
            Some(Ok(response)) => {
                ldebug!(
                    ctx.request_id(),
                    LogStage::Response,
                    LogComponent::Dispatcher,
                    "upstream_responded",
                    "上游已响应",
                    status = response.status().as_u16()
                );
                Ok(UpstreamResponse::from_reqwest(response))
            }
            Some(Err(e)) => {
                lerror!(
                    ctx.request_id(),
                    LogStage::UpstreamRequest,
                    LogComponent::Dispatcher,
                    "do_request_failed",
                    "do request failed",
                    channel_id = ctx.channel_id(),
                    rewindable = rewindable,
                    error = %e
                );
                Err(RelayError::do_request_failed("do request failed", e))
            }
            None => Err(RelayError::ClientClosed),
        }
    }

    fn start_ping(&self, client: &ClientContext, ctx: &RelayContext) -> Option<PingGuard> {
        if !self.options.ping_enabled || ctx.disable_ping {
            return None;
        }
        let sink: Arc<dyn HeartbeatSink> = client.writer().clone();
        Some(start_keepalive(
            sink,
            client.cancellation().clone(),
            self.options.keepalive,
            ctx.request_id(),
        ))
    }

    fn apply_override(&self, client: &ClientContext, ctx: &RelayContext, request: &mut UpstreamRequest) -> Result<()> {
        let resolved = resolve_header_override(ctx.headers_override(), ctx.api_key(), &client.headers)?;
        if let Some(host) = apply_header_override(&mut request.headers, &resolved, ctx.request_id())? {
            request.host = Some(host);
        }
        Ok(())
    }

    async fn log_response(&self, ctx: &RelayContext, response: UpstreamResponse) -> Result<UpstreamResponse> {
        debug_log::log_response_head(ctx, response.status, &response.headers);
        if ctx.is_stream || response.status.as_u16() < 400 {
            return Ok(response);
        }
        // 只记录错误响应体，读完后重新挂回
        let (response, body) = response.buffer_body().await?;
        debug_log::log_error_body(ctx, &body);
        Ok(response)
    }
}

/// 适配器构建失败包装为请求构建错误；配置类错误保持原样
fn build_error(context: &'static str, err: RelayError) -> RelayError {
    if err.is_configuration() || matches!(err.root(), RelayError::RequestBuild { .. }) {
        return err;
    }
    RelayError::request_build_with_source(context, err)
}
