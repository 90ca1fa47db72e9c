//! # 中继 HTTP 服务
//!
//! 入站请求在这里完成模型解析、渠道与凭证选择，然后交给分发引擎。
//! 分发管线运行在隔离任务中，响应头一经提交就以流的形式返回给客户端。

use crate::cache::{Keyspace, Namespace};
use crate::channel::{ChannelType, FirstEnabledSelector, KeySelector, MultiKeyChannelState};
use crate::config::{AppConfig, ChannelConfig, ServerConfig};
use crate::error::{ErrorCategory, RelayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::relay::channel::get_adaptor;
use crate::relay::dto::{AudioRequest, ClaudeRequest, GeneralOpenAIRequest};
use crate::relay::{
    Adaptor, ChannelBinding, ClientContext, Dispatcher, RelayContext, RelayMode, RequestBody,
    ResponseReceiver, ResponseWriter,
};
use crate::utils::spawn_isolated;
use crate::{internal_error, ldebug, lerror, linfo, lwarn};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// 多密钥状态在键空间中的命名空间
pub const KEY_STATE_NAMESPACE: &str = "multi_key:v1";

/// 渠道表与各渠道的多密钥状态
pub struct ChannelRegistry {
    channels: Vec<ChannelConfig>,
    key_states: DashMap<String, MultiKeyChannelState>,
    namespace: Namespace,
    selector: Arc<dyn KeySelector>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new(channels: Vec<ChannelConfig>, keyspace: &Keyspace) -> Self {
        let namespace = keyspace.namespace(KEY_STATE_NAMESPACE);
        let key_states = DashMap::new();
        for channel in &channels {
            let keys = channel
                .keys
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            key_states.insert(
                namespace.full_key(&channel.id.to_string()),
                MultiKeyChannelState::new(keys, channel.key_mode),
            );
        }
        Self {
            channels,
            key_states,
            namespace,
            selector: Arc::new(FirstEnabledSelector),
        }
    }

    /// 替换凭证选择策略
    #[must_use]
    pub fn with_selector(mut self, selector: Arc<dyn KeySelector>) -> Self {
        self.selector = selector;
        self
    }

    /// 渠道多密钥状态的存储键
    #[must_use]
    pub fn state_key(&self, channel_id: i64) -> String {
        self.namespace.full_key(&channel_id.to_string())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// 按配置顺序选出第一个能服务该模型、接受该入站格式且还有可用凭证的渠道
    pub fn select<F>(&self, model: &str, accepts: F) -> Option<(&ChannelConfig, String)>
    where
        F: Fn(ChannelType) -> bool,
    {
        self.channels
            .iter()
            .filter(|channel| accepts(channel.channel_type) && channel.supports_model(model))
            .find_map(|channel| {
                let mut state = self.key_states.get_mut(&self.state_key(channel.id))?;
                let (_, key) = self.selector.select(&mut state)?;
                Some((channel, key))
            })
    }

    /// 禁用某个渠道的一个凭证槽位
    pub fn disable_key(&self, channel_id: i64, index: usize, reason: &str) -> bool {
        self.key_states
            .get_mut(&self.state_key(channel_id))
            .is_some_and(|mut state| state.disable_key(index, reason, chrono::Utc::now()))
    }
}

/// 路由共享状态
#[derive(Clone)]
pub struct RelayState {
    dispatcher: Arc<Dispatcher>,
    channels: Arc<ChannelRegistry>,
    stream_buffer: usize,
}

impl RelayState {
    #[must_use]
    pub fn new(dispatcher: Dispatcher, channels: ChannelRegistry, stream_buffer: usize) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            channels: Arc::new(channels),
            stream_buffer,
        }
    }

    /// 从应用配置构建
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let dispatcher = Dispatcher::from_config(&config.relay)?;
        let channels = ChannelRegistry::new(config.channels.clone(), &config.cache.keyspace());
        Ok(Self::new(dispatcher, channels, config.relay.stream_buffer))
    }

    #[must_use]
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }
}

/// 入站请求的协议格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundFormat {
    OpenAI,
    Claude,
    Audio,
}

impl InboundFormat {
    /// 该渠道类型的适配器能否转换此格式的请求
    const fn served_by(self, channel_type: ChannelType) -> bool {
        match self {
            Self::OpenAI | Self::Audio => matches!(channel_type, ChannelType::OpenAI),
            Self::Claude => matches!(channel_type, ChannelType::Claude | ChannelType::ClaudeCode),
        }
    }
}

enum InboundRequest {
    OpenAI(GeneralOpenAIRequest),
    Claude(ClaudeRequest),
    Audio(AudioRequest),
}

impl InboundRequest {
    fn parse(format: InboundFormat, headers: &HeaderMap, body: &[u8]) -> Result<Self> {
        Ok(match format {
            InboundFormat::OpenAI => Self::OpenAI(serde_json::from_slice(body)?),
            InboundFormat::Claude => Self::Claude(serde_json::from_slice(body)?),
            InboundFormat::Audio => {
                let content_type = headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                Self::Audio(AudioRequest::from_multipart(content_type, body).unwrap_or_default())
            }
        })
    }

    fn model(&self) -> &str {
        match self {
            Self::OpenAI(request) => &request.model,
            Self::Claude(request) => &request.model,
            Self::Audio(request) => &request.model,
        }
    }

    fn is_stream(&self) -> bool {
        match self {
            Self::OpenAI(request) => request.is_stream(),
            Self::Claude(request) => request.is_stream(),
            Self::Audio(_) => false,
        }
    }
}

struct PreparedRelay {
    ctx: RelayContext,
    adaptor: Box<dyn Adaptor>,
    body: RequestBody,
}

fn prepare(
    state: &RelayState,
    format: InboundFormat,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<PreparedRelay> {
    let inbound = InboundRequest::parse(format, headers, &body)?;
    let model = inbound.model().to_string();
    let (channel, api_key) = state
        .channels
        .select(&model, |channel_type| format.served_by(channel_type))
        .ok_or_else(|| RelayError::no_available_channel(&model))?;

    let mut ctx = RelayContext::new(
        ChannelBinding::from(channel),
        api_key,
        RelayMode::from_path(uri.path()),
    )
    .with_model(&model)
    .with_stream(inbound.is_stream());
    if let Some(request_id) = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
    {
        ctx = ctx.with_request_id(request_id);
    }
    ctx.upstream_model_name = channel.upstream_model(&model);
    ctx.disable_ping = channel.disable_ping;

    let mut adaptor = get_adaptor(channel.channel_type).ok_or_else(|| {
        RelayError::not_implemented(format!("channel type {}", channel.channel_type))
    })?;
    adaptor.init(&ctx);

    let converted = match inbound {
        InboundRequest::OpenAI(request) => {
            Bytes::from(serde_json::to_vec(&adaptor.convert_openai_request(&ctx, request)?)?)
        }
        InboundRequest::Claude(request) => {
            Bytes::from(serde_json::to_vec(&adaptor.convert_claude_request(&ctx, request)?)?)
        }
        InboundRequest::Audio(request) => adaptor.convert_audio_request(&ctx, &request, body)?,
    };

    linfo!(
        ctx.request_id(),
        LogStage::RequestStart,
        LogComponent::Server,
        "relay_request_accepted",
        "请求已分配渠道",
        channel_id = channel.id,
        channel_type = %channel.channel_type,
        model = %model,
        upstream_model = %ctx.upstream_model_name,
        stream = ctx.is_stream
    );
    Ok(PreparedRelay {
        ctx,
        adaptor,
        body: RequestBody::from(converted),
    })
}

async fn relay(
    state: RelayState,
    format: InboundFormat,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let prepared = match prepare(&state, format, &uri, &headers, body) {
        Ok(prepared) => prepared,
        Err(err) => {
            lwarn!(
                "system",
                LogStage::RequestStart,
                LogComponent::Server,
                "relay_request_rejected",
                "请求无法分发",
                path = %uri.path(),
                error = %err
            );
            return err.into_response();
        }
    };

    let (writer, receiver) = ResponseWriter::channel(state.stream_buffer);
    let cancel = CancellationToken::new();
    // 处理函数被丢弃（客户端在响应头之前断开）时取消管线
    let handler_guard = cancel.clone().drop_guard();
    let client = ClientContext::new(method, uri, headers, writer, cancel);
    let dispatcher = Arc::clone(&state.dispatcher);

    let pipeline = spawn_isolated("relay_pipeline", async move {
        let PreparedRelay { ctx, adaptor, body } = prepared;
        let result = match adaptor.do_request(&dispatcher, &client, &ctx, body).await {
            Ok(response) => adaptor.do_response(&client, &ctx, response).await,
            Err(err) => Err(err),
        };
        match &result {
            Ok(usage) => linfo!(
                ctx.request_id(),
                LogStage::Response,
                LogComponent::Server,
                "relay_completed",
                "请求转发完成",
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens
            ),
            Err(err) if err.category() == ErrorCategory::Client => lwarn!(
                ctx.request_id(),
                LogStage::ResponseFailure,
                LogComponent::Server,
                "relay_rejected",
                "请求转发被拒绝",
                error = %err
            ),
            Err(err) => lerror!(
                ctx.request_id(),
                LogStage::ResponseFailure,
                LogComponent::Server,
                "relay_failed",
                "请求转发失败",
                error = %err
            ),
        }
        result
    });

    let ResponseReceiver { head, body } = receiver;
    if let Ok(head) = head.await {
        // 响应头已提交，之后由响应体的生命周期负责取消
        let body_guard = handler_guard.disarm().drop_guard();
        let stream = ReceiverStream::new(body).map(move |frame| {
            let _keep = &body_guard;
            frame
        });
        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        return response;
    }

    // 写出端已释放但从未提交响应头
    let err = match pipeline.await {
        Ok(Some(Err(err))) => err,
        Ok(Some(Ok(_))) => RelayError::empty_response(),
        Ok(None) => internal_error!("relay pipeline panicked"),
        Err(join_err) => RelayError::internal_with_source("relay pipeline aborted", join_err),
    };
    drop(handler_guard);
    err.into_response()
}

async fn chat_completions(
    State(state): State<RelayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    relay(state, InboundFormat::OpenAI, method, uri, headers, body).await
}

async fn messages(
    State(state): State<RelayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    relay(state, InboundFormat::Claude, method, uri, headers, body).await
}

async fn audio(
    State(state): State<RelayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    relay(state, InboundFormat::Audio, method, uri, headers, body).await
}

async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "channels": state.channels.len(),
    }))
}

/// 创建中继路由
pub fn create_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(messages))
        .route("/v1/audio/transcriptions", post(audio))
        .route("/v1/audio/translations", post(audio))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// 中继服务器
pub struct RelayServer {
    config: ServerConfig,
    state: RelayState,
}

impl RelayServer {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            config: config.server.clone(),
            state: RelayState::from_config(config)?,
        })
    }

    #[must_use]
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// 启动服务，`shutdown` 完成后优雅退出
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| RelayError::config_with_source("无效的监听地址", e))?;
        let listener = TcpListener::bind(&addr).await?;

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Server,
            "server_start",
            &format!("中继服务启动于 {addr}"),
            channels = self.state.channels.len()
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        ldebug!(
            "system",
            LogStage::Shutdown,
            LogComponent::Server,
            "server_stopped",
            "中继服务已停止"
        );
        Ok(())
    }
}

/// 等待 Ctrl+C
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        lerror!(
            "system",
            LogStage::Shutdown,
            LogComponent::Server,
            "signal_listen_failed",
            &format!("监听退出信号失败: {e}")
        );
    }
}
