//! # 错误类型定义

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// 传输层错误默认对客户端展示的文案（隐藏上游细节）
pub const HIDDEN_UPSTREAM_MESSAGE: &str = "upstream error: do request failed";

/// 中继主要错误类型
#[derive(Debug, Error)]
pub enum RelayError {
    /// 配置相关错误
    #[error("配置错误: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 渠道 Header Override 配置非法
    #[error("渠道 header override 非法: {message}")]
    HeaderOverrideInvalid {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// URL / 请求头构建失败，请求不会离开网关
    #[error("请求构建失败: {message}")]
    RequestBuild {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 适配器不支持该请求类型
    #[error("未实现: {message}")]
    NotImplemented { message: String },

    /// 上游请求发送失败
    #[error("上游请求失败: {message}")]
    DoRequestFailed {
        message: String,
        /// 为 true 时对客户端只暴露通用文案
        hide_message: bool,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 传输层没有报错但也没有响应
    #[error("上游响应为空")]
    EmptyResponse,

    /// WebSocket 握手失败
    #[error("WebSocket 连接失败 {url}: {message}")]
    WebSocketDial {
        url: String,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 客户端连接已断开
    #[error("客户端连接已关闭")]
    ClientClosed,

    /// 没有可服务该模型的渠道或可用凭证
    #[error("没有可用渠道: {model}")]
    NoAvailableChannel { model: String },

    /// 系统内部错误
    #[error("内部错误: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// IO相关错误
    #[error("IO错误: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// 序列化/反序列化错误
    #[error("序列化错误: {message}")]
    Serialization {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// 附加上下文的错误
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<RelayError>,
    },
}

impl RelayError {
    /// 将错误转换为HTTP状态码和错误代码
    #[must_use]
    pub fn to_http_response_parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Config { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            Self::HeaderOverrideInvalid { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "channel_header_override_invalid",
            ),
            Self::RequestBuild { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "request_build_failed"),
            Self::NotImplemented { .. } => (StatusCode::BAD_REQUEST, "not_implemented"),
            Self::DoRequestFailed { .. } => (StatusCode::BAD_GATEWAY, "do_request_failed"),
            Self::EmptyResponse => (StatusCode::BAD_GATEWAY, "empty_response"),
            Self::WebSocketDial { .. } => (StatusCode::BAD_GATEWAY, "websocket_dial_failed"),
            Self::ClientClosed => (StatusCode::BAD_REQUEST, "client_closed"),
            Self::NoAvailableChannel { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "no_available_channel")
            }
            Self::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Self::Io { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Self::Serialization { .. } => (StatusCode::BAD_REQUEST, "serialization_error"),
            Self::Context { source, .. } => source.to_http_response_parts(),
        }
    }

    /// 可以返回给客户端的错误文案
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::DoRequestFailed {
                hide_message: true,
                ..
            } => HIDDEN_UPSTREAM_MESSAGE.to_string(),
            Self::Context { source, .. } => source.client_message(),
            other => other.to_string(),
        }
    }

    /// 去掉上下文包装后的根错误
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// 是否属于配置类错误（不重试，请求不离开网关）
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root(),
            Self::Config { .. } | Self::HeaderOverrideInvalid { .. }
        )
    }

    /// 创建配置错误
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的配置错误
    pub fn config_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建 header override 错误
    pub fn header_override_invalid<T: Into<String>>(message: T) -> Self {
        Self::HeaderOverrideInvalid {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的 header override 错误
    pub fn header_override_invalid_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::HeaderOverrideInvalid {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建请求构建错误
    pub fn request_build<T: Into<String>>(message: T) -> Self {
        Self::RequestBuild {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的请求构建错误
    pub fn request_build_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::RequestBuild {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建未实现错误
    pub fn not_implemented<T: Into<String>>(message: T) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    /// 创建上游请求失败错误，默认隐藏底层信息
    pub fn do_request_failed<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::DoRequestFailed {
            message: message.into(),
            hide_message: true,
            source: Some(source.into()),
        }
    }

    /// 创建无可用渠道错误
    pub fn no_available_channel<T: Into<String>>(model: T) -> Self {
        Self::NoAvailableChannel {
            model: model.into(),
        }
    }

    #[must_use]
    pub const fn empty_response() -> Self {
        Self::EmptyResponse
    }

    /// 创建 WebSocket 握手失败错误
    pub fn websocket_dial<U: Into<String>, E: Into<anyhow::Error>>(url: U, source: E) -> Self {
        let source = source.into();
        Self::WebSocketDial {
            url: url.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// 创建内部错误
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的内部错误
    pub fn internal_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, code) = self.to_http_response_parts();
        let body = json!({
            "error": {
                "message": self.client_message(),
                "type": "relay_error",
                "code": code,
            }
        });
        (status, Json(body)).into_response()
    }
}

// 自动转换常见错误类型
impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: "IO操作失败".to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("TOML解析失败", err)
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: "JSON处理失败".to_string(),
            source: err.into(),
        }
    }
}

impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        Self::request_build_with_source("URL解析失败", err)
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        Self::do_request_failed("HTTP请求失败", err)
    }
}
