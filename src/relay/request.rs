//! # 出站请求与上游响应

use crate::error::{RelayError, Result};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

/// 流式请求体
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

/// 出站请求体
pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    Stream(BodyStream),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl RequestBody {
    /// 完整读取请求体
    pub async fn buffer(self) -> Result<Bytes> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Bytes(bytes) => Ok(bytes),
            Self::Stream(stream) => {
                let buf = stream
                    .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await
                    .map_err(|e| RelayError::request_build_with_source("read request body failed", e))?;
                Ok(buf.freeze())
            }
        }
    }

    fn into_reqwest(self) -> reqwest::Body {
        match self {
            Self::Empty => reqwest::Body::from(Bytes::new()),
            Self::Bytes(bytes) => reqwest::Body::from(bytes),
            Self::Stream(stream) => reqwest::Body::wrap_stream(stream),
        }
    }
}

/// 请求体重放函数
pub type BodyRewind = Arc<dyn Fn() -> RequestBody + Send + Sync>;

/// 发往上游的请求
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// 覆盖目标主机（`Host` 请求头覆盖）
    pub host: Option<String>,
    body: RequestBody,
    rewind: Option<BodyRewind>,
}

impl fmt::Debug for UpstreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("host", &self.host)
            .field("body", &self.body)
            .field("rewindable", &self.is_rewindable())
            .finish_non_exhaustive()
    }
}

impl UpstreamRequest {
    pub fn new(method: Method, url: &str, body: RequestBody) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| RelayError::request_build_with_source(format!("new request failed: {url}"), e))?;
        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            host: None,
            body,
            rewind: None,
        })
    }

    #[must_use]
    pub fn with_rewind(mut self, rewind: BodyRewind) -> Self {
        self.rewind = Some(rewind);
        self
    }

    /// 重新获取一份请求体（需要重放时使用）
    ///
    /// 传输层自身不重试：reqwest 对 `Bytes` 请求体会自行处理连接复用时的重发。
    /// 重放函数供任务适配器构建请求头时读取请求体，以及由外部渠道选择方在
    /// 换渠道重试时重新提交同一份请求体。
    #[must_use]
    pub fn rewind(&self) -> Option<RequestBody> {
        self.rewind.as_ref().map(|f| f())
    }

    #[must_use]
    pub fn is_rewindable(&self) -> bool {
        self.rewind.is_some()
    }

    /// 转换为 reqwest 请求，消耗请求体
    pub fn into_reqwest(self, client: &reqwest::Client) -> Result<reqwest::Request> {
        let mut headers = self.headers;
        if let Some(host) = self.host.as_deref() {
            let value = HeaderValue::from_str(host).map_err(|e| {
                RelayError::header_override_invalid_with_source(format!("invalid host: {host:?}"), e)
            })?;
            headers.insert(header::HOST, value);
        }
        client
            .request(self.method, self.url)
            .headers(headers)
            .body(self.body.into_reqwest())
            .build()
            .map_err(|e| RelayError::request_build_with_source("new request failed", e))
    }
}

/// 上游响应体
pub enum ResponseBody {
    Full(Bytes),
    Stream(BoxStream<'static, Result<Bytes>>),
}

/// 上游响应
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: ResponseBody,
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl UpstreamResponse {
    #[must_use]
    pub fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let stream = response.bytes_stream().map_err(RelayError::from).boxed();
        Self {
            status,
            headers,
            body: ResponseBody::Stream(stream),
        }
    }

    #[must_use]
    pub fn from_parts(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Full(body),
        }
    }

    /// 响应是否为 SSE
    #[must_use]
    pub fn is_event_stream(&self) -> bool {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("text/event-stream"))
    }

    /// 读取完整响应体
    pub async fn into_bytes(self) -> Result<Bytes> {
        match self.body {
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Stream(stream) => {
                let buf = stream
                    .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await?;
                Ok(buf.freeze())
            }
        }
    }

    /// 以分块流的形式读取响应体
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        match self.body {
            ResponseBody::Full(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            ResponseBody::Stream(stream) => stream,
        }
    }

    /// 缓冲响应体并重新挂回，供日志读取后继续处理
    pub async fn buffer_body(self) -> Result<(Self, Bytes)> {
        let status = self.status;
        let headers = self.headers.clone();
        let body = self.into_bytes().await?;
        Ok((Self::from_parts(status, headers, body.clone()), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_body_buffers_in_order() {
        let chunks: Vec<io::Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))];
        let body = RequestBody::Stream(Box::pin(stream::iter(chunks)));
        assert_eq!(body.buffer().await.unwrap(), "hello world");
    }

    #[test]
    fn invalid_url_is_request_build_error() {
        let err = UpstreamRequest::new(Method::POST, "::not-a-url", RequestBody::Empty).unwrap_err();
        assert_eq!(err.to_http_response_parts().1, "request_build_failed");
    }

    #[test]
    fn host_override_becomes_host_header() {
        let client = reqwest::Client::new();
        let mut request =
            UpstreamRequest::new(Method::POST, "https://api.example.com/v1/x", RequestBody::Empty).unwrap();
        request.host = Some("internal.example.com".to_string());
        let built = request.into_reqwest(&client).unwrap();
        assert_eq!(built.headers()[header::HOST], "internal.example.com");
        assert_eq!(built.url().host_str(), Some("api.example.com"));
    }

    #[test]
    fn rewind_returns_fresh_body() {
        let payload = Bytes::from_static(b"{\"prompt\":\"x\"}");
        let replay = payload.clone();
        let plain = UpstreamRequest::new(Method::POST, "https://api.example.com", payload.clone().into()).unwrap();
        assert!(!plain.is_rewindable());
        assert!(plain.rewind().is_none());

        let request = UpstreamRequest::new(Method::POST, "https://api.example.com", payload.into())
            .unwrap()
            .with_rewind(Arc::new(move || RequestBody::Bytes(replay.clone())));
        assert!(request.is_rewindable());
        assert!(matches!(request.rewind(), Some(RequestBody::Bytes(b)) if b.len() == 14));
        // 每次重放都是一份新的请求体
        assert!(matches!(request.rewind(), Some(RequestBody::Bytes(b)) if b.len() == 14));
    }

    #[tokio::test]
    async fn full_response_streams_once() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream; charset=utf-8"));
        let response = UpstreamResponse::from_parts(StatusCode::OK, headers, Bytes::from_static(b"data: x\n\n"));
        assert!(response.is_event_stream());
        let chunks: Vec<_> = response.into_stream().collect().await;
        assert_eq!(chunks.len(), 1);
    }
}
