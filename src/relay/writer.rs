//! # 客户端响应写出
//!
//! 响应头只提交一次：显式 `write_head`，或第一次写入正文时按 200 + 待定头提交。
//! 正文帧与心跳帧共用同一把写锁，保证不会交错。

use crate::error::{RelayError, Result};
use crate::relay::keepalive::HeartbeatSink;
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// SSE 心跳帧（注释行）
pub const PING_FRAME: &[u8] = b": PING\n\n";

/// 已提交的响应头
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// 服务端持有的接收端
pub struct ResponseReceiver {
    pub head: oneshot::Receiver<ResponseHead>,
    pub body: mpsc::Receiver<io::Result<Bytes>>,
}

struct HeadState {
    pending: HeaderMap,
    commit: Option<oneshot::Sender<ResponseHead>>,
}

pub struct ResponseWriter {
    head: Mutex<HeadState>,
    body: mpsc::Sender<io::Result<Bytes>>,
    write_lock: Mutex<()>,
}

impl fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("closed", &self.body.is_closed())
            .finish_non_exhaustive()
    }
}

impl ResponseWriter {
    /// 创建写出端与对应的接收端
    #[must_use]
    pub fn channel(buffer: usize) -> (Arc<Self>, ResponseReceiver) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(buffer.max(1));
        let writer = Arc::new(Self {
            head: Mutex::new(HeadState {
                pending: HeaderMap::new(),
                commit: Some(head_tx),
            }),
            body: body_tx,
            write_lock: Mutex::new(()),
        });
        (
            writer,
            ResponseReceiver {
                head: head_rx,
                body: body_rx,
            },
        )
    }

    /// 设置 SSE 响应头
    pub async fn set_event_stream_headers(&self) {
        let mut head = self.head.lock().await;
        let pending = &mut head.pending;
        pending.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        pending.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        pending.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        pending.insert(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        );
    }

    /// 提交响应头；已提交时返回 false
    pub async fn write_head(&self, status: StatusCode, headers: HeaderMap) -> bool {
        let mut head = self.head.lock().await;
        let Some(commit) = head.commit.take() else {
            return false;
        };
        let mut merged = std::mem::take(&mut head.pending);
        for (name, value) in &headers {
            merged.insert(name.clone(), value.clone());
        }
        commit
            .send(ResponseHead {
                status,
                headers: merged,
            })
            .is_ok()
    }

    /// 写出一段正文
    pub async fn write(&self, chunk: Bytes) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.send_frame(chunk).await
    }

    async fn send_frame(&self, chunk: Bytes) -> Result<()> {
        self.write_head(StatusCode::OK, HeaderMap::new()).await;
        self.body
            .send(Ok(chunk))
            .await
            .map_err(|_| RelayError::ClientClosed)
    }

    /// 头是否已提交
    pub async fn is_committed(&self) -> bool {
        self.head.lock().await.commit.is_none()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.body.is_closed()
    }

    /// 客户端断开（接收端被丢弃）时完成
    pub async fn closed(&self) {
        self.body.closed().await;
    }
}

#[async_trait]
impl HeartbeatSink for ResponseWriter {
    async fn send_heartbeat(&self, stop: &CancellationToken) -> io::Result<bool> {
        let _guard = self.write_lock.lock().await;
        // 持锁后再检查，停止之后不再写心跳
        if stop.is_cancelled() {
            return Ok(false);
        }
        self.send_frame(Bytes::from_static(PING_FRAME))
            .await
            .map(|()| true)
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_write_commits_ok_with_pending_headers() {
        let (writer, mut rx) = ResponseWriter::channel(4);
        writer.set_event_stream_headers().await;
        writer.write(Bytes::from_static(b"data: 1\n\n")).await.unwrap();

        let head = rx.head.await.unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(head.headers["x-accel-buffering"], "no");
        assert_eq!(rx.body.recv().await.unwrap().unwrap(), "data: 1\n\n");
        assert!(writer.is_committed().await);
    }

    #[tokio::test]
    async fn head_commits_once() {
        let (writer, rx) = ResponseWriter::channel(4);
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(writer.write_head(StatusCode::TOO_MANY_REQUESTS, headers).await);
        assert!(!writer.write_head(StatusCode::OK, HeaderMap::new()).await);
        assert_eq!(rx.head.await.unwrap().status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn heartbeat_is_skipped_after_stop() {
        let (writer, mut rx) = ResponseWriter::channel(4);
        let stop = CancellationToken::new();
        assert!(writer.send_heartbeat(&stop).await.unwrap());
        stop.cancel();
        assert!(!writer.send_heartbeat(&stop).await.unwrap());
        drop(writer);

        assert_eq!(rx.body.recv().await.unwrap().unwrap(), PING_FRAME);
        assert!(rx.body.recv().await.is_none());
    }

    #[tokio::test]
    async fn write_fails_once_client_is_gone() {
        let (writer, rx) = ResponseWriter::channel(1);
        drop(rx);
        assert!(writer.is_closed());
        let err = writer.write(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, RelayError::ClientClosed));
        writer.closed().await;
    }
}
