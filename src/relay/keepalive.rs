//! # 流式心跳管理
//!
//! 每个流式响应最多一个心跳任务。任务在以下任一条件下停止：
//! 显式停止（[`PingGuard`] 被丢弃）、客户端取消、心跳发送失败或超时、最长存活时间到期。
//!
//! 每次心跳由独立的辅助任务发送，外层用超时约束它；辅助任务超时后会被中止。

use crate::config::{
    DEFAULT_PING_INTERVAL_SECONDS, DEFAULT_PING_MAX_DURATION_SECONDS,
    DEFAULT_PING_SEND_TIMEOUT_SECONDS, RelayConfig,
};
use crate::logging::{LogComponent, LogStage};
use crate::utils::spawn_isolated;
use crate::{ldebug, lwarn};
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_util::sync::CancellationToken;

/// 心跳帧的写出目标
#[async_trait]
pub trait HeartbeatSink: Send + Sync + 'static {
    /// 写一帧心跳。实现必须在与正文写出相同的锁内检查 `stop`，
    /// 已停止时不写并返回 `Ok(false)`。
    async fn send_heartbeat(&self, stop: &CancellationToken) -> io::Result<bool>;
}

/// 心跳参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveConfig {
    pub interval: Duration,
    pub send_timeout: Duration,
    pub max_duration: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECONDS),
            send_timeout: Duration::from_secs(DEFAULT_PING_SEND_TIMEOUT_SECONDS),
            max_duration: Duration::from_secs(DEFAULT_PING_MAX_DURATION_SECONDS),
        }
    }
}

impl KeepAliveConfig {
    #[must_use]
    pub fn from_relay(relay: &RelayConfig) -> Self {
        let defaults = Self::default();
        Self {
            interval: relay.ping_interval(),
            send_timeout: non_zero_secs(relay.ping_send_timeout_seconds, defaults.send_timeout),
            max_duration: non_zero_secs(relay.ping_max_duration_seconds, defaults.max_duration),
        }
    }
}

fn non_zero_secs(secs: u64, fallback: Duration) -> Duration {
    if secs == 0 {
        fallback
    } else {
        Duration::from_secs(secs)
    }
}

/// 心跳任务结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 请求处理结束，显式停止
    Stopped,
    /// 客户端断开
    ClientGone,
    SendFailed,
    SendTimeout,
    /// 达到最长存活时间
    MaxDuration,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Stopped => "stopped",
            Self::ClientGone => "client_gone",
            Self::SendFailed => "send_failed",
            Self::SendTimeout => "send_timeout",
            Self::MaxDuration => "max_duration",
        };
        f.write_str(text)
    }
}

/// 心跳任务句柄，丢弃时停止任务
#[derive(Debug)]
pub struct PingGuard {
    stop: CancellationToken,
    handle: Option<JoinHandle<Option<StopReason>>>,
}

impl PingGuard {
    /// 停止并等待任务退出；任务 panic 时返回 `None`
    pub async fn join(mut self) -> Option<StopReason> {
        self.stop.cancel();
        let handle = self.handle.take()?;
        handle.await.ok().flatten()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for PingGuard {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// 启动心跳任务
///
/// 第一次心跳在一个间隔之后发送，启动后立即停止不会产生任何心跳。
pub fn start_keepalive(
    sink: Arc<dyn HeartbeatSink>,
    client_cancel: CancellationToken,
    config: KeepAliveConfig,
    request_id: impl Into<String>,
) -> PingGuard {
    let stop = CancellationToken::new();
    let request_id = request_id.into();
    let task_stop = stop.clone();

    let handle = spawn_isolated("keepalive", async move {
        let reason = run_keepalive(sink, &task_stop, &client_cancel, config, &request_id).await;
        ldebug!(
            request_id,
            LogStage::KeepAlive,
            LogComponent::KeepAlive,
            "keepalive_stopped",
            "心跳任务结束",
            reason = %reason
        );
        reason
    });

    PingGuard {
        stop,
        handle: Some(handle),
    }
}

async fn run_keepalive(
    sink: Arc<dyn HeartbeatSink>,
    stop: &CancellationToken,
    client_cancel: &CancellationToken,
    config: KeepAliveConfig,
    request_id: &str,
) -> StopReason {
    let ceiling = sleep(config.max_duration);
    tokio::pin!(ceiling);
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => return StopReason::Stopped,
            () = client_cancel.cancelled() => return StopReason::ClientGone,
            () = &mut ceiling => {
                lwarn!(
                    request_id,
                    LogStage::KeepAlive,
                    LogComponent::KeepAlive,
                    "keepalive_ceiling",
                    "心跳任务达到最长存活时间",
                    max_duration_secs = config.max_duration.as_secs()
                );
                return StopReason::MaxDuration;
            }
            _ = ticker.tick() => {}
        }

        if let Err(reason) = send_once(&sink, stop, client_cancel, config.send_timeout, request_id).await {
            return reason;
        }
    }
}

async fn send_once(
    sink: &Arc<dyn HeartbeatSink>,
    stop: &CancellationToken,
    client_cancel: &CancellationToken,
    send_timeout: Duration,
    request_id: &str,
) -> Result<(), StopReason> {
    let helper_sink = Arc::clone(sink);
    let helper_stop = stop.clone();
    let mut helper = spawn_isolated("keepalive_send", async move {
        helper_sink.send_heartbeat(&helper_stop).await
    });

    tokio::select! {
        biased;
        () = stop.cancelled() => {
            helper.abort();
            Err(StopReason::Stopped)
        }
        () = client_cancel.cancelled() => {
            helper.abort();
            Err(StopReason::ClientGone)
        }
        outcome = timeout(send_timeout, &mut helper) => match outcome {
            Ok(Ok(Some(Ok(_)))) => Ok(()),
            Ok(Ok(Some(Err(e)))) => {
                lwarn!(
                    request_id,
                    LogStage::KeepAlive,
                    LogComponent::KeepAlive,
                    "ping_send_failed",
                    "心跳发送失败",
                    error = %e
                );
                Err(StopReason::SendFailed)
            }
            // 辅助任务 panic 或被取消
            Ok(Ok(None) | Err(_)) => Err(StopReason::SendFailed),
            Err(_) => {
                helper.abort();
                lwarn!(
                    request_id,
                    LogStage::KeepAlive,
                    LogComponent::KeepAlive,
                    "ping_send_timeout",
                    "心跳发送超时",
                    timeout_secs = send_timeout.as_secs()
                );
                Err(StopReason::SendTimeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl HeartbeatSink for CountingSink {
        async fn send_heartbeat(&self, stop: &CancellationToken) -> io::Result<bool> {
            if stop.is_cancelled() {
                return Ok(false);
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    struct StuckSink;

    #[async_trait]
    impl HeartbeatSink for StuckSink {
        async fn send_heartbeat(&self, _stop: &CancellationToken) -> io::Result<bool> {
            futures::future::pending::<()>().await;
            Ok(true)
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl HeartbeatSink for BrokenSink {
        async fn send_heartbeat(&self, _stop: &CancellationToken) -> io::Result<bool> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "client gone"))
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl HeartbeatSink for PanickingSink {
        async fn send_heartbeat(&self, _stop: &CancellationToken) -> io::Result<bool> {
            let missing: Option<bool> = None;
            Ok(missing.expect("sink panicked"))
        }
    }

    fn config() -> KeepAliveConfig {
        KeepAliveConfig {
            interval: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            max_duration: Duration::from_secs(7200),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_stop_sends_nothing() {
        let sink = Arc::new(CountingSink::default());
        let guard = start_keepalive(sink.clone(), CancellationToken::new(), config(), "req");
        assert_eq!(guard.join().await, Some(StopReason::Stopped));
        assert_eq!(sink.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_one_ping_per_interval_until_stopped() {
        let sink = Arc::new(CountingSink::default());
        let guard = start_keepalive(sink.clone(), CancellationToken::new(), config(), "req");
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(guard.join().await, Some(StopReason::Stopped));
        assert_eq!(sink.sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn client_cancellation_stops_loop() {
        let sink = Arc::new(CountingSink::default());
        let client = CancellationToken::new();
        let guard = start_keepalive(sink.clone(), client.clone(), config(), "req");
        tokio::time::sleep(Duration::from_secs(15)).await;
        client.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(guard.is_finished());
        assert_eq!(guard.join().await, Some(StopReason::ClientGone));
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_send_times_out() {
        let started = Instant::now();
        let guard = start_keepalive(Arc::new(StuckSink), CancellationToken::new(), config(), "req");
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert!(guard.is_finished());
        assert_eq!(guard.join().await, Some(StopReason::SendTimeout));
        assert!(started.elapsed() < Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_stops_loop() {
        let guard = start_keepalive(Arc::new(BrokenSink), CancellationToken::new(), config(), "req");
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(guard.join().await, Some(StopReason::SendFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_sink_is_isolated() {
        let guard = start_keepalive(Arc::new(PanickingSink), CancellationToken::new(), config(), "req");
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(guard.join().await, Some(StopReason::SendFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_ends_long_streams() {
        let sink = Arc::new(CountingSink::default());
        let config = KeepAliveConfig {
            max_duration: Duration::from_secs(25),
            ..config()
        };
        let guard = start_keepalive(sink.clone(), CancellationToken::new(), config, "req");
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(guard.join().await, Some(StopReason::MaxDuration));
        assert_eq!(sink.sent.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn config_from_relay_applies_fallbacks() {
        let relay = RelayConfig {
            ping_interval_seconds: -1,
            ping_send_timeout_seconds: 0,
            ping_max_duration_seconds: 60,
            ..RelayConfig::default()
        };
        let config = KeepAliveConfig::from_relay(&relay);
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.send_timeout, Duration::from_secs(10));
        assert_eq!(config.max_duration, Duration::from_secs(60));
    }
}
