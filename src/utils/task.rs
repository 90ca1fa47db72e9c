//! # 后台任务隔离
//!
//! 所有后台任务都通过 [`spawn_isolated`] 启动：任务内部的 panic 被捕获并记录，
//! 不会传播到调用方，也不会让服务进程崩溃。

use crate::logging::{LogComponent, LogStage};
use crate::lerror;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;

/// 启动一个隔离的后台任务
///
/// 正常结束时返回 `Some(output)`，panic 时记录错误并返回 `None`。
pub fn spawn_isolated<F>(name: &'static str, future: F) -> JoinHandle<Option<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(async move {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(output) => Some(output),
            Err(payload) => {
                lerror!(
                    "system",
                    LogStage::BackgroundTask,
                    LogComponent::TaskRunner,
                    "task_panicked",
                    "后台任务 panic，已隔离",
                    task = name,
                    panic = %panic_message(payload.as_ref())
                );
                None
            }
        }
    })
}

/// 从 panic 载荷中提取文本
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
