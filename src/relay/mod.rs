//! # 中继分发引擎
//!
//! 适配器契约、请求分发、请求头覆盖与流式心跳。

pub mod adaptor;
pub mod channel;
pub mod context;
pub mod debug_log;
pub mod dispatcher;
pub mod dto;
pub mod header_override;
pub mod http_client;
pub mod keepalive;
pub mod request;
pub mod response;
pub mod writer;

pub use adaptor::{Adaptor, TaskAdaptor};
pub use context::{ChannelBinding, ClientContext, RelayContext, RelayMode};
pub use dispatcher::{DispatchOptions, Dispatcher, UpstreamSocket, setup_api_request_header};
pub use header_override::{ResolvedOverride, apply_header_override, resolve_header_override};
pub use keepalive::{HeartbeatSink, KeepAliveConfig, PingGuard, StopReason, start_keepalive};
pub use request::{RequestBody, UpstreamRequest, UpstreamResponse};
pub use response::Usage;
pub use writer::{PING_FRAME, ResponseReceiver, ResponseWriter};
