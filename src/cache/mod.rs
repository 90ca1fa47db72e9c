//! # 缓存键管理
//!
//! 多个部署共享同一个 KV 后端时的键隔离规则

pub mod namespace;

pub use namespace::{KEY_PREFIX_ENV, Keyspace, Namespace};
