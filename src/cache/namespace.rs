//! # 缓存键命名空间
//!
//! 按用途（例如 `channel_affinity:v1`）与部署（全局前缀）隔离 KV 存储中的键，
//! 多个租户共享同一个后端时互不冲突。
//!
//! 完整键格式：`[<global-prefix>:]<namespace>:<key>`

use std::env;
use std::sync::Arc;

/// 提供全局键前缀的环境变量
pub const KEY_PREFIX_ENV: &str = "REDIS_KEY_PREFIX";

/// 进程级键空间配置：启动时读取一次全局前缀，之后只读
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyspace {
    global_prefix: Option<Arc<str>>,
}

impl Keyspace {
    /// 使用显式前缀构建（空白视为未设置）
    #[must_use]
    pub fn new(global_prefix: Option<&str>) -> Self {
        let global_prefix = global_prefix
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(Arc::from);
        Self { global_prefix }
    }

    /// 从环境变量读取全局前缀
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// 通过查找函数读取全局前缀
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::new(lookup(KEY_PREFIX_ENV).as_deref())
    }

    #[must_use]
    pub fn global_prefix(&self) -> Option<&str> {
        self.global_prefix.as_deref()
    }

    /// 在当前键空间下创建命名空间
    #[must_use]
    pub fn namespace(&self, name: &str) -> Namespace {
        Namespace::build(name, self.global_prefix())
    }
}

/// 单个用途的命名空间，前缀在构造时计算完成
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    /// 不带全局前缀的命名空间
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self::build(name, None)
    }

    fn build(name: &str, global_prefix: Option<&str>) -> Self {
        let ns = name.trim().trim_end_matches(':');
        let prefix = if ns.is_empty() {
            String::new()
        } else {
            match global_prefix {
                Some(global) => format!("{global}:{ns}:"),
                None => format!("{ns}:"),
            }
        };
        Self { prefix }
    }

    /// 命名空间前缀（包含结尾冒号；全局命名空间为空字符串）
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 生成完整存储键；对已带前缀的键幂等
    #[must_use]
    pub fn full_key(&self, key: &str) -> String {
        let key = key.trim();
        if key.is_empty() {
            return String::new();
        }
        if self.prefix.is_empty() {
            return key.trim_start_matches(':').to_string();
        }
        if key.starts_with(&self.prefix) {
            return key.to_string();
        }
        format!("{}{}", self.prefix, key.trim_start_matches(':'))
    }

    /// 批量失效扫描用的通配模式
    #[must_use]
    pub fn match_pattern(&self) -> String {
        if self.prefix.is_empty() {
            "*".to_string()
        } else {
            format!("{}*", self.prefix)
        }
    }
}
