//! # 多密钥渠道状态
//!
//! 一个渠道可以配置 N 个凭证槽位，每个槽位独立启用/禁用。
//! 选择策略由外部的 [`KeySelector`] 实现；分发引擎只读取被选中的凭证。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// 多密钥选择模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiKeyMode {
    /// 轮询
    #[default]
    RoundRobin,
    /// 权重/随机
    Weighted,
}

impl MultiKeyMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Weighted => "weighted",
        }
    }
}

impl FromStr for MultiKeyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "round_robin" | "roundrobin" | "polling" | "rr" => Ok(Self::RoundRobin),
            "weighted" | "random" | "weight" => Ok(Self::Weighted),
            _ => Err(format!("Unknown multi-key mode: {s}")),
        }
    }
}

/// 单个凭证槽位状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    #[default]
    Enabled,
    Disabled,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => f.write_str("enabled"),
            Self::Disabled => f.write_str("disabled"),
        }
    }
}

/// 渠道的多密钥状态。缺省的槽位状态视为启用。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiKeyChannelState {
    keys: Vec<String>,
    #[serde(default)]
    status: HashMap<usize, KeyStatus>,
    #[serde(default)]
    disabled_reason: HashMap<usize, String>,
    #[serde(default)]
    disabled_at: HashMap<usize, DateTime<Utc>>,
    #[serde(default)]
    polling_index: usize,
    #[serde(default)]
    mode: MultiKeyMode,
}

impl MultiKeyChannelState {
    #[must_use]
    pub fn new(keys: Vec<String>, mode: MultiKeyMode) -> Self {
        Self {
            keys,
            mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub const fn mode(&self) -> MultiKeyMode {
        self.mode
    }

    #[must_use]
    pub const fn polling_index(&self) -> usize {
        self.polling_index
    }

    #[must_use]
    pub fn key_at(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn status_of(&self, index: usize) -> KeyStatus {
        self.status.get(&index).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn is_enabled(&self, index: usize) -> bool {
        index < self.keys.len() && self.status_of(index) == KeyStatus::Enabled
    }

    #[must_use]
    pub fn disabled_reason(&self, index: usize) -> Option<&str> {
        self.disabled_reason.get(&index).map(String::as_str)
    }

    #[must_use]
    pub fn disabled_at(&self, index: usize) -> Option<DateTime<Utc>> {
        self.disabled_at.get(&index).copied()
    }

    /// 当前启用的槽位下标（升序）
    #[must_use]
    pub fn enabled_indices(&self) -> Vec<usize> {
        (0..self.keys.len()).filter(|i| self.is_enabled(*i)).collect()
    }

    /// 禁用一个槽位；越界返回 false
    pub fn disable_key(&mut self, index: usize, reason: impl Into<String>, at: DateTime<Utc>) -> bool {
        if index >= self.keys.len() {
            return false;
        }
        self.status.insert(index, KeyStatus::Disabled);
        self.disabled_reason.insert(index, reason.into());
        self.disabled_at.insert(index, at);
        true
    }

    /// 重新启用一个槽位并清理禁用信息；越界返回 false
    pub fn enable_key(&mut self, index: usize) -> bool {
        if index >= self.keys.len() {
            return false;
        }
        self.status.remove(&index);
        self.disabled_reason.remove(&index);
        self.disabled_at.remove(&index);
        true
    }

    /// 移动轮询游标并返回移动前的位置
    pub fn advance_cursor(&mut self) -> usize {
        let current = self.polling_index;
        self.polling_index = if self.keys.is_empty() {
            0
        } else {
            (current + 1) % self.keys.len()
        };
        current
    }
}

/// 外部选择策略的接入点
pub trait KeySelector: Send + Sync {
    /// 选出本次使用的槽位，可以修改游标等状态
    fn select(&self, state: &mut MultiKeyChannelState) -> Option<(usize, String)>;
}

/// 占位策略：总是返回第一个启用的槽位
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstEnabledSelector;

impl KeySelector for FirstEnabledSelector {
    fn select(&self, state: &mut MultiKeyChannelState) -> Option<(usize, String)> {
        let index = *state.enabled_indices().first()?;
        state.key_at(index).map(|key| (index, key.to_string()))
    }
}
