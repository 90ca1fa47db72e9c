//! # HTTP 客户端池
//!
//! 直连客户端全局一个；代理客户端按代理地址缓存，只有遇到新的代理地址才新建。

use crate::error::{RelayError, Result};
use crate::linfo;
use crate::logging::{LogComponent, LogStage};
use dashmap::DashMap;
use reqwest::{Client, Proxy};
use std::time::Duration;

#[derive(Debug)]
pub struct HttpClientPool {
    direct: Client,
    proxied: DashMap<String, Client>,
    timeout: Option<Duration>,
}

impl HttpClientPool {
    /// 创建客户端池，`timeout` 为单个请求的总超时
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let direct = Self::builder(timeout)
            .build()
            .map_err(|e| RelayError::config_with_source("构建HTTP客户端失败", e))?;
        Ok(Self {
            direct,
            proxied: DashMap::new(),
            timeout,
        })
    }

    fn builder(timeout: Option<Duration>) -> reqwest::ClientBuilder {
        let builder = Client::builder().connect_timeout(Duration::from_secs(30));
        match timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    /// 按渠道代理设置选择客户端
    pub fn client_for(&self, proxy: Option<&str>) -> Result<Client> {
        let Some(proxy_url) = proxy.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(self.direct.clone());
        };

        if let Some(client) = self.proxied.get(proxy_url) {
            return Ok(client.clone());
        }

        let proxy = Proxy::all(proxy_url)
            .map_err(|e| RelayError::config_with_source(format!("代理地址无效: {proxy_url}"), e))?;
        let client = Self::builder(self.timeout)
            .proxy(proxy)
            .build()
            .map_err(|e| RelayError::config_with_source("构建代理HTTP客户端失败", e))?;

        linfo!(
            "system",
            LogStage::UpstreamRequest,
            LogComponent::HttpClient,
            "proxy_client_created",
            "创建代理HTTP客户端",
            proxy = proxy_url
        );

        Ok(self
            .proxied
            .entry(proxy_url.to_string())
            .or_insert(client)
            .clone())
    }

    /// 已缓存的代理客户端数量
    #[must_use]
    pub fn proxied_count(&self) -> usize {
        self.proxied.len()
    }
}
