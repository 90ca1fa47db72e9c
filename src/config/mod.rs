//! # 配置管理模块
//!
//! 处理应用配置加载、环境变量覆盖与验证

mod app_config;

pub use app_config::{
    AppConfig, CacheConfig, ChannelConfig, DEFAULT_PING_INTERVAL_SECONDS,
    DEFAULT_PING_MAX_DURATION_SECONDS, DEFAULT_PING_SEND_TIMEOUT_SECONDS, RelayConfig,
    ServerConfig,
};

use crate::config_error;
use crate::error::{Context, RelayError, Result};
use std::env;
use std::path::{Path, PathBuf};

/// 默认配置文件路径：`config/config.{RUST_ENV}.toml`
#[must_use]
pub fn default_config_path() -> PathBuf {
    let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
    PathBuf::from(format!("config/config.{env}.toml"))
}

/// 加载配置文件并应用环境变量覆盖
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config_file = path.map_or_else(default_config_path, Path::to_path_buf);

    if !config_file.exists() {
        return Err(config_error!("配置文件不存在: {}", config_file.display()));
    }

    let config_content = std::fs::read_to_string(&config_file).map_err(|e| {
        RelayError::config_with_source(format!("读取配置文件失败: {}", config_file.display()), e)
    })?;

    let mut config = parse_config(&config_content)
        .with_context(|| format!("解析配置文件失败: {}", config_file.display()))?;
    config.apply_env_overrides(|name| env::var(name).ok());
    config.validate().map_err(RelayError::config)?;

    Ok(config)
}

/// 解析 TOML 配置内容
pub fn parse_config(content: &str) -> Result<AppConfig> {
    Ok(toml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelType;
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
host = "127.0.0.1"
port = 3001

[relay]
debug = true
ping_interval_seconds = 5

[[channels]]
id = 7
type = "claude_code"
base_url = "https://api.anthropic.com"
keys = ["sk-ant-oat01-abc"]
models = ["claude-sonnet-4-5-20250929"]

[channels.header_override]
Authorization = "Bearer {api_key}"
"X-Trace" = "{client_header:X-Request-Id}"
"#;

    #[test]
    fn parse_sample_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.server.port, 3001);
        assert!(config.relay.debug);
        assert!(config.relay.ping_interval_enabled);
        let channel = &config.channels[0];
        assert_eq!(channel.channel_type, ChannelType::ClaudeCode);
        assert_eq!(
            channel.header_override.get("Authorization").and_then(|v| v.as_str()),
            Some("Bearer {api_key}")
        );
    }

    #[test]
    fn load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.channels.len(), 1);
    }

    #[test]
    fn dev_config_aliases_are_routable() {
        let config = parse_config(include_str!("../../config/config.dev.toml")).unwrap();
        assert!(config.validate().is_ok());
        for channel in &config.channels {
            for alias in channel.model_mapping.keys() {
                assert!(
                    channel.supports_model(alias),
                    "channel {} maps {alias} but does not list it",
                    channel.id
                );
            }
        }
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = load_config(Some(Path::new("/nonexistent/relay.toml"))).unwrap_err();
        assert!(err.is_configuration());
    }
}
