//! # Relay Gateway 主程序
//!
//! 加载渠道配置并启动中继服务

use clap::Parser;
use relay_gateway::{
    Result,
    config::load_config,
    lerror, linfo,
    logging::{self, LogComponent, LogStage},
    server::{RelayServer, shutdown_signal},
};
use std::path::PathBuf;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "relay-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 配置文件路径，默认 `config/config.{RUST_ENV}.toml`
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// 日志级别（未设置 RUST_LOG 时生效）
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref());

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            lerror!(
                "system",
                LogStage::Configuration,
                LogComponent::Config,
                "config_load_failed",
                &format!("配置加载失败: {e}")
            );
            std::process::exit(1);
        }
    };

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "service_starting",
        "服务启动",
        channels = config.channels.len(),
        debug = config.relay.debug
    );

    let server = RelayServer::new(&config)?;
    if let Err(e) = server.serve(shutdown_signal()).await {
        lerror!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "service_start_failed",
            &format!("服务启动失败: {e:?}")
        );
        std::process::exit(1);
    }

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Main,
        "service_shutdown",
        "服务正常关闭"
    );
    Ok(())
}
