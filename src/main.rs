//! Message Bridge CLI
//!
//! 启动本地消息分发服务，或对已配置的适配器做一次健康检查。

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use message_bridge::config::BridgeConfig;
use message_bridge::provider::{ProviderRegistry, ProviderStatus, KNOWN_PROVIDERS};

#[derive(Parser)]
#[command(name = "msgbridge")]
#[command(about = "Message Bridge - 统一消息分发服务")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动 HTTP 服务
    Serve {
        /// 监听端口（优先于 MSGBRIDGE_PORT）
        #[arg(long)]
        port: Option<u16>,
    },
    /// 对所有已配置的适配器执行健康检查并打印结果
    Health {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let mut config = BridgeConfig::from_env()?;
            if let Some(port) = port {
                config.port = port;
            }
            info!(port = config.port, "Starting message bridge");
            message_bridge::server::start(config).await?;
        }
        Commands::Health { json } => {
            let config = BridgeConfig::from_env()?;
            let registry = ProviderRegistry::from_config(&config);

            let mut report = serde_json::Map::new();
            for name in KNOWN_PROVIDERS {
                let status = match registry.get(name) {
                    Some(provider) => provider.health_check().await,
                    None => ProviderStatus::disabled(),
                };
                report.insert(name.to_string(), serde_json::to_value(&status)?);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for (name, status) in &report {
                    println!("{name}: {}", status["status"].as_str().unwrap_or("unknown"));
                }
            }
        }
    }

    Ok(())
}
