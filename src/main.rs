//! 实时消息投递核心 - 服务入口

use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("🚀 starting ripple gateway");

    ripple_gateway::service::bootstrap::run().await?;

    Ok(())
}
