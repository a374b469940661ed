//! 主应用程序入口
//!
//! 启动实时聊天枢纽的 Axum 服务。

use application::ChatHub;
use config::AppConfig;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        max_messages_per_second = config.hub.max_messages_per_second,
        outbound_queue_capacity = config.hub.outbound_queue_capacity,
        "配置加载完成"
    );

    let hub = ChatHub::new(config.hub.clone());
    let app = router(AppState::new(hub));

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("聊天枢纽启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("聊天枢纽已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到关闭信号");
}
