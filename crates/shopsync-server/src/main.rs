use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shopsync::{RequestRouter, SyncService};
use shopsync_server::{create_router, load_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    let port = config.port;

    let service = Arc::new(
        SyncService::open(config.sync)
            .await
            .context("无法初始化同步服务")?,
    );
    let recovered = service.start().await.context("无法启动同步任务 runner")?;
    info!("同步服务已启动 (version {}, recovered {} jobs)", shopsync::SDK_VERSION, recovered);

    let app = create_router(Arc::new(RequestRouter::new(service.clone())));
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("无法监听 {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::warn!("无法监听 ctrl-c 信号");
            }
            info!("收到停止信号，正在关闭 HTTP 服务");
        })
        .await
        .context("HTTP 服务异常退出")?;

    // 正在执行的任务会继续到终结后才退出
    service.wait_idle().await;
    service.shutdown().await?;
    Ok(())
}
