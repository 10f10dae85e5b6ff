//! Biograph HTTP 服务
//!
//! 启动: cargo run --bin biograph-web --features web
//! POST /chat/langgraph 以 SSE 推送事件；GET /health

use anyhow::Context;
use biograph::agent::create_runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    biograph::observability::init();

    let runtime = create_runtime(None).context("Failed to create runtime")?;
    let bind = std::env::var("BIOGRAPH_WEB_BIND").unwrap_or_else(|_| runtime.config.web.bind.clone());
    let app = biograph::web::router(runtime);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!("Biograph web: http://{}", bind);
    axum::serve(listener, app).await?;
    Ok(())
}
