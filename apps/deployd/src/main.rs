use anyhow::Result;
use axum::serve;
use deployd::config::DeploydConfig;
use deployd::http::build_router;
use deployd_pipeline::{ProcessUpdatePipeline, UpdatePipeline};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = DeploydConfig::from_env()?;
    if config.secret.is_none() {
        tracing::warn!(
            "DEPLOYD_SECRET is unset; signature verification is disabled and every \
             request to the hook path will trigger a deploy"
        );
    }

    let pipeline: Arc<dyn UpdatePipeline> =
        Arc::new(ProcessUpdatePipeline::new(config.pipeline.clone()));
    let router = build_router(&config, pipeline)?;

    let listener = TcpListener::bind(config.addr).await?;
    info!(
        "deployd listening on {} for {} {}",
        config.addr, config.hook_method, config.hook_path
    );

    serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
