//! Scope server binary: wires `scope_core`'s traits to the `webrtc` crate,
//! serves the HTTP control plane, and owns process lifecycle (startup
//! pre-warm, shutdown teardown). Parses flags, inits tracing, dispatches.

mod cli;
mod http;
mod webrtc_adapter;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use scope_core::pipeline_manager::PipelineManager;
use scope_core::pipelines::{PassthroughPipeline, VodPipeline};
use scope_core::session_manager::SessionManager;
use scope_core::types::ParameterBag;

/// Built-in pipeline factory: dispatches on `id` to the bundled
/// [`PassthroughPipeline`] / [`VodPipeline`] implementations. A deployment
/// wiring a real model replaces this closure with one that constructs the
/// appropriate GPU-backed pipeline.
fn builtin_pipeline_factory() -> scope_core::pipeline_manager::PipelineFactory {
    Arc::new(|id: &str, params: &ParameterBag| -> scope_core::error::Result<Box<dyn scope_core::pipeline::Pipeline>> {
        match id {
            "passthrough" => Ok(Box::new(PassthroughPipeline::new(512, 512))),
            "vod" | "longlive" => {
                let fps = params
                    .get("output_fps")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(30) as u32;
                Ok(Box::new(VodPipeline::new(512, 512, fps)))
            }
            other => Err(scope_core::error::ScopeError::LoadFailure {
                pipeline_id: other.to_string(),
                message: format!("unknown pipeline id {other:?}"),
            }),
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let resolved = cli::resolve();

    if resolved.print_version_info {
        println!("{}", cli::version_info());
        return Ok(());
    }

    let level = cli::log_level_for_verbosity(resolved.verbosity);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("scope={level}").parse().unwrap()),
        )
        .with_target(false)
        .init();

    tracing::info!(version = %cli::version_info(), "starting scope-server");

    let pipeline_manager = Arc::new(PipelineManager::new(builtin_pipeline_factory()));
    pipeline_manager.prewarm(resolved.core.pipeline_id.clone(), ParameterBag::new());

    let connection_factory = Arc::new(webrtc_adapter::WebRtcPeerConnectionFactory::new(
        resolved.core.effective_ice_servers(),
    )?);
    let session_manager = Arc::new(SessionManager::new(
        Arc::clone(&pipeline_manager),
        connection_factory,
    ));

    let state = Arc::new(http::AppState {
        pipeline_manager: Arc::clone(&pipeline_manager),
        session_manager: Arc::clone(&session_manager),
    });
    let app = http::router(state);

    let addr: std::net::SocketAddr = format!("{}:{}", resolved.host, resolved.port)
        .parse()
        .context("invalid --host/--port")?;
    tracing::info!(%addr, "HTTP control plane listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let shutdown_session_manager = Arc::clone(&session_manager);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, closing sessions");
            shutdown_session_manager.stop().await;
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
