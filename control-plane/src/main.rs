use clap::Parser;
use hfi_control_plane::{build_router, run_recompile_loop, AppState, InMemoryStore};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hfi-control-plane", about = "Distribution layer for HTTP fault-injection policies")]
struct Args {
    /// Address to bind the HTTP API and SSE stream to.
    #[arg(long, env = "HFI_BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: String,

    /// Policy store backend. Only "memory" ships in this build; the trait
    /// is the seam for a coordinated external store.
    #[arg(long, env = "HFI_STORE_BACKEND", default_value = "memory")]
    store_backend: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let store: Arc<dyn hfi_control_plane::PolicyStore> = match args.store_backend.as_str() {
        "memory" => Arc::new(InMemoryStore::new()),
        other => anyhow::bail!("unsupported store backend '{}' (only 'memory' is built in)", other),
    };

    let state = AppState::new(store).await;
    tokio::spawn(run_recompile_loop(state.clone()));

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind_addr).await?;
    info!("hfi-control-plane listening on {}", args.bind_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining connections");
}
