//! HTTP edge for kdeps (§6.3): binds the routes a workflow manifest declares to
//! `kdeps_core::handle_request` (axum).
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`].

mod app;
mod response;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

pub use app::{default_evaluator, default_handlers, router, AppState, BootstrapError, ServeSelection};

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Runs the HTTP edge on an existing listener (tests bind `127.0.0.1:0` and pass the
/// listener in to learn the assigned port).
pub async fn run_serve_on_listener(
    listener: TcpListener,
    kdeps_home: PathBuf,
    selection: ServeSelection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("kdeps HTTP edge listening on http://{}", addr);

    let tmp_base = std::env::temp_dir().join("kdeps-serve");
    tokio::fs::create_dir_all(&tmp_base).await?;

    let state = Arc::new(
        AppState::bootstrap(
            &kdeps_home,
            selection,
            default_evaluator(),
            default_handlers(),
            tmp_base,
        )
        .await?,
    );
    info!(
        agent = %state.target.agent,
        action = %state.target.action,
        version = %state.target.version,
        "serving target action"
    );

    let app = router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs the HTTP edge. Listens on `addr` (default `127.0.0.1:8080`), serving whichever
/// agent/version `selection` names (or the sole/latest one found under `kdeps_home`).
pub async fn run_serve(
    addr: Option<&str>,
    kdeps_home: PathBuf,
    selection: ServeSelection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, kdeps_home, selection).await
}
