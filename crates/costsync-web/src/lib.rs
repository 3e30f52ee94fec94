//! costsync-web - HTTP and WebSocket front for costsync using Axum

pub mod live;
pub mod router;
pub mod sse;
pub mod state;

pub use router::create_router;
pub use state::AppState;

use anyhow::Result;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Run the web server until `shutdown` resolves
pub async fn run(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let background = live::spawn_background(&state);
    let router = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("Web server listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    for task in background {
        task.abort();
    }
    info!("Web server stopped");
    Ok(())
}
