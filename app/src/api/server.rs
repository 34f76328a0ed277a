use std::net::SocketAddr;

use tower_http::cors::{Any, CorsLayer};

use super::routes::create_router;
use super::state::AppStateHandle;

/// Serve until ctrl-c.
pub async fn run_server(port: u16, state: AppStateHandle) -> Result<(), std::io::Error> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state).layer(cors);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutting down");
        })
        .await
}
