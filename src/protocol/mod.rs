pub mod handler;
pub mod messages;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::ServerContext;

/// Accept loop: binds the WebSocket listener and spawns one task per
/// incoming connection. Grounded on `call_server.rs`'s `start_call_server`.
pub async fn run_websocket_server(
    context: Arc<ServerContext>,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", context.config.host, context.config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "websocket server listening");

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let context = context.clone();
        tokio::spawn(async move {
            tracing::debug!(%peer_addr, "accepted connection");
            handler::handle_connection(stream, context).await;
        });
    }
}
