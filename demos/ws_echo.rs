//! WebSocket echo server
//!
//! Non-WebSocket clients get a 400. Every connection runs on its own thread.
//!
//! Run with: cargo run --example ws_echo -- [port=7681]

use tracing_subscriber::EnvFilter;

use sockudo_relay::{Config, ListenerRegistry, WebSocketServer};

fn main() -> sockudo_relay::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let port = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(7681);

    let registry = ListenerRegistry::new();
    let server = WebSocketServer::bind(&registry, port, Config::default())?;
    tracing::info!(addr = %server.local_addr()?, "echo server listening");

    server.serve(|mut ws| {
        let path = ws.handshake().map(|h| h.path.clone()).unwrap_or_default();
        tracing::info!(%path, "client connected");

        let mut echoed = 0usize;
        while let Ok(message) = ws.receive_message(None) {
            if ws.send_message(message.as_bytes()).is_err() {
                break;
            }
            echoed += 1;
        }
        tracing::info!(%path, echoed, "client disconnected");
    })
}
