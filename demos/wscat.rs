//! netcat(1) with WebSocket framing
//!
//! Run with:
//!   cargo run --example wscat -- -l 9001
//!   cargo run --example wscat -- 127.0.0.1 9001 [path=/] [protocol=wscat]

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use sockudo_relay::{
    Config, Endpoint, LINE_DELIMITERS, ListenerRegistry, WebSocketClient, WebSocketServer,
    cat_pair, stream,
};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let result = match args.get(1).map(String::as_str) {
        Some("-l") => args.get(2).and_then(|p| p.parse().ok()).map(serve),
        Some(host) => args.get(2).map(|port| {
            let path = args.get(3).map_or("/", String::as_str);
            let protocol = args.get(4).map_or("wscat", String::as_str);
            connect(&format!("{}:{}", host, port), path, protocol)
        }),
        None => None,
    };

    match result {
        Some(Ok(())) => ExitCode::SUCCESS,
        Some(Err(e)) => {
            eprintln!("wscat: {}", e);
            ExitCode::FAILURE
        }
        None => {
            eprintln!(
                "Usage: Server: {0} -l port\n\t Client: {0} address port [path=/] [protocol=wscat]",
                args[0]
            );
            ExitCode::FAILURE
        }
    }
}

fn serve(port: u16) -> sockudo_relay::Result<()> {
    let registry = ListenerRegistry::new();
    let server = WebSocketServer::bind(&registry, port, Config::default())?;
    let mut ws = server.accept()?;
    if !ws.is_valid() {
        tracing::error!("handshake invalid");
        return ws.reject(400, "Bad Request", "This is a WebSocket server.");
    }

    let mut io = stream::stdio()?;
    let (sent, received) = cat_pair(&mut io, &mut ws, LINE_DELIMITERS, None);
    tracing::info!(sent, received, "connection finished");
    Ok(())
}

fn connect(addr: &str, path: &str, protocol: &str) -> sockudo_relay::Result<()> {
    let client = WebSocketClient::new(Config::default());
    let mut ws = client.connect(addr, path, Some(protocol))?;
    let mut io = stream::stdio()?;

    let (sent, received) = cat_pair(&mut io, &mut ws, LINE_DELIMITERS, None);
    tracing::info!(sent, received, "connection finished");
    Ok(())
}
