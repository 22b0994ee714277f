//! netcat(1) over sockudo-relay endpoints
//!
//! Run with:
//!   cargo run --example netcat -- 127.0.0.1 9001
//!   cargo run --example netcat -- -l 9001

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use sockudo_relay::{LINE_DELIMITERS, ListenerRegistry, cat_pair, stream, tcp};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let result = match args.get(1).map(String::as_str) {
        Some("-l") => args.get(2).and_then(|p| p.parse().ok()).map(listen),
        Some(host) => args
            .get(2)
            .map(|port| connect(&format!("{}:{}", host, port))),
        None => None,
    };

    match result {
        Some(Ok(())) => ExitCode::SUCCESS,
        Some(Err(e)) => {
            eprintln!("netcat: {}", e);
            ExitCode::FAILURE
        }
        None => {
            eprintln!("Usage: {} [-l port | address port]", args[0]);
            ExitCode::FAILURE
        }
    }
}

fn listen(port: u16) -> sockudo_relay::Result<()> {
    let registry = ListenerRegistry::new();
    let listener = registry.listen(port)?;
    let mut conn = tcp::accept(&listener)?;
    let mut io = stream::stdio()?;

    let (sent, received) = cat_pair(&mut io, &mut conn, LINE_DELIMITERS, None);
    tracing::info!(sent, received, "connection finished");
    Ok(())
}

fn connect(addr: &str) -> sockudo_relay::Result<()> {
    let mut conn = tcp::connect(addr)?;
    let mut io = stream::stdio()?;

    let (sent, received) = cat_pair(&mut io, &mut conn, LINE_DELIMITERS, None);
    tracing::info!(sent, received, "connection finished");
    Ok(())
}
