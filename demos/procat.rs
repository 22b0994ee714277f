//! Run a process and join it to stdin/stdout, or to TCP clients
//!
//! Run with:
//!   cargo run --example procat -- program [args...]
//!   cargo run --example procat -- -l 9001 program [args...]

use std::process::{Command, ExitCode};

use tracing_subscriber::EnvFilter;

use sockudo_relay::{
    DEFAULT_BLOCK_SIZE, Endpoint, ListenerRegistry, ProcessStream, Route, cat_raw, stream, tcp,
};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("-l") if args.len() >= 3 => match args[1].parse() {
            Ok(port) => serve(port, &args[2..]),
            Err(_) => usage(),
        },
        Some(_) => run_attached(&args),
        None => usage(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("procat: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn usage() -> sockudo_relay::Result<()> {
    eprintln!("Usage: procat [-l port] program [args...]");
    Err(sockudo_relay::Error::Protocol("bad arguments"))
}

fn spawn(argv: &[String]) -> sockudo_relay::Result<ProcessStream> {
    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);
    ProcessStream::spawn_command(command)
}

/// Bridge `process` and `other` with raw blocks in both directions
fn bridge(process: &mut ProcessStream, other: &mut dyn Endpoint) -> (usize, usize) {
    let mut endpoints: [&mut dyn Endpoint; 2] = [process, other];
    cat_raw(
        &mut endpoints,
        Route::new(0, 1),
        Route::new(1, 0),
        DEFAULT_BLOCK_SIZE,
        None,
    )
}

fn run_attached(argv: &[String]) -> sockudo_relay::Result<()> {
    let mut process = spawn(argv)?;
    let mut io = stream::stdio()?;
    let (out, input) = bridge(&mut process, &mut io);
    tracing::info!(out, input, "process finished");
    Ok(())
}

fn serve(port: u16, argv: &[String]) -> sockudo_relay::Result<()> {
    let registry = ListenerRegistry::new();
    let listener = registry.listen(port)?;
    tracing::info!(port, program = %argv[0], "serving process");

    loop {
        let mut conn = tcp::accept(&listener)?;
        let mut process = match spawn(argv) {
            Ok(process) => process,
            Err(e) => {
                conn.send(format_args!("procat: {}\n", e)).ok();
                continue;
            }
        };
        let (out, input) = bridge(&mut process, &mut conn);
        tracing::info!(out, input, pid = process.id(), "session finished");
    }
}
