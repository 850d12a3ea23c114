//! CLI entry point and transport wiring.

use clap::Parser;
use tower_lsp::{LspService, Server};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use grizzly_ls::GrizzlyBackend;

#[derive(Parser, Debug)]
#[command(name = "grizzly-ls", about = "Language Server Protocol backend for grizzly feature files")]
struct Cli {
    /// Speak LSP over stdin/stdout. The default transport.
    #[arg(long)]
    stdio: bool,

    /// Speak LSP over a TCP socket instead of stdio.
    #[arg(long)]
    socket: bool,

    /// Host to bind when `--socket` is set.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind when `--socket` is set.
    #[arg(long, default_value_t = 9257)]
    port: u16,

    /// Raise the log level to `debug` for this run.
    #[arg(long)]
    verbose: bool,

    /// Write logs to `grizzly-ls.log` in the current directory in
    /// addition to stderr, for editors that swallow stderr.
    #[arg(long)]
    log_file: bool,

    /// Indicates the server runs co-located with the editor, enabling the
    /// hot-reload handshake. No effect on transport selection.
    #[arg(long)]
    embedded: bool,
}

fn init_logging(verbose: bool, log_file: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if verbose { "grizzly_ls=debug" } else { "grizzly_ls=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    if log_file {
        let file_appender = tracing_appender::rolling::never(".", "grizzly-ls.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        None
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.log_file);

    tracing::info!(embedded = cli.embedded, "starting grizzly-ls");

    let exit_code = if cli.socket {
        run_socket(&cli.host, cli.port).await
    } else {
        run_stdio().await
    };

    std::process::exit(exit_code);
}

async fn run_stdio() -> i32 {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let (service, socket) = LspService::new(GrizzlyBackend::new);
    Server::new(stdin, stdout, socket).serve(service).await;
    0
}

/// Binds a single-connection TCP listener and serves LSP over it. Returns
/// the process exit code: `0` on a normal client-initiated shutdown,
/// non-zero if the socket could never be bound or accepted.
async fn run_socket(host: &str, port: u16) -> i32 {
    let listener = match tokio::net::TcpListener::bind((host, port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, host, port, "failed to bind socket");
            return 1;
        }
    };
    tracing::info!(host, port, "listening for a single LSP connection");

    let (stream, _peer) = match listener.accept().await {
        Ok(accepted) => accepted,
        Err(err) => {
            tracing::error!(error = %err, "failed to accept connection");
            return 1;
        }
    };
    let (read, write) = tokio::io::split(stream);
    let (service, socket) = LspService::new(GrizzlyBackend::new);
    Server::new(read, write, socket).serve(service).await;
    0
}
