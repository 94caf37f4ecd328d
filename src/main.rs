//! Registry server entry point.

use camino::Utf8PathBuf;
use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

use wharf::RegistryBuilder;

/// Content-addressable OCI container registry.
#[derive(Parser, Debug)]
#[command(name = "wharf", version, about)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:5080")]
    addr: String,

    /// Directory the registry stores everything under.
    #[arg(long, default_value = "testdata")]
    root: Utf8PathBuf,

    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "wharf=info,tower_http=info",
        1 => "wharf=debug,tower_http=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let app = RegistryBuilder::new().base_path(cli.root.clone()).build();

    let listener = tokio::net::TcpListener::bind(&cli.addr)
        .await
        .wrap_err_with(|| format!("binding {}", cli.addr))?;

    tracing::info!(addr = %cli.addr, root = %cli.root, "registry listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("serving registry")?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM; in-flight requests drain before exit.
async fn shutdown_signal() {
    let interrupt = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }

    tracing::info!("shutting down");
}
