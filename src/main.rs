use clap::Parser;
use tracing_subscriber::EnvFilter;

use codeclip::cli::{run, Cli};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    if let Err(e) = run(cli.into_options()).await {
        tracing::error!(error = %e, "run failed");
        std::process::exit(1);
    }
}
