use clap::Parser;

use registry_sync::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // `serve` installs its own subscriber once the config (and log dir) is known
    if !matches!(cli.command, Some(Commands::Serve { .. })) && cli.verbose {
        let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
    }

    if let Err(e) = cli::dispatch(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
