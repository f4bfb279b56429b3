//! langchef-auth binary entry point.

use clap::Parser;
use langchef_auth::cli::{auth, Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let controller = match cli.controller() {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    controller.init().await;

    let result = match &cli.command {
        Commands::Login(args) => auth::handle_login(&controller, args).await,
        Commands::Status => auth::handle_status(&controller).await,
        Commands::Whoami => auth::handle_whoami(&controller).await,
        Commands::Refresh => auth::handle_refresh(&controller).await,
        Commands::Logout => auth::handle_logout(&controller).await,
    };
    controller.shutdown();

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
