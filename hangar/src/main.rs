use clap::Parser;
use hangar::{execute_command, Args};
use hangar_logging::{init_subscriber, LoggingConfig};
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Quiet by default; stdout may carry a state blob.
    let level = if args.debug { "debug" } else { "warn" };
    let _log_guard = init_subscriber(&LoggingConfig::from_env().with_level(level));

    debug!("Starting hangar command");

    if let Err(e) = execute_command(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
