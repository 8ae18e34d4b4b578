use clap::Parser;

use retire_sim::api::{Cli, Command, run_cli, run_http_server};
use retire_sim::logging::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("Warning: failed to initialize logging: {e}");
    }

    match cli.command {
        Command::Serve { port } => {
            if let Err(e) = run_http_server(port).await {
                tracing::error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        Command::Run {
            args,
            include_trajectories,
            decile,
            pretty,
        } => match run_cli(args, include_trajectories, decile, pretty) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
    }
}
