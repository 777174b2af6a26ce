//! Switchyard - WebDriver server for hybrid apps
//!
//! Main entry point for the Switchyard CLI and server.

mod cli;
mod server;

use clap::Parser;
use tracing::{info, warn};

use crate::cli::{Cli, Commands, RunArgs};
use crate::server::{init_tracing, load_config, run_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check) => {
            let (config, warnings) = load_config(&cli.config)?;
            for warning in &warnings {
                println!("warning: {}", warning);
            }
            println!(
                "Configuration OK: {} channel, listening on {}:{}{}",
                config.channel.kind(),
                config.server.host,
                config.server.port,
                config.server.base_path
            );
            Ok(())
        }
        command => {
            let args = match command {
                Some(Commands::Run(args)) => args,
                _ => RunArgs::default(),
            };
            let (mut config, warnings) = load_config(&cli.config)?;
            args.apply(&mut config);
            init_tracing(&config.logging)?;

            info!("Configuration loaded from {}", cli.config.display());
            for warning in &warnings {
                warn!("Config warning: {}", warning);
            }
            run_server(config).await
        }
    }
}
