use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use reqscope::{config::ServerConfig, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let config_path = args.config.as_deref();

    // serve installs its own subscriber once the profiler exists
    let command = args.get_command();
    if !matches!(command, cli::Commands::Serve) {
        init_tracing(&ServerConfig {
            log_level: "warn".to_string(),
            ..Default::default()
        });
    }

    match command {
        cli::Commands::Serve => {
            commands::serve::execute(config_path).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(config_path)?,
            cli::ConfigCommands::Validate => commands::config::validate(config_path)?,
        },
        cli::Commands::Version => {
            println!("reqscope v{}", env!("CARGO_PKG_VERSION"));
            println!("inspection protocol v{}", reqscope::http::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
