use anyhow::Result;
use colored::Colorize;
use reqscope::{config, init_tracing_with_capture, server, Profiler};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Execute the serve command
///
/// Loads configuration, builds the profiler and its storage, installs the
/// request log layer and blocks until shutdown.
pub async fn execute(config_path: Option<&Path>) -> Result<()> {
    println!("{}", "Starting reqscope demo server...".green());

    let cfg = config::load_config(config_path)?;
    let profiler = Arc::new(Profiler::from_config(cfg.profiler.clone()));

    init_tracing_with_capture(&cfg.server, profiler.clone());
    info!(
        host = %cfg.server.host,
        port = cfg.server.port,
        "Configuration loaded"
    );

    server::start_server(cfg, profiler).await?;

    Ok(())
}
