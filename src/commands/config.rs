use anyhow::Result;
use colored::Colorize;
use reqscope::config::{self, Config};
use std::path::Path;
use tracing::info;

/// Execute the config show command
///
/// Prints the effective configuration (file, env overrides, defaults) as TOML
pub fn show(path: Option<&Path>) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());
    info!("Loading configuration for display");

    let cfg = config::load_config(path)?;

    println!("{}", "Current Configuration:".green().bold());
    println!();
    println!("{}", toml::to_string_pretty(&cfg)?);

    info!("Configuration displayed successfully");
    Ok(())
}

/// Execute the config validate command
pub fn validate(path: Option<&Path>) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());
    info!("Validating configuration file");

    let cfg = config::load_config(path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    for line in summary_lines(&cfg) {
        println!("  {}", line);
    }

    info!("Configuration validation successful");
    Ok(())
}

fn summary_lines(cfg: &Config) -> Vec<String> {
    let profiler = &cfg.profiler;
    vec![
        format!("Listen: {}:{}", cfg.server.host, cfg.server.port),
        format!(
            "Capture: {}",
            if profiler.enabled { "enabled" } else { "disabled" }
        ),
        format!("Activation Header: {}", profiler.header_name),
        format!("Storage: {:?} (prefix '{}')", profiler.storage.kind, profiler.storage.key_prefix),
        format!(
            "Retention: {} requests / {} bytes / {}s",
            profiler.max_requests, profiler.max_storage_bytes, profiler.request_retention_seconds
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_lines() {
        let mut cfg = Config::default();
        cfg.profiler.enabled = false;
        cfg.profiler.max_requests = 10;

        let lines = summary_lines(&cfg);
        assert_eq!(lines[0], "Listen: 127.0.0.1:8080");
        assert_eq!(lines[1], "Capture: disabled");
        assert_eq!(lines[2], "Activation Header: X-Reqscope");
        assert!(lines[3].contains("prefix 'reqscope'"));
        assert!(lines[4].starts_with("Retention: 10 requests"));
    }
}
