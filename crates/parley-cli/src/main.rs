use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use parley_core::config::{Config, DEFAULT_PORT, GatewayConfig};
use parley_gateway::GatewayState;

mod logging;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Real-time voice conversation gateway",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 8000)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show gateway status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration, or one value by dotted path
    Show {
        /// Dotted path such as `gateway.port` or `agent.model`
        path: Option<String>,
    },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let mut config = Config::load(&config_path)?;

    logging::init(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port, bind } => {
            if let Some(bind) = bind {
                match config.gateway.as_mut() {
                    Some(gateway) => gateway.bind = Some(bind),
                    None => {
                        config.gateway = Some(GatewayConfig {
                            port: DEFAULT_PORT,
                            bind: Some(bind),
                            handshake_timeout_secs: None,
                            cors_origins: Vec::new(),
                        })
                    }
                }
            }

            let (warnings, errors) = config.validate();
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
            if !errors.is_empty() {
                for error in &errors {
                    tracing::error!("{error}");
                }
                anyhow::bail!("Invalid configuration in {}", config_path.display());
            }

            let port = port.unwrap_or_else(|| config.gateway_port());
            tracing::info!(config = %config_path.display(), "Starting Parley gateway on port {port}");

            let state = GatewayState::from_config(Arc::new(config));
            #[cfg(feature = "metrics")]
            let state = state.with_prometheus(parley_gateway::metrics::install_prometheus_recorder()?);

            parley_gateway::start_gateway(Arc::new(state), port).await?;
        }
        Commands::Status => {
            println!("Parley v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Gateway port: {}", config.gateway_port());

            let keys = config.keys();
            for (name, present) in [
                ("gemini", keys.resolve_gemini().is_some()),
                ("assemblyai", keys.resolve_assemblyai().is_some()),
                ("murf", keys.resolve_murf().is_some()),
                ("weather", keys.resolve_weather().is_some()),
                ("tavily", keys.resolve_tavily().is_some()),
            ] {
                let state = if present { "configured" } else { "not set" };
                println!("Key {name}: {state}");
            }

            match probe_health(config.gateway_port()).await {
                Some(health) => println!(
                    "Status: running ({} active sessions)",
                    health["sessions"].as_u64().unwrap_or(0)
                ),
                None => println!("Status: not running"),
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { path } => {
                println!("{}", render_config(&config, path.as_deref())?);
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s)", errors.len());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
    }

    Ok(())
}

/// Pretty JSON for the whole config or the value at `path`.
fn render_config(config: &Config, path: Option<&str>) -> anyhow::Result<String> {
    let value = match path {
        Some(path) => config
            .get_path(path)
            .ok_or_else(|| anyhow::anyhow!("No config value at '{path}'"))?,
        None => serde_json::to_value(config)?,
    };
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Ask a local gateway for its health document.
async fn probe_health(port: u16) -> Option<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .ok()?;
    let response = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.json().await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            gateway: Some(GatewayConfig {
                port: 9100,
                bind: Some("127.0.0.1".into()),
                handshake_timeout_secs: None,
                cors_origins: Vec::new(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_show_single_value() {
        assert_eq!(render_config(&config(), Some("gateway.port")).unwrap(), "9100");
        assert_eq!(
            render_config(&config(), Some("gateway.bind")).unwrap(),
            "\"127.0.0.1\""
        );
    }

    #[test]
    fn test_show_unknown_path_fails() {
        let err = render_config(&config(), Some("gateway.nope")).unwrap_err();
        assert!(err.to_string().contains("gateway.nope"));
    }

    #[test]
    fn test_show_whole_config() {
        let rendered = render_config(&config(), None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["gateway"]["port"], 9100);
    }
}
