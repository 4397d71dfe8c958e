//! Build Proxy CLI
//!
//! Entry point for the `build-proxy` server.

use clap::Parser;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use build_proxy::config::ConfigFile;
use build_proxy::logging::LevelFlags;
use build_proxy::{logging, run_session, ConfigError, ServerConfig};
use proxy_tooling::cli::CommandLineConnector;
use proxy_tooling::ToolingConnector;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "build-proxy")]
#[command(about = "Single-connection build proxy server", version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Address to bind (default: 127.0.0.1)
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Port to bind (default: ephemeral)
    #[arg(long)]
    port: Option<u16>,

    /// Project directory (default: current directory)
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Build tool executable to run instead of the discovered one
    #[arg(long)]
    gradle_command: Option<PathBuf>,

    // Log level flags. The first one given wins.
    #[command(flatten)]
    verbosity: LevelFlags,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbosity.level(std::env::args()));

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let connector: Arc<dyn ToolingConnector> = Arc::new(match &config.gradle_command {
        Some(command) => CommandLineConnector::with_command(command.clone()),
        None => CommandLineConnector::new(),
    });

    match run_session(&config, connector, &mut io::stdout()) {
        Ok(outcome) => {
            info!(?outcome, "exiting");
        }
        Err(e) => {
            error!(error = %e, "session aborted");
            eprintln!("Error: {}", e);
            process::exit(i32::from(e.exit_code()));
        }
    }
}

fn load_config(cli: &Cli) -> Result<ServerConfig, ConfigError> {
    let mut config = ServerConfig::default();
    if let Some(path) = &cli.config {
        config.apply_file(ConfigFile::from_path(path)?);
    }
    config.apply_process_env()?;

    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(dir) = &cli.project_dir {
        config.project_dir = Some(dir.clone());
    }
    if let Some(command) = &cli.gradle_command {
        config.gradle_command = Some(command.clone());
    }

    config.validate()?;
    Ok(config)
}
