mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use mr_core::config::{self, Config};
use mr_remote::{KeyMaterial, SshConnector};
use mr_server::context::AppContext;

async fn start_server(host: Option<String>, port: Option<u16>, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags win over file and environment.
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting mtxrelay {}", env!("CARGO_PKG_VERSION"));
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    // Resolve the credential once. A configured key that cannot be used is
    // fatal; no credential at all only disables /start-mt.
    let key = KeyMaterial::resolve(&config.remote).context("failed to resolve remote key")?;
    match key {
        Some(ref key) => tracing::info!("Remote key available at {}", key.path().display()),
        None => tracing::warn!("No remote key configured; /start-mt is disabled"),
    }

    let connector = SshConnector::from_config(&config.remote);
    if connector.is_available() {
        tracing::info!("Using ssh client {}", connector.program().display());
    } else {
        tracing::warn!(
            "ssh client {} not found; /start-mt will fail",
            connector.program().display()
        );
    }

    let ctx = AppContext::new(config, Arc::new(connector), key)
        .context("failed to build application context")?;

    mr_server::start(ctx).await?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise pick defaults by verbosity.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mtxrelay=trace,mr_server=trace,mr_remote=trace,mr_hls=debug,tower_http=debug".to_string()
        } else {
            "mtxrelay=debug,mr_server=debug,mr_remote=debug,mr_hls=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Check => check(cli.config.as_deref()),
        Commands::Version => {
            println!("mtxrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, searching default locations");
            config::load_config_or_default(None)?
        }
    };

    println!("✓ Configuration parsed");
    print_summary(&config);

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("\nNo warnings");
    } else {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}

fn print_summary(config: &Config) {
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Public base URL: {}",
        config.server.public_base_url.as_deref().unwrap_or("(relative)")
    );
    println!(
        "  Origin: {}",
        config.origin.base_url.as_deref().unwrap_or("(not set)")
    );
    println!("  Streams: {}", config.origin.streams.len());
    println!(
        "  Remote: {}@{}:{}",
        config.remote.user.as_deref().unwrap_or("?"),
        config.remote.host.as_deref().unwrap_or("?"),
        config.remote.port
    );
}

fn check(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking remote launch prerequisites...\n");

    let connector = SshConnector::from_config(&config.remote);
    if connector.is_available() {
        println!("✓ ssh - {}", connector.program().display());
    } else {
        println!("✗ ssh - not found");
    }

    match KeyMaterial::resolve(&config.remote) {
        Ok(Some(key)) => println!("✓ key - {}", key.path().display()),
        Ok(None) => println!("✗ key - not configured"),
        Err(e) => println!("✗ key - {e}"),
    }

    let missing = config.missing_launch_fields();
    println!();
    if missing.is_empty() && connector.is_available() {
        println!("Remote launch is ready.");
    } else {
        for field in &missing {
            println!("Missing: {field}");
        }
        println!("Remote launch is not ready.");
    }

    Ok(())
}
