use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use searchbox_cluster::{HttpClient, NodeChecker};
use searchbox_core::{logging, Config};

/// Discover the nodes of a search cluster and keep a client's server list current
#[derive(Debug, Parser)]
#[command(name = "searchbox", version)]
struct Args {
    /// Config file (falls back to SEARCHBOX_CONFIG_PATH, then ./searchbox.yaml)
    #[arg(short, long)]
    config: Option<String>,

    /// Run a single discovery cycle, print the servers and exit
    #[arg(long)]
    once: bool,
}

fn print_servers(client: &HttpClient) {
    for server in client.servers().iter() {
        println!("{server}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config_path = Config::locate(args.config.as_deref());
    let config = Config::load(config_path.as_deref())?;

    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(
        config_file = config_path.as_deref().unwrap_or("<none>"),
        servers = ?config.client.servers,
        "Searchbox starting"
    );

    // 3. Client and node checker
    let client = Arc::new(HttpClient::new(&config.client)?);
    let checker = Arc::new(NodeChecker::new(
        Arc::clone(&client),
        &config.client.discovery,
    )?);

    if args.once {
        let outcome = checker.run_one_iteration().await;
        info!(outcome = ?outcome, "Discovery cycle finished");
        print_servers(&client);
        return Ok(());
    }

    if !config.client.discovery.enabled {
        warn!("Node discovery is disabled, set client.discovery.enabled or use --once");
    }

    // 4. Run until interrupted
    checker.start()?;
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received");
    checker.shutdown().await;
    print_servers(&client);

    Ok(())
}
