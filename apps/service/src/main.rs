use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use logger::{init_tracing, init_tracing_verbose};

use lanwatch::config::Config;
use lanwatch::orchestrator::Orchestrator;

/// LAN service monitor and network discovery scanner
#[derive(Parser)]
#[command(name = "lanwatch", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/lanwatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring scheduler until Ctrl-C
    Monitor,

    /// Run one discovery scan and print the hosts found as JSON
    Scan {
        /// Range to scan, CIDR or bare address; repeatable
        #[arg(long = "cidr")]
        cidrs: Vec<String>,

        /// Add hosts that are not monitored yet as services
        #[arg(long)]
        promote: bool,
    },

    /// Check one service now and print the updated record
    Check { id: i64 },

    /// Print the most recent SNMP traps as JSON
    Traps {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.verbose {
        init_tracing_verbose();
    } else {
        init_tracing();
    }

    let config = Config::from_config(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            print!("{config}");
        }
        Commands::Monitor => {
            let orchestrator = Orchestrator::new(config).await?;
            orchestrator.run_monitor().await?;
        }
        Commands::Scan { cidrs, promote } => {
            let orchestrator = Orchestrator::new(config).await?;
            let hosts = orchestrator.scanner().scan_network(cidrs).await?;
            println!("{}", serde_json::to_string_pretty(&hosts)?);

            if promote {
                let inserted = orchestrator.promote(&hosts).await?;
                eprintln!("promoted {} new host(s)", inserted.len());
            }
        }
        Commands::Check { id } => {
            let orchestrator = Orchestrator::new(config).await?;
            if orchestrator.monitor().check_by_id(id).await?.is_none() {
                bail!("service {id} not found");
            }
            let Some(service) = orchestrator.database().get_service(id).await? else {
                bail!("service {id} disappeared after the check");
            };
            println!("{}", serde_json::to_string_pretty(&service)?);
        }
        Commands::Traps { limit } => {
            let orchestrator = Orchestrator::new(config).await?;
            let traps = orchestrator.database().recent_traps(limit).await?;
            println!("{}", serde_json::to_string_pretty(&traps)?);
        }
    }

    Ok(())
}
