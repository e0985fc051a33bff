//! Shadow Agent CLI
//!
//! Runs the upload control agent and offers a few inspection tools.
//!
//! # Commands
//!
//! - `topics` - Print every topic the agent publishes or subscribes to
//! - `adapter-host` - Print the adapter host from the MTConnect agent file
//! - `simulate` - Run the agent against an in-process cloud

mod commands;

use clap::{Parser, Subcommand};
use shadow_agent::AgentConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Device shadow upload control agent.
#[derive(Parser)]
#[command(name = "shadow-agent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the agent configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the derived topic names
    Topics {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the adapter host configured for the machine
    AdapterHost,

    /// Run the agent against an in-process cloud
    Simulate {
        /// Operator write applied once the agent is up (repeatable)
        #[arg(short, long, value_name = "KEY=VALUE")]
        desired: Vec<String>,

        /// Seconds to keep running after the operator write
        #[arg(long, default_value = "5")]
        duration: u64,

        /// Adapter address reported by the simulated parameter service
        #[arg(long)]
        adapter_ip: Option<String>,

        /// JSON file sampled as machine telemetry
        #[arg(short, long)]
        telemetry: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Topics { format } => {
            let path = cli.config.ok_or("Configuration file required for topics")?;
            commands::topics::run(&AgentConfig::load(&path)?, &format)?;
        }
        Commands::AdapterHost => {
            let path = cli.config.ok_or("Configuration file required for adapter-host")?;
            commands::adapter_host::run(&AgentConfig::load(&path)?)?;
        }
        Commands::Simulate {
            desired,
            duration,
            adapter_ip,
            telemetry,
        } => {
            let path = cli.config.ok_or("Configuration file required for simulate")?;
            let config = AgentConfig::load(&path)?;
            let options = commands::simulate::SimulateOptions {
                desired,
                duration: std::time::Duration::from_secs(duration),
                adapter_ip,
                telemetry,
            };
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::simulate::run(config, options))?;
        }
        Commands::Version => {
            println!("Shadow Agent v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
