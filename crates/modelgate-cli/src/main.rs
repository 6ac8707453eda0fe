mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, models::ModelsSubcommand, routes::RoutesSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "modelgate",
    about = "Start model servers on first request and stop them when idle",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./modelgate.yaml when present, else built-in defaults)
    #[arg(long, short = 'c', global = true, env = "MODELGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gate with its reaper, route publisher and log follower
    Serve {
        /// Listen address, overrides `listen` from the config
        #[arg(long, env = "MODELGATE_LISTEN")]
        listen: Option<String>,
    },

    /// Inspect and control models on a running gate
    Models {
        /// Base URL of the gate
        #[arg(long, global = true, env = "MODELGATE_URL", default_value = "http://localhost:5003")]
        url: String,

        #[command(subcommand)]
        subcommand: ModelsSubcommand,
    },

    /// Show per-model activity from a running gate
    Activity {
        /// Base URL of the gate
        #[arg(long, env = "MODELGATE_URL", default_value = "http://localhost:5003")]
        url: String,
    },

    /// Inspect and scaffold the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Render routing artifacts from the configured catalog
    Routes {
        #[command(subcommand)]
        subcommand: RoutesSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Serve { listen } => cmd::serve::run(config_path, listen),
        Commands::Models { url, subcommand } => cmd::models::run(&url, subcommand, cli.json),
        Commands::Activity { url } => cmd::models::activity(&url, cli.json),
        Commands::Config { subcommand } => cmd::config::run(config_path, subcommand, cli.json),
        Commands::Routes { subcommand } => cmd::routes::run(config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
