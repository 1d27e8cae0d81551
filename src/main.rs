use anyhow::Context;
use clap::{Parser, Subcommand};

use geopipe::pipeline::{self, PipelineDeps};
use geopipe::{Settings, logging, scanner};

#[derive(Parser)]
#[command(name = "geopipe")]
#[command(about = "Watches a geospatial dataset tree and publishes changes to a map server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Config,

    /// Run the full pipeline (scanner, queue, workers, watchers)
    Run,

    /// Run a single polling scan pass and exit
    Scan,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force)?;
            println!("Configuration written to {}", path.display());
        }
        Commands::Config => {
            let settings = Settings::load().context("failed to load configuration")?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Run => {
            let settings = Settings::load().context("failed to load configuration")?;
            logging::init_with_config(&settings.logging);
            let deps = PipelineDeps::build(settings)
                .await
                .context("failed to initialize pipeline")?;
            pipeline::run(deps).await?;
        }
        Commands::Scan => {
            let settings = Settings::load().context("failed to load configuration")?;
            logging::init_with_config(&settings.logging);
            let deps = PipelineDeps::build(settings)
                .await
                .context("failed to initialize pipeline")?;
            let changes = scanner::scan_once(&deps).await?;
            println!("{changes} change(s) detected and queued");
        }
    }

    Ok(())
}
