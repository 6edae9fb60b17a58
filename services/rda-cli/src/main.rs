//! Command-line client for the RDA imagery API.
//!
//! Realizes template imagery into local tiles wrapped in a VRT, submits and
//! tracks batch materialization jobs, and manages their artifacts in the
//! customer data bucket.

mod config;
mod dg1b;
mod job;
mod template;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::ConfigArgs;

#[derive(Parser, Debug)]
#[command(name = "rda")]
#[command(about = "Client for the RDA imagery API")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Log level
    #[arg(long, env = "RDA_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Commands addressing a template: describe, metadata, realize, batch
    Template {
        #[command(subcommand)]
        command: template::TemplateCommand,
    },

    /// Commands addressing batch materialization jobs
    Job {
        #[command(subcommand)]
        command: job::JobCommand,
    },

    /// Commands addressing DigitalGlobe 1B image parts
    Dg1b {
        #[command(subcommand)]
        command: dg1b::Dg1bCommand,
    },

    /// Describe RDA operators; with no names, all operators are described
    Operator {
        /// Operator names to describe
        names: Vec<String>,
    },

    /// Fetch strip-level metadata for a DG catalog id
    Stripinfo {
        /// The catalog id to describe
        catalog_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // One cancellation signal for everything; Ctrl+C trips it.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received a shutdown signal, winding down");
        signal_cancel.cancel();
    });

    match cli.command {
        Command::Template { command } => template::run(command, &cli.config, &cancel).await,
        Command::Job { command } => job::run(command, &cli.config, &cancel).await,
        Command::Dg1b { command } => dg1b::run(command, &cli.config, &cancel).await,
        Command::Operator { names } => {
            let client = cli.config.http_client()?;
            let endpoints = cli.config.endpoints()?;
            let ops = rda_client::catalog::operator_info(&client, &endpoints, &names, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&ops)?);
            Ok(())
        }
        Command::Stripinfo { catalog_id } => {
            let client = cli.config.http_client()?;
            let endpoints = cli.config.endpoints()?;
            let info = rda_client::catalog::strip_info(&client, &endpoints, &catalog_id, &cancel)
                .await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
    }
}
