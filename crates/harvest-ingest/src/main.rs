//! mbz-harvest - Moodle backup extraction tool

use anyhow::Result;
use clap::{Parser, Subcommand};
use harvest_common::logging::{init_logging, LogConfig, LogLevel};
use harvest_ingest::catalog::DEFAULT_CATALOG_URL;
use harvest_ingest::pipeline::{self, DEFAULT_SCRATCH_DIR};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "mbz-harvest")]
#[command(author, version, about = "Extract forum posts and open-data links from Moodle backups")]
struct Cli {
    #[command(subcommand)]
    sink: Sink,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Scratch directory archives are extracted into
    #[arg(long, global = true, default_value = DEFAULT_SCRATCH_DIR)]
    scratch: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Sink {
    /// Load enriched posts into a Postgres database
    Database {
        /// Input .mbz file or folder of .mbz files
        #[arg(short, long)]
        input: PathBuf,

        /// Postgres connection string
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,

        /// Base URL of the open-data catalog
        #[arg(long, env = "CATALOG_BASE_URL", default_value = DEFAULT_CATALOG_URL)]
        catalog_url: String,
    },

    /// Write enriched posts as CSV exports
    Csv {
        /// Input .mbz file or folder of .mbz files
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for the CSV files
        #[arg(short, long, default_value = "./csv_output")]
        output: PathBuf,

        /// Base URL of the open-data catalog
        #[arg(long, env = "CATALOG_BASE_URL", default_value = DEFAULT_CATALOG_URL)]
        catalog_url: String,
    },

    /// Render all posts as static paginated HTML
    Html {
        /// Input .mbz file or folder of .mbz files
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for the export
        #[arg(short, long, default_value = "./forum_export")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::new(log_level)
        .from_env()
        .unwrap_or_else(|_| LogConfig::new(log_level));
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        error!(error = %e, "Run failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.sink {
        Sink::Database {
            input,
            database_url,
            catalog_url,
        } => {
            info!("Harvesting into database");
            pipeline::run_database(&input, &cli.scratch, &database_url, &catalog_url).await?;
        },
        Sink::Csv {
            input,
            output,
            catalog_url,
        } => {
            info!("Harvesting into CSV export");
            pipeline::run_csv(&input, &cli.scratch, &output, &catalog_url).await?;
        },
        Sink::Html { input, output } => {
            info!("Rendering HTML export");
            pipeline::run_html(&input, &cli.scratch, &output).await?;
        },
    }

    info!("Done");
    Ok(())
}
