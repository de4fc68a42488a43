//! Forge - Development Tools

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "forge-tools")]
#[command(about = "Development tools for Forge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate content catalog files
    Validate {
        /// Catalog file, or directory of catalogs
        #[arg(default_value = "data")]
        path: PathBuf,
    },
    /// Print a snapshot or module chunk as JSON
    Decode {
        /// File to decode
        path: PathBuf,
        /// Catalog the file was written against
        #[arg(short, long, default_value = "data/content.ron")]
        content: PathBuf,
        /// Treat the file as a bare tile module chunk
        #[arg(short, long)]
        modules: bool,
    },
}

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => {
            tracing::info!("Validating catalogs in: {}", path.display());
            match forge_tools::validate::validate_path(&path) {
                Ok(reports) => {
                    for report in reports {
                        tracing::info!(
                            "{}: {} items, {} liquids, {} units, {} blocks, {} spawn groups",
                            report.path.display(),
                            report.items,
                            report.liquids,
                            report.units,
                            report.blocks,
                            report.spawn_groups
                        );
                    }
                    tracing::info!("Validation passed");
                }
                Err(e) => {
                    tracing::error!("Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Decode {
            path,
            content,
            modules,
        } => match forge_tools::decode::decode_file(&path, &content, modules) {
            Ok(dump) => match serde_json::to_string_pretty(&dump) {
                Ok(text) => println!("{text}"),
                Err(e) => {
                    tracing::error!("Cannot print dump: {e}");
                    std::process::exit(1);
                }
            },
            Err(e) => {
                tracing::error!("Decode failed: {e}");
                std::process::exit(1);
            }
        },
    }
}
