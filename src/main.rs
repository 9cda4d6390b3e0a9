//! # HS Match CLI (`hsm`)
//!
//! ## Usage
//!
//! ```bash
//! hsm --config ./config/hsm.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hsm check` | Load and validate the taxonomy (and ISIC map) |
//! | `hsm classify "<text>"` | Rank HS codes for a product description |
//! | `hsm node <code>` | Show a node with its ancestors and children |
//! | `hsm isic <code>` | Show the HS codes mapped to an ISIC code |
//! | `hsm serve` | Start the HTTP server |
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`) to adjust.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use hs_match::engine::ClassifyOptions;
use hs_match::{commands, config, server};

/// HS Match: classify product descriptions into Harmonized System codes.
#[derive(Parser)]
#[command(
    name = "hsm",
    about = "HS Match: classify product descriptions into Harmonized System codes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hsm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the taxonomy source.
    Check,

    /// Classify a product description.
    Classify {
        /// Free-text product description.
        text: String,

        /// Number of candidates to return (defaults to matching.top_k_default).
        #[arg(long, allow_negative_numbers = true)]
        top_k: Option<i64>,

        /// ISIC industry code used to flag candidates.
        #[arg(long)]
        isic: Option<String>,

        /// Show raw score, boost, and boosting ancestor per candidate.
        #[arg(long)]
        explain: bool,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a taxonomy node with its ancestors and children.
    Node {
        /// HS code, e.g. `8517`.
        code: String,
    },

    /// Show the HS codes mapped to an ISIC code.
    Isic {
        /// ISIC industry code, e.g. `2630`.
        code: String,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Check => {
            commands::run_check(&cfg)?;
        }
        Commands::Classify {
            text,
            top_k,
            isic,
            explain,
            json,
        } => {
            let options = ClassifyOptions {
                top_k,
                isic,
                explain,
            };
            commands::run_classify(&cfg, &text, &options, json).await?;
        }
        Commands::Node { code } => {
            commands::run_node(&cfg, &code)?;
        }
        Commands::Isic { code } => {
            commands::run_isic(&cfg, &code)?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
