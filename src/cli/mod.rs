use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod formatters;
pub mod runner;

#[derive(Parser)]
#[command(name = "nota")]
#[command(
    version,
    about = "B3 brokerage invoice settlement with average cost and income tax"
)]
#[command(
    long_about = "Settle B3 brokerage invoices into positions, lots, trades and monthly income tax batches, keeping a SQLite ledger."
)]
pub struct Cli {
    /// SQLite ledger file (defaults to ~/.nota/ledger.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Configuration file (defaults to <config dir>/nota/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable colorized/ANSI output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Output results in JSON format
    #[arg(long = "json", global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Create the ledger tables
    Init,

    /// Settle a brokerage invoice (JSON)
    Settle {
        /// Path to the invoice JSON file
        file: PathBuf,

        /// Preview only, don't save to database
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Record an earnings statement (JSON)
    Earnings {
        /// Path to the earnings JSON file
        file: PathBuf,
    },

    /// Show positions
    Positions {
        /// Only this investor
        #[arg(long)]
        investor: Option<String>,
    },

    /// Show a month's trade batch and income tax
    Batch {
        investor: String,
        /// Month as YYYY-MM
        month: String,
    },

    /// Show the income tax payment slip of a month
    Darf {
        investor: String,
        /// Month as YYYY-MM
        month: String,
    },
}
