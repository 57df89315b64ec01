//! Command handlers behind the `nota` binary

use anyhow::{Context, Result};
use colored::Colorize;
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::{formatters, Cli, Commands};
use crate::config::Config;
use crate::db::{self, MemoryStore, SqliteStore};
use crate::importers::invoice::{read_earnings, read_invoice};
use crate::repository::{PositionRepository, TradeBatchRepository};
use crate::settlement::{settle_invoice, InvoiceOutcome};
use crate::tax::darf::{format_nothing_due, DarfPayment};
use crate::tax::trade_batch::assess_income_tax;
use crate::utils::parse_month;

/// Resolved settings shared by every handler
struct Session {
    config: Config,
    db_path: PathBuf,
    json: bool,
}

impl Session {
    fn new(cli: &Cli) -> Result<Self> {
        let config = Config::load(cli.config.as_deref())?;
        let db_path = match cli.db.clone().or_else(|| config.database.clone()) {
            Some(path) => path,
            None => db::get_default_db_path()?,
        };
        Ok(Self {
            config,
            db_path,
            json: cli.json,
        })
    }

    /// Open the ledger, creating any missing table.
    fn ledger(&self) -> Result<Connection> {
        let conn = db::open_db(Some(self.db_path.clone()))?;
        db::apply_schema(&conn)?;
        Ok(conn)
    }

    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).context("Failed to serialize output")?
            );
        } else {
            print!("{}", text());
        }
        Ok(())
    }
}

/// Run a parsed command line
pub fn run(cli: Cli) -> Result<()> {
    let session = Session::new(&cli)?;

    match &cli.command {
        Commands::Init => handle_init(&session),
        Commands::Settle { file, dry_run } => handle_settle(&session, file, *dry_run),
        Commands::Earnings { file } => handle_earnings(&session, file),
        Commands::Positions { investor } => handle_positions(&session, investor.as_deref()),
        Commands::Batch { investor, month } => handle_batch(&session, investor, month),
        Commands::Darf { investor, month } => handle_darf(&session, investor, month),
    }
}

fn handle_init(session: &Session) -> Result<()> {
    db::init_database(Some(session.db_path.clone()))?;
    println!(
        "{} Ledger ready at {}",
        "✓".green().bold(),
        session.db_path.display()
    );
    Ok(())
}

fn handle_settle(session: &Session, file: &Path, dry_run: bool) -> Result<()> {
    let input = read_invoice(file)?;
    info!(
        "Read invoice {:?} of {} with {} lines",
        input.number,
        input.investor.id,
        input.lines.len()
    );

    let outcome = if dry_run {
        if session.db_path.exists() {
            let mut conn = session.ledger()?;
            db::preview_invoice(&mut conn, &input, &session.config.rates)?
        } else {
            // No ledger yet: settle against an empty store that is dropped afterwards
            settle_invoice(&mut MemoryStore::new(), &input, &session.config.rates)?
        }
    } else {
        let mut conn = session.ledger()?;
        db::process_invoice(&mut conn, &input, &session.config.rates)?
    };

    session.emit(&outcome, || match &outcome {
        InvoiceOutcome::Duplicate { fingerprint } => {
            formatters::format_duplicate_invoice(fingerprint)
        }
        InvoiceOutcome::Processed(settled) => {
            let mut text = formatters::format_settled_invoice(settled, dry_run);
            if dry_run {
                text.push_str(&format!("\n{} Dry run, nothing was saved\n", "ℹ".blue().bold()));
            }
            text
        }
    })
}

fn handle_earnings(session: &Session, file: &Path) -> Result<()> {
    let input = read_earnings(file)?;
    let mut conn = session.ledger()?;
    let outcome = db::process_earnings(&mut conn, &input, &session.config.rates)?;
    session.emit(&outcome, || formatters::format_earnings_outcome(&outcome))
}

fn handle_positions(session: &Session, investor: Option<&str>) -> Result<()> {
    let conn = session.ledger()?;
    let positions = SqliteStore::new(&conn).list_positions(investor)?;
    session.emit(&positions, || {
        if positions.is_empty() {
            formatters::format_empty_positions()
        } else {
            formatters::format_positions(&positions)
        }
    })
}

fn handle_batch(session: &Session, investor: &str, month: &str) -> Result<()> {
    let month_start = parse_month(month)?;
    let conn = session.ledger()?;
    let batch = SqliteStore::new(&conn).find_trade_batch(investor, month_start)?;

    match batch {
        Some(batch) => {
            let assessment = assess_income_tax(&batch.buckets, &session.config.rates);
            session.emit(&(&batch, &assessment), || {
                formatters::format_trade_batch(&batch, &assessment)
            })
        }
        None => session.emit(&Option::<()>::None, || {
            format!(
                "{} No trades for {} in {}\n",
                "ℹ".blue().bold(),
                investor,
                month_start.format("%m/%Y")
            )
        }),
    }
}

fn handle_darf(session: &Session, investor: &str, month: &str) -> Result<()> {
    let month_start = parse_month(month)?;
    let conn = session.ledger()?;
    let payment = SqliteStore::new(&conn)
        .find_trade_batch(investor, month_start)?
        .and_then(|batch| DarfPayment::from_batch(&batch));

    session.emit(&payment, || match &payment {
        Some(payment) => format!("{}\n", payment.format()),
        None => format!("{}\n", format_nothing_due(month_start)),
    })
}
