// Database module - SQLite ledger store and models

pub mod memory;
pub mod models;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::SettlementError;
use crate::importers::invoice::{EarningsInput, InvoiceInput};
use crate::repository::{
    EarningRepository, InvoiceRepository, LotRepository, PositionRepository, TaxCatalog,
    TaxGroupRepository, TradeBatchRepository,
};
use crate::settlement::{settle_earnings, settle_invoice, EarningsOutcome, InvoiceOutcome};
use crate::tax::catalog::{Tax, TaxCode, TaxRates, TaxScope};
use crate::tax::group::{TaxGroup, TaxInstance};
pub use memory::MemoryStore;
pub use models::{
    AssetClass, Direction, Earning, EarningKind, InvoiceLine, InvoiceRecord, ItemBatch, Lot,
    Position, SaleAllocation, Trade, TradeBatch, TradeBatchData,
};

/// Get the default database path (~/.nota/ledger.db)
pub fn get_default_db_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let nota_dir = PathBuf::from(home).join(".nota");

    std::fs::create_dir_all(&nota_dir).context("Failed to create .nota directory")?;

    Ok(nota_dir.join("ledger.db"))
}

/// Open database connection
pub fn open_db(db_path: Option<PathBuf>) -> Result<Connection> {
    let path = match db_path {
        Some(path) => path,
        None => get_default_db_path()?,
    };
    let conn = Connection::open(&path).context(format!("Failed to open database at {:?}", path))?;

    conn.execute("PRAGMA foreign_keys = ON", [])
        .context("Failed to enable foreign keys")?;

    Ok(conn)
}

/// Create every table on an open connection.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(include_str!("schema.sql"))
        .context("Failed to execute schema")
}

/// Initialize the database file with the schema
pub fn init_database(db_path: Option<PathBuf>) -> Result<()> {
    let path = match db_path {
        Some(path) => path,
        None => get_default_db_path()?,
    };

    info!("Initializing database at: {:?}", path);

    let conn = open_db(Some(path))?;
    apply_schema(&conn)?;

    info!("Database initialized successfully");
    Ok(())
}

/// Settle one invoice inside an IMMEDIATE transaction; any error rolls it all back.
pub fn process_invoice(
    conn: &mut Connection,
    input: &InvoiceInput,
    rates: &TaxRates,
) -> Result<InvoiceOutcome> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("Failed to start invoice transaction")?;
    let outcome = settle_invoice(&mut SqliteStore::new(&tx), input, rates)?;
    tx.commit().context("Failed to commit invoice")?;
    Ok(outcome)
}

/// Settle one invoice and roll the transaction back, whatever the outcome.
pub fn preview_invoice(
    conn: &mut Connection,
    input: &InvoiceInput,
    rates: &TaxRates,
) -> Result<InvoiceOutcome> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("Failed to start invoice transaction")?;
    let outcome = settle_invoice(&mut SqliteStore::new(&tx), input, rates)?;
    tx.rollback().context("Failed to roll back preview")?;
    Ok(outcome)
}

/// Record an earnings statement inside one transaction.
pub fn process_earnings(
    conn: &mut Connection,
    input: &EarningsInput,
    rates: &TaxRates,
) -> Result<EarningsOutcome> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("Failed to start earnings transaction")?;
    let outcome = settle_earnings(&mut SqliteStore::new(&tx), input, rates)?;
    tx.commit().context("Failed to commit earnings")?;
    Ok(outcome)
}

/// Helper to read Decimal from SQLite (stored as TEXT, tolerant of numbers)
pub fn get_decimal_value(row: &rusqlite::Row, idx: usize) -> Result<Decimal, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    match row.get_ref(idx)? {
        ValueRef::Text(bytes) => {
            let s = std::str::from_utf8(bytes).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            })?;
            Decimal::from_str(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            })
        }
        ValueRef::Integer(i) => Ok(Decimal::from(i)),
        ValueRef::Real(f) => Decimal::try_from(f)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Real, Box::new(e))),
        _ => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "decimal".to_string(),
            Type::Null,
        )),
    }
}

/// Read a TEXT column through a `FromStr` with a unit error.
fn get_parsed<T: FromStr>(
    row: &rusqlite::Row,
    idx: usize,
    what: &str,
) -> Result<T, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::new(SettlementError::ParseError(format!("invalid {} '{}'", what, raw))),
        )
    })
}

/// Updates must hit exactly one row.
fn expect_one_row(changed: usize, what: &str, id: i64) -> Result<()> {
    if changed != 1 {
        return Err(SettlementError::DbError(format!(
            "updating {} {} touched {} rows",
            what, id, changed
        ))
        .into());
    }
    Ok(())
}

fn require_id(id: Option<i64>, what: &str) -> Result<i64> {
    id.ok_or_else(|| SettlementError::DbError(format!("{} has no id", what)).into())
}

/// Repository implementation over a SQLite connection or transaction
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn load_buckets(&self, trade_batch_id: i64) -> Result<BTreeMap<AssetClass, TradeBatchData>> {
        let mut stmt = self.conn.prepare(
            "SELECT asset_class, accumulated_loss, current_results, total_tax, total_trade_volume
             FROM trade_batch_buckets WHERE trade_batch_id = ?1",
        )?;
        let buckets = stmt
            .query_map([trade_batch_id], |row| {
                Ok((
                    get_parsed::<AssetClass>(row, 0, "asset class")?,
                    TradeBatchData {
                        accumulated_loss: get_decimal_value(row, 1)?,
                        current_results: get_decimal_value(row, 2)?,
                        total_tax: get_decimal_value(row, 3)?,
                        total_trade_volume: get_decimal_value(row, 4)?,
                    },
                ))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(buckets)
    }

    fn load_trade_batch(&mut self, row: (i64, String, NaiveDate, i64)) -> Result<TradeBatch> {
        let (id, investor, month_start, tax_group_id) = row;
        let tax_group = self.find_tax_group(tax_group_id)?.ok_or_else(|| {
            SettlementError::DbError(format!(
                "trade batch {} points to missing tax group {}",
                id, tax_group_id
            ))
        })?;
        Ok(TradeBatch {
            id: Some(id),
            investor,
            month_start,
            tax_group,
            buckets: self.load_buckets(id)?,
        })
    }

    fn upsert_buckets(
        &self,
        batch_id: i64,
        buckets: &BTreeMap<AssetClass, TradeBatchData>,
    ) -> Result<()> {
        for (class, data) in buckets {
            self.conn.execute(
                "INSERT INTO trade_batch_buckets (
                    trade_batch_id, asset_class, accumulated_loss,
                    current_results, total_tax, total_trade_volume
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(trade_batch_id, asset_class) DO UPDATE SET
                    accumulated_loss = excluded.accumulated_loss,
                    current_results = excluded.current_results,
                    total_tax = excluded.total_tax,
                    total_trade_volume = excluded.total_trade_volume",
                params![
                    batch_id,
                    class.as_str(),
                    data.accumulated_loss.to_string(),
                    data.current_results.to_string(),
                    data.total_tax.to_string(),
                    data.total_trade_volume.to_string(),
                ],
            )?;
        }
        Ok(())
    }
}

fn position_from_row(row: &rusqlite::Row) -> Result<Position, rusqlite::Error> {
    Ok(Position {
        id: Some(row.get(0)?),
        investor: row.get(1)?,
        security: row.get(2)?,
        opened_on: row.get(3)?,
        quantity: get_decimal_value(row, 4)?,
        total_cost: get_decimal_value(row, 5)?,
        average_cost: get_decimal_value(row, 6)?,
    })
}

fn lot_from_row(row: &rusqlite::Row) -> Result<Lot, rusqlite::Error> {
    Ok(Lot {
        id: Some(row.get(0)?),
        investor: row.get(1)?,
        security: row.get(2)?,
        line_id: row.get(3)?,
        quantity: get_decimal_value(row, 4)?,
        remaining_balance: get_decimal_value(row, 5)?,
        price: get_decimal_value(row, 6)?,
        acquired_on: row.get(7)?,
        sequence: row.get(8)?,
    })
}

fn trade_from_row(row: &rusqlite::Row) -> Result<Trade, rusqlite::Error> {
    Ok(Trade {
        id: Some(row.get(0)?),
        line_id: row.get(1)?,
        tax_group_id: row.get(2)?,
        position_id: row.get(3)?,
        trade_batch_id: row.get(4)?,
        market_date: row.get(5)?,
        asset_class: get_parsed(row, 6, "asset class")?,
        quantity: get_decimal_value(row, 7)?,
        cost_basis: get_decimal_value(row, 8)?,
        proceeds: get_decimal_value(row, 9)?,
        average_price: get_decimal_value(row, 10)?,
        raw_result: get_decimal_value(row, 11)?,
        total_tax: get_decimal_value(row, 12)?,
    })
}

fn earning_from_row(row: &rusqlite::Row) -> Result<Earning, rusqlite::Error> {
    Ok(Earning {
        id: Some(row.get(0)?),
        uuid: row.get(1)?,
        investor: row.get(2)?,
        security: row.get(3)?,
        kind: get_parsed(row, 4, "earning kind")?,
        pay_date: row.get(5)?,
        raw_value: get_decimal_value(row, 6)?,
        net_value: get_decimal_value(row, 7)?,
        tax_group_id: row.get(8)?,
    })
}

impl TaxCatalog for SqliteStore<'_> {
    fn find_tax_by_code(&mut self, code: TaxCode) -> Result<Option<Tax>> {
        let tax = self
            .conn
            .query_row(
                "SELECT id, source, rate FROM taxes WHERE code = ?1",
                [code.as_str()],
                |row| {
                    Ok(Tax {
                        id: Some(row.get(0)?),
                        code,
                        source: row.get(1)?,
                        rate: get_decimal_value(row, 2)?,
                    })
                },
            )
            .optional()?;
        Ok(tax)
    }

    fn create_tax(&mut self, tax: &Tax) -> Result<Tax> {
        self.conn.execute(
            "INSERT INTO taxes (code, source, rate) VALUES (?1, ?2, ?3)",
            params![tax.code.as_str(), tax.source, tax.rate.to_string()],
        )?;
        Ok(Tax {
            id: Some(self.conn.last_insert_rowid()),
            ..tax.clone()
        })
    }

    fn update_tax(&mut self, tax: &Tax) -> Result<()> {
        let id = require_id(tax.id, "tax")?;
        let changed = self.conn.execute(
            "UPDATE taxes SET source = ?1, rate = ?2, updated_at = datetime('now') WHERE id = ?3",
            params![tax.source, tax.rate.to_string(), id],
        )?;
        expect_one_row(changed, "tax", id)
    }
}

impl TaxGroupRepository for SqliteStore<'_> {
    fn create_tax_group(&mut self, group: &TaxGroup) -> Result<TaxGroup> {
        self.conn.execute(
            "INSERT INTO tax_groups (scope, external_id) VALUES (?1, ?2)",
            params![group.scope.source(), group.external_id],
        )?;
        let group_id = self.conn.last_insert_rowid();

        let mut taxes = Vec::with_capacity(group.taxes().len());
        for instance in group.taxes() {
            let tax_id = require_id(instance.tax.id, "tax dictionary entry")?;
            self.conn.execute(
                "INSERT INTO tax_instances (
                    tax_group_id, tax_id, market_date, base_value, tax_value, tax_rate
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    group_id,
                    tax_id,
                    instance.market_date,
                    instance.base_value.to_string(),
                    instance.tax_value.to_string(),
                    instance.tax_rate.to_string(),
                ],
            )?;
            taxes.push(TaxInstance {
                id: Some(self.conn.last_insert_rowid()),
                tax_group_id: Some(group_id),
                ..instance.clone()
            });
        }

        debug!("Stored tax group {} as {}", group.external_id, group_id);
        Ok(TaxGroup::from_parts(
            Some(group_id),
            group.scope,
            group.external_id,
            taxes,
        ))
    }

    fn update_tax_instances(&mut self, instances: &[TaxInstance]) -> Result<()> {
        for instance in instances {
            let id = require_id(instance.id, "tax instance")?;
            let changed = self.conn.execute(
                "UPDATE tax_instances SET base_value = ?1, tax_value = ?2, tax_rate = ?3
                 WHERE id = ?4",
                params![
                    instance.base_value.to_string(),
                    instance.tax_value.to_string(),
                    instance.tax_rate.to_string(),
                    id,
                ],
            )?;
            expect_one_row(changed, "tax instance", id)?;
        }
        Ok(())
    }

    fn find_tax_group(&mut self, id: i64) -> Result<Option<TaxGroup>> {
        let header: Option<(TaxScope, i64)> = self
            .conn
            .query_row(
                "SELECT scope, external_id FROM tax_groups WHERE id = ?1",
                [id],
                |row| Ok((get_parsed(row, 0, "tax scope")?, row.get(1)?)),
            )
            .optional()?;

        let Some((scope, external_id)) = header else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT ti.id, t.id, t.code, t.source, t.rate,
                    ti.market_date, ti.base_value, ti.tax_value, ti.tax_rate
             FROM tax_instances ti
             JOIN taxes t ON t.id = ti.tax_id
             WHERE ti.tax_group_id = ?1
             ORDER BY ti.id",
        )?;
        let taxes = stmt
            .query_map([id], |row| {
                let code: String = row.get(2)?;
                let code = code.parse::<TaxCode>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
                })?;
                Ok(TaxInstance {
                    id: Some(row.get(0)?),
                    tax_group_id: Some(id),
                    tax: Tax {
                        id: Some(row.get(1)?),
                        code,
                        source: row.get(3)?,
                        rate: get_decimal_value(row, 4)?,
                    },
                    market_date: row.get(5)?,
                    base_value: get_decimal_value(row, 6)?,
                    tax_value: get_decimal_value(row, 7)?,
                    tax_rate: get_decimal_value(row, 8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(TaxGroup::from_parts(Some(id), scope, external_id, taxes)))
    }
}

impl PositionRepository for SqliteStore<'_> {
    fn find_position(&mut self, investor: &str, security: &str) -> Result<Option<Position>> {
        let position = self
            .conn
            .query_row(
                "SELECT id, investor, security, opened_on, quantity, total_cost, average_cost
                 FROM positions WHERE investor = ?1 AND security = ?2",
                params![investor, security],
                position_from_row,
            )
            .optional()?;
        Ok(position)
    }

    fn create_position(&mut self, position: &Position) -> Result<Position> {
        self.conn.execute(
            "INSERT INTO positions (investor, security, opened_on, quantity, total_cost, average_cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                position.investor,
                position.security,
                position.opened_on,
                position.quantity.to_string(),
                position.total_cost.to_string(),
                position.average_cost.to_string(),
            ],
        )?;
        Ok(Position {
            id: Some(self.conn.last_insert_rowid()),
            ..position.clone()
        })
    }

    fn update_position(&mut self, position: &Position) -> Result<()> {
        let id = require_id(position.id, "position")?;
        let changed = self.conn.execute(
            "UPDATE positions
             SET quantity = ?1, total_cost = ?2, average_cost = ?3, updated_at = datetime('now')
             WHERE id = ?4",
            params![
                position.quantity.to_string(),
                position.total_cost.to_string(),
                position.average_cost.to_string(),
                id,
            ],
        )?;
        expect_one_row(changed, "position", id)
    }

    fn list_positions(&mut self, investor: Option<&str>) -> Result<Vec<Position>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, investor, security, opened_on, quantity, total_cost, average_cost
             FROM positions
             WHERE ?1 IS NULL OR investor = ?1
             ORDER BY investor, security",
        )?;
        let positions = stmt
            .query_map([investor], position_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(positions)
    }
}

impl LotRepository for SqliteStore<'_> {
    fn open_lots(&mut self, investor: &str, security: &str) -> Result<Vec<Lot>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, investor, security, line_id, quantity, remaining_balance, price,
                    acquired_on, sequence
             FROM lots
             WHERE investor = ?1 AND security = ?2
             ORDER BY acquired_on DESC, sequence DESC, id DESC",
        )?;
        let lots = stmt
            .query_map(params![investor, security], lot_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        // balances are TEXT; compare as decimals
        Ok(lots
            .into_iter()
            .filter(|lot| lot.remaining_balance > Decimal::ZERO)
            .collect())
    }

    fn create_lot(&mut self, lot: &Lot) -> Result<Lot> {
        self.conn.execute(
            "INSERT INTO lots (
                investor, security, line_id, quantity, remaining_balance, price,
                acquired_on, sequence
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                lot.investor,
                lot.security,
                lot.line_id,
                lot.quantity.to_string(),
                lot.remaining_balance.to_string(),
                lot.price.to_string(),
                lot.acquired_on,
                lot.sequence,
            ],
        )?;
        Ok(Lot {
            id: Some(self.conn.last_insert_rowid()),
            ..lot.clone()
        })
    }

    fn update_lot_balance(&mut self, lot_id: i64, remaining_balance: Decimal) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE lots SET remaining_balance = ?1 WHERE id = ?2",
            params![remaining_balance.to_string(), lot_id],
        )?;
        expect_one_row(changed, "lot", lot_id)
    }

    fn record_allocation(&mut self, allocation: &SaleAllocation) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sale_allocations (lot_id, sale_line_id, quantity) VALUES (?1, ?2, ?3)",
            params![
                allocation.lot_id,
                allocation.sale_line_id,
                allocation.quantity.to_string(),
            ],
        )?;
        Ok(())
    }
}

impl TradeBatchRepository for SqliteStore<'_> {
    fn find_trade_batch(
        &mut self,
        investor: &str,
        month_start: NaiveDate,
    ) -> Result<Option<TradeBatch>> {
        let row: Option<(i64, String, NaiveDate, i64)> = self
            .conn
            .query_row(
                "SELECT id, investor, month_start, tax_group_id
                 FROM trade_batches WHERE investor = ?1 AND month_start = ?2",
                params![investor, month_start],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(|row| self.load_trade_batch(row)).transpose()
    }

    fn find_latest_trade_batch(
        &mut self,
        investor: &str,
        before: NaiveDate,
    ) -> Result<Option<TradeBatch>> {
        let row: Option<(i64, String, NaiveDate, i64)> = self
            .conn
            .query_row(
                "SELECT id, investor, month_start, tax_group_id
                 FROM trade_batches WHERE investor = ?1 AND month_start < ?2
                 ORDER BY month_start DESC LIMIT 1",
                params![investor, before],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(|row| self.load_trade_batch(row)).transpose()
    }

    fn create_trade_batch(&mut self, batch: &TradeBatch) -> Result<TradeBatch> {
        let tax_group_id = require_id(batch.tax_group.id, "trade batch tax group")?;
        self.conn.execute(
            "INSERT INTO trade_batches (investor, month_start, tax_group_id) VALUES (?1, ?2, ?3)",
            params![batch.investor, batch.month_start, tax_group_id],
        )?;
        let id = self.conn.last_insert_rowid();
        self.upsert_buckets(id, &batch.buckets)?;
        Ok(TradeBatch {
            id: Some(id),
            ..batch.clone()
        })
    }

    fn update_trade_batch(&mut self, batch: &TradeBatch) -> Result<()> {
        let id = require_id(batch.id, "trade batch")?;
        let changed = self.conn.execute(
            "UPDATE trade_batches SET updated_at = datetime('now') WHERE id = ?1",
            [id],
        )?;
        expect_one_row(changed, "trade batch", id)?;
        self.upsert_buckets(id, &batch.buckets)
    }
}

impl InvoiceRepository for SqliteStore<'_> {
    fn invoice_exists(&mut self, fingerprint: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM invoices WHERE fingerprint = ?1",
            [fingerprint],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn create_invoice(&mut self, invoice: &InvoiceRecord) -> Result<InvoiceRecord> {
        if self.invoice_exists(&invoice.fingerprint)? {
            return Err(SettlementError::DuplicateInvoice(invoice.fingerprint.clone()).into());
        }
        self.conn.execute(
            "INSERT INTO invoices (
                fingerprint, investor, number, market_date, settlement_date,
                raw_value, total_sold, tax_group_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                invoice.fingerprint,
                invoice.investor,
                invoice.number,
                invoice.market_date,
                invoice.settlement_date,
                invoice.raw_value.to_string(),
                invoice.total_sold.to_string(),
                invoice.tax_group_id,
            ],
        )?;
        Ok(InvoiceRecord {
            id: Some(self.conn.last_insert_rowid()),
            ..invoice.clone()
        })
    }

    fn create_invoice_line(&mut self, line: &InvoiceLine) -> Result<InvoiceLine> {
        self.conn.execute(
            "INSERT INTO invoice_lines (
                invoice_id, security, asset_class, direction, quantity, price, sequence
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                line.invoice_id,
                line.security,
                line.asset_class.as_str(),
                line.direction.as_str(),
                line.quantity.to_string(),
                line.price.to_string(),
                line.sequence,
            ],
        )?;
        Ok(InvoiceLine {
            id: Some(self.conn.last_insert_rowid()),
            ..line.clone()
        })
    }

    fn create_item_batch(&mut self, batch: &ItemBatch) -> Result<ItemBatch> {
        self.conn.execute(
            "INSERT INTO item_batches (
                line_id, tax_group_id, position_id, quantity, average_price, raw_price, total_taxes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                batch.line_id,
                batch.tax_group_id,
                batch.position_id,
                batch.quantity.to_string(),
                batch.average_price.to_string(),
                batch.raw_price.to_string(),
                batch.total_taxes.to_string(),
            ],
        )?;
        Ok(ItemBatch {
            id: Some(self.conn.last_insert_rowid()),
            ..batch.clone()
        })
    }

    fn create_trade(&mut self, trade: &Trade) -> Result<Trade> {
        self.conn.execute(
            "INSERT INTO trades (
                line_id, tax_group_id, position_id, trade_batch_id, market_date, asset_class,
                quantity, cost_basis, proceeds, average_price, raw_result, total_tax
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                trade.line_id,
                trade.tax_group_id,
                trade.position_id,
                trade.trade_batch_id,
                trade.market_date,
                trade.asset_class.as_str(),
                trade.quantity.to_string(),
                trade.cost_basis.to_string(),
                trade.proceeds.to_string(),
                trade.average_price.to_string(),
                trade.raw_result.to_string(),
                trade.total_tax.to_string(),
            ],
        )?;
        Ok(Trade {
            id: Some(self.conn.last_insert_rowid()),
            ..trade.clone()
        })
    }

    fn list_trades(&mut self, trade_batch_id: i64) -> Result<Vec<Trade>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, line_id, tax_group_id, position_id, trade_batch_id, market_date,
                    asset_class, quantity, cost_basis, proceeds, average_price, raw_result, total_tax
             FROM trades WHERE trade_batch_id = ?1
             ORDER BY market_date, id",
        )?;
        let trades = stmt
            .query_map([trade_batch_id], trade_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trades)
    }
}

impl EarningRepository for SqliteStore<'_> {
    fn earning_exists(&mut self, uuid: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM earnings WHERE uuid = ?1",
            [uuid],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn create_earning(&mut self, earning: &Earning) -> Result<Earning> {
        self.conn.execute(
            "INSERT INTO earnings (
                uuid, investor, security, kind, pay_date, raw_value, net_value, tax_group_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                earning.uuid,
                earning.investor,
                earning.security,
                earning.kind.as_str(),
                earning.pay_date,
                earning.raw_value.to_string(),
                earning.net_value.to_string(),
                earning.tax_group_id,
            ],
        )?;
        Ok(Earning {
            id: Some(self.conn.last_insert_rowid()),
            ..earning.clone()
        })
    }

    fn list_earnings(&mut self, investor: &str) -> Result<Vec<Earning>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, investor, security, kind, pay_date, raw_value, net_value, tax_group_id
             FROM earnings WHERE investor = ?1
             ORDER BY pay_date, id",
        )?;
        let earnings = stmt
            .query_map([investor], earning_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(earnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn open_in_memory() -> Result<Connection> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        apply_schema(&conn)?;
        Ok(conn)
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path().unwrap();
        assert!(path.to_string_lossy().contains(".nota"));
        assert!(path.to_string_lossy().ends_with("ledger.db"));
    }

    #[test]
    fn test_init_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        init_database(Some(db_path.clone())).unwrap();
        // idempotent
        init_database(Some(db_path.clone())).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let table_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(table_count, 13);
    }

    #[test]
    fn test_tax_group_round_trip() {
        let conn = open_in_memory().unwrap();
        let mut store = SqliteStore::new(&conn);

        let tax = store
            .create_tax(&Tax::new(TaxCode::Settlement, "BIV", dec!(0.00025)))
            .unwrap();
        let mut group = TaxGroup::new(TaxScope::Invoice, date(15));
        group
            .push(TaxInstance::new(tax, date(15), dec!(1000), dec!(0.25), dec!(0.00025)))
            .unwrap();

        let stored = store.create_tax_group(&group).unwrap();
        let id = stored.id.unwrap();
        let loaded = store.find_tax_group(id).unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert_eq!(loaded.value_of(TaxCode::Settlement), dec!(0.25));

        let mut instances = loaded.taxes().to_vec();
        instances[0].tax_value = dec!(0.30);
        store.update_tax_instances(&instances).unwrap();
        let reloaded = store.find_tax_group(id).unwrap().unwrap();
        assert_eq!(reloaded.total(), dec!(0.30));
    }

    #[test]
    fn test_unresolved_tax_is_rejected() {
        let conn = open_in_memory().unwrap();
        let mut store = SqliteStore::new(&conn);
        let mut group = TaxGroup::new(TaxScope::Invoice, date(15));
        group
            .push(TaxInstance::new(
                Tax::new(TaxCode::Emolument, "BIV", dec!(0.00005)),
                date(15),
                dec!(1000),
                dec!(0.05),
                dec!(0.00005),
            ))
            .unwrap();
        let err = store.create_tax_group(&group).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SettlementError>(),
            Some(SettlementError::DbError(_))
        ));
    }

    #[test]
    fn test_update_missing_row_is_db_error() {
        let conn = open_in_memory().unwrap();
        let mut store = SqliteStore::new(&conn);
        let err = store.update_lot_balance(42, dec!(1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SettlementError>(),
            Some(SettlementError::DbError(_))
        ));
    }

    #[test]
    fn test_open_lots_skip_closed() {
        let conn = open_in_memory().unwrap();
        let mut store = SqliteStore::new(&conn);
        let lot = |day: u32, remaining: Decimal| Lot {
            id: None,
            investor: "investor-1".to_string(),
            security: "ABCD3".to_string(),
            line_id: None,
            quantity: dec!(100),
            remaining_balance: remaining,
            price: dec!(10),
            acquired_on: date(day),
            sequence: 1,
        };
        store.create_lot(&lot(2, dec!(100))).unwrap();
        store.create_lot(&lot(3, dec!(0.00))).unwrap();
        store.create_lot(&lot(5, dec!(10.5))).unwrap();

        let open = store.open_lots("investor-1", "ABCD3").unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].acquired_on, date(5));
        assert_eq!(open[0].remaining_balance, dec!(10.5));
        assert!(store.open_lots("investor-2", "ABCD3").unwrap().is_empty());
    }

    #[test]
    fn test_position_round_trip() {
        let conn = open_in_memory().unwrap();
        let mut store = SqliteStore::new(&conn);
        let position = Position::open("investor-1", "ABCD3", date(10))
            .apply_purchase(dec!(100), dec!(10), dec!(0.30))
            .unwrap();
        let stored = store.create_position(&position).unwrap();
        assert_eq!(
            store.find_position("investor-1", "ABCD3").unwrap(),
            Some(stored.clone())
        );
        assert_eq!(store.list_positions(None).unwrap().len(), 1);
        assert!(store.list_positions(Some("someone-else")).unwrap().is_empty());
    }
}
