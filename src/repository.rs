//! Storage collaborators of the settlement engine
//!
//! The engine only talks to these traits. Every method is synchronous and may
//! block; callers wrap a whole document in one transaction.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::db::models::{
    Earning, InvoiceLine, InvoiceRecord, ItemBatch, Lot, Position, SaleAllocation, Trade,
    TradeBatch,
};
use crate::error::Result;
use crate::tax::catalog::{Tax, TaxCode};
use crate::tax::group::{TaxGroup, TaxInstance};

/// Tax dictionary
pub trait TaxCatalog {
    fn find_tax_by_code(&mut self, code: TaxCode) -> Result<Option<Tax>>;
    fn create_tax(&mut self, tax: &Tax) -> Result<Tax>;
    fn update_tax(&mut self, tax: &Tax) -> Result<()>;
}

pub trait TaxGroupRepository {
    /// Persist a group and its instances, returning them with ids assigned.
    fn create_tax_group(&mut self, group: &TaxGroup) -> Result<TaxGroup>;
    /// Overwrite base, value and rate of already persisted instances.
    fn update_tax_instances(&mut self, instances: &[TaxInstance]) -> Result<()>;
    fn find_tax_group(&mut self, id: i64) -> Result<Option<TaxGroup>>;
}

pub trait PositionRepository {
    fn find_position(&mut self, investor: &str, security: &str) -> Result<Option<Position>>;
    fn create_position(&mut self, position: &Position) -> Result<Position>;
    fn update_position(&mut self, position: &Position) -> Result<()>;
    fn list_positions(&mut self, investor: Option<&str>) -> Result<Vec<Position>>;
}

pub trait LotRepository {
    /// Lots with a positive balance, most recent acquisition first.
    fn open_lots(&mut self, investor: &str, security: &str) -> Result<Vec<Lot>>;
    fn create_lot(&mut self, lot: &Lot) -> Result<Lot>;
    fn update_lot_balance(&mut self, lot_id: i64, remaining_balance: Decimal) -> Result<()>;
    fn record_allocation(&mut self, allocation: &SaleAllocation) -> Result<()>;
}

pub trait TradeBatchRepository {
    fn find_trade_batch(&mut self, investor: &str, month_start: NaiveDate)
        -> Result<Option<TradeBatch>>;
    /// Latest batch strictly before `before`.
    fn find_latest_trade_batch(
        &mut self,
        investor: &str,
        before: NaiveDate,
    ) -> Result<Option<TradeBatch>>;
    fn create_trade_batch(&mut self, batch: &TradeBatch) -> Result<TradeBatch>;
    fn update_trade_batch(&mut self, batch: &TradeBatch) -> Result<()>;
}

pub trait InvoiceRepository {
    fn invoice_exists(&mut self, fingerprint: &str) -> Result<bool>;
    /// Fails with `DuplicateInvoice` when the fingerprint is already stored.
    fn create_invoice(&mut self, invoice: &InvoiceRecord) -> Result<InvoiceRecord>;
    fn create_invoice_line(&mut self, line: &InvoiceLine) -> Result<InvoiceLine>;
    fn create_item_batch(&mut self, batch: &ItemBatch) -> Result<ItemBatch>;
    fn create_trade(&mut self, trade: &Trade) -> Result<Trade>;
    fn list_trades(&mut self, trade_batch_id: i64) -> Result<Vec<Trade>>;
}

pub trait EarningRepository {
    fn earning_exists(&mut self, uuid: &str) -> Result<bool>;
    fn create_earning(&mut self, earning: &Earning) -> Result<Earning>;
    fn list_earnings(&mut self, investor: &str) -> Result<Vec<Earning>>;
}

/// Everything settlement needs from storage
pub trait SettlementStore:
    TaxCatalog
    + TaxGroupRepository
    + PositionRepository
    + LotRepository
    + TradeBatchRepository
    + InvoiceRepository
    + EarningRepository
{
}

impl<T> SettlementStore for T where
    T: TaxCatalog
        + TaxGroupRepository
        + PositionRepository
        + LotRepository
        + TradeBatchRepository
        + InvoiceRepository
        + EarningRepository
{
}
