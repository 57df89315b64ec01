//! In-memory ledger store
//!
//! Same contract as the SQLite store, kept in plain collections. `atomically`
//! gives a document the all-or-nothing behaviour a transaction would.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::models::{
    Earning, InvoiceLine, InvoiceRecord, ItemBatch, Lot, Position, SaleAllocation, Trade,
    TradeBatch,
};
use crate::error::{Result, SettlementError};
use crate::repository::{
    EarningRepository, InvoiceRepository, LotRepository, PositionRepository, TaxCatalog,
    TaxGroupRepository, TradeBatchRepository,
};
use crate::tax::catalog::{Tax, TaxCode};
use crate::tax::group::{TaxGroup, TaxInstance};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    next_id: i64,
    taxes: BTreeMap<i64, Tax>,
    tax_groups: BTreeMap<i64, TaxGroup>,
    positions: BTreeMap<i64, Position>,
    lots: BTreeMap<i64, Lot>,
    allocations: Vec<SaleAllocation>,
    trade_batches: BTreeMap<i64, TradeBatch>,
    invoices: BTreeMap<i64, InvoiceRecord>,
    lines: BTreeMap<i64, InvoiceLine>,
    item_batches: BTreeMap<i64, ItemBatch>,
    trades: BTreeMap<i64, Trade>,
    earnings: BTreeMap<i64, Earning>,
}

fn missing(what: &str, id: i64) -> anyhow::Error {
    SettlementError::DbError(format!("updating {} {} touched 0 rows", what, id)).into()
}

fn require_id(id: Option<i64>, what: &str) -> Result<i64> {
    id.ok_or_else(|| SettlementError::DbError(format!("{} has no id", what)).into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the store; on error every change it made is discarded.
    pub fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut MemoryStore) -> Result<T>,
    {
        let snapshot = self.clone();
        let result = f(self);
        if result.is_err() {
            *self = snapshot;
        }
        result
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn allocations(&self) -> &[SaleAllocation] {
        &self.allocations
    }

    pub fn invoices(&self) -> impl Iterator<Item = &InvoiceRecord> {
        self.invoices.values()
    }

    pub fn item_batches(&self) -> impl Iterator<Item = &ItemBatch> {
        self.item_batches.values()
    }

    pub fn all_lots(&self) -> impl Iterator<Item = &Lot> {
        self.lots.values()
    }

    pub fn tax_group_count(&self) -> usize {
        self.tax_groups.len()
    }
}

impl TaxCatalog for MemoryStore {
    fn find_tax_by_code(&mut self, code: TaxCode) -> Result<Option<Tax>> {
        Ok(self.taxes.values().find(|tax| tax.code == code).cloned())
    }

    fn create_tax(&mut self, tax: &Tax) -> Result<Tax> {
        if self.taxes.values().any(|existing| existing.code == tax.code) {
            return Err(SettlementError::DbError(format!("tax {} already exists", tax.code)).into());
        }
        let id = self.allocate_id();
        let created = Tax {
            id: Some(id),
            ..tax.clone()
        };
        self.taxes.insert(id, created.clone());
        Ok(created)
    }

    fn update_tax(&mut self, tax: &Tax) -> Result<()> {
        let id = require_id(tax.id, "tax")?;
        let slot = self.taxes.get_mut(&id).ok_or_else(|| missing("tax", id))?;
        *slot = tax.clone();
        Ok(())
    }
}

impl TaxGroupRepository for MemoryStore {
    fn create_tax_group(&mut self, group: &TaxGroup) -> Result<TaxGroup> {
        let group_id = self.allocate_id();
        let mut taxes = Vec::with_capacity(group.taxes().len());
        for instance in group.taxes() {
            require_id(instance.tax.id, "tax dictionary entry")?;
            taxes.push(TaxInstance {
                id: Some(self.allocate_id()),
                tax_group_id: Some(group_id),
                ..instance.clone()
            });
        }

        let stored = TaxGroup::from_parts(Some(group_id), group.scope, group.external_id, taxes);
        self.tax_groups.insert(group_id, stored.clone());
        Ok(stored)
    }

    fn update_tax_instances(&mut self, instances: &[TaxInstance]) -> Result<()> {
        for instance in instances {
            let id = require_id(instance.id, "tax instance")?;
            let group_id = require_id(instance.tax_group_id, "tax instance group")?;
            let stored = self
                .tax_groups
                .get_mut(&group_id)
                .and_then(|group| group.taxes_mut().iter_mut().find(|t| t.id == Some(id)))
                .ok_or_else(|| missing("tax instance", id))?;
            stored.base_value = instance.base_value;
            stored.tax_value = instance.tax_value;
            stored.tax_rate = instance.tax_rate;
        }
        Ok(())
    }

    fn find_tax_group(&mut self, id: i64) -> Result<Option<TaxGroup>> {
        Ok(self.tax_groups.get(&id).cloned())
    }
}

impl PositionRepository for MemoryStore {
    fn find_position(&mut self, investor: &str, security: &str) -> Result<Option<Position>> {
        Ok(self
            .positions
            .values()
            .find(|p| p.investor == investor && p.security == security)
            .cloned())
    }

    fn create_position(&mut self, position: &Position) -> Result<Position> {
        let id = self.allocate_id();
        let created = Position {
            id: Some(id),
            ..position.clone()
        };
        self.positions.insert(id, created.clone());
        Ok(created)
    }

    fn update_position(&mut self, position: &Position) -> Result<()> {
        let id = require_id(position.id, "position")?;
        let slot = self
            .positions
            .get_mut(&id)
            .ok_or_else(|| missing("position", id))?;
        *slot = position.clone();
        Ok(())
    }

    fn list_positions(&mut self, investor: Option<&str>) -> Result<Vec<Position>> {
        let mut positions: Vec<Position> = self
            .positions
            .values()
            .filter(|p| match investor {
                Some(investor) => p.investor == investor,
                None => true,
            })
            .cloned()
            .collect();
        positions.sort_by(|a, b| (&a.investor, &a.security).cmp(&(&b.investor, &b.security)));
        Ok(positions)
    }
}

impl LotRepository for MemoryStore {
    fn open_lots(&mut self, investor: &str, security: &str) -> Result<Vec<Lot>> {
        let mut lots: Vec<Lot> = self
            .lots
            .values()
            .filter(|lot| {
                lot.investor == investor
                    && lot.security == security
                    && lot.remaining_balance > Decimal::ZERO
            })
            .cloned()
            .collect();
        lots.sort_by(|a, b| {
            b.acquired_on
                .cmp(&a.acquired_on)
                .then(b.sequence.cmp(&a.sequence))
                .then(b.id.cmp(&a.id))
        });
        Ok(lots)
    }

    fn create_lot(&mut self, lot: &Lot) -> Result<Lot> {
        let id = self.allocate_id();
        let created = Lot {
            id: Some(id),
            ..lot.clone()
        };
        self.lots.insert(id, created.clone());
        Ok(created)
    }

    fn update_lot_balance(&mut self, lot_id: i64, remaining_balance: Decimal) -> Result<()> {
        let lot = self
            .lots
            .get_mut(&lot_id)
            .ok_or_else(|| missing("lot", lot_id))?;
        lot.remaining_balance = remaining_balance;
        Ok(())
    }

    fn record_allocation(&mut self, allocation: &SaleAllocation) -> Result<()> {
        self.allocations.push(allocation.clone());
        Ok(())
    }
}

impl TradeBatchRepository for MemoryStore {
    fn find_trade_batch(
        &mut self,
        investor: &str,
        month_start: NaiveDate,
    ) -> Result<Option<TradeBatch>> {
        Ok(self
            .trade_batches
            .values()
            .find(|b| b.investor == investor && b.month_start == month_start)
            .cloned())
    }

    fn find_latest_trade_batch(
        &mut self,
        investor: &str,
        before: NaiveDate,
    ) -> Result<Option<TradeBatch>> {
        Ok(self
            .trade_batches
            .values()
            .filter(|b| b.investor == investor && b.month_start < before)
            .max_by_key(|b| b.month_start)
            .cloned())
    }

    fn create_trade_batch(&mut self, batch: &TradeBatch) -> Result<TradeBatch> {
        require_id(batch.tax_group.id, "trade batch tax group")?;
        if self.find_trade_batch(&batch.investor, batch.month_start)?.is_some() {
            return Err(SettlementError::DbError(format!(
                "trade batch {} for {} already exists",
                batch.month_start, batch.investor
            ))
            .into());
        }
        let id = self.allocate_id();
        let created = TradeBatch {
            id: Some(id),
            ..batch.clone()
        };
        self.trade_batches.insert(id, created.clone());
        Ok(created)
    }

    fn update_trade_batch(&mut self, batch: &TradeBatch) -> Result<()> {
        let id = require_id(batch.id, "trade batch")?;
        let slot = self
            .trade_batches
            .get_mut(&id)
            .ok_or_else(|| missing("trade batch", id))?;
        *slot = batch.clone();
        Ok(())
    }
}

impl InvoiceRepository for MemoryStore {
    fn invoice_exists(&mut self, fingerprint: &str) -> Result<bool> {
        Ok(self.invoices.values().any(|i| i.fingerprint == fingerprint))
    }

    fn create_invoice(&mut self, invoice: &InvoiceRecord) -> Result<InvoiceRecord> {
        if self.invoice_exists(&invoice.fingerprint)? {
            return Err(SettlementError::DuplicateInvoice(invoice.fingerprint.clone()).into());
        }
        let id = self.allocate_id();
        let created = InvoiceRecord {
            id: Some(id),
            ..invoice.clone()
        };
        self.invoices.insert(id, created.clone());
        Ok(created)
    }

    fn create_invoice_line(&mut self, line: &InvoiceLine) -> Result<InvoiceLine> {
        let id = self.allocate_id();
        let created = InvoiceLine {
            id: Some(id),
            ..line.clone()
        };
        self.lines.insert(id, created.clone());
        Ok(created)
    }

    fn create_item_batch(&mut self, batch: &ItemBatch) -> Result<ItemBatch> {
        let id = self.allocate_id();
        let created = ItemBatch {
            id: Some(id),
            ..batch.clone()
        };
        self.item_batches.insert(id, created.clone());
        Ok(created)
    }

    fn create_trade(&mut self, trade: &Trade) -> Result<Trade> {
        let id = self.allocate_id();
        let created = Trade {
            id: Some(id),
            ..trade.clone()
        };
        self.trades.insert(id, created.clone());
        Ok(created)
    }

    fn list_trades(&mut self, trade_batch_id: i64) -> Result<Vec<Trade>> {
        Ok(self
            .trades
            .values()
            .filter(|t| t.trade_batch_id == trade_batch_id)
            .cloned()
            .collect())
    }
}

impl EarningRepository for MemoryStore {
    fn earning_exists(&mut self, uuid: &str) -> Result<bool> {
        Ok(self.earnings.values().any(|e| e.uuid == uuid))
    }

    fn create_earning(&mut self, earning: &Earning) -> Result<Earning> {
        let id = self.allocate_id();
        let created = Earning {
            id: Some(id),
            ..earning.clone()
        };
        self.earnings.insert(id, created.clone());
        Ok(created)
    }

    fn list_earnings(&mut self, investor: &str) -> Result<Vec<Earning>> {
        Ok(self
            .earnings
            .values()
            .filter(|e| e.investor == investor)
            .cloned()
            .collect())
    }
}
