//! Invoice settlement
//!
//! Turns one brokerage invoice into tax groups, position updates, lot
//! movements, trades and the month's trade batch. Everything runs against a
//! `SettlementStore`; callers provide the transaction and roll back on error.

pub mod context;
pub mod earnings;

use serde::Serialize;
use tracing::{debug, info};

use crate::db::models::{
    InvoiceLine, InvoiceRecord, ItemBatch, Lot, SaleAllocation, Trade, TradeBatch,
};
use crate::error::{Result, SettlementError};
use crate::importers::invoice::{InvoiceInput, LineInput};
use crate::repository::SettlementStore;
use crate::tax::allocation::{count_orders, invoice_tax_group, line_tax_group, LineShare};
use crate::tax::catalog::{TaxRates, TaxScope};
use crate::tax::group::TaxGroup;
use crate::tax::lots::{check_agreement, match_sale};
use crate::tax::trade::settle_sale;
use crate::tax::trade_batch::OpenTradeBatch;

pub use context::SettlementContext;
pub use earnings::{settle_earnings, EarningsOutcome};

/// What came out of one invoice
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettledInvoice {
    pub invoice: InvoiceRecord,
    pub tax_group: TaxGroup,
    /// Recorded lines, in settlement order
    pub lines: Vec<InvoiceLine>,
    pub item_batches: Vec<ItemBatch>,
    pub trades: Vec<Trade>,
    pub trade_batch: Option<TradeBatch>,
}

impl SettledInvoice {
    pub fn line(&self, line_id: i64) -> Option<&InvoiceLine> {
        self.lines.iter().find(|line| line.id == Some(line_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InvoiceOutcome {
    /// Already settled; nothing was written
    Duplicate { fingerprint: String },
    Processed(Box<SettledInvoice>),
}

pub(crate) fn persisted_id(id: Option<i64>, what: &str) -> Result<i64> {
    id.ok_or_else(|| SettlementError::DbError(format!("{} was stored without an id", what)).into())
}

/// Settle one invoice. All-or-nothing only if the store runs it in a transaction.
pub fn settle_invoice<S>(
    store: &mut S,
    input: &InvoiceInput,
    rates: &TaxRates,
) -> Result<InvoiceOutcome>
where
    S: SettlementStore + ?Sized,
{
    input.validate()?;

    let fingerprint = input.fingerprint();
    if store.invoice_exists(&fingerprint)? {
        info!(
            "Invoice {} for {} already settled, skipping",
            fingerprint, input.investor.id
        );
        return Ok(InvoiceOutcome::Duplicate { fingerprint });
    }

    let mut ctx = SettlementContext::new();
    let tax_group = ctx.persist_group(store, invoice_tax_group(input, rates)?)?;

    let invoice = store.create_invoice(&InvoiceRecord {
        id: None,
        fingerprint,
        investor: input.investor.id.clone(),
        number: input.number,
        market_date: input.market_date,
        settlement_date: input.settlement_date,
        raw_value: input.raw_value,
        total_sold: input.total_sold,
        tax_group_id: tax_group.id,
    })?;
    info!(
        "Settling invoice {:?} of {} ({} lines, fees {})",
        invoice.number,
        invoice.investor,
        input.lines.len(),
        tax_group.total()
    );

    let mut run = InvoiceRun {
        store,
        ctx,
        input,
        rates,
        invoice_id: persisted_id(invoice.id, "invoice")?,
        orders: count_orders(&input.lines),
        invoice_group: tax_group,
        trade_batch: None,
        lines: Vec::new(),
        item_batches: Vec::new(),
        trades: Vec::new(),
    };

    for line in input.ordered_lines() {
        run.settle_line(line)?;
    }

    let trade_batch = match run.trade_batch {
        Some(open) => Some(open.finalize(run.store)?),
        None => None,
    };

    Ok(InvoiceOutcome::Processed(Box::new(SettledInvoice {
        invoice,
        tax_group: run.invoice_group,
        lines: run.lines,
        item_batches: run.item_batches,
        trades: run.trades,
        trade_batch,
    })))
}

struct InvoiceRun<'a, S: ?Sized> {
    store: &'a mut S,
    ctx: SettlementContext,
    input: &'a InvoiceInput,
    rates: &'a TaxRates,
    invoice_id: i64,
    orders: usize,
    invoice_group: TaxGroup,
    trade_batch: Option<OpenTradeBatch>,
    lines: Vec<InvoiceLine>,
    item_batches: Vec<ItemBatch>,
    trades: Vec<Trade>,
}

impl<S> InvoiceRun<'_, S>
where
    S: SettlementStore + ?Sized,
{
    /// The month's batch, opened on the first sale of the invoice.
    fn open_trade_batch(&mut self) -> Result<&mut OpenTradeBatch> {
        if self.trade_batch.is_none() {
            let opened = OpenTradeBatch::open(
                self.store,
                &mut self.ctx,
                &self.input.investor.id,
                self.input.market_date,
                self.rates,
            )?;
            self.trade_batch = Some(opened);
        }
        self.trade_batch.as_mut().ok_or_else(|| {
            SettlementError::DbError("trade batch could not be opened".to_string()).into()
        })
    }

    fn settle_line(&mut self, line: &LineInput) -> Result<()> {
        let recorded = self.store.create_invoice_line(&InvoiceLine {
            id: None,
            invoice_id: self.invoice_id,
            security: line.security.code.clone(),
            asset_class: line.security.asset_class(),
            direction: line.direction(),
            quantity: line.qty,
            price: line.price,
            sequence: line.sequence,
        })?;
        let line_id = persisted_id(recorded.id, "invoice line")?;
        self.lines.push(recorded);

        if line.is_purchase {
            self.settle_purchase(line, line_id)
        } else {
            self.settle_sale(line, line_id)
        }
    }

    fn line_taxes(&mut self, line: &LineInput, scope: TaxScope) -> Result<TaxGroup> {
        let group = line_tax_group(
            &self.invoice_group,
            scope,
            self.input.raw_value,
            self.orders,
            &LineShare::from_input(line, self.input.market_date),
            &mut self.ctx.claims,
        )?;
        self.ctx.persist_group(self.store, group)
    }

    fn settle_purchase(&mut self, line: &LineInput, line_id: i64) -> Result<()> {
        let input = self.input;
        let investor = input.investor.id.as_str();
        let security = line.security.code.as_str();
        let taxes = self.line_taxes(line, TaxScope::ItemBatch)?;
        let total_taxes = taxes.total();

        let position = self
            .ctx
            .position(self.store, investor, security, input.market_date)?;
        let position = position.apply_purchase(line.qty, line.price, total_taxes)?;
        let position = self.ctx.save_position(self.store, position)?;

        let lot = self.store.create_lot(&Lot {
            id: None,
            investor: investor.to_string(),
            security: security.to_string(),
            line_id: Some(line_id),
            quantity: line.qty,
            remaining_balance: line.qty,
            price: line.price,
            acquired_on: input.market_date,
            sequence: line.sequence,
        })?;
        debug!("Opened lot {:?} of {} {}", lot.id, line.qty, security);

        let item_batch = self.store.create_item_batch(&ItemBatch {
            id: None,
            line_id,
            tax_group_id: persisted_id(taxes.id, "item batch tax group")?,
            position_id: persisted_id(position.id, "position")?,
            quantity: line.qty,
            average_price: (line.gross_value() + total_taxes) / line.qty,
            raw_price: line.price,
            total_taxes,
        })?;
        info!(
            "Bought {} {} at {} (taxes {}), position avg {}",
            line.qty, security, line.price, total_taxes, position.average_cost
        );

        self.item_batches.push(item_batch);
        Ok(())
    }

    fn settle_sale(&mut self, line: &LineInput, line_id: i64) -> Result<()> {
        let input = self.input;
        let investor = input.investor.id.as_str();
        let security = line.security.code.as_str();
        let class = line.security.asset_class();
        let taxes = self.line_taxes(line, TaxScope::Trade)?;

        let position = self
            .ctx
            .position(self.store, investor, security, input.market_date)?;
        let lots = self.store.open_lots(investor, security)?;
        let consumptions = match_sale(security, &lots, line.qty)?;
        let (settlement, position) = settle_sale(&position, line.qty, line.price, &taxes)?;

        for consumption in &consumptions {
            self.store
                .update_lot_balance(consumption.lot_id, consumption.remaining_balance)?;
            self.store.record_allocation(&SaleAllocation {
                lot_id: consumption.lot_id,
                sale_line_id: line_id,
                quantity: consumption.taken,
            })?;
            debug!(
                "Lot {} gave {} {} ({} left)",
                consumption.lot_id, consumption.taken, security, consumption.remaining_balance
            );
        }

        let position = self.ctx.save_position(self.store, position)?;
        check_agreement(&position, &self.store.open_lots(investor, security)?)?;

        let rates = self.rates;
        let batch = self.open_trade_batch()?;
        batch.record_trade(class, &settlement, rates)?;
        let trade_batch_id = persisted_id(batch.batch().id, "trade batch")?;

        let trade = self.store.create_trade(&Trade {
            id: None,
            line_id,
            tax_group_id: persisted_id(taxes.id, "trade tax group")?,
            position_id: persisted_id(position.id, "position")?,
            trade_batch_id,
            market_date: input.market_date,
            asset_class: class,
            quantity: line.qty,
            cost_basis: settlement.cost_basis,
            proceeds: settlement.proceeds,
            average_price: settlement.average_price,
            raw_result: settlement.raw_result,
            total_tax: settlement.total_tax,
        })?;
        info!(
            "Sold {} {} at {}: result {} (taxes {})",
            line.qty, security, line.price, settlement.raw_result, settlement.total_tax
        );

        self.trades.push(trade);
        Ok(())
    }
}
