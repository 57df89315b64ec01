//! Fee computation at invoice scope and its allocation to lines
//!
//! An invoice carries its fees in aggregate. Each purchase line (item batch)
//! or sale line (trade) receives a share proportional to its gross value,
//! except for per-order fees and the withholding tax on sales.

use chrono::NaiveDate;
use itertools::Itertools;
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::debug;

use super::catalog::{Tax, TaxCode, TaxRates, TaxScope};
use super::group::{TaxGroup, TaxInstance};
use crate::db::models::Direction;
use crate::error::{Result, SettlementError};
use crate::importers::invoice::{FeeInput, InvoiceInput, LineInput};

/// Per-order fees already handed to a line in this invoice.
///
/// Keyed on (direction, code, security): the first line of an order claims the
/// fee, every later line of the same order gets zero.
#[derive(Debug, Default)]
pub struct FeeClaims {
    claimed: HashSet<(Direction, TaxCode, String)>,
}

impl FeeClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time a key is seen.
    pub fn claim(&mut self, direction: Direction, code: TaxCode, security: &str) -> bool {
        self.claimed.insert((direction, code, security.to_string()))
    }
}

/// Number of distinct (direction, security) orders on an invoice.
pub fn count_orders(lines: &[LineInput]) -> usize {
    lines
        .iter()
        .map(|line| (line.direction(), line.security.code.as_str()))
        .unique()
        .count()
}

fn effective_rate(fee: &FeeInput, code: TaxCode, rates: &TaxRates) -> Decimal {
    fee.rate
        .filter(|rate| *rate > Decimal::ZERO)
        .unwrap_or_else(|| code.default_rate(rates))
}

/// Build the invoice-level tax group from the raw fees printed on the invoice.
pub fn invoice_tax_group(invoice: &InvoiceInput, rates: &TaxRates) -> Result<TaxGroup> {
    let mut group = TaxGroup::new(TaxScope::Invoice, invoice.market_date);

    for fee in &invoice.raw_fees {
        let code = TaxCode::parse(&fee.code)?;
        let rate = effective_rate(fee, code, rates);

        let (base, value) = match code {
            TaxCode::Settlement => (invoice.raw_value, invoice.raw_value * rate),
            TaxCode::Emolument => (invoice.raw_value, fee.value),
            TaxCode::Brokerage => (fee.value, fee.value),
            TaxCode::ServiceTax => {
                let brokerage = invoice
                    .raw_fees
                    .iter()
                    .find(|f| TaxCode::parse(&f.code).ok() == Some(TaxCode::Brokerage))
                    .ok_or_else(|| {
                        SettlementError::MissingInvoiceFee(TaxCode::Brokerage.to_string())
                    })?;
                if rate >= Decimal::ONE {
                    return Err(SettlementError::ValidationError(format!(
                        "{} rate must be below 1 to gross up brokerage, got {}",
                        code, rate
                    ))
                    .into());
                }
                let base = brokerage.value;
                (base, base / (Decimal::ONE - rate) - base)
            }
            TaxCode::Withholding => (invoice.total_sold, invoice.total_sold * rate),
            TaxCode::IncomeTax => {
                return Err(SettlementError::TaxNotApplicable {
                    code: code.to_string(),
                    scope: TaxScope::Invoice.to_string(),
                }
                .into());
            }
        };

        let source = fee
            .source
            .clone()
            .unwrap_or_else(|| TaxScope::Invoice.source().to_string());

        debug!(
            "Invoice fee {}: base {} value {} rate {}",
            code, base, value, rate
        );

        group.push(TaxInstance::new(
            Tax::new(code, source, rate),
            invoice.market_date,
            base,
            value,
            rate,
        ))?;
    }

    Ok(group)
}

/// The line being allocated to
#[derive(Debug, Clone, Copy)]
pub struct LineShare<'a> {
    pub direction: Direction,
    pub security: &'a str,
    pub gross_value: Decimal,
    pub market_date: NaiveDate,
}

impl<'a> LineShare<'a> {
    pub fn from_input(line: &'a LineInput, market_date: NaiveDate) -> Self {
        Self {
            direction: line.direction(),
            security: &line.security.code,
            gross_value: line.gross_value(),
            market_date,
        }
    }
}

/// Derive the item-batch or trade tax group of one line from the invoice group.
pub fn line_tax_group(
    invoice_group: &TaxGroup,
    scope: TaxScope,
    invoice_raw_value: Decimal,
    orders: usize,
    line: &LineShare<'_>,
    claims: &mut FeeClaims,
) -> Result<TaxGroup> {
    if !matches!(scope, TaxScope::ItemBatch | TaxScope::Trade) {
        return Err(SettlementError::ValidationError(format!(
            "line taxes cannot be allocated at {} scope",
            scope
        ))
        .into());
    }
    if invoice_raw_value <= Decimal::ZERO {
        return Err(SettlementError::ValidationError(format!(
            "invoice raw value must be positive, got {}",
            invoice_raw_value
        ))
        .into());
    }

    let share = line.gross_value / invoice_raw_value;
    let order_count = Decimal::from(orders.max(1) as u64);
    let mut group = TaxGroup::new(scope, line.market_date);

    for invoice_tax in invoice_group.taxes() {
        let code = invoice_tax.code();
        let (base, value) = match code {
            code if code.is_per_order() => {
                if invoice_tax.tax_value.is_zero()
                    || !claims.claim(line.direction, code, line.security)
                {
                    (Decimal::ZERO, Decimal::ZERO)
                } else {
                    (
                        invoice_tax.base_value / order_count,
                        invoice_tax.tax_value / order_count,
                    )
                }
            }
            TaxCode::Withholding => match scope {
                TaxScope::Trade => (line.gross_value, line.gross_value * invoice_tax.tax_rate),
                _ => (Decimal::ZERO, Decimal::ZERO),
            },
            TaxCode::IncomeTax => {
                return Err(SettlementError::TaxNotApplicable {
                    code: code.to_string(),
                    scope: scope.to_string(),
                }
                .into());
            }
            _ => (invoice_tax.base_value * share, invoice_tax.tax_value * share),
        };

        group.push(TaxInstance::new(
            invoice_tax.tax.clone(),
            line.market_date,
            base,
            value,
            invoice_tax.tax_rate,
        ))?;
    }

    debug!(
        "Allocated {} to {} {} line of {} (share {})",
        group.total(),
        scope,
        line.direction.as_str(),
        line.security,
        share
    );

    Ok(group)
}
