//! Output formatting module for CLI display
//!
//! Settlement results, positions and monthly batches rendered as terminal
//! tables. Amounts use Brazilian separators.

use colored::Colorize;
use rust_decimal::Decimal;
use tabled::{
    settings::{object::Columns, Alignment, Style},
    Table, Tabled,
};

use crate::db::models::{AssetClass, Position, TradeBatch};
use crate::settlement::{EarningsOutcome, SettledInvoice};
use crate::tax::catalog::TaxCode;
use crate::tax::trade_batch::IncomeTaxAssessment;
use crate::utils::{format_currency, format_decimal_br};

fn signed_currency(value: Decimal) -> String {
    if value >= Decimal::ZERO {
        format_currency(value).green().to_string()
    } else {
        format_currency(value).red().to_string()
    }
}

fn render<T: Tabled>(rows: &[T], numeric_from: usize) -> String {
    let mut table = Table::new(rows);
    table.with(Style::modern());
    table.modify(Columns::new(numeric_from..), Alignment::right());
    table.to_string()
}

/// Format the result of one settled invoice
pub fn format_settled_invoice(settled: &SettledInvoice, dry_run: bool) -> String {
    #[derive(Tabled)]
    struct PurchaseRow {
        #[tabled(rename = "Security")]
        security: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Price")]
        price: String,
        #[tabled(rename = "Taxes")]
        taxes: String,
        #[tabled(rename = "Avg Price")]
        average_price: String,
    }

    #[derive(Tabled)]
    struct SaleRow {
        #[tabled(rename = "Security")]
        security: String,
        #[tabled(rename = "Class")]
        class: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Proceeds")]
        proceeds: String,
        #[tabled(rename = "Cost")]
        cost_basis: String,
        #[tabled(rename = "Taxes")]
        taxes: String,
        #[tabled(rename = "Result")]
        result: String,
    }

    let security_of = |line_id: i64| {
        settled
            .line(line_id)
            .map(|line| line.security.clone())
            .unwrap_or_else(|| format!("line {}", line_id))
    };

    let mut output = String::new();
    let number = settled
        .invoice
        .number
        .map(|n| format!(" #{}", n))
        .unwrap_or_default();
    let verb = if dry_run { "previewed" } else { "settled" };
    output.push_str(&format!(
        "{} Invoice{} of {} {} ({})\n",
        "✓".green().bold(),
        number,
        settled.invoice.investor.bold(),
        verb,
        settled.invoice.market_date.format("%d/%m/%Y")
    ));
    output.push_str(&format!(
        "  Fees: {}\n",
        format_currency(settled.tax_group.total())
    ));

    if !settled.item_batches.is_empty() {
        let rows: Vec<PurchaseRow> = settled
            .item_batches
            .iter()
            .map(|batch| PurchaseRow {
                security: security_of(batch.line_id),
                quantity: format_decimal_br(batch.quantity),
                price: format_currency(batch.raw_price),
                taxes: format_currency(batch.total_taxes),
                average_price: format_currency(batch.average_price),
            })
            .collect();
        output.push_str(&format!("\n{}\n", "Purchases".bold()));
        output.push_str(&render(&rows, 1));
        output.push('\n');
    }

    if !settled.trades.is_empty() {
        let rows: Vec<SaleRow> = settled
            .trades
            .iter()
            .map(|trade| SaleRow {
                security: security_of(trade.line_id),
                class: trade.asset_class.as_str().to_string(),
                quantity: format_decimal_br(trade.quantity),
                proceeds: format_currency(trade.proceeds),
                cost_basis: format_currency(trade.cost_basis),
                taxes: format_currency(trade.total_tax),
                result: signed_currency(trade.raw_result),
            })
            .collect();
        output.push_str(&format!("\n{}\n", "Sales".bold()));
        output.push_str(&render(&rows, 2));
        output.push('\n');
    }

    if let Some(batch) = &settled.trade_batch {
        output.push_str(&format!(
            "\nTrade batch {}: income tax so far {}\n",
            batch.month_start.format("%m/%Y"),
            format_currency(batch.tax_group.value_of(TaxCode::IncomeTax))
        ));
    }

    output
}

/// Format the notice for an invoice that was already on file
pub fn format_duplicate_invoice(fingerprint: &str) -> String {
    format!(
        "{} Invoice already settled, nothing to do (fingerprint {})\n",
        "ℹ".blue().bold(),
        fingerprint.chars().take(16).collect::<String>()
    )
}

/// Format positions as a table
pub fn format_positions(positions: &[Position]) -> String {
    #[derive(Tabled)]
    struct PositionRow {
        #[tabled(rename = "Investor")]
        investor: String,
        #[tabled(rename = "Security")]
        security: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Avg Cost")]
        average_cost: String,
        #[tabled(rename = "Total Cost")]
        total_cost: String,
    }

    let rows: Vec<PositionRow> = positions
        .iter()
        .map(|p| PositionRow {
            investor: p.investor.clone(),
            security: p.security.clone(),
            quantity: format_decimal_br(p.quantity),
            average_cost: format_currency(p.average_cost),
            total_cost: format_currency(p.total_cost),
        })
        .collect();

    let total: Decimal = positions.iter().map(|p| p.total_cost).sum();
    format!(
        "{}\n\n{:<20} {}\n",
        render(&rows, 2),
        "Total Cost:".bold(),
        format_currency(total)
    )
}

/// Format empty positions message
pub fn format_empty_positions() -> String {
    format!(
        "{} No positions found\nSettle an invoice first using: {} settle <file>\n",
        "ℹ".blue().bold(),
        "nota".bold()
    )
}

/// Format a month's buckets next to its income tax assessment
pub fn format_trade_batch(batch: &TradeBatch, assessment: &IncomeTaxAssessment) -> String {
    #[derive(Tabled)]
    struct BucketRow {
        #[tabled(rename = "Class")]
        class: String,
        #[tabled(rename = "Carried Loss")]
        accumulated_loss: String,
        #[tabled(rename = "Results")]
        current_results: String,
        #[tabled(rename = "Taxes")]
        total_tax: String,
        #[tabled(rename = "Volume")]
        volume: String,
        #[tabled(rename = "Net")]
        net: String,
        #[tabled(rename = "IR")]
        fee: String,
    }

    let rows: Vec<BucketRow> = AssetClass::ALL
        .iter()
        .map(|class| {
            let data = batch.bucket(*class);
            let fee = match assessment.classes.get(class) {
                Some(assessed) if assessed.exempt => "exempt".bright_black().to_string(),
                Some(assessed) => format_currency(assessed.fee),
                None => "-".to_string(),
            };
            BucketRow {
                class: class.as_str().to_string(),
                accumulated_loss: format_currency(data.accumulated_loss),
                current_results: signed_currency(data.current_results),
                total_tax: format_currency(data.total_tax),
                volume: format_currency(data.total_trade_volume),
                net: signed_currency(data.net_result()),
                fee,
            }
        })
        .collect();

    let mut output = format!(
        "{} {} {}\n\n",
        "Trade batch".bold(),
        batch.investor,
        batch.month_start.format("%m/%Y")
    );
    output.push_str(&render(&rows, 1));
    output.push_str(&format!(
        "\n\n{:<20} {}\n{:<20} {}\n",
        "Taxable Base:".bold(),
        format_currency(assessment.base),
        "Income Tax:".bold(),
        format_currency(assessment.fee)
    ));
    output
}

/// Format the earnings recorded from a statement
pub fn format_earnings_outcome(outcome: &EarningsOutcome) -> String {
    #[derive(Tabled)]
    struct EarningRow {
        #[tabled(rename = "Security")]
        security: String,
        #[tabled(rename = "Type")]
        kind: String,
        #[tabled(rename = "Paid")]
        pay_date: String,
        #[tabled(rename = "Gross")]
        raw_value: String,
        #[tabled(rename = "Net")]
        net_value: String,
    }

    let mut output = String::new();
    if !outcome.recorded.is_empty() {
        let rows: Vec<EarningRow> = outcome
            .recorded
            .iter()
            .map(|e| EarningRow {
                security: e.security.clone(),
                kind: e.kind.as_str().to_string(),
                pay_date: e.pay_date.format("%d/%m/%Y").to_string(),
                raw_value: format_currency(e.raw_value),
                net_value: format_currency(e.net_value),
            })
            .collect();
        output.push_str(&render(&rows, 3));
        output.push('\n');
    }
    output.push_str(&format!(
        "{} {} recorded, {} already on file\n",
        "✓".green().bold(),
        outcome.recorded.len(),
        outcome.skipped.len()
    ));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tax::catalog::TaxRates;
    use crate::tax::group::TaxGroup;
    use crate::tax::trade_batch::assess_income_tax;
    use crate::tax::TaxScope;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    #[test]
    fn test_empty_positions_message() {
        let msg = format_empty_positions();
        assert!(msg.contains("No positions found"));
        assert!(msg.contains("settle"));
    }

    #[test]
    fn test_positions_table() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let mut position = Position::open("inv-1", "ABCD3", date);
        position.quantity = dec!(60);
        position.total_cost = dec!(600.18);
        position.average_cost = dec!(10.003);

        let out = format_positions(&[position]);
        assert!(out.contains("ABCD3"));
        assert!(out.contains("R$ 600,18"));
    }

    #[test]
    fn test_trade_batch_table_marks_exempt_classes() {
        let month = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let mut buckets = BTreeMap::new();
        buckets.insert(
            AssetClass::Share,
            crate::db::models::TradeBatchData {
                current_results: dec!(500),
                total_trade_volume: dec!(15000),
                ..Default::default()
            },
        );
        let batch = TradeBatch {
            id: Some(1),
            investor: "inv-1".to_string(),
            month_start: month,
            tax_group: TaxGroup::new(TaxScope::TradeBatch, month),
            buckets,
        };
        let assessment = assess_income_tax(&batch.buckets, &TaxRates::default());

        let out = format_trade_batch(&batch, &assessment);
        assert!(out.contains("03/2025"));
        assert!(out.contains("exempt"));
        assert!(out.contains("R$ 0,00"));
    }

    #[test]
    fn test_duplicate_notice_truncates_fingerprint() {
        let out = format_duplicate_invoice(&"a".repeat(64));
        assert!(out.contains(&"a".repeat(16)));
        assert!(!out.contains(&"a".repeat(17)));
    }
}
