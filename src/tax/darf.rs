use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use super::catalog::TaxCode;
use crate::db::models::TradeBatch;
use crate::utils::{format_currency, last_day_of_next_month};

/// Revenue code for capital gains on exchange trades
pub const DARF_CODE: &str = "6015";

/// Income tax payment slip for one trading month
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DarfPayment {
    pub investor: String,
    pub month_start: NaiveDate,
    pub darf_code: &'static str,
    pub description: &'static str,
    pub tax_due: Decimal,
    pub due_date: NaiveDate,
}

impl DarfPayment {
    /// Slip for a closed month, if it owes anything.
    pub fn from_batch(batch: &TradeBatch) -> Option<Self> {
        let tax_due = batch.tax_group.value_of(TaxCode::IncomeTax);
        if tax_due <= Decimal::ZERO {
            return None;
        }

        Some(Self {
            investor: batch.investor.clone(),
            month_start: batch.month_start,
            darf_code: DARF_CODE,
            description: "Renda Variável - Operações Comuns",
            tax_due,
            due_date: last_day_of_next_month(batch.month_start),
        })
    }

    pub fn format(&self) -> String {
        format!(
            "DARF {code} - {description}\n  Apuração: {period}\n  Vencimento: {due}\n  Valor: {amount}",
            code = self.darf_code,
            description = self.description,
            period = self.month_start.format("%m/%Y"),
            due = self.due_date.format("%d/%m/%Y"),
            amount = format_currency(self.tax_due)
        )
    }
}

/// Text shown when a month owes nothing.
pub fn format_nothing_due(month_start: NaiveDate) -> String {
    format!("Nenhum DARF a pagar para {}", month_start.format("%m/%Y"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tax::catalog::TaxRates;
    use crate::tax::trade_batch::trade_batch_tax_group;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn batch(month: NaiveDate, ir: Decimal) -> TradeBatch {
        let mut tax_group = trade_batch_tax_group(month, &TaxRates::default()).unwrap();
        tax_group.instance_mut(TaxCode::IncomeTax).unwrap().tax_value = ir;
        TradeBatch {
            id: Some(1),
            investor: "investor-1".to_string(),
            month_start: month,
            tax_group,
            buckets: BTreeMap::new(),
        }
    }

    #[test]
    fn test_darf_due_at_end_of_following_month() {
        let jan = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let payment = DarfPayment::from_batch(&batch(jan, dec!(75))).unwrap();
        assert_eq!(payment.due_date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(payment.darf_code, "6015");
        assert_eq!(payment.tax_due, dec!(75));

        let dec_month = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let payment = DarfPayment::from_batch(&batch(dec_month, dec!(1))).unwrap();
        assert_eq!(payment.due_date, NaiveDate::from_ymd_opt(2025, 1, 31).unwrap());
    }

    #[test]
    fn test_no_darf_when_exempt() {
        let month = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(DarfPayment::from_batch(&batch(month, dec!(0))).is_none());
        assert_eq!(format_nothing_due(month), "Nenhum DARF a pagar para 03/2024");
    }

    #[test]
    fn test_format_darf_payment() {
        let month = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let formatted = DarfPayment::from_batch(&batch(month, dec!(1500)))
            .unwrap()
            .format();
        assert!(formatted.contains("DARF 6015"));
        assert!(formatted.contains("01/2024"));
        assert!(formatted.contains("29/02/2024"));
        assert!(formatted.contains("R$ 1.500,00"));
    }
}
