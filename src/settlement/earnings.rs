use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use super::context::SettlementContext;
use super::persisted_id;
use crate::db::models::Earning;
use crate::error::{Result, SettlementError};
use crate::importers::invoice::{EarningInput, EarningsInput};
use crate::repository::SettlementStore;
use crate::tax::catalog::{Tax, TaxCode, TaxRates, TaxScope};
use crate::tax::group::{TaxGroup, TaxInstance};

/// Earnings recorded and skipped in one document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EarningsOutcome {
    pub recorded: Vec<Earning>,
    /// uuids already on file
    pub skipped: Vec<String>,
}

/// Withheld taxes of one earning. Values pass through, based on the gross amount.
pub fn earning_tax_group(earning: &EarningInput, rates: &TaxRates) -> Result<TaxGroup> {
    let mut group = TaxGroup::new(TaxScope::Earning, earning.pay_date);

    for tax in &earning.taxes {
        let code = TaxCode::parse(&tax.code)?;
        let rate = tax
            .rate
            .filter(|rate| *rate > Decimal::ZERO)
            .unwrap_or_else(|| code.default_rate(rates));
        let source = tax
            .source
            .clone()
            .unwrap_or_else(|| TaxScope::Earning.source().to_string());

        group.push(TaxInstance::new(
            Tax::new(code, source, rate),
            earning.pay_date,
            earning.raw_value,
            tax.value,
            rate,
        ))?;
    }

    Ok(group)
}

/// Record every earning of a statement once. Positions and trades are untouched.
pub fn settle_earnings<S>(
    store: &mut S,
    input: &EarningsInput,
    rates: &TaxRates,
) -> Result<EarningsOutcome>
where
    S: SettlementStore + ?Sized,
{
    let mut ctx = SettlementContext::new();
    let mut outcome = EarningsOutcome::default();

    for entry in &input.earnings {
        let uuid = entry.uuid.to_string();
        if store.earning_exists(&uuid)? {
            info!("Earning {} already recorded, skipping", uuid);
            outcome.skipped.push(uuid);
            continue;
        }
        if entry.raw_value < Decimal::ZERO || entry.net_value < Decimal::ZERO {
            return Err(SettlementError::ValidationError(format!(
                "earning {} of {} has a negative value",
                uuid, entry.security.code
            ))
            .into());
        }

        let group = ctx.persist_group(store, earning_tax_group(entry, rates)?)?;
        let earning = store.create_earning(&Earning {
            id: None,
            uuid,
            investor: input.investor.id.clone(),
            security: entry.security.code.clone(),
            kind: entry.kind,
            pay_date: entry.pay_date,
            raw_value: entry.raw_value,
            net_value: entry.net_value,
            tax_group_id: persisted_id(group.id, "earning tax group")?,
        })?;
        info!(
            "Recorded {} of {} from {} paid {} (net {})",
            earning.kind.as_str(),
            earning.raw_value,
            earning.security,
            earning.pay_date,
            earning.net_value
        );
        outcome.recorded.push(earning);
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::EarningKind;
    use crate::importers::invoice::{FeeInput, SecurityInput};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn jcp() -> EarningInput {
        EarningInput {
            uuid: Uuid::nil(),
            kind: EarningKind::Jcp,
            security: SecurityInput {
                code: "ABCD3".to_string(),
                name: None,
                class: None,
            },
            pay_date: NaiveDate::from_ymd_opt(2025, 4, 30).unwrap(),
            raw_value: dec!(100),
            net_value: dec!(85),
            taxes: vec![FeeInput {
                code: "IRFEE".to_string(),
                value: dec!(15),
                rate: None,
                source: None,
            }],
        }
    }

    #[test]
    fn test_earning_taxes_pass_through() {
        let group = earning_tax_group(&jcp(), &TaxRates::default()).unwrap();
        assert_eq!(group.external_id, 120250430);
        let ir = group.instance(TaxCode::IncomeTax).unwrap();
        assert_eq!(ir.base_value, dec!(100));
        assert_eq!(ir.tax_value, dec!(15));
        assert_eq!(ir.tax_rate, dec!(0.15));
        assert_eq!(ir.tax.source, "EAR");
    }

    #[test]
    fn test_earning_unknown_tax() {
        let mut earning = jcp();
        earning.taxes[0].code = "IOF".to_string();
        let err = earning_tax_group(&earning, &TaxRates::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SettlementError>(),
            Some(SettlementError::UnknownTaxCode(_))
        ));
    }
}
