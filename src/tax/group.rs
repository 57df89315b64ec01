use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::catalog::{Tax, TaxCode, TaxScope};
use crate::error::{Result, SettlementError};

/// One fee's computed base and value inside a tax group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaxInstance {
    pub id: Option<i64>,
    pub tax_group_id: Option<i64>,
    pub tax: Tax,
    pub market_date: NaiveDate,
    pub base_value: Decimal,
    pub tax_value: Decimal,
    pub tax_rate: Decimal,
}

impl TaxInstance {
    pub fn new(
        tax: Tax,
        market_date: NaiveDate,
        base_value: Decimal,
        tax_value: Decimal,
        tax_rate: Decimal,
    ) -> Self {
        Self {
            id: None,
            tax_group_id: None,
            tax,
            market_date,
            base_value,
            tax_value,
            tax_rate,
        }
    }

    pub fn code(&self) -> TaxCode {
        self.tax.code
    }
}

/// Ordered set of tax instances computed at one scope.
///
/// A code appears at most once; the set of codes is fixed once the group is
/// persisted and only instance values may change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaxGroup {
    pub id: Option<i64>,
    pub scope: TaxScope,
    pub external_id: i64,
    taxes: Vec<TaxInstance>,
}

impl TaxGroup {
    pub fn new(scope: TaxScope, market_date: NaiveDate) -> Self {
        Self {
            id: None,
            scope,
            external_id: scope.external_id(market_date),
            taxes: Vec::new(),
        }
    }

    /// Rebuild a group read back from storage.
    pub fn from_parts(
        id: Option<i64>,
        scope: TaxScope,
        external_id: i64,
        taxes: Vec<TaxInstance>,
    ) -> Self {
        Self {
            id,
            scope,
            external_id,
            taxes,
        }
    }

    /// Append an instance. Fails on a second instance of the same code.
    pub fn push(&mut self, instance: TaxInstance) -> Result<()> {
        if self.id.is_some() {
            return Err(SettlementError::ValidationError(format!(
                "tax group {} is persisted; cannot add {}",
                self.external_id,
                instance.code()
            ))
            .into());
        }
        if self.instance(instance.code()).is_some() {
            return Err(SettlementError::ValidationError(format!(
                "tax group {} already holds {}",
                self.external_id,
                instance.code()
            ))
            .into());
        }
        self.taxes.push(instance);
        Ok(())
    }

    pub fn taxes(&self) -> &[TaxInstance] {
        &self.taxes
    }

    pub fn taxes_mut(&mut self) -> &mut [TaxInstance] {
        &mut self.taxes
    }

    pub fn instance(&self, code: TaxCode) -> Option<&TaxInstance> {
        self.taxes.iter().find(|t| t.code() == code)
    }

    /// Mutable access for in-place adjustment; a missing code is fatal.
    pub fn instance_mut(&mut self, code: TaxCode) -> Result<&mut TaxInstance> {
        let group = self.id.unwrap_or(self.external_id);
        self.taxes
            .iter_mut()
            .find(|t| t.code() == code)
            .ok_or_else(|| {
                SettlementError::MissingTaxGroupInstance {
                    group,
                    code: code.to_string(),
                }
                .into()
            })
    }

    /// Value of one code, zero when absent.
    pub fn value_of(&self, code: TaxCode) -> Decimal {
        self.instance(code).map(|t| t.tax_value).unwrap_or(Decimal::ZERO)
    }

    pub fn total(&self) -> Decimal {
        self.taxes.iter().map(|t| t.tax_value).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn instance(code: TaxCode, value: Decimal) -> TaxInstance {
        TaxInstance::new(Tax::new(code, "BIV", Decimal::ZERO), date(), dec!(0), value, dec!(0))
    }

    #[test]
    fn test_group_total_and_lookup() {
        let mut group = TaxGroup::new(TaxScope::Invoice, date());
        group.push(instance(TaxCode::Settlement, dec!(0.25))).unwrap();
        group.push(instance(TaxCode::Emolument, dec!(0.05))).unwrap();

        assert_eq!(group.external_id, 220250314);
        assert_eq!(group.total(), dec!(0.30));
        assert_eq!(group.value_of(TaxCode::Emolument), dec!(0.05));
        assert_eq!(group.value_of(TaxCode::Brokerage), dec!(0));
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let mut group = TaxGroup::new(TaxScope::Trade, date());
        group.push(instance(TaxCode::Withholding, dec!(0.1))).unwrap();
        assert!(group.push(instance(TaxCode::Withholding, dec!(0.2))).is_err());
        assert_eq!(group.taxes().len(), 1);
    }

    #[test]
    fn test_persisted_group_code_set_is_fixed() {
        let mut group = TaxGroup::new(TaxScope::TradeBatch, date());
        group.push(instance(TaxCode::IncomeTax, dec!(0))).unwrap();
        group.id = Some(7);
        assert!(group.push(instance(TaxCode::Settlement, dec!(1))).is_err());

        group.instance_mut(TaxCode::IncomeTax).unwrap().tax_value = dec!(75);
        assert_eq!(group.total(), dec!(75));
    }

    #[test]
    fn test_missing_instance_is_reported() {
        let mut group = TaxGroup::new(TaxScope::TradeBatch, date());
        group.id = Some(9);
        let err = group.instance_mut(TaxCode::IncomeTax).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SettlementError>(),
            Some(SettlementError::MissingTaxGroupInstance { group: 9, .. })
        ));
    }
}
