use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SettlementError;

/// Fee and tax codes known to the engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaxCode {
    /// Taxa de liquidação
    #[serde(rename = "SETFEE")]
    Settlement,
    /// Emolumentos
    #[serde(rename = "EMLFEE")]
    Emolument,
    /// Corretagem
    #[serde(rename = "BRKFEE")]
    Brokerage,
    /// ISS grossed up over the brokerage fee
    #[serde(rename = "ISSSPFEE")]
    ServiceTax,
    /// IRRF "dedo-duro" withheld on sales
    #[serde(rename = "IRRFFEE")]
    Withholding,
    /// Monthly income tax on trading results
    #[serde(rename = "IRFEE")]
    IncomeTax,
}

impl TaxCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxCode::Settlement => "SETFEE",
            TaxCode::Emolument => "EMLFEE",
            TaxCode::Brokerage => "BRKFEE",
            TaxCode::ServiceTax => "ISSSPFEE",
            TaxCode::Withholding => "IRRFFEE",
            TaxCode::IncomeTax => "IRFEE",
        }
    }

    /// Parse a code coming from an input document; unknown codes are fatal.
    pub fn parse(code: &str) -> Result<Self, SettlementError> {
        code.parse()
    }

    /// Brokerage and its service tax are charged per order, not per traded value.
    pub fn is_per_order(&self) -> bool {
        matches!(self, TaxCode::Brokerage | TaxCode::ServiceTax)
    }

    /// Rate recorded for this code when the input does not override it.
    pub fn default_rate(&self, rates: &TaxRates) -> Decimal {
        match self {
            TaxCode::Settlement => rates.settlement,
            TaxCode::Emolument => rates.emolument,
            TaxCode::Brokerage => Decimal::ZERO,
            TaxCode::ServiceTax => rates.service_tax,
            TaxCode::Withholding => rates.withholding,
            TaxCode::IncomeTax => rates.income_tax,
        }
    }
}

impl FromStr for TaxCode {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SETFEE" => Ok(TaxCode::Settlement),
            "EMLFEE" => Ok(TaxCode::Emolument),
            "BRKFEE" => Ok(TaxCode::Brokerage),
            "ISSSPFEE" => Ok(TaxCode::ServiceTax),
            "IRRFFEE" => Ok(TaxCode::Withholding),
            "IRFEE" => Ok(TaxCode::IncomeTax),
            _ => Err(SettlementError::UnknownTaxCode(s.to_string())),
        }
    }
}

impl fmt::Display for TaxCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope a tax group is computed at
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaxScope {
    Earning,
    Invoice,
    ItemBatch,
    Trade,
    TradeBatch,
}

impl TaxScope {
    /// Source tag stored with the group.
    pub fn source(&self) -> &'static str {
        match self {
            TaxScope::Earning => "EAR",
            TaxScope::Invoice => "BIV",
            TaxScope::ItemBatch => "ITB",
            TaxScope::Trade => "TRD",
            TaxScope::TradeBatch => "TDB",
        }
    }

    fn prefix(&self) -> i64 {
        match self {
            TaxScope::Earning => 1,
            TaxScope::Invoice => 2,
            TaxScope::ItemBatch => 3,
            TaxScope::Trade => 4,
            TaxScope::TradeBatch => 5,
        }
    }

    /// Deterministic group id: scope prefix followed by `YYYYMMDD`.
    ///
    /// # Examples
    /// ```
    /// use chrono::NaiveDate;
    /// use nota::tax::catalog::TaxScope;
    ///
    /// let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
    /// assert_eq!(TaxScope::Invoice.external_id(date), 220250115);
    /// ```
    pub fn external_id(&self, date: NaiveDate) -> i64 {
        self.prefix() * 100_000_000
            + i64::from(date.year()) * 10_000
            + i64::from(date.month()) * 100
            + i64::from(date.day())
    }
}

impl FromStr for TaxScope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EAR" => Ok(TaxScope::Earning),
            "BIV" => Ok(TaxScope::Invoice),
            "ITB" => Ok(TaxScope::ItemBatch),
            "TRD" => Ok(TaxScope::Trade),
            "TDB" => Ok(TaxScope::TradeBatch),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TaxScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaxScope::Earning => "earning",
            TaxScope::Invoice => "invoice",
            TaxScope::ItemBatch => "item-batch",
            TaxScope::Trade => "trade",
            TaxScope::TradeBatch => "trade-batch",
        };
        f.write_str(name)
    }
}

/// Tax dictionary entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tax {
    pub id: Option<i64>,
    pub code: TaxCode,
    pub source: String,
    pub rate: Decimal,
}

impl Tax {
    pub fn new(code: TaxCode, source: impl Into<String>, rate: Decimal) -> Self {
        Self {
            id: None,
            code,
            source: source.into(),
            rate,
        }
    }
}

/// Rate table. Decimal all the way down so allocations never drift.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaxRates {
    pub settlement: Decimal,
    pub emolument: Decimal,
    pub service_tax: Decimal,
    pub withholding: Decimal,
    pub income_tax: Decimal,
    /// Monthly share sale volume up to which share gains are exempt
    pub exemption_limit: Decimal,
}

impl TaxRates {
    /// Rates are fractions: none negative, and the service tax strictly below 1
    /// since it is grossed up over the brokerage fee.
    pub fn validate(&self) -> Result<(), SettlementError> {
        let fractions = [
            ("settlement", self.settlement),
            ("emolument", self.emolument),
            ("service_tax", self.service_tax),
            ("withholding", self.withholding),
            ("income_tax", self.income_tax),
        ];
        if let Some((name, rate)) = fractions.iter().find(|(_, rate)| rate.is_sign_negative()) {
            return Err(SettlementError::ValidationError(format!(
                "rate {} must not be negative, got {}",
                name, rate
            )));
        }
        if self.service_tax >= Decimal::ONE {
            return Err(SettlementError::ValidationError(format!(
                "rate service_tax must be below 1, got {}",
                self.service_tax
            )));
        }
        if self.exemption_limit.is_sign_negative() {
            return Err(SettlementError::ValidationError(format!(
                "exemption_limit must not be negative, got {}",
                self.exemption_limit
            )));
        }
        Ok(())
    }
}

impl Default for TaxRates {
    fn default() -> Self {
        Self {
            settlement: Decimal::new(25, 5),
            emolument: Decimal::new(5, 5),
            service_tax: Decimal::new(5, 2),
            withholding: Decimal::new(5, 5),
            income_tax: Decimal::new(15, 2),
            exemption_limit: Decimal::from(20_000),
        }
    }
}
