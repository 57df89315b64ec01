use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::db::models::{AssetClass, Direction, EarningKind};
use crate::error::SettlementError;

/// Account holder named on the document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestorInput {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Traded or paying security
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityInput {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Explicit classification, overrides ticker heuristics
    #[serde(default)]
    pub class: Option<AssetClass>,
}

impl SecurityInput {
    pub fn asset_class(&self) -> AssetClass {
        self.class
            .unwrap_or_else(|| AssetClass::classify(&self.code, self.name.as_deref()))
    }
}

/// Raw fee as printed on the invoice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeeInput {
    pub code: String,
    pub value: Decimal,
    #[serde(default)]
    pub rate: Option<Decimal>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Buy (debit) or sell (credit) line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineInput {
    pub security: SecurityInput,
    pub qty: Decimal,
    pub price: Decimal,
    pub is_purchase: bool,
    pub sequence: i64,
}

impl LineInput {
    pub fn direction(&self) -> Direction {
        Direction::from_is_purchase(self.is_purchase)
    }

    pub fn gross_value(&self) -> Decimal {
        self.price * self.qty
    }
}

/// Brokerage invoice (nota de corretagem) for one trading day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceInput {
    pub investor: InvestorInput,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(deserialize_with = "deserialize_date")]
    pub market_date: NaiveDate,
    #[serde(deserialize_with = "deserialize_date")]
    pub settlement_date: NaiveDate,
    pub raw_value: Decimal,
    pub total_sold: Decimal,
    #[serde(default)]
    pub total_acquired: Option<Decimal>,
    #[serde(default)]
    pub net_value: Option<Decimal>,
    pub lines: Vec<LineInput>,
    #[serde(default)]
    pub raw_fees: Vec<FeeInput>,
}

impl InvoiceInput {
    /// Identity of the brokerage invoice, independent of how the document was written.
    ///
    /// A numbered invoice is identified by investor, number and trading day. Without a
    /// number the settled content is hashed instead, with every decimal normalized so
    /// `10`, `10.0` and `"10.00"` agree. Descriptive names never take part.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        let mut field = |value: &str| {
            hasher.update(value.as_bytes());
            hasher.update(b"\x1f");
        };

        field(self.investor.id.trim());
        field(&self.market_date.to_string());
        match self.number {
            Some(number) => field(&format!("#{}", number)),
            None => {
                field(&self.settlement_date.to_string());
                for line in self.ordered_lines() {
                    field(&format!(
                        "{}|{}|{}|{}|{}",
                        line.sequence,
                        line.direction().as_str(),
                        line.security.code.trim().to_uppercase(),
                        line.qty.normalize(),
                        line.price.normalize()
                    ));
                }
                let mut fees: Vec<String> = self
                    .raw_fees
                    .iter()
                    .map(|fee| format!("{}|{}", fee.code.trim(), fee.value.normalize()))
                    .collect();
                fees.sort();
                for fee in &fees {
                    field(fee);
                }
            }
        }

        hasher.finalize().to_hex().to_string()
    }

    /// Lines in processing order.
    pub fn ordered_lines(&self) -> Vec<&LineInput> {
        let mut lines: Vec<&LineInput> = self.lines.iter().collect();
        lines.sort_by_key(|line| line.sequence);
        lines
    }

    /// Structural checks done before anything touches the store.
    pub fn validate(&self) -> Result<(), SettlementError> {
        if self.investor.id.trim().is_empty() {
            return Err(SettlementError::ValidationError(
                "invoice has no investor id".to_string(),
            ));
        }
        if self.lines.is_empty() {
            return Err(SettlementError::ValidationError(
                "invoice has no lines".to_string(),
            ));
        }
        if self.raw_value <= Decimal::ZERO {
            return Err(SettlementError::ValidationError(format!(
                "invoice raw value must be positive, got {}",
                self.raw_value
            )));
        }

        let mut sequences = HashSet::new();
        for line in &self.lines {
            if line.security.code.trim().is_empty() {
                return Err(SettlementError::ValidationError(format!(
                    "line {} has no security code",
                    line.sequence
                )));
            }
            if line.qty <= Decimal::ZERO {
                return Err(SettlementError::ValidationError(format!(
                    "line {} ({}) has non-positive quantity {}",
                    line.sequence, line.security.code, line.qty
                )));
            }
            if line.price < Decimal::ZERO {
                return Err(SettlementError::ValidationError(format!(
                    "line {} ({}) has negative price {}",
                    line.sequence, line.security.code, line.price
                )));
            }
            if !sequences.insert(line.sequence) {
                return Err(SettlementError::ValidationError(format!(
                    "line sequence {} appears twice",
                    line.sequence
                )));
            }
        }

        Ok(())
    }
}

/// One earning paid to the investor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EarningInput {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub kind: EarningKind,
    pub security: SecurityInput,
    #[serde(deserialize_with = "deserialize_date")]
    pub pay_date: NaiveDate,
    pub raw_value: Decimal,
    pub net_value: Decimal,
    #[serde(default)]
    pub taxes: Vec<FeeInput>,
}

/// Earnings statement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EarningsInput {
    pub investor: InvestorInput,
    pub earnings: Vec<EarningInput>,
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp (time part dropped).
fn deserialize_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw).map_err(serde::de::Error::custom)
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, SettlementError> {
    let day = raw.trim().split('T').next().unwrap_or_default();
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| SettlementError::ParseError(format!("invalid date '{}': {}", raw, e)))
}

/// Read an invoice document from disk.
pub fn read_invoice<P: AsRef<Path>>(path: P) -> Result<InvoiceInput> {
    let path = path.as_ref();
    info!("Reading invoice from {:?}", path);

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read invoice file {:?}", path))?;
    parse_invoice(&content).with_context(|| format!("Failed to parse invoice file {:?}", path))
}

pub fn parse_invoice(content: &str) -> Result<InvoiceInput> {
    let invoice: InvoiceInput = serde_json::from_str(content)
        .map_err(|e| SettlementError::ParseError(e.to_string()))?;
    invoice.validate()?;
    Ok(invoice)
}

/// Read an earnings document from disk.
pub fn read_earnings<P: AsRef<Path>>(path: P) -> Result<EarningsInput> {
    let path = path.as_ref();
    info!("Reading earnings from {:?}", path);

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read earnings file {:?}", path))?;
    let earnings: EarningsInput = serde_json::from_str(&content)
        .map_err(|e| SettlementError::ParseError(e.to_string()))
        .with_context(|| format!("Failed to parse earnings file {:?}", path))?;
    Ok(earnings)
}
