use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::tax::group::TaxGroup;

/// Asset classes with separate monthly results
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetClass {
    Share,             // Ações
    DepositaryReceipt, // BDRs
    Fund,              // FII, ETF and other listed funds
}

/// Share units (bundles of ON and PN shares) that trade under an `11` ticker
const SHARE_UNITS: [&str; 10] = [
    "ALUP11", "BPAC11", "ENGI11", "IGTI11", "KLBN11", "SANB11", "SAPR11", "TAEE11",
    "BRBI11", "AESB11",
];

impl AssetClass {
    pub const ALL: [AssetClass; 3] = [
        AssetClass::Share,
        AssetClass::DepositaryReceipt,
        AssetClass::Fund,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Share => "SHARE",
            AssetClass::DepositaryReceipt => "DEPOSITARY_RECEIPT",
            AssetClass::Fund => "FUND",
        }
    }

    /// Classify a security from its ticker and name.
    ///
    /// BDRs end in 31-35 or 39 (or carry a "DRN" name). An `11` ticker is a fund
    /// unless it is a share unit, recognised by a `UNT` name or the known unit list.
    /// Other unlisted units need an explicit class on the input.
    pub fn classify(code: &str, name: Option<&str>) -> Self {
        let upper = code.trim().to_uppercase();
        let name = name.map(|n| n.trim().to_uppercase()).unwrap_or_default();
        let is_drn = name.ends_with("DRN");
        let is_unit = name.split_whitespace().any(|word| word == "UNT")
            || SHARE_UNITS.contains(&upper.as_str());

        if is_drn {
            return AssetClass::DepositaryReceipt;
        }

        let suffix = upper
            .len()
            .checked_sub(2)
            .and_then(|start| upper.get(start..))
            .unwrap_or("");

        match suffix {
            "31" | "32" | "33" | "34" | "35" | "39" => AssetClass::DepositaryReceipt,
            "11" if is_unit => AssetClass::Share,
            "11" => AssetClass::Fund,
            _ => AssetClass::Share,
        }
    }
}

impl FromStr for AssetClass {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHARE" | "STOCK" | "ACAO" => Ok(AssetClass::Share),
            "DEPOSITARY_RECEIPT" | "BDR" => Ok(AssetClass::DepositaryReceipt),
            "FUND" | "FII" | "ETF" => Ok(AssetClass::Fund),
            _ => Err(()),
        }
    }
}

/// Invoice line direction: debit buys, credit sells
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn from_is_purchase(is_purchase: bool) -> Self {
        if is_purchase {
            Direction::Debit
        } else {
            Direction::Credit
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "D",
            Direction::Credit => "C",
        }
    }

    pub fn is_purchase(&self) -> bool {
        matches!(self, Direction::Debit)
    }
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "D" | "DEBIT" | "BUY" | "COMPRA" => Ok(Direction::Debit),
            "C" | "CREDIT" | "SELL" | "VENDA" => Ok(Direction::Credit),
            _ => Err(()),
        }
    }
}

/// Running weighted-average cost basis for one security held by one investor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: Option<i64>,
    pub investor: String,
    pub security: String,
    pub opened_on: NaiveDate,
    pub quantity: Decimal,
    pub total_cost: Decimal,
    pub average_cost: Decimal,
}

/// One purchase line with a depletable balance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lot {
    pub id: Option<i64>,
    pub investor: String,
    pub security: String,
    pub line_id: Option<i64>,
    pub quantity: Decimal,
    pub remaining_balance: Decimal,
    pub price: Decimal,
    pub acquired_on: NaiveDate,
    pub sequence: i64,
}

/// Part of a sale settled against a specific lot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaleAllocation {
    pub lot_id: i64,
    pub sale_line_id: i64,
    pub quantity: Decimal,
}

/// Processed invoice header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceRecord {
    pub id: Option<i64>,
    pub fingerprint: String,
    pub investor: String,
    pub number: Option<i64>,
    pub market_date: NaiveDate,
    pub settlement_date: NaiveDate,
    pub raw_value: Decimal,
    pub total_sold: Decimal,
    pub tax_group_id: Option<i64>,
}

/// Invoice line as recorded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceLine {
    pub id: Option<i64>,
    pub invoice_id: i64,
    pub security: String,
    pub asset_class: AssetClass,
    pub direction: Direction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub sequence: i64,
}

impl InvoiceLine {
    pub fn gross_value(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Acquisition cost of one purchase line after its taxes are folded in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemBatch {
    pub id: Option<i64>,
    pub line_id: i64,
    pub tax_group_id: i64,
    pub position_id: i64,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub raw_price: Decimal,
    pub total_taxes: Decimal,
}

/// Realized result of one sale line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub id: Option<i64>,
    pub line_id: i64,
    pub tax_group_id: i64,
    pub position_id: i64,
    pub trade_batch_id: i64,
    pub market_date: NaiveDate,
    pub asset_class: AssetClass,
    pub quantity: Decimal,
    /// Average cost of the position before the sale
    pub cost_basis: Decimal,
    pub proceeds: Decimal,
    pub average_price: Decimal,
    pub raw_result: Decimal,
    pub total_tax: Decimal,
}

/// Monthly accumulator for one asset class
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TradeBatchData {
    /// Carried loss, never positive
    pub accumulated_loss: Decimal,
    pub current_results: Decimal,
    pub total_tax: Decimal,
    pub total_trade_volume: Decimal,
}

impl TradeBatchData {
    pub fn net_result(&self) -> Decimal {
        self.current_results - self.total_tax
    }
}

/// One calendar month of trading results for one investor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeBatch {
    pub id: Option<i64>,
    pub investor: String,
    pub month_start: NaiveDate,
    pub tax_group: TaxGroup,
    pub buckets: BTreeMap<AssetClass, TradeBatchData>,
}

impl TradeBatch {
    /// Bucket for a class; absent classes read as an empty month.
    pub fn bucket(&self, class: AssetClass) -> TradeBatchData {
        self.buckets.get(&class).cloned().unwrap_or_default()
    }

    pub fn bucket_mut(&mut self, class: AssetClass) -> &mut TradeBatchData {
        self.buckets.entry(class).or_default()
    }
}

/// Earning (provento) type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EarningKind {
    Dividend,     // Dividendo / rendimento
    Amortization, // Amortização
    Jcp,          // Juros sobre Capital Próprio
}

impl EarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EarningKind::Dividend => "DIVIDEND",
            EarningKind::Amortization => "AMORTIZATION",
            EarningKind::Jcp => "JCP",
        }
    }
}

impl FromStr for EarningKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DIVIDEND" | "DIVIDENDO" | "RENDIMENTO" => Ok(EarningKind::Dividend),
            "AMORTIZATION" | "AMORTIZAÇÃO" | "AMORTIZACAO" => Ok(EarningKind::Amortization),
            "JCP" => Ok(EarningKind::Jcp),
            _ => Err(()),
        }
    }
}

/// Recorded earning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Earning {
    pub id: Option<i64>,
    pub uuid: String,
    pub investor: String,
    pub security: String,
    pub kind: EarningKind,
    pub pay_date: NaiveDate,
    pub raw_value: Decimal,
    pub net_value: Decimal,
    pub tax_group_id: i64,
}
