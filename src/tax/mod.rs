// Tax module - fee allocation, cost basis, lot matching and monthly income tax

pub mod allocation;
pub mod catalog;
pub mod cost_basis;
pub mod darf;
pub mod group;
pub mod loss_carryforward;
pub mod lots;
pub mod trade;
pub mod trade_batch;

pub use allocation::{count_orders, invoice_tax_group, line_tax_group, FeeClaims, LineShare};
pub use catalog::{Tax, TaxCode, TaxRates, TaxScope};
pub use darf::DarfPayment;
pub use group::{TaxGroup, TaxInstance};
pub use trade::{settle_sale, TradeSettlement};
pub use trade_batch::{assess_income_tax, OpenTradeBatch};
