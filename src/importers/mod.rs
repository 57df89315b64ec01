// Import module - brokerage invoice and earnings statements (JSON)

pub mod invoice;

pub use invoice::{
    parse_invoice, read_earnings, read_invoice, EarningInput, EarningsInput, FeeInput,
    InvestorInput, InvoiceInput, LineInput, SecurityInput,
};
