//! Nota - B3 brokerage invoice settlement
//!
//! Settles brokerage invoices into positions at average cost, LIFO lots,
//! realized trades and monthly income tax batches, with every fee allocated
//! down from the invoice to its lines.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod importers;
pub mod repository;
pub mod settlement;
pub mod tax;
pub mod utils;

pub use error::{Result, SettlementError};
