//! Formatting and calendar helpers shared by the engine and the CLI

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

use crate::error::SettlementError;

/// Whether to prefix amounts with the Real symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencySymbol {
    BRL,
    None,
}

/// Format a value with Brazilian separators (`.` thousands, `,` decimals),
/// rounded to cents and right-aligned to `width` when it is non-zero.
///
/// # Examples
/// ```
/// use nota::utils::{format_currency_with_width, CurrencySymbol};
/// use rust_decimal_macros::dec;
///
/// assert_eq!(
///     format_currency_with_width(dec!(1234.56), 0, CurrencySymbol::BRL),
///     "R$ 1.234,56"
/// );
/// assert_eq!(
///     format_currency_with_width(dec!(1234), 12, CurrencySymbol::None),
///     "    1.234,00"
/// );
/// ```
pub fn format_currency_with_width(value: Decimal, width: usize, symbol: CurrencySymbol) -> String {
    let rounded = format!("{:.2}", value.abs());
    let (integer, cents) = rounded.split_once('.').unwrap_or((rounded.as_str(), "00"));

    let digits: Vec<char> = integer.chars().collect();
    let grouped = digits
        .rchunks(3)
        .rev()
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(".");

    let sign = if value < Decimal::ZERO { "-" } else { "" };
    let prefix = match symbol {
        CurrencySymbol::BRL => "R$ ",
        CurrencySymbol::None => "",
    };

    format!(
        "{:>width$}",
        format!("{}{}{},{}", prefix, sign, grouped, cents),
        width = width
    )
}

/// "R$ 1.234,56"
///
/// # Examples
/// ```
/// use nota::utils::format_currency;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(format_currency(dec!(75)), "R$ 75,00");
/// assert_eq!(format_currency(dec!(-500)), "R$ -500,00");
/// ```
pub fn format_currency(value: Decimal) -> String {
    format_currency_with_width(value, 0, CurrencySymbol::BRL)
}

/// "1.234,56"
pub fn format_decimal_br(value: Decimal) -> String {
    format_currency_with_width(value, 0, CurrencySymbol::None)
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the month after the one containing `date`.
pub fn next_month_start(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

/// Last day of the month following the one containing `date`.
pub fn last_day_of_next_month(date: NaiveDate) -> NaiveDate {
    next_month_start(next_month_start(date))
        .pred_opt()
        .unwrap_or(date)
}

/// Parse `YYYY-MM` into the first day of that month.
pub fn parse_month(raw: &str) -> Result<NaiveDate, SettlementError> {
    let invalid =
        || SettlementError::ParseError(format!("invalid month '{}', expected YYYY-MM", raw));

    let (year, month) = raw.trim().split_once('-').ok_or_else(invalid)?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)
}
