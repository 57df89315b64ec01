//! Settlement through the SQLite ledger, one transaction per document


use anyhow::Result;
use invoice_builders::{buy, date, fee, invoice, processed, sell, INVESTOR};
use nota::db::models::{AssetClass, EarningKind};
use nota::db::{self, SqliteStore};
use nota::error::{settlement_error, SettlementError};
use nota::importers::invoice::{EarningInput, EarningsInput, InvestorInput, SecurityInput};
use nota::repository::{EarningRepository, LotRepository, PositionRepository, TradeBatchRepository};
use nota::settlement::InvoiceOutcome;
use nota::tax::catalog::{TaxCode, TaxRates};
use rusqlite::Connection;
use rust_decimal_macros::dec;
use tempfile::TempDir;
use uuid::Uuid;

fn create_test_db() -> Result<(TempDir, Connection)> {
    let dir = TempDir::new()?;
    let path = dir.path().join("ledger.db");
    db::init_database(Some(path.clone()))?;
    let conn = db::open_db(Some(path))?;
    Ok((dir, conn))
}

fn count(conn: &Connection, table: &str) -> Result<i64> {
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?)
}

#[test]
fn test_invoice_round_trip_through_ledger() -> Result<()> {
    let (_dir, mut conn) = create_test_db()?;
    let rates = TaxRates::default();

    db::process_invoice(
        &mut conn,
        &invoice(
            date(2025, 3, 10),
            1,
            vec![buy("ABCD3", dec!(100), dec!(10.00), 1)],
            vec![fee("SETFEE", dec!(0.25)), fee("EMLFEE", dec!(0.05))],
        ),
        &rates,
    )?;
    let settled = processed(db::process_invoice(
        &mut conn,
        &invoice(date(2025, 3, 20), 2, vec![sell("ABCD3", dec!(40), dec!(12.00), 1)], vec![]),
        &rates,
    )?);
    assert_eq!(settled.trades[0].raw_result, dec!(79.88));

    let mut store = SqliteStore::new(&conn);
    let position = store.find_position(INVESTOR, "ABCD3")?.expect("position");
    assert_eq!(position.quantity, dec!(60));
    assert_eq!(position.average_cost, dec!(10.003));

    let lots = store.open_lots(INVESTOR, "ABCD3")?;
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].remaining_balance, dec!(60));

    let batch = store
        .find_trade_batch(INVESTOR, date(2025, 3, 1))?
        .expect("march batch");
    assert_eq!(batch.bucket(AssetClass::Share).current_results, dec!(79.88));
    assert_eq!(batch.bucket(AssetClass::Share).total_trade_volume, dec!(480));
    assert_eq!(batch.tax_group.value_of(TaxCode::IncomeTax), dec!(0));

    assert_eq!(count(&conn, "invoices")?, 2);
    assert_eq!(count(&conn, "trades")?, 1);
    assert_eq!(count(&conn, "sale_allocations")?, 1);
    // One dictionary row per code, however many groups use it
    assert_eq!(count(&conn, "taxes")?, 3);
    Ok(())
}

#[test]
fn test_duplicate_invoice_is_skipped() -> Result<()> {
    let (_dir, mut conn) = create_test_db()?;
    let purchase = invoice(
        date(2025, 3, 10),
        1,
        vec![buy("ABCD3", dec!(100), dec!(10), 1)],
        vec![fee("EMLFEE", dec!(0.05))],
    );

    processed(db::process_invoice(&mut conn, &purchase, &TaxRates::default())?);
    let groups = count(&conn, "tax_groups")?;

    let outcome = db::process_invoice(&mut conn, &purchase, &TaxRates::default())?;
    assert!(matches!(outcome, InvoiceOutcome::Duplicate { .. }));
    assert_eq!(count(&conn, "invoices")?, 1);
    assert_eq!(count(&conn, "lots")?, 1);
    assert_eq!(count(&conn, "tax_groups")?, groups);
    Ok(())
}

#[test]
fn test_failed_invoice_leaves_no_rows() -> Result<()> {
    let (_dir, mut conn) = create_test_db()?;
    let oversell = invoice(
        date(2025, 3, 10),
        1,
        vec![
            buy("EFGH4", dec!(10), dec!(5), 1),
            sell("ABCD3", dec!(1), dec!(12), 2),
        ],
        vec![],
    );

    let err = db::process_invoice(&mut conn, &oversell, &TaxRates::default()).unwrap_err();
    assert!(matches!(
        settlement_error(&err),
        Some(SettlementError::InsufficientLotBalance { .. })
    ));

    for table in ["invoices", "invoice_lines", "positions", "lots", "tax_groups", "taxes"] {
        assert_eq!(count(&conn, table)?, 0, "{} should be empty", table);
    }
    Ok(())
}

#[test]
fn test_preview_rolls_back() -> Result<()> {
    let (_dir, mut conn) = create_test_db()?;
    let purchase = invoice(
        date(2025, 3, 10),
        1,
        vec![buy("ABCD3", dec!(100), dec!(10), 1)],
        vec![],
    );

    let settled = processed(db::preview_invoice(&mut conn, &purchase, &TaxRates::default())?);
    assert_eq!(settled.item_batches.len(), 1);
    assert_eq!(count(&conn, "invoices")?, 0);
    assert_eq!(count(&conn, "positions")?, 0);

    // The real run is not mistaken for a duplicate
    processed(db::process_invoice(&mut conn, &purchase, &TaxRates::default())?);
    assert_eq!(count(&conn, "invoices")?, 1);
    Ok(())
}

#[test]
fn test_earnings_recorded_once() -> Result<()> {
    let (_dir, mut conn) = create_test_db()?;
    let statement = EarningsInput {
        investor: InvestorInput {
            id: INVESTOR.to_string(),
            name: None,
        },
        earnings: vec![EarningInput {
            uuid: Uuid::from_u128(0x6f1c_2d4e_0000_4000_8000_0000_0000_0042),
            kind: EarningKind::Dividend,
            security: SecurityInput {
                code: "ABCD3".to_string(),
                name: None,
                class: None,
            },
            pay_date: date(2025, 4, 15),
            raw_value: dec!(42.50),
            net_value: dec!(42.50),
            taxes: vec![],
        }],
    };

    let first = db::process_earnings(&mut conn, &statement, &TaxRates::default())?;
    assert_eq!(first.recorded.len(), 1);
    assert!(first.skipped.is_empty());

    let second = db::process_earnings(&mut conn, &statement, &TaxRates::default())?;
    assert!(second.recorded.is_empty());
    assert_eq!(second.skipped, vec![statement.earnings[0].uuid.to_string()]);

    let earnings = SqliteStore::new(&conn).list_earnings(INVESTOR)?;
    assert_eq!(earnings.len(), 1);
    assert_eq!(earnings[0].raw_value, dec!(42.50));
    assert_eq!(earnings[0].kind, EarningKind::Dividend);
    Ok(())
}
