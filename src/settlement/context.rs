use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::db::models::Position;
use crate::error::Result;
use crate::repository::{PositionRepository, TaxCatalog, TaxGroupRepository};
use crate::tax::allocation::FeeClaims;
use crate::tax::catalog::{Tax, TaxCode};
use crate::tax::group::TaxGroup;

/// State shared by every step of one document's settlement.
///
/// Lives exactly as long as the transaction it belongs to. Positions and tax
/// dictionary entries read or written here are served from memory afterwards,
/// so each (investor, security) is only ever computed against its latest
/// version.
#[derive(Debug, Default)]
pub struct SettlementContext {
    pub claims: FeeClaims,
    taxes: HashMap<TaxCode, Tax>,
    positions: HashMap<(String, String), Position>,
}

impl SettlementContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a tax dictionary entry and return it with its id.
    pub fn resolve_tax<S>(&mut self, store: &mut S, tax: &Tax) -> Result<Tax>
    where
        S: TaxCatalog + ?Sized,
    {
        let known = match self.taxes.get(&tax.code) {
            Some(cached) => Some(cached.clone()),
            None => store.find_tax_by_code(tax.code)?,
        };

        let resolved = match known {
            Some(existing) if existing.source == tax.source => {
                debug!("Tax {} unchanged", tax.code);
                existing
            }
            Some(existing) => {
                let updated = Tax {
                    source: tax.source.clone(),
                    ..existing
                };
                store.update_tax(&updated)?;
                info!("Updated tax {} source to {}", updated.code, updated.source);
                updated
            }
            None => {
                let created = store.create_tax(tax)?;
                info!("Created tax {} ({})", created.code, created.source);
                created
            }
        };

        self.taxes.insert(resolved.code, resolved.clone());
        Ok(resolved)
    }

    /// Resolve every instance's tax, then persist the group.
    pub fn persist_group<S>(&mut self, store: &mut S, mut group: TaxGroup) -> Result<TaxGroup>
    where
        S: TaxCatalog + TaxGroupRepository + ?Sized,
    {
        for instance in group.taxes_mut() {
            instance.tax = self.resolve_tax(store, &instance.tax)?;
        }

        let persisted = store.create_tax_group(&group)?;
        info!(
            "Created {} tax group {} with {} taxes (total {})",
            persisted.scope,
            persisted.external_id,
            persisted.taxes().len(),
            persisted.total()
        );
        Ok(persisted)
    }

    /// Current position, or an empty unsaved one opened on `market_date`.
    pub fn position<S>(
        &mut self,
        store: &mut S,
        investor: &str,
        security: &str,
        market_date: NaiveDate,
    ) -> Result<Position>
    where
        S: PositionRepository + ?Sized,
    {
        let key = (investor.to_string(), security.to_string());
        if let Some(position) = self.positions.get(&key) {
            return Ok(position.clone());
        }

        let position = store
            .find_position(investor, security)?
            .unwrap_or_else(|| Position::open(investor, security, market_date));
        self.positions.insert(key, position.clone());
        Ok(position)
    }

    /// Write a position through to the store and keep it as the current version.
    pub fn save_position<S>(&mut self, store: &mut S, position: Position) -> Result<Position>
    where
        S: PositionRepository + ?Sized,
    {
        let saved = match position.id {
            Some(_) => {
                store.update_position(&position)?;
                position
            }
            None => store.create_position(&position)?,
        };

        debug!(
            "Position {} {}: qty {} avg {}",
            saved.investor, saved.security, saved.quantity, saved.average_cost
        );
        self.positions.insert(
            (saved.investor.clone(), saved.security.clone()),
            saved.clone(),
        );
        Ok(saved)
    }
}
