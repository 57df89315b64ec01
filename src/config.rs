//! User configuration (`<config_home>/nota/config.toml`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::tax::catalog::TaxRates;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// SQLite ledger; `~/.nota/ledger.db` when unset
    pub database: Option<PathBuf>,
    pub rates: TaxRates,
}

/// Default location of the config file, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dir_spec::config_home().map(|dir| dir.join("nota").join("config.toml"))
}

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Invalid configuration")?;
        config.rates.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Load from an explicit path (must exist) or the default one (may be absent).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load_file(&path),
                _ => {
                    debug!("No configuration file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        info!("Loading configuration from {:?}", path);
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to load configuration {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.rates.income_tax, dec!(0.15));
    }

    #[test]
    fn test_partial_rates_override() {
        let config = Config::parse(
            r#"
            database = "/tmp/ledger.db"

            [rates]
            settlement = "0.00027"
            exemption_limit = 35000
            "#,
        )
        .unwrap();

        assert_eq!(config.database, Some(PathBuf::from("/tmp/ledger.db")));
        assert_eq!(config.rates.settlement, dec!(0.00027));
        assert_eq!(config.rates.exemption_limit, dec!(35000));
        assert_eq!(config.rates.emolument, dec!(0.00005));
    }

    #[test]
    fn test_service_tax_of_one_is_rejected() {
        let err = Config::parse(
            r#"
            [rates]
            service_tax = "1"
            "#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("service_tax"));
    }

    #[test]
    fn test_malformed_config_is_error() {
        assert!(Config::parse("rates = 3").is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[rates]\nincome_tax = \"0.2\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.rates.income_tax, dec!(0.2));
    }
}
