//! Converter configuration.
//!
//! A single TOML file holds the messaging channels and an optional
//! `[rates]` table:
//!
//! ```toml
//! [rates]
//! target = "EUR"
//!
//! [rates.table]
//! USD = 0.92
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use wsbridge_registry::MessagingConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub messaging: MessagingConfig,
    pub rates: Rates,
}

/// Application-owned part of the configuration file.
#[derive(Debug, Deserialize)]
struct AppSection {
    #[serde(default)]
    rates: Rates,
}

/// Conversion rates into a single target currency.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Rates {
    /// Currency every amount is converted into.
    #[serde(default = "default_target")]
    pub target: String,

    /// Units of `target` per unit of each source currency.
    #[serde(default = "default_table")]
    pub table: BTreeMap<String, f64>,
}

fn default_target() -> String {
    "EUR".into()
}

fn default_table() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("USD".to_string(), 0.92),
        ("GBP".to_string(), 1.17),
    ])
}

impl Default for Rates {
    fn default() -> Self {
        Self {
            target: default_target(),
            table: default_table(),
        }
    }
}

impl Rates {
    /// Rate from `currency` to the target currency.
    pub fn rate(&self, currency: &str) -> Option<f64> {
        if currency.eq_ignore_ascii_case(&self.target) {
            return Some(1.0);
        }
        self.table
            .iter()
            .find(|(code, _)| code.eq_ignore_ascii_case(currency))
            .map(|(_, rate)| *rate)
    }
}

impl Config {
    /// Loads the configuration file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), target = %config.rates.target, "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let messaging = MessagingConfig::from_toml_str(content)?;
        let app: AppSection = toml::from_str(content)?;
        Ok(Self {
            messaging,
            rates: app.rates,
        })
    }
}
