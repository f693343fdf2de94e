//! Application orchestrator: wires the converter to its channels.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use wsbridge_connector::{BridgeBuilder, Message};

use crate::config::{Config, Rates};

/// Incoming channel carrying amounts to convert.
pub const AMOUNTS: &str = "amounts";

/// Outgoing channel receiving converted amounts.
pub const CONVERTED: &str = "converted";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub value: f64,
    pub currency: String,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConversionError {
    #[error("no rate for currency '{0}'")]
    UnknownCurrency(String),

    #[error("amount is not a finite number")]
    NotFinite,
}

/// Converts amounts and keeps a running total in the target currency.
pub struct Converter {
    rates: Rates,
    total: Mutex<f64>,
}

impl Converter {
    pub fn new(rates: Rates) -> Self {
        Self {
            rates,
            total: Mutex::new(0.0),
        }
    }

    pub fn target(&self) -> &str {
        &self.rates.target
    }

    /// Converts `amount` into the target currency and adds it to the total.
    pub fn convert(&self, amount: &Amount) -> Result<Amount, ConversionError> {
        if !amount.value.is_finite() {
            return Err(ConversionError::NotFinite);
        }
        let rate = self
            .rates
            .rate(&amount.currency)
            .ok_or_else(|| ConversionError::UnknownCurrency(amount.currency.clone()))?;

        let converted = Amount {
            value: amount.value * rate,
            currency: self.rates.target.clone(),
        };
        if let Ok(mut total) = self.total.lock() {
            *total += converted.value;
        }
        Ok(converted)
    }

    /// Sum of every converted amount so far.
    pub fn total(&self) -> f64 {
        self.total.lock().map(|t| *t).unwrap_or_default()
    }
}

/// Runs the converter until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let converter = Arc::new(Converter::new(config.rates));
    let mut builder = BridgeBuilder::new(config.messaging);

    let converted = builder.emitter::<Amount>(CONVERTED);
    let handler_converter = Arc::clone(&converter);
    builder.subscribe(AMOUNTS, move |message: Message<Amount>| {
        let converter = Arc::clone(&handler_converter);
        let converted = converted.clone();
        async move {
            match converter.convert(&message.payload) {
                Ok(amount) => {
                    tracing::debug!(
                        from = %message.payload.currency,
                        value = amount.value,
                        "amount converted"
                    );
                    if let Err(e) = converted.emit(amount).await {
                        tracing::warn!("failed to publish converted amount: {e}");
                    }
                }
                Err(e) => {
                    tracing::warn!(connection = ?message.connection(), "skipping amount: {e}");
                }
            }
        }
    });

    let bridge = builder.start().await?;
    if let Some(addr) = bridge.local_addr().await {
        tracing::info!(%addr, target = converter.target(), "converter ready");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");

    let report = bridge.shutdown().await;
    for (channel, stats) in &report.published {
        tracing::info!(
            %channel,
            sent = stats.sent,
            retries = stats.retries,
            dropped = stats.dropped,
            "publisher summary"
        );
    }
    tracing::info!(
        total = converter.total(),
        currency = converter.target(),
        "running total"
    );
    Ok(())
}
