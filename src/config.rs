//! Process configuration from the environment (`.env` is loaded first by `main`).

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::time::Duration;

use crate::authz::AuthorizationCatalog;
use crate::domain::shipping::ShippingDefaults;
use crate::infrastructure::StaticSessionProvider;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Absent: orders, coupons and shipping rates live in memory.
    pub database_url: Option<String>,
    /// Absent: order events are only logged.
    pub nats_url: Option<String>,
    pub shipping_defaults: ShippingDefaults,
    pub store_timeout: Duration,
    pub staff_tokens: StaticSessionProvider,
    pub catalog: AuthorizationCatalog,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port: u16 = match non_empty("PORT") {
            Some(p) => p.parse().with_context(|| format!("PORT must be a port number, got '{}'", p))?,
            None => 8083,
        };
        let decimal = |key: &str, default: u32| -> Result<Decimal> {
            match non_empty(key) {
                Some(v) => v.parse().with_context(|| format!("{} must be a decimal amount, got '{}'", key, v)),
                None => Ok(Decimal::from(default)),
            }
        };
        let shipping_defaults = ShippingDefaults::new(decimal("SHIPPING_DEFAULT_HOME", 600)?, decimal("SHIPPING_DEFAULT_OFFICE", 500)?)
            .context("shipping defaults must not be negative")?;
        let store_timeout = match non_empty("STORE_TIMEOUT_MS") {
            Some(ms) => Duration::from_millis(ms.parse().with_context(|| format!("STORE_TIMEOUT_MS must be milliseconds, got '{}'", ms))?),
            None => Duration::from_secs(5),
        };
        let staff_tokens = match non_empty("STAFF_TOKENS") {
            Some(table) => StaticSessionProvider::parse(&table).map_err(anyhow::Error::msg).context("invalid STAFF_TOKENS")?,
            None => StaticSessionProvider::default(),
        };

        Ok(Self {
            port,
            database_url: non_empty("DATABASE_URL"),
            nats_url: non_empty("NATS_URL"),
            shipping_defaults,
            store_timeout,
            staff_tokens,
            catalog: AuthorizationCatalog::storefront(),
        })
    }
}
