//! Region shipping rates

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::value_objects::Money;

/// Where the parcel is dropped off. Each type is priced independently per region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryType {
    #[default]
    Home,
    Office,
}

impl DeliveryType {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Home => "home", Self::Office => "office" }
    }
}

impl fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for DeliveryType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "home" => Ok(Self::Home),
            "office" => Ok(Self::Office),
            other => Err(format!("unknown delivery type '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingRate {
    pub home_price: Money,
    pub office_price: Money,
}

impl ShippingRate {
    pub fn price_for(&self, delivery: DeliveryType) -> Money {
        match delivery {
            DeliveryType::Home => self.home_price,
            DeliveryType::Office => self.office_price,
        }
    }
}

/// Prices charged when a region has no configured rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingDefaults {
    pub home_price: Money,
    pub office_price: Money,
}

impl ShippingDefaults {
    pub fn new(home: Decimal, office: Decimal) -> Result<Self, crate::domain::value_objects::MoneyError> {
        Ok(Self { home_price: Money::new(home)?, office_price: Money::new(office)? })
    }

    /// Picks the configured rate when present, the default otherwise.
    pub fn resolve(&self, rate: Option<&ShippingRate>, delivery: DeliveryType) -> Money {
        match rate {
            Some(rate) => rate.price_for(delivery),
            None => ShippingRate { home_price: self.home_price, office_price: self.office_price }.price_for(delivery),
        }
    }
}

impl Default for ShippingDefaults {
    fn default() -> Self {
        Self { home_price: Money::from_units(600), office_price: Money::from_units(500) }
    }
}

/// Region names are matched after trimming surrounding whitespace.
pub fn normalize_region(region: &str) -> String {
    region.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_rate_wins() {
        let rate = ShippingRate { home_price: Money::from_units(800), office_price: Money::from_units(450) };
        let defaults = ShippingDefaults::default();
        assert_eq!(defaults.resolve(Some(&rate), DeliveryType::Office), Money::from_units(450));
        assert_eq!(defaults.resolve(Some(&rate), DeliveryType::Home), Money::from_units(800));
    }

    #[test]
    fn test_missing_region_uses_defaults() {
        let defaults = ShippingDefaults::default();
        assert_eq!(defaults.resolve(None, DeliveryType::Home), Money::from_units(600));
        assert_eq!(defaults.resolve(None, DeliveryType::Office), Money::from_units(500));
    }

    #[test]
    fn test_delivery_type_wire_names() {
        assert_eq!(serde_json::to_string(&DeliveryType::Office).unwrap(), "\"office\"");
        assert_eq!("home".parse::<DeliveryType>().unwrap(), DeliveryType::Home);
        assert!("pickup".parse::<DeliveryType>().is_err());
    }
}
