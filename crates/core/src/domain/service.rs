use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Billable service categories shared by rate card rules, ledger entries and invoice lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Receiving,
    Storage,
    Picking,
    Packing,
    Delivery,
    Handling,
    Adjustment,
    Sale,
}

impl ServiceType {
    pub const ALL: [ServiceType; 8] = [
        Self::Receiving,
        Self::Storage,
        Self::Picking,
        Self::Packing,
        Self::Delivery,
        Self::Handling,
        Self::Adjustment,
        Self::Sale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receiving => "RECEIVING",
            Self::Storage => "STORAGE",
            Self::Picking => "PICKING",
            Self::Packing => "PACKING",
            Self::Delivery => "DELIVERY",
            Self::Handling => "HANDLING",
            Self::Adjustment => "ADJUSTMENT",
            Self::Sale => "SALE",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownServiceType(pub String);

impl fmt::Display for UnknownServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown service type `{}`", self.0)
    }
}

impl std::error::Error for UnknownServiceType {}

impl FromStr for ServiceType {
    type Err = UnknownServiceType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|service| service.as_str() == normalized)
            .ok_or_else(|| UnknownServiceType(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::ServiceType;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("picking".parse::<ServiceType>(), Ok(ServiceType::Picking));
        assert_eq!(" STORAGE ".parse::<ServiceType>(), Ok(ServiceType::Storage));
        assert!("teleport".parse::<ServiceType>().is_err());
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&ServiceType::Receiving).expect("serialize");
        assert_eq!(json, "\"RECEIVING\"");
    }
}
