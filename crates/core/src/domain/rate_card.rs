use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;
use crate::domain::service::ServiceType;
use crate::domain::uuid_id;
use crate::errors::BillingError;

uuid_id!(RateCardId);
uuid_id!(RateCardRuleId);

/// One price tier for a `(service_type, unit)` pair. `tier_to = None` means unbounded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCardRule {
    pub id: RateCardRuleId,
    pub service_type: ServiceType,
    pub unit: String,
    pub tier_from: Decimal,
    pub tier_to: Option<Decimal>,
    pub unit_price: Decimal,
    pub minimum_fee: Option<Decimal>,
    pub active: bool,
}

impl RateCardRule {
    pub fn applies_to(&self, service_type: ServiceType, unit: &str) -> bool {
        self.active && self.service_type == service_type && self.unit.eq_ignore_ascii_case(unit)
    }

    pub fn covers(&self, quantity: Decimal) -> bool {
        quantity >= self.tier_from && self.tier_to.map_or(true, |upper| quantity <= upper)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRateCardRule {
    pub service_type: ServiceType,
    pub unit: String,
    pub tier_from: Decimal,
    pub tier_to: Option<Decimal>,
    pub unit_price: Decimal,
    pub minimum_fee: Option<Decimal>,
}

impl NewRateCardRule {
    pub fn new(service_type: ServiceType, unit: impl Into<String>, unit_price: Decimal) -> Self {
        Self {
            service_type,
            unit: unit.into(),
            tier_from: Decimal::ZERO,
            tier_to: None,
            unit_price,
            minimum_fee: None,
        }
    }

    pub fn tier(mut self, from: Decimal, to: Option<Decimal>) -> Self {
        self.tier_from = from;
        self.tier_to = to;
        self
    }

    pub fn minimum_fee(mut self, fee: Decimal) -> Self {
        self.minimum_fee = Some(fee);
        self
    }

    pub fn validate(&self) -> Result<(), BillingError> {
        if self.unit.trim().is_empty() {
            return Err(BillingError::Validation("rate rule unit must not be empty".to_string()));
        }
        if self.tier_from.is_sign_negative() {
            return Err(BillingError::Validation("rate rule tier_from must be >= 0".to_string()));
        }
        if let Some(tier_to) = self.tier_to {
            if tier_to < self.tier_from {
                return Err(BillingError::Validation(format!(
                    "rate rule tier_to ({tier_to}) must not be below tier_from ({})",
                    self.tier_from
                )));
            }
        }
        if self.unit_price.is_sign_negative() {
            return Err(BillingError::Validation("rate rule unit_price must be >= 0".to_string()));
        }
        if self.minimum_fee.is_some_and(|fee| fee.is_sign_negative()) {
            return Err(BillingError::Validation(
                "rate rule minimum_fee must be >= 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_rule(self) -> RateCardRule {
        RateCardRule {
            id: RateCardRuleId::new(),
            service_type: self.service_type,
            unit: self.unit.trim().to_string(),
            tier_from: self.tier_from,
            tier_to: self.tier_to,
            unit_price: self.unit_price,
            minimum_fee: self.minimum_fee,
            active: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCard {
    pub id: RateCardId,
    pub customer_id: CustomerId,
    pub name: String,
    pub version: u32,
    pub currency: String,
    pub active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    /// Natural order is insertion order; tier selection depends on it.
    pub rules: Vec<RateCardRule>,
    pub created_at: DateTime<Utc>,
}

impl RateCard {
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| at >= from) && self.valid_to.map_or(true, |to| at <= to)
    }

    pub fn rule(&self, id: &RateCardRuleId) -> Option<&RateCardRule> {
        self.rules.iter().find(|rule| &rule.id == id)
    }

    pub fn active_rules(&self) -> impl Iterator<Item = &RateCardRule> {
        self.rules.iter().filter(|rule| rule.active)
    }
}
