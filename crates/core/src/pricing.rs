//! Tiered rate-card pricing.
//!
//! Pure functions over a [`RateCard`]: no I/O, no rounding. Callers round when they
//! store the result.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::rate_card::{RateCard, RateCardRule};
use crate::domain::service::ServiceType;

pub const UNIT_CUBIC_METRE: &str = "m3";
pub const UNIT_KILOGRAM: &str = "kg";
pub const UNIT_KILOMETRE: &str = "km";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("no applicable rate for {service_type} in `{unit}` at quantity {quantity}")]
    NoApplicableRate { service_type: ServiceType, unit: String, quantity: Decimal },
    #[error("invalid pricing input: {0}")]
    InvalidInput(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTraceStep {
    pub stage: String,
    pub detail: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingResult {
    pub service_type: ServiceType,
    pub unit: String,
    pub quantity: Decimal,
    pub base_price: Decimal,
    pub min_fee: Decimal,
    pub final_price: Decimal,
    pub min_fee_applied: bool,
    pub applied_rule: RateCardRule,
    pub breakdown: Vec<PricingTraceStep>,
}

impl PricingResult {
    pub fn unit_price(&self) -> Decimal {
        self.applied_rule.unit_price
    }
}

pub trait PricingEngine: Send + Sync {
    fn price(
        &self,
        rate_card: &RateCard,
        service_type: ServiceType,
        quantity: Decimal,
        unit: &str,
    ) -> Result<PricingResult, PricingError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TieredPricingEngine;

impl PricingEngine for TieredPricingEngine {
    fn price(
        &self,
        rate_card: &RateCard,
        service_type: ServiceType,
        quantity: Decimal,
        unit: &str,
    ) -> Result<PricingResult, PricingError> {
        calculate_price(rate_card, service_type, quantity, unit)
    }
}

/// First active rule for `(service_type, unit)` whose tier contains `quantity`, in the
/// card's natural rule order.
pub fn select_rule<'a>(
    rate_card: &'a RateCard,
    service_type: ServiceType,
    quantity: Decimal,
    unit: &str,
) -> Option<&'a RateCardRule> {
    rate_card
        .rules
        .iter()
        .filter(|rule| rule.applies_to(service_type, unit))
        .find(|rule| rule.covers(quantity))
}

pub fn calculate_price(
    rate_card: &RateCard,
    service_type: ServiceType,
    quantity: Decimal,
    unit: &str,
) -> Result<PricingResult, PricingError> {
    if quantity.is_sign_negative() && !quantity.is_zero() {
        return Err(PricingError::InvalidInput(format!(
            "quantity must not be negative, got {quantity}"
        )));
    }

    let rule = select_rule(rate_card, service_type, quantity, unit).ok_or_else(|| {
        PricingError::NoApplicableRate { service_type, unit: unit.to_string(), quantity }
    })?;

    let base_price = quantity * rule.unit_price;
    let min_fee = rule.minimum_fee.unwrap_or(Decimal::ZERO);
    let final_price = base_price.max(min_fee);
    let min_fee_applied = final_price > base_price;

    let tier = match rule.tier_to {
        Some(upper) => format!("{}..={}", rule.tier_from, upper),
        None => format!("{}..", rule.tier_from),
    };
    let mut breakdown = vec![PricingTraceStep {
        stage: "base".to_string(),
        detail: format!("{quantity} {unit} x {} (tier {tier})", rule.unit_price),
        amount: base_price,
    }];
    if min_fee_applied {
        breakdown.push(PricingTraceStep {
            stage: "minimum_fee".to_string(),
            detail: format!("minimum fee {min_fee} exceeds base price"),
            amount: min_fee,
        });
    }

    Ok(PricingResult {
        service_type,
        unit: unit.to_string(),
        quantity,
        base_price,
        min_fee,
        final_price,
        min_fee_applied,
        applied_rule: rule.clone(),
        breakdown,
    })
}

/// Storage is billed per cubic-metre-day.
pub fn price_storage(
    rate_card: &RateCard,
    volume_m3: Decimal,
    days: u32,
) -> Result<PricingResult, PricingError> {
    calculate_price(
        rate_card,
        ServiceType::Storage,
        volume_m3 * Decimal::from(days),
        UNIT_CUBIC_METRE,
    )
}

pub fn price_handling(
    rate_card: &RateCard,
    weight_kg: Decimal,
) -> Result<PricingResult, PricingError> {
    calculate_price(rate_card, ServiceType::Handling, weight_kg, UNIT_KILOGRAM)
}

/// Distance-based when the card has a matching `km` tier, weight-based otherwise.
pub fn price_delivery(
    rate_card: &RateCard,
    distance_km: Option<Decimal>,
    weight_kg: Decimal,
) -> Result<PricingResult, PricingError> {
    if let Some(distance) = distance_km {
        match calculate_price(rate_card, ServiceType::Delivery, distance, UNIT_KILOMETRE) {
            Ok(result) => return Ok(result),
            Err(PricingError::NoApplicableRate { .. }) => {}
            Err(error) => return Err(error),
        }
    }

    calculate_price(rate_card, ServiceType::Delivery, weight_kg, UNIT_KILOGRAM)
}
