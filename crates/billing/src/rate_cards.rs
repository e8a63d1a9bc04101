use chrono::{DateTime, Utc};
use tracing::{info, warn};

use depot_core::domain::customer::CustomerId;
use depot_core::domain::rate_card::{
    NewRateCardRule, RateCard, RateCardId, RateCardRule, RateCardRuleId,
};
use depot_core::errors::BillingError;
use depot_db::Repositories;

/// Input for a new, inactive rate card version.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NewRateCard {
    pub name: String,
    pub currency: String,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rules: Vec<NewRateCardRule>,
}

impl NewRateCard {
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.name.trim().is_empty() {
            return Err(BillingError::Validation("rate card name must not be empty".to_string()));
        }
        if self.currency.trim().is_empty() {
            return Err(BillingError::Validation(
                "rate card currency must not be empty".to_string(),
            ));
        }
        if let (Some(from), Some(to)) = (self.valid_from, self.valid_to) {
            if from > to {
                return Err(BillingError::Validation(format!(
                    "rate card valid_from ({from}) is after valid_to ({to})"
                )));
            }
        }
        self.rules.iter().try_for_each(NewRateCardRule::validate)
    }
}

/// Versioned, customer-scoped rate cards. At most one card per customer is active.
#[derive(Clone)]
pub struct RateCardRegistry {
    repositories: Repositories,
}

impl RateCardRegistry {
    pub fn new(repositories: Repositories) -> Self {
        Self { repositories }
    }

    pub async fn create(
        &self,
        customer_id: CustomerId,
        card: NewRateCard,
    ) -> Result<RateCard, BillingError> {
        card.validate()?;
        self.repositories
            .customers
            .find_by_id(&customer_id)
            .await?
            .ok_or_else(|| BillingError::not_found("customer", customer_id))?;

        let version = self
            .repositories
            .rate_cards
            .list_for_customer(&customer_id)
            .await?
            .iter()
            .map(|existing| existing.version)
            .max()
            .unwrap_or(0)
            + 1;

        let created = RateCard {
            id: RateCardId::new(),
            customer_id,
            name: card.name.trim().to_string(),
            version,
            currency: card.currency.trim().to_ascii_uppercase(),
            active: false,
            valid_from: card.valid_from,
            valid_to: card.valid_to,
            rules: card.rules.into_iter().map(NewRateCardRule::into_rule).collect(),
            created_at: Utc::now(),
        };
        self.repositories.rate_cards.insert(created.clone()).await?;

        info!(
            event_name = "billing.rate_card.created",
            customer_id = %customer_id,
            rate_card_id = %created.id,
            version,
            rules = created.rules.len(),
            "rate card created"
        );
        Ok(created)
    }

    pub async fn get(&self, card_id: &RateCardId) -> Result<RateCard, BillingError> {
        self.repositories
            .rate_cards
            .find_by_id(card_id)
            .await?
            .ok_or_else(|| BillingError::not_found("rate card", card_id))
    }

    pub async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<RateCard>, BillingError> {
        Ok(self.repositories.rate_cards.list_for_customer(customer_id).await?)
    }

    /// Appends a rule after the existing ones; tier selection sees it last.
    pub async fn add_rule(
        &self,
        card_id: &RateCardId,
        rule: NewRateCardRule,
    ) -> Result<RateCardRule, BillingError> {
        rule.validate()?;
        self.get(card_id).await?;

        let rule = rule.into_rule();
        self.repositories.rate_cards.append_rule(card_id, rule.clone()).await?;
        info!(
            event_name = "billing.rate_card.rule_added",
            rate_card_id = %card_id,
            rule_id = %rule.id,
            service_type = %rule.service_type,
            "rate card rule added"
        );
        Ok(rule)
    }

    pub async fn deactivate_rule(
        &self,
        card_id: &RateCardId,
        rule_id: &RateCardRuleId,
    ) -> Result<(), BillingError> {
        if !self.repositories.rate_cards.deactivate_rule(card_id, rule_id).await? {
            return Err(BillingError::not_found("rate card rule", rule_id));
        }
        info!(
            event_name = "billing.rate_card.rule_deactivated",
            rate_card_id = %card_id,
            rule_id = %rule_id,
            "rate card rule deactivated"
        );
        Ok(())
    }

    pub async fn activate(&self, card_id: &RateCardId) -> Result<RateCard, BillingError> {
        let mut card = self.get(card_id).await?;
        if card.active {
            return Ok(card);
        }

        if let Some(current) = self.repositories.rate_cards.find_active(&card.customer_id).await? {
            warn!(
                event_name = "billing.rate_card.activation_rejected",
                customer_id = %card.customer_id,
                rate_card_id = %card.id,
                active_rate_card_id = %current.id,
                "another rate card is already active"
            );
            return Err(BillingError::DomainViolation(format!(
                "customer {} already has active rate card {} (version {}); deactivate it first",
                card.customer_id, current.id, current.version
            )));
        }

        self.repositories.rate_cards.set_active(card_id, true).await?;
        card.active = true;
        info!(
            event_name = "billing.rate_card.activated",
            customer_id = %card.customer_id,
            rate_card_id = %card.id,
            version = card.version,
            "rate card activated"
        );
        Ok(card)
    }

    pub async fn deactivate(&self, card_id: &RateCardId) -> Result<RateCard, BillingError> {
        let mut card = self.get(card_id).await?;
        if card.active {
            self.repositories.rate_cards.set_active(card_id, false).await?;
            card.active = false;
            info!(
                event_name = "billing.rate_card.deactivated",
                customer_id = %card.customer_id,
                rate_card_id = %card.id,
                "rate card deactivated"
            );
        }
        Ok(card)
    }

    pub async fn active_for(
        &self,
        customer_id: &CustomerId,
        at: DateTime<Utc>,
    ) -> Result<Option<RateCard>, BillingError> {
        active_card(&self.repositories, customer_id, at).await
    }
}

/// The customer's active card if its validity window contains `at`.
pub(crate) async fn active_card(
    repositories: &Repositories,
    customer_id: &CustomerId,
    at: DateTime<Utc>,
) -> Result<Option<RateCard>, BillingError> {
    let card = repositories.rate_cards.find_active(customer_id).await?;
    Ok(card.filter(|card| card.is_valid_at(at)))
}
