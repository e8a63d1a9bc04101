use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use depot_core::domain::customer::CustomerId;
use depot_core::domain::invoice::InvoiceId;
use depot_core::domain::transaction::{TransactionEntry, TransactionId, UnbilledTransaction};
use depot_core::errors::BillingError;
use depot_core::money::round_money;
use depot_core::pricing::{PricingEngine, PricingError};
use depot_db::Repositories;

use crate::rate_cards::active_card;

/// Records billable activity, priced when it happens.
#[derive(Clone)]
pub struct TransactionLedger {
    repositories: Repositories,
    engine: Arc<dyn PricingEngine>,
}

impl TransactionLedger {
    pub fn new(repositories: Repositories, engine: Arc<dyn PricingEngine>) -> Self {
        Self { repositories, engine }
    }

    /// Entries without an applicable rate are still recorded, at zero.
    pub async fn record(
        &self,
        entry: TransactionEntry,
    ) -> Result<UnbilledTransaction, BillingError> {
        if entry.quantity.is_sign_negative() && !entry.quantity.is_zero() {
            return Err(BillingError::Validation(format!(
                "transaction quantity must not be negative, got {}",
                entry.quantity
            )));
        }
        if entry.unit.trim().is_empty() {
            return Err(BillingError::Validation("transaction unit must not be empty".to_string()));
        }
        self.repositories
            .customers
            .find_by_id(&entry.customer_id)
            .await?
            .ok_or_else(|| BillingError::not_found("customer", entry.customer_id))?;

        let now = Utc::now();
        let occurred_at = entry.occurred_at.unwrap_or(now);
        let service_type = entry.source.service_type();
        let unit = entry.unit.trim().to_string();

        let (rate, amount) = match active_card(&self.repositories, &entry.customer_id, occurred_at)
            .await?
        {
            Some(card) => match self.engine.price(&card, service_type, entry.quantity, &unit) {
                Ok(priced) => (priced.unit_price(), priced.final_price),
                Err(PricingError::NoApplicableRate { .. }) => {
                    warn!(
                        event_name = "billing.ledger.zero_rate",
                        customer_id = %entry.customer_id,
                        rate_card_id = %card.id,
                        service_type = %service_type,
                        unit = %unit,
                        quantity = %entry.quantity,
                        "no matching tier; recording at zero"
                    );
                    (Decimal::ZERO, Decimal::ZERO)
                }
                Err(error) => return Err(error.into()),
            },
            None => {
                warn!(
                    event_name = "billing.ledger.zero_rate",
                    customer_id = %entry.customer_id,
                    service_type = %service_type,
                    "no active rate card; recording at zero"
                );
                (Decimal::ZERO, Decimal::ZERO)
            }
        };

        let reference = entry.reference.trim();
        let transaction = UnbilledTransaction {
            id: TransactionId::new(),
            customer_id: entry.customer_id,
            service_type,
            description: entry
                .description
                .filter(|description| !description.trim().is_empty())
                .unwrap_or_else(|| entry.source.describe(reference)),
            quantity: round_money(entry.quantity),
            unit,
            rate: round_money(rate),
            amount: round_money(amount),
            reference: (!reference.is_empty()).then(|| reference.to_string()),
            occurred_at,
            billed: false,
            invoice_id: None,
            created_at: now,
        };
        self.repositories.transactions.insert(transaction.clone()).await?;

        info!(
            event_name = "billing.ledger.recorded",
            customer_id = %transaction.customer_id,
            transaction_id = %transaction.id,
            service_type = %transaction.service_type,
            amount = %transaction.amount,
            "billable transaction recorded"
        );
        Ok(transaction)
    }

    /// Unbilled entries of a customer in the inclusive window, oldest first.
    pub async fn query(
        &self,
        customer_id: &CustomerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UnbilledTransaction>, BillingError> {
        if from > to {
            return Err(BillingError::Validation(format!(
                "window start {from} is after window end {to}"
            )));
        }
        Ok(self.repositories.transactions.list_unbilled(customer_id, from, to).await?)
    }

    pub async fn mark_billed(
        &self,
        ids: &[TransactionId],
        invoice_id: &InvoiceId,
    ) -> Result<(), BillingError> {
        self.repositories.transactions.mark_billed(ids, invoice_id).await?;
        Ok(())
    }

    pub async fn for_invoice(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<Vec<UnbilledTransaction>, BillingError> {
        Ok(self.repositories.transactions.list_for_invoice(invoice_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use depot_core::domain::customer::{Customer, CustomerId};
    use depot_core::domain::rate_card::{NewRateCardRule, RateCard, RateCardId};
    use depot_core::domain::service::ServiceType;
    use depot_core::domain::transaction::{TransactionEntry, TransactionSource};
    use depot_core::errors::BillingError;
    use depot_core::pricing::TieredPricingEngine;
    use depot_db::Repositories;

    use super::TransactionLedger;

    async fn ledger(rules: Option<Vec<NewRateCardRule>>) -> (TransactionLedger, Customer) {
        let repositories = Repositories::in_memory();
        let customer = Customer::active("Acme");
        repositories.customers.save(customer.clone()).await.expect("customer");
        if let Some(rules) = rules {
            repositories
                .rate_cards
                .insert(RateCard {
                    id: RateCardId::new(),
                    customer_id: customer.id,
                    name: "Standard".to_string(),
                    version: 1,
                    currency: "USD".to_string(),
                    active: true,
                    valid_from: None,
                    valid_to: None,
                    rules: rules.into_iter().map(NewRateCardRule::into_rule).collect(),
                    created_at: Utc::now(),
                })
                .await
                .expect("card");
        }
        (TransactionLedger::new(repositories, Arc::new(TieredPricingEngine)), customer)
    }

    fn entry(
        customer_id: CustomerId,
        source: TransactionSource,
        quantity: i64,
    ) -> TransactionEntry {
        TransactionEntry {
            customer_id,
            source,
            reference: "RCV-0042".to_string(),
            quantity: Decimal::from(quantity),
            unit: "unit".to_string(),
            description: None,
            occurred_at: Some(Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn record_prices_with_the_active_card() {
        let (ledger, customer) = ledger(Some(vec![NewRateCardRule::new(
            ServiceType::Receiving,
            "unit",
            Decimal::new(50, 2),
        )]))
        .await;

        let recorded = ledger
            .record(entry(customer.id, TransactionSource::Receipt, 40))
            .await
            .expect("record");

        assert_eq!(recorded.service_type, ServiceType::Receiving);
        assert_eq!(recorded.description, "Receiving - RCV-0042");
        assert_eq!(recorded.rate, Decimal::new(50, 2));
        assert_eq!(recorded.amount, Decimal::new(20, 0));
        assert!(recorded.is_billable());
    }

    #[tokio::test]
    async fn record_without_card_or_tier_is_zero() {
        let (without_card, customer) = ledger(None).await;
        let zero = without_card
            .record(entry(customer.id, TransactionSource::Picking, 5))
            .await
            .expect("record");
        assert_eq!((zero.rate, zero.amount), (Decimal::ZERO, Decimal::ZERO));

        let (no_tier, customer) = ledger(Some(vec![NewRateCardRule::new(
            ServiceType::Picking,
            "unit",
            Decimal::ONE,
        )
        .tier(Decimal::ZERO, Some(Decimal::new(10, 0)))]))
        .await;
        let missed = no_tier
            .record(entry(customer.id, TransactionSource::Picking, 50))
            .await
            .expect("record");
        assert_eq!(missed.amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn query_is_inclusive_and_rejects_inverted_windows() {
        let (ledger, customer) = ledger(None).await;
        let recorded =
            ledger.record(entry(customer.id, TransactionSource::Packing, 1)).await.expect("record");

        let at = recorded.occurred_at;
        let found = ledger.query(&customer.id, at, at).await.expect("query");
        assert_eq!(found.len(), 1);

        let error = ledger
            .query(&customer.id, at, at - Duration::seconds(1))
            .await
            .expect_err("inverted window");
        assert!(matches!(error, BillingError::Validation(_)));
    }

    #[tokio::test]
    async fn record_validates_input_and_customer() {
        let (ledger, customer) = ledger(None).await;
        let negative = ledger.record(entry(customer.id, TransactionSource::Storage, -1)).await;
        assert!(matches!(negative, Err(BillingError::Validation(_))));

        let unknown = ledger.record(entry(CustomerId::new(), TransactionSource::Storage, 1)).await;
        assert!(matches!(unknown, Err(BillingError::NotFound { .. })));
    }
}
