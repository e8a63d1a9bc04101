use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use depot_core::domain::customer::{Customer, CustomerId, CustomerStatus};
use depot_core::domain::rate_card::{NewRateCardRule, RateCard, RateCardId};
use depot_core::domain::service::ServiceType;
use depot_core::domain::transaction::{TransactionId, TransactionSource, UnbilledTransaction};
use depot_core::money::round_money;
use depot_core::period::BillingPeriod;
use depot_core::pricing::{calculate_price, UNIT_CUBIC_METRE};

use crate::repositories::{Repositories, RepositoryError};

/// Deterministic customers used by demos and end-to-end checks.
const DEMO_CUSTOMERS: &[DemoCustomer] = &[
    DemoCustomer {
        id: "6f1c2a53-0d6e-4b8a-9a51-3c2b1e0f7a01",
        name: "Acme Retail",
        status: CustomerStatus::Active,
        activity: &[
            (TransactionSource::Receipt, "RCV-1001", 40, "unit", 2),
            (TransactionSource::Storage, "STO-1001", 12, UNIT_CUBIC_METRE, 15),
            (TransactionSource::Picking, "PCK-1001", 150, "unit", 20),
        ],
    },
    DemoCustomer {
        id: "6f1c2a53-0d6e-4b8a-9a51-3c2b1e0f7a02",
        name: "Globex Foods",
        status: CustomerStatus::Active,
        activity: &[(TransactionSource::Packing, "PAK-2001", 30, "unit", 9)],
    },
    DemoCustomer {
        id: "6f1c2a53-0d6e-4b8a-9a51-3c2b1e0f7a03",
        name: "Initech Supplies",
        status: CustomerStatus::Active,
        activity: &[],
    },
    DemoCustomer {
        id: "6f1c2a53-0d6e-4b8a-9a51-3c2b1e0f7a04",
        name: "Umbrella Archive",
        status: CustomerStatus::Inactive,
        activity: &[],
    },
];

struct DemoCustomer {
    id: &'static str,
    name: &'static str,
    status: CustomerStatus,
    /// `(source, reference, quantity, unit, day of month)`
    activity: &'static [(TransactionSource, &'static str, i64, &'static str, i64)],
}

impl DemoCustomer {
    fn customer(&self) -> Result<Customer, RepositoryError> {
        let id = self
            .id
            .parse::<CustomerId>()
            .map_err(|error| RepositoryError::Decode(format!("demo customer id: {error}")))?;
        Ok(Customer { id, name: self.name.to_string(), status: self.status })
    }
}

fn standard_rules() -> Vec<NewRateCardRule> {
    vec![
        NewRateCardRule::new(ServiceType::Receiving, "unit", Decimal::new(50, 2))
            .minimum_fee(Decimal::new(25, 0)),
        NewRateCardRule::new(ServiceType::Storage, UNIT_CUBIC_METRE, Decimal::new(120, 2)),
        NewRateCardRule::new(ServiceType::Picking, "unit", Decimal::new(35, 2))
            .tier(Decimal::ZERO, Some(Decimal::new(100, 0))),
        NewRateCardRule::new(ServiceType::Picking, "unit", Decimal::new(25, 2))
            .tier(Decimal::new(101, 0), None),
        NewRateCardRule::new(ServiceType::Packing, "unit", Decimal::new(40, 2)),
    ]
}

pub struct DemoDataset;

impl DemoDataset {
    /// Seeds customers, one active rate card each for the active ones, and unbilled
    /// activity inside `period`. Repeated loads are no-ops for customers already present.
    pub async fn load(
        repositories: &Repositories,
        period: BillingPeriod,
    ) -> Result<SeedResult, RepositoryError> {
        let mut result = SeedResult::default();

        for demo in DEMO_CUSTOMERS {
            let customer = demo.customer()?;
            if repositories.customers.find_by_id(&customer.id).await?.is_some() {
                result.skipped.push(demo.name);
                continue;
            }
            repositories.customers.save(customer.clone()).await?;
            result.customers_seeded += 1;

            if !customer.is_active() {
                continue;
            }

            let card = RateCard {
                id: RateCardId::new(),
                customer_id: customer.id,
                name: "Standard".to_string(),
                version: 1,
                currency: "USD".to_string(),
                active: true,
                valid_from: None,
                valid_to: None,
                rules: standard_rules().into_iter().map(NewRateCardRule::into_rule).collect(),
                created_at: period.from(),
            };

            for (source, reference, quantity, unit, day) in demo.activity {
                let quantity = Decimal::from(*quantity);
                let service_type = source.service_type();
                let (rate, amount) = match calculate_price(&card, service_type, quantity, unit) {
                    Ok(priced) => (priced.unit_price(), priced.final_price),
                    Err(_) => (Decimal::ZERO, Decimal::ZERO),
                };
                let occurred_at = period.from() + Duration::days(day - 1) + Duration::hours(10);
                repositories
                    .transactions
                    .insert(UnbilledTransaction {
                        id: TransactionId::new(),
                        customer_id: customer.id,
                        service_type,
                        description: source.describe(reference),
                        quantity,
                        unit: (*unit).to_string(),
                        rate: round_money(rate),
                        amount: round_money(amount),
                        reference: Some((*reference).to_string()),
                        occurred_at,
                        billed: false,
                        invoice_id: None,
                        created_at: Utc::now(),
                    })
                    .await?;
                result.transactions_seeded += 1;
            }

            repositories.rate_cards.insert(card).await?;
            result.rate_cards_seeded += 1;
        }

        Ok(result)
    }

    pub async fn verify(
        repositories: &Repositories,
    ) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(DEMO_CUSTOMERS.len());
        for demo in DEMO_CUSTOMERS {
            let customer = demo.customer()?;
            let present = repositories.customers.find_by_id(&customer.id).await?.is_some();
            let card_ok = if customer.is_active() {
                repositories.rate_cards.find_active(&customer.id).await?.is_some()
            } else {
                true
            };
            checks.push((demo.name, present && card_ok));
        }

        Ok(VerificationResult { all_present: checks.iter().all(|(_, ok)| *ok), checks })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedResult {
    pub customers_seeded: usize,
    pub rate_cards_seeded: usize,
    pub transactions_seeded: usize,
    pub skipped: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use depot_core::period::BillingPeriod;

    use super::DemoDataset;
    use crate::repositories::Repositories;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn demo_dataset_loads_once_and_verifies() {
        let repositories = Repositories::in_memory();
        let period = BillingPeriod::from_str("2024-03").expect("period");

        let first = DemoDataset::load(&repositories, period).await.expect("load");
        assert_eq!(first.customers_seeded, 4);
        assert_eq!(first.rate_cards_seeded, 3);
        assert_eq!(first.transactions_seeded, 4);

        let second = DemoDataset::load(&repositories, period).await.expect("reload");
        assert_eq!(second.customers_seeded, 0);
        assert_eq!(second.skipped.len(), 4);

        let verification = DemoDataset::verify(&repositories).await.expect("verify");
        assert!(verification.all_present, "{:?}", verification.checks);
    }

    #[tokio::test]
    async fn demo_activity_is_priced_from_the_card() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repositories = Repositories::sql(pool);
        let period = BillingPeriod::from_str("2024-03").expect("period");
        DemoDataset::load(&repositories, period).await.expect("load");

        let entries = repositories
            .transactions
            .list_unbilled_in_window(period.from(), period.to())
            .await
            .expect("window");
        assert_eq!(entries.len(), 4);

        // 40 units at 0.50 is below the 25.00 receiving minimum.
        let receipt = entries.iter().find(|entry| entry.description == "Receiving - RCV-1001");
        assert_eq!(receipt.map(|entry| entry.amount), Some(Decimal::new(25, 0)));
        // 150 picks land in the second tier.
        let picking = entries.iter().find(|entry| entry.description == "Picking - PCK-1001");
        assert_eq!(picking.map(|entry| entry.rate), Some(Decimal::new(25, 2)));
        assert_eq!(picking.map(|entry| entry.amount), Some(Decimal::new(375, 1)));
    }
}
