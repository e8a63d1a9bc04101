use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use depot_billing::{BillingServices, CustomerOutcome, NewRateCard};
use depot_core::config::AppConfig;
use depot_core::domain::customer::Customer;
use depot_core::domain::invoice::InvoiceStatus;
use depot_core::domain::order::{Order, OrderId, OrderLine, OrderStatus, OwnerType};
use depot_core::domain::payment::NewPayment;
use depot_core::domain::rate_card::NewRateCardRule;
use depot_core::domain::service::ServiceType;
use depot_core::domain::transaction::{
    TransactionEntry, TransactionId, TransactionSource, UnbilledTransaction,
};
use depot_core::errors::BillingError;
use depot_db::{connect_with_settings, migrations, DbPool, Repositories};

async fn sqlite_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    pool
}

async fn sqlite_repositories() -> Repositories {
    Repositories::sql(sqlite_pool().await)
}

/// A file database shared by several pooled connections, so writers really contend.
async fn shared_file_repositories(dir: &tempfile::TempDir) -> Repositories {
    let url = format!("sqlite://{}", dir.path().join("billing.db").display());
    let pool = connect_with_settings(&url, 4, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    Repositories::sql(pool)
}

fn in_march(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 10, 0, 0).unwrap()
}

fn entry(
    customer: &Customer,
    source: TransactionSource,
    reference: &str,
    quantity: i64,
    unit: &str,
    day: u32,
) -> TransactionEntry {
    TransactionEntry {
        customer_id: customer.id,
        source,
        reference: reference.to_string(),
        quantity: Decimal::from(quantity),
        unit: unit.to_string(),
        description: None,
        occurred_at: Some(in_march(day)),
    }
}

async fn onboard(services: &BillingServices, repositories: &Repositories, name: &str) -> Customer {
    let customer = Customer::active(name);
    repositories.customers.save(customer.clone()).await.expect("customer");
    let card = services
        .rate_cards
        .create(
            customer.id,
            NewRateCard {
                name: "Standard".to_string(),
                currency: "USD".to_string(),
                valid_from: None,
                valid_to: None,
                rules: vec![
                    NewRateCardRule::new(ServiceType::Receiving, "unit", Decimal::new(50, 2))
                        .minimum_fee(Decimal::new(25, 0)),
                    NewRateCardRule::new(ServiceType::Picking, "unit", Decimal::new(35, 2))
                        .tier(Decimal::ZERO, Some(Decimal::new(100, 0))),
                    NewRateCardRule::new(ServiceType::Picking, "unit", Decimal::new(25, 2))
                        .tier(Decimal::new(101, 0), None),
                    NewRateCardRule::new(ServiceType::Delivery, "kg", Decimal::new(1, 0)),
                ],
            },
        )
        .await
        .expect("rate card");
    services.rate_cards.activate(&card.id).await.expect("activate");
    customer
}

async fn full_cycle(repositories: Repositories) {
    let services = BillingServices::new(repositories.clone(), &AppConfig::default().billing);
    let acme = onboard(&services, &repositories, "Acme").await;
    let _idle = onboard(&services, &repositories, "Idle").await;

    services
        .ledger
        .record(entry(&acme, TransactionSource::Receipt, "RCV-1", 10, "unit", 2))
        .await
        .expect("receipt");
    services
        .ledger
        .record(entry(&acme, TransactionSource::Picking, "PCK-1", 200, "unit", 5))
        .await
        .expect("picking");

    let batch = services.batch.run_monthly_billing("2024-03").await.expect("batch");
    assert_eq!(batch.total_customers, 2);
    assert_eq!(batch.total_invoices, 1);
    assert!(batch.is_clean());
    // 10 receipts hit the 25.00 minimum, 200 picks use the second tier.
    assert_eq!(batch.total_amount, Decimal::new(75, 0));

    let invoiced = batch
        .results
        .iter()
        .find(|result| result.outcome == CustomerOutcome::Invoiced)
        .expect("invoiced customer");
    let invoice_id = invoiced.invoice_id.expect("invoice id");
    let invoice = services.invoices.get(&invoice_id).await.expect("get");
    assert_eq!(invoice.total, invoice.subtotal + invoice.tax);
    assert_eq!(invoice.lines.iter().map(|line| line.position).collect::<Vec<_>>(), vec![1, 2]);
    assert!(invoice.number.to_string().starts_with("INV-"));

    let summary = services.batch.billing_summary("2024-03").await.expect("summary");
    assert_eq!(summary.total_transactions, 0);

    let finalized = services.invoices.finalize(&invoice_id).await.expect("finalize");
    assert_eq!(finalized.status, InvoiceStatus::Final);

    let payment = services
        .payments
        .create(
            &invoice_id,
            NewPayment {
                method: "card".to_string(),
                amount: Decimal::new(75, 0),
                reference: None,
                notes: None,
                paid_at: None,
            },
        )
        .await
        .expect("payment");
    assert_eq!(services.invoices.get(&invoice_id).await.expect("get").status, InvoiceStatus::Paid);

    let cancel_paid = services.invoices.cancel(&invoice_id).await;
    assert!(matches!(cancel_paid, Err(BillingError::DomainViolation(_))));

    let receipt = services.payments.refund(&payment.id, Decimal::new(75, 0), "goodwill").await;
    assert_eq!(receipt.expect("refund").invoice_status, InvoiceStatus::Open);

    let cancelled = services.invoices.cancel(&invoice_id).await.expect("cancel");
    assert_eq!(cancelled.status, InvoiceStatus::Cancelled);
    let reopened = services.batch.billing_summary("2024-03").await.expect("summary");
    assert_eq!(reopened.total_transactions, 2);
    assert_eq!(reopened.total_amount, Decimal::new(75, 0));
}

#[tokio::test]
async fn full_cycle_in_memory() {
    full_cycle(Repositories::in_memory()).await;
}

#[tokio::test]
async fn full_cycle_sqlite() {
    full_cycle(sqlite_repositories().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn competing_generations_produce_one_invoice() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repositories = shared_file_repositories(&dir).await;
    let services = BillingServices::new(repositories.clone(), &AppConfig::default().billing);
    let acme = onboard(&services, &repositories, "Acme").await;
    services
        .ledger
        .record(entry(&acme, TransactionSource::Picking, "PCK-7", 5, "unit", 9))
        .await
        .expect("record");

    let (from, to) = (in_march(1), in_march(31));
    let options = services.default_options().clone();
    let (left, right) = {
        let (first, second) = (services.invoices.clone(), services.invoices.clone());
        let (first_options, second_options) = (options.clone(), options.clone());
        let customer_id = acme.id;
        tokio::join!(
            tokio::spawn(async move {
                first.generate(&customer_id, from, to, &first_options).await
            }),
            tokio::spawn(async move {
                second.generate(&customer_id, from, to, &second_options).await
            }),
        )
    };

    let outcomes = [left.expect("first task"), right.expect("second task")];
    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(outcomes.iter().filter_map(|outcome| outcome.as_ref().err()).all(|error| matches!(
        error,
        BillingError::Conflict(_) | BillingError::NoBillableActivity { .. }
    )));
    let invoices = repositories.invoices.list_for_customer(&acme.id).await.expect("list");
    assert_eq!(invoices.len(), 1);
}

#[tokio::test]
async fn delivery_of_purchase_order_invoices_once() {
    let repositories = sqlite_repositories().await;
    let services = BillingServices::new(repositories.clone(), &AppConfig::default().billing);
    let acme = onboard(&services, &repositories, "Acme").await;

    let order = Order {
        id: OrderId::new(),
        customer_id: acme.id,
        reference: "SO-1".to_string(),
        owner_type_effective: OwnerType::PurchaseForClient,
        status: OrderStatus::Delivered,
        lines: vec![OrderLine {
            description: "Pallet".to_string(),
            quantity: Decimal::new(20, 0),
            unit: "unit".to_string(),
            unit_sale_price: Some(Decimal::new(10, 0)),
        }],
        delivered_at: Some(in_march(20)),
    };
    repositories.orders.save(order.clone()).await.expect("order");

    let purchase = services.delivery.on_delivery_completed(&order.id).await.expect("invoice");
    // Sale 200.00 plus 20 picks at 0.35, VAT at the default 15%.
    assert_eq!(purchase.invoice.subtotal, Decimal::new(207, 0));
    assert_eq!(purchase.invoice.tax, Decimal::new(3105, 2));
    assert_eq!(purchase.invoice.status, InvoiceStatus::Final);
    assert!(purchase.charges.iter().any(|charge| charge.is_skipped()));

    assert!(services.delivery.on_delivery_completed(&order.id).await.is_none());
}

#[tokio::test]
async fn month_larger_than_sqlite_bind_limit_is_invoiced() {
    let repositories = sqlite_repositories().await;
    let services = BillingServices::new(repositories.clone(), &AppConfig::default().billing);
    let customer = Customer::active("Bulk Co");
    repositories.customers.save(customer.clone()).await.expect("customer");

    let count = 33_000;
    for index in 0..count {
        let occurred_at = in_march(1 + (index % 28) as u32);
        repositories
            .transactions
            .insert(UnbilledTransaction {
                id: TransactionId::new(),
                customer_id: customer.id,
                service_type: ServiceType::Picking,
                description: format!("Picking - PCK-{index}"),
                quantity: Decimal::ONE,
                unit: "unit".to_string(),
                rate: Decimal::ONE,
                amount: Decimal::ONE,
                reference: None,
                occurred_at,
                billed: false,
                invoice_id: None,
                created_at: occurred_at,
            })
            .await
            .expect("transaction");
    }

    let batch = services.batch.run_monthly_billing("2024-03").await.expect("batch");
    assert!(batch.is_clean(), "{:?}", batch.errors);
    assert_eq!(batch.total_invoices, 1);
    assert_eq!(batch.results[0].transactions, count);

    let summary = services.batch.billing_summary("2024-03").await.expect("summary");
    assert_eq!(summary.total_transactions, 0);
}

#[tokio::test]
async fn one_failing_customer_does_not_stop_the_sweep() {
    let pool = sqlite_pool().await;
    let repositories = Repositories::sql(pool.clone());
    let services = BillingServices::new(repositories.clone(), &AppConfig::default().billing);
    let broken = onboard(&services, &repositories, "Acme").await;
    let healthy = onboard(&services, &repositories, "Zenith").await;
    for customer in [&broken, &healthy] {
        services
            .ledger
            .record(entry(customer, TransactionSource::Picking, "PCK-1", 10, "unit", 4))
            .await
            .expect("record");
    }

    sqlx::query(&format!(
        "CREATE TRIGGER reject_invoice BEFORE INSERT ON invoice
         WHEN NEW.customer_id = '{}'
         BEGIN SELECT RAISE(ABORT, 'invoice storage unavailable'); END",
        broken.id
    ))
    .execute(&pool)
    .await
    .expect("trigger");

    let batch = services.batch.run_monthly_billing("2024-03").await.expect("batch");
    assert_eq!(batch.total_customers, 2);
    assert_eq!(batch.total_invoices, 1);
    assert!(!batch.is_clean());
    assert_eq!(batch.errors.len(), 1);
    assert_eq!(batch.errors[0].customer_id, broken.id);
    assert_eq!(batch.errors[0].kind, "persistence");

    let outcome_of = |customer: &Customer| {
        batch
            .results
            .iter()
            .find(|result| result.customer_id == customer.id)
            .map(|result| result.outcome)
    };
    assert_eq!(outcome_of(&broken), Some(CustomerOutcome::Failed));
    assert_eq!(outcome_of(&healthy), Some(CustomerOutcome::Invoiced));

    let summary = services.batch.billing_summary("2024-03").await.expect("summary");
    assert_eq!(summary.total_transactions, 1);
    assert_eq!(summary.customers[0].customer_id, broken.id);
}
