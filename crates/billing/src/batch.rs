use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use depot_core::domain::customer::{Customer, CustomerId};
use depot_core::domain::invoice::{BillingOptions, InvoiceId, InvoiceNumber};
use depot_core::domain::service::ServiceType;
use depot_core::errors::BillingError;
use depot_core::money::round_money;
use depot_core::period::BillingPeriod;
use depot_db::Repositories;

use crate::invoices::InvoiceGenerator;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerOutcome {
    Invoiced,
    NoActivity,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerBillingResult {
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub outcome: CustomerOutcome,
    pub invoice_id: Option<InvoiceId>,
    pub invoice_number: Option<InvoiceNumber>,
    pub amount: Decimal,
    pub transactions: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub kind: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub period: BillingPeriod,
    pub total_customers: usize,
    pub total_invoices: usize,
    pub total_amount: Decimal,
    pub results: Vec<CustomerBillingResult>,
    pub errors: Vec<BatchError>,
}

impl BatchResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerUnbilledSummary {
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub transaction_count: usize,
    pub total_amount: Decimal,
    pub by_service: BTreeMap<ServiceType, Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingSummary {
    pub period: BillingPeriod,
    pub total_transactions: usize,
    pub total_amount: Decimal,
    pub customers: Vec<CustomerUnbilledSummary>,
}

/// Monthly sweep over all active customers.
#[derive(Clone)]
pub struct BatchBillingRunner {
    repositories: Repositories,
    generator: InvoiceGenerator,
    options: BillingOptions,
}

impl BatchBillingRunner {
    pub fn new(
        repositories: Repositories,
        generator: InvoiceGenerator,
        options: BillingOptions,
    ) -> Self {
        Self { repositories, generator, options }
    }

    /// Customers run one after another; a failure is recorded and the sweep continues.
    pub async fn run_monthly_billing(&self, period: &str) -> Result<BatchResult, BillingError> {
        let period: BillingPeriod = period.parse()?;
        let (from, to) = period.bounds();
        let customers = self.repositories.customers.list_active().await?;

        info!(
            event_name = "billing.batch.started",
            period = %period,
            customers = customers.len(),
            "monthly billing run started"
        );

        let mut results = Vec::with_capacity(customers.len());
        let mut errors = Vec::new();
        for customer in &customers {
            match self.generator.generate(&customer.id, from, to, &self.options).await {
                Ok(invoice) => results.push(CustomerBillingResult {
                    customer_id: customer.id,
                    customer_name: customer.name.clone(),
                    outcome: CustomerOutcome::Invoiced,
                    invoice_id: Some(invoice.id),
                    invoice_number: Some(invoice.number),
                    amount: invoice.total,
                    transactions: invoice.lines.len(),
                }),
                Err(BillingError::NoBillableActivity { .. }) => {
                    results.push(idle(customer, CustomerOutcome::NoActivity));
                }
                Err(error) => {
                    warn!(
                        event_name = "billing.batch.customer_failed",
                        period = %period,
                        customer_id = %customer.id,
                        error_kind = error.kind(),
                        error = %error,
                        "customer billing failed"
                    );
                    results.push(idle(customer, CustomerOutcome::Failed));
                    errors.push(BatchError {
                        customer_id: customer.id,
                        customer_name: customer.name.clone(),
                        kind: error.kind().to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }

        let invoiced = results.iter().filter(|result| result.outcome == CustomerOutcome::Invoiced);
        let total_invoices = invoiced.clone().count();
        let total_amount = round_money(invoiced.map(|result| result.amount).sum());

        info!(
            event_name = "billing.batch.completed",
            period = %period,
            total_customers = customers.len(),
            total_invoices,
            total_amount = %total_amount,
            failures = errors.len(),
            "monthly billing run completed"
        );

        Ok(BatchResult {
            period,
            total_customers: customers.len(),
            total_invoices,
            total_amount,
            results,
            errors,
        })
    }

    /// Read-only view of what a run over `period` would consume.
    pub async fn billing_summary(&self, period: &str) -> Result<BillingSummary, BillingError> {
        let period: BillingPeriod = period.parse()?;
        let (from, to) = period.bounds();
        let entries = self.repositories.transactions.list_unbilled_in_window(from, to).await?;

        let mut grouped: HashMap<CustomerId, CustomerUnbilledSummary> = HashMap::new();
        for entry in &entries {
            let summary = grouped.entry(entry.customer_id).or_insert_with(|| {
                CustomerUnbilledSummary {
                    customer_id: entry.customer_id,
                    customer_name: String::new(),
                    transaction_count: 0,
                    total_amount: Decimal::ZERO,
                    by_service: BTreeMap::new(),
                }
            });
            summary.transaction_count += 1;
            summary.total_amount += entry.amount;
            *summary.by_service.entry(entry.service_type).or_insert(Decimal::ZERO) += entry.amount;
        }

        let mut customers = Vec::with_capacity(grouped.len());
        for (customer_id, mut summary) in grouped {
            let customer = self.repositories.customers.find_by_id(&customer_id).await?;
            summary.customer_name = match customer {
                Some(customer) => customer.name,
                None => customer_id.to_string(),
            };
            customers.push(summary);
        }
        customers.sort_by(|left, right| {
            left.customer_name
                .cmp(&right.customer_name)
                .then(left.customer_id.cmp(&right.customer_id))
        });

        Ok(BillingSummary {
            period,
            total_transactions: entries.len(),
            total_amount: round_money(entries.iter().map(|entry| entry.amount).sum()),
            customers,
        })
    }
}

fn idle(customer: &Customer, outcome: CustomerOutcome) -> CustomerBillingResult {
    CustomerBillingResult {
        customer_id: customer.id,
        customer_name: customer.name.clone(),
        outcome,
        invoice_id: None,
        invoice_number: None,
        amount: Decimal::ZERO,
        transactions: 0,
    }
}
