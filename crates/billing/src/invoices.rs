use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use depot_core::domain::customer::CustomerId;
use depot_core::domain::invoice::{
    BillingOptions, Invoice, InvoiceDraft, InvoiceId, InvoiceLine, InvoiceStatus, InvoiceTotals,
};
use depot_core::domain::order::{OrderId, OrderStatus};
use depot_core::domain::service::ServiceType;
use depot_core::domain::transaction::TransactionId;
use depot_core::errors::BillingError;
use depot_core::money::round_money;
use depot_core::pricing::PricingEngine;
use depot_db::Repositories;

use crate::rate_cards::active_card;

/// Services priced for every line of a purchase-for-client order.
pub const PURCHASE_SERVICES: [ServiceType; 4] =
    [ServiceType::Storage, ServiceType::Picking, ServiceType::Packing, ServiceType::Delivery];

/// Outcome of pricing one service for one order line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ServiceCharge {
    Priced { line_position: u32, service_type: ServiceType, amount: Decimal },
    Skipped { order_line: String, service_type: ServiceType, reason: String },
}

impl ServiceCharge {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseInvoice {
    pub invoice: Invoice,
    pub charges: Vec<ServiceCharge>,
}

fn service_label(service_type: ServiceType) -> &'static str {
    match service_type {
        ServiceType::Receiving => "Receiving",
        ServiceType::Storage => "Storage",
        ServiceType::Picking => "Picking",
        ServiceType::Packing => "Packing",
        ServiceType::Delivery => "Delivery",
        ServiceType::Handling => "Handling",
        ServiceType::Adjustment => "Adjustment",
        ServiceType::Sale => "Sale",
    }
}

#[derive(Clone)]
pub struct InvoiceGenerator {
    repositories: Repositories,
    engine: Arc<dyn PricingEngine>,
    purchase_vat_percent: Decimal,
}

impl InvoiceGenerator {
    pub fn new(
        repositories: Repositories,
        engine: Arc<dyn PricingEngine>,
        purchase_vat_percent: Decimal,
    ) -> Self {
        Self { repositories, engine, purchase_vat_percent }
    }

    /// Invoices every unbilled transaction of the customer in `[from, to]`.
    ///
    /// The invoice, its lines and the claim on the consumed transactions are persisted as
    /// one unit; a concurrent generation over the same entries fails with `Conflict`.
    pub async fn generate(
        &self,
        customer_id: &CustomerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        options: &BillingOptions,
    ) -> Result<Invoice, BillingError> {
        if from > to {
            return Err(BillingError::Validation(format!(
                "period_from {from} is after period_to {to}"
            )));
        }
        options.validate()?;

        self.repositories
            .customers
            .find_by_id(customer_id)
            .await?
            .ok_or_else(|| BillingError::not_found("customer", customer_id))?;

        let transactions =
            self.repositories.transactions.list_unbilled(customer_id, from, to).await?;
        if transactions.is_empty() {
            return Err(BillingError::NoBillableActivity { customer_id: *customer_id, from, to });
        }

        let issued_at = Utc::now();
        let card = active_card(&self.repositories, customer_id, issued_at).await?;

        let mut lines = Vec::with_capacity(transactions.len());
        for (index, transaction) in transactions.iter().enumerate() {
            let repriced = card.as_ref().and_then(|card| {
                self.engine
                    .price(card, transaction.service_type, transaction.quantity, &transaction.unit)
                    .ok()
            });
            let (rate, amount) = match repriced {
                Some(priced) => (priced.unit_price(), priced.final_price),
                None => (transaction.rate, transaction.amount),
            };
            lines.push(InvoiceLine::priced(
                position(index),
                transaction.description.clone(),
                transaction.service_type,
                transaction.quantity,
                transaction.unit.clone(),
                rate,
                amount,
                options.tax_rate_percent,
            ));
        }

        let totals = InvoiceTotals::from_lines(&lines, options.tax_rate_percent);
        let claimed: Vec<TransactionId> = transactions.iter().map(|entry| entry.id).collect();
        let draft = InvoiceDraft {
            id: InvoiceId::new(),
            customer_id: *customer_id,
            order_id: None,
            period_from: Some(from),
            period_to: Some(to),
            currency: options.currency.clone(),
            status: InvoiceStatus::Open,
            totals,
            issued_at,
            lines,
        };

        let invoice = self.repositories.invoices.create_invoice(draft, &claimed).await?;
        info!(
            event_name = "billing.invoice.generated",
            customer_id = %customer_id,
            invoice_id = %invoice.id,
            invoice_number = %invoice.number,
            lines = invoice.lines.len(),
            total = %invoice.total,
            "invoice generated"
        );
        Ok(invoice)
    }

    /// Combined sale and service invoice for a delivered purchase-for-client order.
    pub async fn generate_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<PurchaseInvoice, BillingError> {
        let order = self
            .repositories
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| BillingError::not_found("order", order_id))?;

        if !order.is_purchase_for_client() {
            return Err(BillingError::DomainViolation(format!(
                "order {} is {}, not PURCHASE_FOR_CLIENT",
                order.reference,
                order.owner_type_effective.as_str()
            )));
        }
        if order.status != OrderStatus::Delivered {
            return Err(BillingError::DomainViolation(format!(
                "order {} is {}, invoicing requires DELIVERED",
                order.reference,
                order.status.as_str()
            )));
        }
        if let Some(existing) = self.repositories.invoices.find_by_order(order_id).await? {
            return Err(BillingError::DomainViolation(format!(
                "order {} is already invoiced as {}",
                order.reference, existing.number
            )));
        }

        let issued_at = Utc::now();
        let card = active_card(&self.repositories, &order.customer_id, issued_at)
            .await?
            .ok_or_else(|| BillingError::not_found("active rate card", order.customer_id))?;

        let vat = self.purchase_vat_percent;
        let mut lines: Vec<InvoiceLine> = Vec::new();
        let mut charges = Vec::new();

        for order_line in &order.lines {
            if let Some(unit_price) = order_line.sale_price() {
                let line = InvoiceLine::priced(
                    position(lines.len()),
                    order_line.description.clone(),
                    ServiceType::Sale,
                    order_line.quantity,
                    order_line.unit.clone(),
                    unit_price,
                    order_line.quantity * unit_price,
                    vat,
                );
                charges.push(ServiceCharge::Priced {
                    line_position: line.position,
                    service_type: ServiceType::Sale,
                    amount: line.amount,
                });
                lines.push(line);
            }

            for service_type in PURCHASE_SERVICES {
                let skipped = |reason: String| ServiceCharge::Skipped {
                    order_line: order_line.description.clone(),
                    service_type,
                    reason,
                };
                match self.engine.price(&card, service_type, order_line.quantity, &order_line.unit)
                {
                    Ok(priced) if round_money(priced.final_price) > Decimal::ZERO => {
                        let line = InvoiceLine::priced(
                            position(lines.len()),
                            format!("{} - {}", service_label(service_type), order_line.description),
                            service_type,
                            order_line.quantity,
                            order_line.unit.clone(),
                            priced.unit_price(),
                            priced.final_price,
                            vat,
                        );
                        charges.push(ServiceCharge::Priced {
                            line_position: line.position,
                            service_type,
                            amount: line.amount,
                        });
                        lines.push(line);
                    }
                    Ok(_) => charges.push(skipped("zero price".to_string())),
                    Err(error) => {
                        debug!(
                            event_name = "billing.invoice.service_skipped",
                            order_id = %order.id,
                            service_type = %service_type,
                            reason = %error,
                            "service not priced for order line"
                        );
                        charges.push(skipped(error.to_string()));
                    }
                }
            }
        }

        if lines.is_empty() {
            return Err(BillingError::DomainViolation(format!(
                "order {} has no billable sale or service lines",
                order.reference
            )));
        }

        let totals = InvoiceTotals::from_lines(&lines, vat);
        let draft = InvoiceDraft {
            id: InvoiceId::new(),
            customer_id: order.customer_id,
            order_id: Some(order.id),
            period_from: None,
            period_to: None,
            currency: card.currency.clone(),
            status: InvoiceStatus::Final,
            totals,
            issued_at,
            lines,
        };
        let invoice = self.repositories.invoices.create_invoice(draft, &[]).await?;

        let skipped = charges.iter().filter(|charge| charge.is_skipped()).count();
        info!(
            event_name = "billing.invoice.purchase_generated",
            order_id = %order.id,
            customer_id = %order.customer_id,
            invoice_id = %invoice.id,
            invoice_number = %invoice.number,
            skipped_services = skipped,
            total = %invoice.total,
            "purchase-for-client invoice generated"
        );
        Ok(PurchaseInvoice { invoice, charges })
    }

    pub async fn get(&self, invoice_id: &InvoiceId) -> Result<Invoice, BillingError> {
        self.repositories
            .invoices
            .find_by_id(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("invoice", invoice_id))
    }

    pub async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Invoice>, BillingError> {
        Ok(self.repositories.invoices.list_for_customer(customer_id).await?)
    }

    /// OPEN -> FINAL.
    pub async fn finalize(&self, invoice_id: &InvoiceId) -> Result<Invoice, BillingError> {
        let mut invoice = self.get(invoice_id).await?;
        if invoice.status != InvoiceStatus::Open {
            return Err(BillingError::DomainViolation(format!(
                "invoice {} is {}; only OPEN invoices can be finalized",
                invoice.number, invoice.status
            )));
        }

        self.repositories
            .invoices
            .update_status(invoice_id, InvoiceStatus::Open, InvoiceStatus::Final)
            .await?;
        invoice.transition_to(InvoiceStatus::Final)?;
        info!(
            event_name = "billing.invoice.finalized",
            invoice_id = %invoice.id,
            invoice_number = %invoice.number,
            "invoice finalized"
        );
        Ok(invoice)
    }

    /// Cancels an invoice without net payments and re-opens its transactions.
    pub async fn cancel(&self, invoice_id: &InvoiceId) -> Result<Invoice, BillingError> {
        let mut invoice = self.get(invoice_id).await?;
        if !invoice.amount_paid.is_zero() {
            return Err(BillingError::DomainViolation(format!(
                "invoice {} has {} paid; refund before cancelling",
                invoice.number, invoice.amount_paid
            )));
        }
        let expected = invoice.status;
        invoice.transition_to(InvoiceStatus::Cancelled)?;

        let reopened = self.repositories.invoices.cancel(invoice_id, expected).await?;
        if reopened == 0 && invoice.order_id.is_none() {
            warn!(
                event_name = "billing.invoice.cancel_without_transactions",
                invoice_id = %invoice.id,
                "cancelled invoice had no claimed transactions"
            );
        }
        info!(
            event_name = "billing.invoice.cancelled",
            invoice_id = %invoice.id,
            invoice_number = %invoice.number,
            reopened_transactions = reopened,
            "invoice cancelled"
        );
        Ok(invoice)
    }
}

fn position(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1)
}
