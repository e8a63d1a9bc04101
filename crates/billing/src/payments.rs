use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use depot_core::domain::invoice::{Invoice, InvoiceId, InvoiceStatus};
use depot_core::domain::payment::{NewPayment, Payment, PaymentId};
use depot_core::errors::BillingError;
use depot_core::money::round_money;
use depot_db::repositories::PaymentEffect;
use depot_db::Repositories;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund: Payment,
    pub invoice_status: InvoiceStatus,
    pub message: String,
}

/// Payments and refunds against invoices. The invoice's paid amount and status move
/// together with each inserted record.
#[derive(Clone)]
pub struct PaymentLedger {
    repositories: Repositories,
}

impl PaymentLedger {
    pub fn new(repositories: Repositories) -> Self {
        Self { repositories }
    }

    async fn invoice(&self, invoice_id: &InvoiceId) -> Result<Invoice, BillingError> {
        self.repositories
            .invoices
            .find_by_id(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("invoice", invoice_id))
    }

    pub async fn create(
        &self,
        invoice_id: &InvoiceId,
        payment: NewPayment,
    ) -> Result<Payment, BillingError> {
        let amount = round_money(payment.amount);
        if amount <= Decimal::ZERO {
            return Err(BillingError::Validation(format!(
                "payment amount must be positive, got {}",
                payment.amount
            )));
        }
        if payment.method.trim().is_empty() {
            return Err(BillingError::Validation("payment method must not be empty".to_string()));
        }

        let invoice = self.invoice(invoice_id).await?;
        if invoice.status == InvoiceStatus::Cancelled {
            return Err(BillingError::DomainViolation(format!(
                "invoice {} is cancelled and cannot take payments",
                invoice.number
            )));
        }

        let remaining = invoice.remaining_balance();
        if amount > remaining {
            warn!(
                event_name = "billing.payment.rejected",
                invoice_id = %invoice.id,
                amount = %amount,
                remaining = %remaining,
                "payment exceeds remaining balance"
            );
            return Err(BillingError::DomainViolation(format!(
                "payment {amount} exceeds remaining balance {remaining} on invoice {}",
                invoice.number
            )));
        }

        let new_paid = invoice.amount_paid + amount;
        let new_status = invoice.status.after_payment(invoice.total, new_paid);
        let recorded = Payment {
            id: PaymentId::new(),
            invoice_id: invoice.id,
            method: payment.method.trim().to_string(),
            amount,
            reference: payment.reference,
            notes: payment.notes,
            paid_at: payment.paid_at.unwrap_or_else(Utc::now),
            refund_of: None,
        };
        self.repositories
            .payments
            .record(
                recorded.clone(),
                PaymentEffect { expected_paid: invoice.amount_paid, new_paid, new_status },
            )
            .await?;

        info!(
            event_name = "billing.payment.recorded",
            invoice_id = %invoice.id,
            payment_id = %recorded.id,
            amount = %amount,
            status = %new_status,
            "payment recorded"
        );
        Ok(recorded)
    }

    pub async fn refund(
        &self,
        payment_id: &PaymentId,
        amount: Decimal,
        reason: impl Into<String>,
    ) -> Result<RefundReceipt, BillingError> {
        let amount = round_money(amount);
        if amount <= Decimal::ZERO {
            return Err(BillingError::Validation(format!(
                "refund amount must be positive, got {amount}"
            )));
        }

        let original = self
            .repositories
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| BillingError::not_found("payment", payment_id))?;
        if original.is_refund() {
            return Err(BillingError::DomainViolation(format!(
                "payment {} is itself a refund",
                original.id
            )));
        }
        if amount > original.amount {
            return Err(BillingError::DomainViolation(format!(
                "refund {amount} exceeds original payment {}",
                original.amount
            )));
        }

        let invoice = self.invoice(&original.invoice_id).await?;
        let already_refunded: Decimal = invoice
            .payments
            .iter()
            .filter(|payment| payment.refund_of == Some(original.id))
            .map(|payment| payment.amount.abs())
            .sum();
        if already_refunded + amount > original.amount {
            return Err(BillingError::DomainViolation(format!(
                "refund {amount} plus prior refunds {already_refunded} exceeds original payment {}",
                original.amount
            )));
        }

        let new_paid = invoice.amount_paid - amount;
        let new_status = invoice.status.after_refund(invoice.total, new_paid);
        let refund = Payment {
            id: PaymentId::new(),
            invoice_id: invoice.id,
            method: original.refund_method(),
            amount: -amount,
            reference: original.reference.clone(),
            notes: Some(reason.into()),
            paid_at: Utc::now(),
            refund_of: Some(original.id),
        };
        self.repositories
            .payments
            .record(
                refund.clone(),
                PaymentEffect { expected_paid: invoice.amount_paid, new_paid, new_status },
            )
            .await?;

        info!(
            event_name = "billing.payment.refunded",
            invoice_id = %invoice.id,
            payment_id = %original.id,
            refund_id = %refund.id,
            amount = %amount,
            status = %new_status,
            "refund recorded"
        );
        Ok(RefundReceipt {
            message: format!(
                "Refunded {amount} of payment {} on invoice {}; invoice is now {new_status}",
                original.id, invoice.number
            ),
            refund,
            invoice_status: new_status,
        })
    }

    /// Payments and refunds of an invoice, oldest first.
    pub async fn payments_for(&self, invoice_id: &InvoiceId) -> Result<Vec<Payment>, BillingError> {
        self.invoice(invoice_id).await?;
        Ok(self.repositories.payments.list_for_invoice(invoice_id).await?)
    }
}
