use tracing::{debug, error, warn};

use depot_core::domain::order::OrderId;
use depot_core::errors::BillingError;
use depot_db::Repositories;

use crate::invoices::{InvoiceGenerator, PurchaseInvoice};

/// Entry point for the delivery-tracking collaborator. Never fails the caller: billing
/// problems are logged and reported as `None`.
#[derive(Clone)]
pub struct DeliveryHook {
    repositories: Repositories,
    generator: InvoiceGenerator,
}

impl DeliveryHook {
    pub fn new(repositories: Repositories, generator: InvoiceGenerator) -> Self {
        Self { repositories, generator }
    }

    pub async fn on_delivery_completed(&self, order_id: &OrderId) -> Option<PurchaseInvoice> {
        let order = match self.repositories.orders.find_by_id(order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(
                    event_name = "billing.delivery.order_missing",
                    order_id = %order_id,
                    "delivered order not found"
                );
                return None;
            }
            Err(repository_error) => {
                error!(
                    event_name = "billing.delivery.lookup_failed",
                    order_id = %order_id,
                    error = %repository_error,
                    "could not load delivered order"
                );
                return None;
            }
        };

        if !order.is_purchase_for_client() {
            debug!(
                event_name = "billing.delivery.not_purchase_for_client",
                order_id = %order_id,
                "delivery does not trigger invoicing"
            );
            return None;
        }

        match self.generator.generate_for_order(order_id).await {
            Ok(purchase) => Some(purchase),
            Err(billing_error) => {
                let level_is_error = matches!(
                    billing_error,
                    BillingError::Persistence(_) | BillingError::Conflict(_)
                );
                if level_is_error {
                    error!(
                        event_name = "billing.delivery.invoice_failed",
                        order_id = %order_id,
                        error_kind = billing_error.kind(),
                        error = %billing_error,
                        "purchase-for-client invoicing failed"
                    );
                } else {
                    warn!(
                        event_name = "billing.delivery.invoice_failed",
                        order_id = %order_id,
                        error_kind = billing_error.kind(),
                        error = %billing_error,
                        "purchase-for-client invoicing rejected"
                    );
                }
                None
            }
        }
    }
}
