//! Billing services over the `depot-db` repositories: rate card registry, transaction
//! ledger, invoice generation, monthly batch runs and payment reconciliation.

use std::sync::Arc;

use depot_core::config::BillingConfig;
use depot_core::domain::invoice::BillingOptions;
use depot_core::pricing::{PricingEngine, TieredPricingEngine};
use depot_db::Repositories;

pub mod batch;
pub mod delivery;
pub mod invoices;
pub mod ledger;
pub mod payments;
pub mod rate_cards;

pub use batch::{BatchBillingRunner, BatchResult, BillingSummary, CustomerOutcome};
pub use delivery::DeliveryHook;
pub use invoices::{InvoiceGenerator, PurchaseInvoice, ServiceCharge};
pub use ledger::TransactionLedger;
pub use payments::{PaymentLedger, RefundReceipt};
pub use rate_cards::{NewRateCard, RateCardRegistry};

/// Every billing service wired to one repository set and one pricing engine.
#[derive(Clone)]
pub struct BillingServices {
    pub rate_cards: RateCardRegistry,
    pub ledger: TransactionLedger,
    pub invoices: InvoiceGenerator,
    pub delivery: DeliveryHook,
    pub batch: BatchBillingRunner,
    pub payments: PaymentLedger,
    options: BillingOptions,
}

impl BillingServices {
    pub fn new(repositories: Repositories, config: &BillingConfig) -> Self {
        Self::with_engine(repositories, config, Arc::new(TieredPricingEngine))
    }

    pub fn with_engine(
        repositories: Repositories,
        config: &BillingConfig,
        engine: Arc<dyn PricingEngine>,
    ) -> Self {
        let invoices = InvoiceGenerator::new(
            repositories.clone(),
            engine.clone(),
            config.purchase_vat_percent,
        );
        Self {
            rate_cards: RateCardRegistry::new(repositories.clone()),
            ledger: TransactionLedger::new(repositories.clone(), engine),
            delivery: DeliveryHook::new(repositories.clone(), invoices.clone()),
            batch: BatchBillingRunner::new(
                repositories.clone(),
                invoices.clone(),
                config.options(),
            ),
            payments: PaymentLedger::new(repositories),
            invoices,
            options: config.options(),
        }
    }

    /// Defaults for standard generation, taken from configuration.
    pub fn default_options(&self) -> &BillingOptions {
        &self.options
    }
}
