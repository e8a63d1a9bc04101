use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use depot_core::domain::customer::{Customer, CustomerId};
use depot_core::domain::invoice::{Invoice, InvoiceDraft, InvoiceId, InvoiceStatus};
use depot_core::domain::order::{Order, OrderId};
use depot_core::domain::payment::{Payment, PaymentId};
use depot_core::domain::rate_card::{RateCard, RateCardId, RateCardRule, RateCardRuleId};
use depot_core::domain::transaction::{TransactionId, UnbilledTransaction};
use depot_core::errors::BillingError;

use crate::DbPool;

mod codec;
pub mod customer;
pub mod invoice;
pub mod memory;
pub mod order;
pub mod payment;
pub mod rate_card;
pub mod transaction;

pub use customer::SqlCustomerRepository;
pub use invoice::SqlInvoiceRepository;
pub use memory::InMemoryBillingStore;
pub use order::SqlOrderRepository;
pub use payment::SqlPaymentRepository;
pub use rate_card::SqlRateCardRepository;
pub use transaction::SqlTransactionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: String },
}

impl From<RepositoryError> for BillingError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(message) => BillingError::Conflict(message),
            RepositoryError::NotFound { entity, id } => BillingError::NotFound { entity, id },
            other => BillingError::Persistence(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError>;
    /// Active customers ordered by name.
    async fn list_active(&self) -> Result<Vec<Customer>, RepositoryError>;
    async fn save(&self, customer: Customer) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    async fn save(&self, order: Order) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RateCardRepository: Send + Sync {
    async fn find_by_id(&self, id: &RateCardId) -> Result<Option<RateCard>, RepositoryError>;
    /// All cards of a customer, ordered by version ascending.
    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<RateCard>, RepositoryError>;
    async fn find_active(&self, customer_id: &CustomerId)
        -> Result<Option<RateCard>, RepositoryError>;
    /// `Conflict` when the `(customer, version)` pair is taken.
    async fn insert(&self, card: RateCard) -> Result<(), RepositoryError>;
    async fn append_rule(
        &self,
        card_id: &RateCardId,
        rule: RateCardRule,
    ) -> Result<(), RepositoryError>;
    /// Returns `false` when the rule does not belong to the card.
    async fn deactivate_rule(
        &self,
        card_id: &RateCardId,
        rule_id: &RateCardRuleId,
    ) -> Result<bool, RepositoryError>;
    /// `Conflict` when activation would leave two active cards for one customer.
    async fn set_active(&self, card_id: &RateCardId, active: bool) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, transaction: UnbilledTransaction) -> Result<(), RepositoryError>;
    async fn find_by_id(
        &self,
        id: &TransactionId,
    ) -> Result<Option<UnbilledTransaction>, RepositoryError>;
    /// Unbilled entries of one customer in the inclusive window, oldest first.
    async fn list_unbilled(
        &self,
        customer_id: &CustomerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UnbilledTransaction>, RepositoryError>;
    /// Unbilled entries of every customer in the inclusive window, oldest first.
    async fn list_unbilled_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UnbilledTransaction>, RepositoryError>;
    async fn list_for_invoice(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<Vec<UnbilledTransaction>, RepositoryError>;
    /// All-or-nothing claim; `Conflict` if any id is missing or already billed.
    async fn mark_billed(
        &self,
        ids: &[TransactionId],
        invoice_id: &InvoiceId,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Assigns the next number for the draft's issue month, persists invoice and lines and
    /// claims `claimed` for it, in one unit. `Conflict` leaves nothing behind.
    async fn create_invoice(
        &self,
        draft: InvoiceDraft,
        claimed: &[TransactionId],
    ) -> Result<Invoice, RepositoryError>;
    /// Invoice with lines and payments populated.
    async fn find_by_id(&self, id: &InvoiceId) -> Result<Option<Invoice>, RepositoryError>;
    async fn find_by_order(&self, order_id: &OrderId) -> Result<Option<Invoice>, RepositoryError>;
    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Invoice>, RepositoryError>;
    /// Compare-and-swap on status.
    async fn update_status(
        &self,
        id: &InvoiceId,
        expected: InvoiceStatus,
        next: InvoiceStatus,
    ) -> Result<(), RepositoryError>;
    /// Cancels an unpaid invoice in `expected` status and re-opens its transactions.
    /// Returns the number of re-opened transactions.
    async fn cancel(&self, id: &InvoiceId, expected: InvoiceStatus)
        -> Result<u64, RepositoryError>;
}

/// Invoice-side effect of recording a payment, checked against the stored paid amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaymentEffect {
    pub expected_paid: Decimal,
    pub new_paid: Decimal,
    pub new_status: InvoiceStatus,
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn find_by_id(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError>;
    /// Ordered by `paid_at` ascending.
    async fn list_for_invoice(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<Vec<Payment>, RepositoryError>;
    /// Inserts the payment and applies `effect` atomically; `Conflict` if the invoice's
    /// paid amount moved since it was read.
    async fn record(&self, payment: Payment, effect: PaymentEffect) -> Result<(), RepositoryError>;
}

/// Trait objects for every billing store, sharing one backend.
#[derive(Clone)]
pub struct Repositories {
    pub customers: Arc<dyn CustomerRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub rate_cards: Arc<dyn RateCardRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub invoices: Arc<dyn InvoiceRepository>,
    pub payments: Arc<dyn PaymentRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            customers: Arc::new(SqlCustomerRepository::new(pool.clone())),
            orders: Arc::new(SqlOrderRepository::new(pool.clone())),
            rate_cards: Arc::new(SqlRateCardRepository::new(pool.clone())),
            transactions: Arc::new(SqlTransactionRepository::new(pool.clone())),
            invoices: Arc::new(SqlInvoiceRepository::new(pool.clone())),
            payments: Arc::new(SqlPaymentRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryBillingStore::default()))
    }

    pub fn from_store(store: Arc<InMemoryBillingStore>) -> Self {
        Self {
            customers: store.clone(),
            orders: store.clone(),
            rate_cards: store.clone(),
            transactions: store.clone(),
            invoices: store.clone(),
            payments: store,
        }
    }
}
