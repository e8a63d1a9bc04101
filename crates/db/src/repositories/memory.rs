use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use tokio::sync::RwLock;

use depot_core::domain::customer::{Customer, CustomerId};
use depot_core::domain::invoice::{
    period_key, Invoice, InvoiceDraft, InvoiceId, InvoiceNumber, InvoiceStatus,
};
use depot_core::domain::order::{Order, OrderId};
use depot_core::domain::payment::{Payment, PaymentId};
use depot_core::domain::rate_card::{RateCard, RateCardId, RateCardRule, RateCardRuleId};
use depot_core::domain::transaction::{TransactionId, UnbilledTransaction};

use super::{
    CustomerRepository, InvoiceRepository, OrderRepository, PaymentEffect, PaymentRepository,
    RateCardRepository, RepositoryError, TransactionRepository,
};

#[derive(Default)]
struct State {
    customers: HashMap<CustomerId, Customer>,
    orders: HashMap<OrderId, Order>,
    rate_cards: HashMap<RateCardId, RateCard>,
    /// Insertion order doubles as the tie-breaker for equal `occurred_at`.
    transactions: Vec<UnbilledTransaction>,
    invoices: HashMap<InvoiceId, Invoice>,
    sequences: BTreeMap<u32, u32>,
    payments: Vec<Payment>,
}

impl State {
    fn hydrate(&self, invoice: &Invoice) -> Invoice {
        let mut invoice = invoice.clone();
        invoice.payments = self.payments_for(&invoice.id);
        invoice
    }

    fn payments_for(&self, invoice_id: &InvoiceId) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|payment| &payment.invoice_id == invoice_id)
            .cloned()
            .collect();
        payments.sort_by_key(|payment| payment.paid_at);
        payments
    }

    fn sorted_entries(
        &self,
        predicate: impl Fn(&UnbilledTransaction) -> bool,
    ) -> Vec<UnbilledTransaction> {
        let mut found: Vec<UnbilledTransaction> =
            self.transactions.iter().filter(|entry| predicate(entry)).cloned().collect();
        found.sort_by_key(|entry| entry.occurred_at);
        found
    }

    fn claim(
        &mut self,
        ids: &[TransactionId],
        invoice_id: &InvoiceId,
    ) -> Result<(), RepositoryError> {
        let claimable = ids
            .iter()
            .filter(|id| self.transactions.iter().any(|entry| &entry.id == *id && !entry.billed))
            .count();
        if claimable != ids.len() {
            return Err(RepositoryError::Conflict(format!(
                "claimed {claimable} of {} transactions for invoice {invoice_id}",
                ids.len()
            )));
        }

        for entry in self.transactions.iter_mut().filter(|entry| ids.contains(&entry.id)) {
            entry.billed = true;
            entry.invoice_id = Some(*invoice_id);
        }
        Ok(())
    }
}

/// Process-local store implementing every billing repository under one lock.
#[derive(Default)]
pub struct InMemoryBillingStore {
    state: RwLock<State>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CustomerRepository for InMemoryBillingStore {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        Ok(self.state.read().await.customers.get(id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Customer>, RepositoryError> {
        let state = self.state.read().await;
        let mut active: Vec<Customer> =
            state.customers.values().filter(|customer| customer.is_active()).cloned().collect();
        active.sort_by(|left, right| left.name.cmp(&right.name).then(left.id.cmp(&right.id)));
        Ok(active)
    }

    async fn save(&self, customer: Customer) -> Result<(), RepositoryError> {
        self.state.write().await.customers.insert(customer.id, customer);
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryBillingStore {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.state.read().await.orders.get(id).cloned())
    }

    async fn save(&self, order: Order) -> Result<(), RepositoryError> {
        self.state.write().await.orders.insert(order.id, order);
        Ok(())
    }
}

#[async_trait]
impl RateCardRepository for InMemoryBillingStore {
    async fn find_by_id(&self, id: &RateCardId) -> Result<Option<RateCard>, RepositoryError> {
        Ok(self.state.read().await.rate_cards.get(id).cloned())
    }

    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<RateCard>, RepositoryError> {
        let state = self.state.read().await;
        let mut cards: Vec<RateCard> = state
            .rate_cards
            .values()
            .filter(|card| &card.customer_id == customer_id)
            .cloned()
            .collect();
        cards.sort_by_key(|card| card.version);
        Ok(cards)
    }

    async fn find_active(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Option<RateCard>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .rate_cards
            .values()
            .find(|card| &card.customer_id == customer_id && card.active)
            .cloned())
    }

    async fn insert(&self, card: RateCard) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let clash = state.rate_cards.values().any(|existing| {
            existing.customer_id == card.customer_id
                && (existing.version == card.version || (card.active && existing.active))
        });
        if clash || state.rate_cards.contains_key(&card.id) {
            return Err(RepositoryError::Conflict(format!(
                "rate card version {} already exists or another card is active for customer {}",
                card.version, card.customer_id
            )));
        }
        state.rate_cards.insert(card.id, card);
        Ok(())
    }

    async fn append_rule(
        &self,
        card_id: &RateCardId,
        rule: RateCardRule,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let card = state
            .rate_cards
            .get_mut(card_id)
            .ok_or_else(|| missing_rate_card(card_id))?;
        card.rules.push(rule);
        Ok(())
    }

    async fn deactivate_rule(
        &self,
        card_id: &RateCardId,
        rule_id: &RateCardRuleId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let rule = state
            .rate_cards
            .get_mut(card_id)
            .and_then(|card| card.rules.iter_mut().find(|rule| &rule.id == rule_id));
        Ok(match rule {
            Some(rule) => {
                rule.active = false;
                true
            }
            None => false,
        })
    }

    async fn set_active(&self, card_id: &RateCardId, active: bool) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let customer_id = state
            .rate_cards
            .get(card_id)
            .map(|card| card.customer_id)
            .ok_or_else(|| missing_rate_card(card_id))?;

        if active
            && state
                .rate_cards
                .values()
                .any(|card| card.customer_id == customer_id && card.active && &card.id != card_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "customer {customer_id} already has an active rate card"
            )));
        }

        if let Some(card) = state.rate_cards.get_mut(card_id) {
            card.active = active;
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionRepository for InMemoryBillingStore {
    async fn insert(&self, transaction: UnbilledTransaction) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.transactions.iter().any(|entry| entry.id == transaction.id) {
            return Err(RepositoryError::Conflict(format!(
                "transaction {} already exists",
                transaction.id
            )));
        }
        state.transactions.push(transaction);
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &TransactionId,
    ) -> Result<Option<UnbilledTransaction>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.transactions.iter().find(|entry| &entry.id == id).cloned())
    }

    async fn list_unbilled(
        &self,
        customer_id: &CustomerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UnbilledTransaction>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.sorted_entries(|entry| {
            &entry.customer_id == customer_id
                && !entry.billed
                && entry.occurred_at >= from
                && entry.occurred_at <= to
        }))
    }

    async fn list_unbilled_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UnbilledTransaction>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.sorted_entries(|entry| {
            !entry.billed && entry.occurred_at >= from && entry.occurred_at <= to
        }))
    }

    async fn list_for_invoice(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<Vec<UnbilledTransaction>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.sorted_entries(|entry| entry.invoice_id.as_ref() == Some(invoice_id)))
    }

    async fn mark_billed(
        &self,
        ids: &[TransactionId],
        invoice_id: &InvoiceId,
    ) -> Result<(), RepositoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;
        if !state.invoices.contains_key(invoice_id) {
            return Err(RepositoryError::Conflict(format!("invoice {invoice_id} does not exist")));
        }
        state.claim(ids, invoice_id)
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryBillingStore {
    async fn create_invoice(
        &self,
        draft: InvoiceDraft,
        claimed: &[TransactionId],
    ) -> Result<Invoice, RepositoryError> {
        let mut state = self.state.write().await;

        if state.invoices.contains_key(&draft.id) {
            return Err(RepositoryError::Conflict(format!("invoice {} already exists", draft.id)));
        }
        if let Some(order_id) = draft.order_id {
            if state.invoices.values().any(|invoice| invoice.order_id == Some(order_id)) {
                return Err(RepositoryError::Conflict(format!(
                    "order {order_id} is already invoiced"
                )));
            }
        }

        // Claim before allocating so a failed claim consumes no number.
        state.claim(claimed, &draft.id)?;

        let month = period_key(draft.issued_at.year(), draft.issued_at.month());
        let sequence = state.sequences.entry(month).or_insert(0);
        *sequence += 1;
        let number = InvoiceNumber::first_for(draft.issued_at).with_sequence(*sequence);

        let invoice = draft.into_invoice(number);
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    async fn find_by_id(&self, id: &InvoiceId) -> Result<Option<Invoice>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.invoices.get(id).map(|invoice| state.hydrate(invoice)))
    }

    async fn find_by_order(&self, order_id: &OrderId) -> Result<Option<Invoice>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .invoices
            .values()
            .find(|invoice| invoice.order_id.as_ref() == Some(order_id))
            .map(|invoice| state.hydrate(invoice)))
    }

    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Invoice>, RepositoryError> {
        let state = self.state.read().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|invoice| &invoice.customer_id == customer_id)
            .map(|invoice| state.hydrate(invoice))
            .collect();
        invoices.sort_by_key(|invoice| invoice.number);
        Ok(invoices)
    }

    async fn update_status(
        &self,
        id: &InvoiceId,
        expected: InvoiceStatus,
        next: InvoiceStatus,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        match state.invoices.get_mut(id) {
            Some(invoice) if invoice.status == expected => {
                invoice.status = next;
                Ok(())
            }
            _ => Err(RepositoryError::Conflict(format!(
                "invoice {id} is no longer in status {expected}"
            ))),
        }
    }

    async fn cancel(
        &self,
        id: &InvoiceId,
        expected: InvoiceStatus,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        match state.invoices.get_mut(id) {
            Some(invoice) if invoice.status == expected && invoice.amount_paid.is_zero() => {
                invoice.status = InvoiceStatus::Cancelled;
            }
            _ => {
                return Err(RepositoryError::Conflict(format!(
                    "invoice {id} changed before it could be cancelled"
                )))
            }
        }

        let mut reopened = 0;
        for entry in state.transactions.iter_mut().filter(|entry| entry.invoice_id == Some(*id)) {
            entry.billed = false;
            entry.invoice_id = None;
            reopened += 1;
        }
        Ok(reopened)
    }
}

#[async_trait]
impl PaymentRepository for InMemoryBillingStore {
    async fn find_by_id(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.payments.iter().find(|payment| &payment.id == id).cloned())
    }

    async fn list_for_invoice(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<Vec<Payment>, RepositoryError> {
        Ok(self.state.read().await.payments_for(invoice_id))
    }

    async fn record(&self, payment: Payment, effect: PaymentEffect) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        match state.invoices.get_mut(&payment.invoice_id) {
            Some(invoice)
                if invoice.amount_paid == effect.expected_paid
                    && invoice.status != InvoiceStatus::Cancelled =>
            {
                invoice.amount_paid = effect.new_paid;
                invoice.status = effect.new_status;
            }
            _ => {
                return Err(RepositoryError::Conflict(format!(
                    "invoice {} balance changed since it was read",
                    payment.invoice_id
                )))
            }
        }
        state.payments.push(payment);
        Ok(())
    }
}

fn missing_rate_card(card_id: &RateCardId) -> RepositoryError {
    RepositoryError::NotFound { entity: "rate card", id: card_id.to_string() }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use depot_core::domain::customer::Customer;
    use depot_core::domain::invoice::{InvoiceDraft, InvoiceId, InvoiceStatus, InvoiceTotals};
    use depot_core::domain::payment::{Payment, PaymentId};
    use depot_core::domain::rate_card::{NewRateCardRule, RateCard, RateCardId};
    use depot_core::domain::service::ServiceType;
    use depot_core::domain::transaction::{TransactionId, UnbilledTransaction};

    use super::InMemoryBillingStore;
    use crate::repositories::{
        CustomerRepository, InvoiceRepository, PaymentEffect, PaymentRepository,
        RateCardRepository, RepositoryError, TransactionRepository,
    };

    fn entry(customer: &Customer, day: u32) -> UnbilledTransaction {
        let occurred_at = Utc.with_ymd_and_hms(2024, 3, day, 8, 0, 0).unwrap();
        UnbilledTransaction {
            id: TransactionId::new(),
            customer_id: customer.id,
            service_type: ServiceType::Picking,
            description: format!("Picking - PCK-{day}"),
            quantity: Decimal::new(10, 0),
            unit: "unit".to_string(),
            rate: Decimal::ONE,
            amount: Decimal::new(10, 0),
            reference: None,
            occurred_at,
            billed: false,
            invoice_id: None,
            created_at: occurred_at,
        }
    }

    fn draft(customer: &Customer, day: u32) -> InvoiceDraft {
        InvoiceDraft {
            id: InvoiceId::new(),
            customer_id: customer.id,
            order_id: None,
            period_from: None,
            period_to: None,
            currency: "USD".to_string(),
            status: InvoiceStatus::Open,
            totals: InvoiceTotals {
                subtotal: Decimal::new(10, 0),
                tax: Decimal::ZERO,
                total: Decimal::new(10, 0),
            },
            issued_at: Utc.with_ymd_and_hms(2024, 4, day, 9, 0, 0).unwrap(),
            lines: Vec::new(),
        }
    }

    fn card(customer: &Customer, version: u32, active: bool) -> RateCard {
        RateCard {
            id: depot_core::domain::rate_card::RateCardId::new(),
            customer_id: customer.id,
            name: format!("v{version}"),
            version,
            currency: "USD".to_string(),
            active,
            valid_from: None,
            valid_to: None,
            rules: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn list_active_sorts_by_name() {
        let store = InMemoryBillingStore::new();
        let mut dormant = Customer::active("Aardvark Ltd");
        dormant.status = depot_core::domain::customer::CustomerStatus::Inactive;
        store.save(Customer::active("Zeta")).await.expect("save");
        store.save(Customer::active("Beta")).await.expect("save");
        store.save(dormant).await.expect("save");

        let names: Vec<String> =
            store.list_active().await.expect("list").into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Beta".to_string(), "Zeta".to_string()]);
    }

    #[tokio::test]
    async fn invoice_numbers_are_per_month_and_claims_are_exclusive() {
        let store = InMemoryBillingStore::new();
        let customer = Customer::active("Acme");
        let first = entry(&customer, 2);
        let second = entry(&customer, 1);
        TransactionRepository::insert(&store, first.clone()).await.expect("insert");
        TransactionRepository::insert(&store, second.clone()).await.expect("insert");

        let window_from = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let window_to = window_from + Duration::days(31);
        let ordered =
            store.list_unbilled(&customer.id, window_from, window_to).await.expect("list");
        assert_eq!(ordered.iter().map(|e| e.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        let invoice = store
            .create_invoice(draft(&customer, 3), &[first.id, second.id])
            .await
            .expect("create");
        assert_eq!(invoice.number.to_string(), "INV-202404-0001");

        let error = store
            .create_invoice(draft(&customer, 4), &[first.id])
            .await
            .expect_err("already claimed");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let next = store.create_invoice(draft(&customer, 5), &[]).await.expect("create");
        assert_eq!(next.number.to_string(), "INV-202404-0002");
        assert!(store
            .list_unbilled(&customer.id, window_from, window_to)
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn concurrent_claims_produce_exactly_one_invoice() {
        let store = Arc::new(InMemoryBillingStore::new());
        let customer = Customer::active("Acme");
        let shared = entry(&customer, 10);
        TransactionRepository::insert(store.as_ref(), shared.clone()).await.expect("insert");

        let mut handles = Vec::new();
        for day in 1..=4 {
            let store = store.clone();
            let draft = draft(&customer, day);
            let ids = vec![shared.id];
            handles.push(tokio::spawn(async move { store.create_invoice(draft, &ids).await }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.expect("join").is_ok() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn cancel_requires_zero_paid_and_reopens_entries() {
        let store = InMemoryBillingStore::new();
        let customer = Customer::active("Acme");
        let billed = entry(&customer, 4);
        TransactionRepository::insert(&store, billed.clone()).await.expect("insert");
        let invoice =
            store.create_invoice(draft(&customer, 6), &[billed.id]).await.expect("create");

        let reopened = store.cancel(&invoice.id, InvoiceStatus::Open).await.expect("cancel");
        assert_eq!(reopened, 1);
        let entry = TransactionRepository::find_by_id(&store, &billed.id)
            .await
            .expect("find")
            .expect("exists");
        assert!(entry.is_billable());

        let again = store.cancel(&invoice.id, InvoiceStatus::Open).await;
        assert!(matches!(again, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn payment_record_checks_expected_paid_amount() {
        let store = InMemoryBillingStore::new();
        let customer = Customer::active("Acme");
        let invoice = store.create_invoice(draft(&customer, 8), &[]).await.expect("create");
        let payment = Payment {
            id: PaymentId::new(),
            invoice_id: invoice.id,
            method: "card".to_string(),
            amount: Decimal::new(4, 0),
            reference: None,
            notes: None,
            paid_at: Utc::now(),
            refund_of: None,
        };

        let stale = PaymentEffect {
            expected_paid: Decimal::ONE,
            new_paid: Decimal::new(5, 0),
            new_status: InvoiceStatus::Partial,
        };
        let error = store.record(payment.clone(), stale).await.expect_err("stale");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let fresh =
            PaymentEffect { expected_paid: Decimal::ZERO, new_paid: Decimal::new(4, 0), ..stale };
        store.record(payment, fresh).await.expect("record");

        let found = InvoiceRepository::find_by_id(&store, &invoice.id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(found.amount_paid, Decimal::new(4, 0));
        assert_eq!(found.status, InvoiceStatus::Partial);
        assert_eq!(found.payments.len(), 1);
    }

    #[tokio::test]
    async fn one_active_card_per_customer() {
        let store = InMemoryBillingStore::new();
        let customer = Customer::active("Acme");
        let first = card(&customer, 1, true);
        let second = card(&customer, 2, false);
        RateCardRepository::insert(&store, first).await.expect("first");
        RateCardRepository::insert(&store, second.clone()).await.expect("second");

        let error = store.set_active(&second.id, true).await.expect_err("second activation");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let duplicate = RateCardRepository::insert(&store, card(&customer, 2, false)).await;
        assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn mutating_a_missing_card_is_not_found() {
        let store = InMemoryBillingStore::default();
        let missing = RateCardId::new();
        let rule = NewRateCardRule::new(ServiceType::Packing, "unit", Decimal::ONE).into_rule();

        let activation = store.set_active(&missing, true).await.expect_err("missing card");
        assert!(matches!(activation, RepositoryError::NotFound { entity: "rate card", .. }));
        let appended = store.append_rule(&missing, rule).await.expect_err("missing card");
        assert!(matches!(appended, RepositoryError::NotFound { .. }));
    }
}
