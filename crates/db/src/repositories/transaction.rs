use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use depot_core::domain::customer::CustomerId;
use depot_core::domain::invoice::InvoiceId;
use depot_core::domain::transaction::{TransactionId, UnbilledTransaction};

use super::codec::{
    decimal_text, parse_decimal, parse_id, parse_service_type, parse_timestamp, placeholders,
    timestamp_text,
};
use super::{RepositoryError, TransactionRepository};
use crate::DbPool;

const TRANSACTION_COLUMNS: &str = "id, customer_id, service_type, description, quantity, unit, \
     rate, amount, reference, occurred_at, billed, invoice_id, created_at";

pub struct SqlTransactionRepository {
    pool: DbPool,
}

impl SqlTransactionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn transaction_from_row(
    row: &SqliteRow,
) -> Result<UnbilledTransaction, RepositoryError> {
    let id: String = row.try_get("id")?;
    let customer_id: String = row.try_get("customer_id")?;
    let service_type: String = row.try_get("service_type")?;
    let quantity: String = row.try_get("quantity")?;
    let rate: String = row.try_get("rate")?;
    let amount: String = row.try_get("amount")?;
    let occurred_at: String = row.try_get("occurred_at")?;
    let invoice_id: Option<String> = row.try_get("invoice_id")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(UnbilledTransaction {
        id: parse_id("unbilled_transaction.id", &id)?,
        customer_id: parse_id("unbilled_transaction.customer_id", &customer_id)?,
        service_type: parse_service_type(&service_type)?,
        description: row.try_get("description")?,
        quantity: parse_decimal("unbilled_transaction.quantity", &quantity)?,
        unit: row.try_get("unit")?,
        rate: parse_decimal("unbilled_transaction.rate", &rate)?,
        amount: parse_decimal("unbilled_transaction.amount", &amount)?,
        reference: row.try_get("reference")?,
        occurred_at: parse_timestamp("unbilled_transaction.occurred_at", &occurred_at)?,
        billed: row.try_get::<i64, _>("billed")? == 1,
        invoice_id: invoice_id
            .map(|raw| parse_id("unbilled_transaction.invoice_id", &raw))
            .transpose()?,
        created_at: parse_timestamp("unbilled_transaction.created_at", &created_at)?,
    })
}

/// Ids bound per claim statement, well under SQLite's bound-variable limit.
pub(crate) const CLAIM_CHUNK_SIZE: usize = 500;

/// Conditional bulk claim on an open connection. The caller owns the transaction and
/// must roll back on `Conflict`.
pub(crate) async fn claim_transactions(
    conn: &mut SqliteConnection,
    ids: &[TransactionId],
    invoice_id: &InvoiceId,
) -> Result<(), RepositoryError> {
    let mut claimed = 0_u64;
    for chunk in ids.chunks(CLAIM_CHUNK_SIZE) {
        let statement = format!(
            "UPDATE unbilled_transaction SET billed = 1, invoice_id = ?
             WHERE billed = 0 AND id IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&statement).bind(invoice_id.to_string());
        for id in chunk {
            query = query.bind(id.to_string());
        }
        claimed += query.execute(&mut *conn).await?.rows_affected();
    }

    if claimed != ids.len() as u64 {
        return Err(RepositoryError::Conflict(format!(
            "claimed {claimed} of {} transactions for invoice {invoice_id}; \
             some were already billed or missing",
            ids.len()
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl TransactionRepository for SqlTransactionRepository {
    async fn insert(&self, transaction: UnbilledTransaction) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT INTO unbilled_transaction ({TRANSACTION_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(transaction.id.to_string())
        .bind(transaction.customer_id.to_string())
        .bind(transaction.service_type.as_str())
        .bind(&transaction.description)
        .bind(decimal_text(transaction.quantity))
        .bind(&transaction.unit)
        .bind(decimal_text(transaction.rate))
        .bind(decimal_text(transaction.amount))
        .bind(&transaction.reference)
        .bind(timestamp_text(transaction.occurred_at))
        .bind(i64::from(transaction.billed))
        .bind(transaction.invoice_id.map(|id| id.to_string()))
        .bind(timestamp_text(transaction.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &TransactionId,
    ) -> Result<Option<UnbilledTransaction>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM unbilled_transaction WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn list_unbilled(
        &self,
        customer_id: &CustomerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UnbilledTransaction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM unbilled_transaction
             WHERE customer_id = ? AND billed = 0 AND occurred_at >= ? AND occurred_at <= ?
             ORDER BY occurred_at ASC, created_at ASC"
        ))
        .bind(customer_id.to_string())
        .bind(timestamp_text(from))
        .bind(timestamp_text(to))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn list_unbilled_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UnbilledTransaction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM unbilled_transaction
             WHERE billed = 0 AND occurred_at >= ? AND occurred_at <= ?
             ORDER BY occurred_at ASC, created_at ASC"
        ))
        .bind(timestamp_text(from))
        .bind(timestamp_text(to))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn list_for_invoice(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<Vec<UnbilledTransaction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM unbilled_transaction
             WHERE invoice_id = ? ORDER BY occurred_at ASC, created_at ASC"
        ))
        .bind(invoice_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn mark_billed(
        &self,
        ids: &[TransactionId],
        invoice_id: &InvoiceId,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        // dropping `tx` on error rolls the claim back
        claim_transactions(&mut tx, ids, invoice_id).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use depot_core::domain::customer::Customer;
    use depot_core::domain::invoice::InvoiceId;
    use depot_core::domain::service::ServiceType;
    use depot_core::domain::transaction::{TransactionId, UnbilledTransaction};

    use super::{SqlTransactionRepository, CLAIM_CHUNK_SIZE};
    use crate::repositories::{
        CustomerRepository, RepositoryError, SqlCustomerRepository, TransactionRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn setup() -> (sqlx::SqlitePool, Customer) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let customer = Customer::active("Acme");
        SqlCustomerRepository::new(pool.clone()).save(customer.clone()).await.expect("customer");
        (pool, customer)
    }

    fn entry(customer: &Customer, day: u32) -> UnbilledTransaction {
        let occurred_at = Utc.with_ymd_and_hms(2024, 1, day, 10, 0, 0).unwrap();
        UnbilledTransaction {
            id: TransactionId::new(),
            customer_id: customer.id,
            service_type: ServiceType::Picking,
            description: format!("Picking - SO-{day}"),
            quantity: Decimal::new(10, 0),
            unit: "unit".to_string(),
            rate: Decimal::new(150, 2),
            amount: Decimal::new(15, 0),
            reference: Some(format!("SO-{day}")),
            occurred_at,
            billed: false,
            invoice_id: None,
            created_at: occurred_at,
        }
    }

    /// Claims need a parent invoice row for the foreign key.
    async fn insert_invoice_row(
        pool: &sqlx::SqlitePool,
        customer: &Customer,
        sequence: i64,
    ) -> InvoiceId {
        let id = InvoiceId::new();
        sqlx::query(
            "INSERT INTO invoice (id, customer_id, number_month, number_sequence, currency,
                                  subtotal, tax, total, status, issued_at)
             VALUES (?, ?, 202401, ?, 'USD', '0', '0', '0', 'OPEN', '2024-01-31T00:00:00.000000Z')",
        )
        .bind(id.to_string())
        .bind(customer.id.to_string())
        .bind(sequence)
        .execute(pool)
        .await
        .expect("insert invoice row");
        id
    }

    #[tokio::test]
    async fn window_query_is_inclusive_ordered_and_unbilled_only() {
        let (pool, customer) = setup().await;
        let repo = SqlTransactionRepository::new(pool);
        let late = entry(&customer, 20);
        let early = entry(&customer, 5);
        let outside = entry(&customer, 31);
        for transaction in [late.clone(), early.clone(), outside] {
            repo.insert(transaction).await.expect("insert");
        }

        let from = early.occurred_at;
        let to = late.occurred_at;
        let found = repo.list_unbilled(&customer.id, from, to).await.expect("query");

        let ids: Vec<_> = found.iter().map(|transaction| transaction.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn mark_billed_sets_invoice_and_hides_from_unbilled_queries() {
        let (pool, customer) = setup().await;
        let repo = SqlTransactionRepository::new(pool.clone());
        let first = entry(&customer, 3);
        let second = entry(&customer, 4);
        repo.insert(first.clone()).await.expect("insert");
        repo.insert(second.clone()).await.expect("insert");

        let invoice_id = insert_invoice_row(&pool, &customer, 1).await;
        repo.mark_billed(&[first.id, second.id], &invoice_id).await.expect("claim");

        let billed = repo.find_by_id(&first.id).await.expect("find").expect("exists");
        assert!(billed.billed);
        assert_eq!(billed.invoice_id, Some(invoice_id));

        let start = first.occurred_at - Duration::days(1);
        let end = second.occurred_at + Duration::days(1);
        assert!(repo.list_unbilled(&customer.id, start, end).await.expect("query").is_empty());
        assert_eq!(repo.list_for_invoice(&invoice_id).await.expect("by invoice").len(), 2);
    }

    #[tokio::test]
    async fn partial_claim_conflicts_and_writes_nothing() {
        let (pool, customer) = setup().await;
        let repo = SqlTransactionRepository::new(pool.clone());
        let first = entry(&customer, 3);
        let second = entry(&customer, 4);
        repo.insert(first.clone()).await.expect("insert");
        repo.insert(second.clone()).await.expect("insert");

        let earlier_invoice = insert_invoice_row(&pool, &customer, 1).await;
        repo.mark_billed(&[first.id], &earlier_invoice).await.expect("first claim");

        let later_invoice = insert_invoice_row(&pool, &customer, 2).await;
        let error = repo
            .mark_billed(&[first.id, second.id], &later_invoice)
            .await
            .expect_err("overlapping claim");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let untouched = repo.find_by_id(&second.id).await.expect("find").expect("exists");
        assert!(!untouched.billed);
        assert_eq!(untouched.invoice_id, None);
    }

    #[tokio::test]
    async fn claims_larger_than_one_statement_are_chunked() {
        let (pool, customer) = setup().await;
        let repo = SqlTransactionRepository::new(pool.clone());
        let count = CLAIM_CHUNK_SIZE * 2 + 7;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let transaction = entry(&customer, 9);
            ids.push(transaction.id);
            repo.insert(transaction).await.expect("insert");
        }

        let invoice_id = insert_invoice_row(&pool, &customer, 1).await;
        repo.mark_billed(&ids, &invoice_id).await.expect("chunked claim");

        assert_eq!(repo.list_for_invoice(&invoice_id).await.expect("by invoice").len(), count);
    }

    #[tokio::test]
    async fn conflict_in_a_later_chunk_rolls_back_earlier_chunks() {
        let (pool, customer) = setup().await;
        let repo = SqlTransactionRepository::new(pool.clone());
        let mut ids = Vec::new();
        for _ in 0..CLAIM_CHUNK_SIZE + 1 {
            let transaction = entry(&customer, 9);
            ids.push(transaction.id);
            repo.insert(transaction).await.expect("insert");
        }

        let last = ids[CLAIM_CHUNK_SIZE];
        let earlier_invoice = insert_invoice_row(&pool, &customer, 1).await;
        repo.mark_billed(&[last], &earlier_invoice).await.expect("first claim");

        let later_invoice = insert_invoice_row(&pool, &customer, 2).await;
        let error = repo.mark_billed(&ids, &later_invoice).await.expect_err("overlapping claim");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        assert!(repo.list_for_invoice(&later_invoice).await.expect("by invoice").is_empty());
        let first = repo.find_by_id(&ids[0]).await.expect("find").expect("exists");
        assert!(!first.billed);
    }
}
