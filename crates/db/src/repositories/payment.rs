use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use depot_core::domain::invoice::InvoiceId;
use depot_core::domain::payment::{Payment, PaymentId};

use super::codec::{decimal_text, parse_decimal, parse_id, parse_timestamp, timestamp_text};
use super::{PaymentEffect, PaymentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPaymentRepository {
    pool: DbPool,
}

impl SqlPaymentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn payment_from_row(row: &SqliteRow) -> Result<Payment, RepositoryError> {
    let id: String = row.try_get("id")?;
    let invoice_id: String = row.try_get("invoice_id")?;
    let amount: String = row.try_get("amount")?;
    let paid_at: String = row.try_get("paid_at")?;
    let refund_of: Option<String> = row.try_get("refund_of")?;

    Ok(Payment {
        id: parse_id("payment.id", &id)?,
        invoice_id: parse_id("payment.invoice_id", &invoice_id)?,
        method: row.try_get("method")?,
        amount: parse_decimal("payment.amount", &amount)?,
        reference: row.try_get("reference")?,
        notes: row.try_get("notes")?,
        paid_at: parse_timestamp("payment.paid_at", &paid_at)?,
        refund_of: refund_of.map(|raw| parse_id("payment.refund_of", &raw)).transpose()?,
    })
}

#[async_trait::async_trait]
impl PaymentRepository for SqlPaymentRepository {
    async fn find_by_id(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, invoice_id, method, amount, reference, notes, paid_at, refund_of
             FROM payment WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(payment_from_row).transpose()
    }

    async fn list_for_invoice(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<Vec<Payment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, invoice_id, method, amount, reference, notes, paid_at, refund_of
             FROM payment WHERE invoice_id = ? ORDER BY paid_at ASC, rowid ASC",
        )
        .bind(invoice_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payment_from_row).collect()
    }

    async fn record(&self, payment: Payment, effect: PaymentEffect) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE invoice SET amount_paid = ?, status = ?
             WHERE id = ? AND amount_paid = ? AND status <> 'CANCELLED'",
        )
        .bind(decimal_text(effect.new_paid))
        .bind(effect.new_status.as_str())
        .bind(payment.invoice_id.to_string())
        .bind(decimal_text(effect.expected_paid))
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "invoice {} balance changed since it was read",
                payment.invoice_id
            )));
        }

        sqlx::query(
            "INSERT INTO payment
                (id, invoice_id, method, amount, reference, notes, paid_at, refund_of)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(payment.id.to_string())
        .bind(payment.invoice_id.to_string())
        .bind(&payment.method)
        .bind(decimal_text(payment.amount))
        .bind(&payment.reference)
        .bind(&payment.notes)
        .bind(timestamp_text(payment.paid_at))
        .bind(payment.refund_of.map(|id| id.to_string()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
