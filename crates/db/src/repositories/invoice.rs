use chrono::Datelike;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use depot_core::domain::customer::CustomerId;
use depot_core::domain::invoice::{
    period_key, Invoice, InvoiceDraft, InvoiceId, InvoiceLine, InvoiceNumber, InvoiceStatus,
};
use depot_core::domain::order::OrderId;
use depot_core::domain::transaction::TransactionId;

use super::codec::{
    conflict_on_unique, decimal_text, optional_timestamp_text, parse_decimal, parse_id,
    parse_optional_timestamp, parse_service_type, parse_timestamp, parse_u32, timestamp_text,
};
use super::payment::payment_from_row;
use super::transaction::claim_transactions;
use super::{InvoiceRepository, RepositoryError};
use crate::DbPool;

const INVOICE_COLUMNS: &str = "id, customer_id, order_id, number_month, number_sequence, \
     period_from, period_to, currency, subtotal, tax, total, amount_paid, status, issued_at";

pub struct SqlInvoiceRepository {
    pool: DbPool,
}

impl SqlInvoiceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<Invoice, RepositoryError> {
        let id: String = row.try_get("id")?;

        let line_rows = sqlx::query(
            "SELECT position, description, service_type, quantity, unit, rate, tax, amount
             FROM invoice_line WHERE invoice_id = ? ORDER BY position ASC",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;
        let lines = line_rows.iter().map(line_from_row).collect::<Result<Vec<_>, _>>()?;

        let payment_rows = sqlx::query(
            "SELECT id, invoice_id, method, amount, reference, notes, paid_at, refund_of
             FROM payment WHERE invoice_id = ? ORDER BY paid_at ASC, rowid ASC",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;
        let payments = payment_rows.iter().map(payment_from_row).collect::<Result<Vec<_>, _>>()?;

        invoice_from_row(row, lines, payments)
    }

    async fn find_one(
        &self,
        column: &str,
        value: String,
    ) -> Result<Option<Invoice>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {INVOICE_COLUMNS} FROM invoice WHERE {column} = ?"))
                .bind(value)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }
}

fn line_from_row(row: &SqliteRow) -> Result<InvoiceLine, RepositoryError> {
    let service_type: String = row.try_get("service_type")?;
    let quantity: String = row.try_get("quantity")?;
    let rate: String = row.try_get("rate")?;
    let tax: String = row.try_get("tax")?;
    let amount: String = row.try_get("amount")?;

    Ok(InvoiceLine {
        position: parse_u32("invoice_line.position", row.try_get("position")?)?,
        description: row.try_get("description")?,
        service_type: parse_service_type(&service_type)?,
        quantity: parse_decimal("invoice_line.quantity", &quantity)?,
        unit: row.try_get("unit")?,
        rate: parse_decimal("invoice_line.rate", &rate)?,
        tax: parse_decimal("invoice_line.tax", &tax)?,
        amount: parse_decimal("invoice_line.amount", &amount)?,
    })
}

fn invoice_from_row(
    row: &SqliteRow,
    lines: Vec<InvoiceLine>,
    payments: Vec<depot_core::domain::payment::Payment>,
) -> Result<Invoice, RepositoryError> {
    let id: String = row.try_get("id")?;
    let customer_id: String = row.try_get("customer_id")?;
    let order_id: Option<String> = row.try_get("order_id")?;
    let number_month = parse_u32("invoice.number_month", row.try_get("number_month")?)?;
    let sequence = parse_u32("invoice.number_sequence", row.try_get("number_sequence")?)?;
    let subtotal: String = row.try_get("subtotal")?;
    let tax: String = row.try_get("tax")?;
    let total: String = row.try_get("total")?;
    let amount_paid: String = row.try_get("amount_paid")?;
    let status: String = row.try_get("status")?;
    let issued_at: String = row.try_get("issued_at")?;

    let year = i32::try_from(number_month / 100)
        .map_err(|_| RepositoryError::Decode(format!("invoice.number_month: {number_month}")))?;

    Ok(Invoice {
        id: parse_id("invoice.id", &id)?,
        number: InvoiceNumber { year, month: number_month % 100, sequence },
        customer_id: parse_id("invoice.customer_id", &customer_id)?,
        order_id: order_id.map(|raw| parse_id("invoice.order_id", &raw)).transpose()?,
        period_from: parse_optional_timestamp("invoice.period_from", row.try_get("period_from")?)?,
        period_to: parse_optional_timestamp("invoice.period_to", row.try_get("period_to")?)?,
        currency: row.try_get("currency")?,
        subtotal: parse_decimal("invoice.subtotal", &subtotal)?,
        tax: parse_decimal("invoice.tax", &tax)?,
        total: parse_decimal("invoice.total", &total)?,
        amount_paid: parse_decimal("invoice.amount_paid", &amount_paid)?,
        status: InvoiceStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("invoice.status: `{status}`")))?,
        issued_at: parse_timestamp("invoice.issued_at", &issued_at)?,
        lines,
        payments,
    })
}

#[async_trait::async_trait]
impl InvoiceRepository for SqlInvoiceRepository {
    async fn create_invoice(
        &self,
        draft: InvoiceDraft,
        claimed: &[TransactionId],
    ) -> Result<Invoice, RepositoryError> {
        let number_month = period_key(draft.issued_at.year(), draft.issued_at.month());
        let mut tx = self.pool.begin().await?;

        // The sequence is computed inside the INSERT so allocation and write are one step.
        let inserted = sqlx::query(
            "INSERT INTO invoice
                (id, customer_id, order_id, number_month, number_sequence, period_from,
                 period_to, currency, subtotal, tax, total, amount_paid, status, issued_at)
             VALUES (?, ?, ?, ?,
                     (SELECT COALESCE(MAX(number_sequence), 0) + 1 FROM invoice
                      WHERE number_month = ?),
                     ?, ?, ?, ?, ?, ?, '0', ?, ?)
             RETURNING number_sequence",
        )
        .bind(draft.id.to_string())
        .bind(draft.customer_id.to_string())
        .bind(draft.order_id.map(|id| id.to_string()))
        .bind(i64::from(number_month))
        .bind(i64::from(number_month))
        .bind(optional_timestamp_text(draft.period_from))
        .bind(optional_timestamp_text(draft.period_to))
        .bind(&draft.currency)
        .bind(decimal_text(draft.totals.subtotal))
        .bind(decimal_text(draft.totals.tax))
        .bind(decimal_text(draft.totals.total))
        .bind(draft.status.as_str())
        .bind(timestamp_text(draft.issued_at))
        .fetch_one(&mut *tx)
        .await
        .map_err(|error| {
            conflict_on_unique(
                error,
                format!("invoice number or order already taken while creating {}", draft.id),
            )
        })?;
        let sequence = parse_u32("invoice.number_sequence", inserted.try_get("number_sequence")?)?;

        for line in &draft.lines {
            sqlx::query(
                "INSERT INTO invoice_line
                    (invoice_id, position, description, service_type, quantity, unit, rate,
                     tax, amount)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(draft.id.to_string())
            .bind(i64::from(line.position))
            .bind(&line.description)
            .bind(line.service_type.as_str())
            .bind(decimal_text(line.quantity))
            .bind(&line.unit)
            .bind(decimal_text(line.rate))
            .bind(decimal_text(line.tax))
            .bind(decimal_text(line.amount))
            .execute(&mut *tx)
            .await?;
        }

        claim_transactions(&mut tx, claimed, &draft.id).await?;
        tx.commit().await?;

        let number = InvoiceNumber::first_for(draft.issued_at).with_sequence(sequence);
        Ok(draft.into_invoice(number))
    }

    async fn find_by_id(&self, id: &InvoiceId) -> Result<Option<Invoice>, RepositoryError> {
        self.find_one("id", id.to_string()).await
    }

    async fn find_by_order(&self, order_id: &OrderId) -> Result<Option<Invoice>, RepositoryError> {
        self.find_one("order_id", order_id.to_string()).await
    }

    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Invoice>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoice WHERE customer_id = ?
             ORDER BY number_month ASC, number_sequence ASC"
        ))
        .bind(customer_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut invoices = Vec::with_capacity(rows.len());
        for row in &rows {
            invoices.push(self.hydrate(row).await?);
        }
        Ok(invoices)
    }

    async fn update_status(
        &self,
        id: &InvoiceId,
        expected: InvoiceStatus,
        next: InvoiceStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE invoice SET status = ? WHERE id = ? AND status = ?")
            .bind(next.as_str())
            .bind(id.to_string())
            .bind(expected.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "invoice {id} is no longer {expected}"
            )));
        }
        Ok(())
    }

    async fn cancel(
        &self,
        id: &InvoiceId,
        expected: InvoiceStatus,
    ) -> Result<u64, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let cancelled = sqlx::query(
            "UPDATE invoice SET status = 'CANCELLED'
             WHERE id = ? AND status = ? AND amount_paid = '0'",
        )
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;
        if cancelled.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "invoice {id} changed status or received a payment"
            )));
        }

        let reopened = sqlx::query(
            "UPDATE unbilled_transaction SET billed = 0, invoice_id = NULL WHERE invoice_id = ?",
        )
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(reopened)
    }
}
