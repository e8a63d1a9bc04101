use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use depot_core::domain::order::{Order, OrderId, OrderLine, OrderStatus, OwnerType};

use super::codec::{
    decimal_text, optional_decimal_text, optional_timestamp_text, parse_decimal, parse_id,
    parse_optional_decimal, parse_optional_timestamp,
};
use super::{OrderRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn order_line_from_row(row: &SqliteRow) -> Result<OrderLine, RepositoryError> {
    let quantity: String = row.try_get("quantity")?;
    Ok(OrderLine {
        description: row.try_get("description")?,
        quantity: parse_decimal("order_line.quantity", &quantity)?,
        unit: row.try_get("unit")?,
        unit_sale_price: parse_optional_decimal(
            "order_line.unit_sale_price",
            row.try_get("unit_sale_price")?,
        )?,
    })
}

fn order_from_row(row: &SqliteRow, lines: Vec<OrderLine>) -> Result<Order, RepositoryError> {
    let id: String = row.try_get("id")?;
    let customer_id: String = row.try_get("customer_id")?;
    let owner_type: String = row.try_get("owner_type_effective")?;
    let status: String = row.try_get("status")?;

    Ok(Order {
        id: parse_id("customer_order.id", &id)?,
        customer_id: parse_id("customer_order.customer_id", &customer_id)?,
        reference: row.try_get("reference")?,
        owner_type_effective: OwnerType::parse(&owner_type).ok_or_else(|| {
            RepositoryError::Decode(format!("customer_order.owner_type_effective: `{owner_type}`"))
        })?,
        status: OrderStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("customer_order.status: `{status}`"))
        })?,
        lines,
        delivered_at: parse_optional_timestamp(
            "customer_order.delivered_at",
            row.try_get("delivered_at")?,
        )?,
    })
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, customer_id, reference, owner_type_effective, status, delivered_at
             FROM customer_order WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let line_rows = sqlx::query(
            "SELECT description, quantity, unit, unit_sale_price
             FROM order_line WHERE order_id = ? ORDER BY position ASC",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let lines = line_rows.iter().map(order_line_from_row).collect::<Result<Vec<_>, _>>()?;

        order_from_row(&row, lines).map(Some)
    }

    async fn save(&self, order: Order) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO customer_order
                (id, customer_id, reference, owner_type_effective, status, delivered_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 reference = excluded.reference,
                 owner_type_effective = excluded.owner_type_effective,
                 status = excluded.status,
                 delivered_at = excluded.delivered_at",
        )
        .bind(order.id.to_string())
        .bind(order.customer_id.to_string())
        .bind(&order.reference)
        .bind(order.owner_type_effective.as_str())
        .bind(order.status.as_str())
        .bind(optional_timestamp_text(order.delivered_at))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM order_line WHERE order_id = ?")
            .bind(order.id.to_string())
            .execute(&mut *tx)
            .await?;

        for (position, line) in order.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_line
                    (order_id, position, description, quantity, unit, unit_sale_price)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(order.id.to_string())
            .bind(position as i64)
            .bind(&line.description)
            .bind(decimal_text(line.quantity))
            .bind(&line.unit)
            .bind(optional_decimal_text(line.unit_sale_price))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use depot_core::domain::customer::Customer;
    use depot_core::domain::order::{Order, OrderId, OrderLine, OrderStatus, OwnerType};

    use super::SqlOrderRepository;
    use crate::repositories::{CustomerRepository, OrderRepository, SqlCustomerRepository};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn order_round_trips_with_lines_in_order() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let customer = Customer::active("Acme");
        SqlCustomerRepository::new(pool.clone()).save(customer.clone()).await.expect("customer");

        let order = Order {
            id: OrderId::new(),
            customer_id: customer.id,
            reference: "SO-2024-0007".to_string(),
            owner_type_effective: OwnerType::PurchaseForClient,
            status: OrderStatus::Delivered,
            lines: vec![
                OrderLine {
                    description: "Pallet of widgets".to_string(),
                    quantity: Decimal::new(4, 0),
                    unit: "unit".to_string(),
                    unit_sale_price: Some(Decimal::new(2500, 2)),
                },
                OrderLine {
                    description: "Loose cartons".to_string(),
                    quantity: Decimal::new(12, 0),
                    unit: "carton".to_string(),
                    unit_sale_price: None,
                },
            ],
            delivered_at: Some(Utc.with_ymd_and_hms(2024, 5, 3, 14, 0, 0).unwrap()),
        };

        let repo = SqlOrderRepository::new(pool);
        repo.save(order.clone()).await.expect("save");
        let found = repo.find_by_id(&order.id).await.expect("find").expect("exists");

        assert_eq!(found, order);
    }
}
