use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use depot_core::domain::customer::{Customer, CustomerId, CustomerStatus};

use super::codec::{parse_id, timestamp_text};
use super::{CustomerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn customer_from_row(row: &SqliteRow) -> Result<Customer, RepositoryError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;

    Ok(Customer {
        id: parse_id("customer.id", &id)?,
        name: row.try_get("name")?,
        status: CustomerStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("customer.status: unknown value `{status}`"))
        })?,
    })
}

#[async_trait::async_trait]
impl CustomerRepository for SqlCustomerRepository {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, status FROM customer WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(customer_from_row).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Customer>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, status FROM customer WHERE status = 'active'
             ORDER BY name ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(customer_from_row).collect()
    }

    async fn save(&self, customer: Customer) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO customer (id, name, status, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 status = excluded.status",
        )
        .bind(customer.id.to_string())
        .bind(&customer.name)
        .bind(customer.status.as_str())
        .bind(timestamp_text(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use depot_core::domain::customer::{Customer, CustomerStatus};

    use super::SqlCustomerRepository;
    use crate::repositories::CustomerRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn save_and_find_by_id() {
        let repo = SqlCustomerRepository::new(setup().await);
        let customer = Customer::active("Acme Logistics");

        repo.save(customer.clone()).await.expect("save");
        let found = repo.find_by_id(&customer.id).await.expect("find");

        assert_eq!(found, Some(customer));
    }

    #[tokio::test]
    async fn list_active_skips_inactive_and_orders_by_name() {
        let repo = SqlCustomerRepository::new(setup().await);
        let zeta = Customer::active("Zeta Foods");
        let alpha = Customer::active("Alpha Retail");
        let mut dormant = Customer::active("Dormant Co");
        dormant.status = CustomerStatus::Inactive;

        for customer in [zeta.clone(), alpha.clone(), dormant] {
            repo.save(customer).await.expect("save");
        }

        let active = repo.list_active().await.expect("list");
        let names: Vec<&str> = active.iter().map(|customer| customer.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha Retail", "Zeta Foods"]);
    }
}
