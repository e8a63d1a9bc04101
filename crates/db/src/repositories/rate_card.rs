use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use depot_core::domain::customer::CustomerId;
use depot_core::domain::rate_card::{RateCard, RateCardId, RateCardRule, RateCardRuleId};

use super::codec::{
    conflict_on_unique, decimal_text, optional_decimal_text, optional_timestamp_text,
    parse_decimal, parse_id, parse_optional_decimal, parse_optional_timestamp,
    parse_service_type, parse_timestamp, parse_u32, timestamp_text,
};
use super::{RateCardRepository, RepositoryError};
use crate::DbPool;

const CARD_COLUMNS: &str =
    "id, customer_id, name, version, currency, active, valid_from, valid_to, created_at";

pub struct SqlRateCardRepository {
    pool: DbPool,
}

impl SqlRateCardRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_rules(&self, card_id: &str) -> Result<Vec<RateCardRule>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, service_type, unit, tier_from, tier_to, unit_price, minimum_fee, active
             FROM rate_card_rule WHERE rate_card_id = ? ORDER BY position ASC",
        )
        .bind(card_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rule_from_row).collect()
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<RateCard, RepositoryError> {
        let id: String = row.try_get("id")?;
        let rules = self.load_rules(&id).await?;
        card_from_row(row, rules)
    }
}

fn rule_from_row(row: &SqliteRow) -> Result<RateCardRule, RepositoryError> {
    let id: String = row.try_get("id")?;
    let service_type: String = row.try_get("service_type")?;
    let tier_from: String = row.try_get("tier_from")?;
    let unit_price: String = row.try_get("unit_price")?;

    Ok(RateCardRule {
        id: parse_id("rate_card_rule.id", &id)?,
        service_type: parse_service_type(&service_type)?,
        unit: row.try_get("unit")?,
        tier_from: parse_decimal("rate_card_rule.tier_from", &tier_from)?,
        tier_to: parse_optional_decimal("rate_card_rule.tier_to", row.try_get("tier_to")?)?,
        unit_price: parse_decimal("rate_card_rule.unit_price", &unit_price)?,
        minimum_fee: parse_optional_decimal(
            "rate_card_rule.minimum_fee",
            row.try_get("minimum_fee")?,
        )?,
        active: row.try_get::<i64, _>("active")? == 1,
    })
}

fn card_from_row(row: &SqliteRow, rules: Vec<RateCardRule>) -> Result<RateCard, RepositoryError> {
    let id: String = row.try_get("id")?;
    let customer_id: String = row.try_get("customer_id")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(RateCard {
        id: parse_id("rate_card.id", &id)?,
        customer_id: parse_id("rate_card.customer_id", &customer_id)?,
        name: row.try_get("name")?,
        version: parse_u32("rate_card.version", row.try_get("version")?)?,
        currency: row.try_get("currency")?,
        active: row.try_get::<i64, _>("active")? == 1,
        valid_from: parse_optional_timestamp("rate_card.valid_from", row.try_get("valid_from")?)?,
        valid_to: parse_optional_timestamp("rate_card.valid_to", row.try_get("valid_to")?)?,
        rules,
        created_at: parse_timestamp("rate_card.created_at", &created_at)?,
    })
}

async fn insert_rule<'c, E>(
    executor: E,
    card_id: &RateCardId,
    position: i64,
    rule: &RateCardRule,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO rate_card_rule
            (id, rate_card_id, position, service_type, unit, tier_from, tier_to, unit_price,
             minimum_fee, active)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(rule.id.to_string())
    .bind(card_id.to_string())
    .bind(position)
    .bind(rule.service_type.as_str())
    .bind(&rule.unit)
    .bind(decimal_text(rule.tier_from))
    .bind(optional_decimal_text(rule.tier_to))
    .bind(decimal_text(rule.unit_price))
    .bind(optional_decimal_text(rule.minimum_fee))
    .bind(i64::from(rule.active))
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl RateCardRepository for SqlRateCardRepository {
    async fn find_by_id(&self, id: &RateCardId) -> Result<Option<RateCard>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CARD_COLUMNS} FROM rate_card WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<RateCard>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM rate_card WHERE customer_id = ? ORDER BY version ASC"
        ))
        .bind(customer_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut cards = Vec::with_capacity(rows.len());
        for row in &rows {
            cards.push(self.hydrate(row).await?);
        }
        Ok(cards)
    }

    async fn find_active(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Option<RateCard>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM rate_card WHERE customer_id = ? AND active = 1"
        ))
        .bind(customer_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, card: RateCard) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO rate_card
                (id, customer_id, name, version, currency, active, valid_from, valid_to, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(card.id.to_string())
        .bind(card.customer_id.to_string())
        .bind(&card.name)
        .bind(i64::from(card.version))
        .bind(&card.currency)
        .bind(i64::from(card.active))
        .bind(optional_timestamp_text(card.valid_from))
        .bind(optional_timestamp_text(card.valid_to))
        .bind(timestamp_text(card.created_at))
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            conflict_on_unique(
                error,
                format!(
                    "rate card version {} or active card already exists for customer {}",
                    card.version, card.customer_id
                ),
            )
        })?;

        for (position, rule) in card.rules.iter().enumerate() {
            insert_rule(&mut *tx, &card.id, position as i64, rule).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn append_rule(
        &self,
        card_id: &RateCardId,
        rule: RateCardRule,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM rate_card WHERE id = ?")
            .bind(card_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(RepositoryError::NotFound {
                entity: "rate card",
                id: card_id.to_string(),
            });
        }

        let next_position: i64 = sqlx::query(
            "SELECT COALESCE(MAX(position) + 1, 0) AS next_position
             FROM rate_card_rule WHERE rate_card_id = ?",
        )
        .bind(card_id.to_string())
        .fetch_one(&mut *tx)
        .await?
        .try_get("next_position")?;

        insert_rule(&mut *tx, card_id, next_position, &rule).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn deactivate_rule(
        &self,
        card_id: &RateCardId,
        rule_id: &RateCardRuleId,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE rate_card_rule SET active = 0 WHERE id = ? AND rate_card_id = ?")
                .bind(rule_id.to_string())
                .bind(card_id.to_string())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_active(&self, card_id: &RateCardId, active: bool) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE rate_card SET active = ? WHERE id = ?")
            .bind(i64::from(active))
            .bind(card_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|error| {
                let message = format!("another rate card is already active ({card_id})");
                conflict_on_unique(error, message)
            })?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                entity: "rate card",
                id: card_id.to_string(),
            });
        }
        Ok(())
    }
}
