use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;

use depot_core::domain::service::ServiceType;

use super::RepositoryError;

pub(crate) fn decimal_text(value: Decimal) -> String {
    value.normalize().to_string()
}

pub(crate) fn optional_decimal_text(value: Option<Decimal>) -> Option<String> {
    value.map(decimal_text)
}

pub(crate) fn parse_decimal(field: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value).map_err(|error| {
        RepositoryError::Decode(format!("{field}: `{value}` is not a decimal: {error}"))
    })
}

pub(crate) fn parse_optional_decimal(
    field: &str,
    value: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    value.map(|raw| parse_decimal(field, &raw)).transpose()
}

/// Fixed-width UTC form so stored timestamps compare correctly as text.
pub(crate) fn timestamp_text(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn optional_timestamp_text(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(timestamp_text)
}

pub(crate) fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{field}: `{value}`: {error}")))
}

pub(crate) fn parse_optional_timestamp(
    field: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| parse_timestamp(field, &raw)).transpose()
}

pub(crate) fn parse_id<T>(field: &str, value: &str) -> Result<T, RepositoryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|error| RepositoryError::Decode(format!("{field}: `{value}`: {error}")))
}

pub(crate) fn parse_service_type(value: &str) -> Result<ServiceType, RepositoryError> {
    parse_id("service_type", value)
}

pub(crate) fn parse_u32(field: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{field}: {value} is out of range")))
}

/// Maps a unique-constraint violation to `Conflict`, leaving other errors alone.
pub(crate) fn conflict_on_unique(
    error: sqlx::Error,
    message: impl Into<String>,
) -> RepositoryError {
    let unique = error.as_database_error().is_some_and(|db| db.is_unique_violation());
    if unique {
        RepositoryError::Conflict(message.into())
    } else {
        RepositoryError::Database(error)
    }
}

/// `?, ?, ?` for an `IN (...)` list of `count` binds.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
