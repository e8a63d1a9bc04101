use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::customer::CustomerId;
use crate::domain::service::ServiceType;
use crate::pricing::PricingError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BillingError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("no applicable rate for {service_type} in `{unit}` at quantity {quantity}")]
    NoApplicableRate { service_type: ServiceType, unit: String, quantity: Decimal },
    #[error("no billable activity for customer {customer_id} between {from} and {to}")]
    NoBillableActivity { customer_id: CustomerId, from: DateTime<Utc>, to: DateTime<Utc> },
    #[error("domain violation: {0}")]
    DomainViolation(String),
    #[error("conflicting concurrent update: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl BillingError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Stable machine-readable class used in batch reports and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::NoApplicableRate { .. } => "no_applicable_rate",
            Self::NoBillableActivity { .. } => "no_billable_activity",
            Self::DomainViolation(_) => "domain_violation",
            Self::Conflict(_) => "conflict",
            Self::Persistence(_) => "persistence",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<PricingError> for BillingError {
    fn from(value: PricingError) -> Self {
        match value {
            PricingError::NoApplicableRate { service_type, unit, quantity } => {
                Self::NoApplicableRate { service_type, unit, quantity }
            }
            PricingError::InvalidInput(message) => Self::Validation(message),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested billing record does not exist.",
            Self::Unprocessable { .. } => {
                "The request conflicts with the current billing state and was not applied."
            }
            Self::Conflict { .. } => {
                "Another billing operation changed this record. Reload and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::Unprocessable { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. } => message,
        }
    }
}

impl From<BillingError> for InterfaceError {
    fn from(value: BillingError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            BillingError::NotFound { .. } => Self::NotFound { message, correlation_id },
            BillingError::Validation(_) => Self::BadRequest { message, correlation_id },
            BillingError::NoApplicableRate { .. }
            | BillingError::NoBillableActivity { .. }
            | BillingError::DomainViolation(_) => Self::Unprocessable { message, correlation_id },
            BillingError::Conflict(_) => Self::Conflict { message, correlation_id },
            BillingError::Persistence(_) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::service::ServiceType;
    use crate::errors::{BillingError, InterfaceError};
    use crate::pricing::PricingError;

    #[test]
    fn validation_error_maps_to_bad_request_interface_error() {
        let interface =
            BillingError::Validation("period must be YYYY-MM".to_owned()).into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn domain_violation_maps_to_unprocessable() {
        let interface = BillingError::DomainViolation("payment exceeds balance".to_owned())
            .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Unprocessable { .. }));
        assert!(interface.message().contains("payment exceeds balance"));
    }

    #[test]
    fn not_found_names_entity_and_id() {
        let error = BillingError::not_found("invoice", "abc");
        assert_eq!(error.to_string(), "invoice not found: abc");
        assert!(matches!(error.into_interface("req-3"), InterfaceError::NotFound { .. }));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface =
            BillingError::Persistence("database lock timeout".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn pricing_miss_converts_to_no_applicable_rate() {
        let error = BillingError::from(PricingError::NoApplicableRate {
            service_type: ServiceType::Delivery,
            unit: "km".to_owned(),
            quantity: Decimal::new(12, 0),
        });

        assert_eq!(error.kind(), "no_applicable_rate");
        assert!(error.to_string().contains("DELIVERY"));
        assert!(error.to_string().contains("km"));
    }
}
