use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;
use crate::domain::order::OrderId;
use crate::domain::payment::Payment;
use crate::domain::service::ServiceType;
use crate::domain::uuid_id;
use crate::errors::BillingError;
use crate::money::{percent_of, round_money};

uuid_id!(InvoiceId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Open,
    Final,
    Partial,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Final => "FINAL",
            Self::Partial => "PARTIAL",
            Self::Paid => "PAID",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Some(Self::Open),
            "FINAL" => Some(Self::Final),
            "PARTIAL" => Some(Self::Partial),
            "PAID" => Some(Self::Paid),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Forward-only lifecycle; refunds may move PAID/PARTIAL back towards OPEN.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        if *self == next {
            return *self != Self::Cancelled;
        }

        matches!(
            (self, next),
            (Self::Open, Self::Final)
                | (Self::Open, Self::Partial)
                | (Self::Open, Self::Paid)
                | (Self::Open, Self::Cancelled)
                | (Self::Final, Self::Partial)
                | (Self::Final, Self::Paid)
                | (Self::Final, Self::Cancelled)
                | (Self::Partial, Self::Paid)
                | (Self::Partial, Self::Open)
                | (Self::Paid, Self::Partial)
                | (Self::Paid, Self::Open)
        )
    }

    /// Status after a payment brought the paid total to `paid`.
    pub fn after_payment(self, total: Decimal, paid: Decimal) -> InvoiceStatus {
        if paid >= total {
            Self::Paid
        } else if paid > Decimal::ZERO {
            Self::Partial
        } else {
            self
        }
    }

    /// Status after a refund brought the paid total down to `paid`.
    pub fn after_refund(self, total: Decimal, paid: Decimal) -> InvoiceStatus {
        if paid <= Decimal::ZERO {
            Self::Open
        } else if paid < total {
            Self::Partial
        } else {
            self
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `INV-YYYYMM-NNNN`, sequential within a calendar month.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvoiceNumber {
    pub year: i32,
    pub month: u32,
    pub sequence: u32,
}

impl InvoiceNumber {
    pub const PREFIX: &'static str = "INV";

    pub fn first_for(issued_at: DateTime<Utc>) -> Self {
        Self { year: issued_at.year(), month: issued_at.month(), sequence: 1 }
    }

    /// `YYYYMM` as an integer, used as the sequence partition key.
    pub fn month_key(&self) -> u32 {
        period_key(self.year, self.month)
    }

    pub fn with_sequence(self, sequence: u32) -> Self {
        Self { sequence, ..self }
    }
}

pub fn period_key(year: i32, month: u32) -> u32 {
    u32::try_from(year).unwrap_or_default() * 100 + month
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:04}{:02}-{:04}", Self::PREFIX, self.year, self.month, self.sequence)
    }
}

impl FromStr for InvoiceNumber {
    type Err = BillingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || BillingError::Validation(format!("invalid invoice number `{value}`"));
        let mut parts = value.trim().splitn(3, '-');
        let (Some(prefix), Some(month_part), Some(sequence_part)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let digits = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());
        if prefix != Self::PREFIX
            || month_part.len() != 6
            || sequence_part.len() < 4
            || !digits(month_part)
            || !digits(sequence_part)
        {
            return Err(invalid());
        }

        let year = month_part[..4].parse::<i32>().map_err(|_| invalid())?;
        let month = month_part[4..].parse::<u32>().map_err(|_| invalid())?;
        let sequence = sequence_part.parse::<u32>().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) || sequence == 0 {
            return Err(invalid());
        }

        Ok(Self { year, month, sequence })
    }
}

impl Serialize for InvoiceNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InvoiceNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Priced snapshot; never recalculated once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub position: u32,
    pub description: String,
    pub service_type: ServiceType,
    pub quantity: Decimal,
    pub unit: String,
    pub rate: Decimal,
    pub tax: Decimal,
    pub amount: Decimal,
}

impl InvoiceLine {
    #[allow(clippy::too_many_arguments)]
    pub fn priced(
        position: u32,
        description: impl Into<String>,
        service_type: ServiceType,
        quantity: Decimal,
        unit: impl Into<String>,
        rate: Decimal,
        amount: Decimal,
        tax_rate_percent: Decimal,
    ) -> Self {
        let amount = round_money(amount);
        Self {
            position,
            description: description.into(),
            service_type,
            quantity: round_money(quantity),
            unit: unit.into(),
            rate: round_money(rate),
            tax: percent_of(amount, tax_rate_percent),
            amount,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl InvoiceTotals {
    pub fn from_lines(lines: &[InvoiceLine], tax_rate_percent: Decimal) -> Self {
        let subtotal = round_money(lines.iter().map(|line| line.amount).sum());
        let tax = percent_of(subtotal, tax_rate_percent);
        Self { subtotal, tax, total: subtotal + tax }
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.subtotal + self.tax
    }
}

/// Per-call billing parameters for the standard flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingOptions {
    pub currency: String,
    pub tax_rate_percent: Decimal,
}

impl BillingOptions {
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.currency.trim().is_empty() {
            return Err(BillingError::Validation("currency must not be empty".to_string()));
        }
        if self.tax_rate_percent.is_sign_negative() {
            return Err(BillingError::Validation("tax rate must not be negative".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub number: InvoiceNumber,
    pub customer_id: CustomerId,
    pub order_id: Option<OrderId>,
    pub period_from: Option<DateTime<Utc>>,
    pub period_to: Option<DateTime<Utc>>,
    pub currency: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub status: InvoiceStatus,
    pub issued_at: DateTime<Utc>,
    pub lines: Vec<InvoiceLine>,
    pub payments: Vec<Payment>,
}

impl Invoice {
    pub fn totals(&self) -> InvoiceTotals {
        InvoiceTotals { subtotal: self.subtotal, tax: self.tax, total: self.total }
    }

    pub fn remaining_balance(&self) -> Decimal {
        self.total - self.amount_paid
    }

    pub fn transition_to(&mut self, next: InvoiceStatus) -> Result<(), BillingError> {
        if self.status.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(BillingError::DomainViolation(format!(
            "invoice {} cannot move from {} to {}",
            self.number, self.status, next
        )))
    }
}

/// Everything needed to persist an invoice except its number, which the store assigns
/// inside the finalization unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvoiceDraft {
    pub id: InvoiceId,
    pub customer_id: CustomerId,
    pub order_id: Option<OrderId>,
    pub period_from: Option<DateTime<Utc>>,
    pub period_to: Option<DateTime<Utc>>,
    pub currency: String,
    pub status: InvoiceStatus,
    pub totals: InvoiceTotals,
    pub issued_at: DateTime<Utc>,
    pub lines: Vec<InvoiceLine>,
}

impl InvoiceDraft {
    pub fn into_invoice(self, number: InvoiceNumber) -> Invoice {
        Invoice {
            id: self.id,
            number,
            customer_id: self.customer_id,
            order_id: self.order_id,
            period_from: self.period_from,
            period_to: self.period_to,
            currency: self.currency,
            subtotal: self.totals.subtotal,
            tax: self.totals.tax,
            total: self.totals.total,
            amount_paid: Decimal::ZERO,
            status: self.status,
            issued_at: self.issued_at,
            lines: self.lines,
            payments: Vec::new(),
        }
    }
}
