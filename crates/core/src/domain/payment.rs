use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::invoice::InvoiceId;
use crate::domain::uuid_id;

uuid_id!(PaymentId);

pub const REFUND_METHOD_PREFIX: &str = "REFUND_";

/// Immutable payment record. Refunds are separate records with a negative amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub invoice_id: InvoiceId,
    pub method: String,
    pub amount: Decimal,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub refund_of: Option<PaymentId>,
}

impl Payment {
    pub fn is_refund(&self) -> bool {
        self.refund_of.is_some() || self.amount.is_sign_negative()
    }

    pub fn refund_method(&self) -> String {
        format!("{REFUND_METHOD_PREFIX}{}", self.method.trim().to_ascii_uppercase())
    }
}

/// Net paid amount over a set of payments; refunds subtract.
pub fn total_paid<'a>(payments: impl IntoIterator<Item = &'a Payment>) -> Decimal {
    payments.into_iter().map(|payment| payment.amount).sum()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPayment {
    pub method: String,
    pub amount: Decimal,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}
