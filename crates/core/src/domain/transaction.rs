use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;
use crate::domain::invoice::InvoiceId;
use crate::domain::service::ServiceType;
use crate::domain::uuid_id;

uuid_id!(TransactionId);

/// A recorded billable fact. Once `billed` is set it carries the consuming invoice id and
/// is never modified again, except by cancelling that invoice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbilledTransaction {
    pub id: TransactionId,
    pub customer_id: CustomerId,
    pub service_type: ServiceType,
    pub description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub rate: Decimal,
    pub amount: Decimal,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub billed: bool,
    pub invoice_id: Option<InvoiceId>,
    pub created_at: DateTime<Utc>,
}

impl UnbilledTransaction {
    pub fn is_billable(&self) -> bool {
        !self.billed && self.invoice_id.is_none()
    }
}

/// Operational domains that feed the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    Receipt,
    Picking,
    Packing,
    Storage,
    Delivery,
    InventoryAdjustment,
}

const SOURCE_TABLE: &[(TransactionSource, ServiceType, &str)] = &[
    (TransactionSource::Receipt, ServiceType::Receiving, "Receiving"),
    (TransactionSource::Picking, ServiceType::Picking, "Picking"),
    (TransactionSource::Packing, ServiceType::Packing, "Packing"),
    (TransactionSource::Storage, ServiceType::Storage, "Storage"),
    (TransactionSource::Delivery, ServiceType::Delivery, "Delivery"),
    (TransactionSource::InventoryAdjustment, ServiceType::Adjustment, "Inventory adjustment"),
];

impl TransactionSource {
    fn entry(self) -> (ServiceType, &'static str) {
        SOURCE_TABLE
            .iter()
            .find(|(source, _, _)| *source == self)
            .map(|(_, service, label)| (*service, *label))
            .unwrap_or((ServiceType::Adjustment, "Adjustment"))
    }

    pub fn service_type(self) -> ServiceType {
        self.entry().0
    }

    pub fn describe(self, reference: &str) -> String {
        let label = self.entry().1;
        let reference = reference.trim();
        if reference.is_empty() {
            label.to_string()
        } else {
            format!("{label} - {reference}")
        }
    }
}

/// Inbound request from an operational collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub customer_id: CustomerId,
    pub source: TransactionSource,
    pub reference: String,
    pub quantity: Decimal,
    pub unit: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}
