use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;
use crate::domain::uuid_id;

uuid_id!(OrderId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerType {
    ClientOwned,
    PurchaseForClient,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientOwned => "CLIENT_OWNED",
            Self::PurchaseForClient => "PURCHASE_FOR_CLIENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CLIENT_OWNED" => Some(Self::ClientOwned),
            "PURCHASE_FOR_CLIENT" => Some(Self::PurchaseForClient),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Picked,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Picked => "PICKED",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "PICKED" => Some(Self::Picked),
            "SHIPPED" => Some(Self::Shipped),
            "DELIVERED" => Some(Self::Delivered),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_sale_price: Option<Decimal>,
}

impl OrderLine {
    /// Sale price only counts when set and positive.
    pub fn sale_price(&self) -> Option<Decimal> {
        self.unit_sale_price.filter(|price| *price > Decimal::ZERO)
    }
}

/// Order as seen by billing; owned and mutated by the order-management collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub reference: String,
    pub owner_type_effective: OwnerType,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_purchase_for_client(&self) -> bool {
        self.owner_type_effective == OwnerType::PurchaseForClient
    }
}
