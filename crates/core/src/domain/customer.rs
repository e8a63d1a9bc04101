use serde::{Deserialize, Serialize};

use crate::domain::uuid_id;

uuid_id!(CustomerId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    Active,
    Inactive,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub status: CustomerStatus,
}

impl Customer {
    pub fn active(name: impl Into<String>) -> Self {
        Self { id: CustomerId::new(), name: name.into(), status: CustomerStatus::Active }
    }

    pub fn is_active(&self) -> bool {
        self.status == CustomerStatus::Active
    }
}
