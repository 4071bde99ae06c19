use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use loadorder_core::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    #[default]
    Collection,
    Delivery,
    Transfer,
    Return,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Header fields of a loading order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHeader {
    /// Human-readable order number; also the key used to read the order back.
    pub order_number: String,
    pub movement: MovementType,
    pub subtype: Option<String>,
    pub priority: Priority,
    pub loading_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub notes: String,
}

impl OrderHeader {
    pub fn new(order_number: impl Into<String>) -> Self {
        Self {
            order_number: order_number.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.order_number.trim().is_empty() {
            return Err(DomainError::validation("order number is required"));
        }
        if let (Some(loading), Some(delivery)) = (self.loading_date, self.delivery_date) {
            if delivery < loading {
                return Err(DomainError::validation(format!(
                    "delivery date {delivery} is before loading date {loading}"
                )));
            }
        }
        Ok(())
    }
}
