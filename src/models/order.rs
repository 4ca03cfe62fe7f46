use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::user::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    Online,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    OutForDelivery,
    Delivered,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
        }
    }

    /// The only status an order may move to next; `None` once delivered.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::OutForDelivery),
            OrderStatus::OutForDelivery => Some(OrderStatus::Delivered),
            OrderStatus::Delivered => None,
        }
    }

    pub fn can_advance_to(&self, target: OrderStatus) -> bool {
        self.next() == Some(target)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "out_for_delivery" => Ok(OrderStatus::OutForDelivery),
            "delivered" => Ok(OrderStatus::Delivered),
            other => Err(AppError::BadRequest(format!(
                "unknown status: {other}, expected pending/out_for_delivery/delivered"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: f64,
    pub unit: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub full_name: String,
    pub mobile: String,
    pub full_address: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub items: Vec<LineItem>,
    pub total_amount: f64,
    pub payment_method: PaymentMethod,
    pub is_paid: bool,
    pub address: DeliveryAddress,
    pub status: OrderStatus,
    pub assignment: Option<Uuid>,
    pub assigned_driver: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::OrderStatus;

    #[test]
    fn status_only_advances_one_step() {
        assert!(OrderStatus::Pending.can_advance_to(OrderStatus::OutForDelivery));
        assert!(OrderStatus::OutForDelivery.can_advance_to(OrderStatus::Delivered));

        assert!(!OrderStatus::Pending.can_advance_to(OrderStatus::Delivered));
        assert!(!OrderStatus::OutForDelivery.can_advance_to(OrderStatus::Pending));
        assert!(!OrderStatus::Delivered.can_advance_to(OrderStatus::OutForDelivery));
        assert!(!OrderStatus::Pending.can_advance_to(OrderStatus::Pending));
    }

    #[test]
    fn delivered_is_terminal() {
        assert_eq!(OrderStatus::Delivered.next(), None);
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!(
            "out_for_delivery".parse::<OrderStatus>().unwrap(),
            OrderStatus::OutForDelivery
        );
        assert!("out of delivery".parse::<OrderStatus>().is_err());
        assert!("Delivered".parse::<OrderStatus>().is_err());
    }
}
