//! Core domain types: monitors, credentials, catalog data, purchase outcomes

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    /// Waiting for stock, or re-armed after a stock-out / manual reset
    Monitoring,
    /// Stock observed, user notified, no further notification until a change
    Available,
    /// Last cycle ended with a successful auto-buy
    Purchased,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monitoring => "monitoring",
            Self::Available => "available",
            Self::Purchased => "purchased",
        }
    }
}

/// One tracked (user, product) pairing with its auto-buy configuration
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Monitor {
    pub id: i64,
    pub user_id: i64,
    /// Chat destination for notifications about this monitor
    pub chat_id: i64,
    pub product_id: String,
    pub product_name: String,
    pub product_url: String,
    pub status: MonitorStatus,
    /// Last observed live quantity
    pub last_amount: i64,
    pub auto_buy: bool,
    /// Units to purchase per scan cycle when auto-buy fires
    pub auto_buy_amount: i64,
    /// Cumulative purchase cap; 0 = unlimited
    pub buy_limit: i64,
    /// Units bought under the current limit window
    pub bought_count: i64,
    /// Wall-clock "HH:mm" at which the schedule promotes this monitor
    pub schedule_time: Option<String>,
    pub schedule_amount: i64,
    pub schedule_limit: i64,
    pub checked_at: DateTime<Utc>,
}

/// Stored shop credentials for one user
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Credential {
    pub user_id: i64,
    pub username: String,
    pub password: String,
}

/// Normalized upstream catalog: a tree of categories and their products
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub products: Vec<Product>,
}

#[derive(Debug, Clone)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// None when upstream sent no parsable price
    pub price: Option<Decimal>,
    pub amount: i64,
}

/// Result of locating a product identifier inside a catalog
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    pub price: Option<Decimal>,
    pub amount: i64,
}

/// Structured result of an upstream purchase call.
///
/// Transport errors are not represented here; they surface as `BotError::Http`
/// from the client so the engine can tell "rejected" from "unreachable".
#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseOutcome {
    /// Upstream accepted the purchase; `items` holds the acquired entries
    /// (may be empty when the payload carried no itemized data)
    Success { items: Vec<String> },
    /// Upstream returned a non-success status with a readable reason
    Rejected { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_as_str() {
        assert_eq!(MonitorStatus::Monitoring.as_str(), "monitoring");
        assert_eq!(MonitorStatus::Available.as_str(), "available");
        assert_eq!(MonitorStatus::Purchased.as_str(), "purchased");
    }

    #[test]
    fn test_status_serde_roundtrip() {
        let s = serde_json::to_string(&MonitorStatus::Available).unwrap();
        assert_eq!(s, "\"available\"");
        let back: MonitorStatus = serde_json::from_str(&s).unwrap();
        assert_eq!(back, MonitorStatus::Available);
    }
}
