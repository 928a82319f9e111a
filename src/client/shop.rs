//! HTTP client for the shop API
//!
//! Upstream payloads are loosely typed (ids and amounts arrive as strings or
//! numbers, purchase data as a list, a delimited string, or nothing), so
//! everything is normalized at this boundary. A shape deviation degrades to
//! empty/zero values rather than propagating as an error into the engine.

use crate::client::ShopApi;
use crate::config::ShopConfig;
use crate::error::{BotError, Result};
use crate::types::{Catalog, Category, Credential, Product, PurchaseOutcome};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// HTTP client for the shop API
#[derive(Clone)]
pub struct ShopClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    categories: Vec<RawCategory>,
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    id: Option<Value>,
    name: Option<String>,
    #[serde(default)]
    accounts: Vec<RawProduct>,
}

#[derive(Debug, Deserialize)]
struct RawProduct {
    id: Option<Value>,
    name: Option<String>,
    price: Option<Value>,
    amount: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawPurchase {
    status: Option<String>,
    message: Option<String>,
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    balance: Option<Value>,
}

impl ShopClient {
    pub fn new(config: &ShopConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn parse_catalog(raw: RawCatalog) -> Catalog {
        let categories = raw
            .categories
            .into_iter()
            .filter_map(|rc| {
                let id = value_to_id(rc.id.as_ref())?;
                Some(Category {
                    id,
                    name: rc.name.unwrap_or_default(),
                    products: rc
                        .accounts
                        .into_iter()
                        .filter_map(|rp| {
                            let id = value_to_id(rp.id.as_ref())?;
                            Some(Product {
                                id,
                                name: rp.name.unwrap_or_default(),
                                price: rp.price.as_ref().and_then(value_to_price),
                                amount: rp.amount.as_ref().map(value_to_amount).unwrap_or(0),
                            })
                        })
                        .collect(),
                })
            })
            .collect();

        Catalog { categories }
    }

    /// Extract itemized entries from a purchase `data` payload.
    fn parse_items(data: Option<&Value>) -> Vec<String> {
        match data {
            Some(Value::Array(entries)) => entries
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::String(s)) => {
                let lines: Vec<String> = s
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect();
                if lines.is_empty() && !s.trim().is_empty() {
                    vec![s.trim().to_string()]
                } else {
                    lines
                }
            }
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl ShopApi for ShopClient {
    async fn fetch_catalog(&self, cred: &Credential) -> Result<Catalog> {
        let url = format!("{}/api/catalog", self.base_url);
        let raw: RawCatalog = self
            .http
            .get(&url)
            .query(&[
                ("username", cred.username.as_str()),
                ("password", cred.password.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        let catalog = Self::parse_catalog(raw);
        debug!(
            "Fetched catalog: {} categories for {}",
            catalog.categories.len(),
            cred.username
        );
        Ok(catalog)
    }

    async fn fetch_balance(&self, cred: &Credential) -> Result<String> {
        let url = format!("{}/api/balance", self.base_url);
        let raw: RawBalance = self
            .http
            .get(&url)
            .query(&[
                ("username", cred.username.as_str()),
                ("password", cred.password.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        match raw.balance {
            Some(Value::String(s)) => Ok(s),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(BotError::Payload("balance missing from response".into())),
        }
    }

    async fn purchase(
        &self,
        cred: &Credential,
        product_id: &str,
        amount: i64,
    ) -> Result<PurchaseOutcome> {
        let url = format!("{}/api/purchase", self.base_url);
        let raw: RawPurchase = self
            .http
            .get(&url)
            .query(&[
                ("username", cred.username.as_str()),
                ("password", cred.password.as_str()),
                ("id", product_id),
                ("amount", &amount.to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if raw.status.as_deref() == Some("success") {
            Ok(PurchaseOutcome::Success {
                items: Self::parse_items(raw.data.as_ref()),
            })
        } else {
            Ok(PurchaseOutcome::Rejected {
                message: raw
                    .message
                    .or(raw.status)
                    .unwrap_or_else(|| "unknown upstream failure".to_string()),
            })
        }
    }
}

fn value_to_id(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_amount(v: &Value) -> i64 {
    match v {
        Value::Number(n) => n.as_i64().unwrap_or(0).max(0),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0).max(0),
        _ => 0,
    }
}

fn value_to_price(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => crate::governor::parse_currency(s),
        _ => None,
    }
}
