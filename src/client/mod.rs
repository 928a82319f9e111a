//! Upstream shop API client

mod shop;

pub use shop::ShopClient;

use crate::error::Result;
use crate::types::{Catalog, Credential, PurchaseOutcome};
use async_trait::async_trait;

/// Seam over the upstream shop API.
///
/// The scan engine and catalog cache depend on this trait rather than the
/// concrete HTTP client so they can be exercised against in-memory fakes.
#[async_trait]
pub trait ShopApi: Send + Sync {
    /// Fetch the full category/product catalog visible to this credential.
    async fn fetch_catalog(&self, cred: &Credential) -> Result<Catalog>;

    /// Fetch the account balance as the raw locale-formatted upstream string.
    async fn fetch_balance(&self, cred: &Credential) -> Result<String>;

    /// Purchase `amount` units of a product. A transport fault is an `Err`;
    /// a structured upstream rejection is `Ok(PurchaseOutcome::Rejected)`.
    async fn purchase(
        &self,
        cred: &Credential,
        product_id: &str,
        amount: i64,
    ) -> Result<PurchaseOutcome>;
}
