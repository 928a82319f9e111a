//! Watch-list delta reporter
//!
//! A second, slower tick over a fixed set of product identifiers. Quantities
//! are tracked per (user, product); a change since the last sighting is
//! reported to the user's chat. The first sighting only baselines the tracker
//! (same reasoning as seeding a new monitor's last_amount).

use crate::cache::CatalogCache;
use crate::locator;
use crate::notify::Notify;
use crate::storage::Database;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct WatchlistReporter {
    db: Arc<Database>,
    cache: Arc<CatalogCache>,
    notifier: Arc<dyn Notify>,
    product_ids: Vec<String>,
    /// (user_id, product_id) -> last seen quantity; re-baselines on restart
    last_seen: parking_lot::Mutex<HashMap<(i64, String), i64>>,
    tick_running: AtomicBool,
}

impl WatchlistReporter {
    pub fn new(
        db: Arc<Database>,
        cache: Arc<CatalogCache>,
        notifier: Arc<dyn Notify>,
        product_ids: Vec<String>,
    ) -> Self {
        Self {
            db,
            cache,
            notifier,
            product_ids,
            last_seen: parking_lot::Mutex::new(HashMap::new()),
            tick_running: AtomicBool::new(false),
        }
    }

    /// One report pass. Skipped entirely when the previous one is still
    /// running (upstream slowness must not pile up tasks).
    pub async fn tick(&self) {
        if self.product_ids.is_empty() {
            return;
        }
        if self.tick_running.swap(true, Ordering::SeqCst) {
            debug!("Previous watch-list pass still running, skipping tick");
            return;
        }

        if let Err(e) = self.run_pass().await {
            warn!("Watch-list pass failed: {}", e);
        }

        self.tick_running.store(false, Ordering::SeqCst);
    }

    async fn run_pass(&self) -> crate::error::Result<()> {
        let creds = self.db.all_credentials().await?;

        for cred in creds {
            let catalog = match self.cache.fetch(&cred).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("Watch-list catalog fetch failed for user {}: {}", cred.user_id, e);
                    continue;
                }
            };

            for product_id in &self.product_ids {
                let Some(record) = locator::locate(&catalog, product_id) else {
                    continue;
                };

                let key = (cred.user_id, product_id.clone());
                let previous = self.last_seen.lock().insert(key, record.amount);

                if let Some(previous) = previous {
                    if previous != record.amount {
                        // Direct chats share the user's id
                        let _ = self
                            .notifier
                            .watch_delta(cred.user_id, &record.name, previous, record.amount)
                            .await;
                    }
                }
            }
        }

        Ok(())
    }
}
