//! Scan engine: the periodic monitoring / auto-buy state machine
//!
//! Each pass partitions due monitors by user, processes users concurrently
//! (at most one pass per user at a time), fetches one cached catalog per
//! user, and walks that user's monitors sequentially: re-read state, detect
//! quantity transitions, promote due schedules, notify, and run the auto-buy
//! cycle under the budget governor. No per-item or per-user failure may
//! abort the rest of the batch.

#[cfg(test)]
mod tests;

use crate::cache::CatalogCache;
use crate::client::ShopApi;
use crate::error::{BotError, Result};
use crate::governor;
use crate::locator;
use crate::notify::{DisableReason, Notify};
use crate::schedule;
use crate::storage::Database;
use crate::types::{Catalog, Credential, Monitor, MonitorStatus, PurchaseOutcome};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Counters exposed on the dashboard
#[derive(Debug, Clone, Serialize, Default)]
pub struct EngineStats {
    pub scan_passes: u64,
    pub purchases: u64,
    pub skipped_users: u64,
}

/// How a scan of one user's monitors ended. Lets a manual rescan report
/// back honestly instead of claiming success when nothing ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Monitors were fetched and walked to completion
    Processed,
    /// Another scan already holds this user's slot; this one was skipped
    AlreadyRunning,
    NoMonitors,
    NoCredentials,
    /// Credential lookup or catalog fetch failed this cycle
    FetchFailed,
}

pub struct ScanEngine {
    db: Arc<Database>,
    cache: Arc<CatalogCache>,
    shop: Arc<dyn ShopApi>,
    notifier: Arc<dyn Notify>,
    /// Users with a scan currently in flight; a later entrant skips, never queues
    active_users: parking_lot::Mutex<HashSet<i64>>,
    /// Non-reentrancy guard for the global tick
    tick_running: AtomicBool,
    tz_offset_hours: i32,
    scan_passes: AtomicU64,
    purchases: AtomicU64,
    skipped_users: AtomicU64,
}

/// Releases the per-user marker when a user's scan finishes, however it exits.
struct UserSlot {
    engine: Arc<ScanEngine>,
    user_id: i64,
}

impl Drop for UserSlot {
    fn drop(&mut self) {
        self.engine.active_users.lock().remove(&self.user_id);
    }
}

impl ScanEngine {
    pub fn new(
        db: Arc<Database>,
        cache: Arc<CatalogCache>,
        shop: Arc<dyn ShopApi>,
        notifier: Arc<dyn Notify>,
        tz_offset_hours: i32,
    ) -> Self {
        Self {
            db,
            cache,
            shop,
            notifier,
            active_users: parking_lot::Mutex::new(HashSet::new()),
            tick_running: AtomicBool::new(false),
            tz_offset_hours,
            scan_passes: AtomicU64::new(0),
            purchases: AtomicU64::new(0),
            skipped_users: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            scan_passes: self.scan_passes.load(Ordering::Relaxed),
            purchases: self.purchases.load(Ordering::Relaxed),
            skipped_users: self.skipped_users.load(Ordering::Relaxed),
        }
    }

    /// One global scan pass over all monitors in the system. Skipped entirely
    /// (not queued) when the previous pass is still running.
    pub async fn tick(self: &Arc<Self>) {
        if self.tick_running.swap(true, Ordering::SeqCst) {
            debug!("Previous scan pass still running, skipping tick");
            return;
        }

        if let Err(e) = self.run_pass().await {
            warn!("Scan pass failed to start: {}", e);
        }

        self.tick_running.store(false, Ordering::SeqCst);
    }

    async fn run_pass(self: &Arc<Self>) -> Result<()> {
        let monitors = self.db.all_monitors().await?;
        if monitors.is_empty() {
            return Ok(());
        }

        let mut by_user: HashMap<i64, Vec<Monitor>> = HashMap::new();
        for m in monitors {
            by_user.entry(m.user_id).or_default().push(m);
        }

        let mut set = JoinSet::new();
        for (user_id, user_monitors) in by_user {
            let engine = self.clone();
            set.spawn(async move {
                engine.process_user(user_id, user_monitors).await;
            });
        }
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!("User scan task panicked: {}", e);
            }
        }

        self.scan_passes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Manual rescan of one user's monitors (triggered by a chat command).
    /// Shares the per-user marker with the global tick, so it is a no-op when
    /// that user is already being scanned.
    pub async fn scan_user(self: &Arc<Self>, user_id: i64) -> ScanOutcome {
        let monitors = match self.db.monitors_for_user(user_id).await {
            Ok(ms) => ms,
            Err(e) => {
                warn!("Failed to load monitors for user {}: {}", user_id, e);
                return ScanOutcome::FetchFailed;
            }
        };
        if monitors.is_empty() {
            return ScanOutcome::NoMonitors;
        }
        self.clone().process_user(user_id, monitors).await
    }

    fn try_lock_user(self: &Arc<Self>, user_id: i64) -> Option<UserSlot> {
        if self.active_users.lock().insert(user_id) {
            Some(UserSlot {
                engine: self.clone(),
                user_id,
            })
        } else {
            None
        }
    }

    async fn process_user(self: Arc<Self>, user_id: i64, monitors: Vec<Monitor>) -> ScanOutcome {
        let Some(_slot) = self.try_lock_user(user_id) else {
            debug!("User {} already being scanned, skipping", user_id);
            self.skipped_users.fetch_add(1, Ordering::Relaxed);
            return ScanOutcome::AlreadyRunning;
        };

        let cred = match self.db.get_credential(user_id).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                debug!("User {} has no stored credentials, skipping", user_id);
                return ScanOutcome::NoCredentials;
            }
            Err(e) => {
                warn!("Credential lookup failed for user {}: {}", user_id, e);
                return ScanOutcome::FetchFailed;
            }
        };

        // One catalog fetch amortized across all of this user's monitors
        let catalog = match self.cache.fetch(&cred).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Catalog fetch failed for user {}: {}", user_id, e);
                return ScanOutcome::FetchFailed;
            }
        };

        for m in monitors {
            if let Err(e) = self.process_monitor(&catalog, &cred, m.id).await {
                warn!("Monitor {} processing failed: {}", m.id, e);
            }
        }

        ScanOutcome::Processed
    }

    async fn process_monitor(
        &self,
        catalog: &Catalog,
        cred: &Credential,
        monitor_id: i64,
    ) -> Result<()> {
        // Re-read immediately before acting: the row may have been mutated or
        // deleted by a user command since the batch was selected.
        let Some(mut monitor) = self.db.get_monitor(monitor_id).await? else {
            return Ok(());
        };

        if let Some(schedule_time) = monitor.schedule_time.clone() {
            let now = schedule::local_now(self.tz_offset_hours);
            if schedule::due(&schedule_time, now) && self.db.promote_schedule(monitor.id).await? {
                let _ = self
                    .notifier
                    .schedule_activated(
                        monitor.chat_id,
                        &monitor.product_name,
                        monitor.schedule_amount,
                        monitor.schedule_limit,
                    )
                    .await;
                // Evaluate the promoted config in this same pass
                monitor = self
                    .db
                    .get_monitor(monitor.id)
                    .await?
                    .ok_or(BotError::MonitorNotFound(monitor.id))?;
            }
        }

        let Some(record) = locator::locate(catalog, &monitor.product_id) else {
            return Ok(());
        };

        let current = record.amount;
        let previous = monitor.last_amount;

        if current == 0 {
            if previous > 0 {
                let _ = self
                    .notifier
                    .out_of_stock(monitor.chat_id, &monitor.product_name)
                    .await;
                self.db
                    .set_scan_state(monitor.id, MonitorStatus::Monitoring, 0)
                    .await?;
            } else {
                // Still exhausted, no repeat notification
                self.db.touch_checked(monitor.id).await?;
            }
            return Ok(());
        }

        // Fires on transition into a non-zero state, regardless of auto-buy
        if previous == 0 || monitor.status == MonitorStatus::Monitoring {
            let _ = self
                .notifier
                .restock(
                    monitor.chat_id,
                    &monitor.product_name,
                    &monitor.product_url,
                    current,
                )
                .await;
        }

        if monitor.auto_buy {
            self.auto_buy_cycle(&monitor, cred, current).await?;
        } else if current != previous || monitor.status == MonitorStatus::Monitoring {
            self.db
                .set_scan_state(monitor.id, MonitorStatus::Available, current)
                .await?;
        } else {
            self.db.touch_checked(monitor.id).await?;
        }

        Ok(())
    }

    async fn auto_buy_cycle(&self, monitor: &Monitor, cred: &Credential, current: i64) -> Result<()> {
        let quota = governor::compute_purchase_qty(
            monitor.auto_buy_amount,
            monitor.buy_limit,
            monitor.bought_count,
            current,
        );

        if quota.disable_now {
            self.db.disable_auto_buy(monitor.id).await?;
            let _ = self
                .notifier
                .auto_buy_disabled(monitor.chat_id, &monitor.product_name, DisableReason::LimitReached)
                .await;
            self.db.touch_checked(monitor.id).await?;
            return Ok(());
        }

        if quota.qty == 0 {
            self.db.touch_checked(monitor.id).await?;
            return Ok(());
        }

        // The purchase, once issued, is awaited to completion before this
        // monitor's cycle state is finalized.
        match self
            .shop
            .purchase(cred, &monitor.product_id, quota.qty)
            .await
        {
            Ok(PurchaseOutcome::Success { items }) => {
                let new_count = monitor.bought_count + quota.qty;
                let limit_met = monitor.buy_limit > 0 && new_count >= monitor.buy_limit;
                self.db
                    .record_purchase(monitor.id, quota.qty, current, limit_met)
                    .await?;
                self.purchases.fetch_add(1, Ordering::Relaxed);
                let _ = self
                    .notifier
                    .purchase_success(monitor.chat_id, &monitor.product_name, quota.qty, &items)
                    .await;
                if limit_met {
                    let _ = self
                        .notifier
                        .auto_buy_disabled(
                            monitor.chat_id,
                            &monitor.product_name,
                            DisableReason::LimitReached,
                        )
                        .await;
                }
            }
            Ok(PurchaseOutcome::Rejected { message }) => {
                if governor::is_low_balance(&message) {
                    self.db.disable_auto_buy(monitor.id).await?;
                    let _ = self
                        .notifier
                        .auto_buy_disabled(
                            monitor.chat_id,
                            &monitor.product_name,
                            DisableReason::InsufficientBalance,
                        )
                        .await;
                } else {
                    self.db.set_last_amount(monitor.id, current).await?;
                    let _ = self
                        .notifier
                        .purchase_failure(monitor.chat_id, &monitor.product_name, &message)
                        .await;
                }
            }
            Err(e) => {
                // Transient transport fault: keep auto-buy armed, retry next tick
                warn!("Purchase transport error for monitor {}: {}", monitor.id, e);
                self.db.set_last_amount(monitor.id, current).await?;
            }
        }

        Ok(())
    }
}
