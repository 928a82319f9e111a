//! Scan engine behavior tests against in-memory fakes

use super::*;
use crate::cache::CatalogCache;
use crate::storage::NewMonitor;
use crate::types::{Catalog, Category, Product};
use async_trait::async_trait;
use chrono::Timelike;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::time::Duration;

const PRODUCT_ID: &str = "101";

struct FakeShop {
    catalog: Mutex<Catalog>,
    purchase_results: Mutex<VecDeque<Result<PurchaseOutcome>>>,
    catalog_calls: AtomicU64,
    purchase_calls: AtomicU64,
    fetch_delay: Duration,
}

impl FakeShop {
    fn new(amount: i64) -> Self {
        Self {
            catalog: Mutex::new(make_catalog(amount)),
            purchase_results: Mutex::new(VecDeque::new()),
            catalog_calls: AtomicU64::new(0),
            purchase_calls: AtomicU64::new(0),
            fetch_delay: Duration::ZERO,
        }
    }

    fn set_amount(&self, amount: i64) {
        *self.catalog.lock() = make_catalog(amount);
    }

    fn queue_purchase(&self, result: Result<PurchaseOutcome>) {
        self.purchase_results.lock().push_back(result);
    }
}

fn make_catalog(amount: i64) -> Catalog {
    Catalog {
        categories: vec![Category {
            id: "10".into(),
            name: "Accounts".into(),
            products: vec![Product {
                id: PRODUCT_ID.into(),
                name: "Test item".into(),
                price: Some(dec!(10)),
                amount,
            }],
        }],
    }
}

#[async_trait]
impl ShopApi for FakeShop {
    async fn fetch_catalog(&self, _cred: &Credential) -> Result<Catalog> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        Ok(self.catalog.lock().clone())
    }

    async fn fetch_balance(&self, _cred: &Credential) -> Result<String> {
        Ok("100,00 ₽".into())
    }

    async fn purchase(
        &self,
        _cred: &Credential,
        _product_id: &str,
        _amount: i64,
    ) -> Result<PurchaseOutcome> {
        self.purchase_calls.fetch_add(1, Ordering::SeqCst);
        self.purchase_results
            .lock()
            .pop_front()
            .unwrap_or(Ok(PurchaseOutcome::Success { items: vec![] }))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Restock { amount: i64 },
    OutOfStock,
    ScheduleActivated { amount: i64, limit: i64 },
    PurchaseSuccess { qty: i64, items: Vec<String> },
    PurchaseFailure(String),
    Disabled(DisableReason),
    WatchDelta { previous: i64, current: i64 },
    Sent(String),
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn push(&self, e: Event) {
        self.events.lock().push(e);
    }
}

#[async_trait]
impl Notify for RecordingNotifier {
    async fn send_to(&self, _chat_id: i64, text: &str) -> Result<()> {
        self.push(Event::Sent(text.to_string()));
        Ok(())
    }

    async fn restock(&self, _chat_id: i64, _name: &str, _url: &str, amount: i64) -> Result<()> {
        self.push(Event::Restock { amount });
        Ok(())
    }

    async fn out_of_stock(&self, _chat_id: i64, _name: &str) -> Result<()> {
        self.push(Event::OutOfStock);
        Ok(())
    }

    async fn schedule_activated(&self, _chat_id: i64, _name: &str, amount: i64, limit: i64) -> Result<()> {
        self.push(Event::ScheduleActivated { amount, limit });
        Ok(())
    }

    async fn purchase_success(&self, _chat_id: i64, _name: &str, qty: i64, items: &[String]) -> Result<()> {
        self.push(Event::PurchaseSuccess {
            qty,
            items: items.to_vec(),
        });
        Ok(())
    }

    async fn purchase_failure(&self, _chat_id: i64, _name: &str, detail: &str) -> Result<()> {
        self.push(Event::PurchaseFailure(detail.to_string()));
        Ok(())
    }

    async fn auto_buy_disabled(&self, _chat_id: i64, _name: &str, reason: DisableReason) -> Result<()> {
        self.push(Event::Disabled(reason));
        Ok(())
    }

    async fn watch_delta(&self, _chat_id: i64, _name: &str, previous: i64, current: i64) -> Result<()> {
        self.push(Event::WatchDelta { previous, current });
        Ok(())
    }
}

struct Harness {
    db: Arc<Database>,
    shop: Arc<FakeShop>,
    notifier: Arc<RecordingNotifier>,
    engine: Arc<ScanEngine>,
    _file: tempfile::NamedTempFile,
}

async fn setup(shop: FakeShop) -> Harness {
    let file = tempfile::NamedTempFile::new().unwrap();
    let db = Arc::new(
        Database::connect(file.path().to_str().unwrap())
            .await
            .unwrap(),
    );
    let shop = Arc::new(shop);
    let notifier = Arc::new(RecordingNotifier::default());
    // Zero TTL so each tick observes the fake's current catalog
    let cache = Arc::new(CatalogCache::new(shop.clone(), Duration::ZERO));
    let engine = Arc::new(ScanEngine::new(
        db.clone(),
        cache,
        shop.clone(),
        notifier.clone(),
        0,
    ));
    Harness {
        db,
        shop,
        notifier,
        engine,
        _file: file,
    }
}

async fn track(h: &Harness, user_id: i64, last_amount: i64) -> Monitor {
    h.db.upsert_credential(user_id, "alice", "pw").await.unwrap();
    h.db.create_monitor(&NewMonitor {
        user_id,
        chat_id: user_id,
        product_id: PRODUCT_ID.into(),
        product_name: "Test item".into(),
        product_url: "https://shop.example/item/101".into(),
        last_amount,
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_stock_out_notifies_exactly_once() {
    let h = setup(FakeShop::new(0)).await;
    let m = track(&h, 1, 5).await;

    h.engine.tick().await;
    assert_eq!(h.notifier.events(), vec![Event::OutOfStock]);

    let m2 = h.db.get_monitor(m.id).await.unwrap().unwrap();
    assert_eq!(m2.status, MonitorStatus::Monitoring);
    assert_eq!(m2.last_amount, 0);

    // Item stays at zero: no repeat spam
    h.engine.tick().await;
    assert_eq!(h.notifier.events().len(), 1);
}

#[tokio::test]
async fn test_restock_without_auto_buy() {
    let h = setup(FakeShop::new(5)).await;
    let m = track(&h, 1, 0).await;

    h.engine.tick().await;

    assert_eq!(h.notifier.events(), vec![Event::Restock { amount: 5 }]);
    assert_eq!(h.shop.purchase_calls.load(Ordering::SeqCst), 0);

    let m2 = h.db.get_monitor(m.id).await.unwrap().unwrap();
    assert_eq!(m2.status, MonitorStatus::Available);
    assert_eq!(m2.last_amount, 5);

    // Unchanged quantity: quiet cycle
    h.engine.tick().await;
    assert_eq!(h.notifier.events().len(), 1);
}

#[tokio::test]
async fn test_available_quantity_change_updates_without_notification() {
    let h = setup(FakeShop::new(5)).await;
    let m = track(&h, 1, 0).await;
    h.engine.tick().await;

    h.shop.set_amount(7);
    h.engine.tick().await;

    // Only the original restock notification
    assert_eq!(h.notifier.events().len(), 1);
    let m2 = h.db.get_monitor(m.id).await.unwrap().unwrap();
    assert_eq!(m2.last_amount, 7);
    assert_eq!(m2.status, MonitorStatus::Available);
}

#[tokio::test]
async fn test_auto_buy_clamped_to_remaining_budget() {
    let h = setup(FakeShop::new(20)).await;
    let m = track(&h, 1, 20).await;
    h.db.set_auto_buy(m.id, 1, 10, 12).await.unwrap();
    // 5 already bought under this window
    h.db.record_purchase(m.id, 5, 20, false).await.unwrap();
    h.shop.queue_purchase(Ok(PurchaseOutcome::Success {
        items: vec!["acc1".into()],
    }));

    h.engine.tick().await;

    // min(10, 12-5, 20) = 7, then limit met and auto-buy forced off
    assert_eq!(
        h.notifier.events(),
        vec![
            Event::PurchaseSuccess {
                qty: 7,
                items: vec!["acc1".into()]
            },
            Event::Disabled(DisableReason::LimitReached),
        ]
    );

    let m2 = h.db.get_monitor(m.id).await.unwrap().unwrap();
    assert_eq!(m2.bought_count, 12);
    assert!(!m2.auto_buy);
    assert_eq!(m2.status, MonitorStatus::Purchased);
    assert_eq!(m2.last_amount, 20);
}

#[tokio::test]
async fn test_auto_buy_exhausted_limit_is_terminal() {
    let h = setup(FakeShop::new(20)).await;
    let m = track(&h, 1, 20).await;
    h.db.set_auto_buy(m.id, 1, 10, 5).await.unwrap();
    h.db.record_purchase(m.id, 5, 20, false).await.unwrap();

    h.engine.tick().await;

    // No purchase call at all; just the disable
    assert_eq!(h.shop.purchase_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.notifier.events(),
        vec![Event::Disabled(DisableReason::LimitReached)]
    );
    let m2 = h.db.get_monitor(m.id).await.unwrap().unwrap();
    assert!(!m2.auto_buy);
}

#[tokio::test]
async fn test_low_balance_rejection_disables_auto_buy() {
    let h = setup(FakeShop::new(5)).await;
    let m = track(&h, 1, 5).await;
    h.db.set_auto_buy(m.id, 1, 2, 0).await.unwrap();
    h.db.set_scan_state(m.id, MonitorStatus::Available, 5)
        .await
        .unwrap();
    h.shop.queue_purchase(Ok(PurchaseOutcome::Rejected {
        message: "Недостаточно средств".into(),
    }));

    h.engine.tick().await;

    assert_eq!(h.shop.purchase_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.notifier.events(),
        vec![Event::Disabled(DisableReason::InsufficientBalance)]
    );
    let m2 = h.db.get_monitor(m.id).await.unwrap().unwrap();
    assert!(!m2.auto_buy);
}

#[tokio::test]
async fn test_other_rejection_keeps_auto_buy_armed() {
    let h = setup(FakeShop::new(5)).await;
    let m = track(&h, 1, 5).await;
    h.db.set_auto_buy(m.id, 1, 2, 0).await.unwrap();
    h.db.set_scan_state(m.id, MonitorStatus::Available, 3)
        .await
        .unwrap();
    h.shop.queue_purchase(Ok(PurchaseOutcome::Rejected {
        message: "item reserved".into(),
    }));

    h.engine.tick().await;

    assert_eq!(
        h.notifier.events(),
        vec![Event::PurchaseFailure("item reserved".into())]
    );
    let m2 = h.db.get_monitor(m.id).await.unwrap().unwrap();
    assert!(m2.auto_buy);
    // Quantity still refreshed
    assert_eq!(m2.last_amount, 5);
}

#[tokio::test]
async fn test_transport_error_retries_next_cycle() {
    let h = setup(FakeShop::new(5)).await;
    let m = track(&h, 1, 5).await;
    h.db.set_auto_buy(m.id, 1, 2, 0).await.unwrap();
    h.db.set_scan_state(m.id, MonitorStatus::Available, 3)
        .await
        .unwrap();
    h.shop
        .queue_purchase(Err(BotError::Shop("connection reset".into())));

    h.engine.tick().await;

    // No notification, no disable; quantity refreshed
    assert!(h.notifier.events().is_empty());
    let m2 = h.db.get_monitor(m.id).await.unwrap().unwrap();
    assert!(m2.auto_buy);
    assert_eq!(m2.last_amount, 5);
}

#[tokio::test]
async fn test_schedule_promotion_evaluated_same_pass() {
    let h = setup(FakeShop::new(5)).await;
    let m = track(&h, 1, 5).await;

    // Avoid racing the minute boundary
    let now = schedule::local_now(0);
    if now.second() >= 57 {
        tokio::time::sleep(Duration::from_secs(4)).await;
    }
    let now = schedule::local_now(0);
    let hhmm = format!("{:02}:{:02}", now.hour(), now.minute());
    h.db.set_schedule(m.id, 1, &hhmm, 2, 4).await.unwrap();
    h.shop.queue_purchase(Ok(PurchaseOutcome::Success {
        items: vec!["a".into(), "b".into()],
    }));

    h.engine.tick().await;

    // Promotion resets status to monitoring, so the restock notification and
    // the auto-buy both fire in the same pass
    assert_eq!(
        h.notifier.events(),
        vec![
            Event::ScheduleActivated { amount: 2, limit: 4 },
            Event::Restock { amount: 5 },
            Event::PurchaseSuccess {
                qty: 2,
                items: vec!["a".into(), "b".into()]
            },
        ]
    );

    let m2 = h.db.get_monitor(m.id).await.unwrap().unwrap();
    assert!(m2.auto_buy);
    assert!(m2.schedule_time.is_none());
    assert_eq!(m2.auto_buy_amount, 2);
    assert_eq!(m2.buy_limit, 4);
    assert_eq!(m2.bought_count, 2);
}

#[tokio::test]
async fn test_schedule_not_due_leaves_monitor_alone() {
    let h = setup(FakeShop::new(5)).await;
    let m = track(&h, 1, 5).await;

    let now = schedule::local_now(0);
    let other_minute = format!("{:02}:{:02}", (now.hour() + 1) % 24, now.minute());
    h.db.set_schedule(m.id, 1, &other_minute, 2, 4).await.unwrap();

    h.engine.tick().await;

    let m2 = h.db.get_monitor(m.id).await.unwrap().unwrap();
    assert!(!m2.auto_buy);
    assert_eq!(m2.schedule_time, Some(other_minute));
}

#[tokio::test]
async fn test_concurrent_scans_same_user_at_most_one_processes() {
    let mut shop = FakeShop::new(5);
    shop.fetch_delay = Duration::from_millis(100);
    let h = setup(shop).await;
    let m = track(&h, 1, 5).await;
    h.db.set_auto_buy(m.id, 1, 1, 0).await.unwrap();
    h.db.set_scan_state(m.id, MonitorStatus::Available, 5)
        .await
        .unwrap();

    let e1 = h.engine.clone();
    let e2 = h.engine.clone();
    let (a, b) = tokio::join!(e1.scan_user(1), e2.scan_user(1));

    // The later entrant was skipped, not queued; either side may win the slot
    let mut outcomes = [a, b];
    outcomes.sort_by_key(|o| *o == ScanOutcome::Processed);
    assert_eq!(outcomes, [ScanOutcome::AlreadyRunning, ScanOutcome::Processed]);
    assert_eq!(h.shop.purchase_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.stats().skipped_users, 1);
}

#[tokio::test]
async fn test_manual_rescan_reports_why_nothing_ran() {
    let h = setup(FakeShop::new(5)).await;

    assert_eq!(h.engine.scan_user(1).await, ScanOutcome::NoMonitors);

    h.db.create_monitor(&NewMonitor {
        user_id: 1,
        chat_id: 1,
        product_id: PRODUCT_ID.into(),
        product_name: "Test item".into(),
        product_url: "u".into(),
        last_amount: 5,
    })
    .await
    .unwrap();
    assert_eq!(h.engine.scan_user(1).await, ScanOutcome::NoCredentials);

    h.db.upsert_credential(1, "alice", "pw").await.unwrap();
    assert_eq!(h.engine.scan_user(1).await, ScanOutcome::Processed);
}

#[tokio::test]
async fn test_user_without_credentials_is_skipped() {
    let h = setup(FakeShop::new(5)).await;
    h.db.create_monitor(&NewMonitor {
        user_id: 9,
        chat_id: 9,
        product_id: PRODUCT_ID.into(),
        product_name: "Test item".into(),
        product_url: "u".into(),
        last_amount: 0,
    })
    .await
    .unwrap();

    h.engine.tick().await;

    assert_eq!(h.shop.catalog_calls.load(Ordering::SeqCst), 0);
    assert!(h.notifier.events().is_empty());
}

#[tokio::test]
async fn test_monitor_deleted_mid_batch_is_skipped() {
    let h = setup(FakeShop::new(5)).await;
    let m = track(&h, 1, 0).await;
    h.db.delete_monitor(m.id, 1).await.unwrap();
    // Credential remains; monitor listing is empty so the user is not scanned
    h.engine.tick().await;
    assert!(h.notifier.events().is_empty());
}

#[tokio::test]
async fn test_unlisted_product_is_no_state_change() {
    let h = setup(FakeShop::new(5)).await;
    h.db.upsert_credential(1, "alice", "pw").await.unwrap();
    let m = h
        .db
        .create_monitor(&NewMonitor {
            user_id: 1,
            chat_id: 1,
            product_id: "absent".into(),
            product_name: "Ghost".into(),
            product_url: "u".into(),
            last_amount: 3,
        })
        .await
        .unwrap();

    h.engine.tick().await;

    assert!(h.notifier.events().is_empty());
    let m2 = h.db.get_monitor(m.id).await.unwrap().unwrap();
    assert_eq!(m2.last_amount, 3);
    assert_eq!(m2.status, MonitorStatus::Monitoring);
}
