//! Auto-buy budget governor
//!
//! Pure decision logic for how many units a scan cycle may purchase, and
//! whether auto-buy must be disabled afterwards. Keeping this free of I/O
//! makes the limit arithmetic trivially testable.

use rust_decimal::Decimal;

/// Phrases in upstream rejection messages that indicate the account balance
/// could not cover the purchase.
const LOW_BALANCE_MARKERS: &[&str] = &["insufficient", "not enough", "недостаточно"];

/// Outcome of the per-cycle budget computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseQuota {
    /// Units to purchase this cycle; 0 means skip the purchase call
    pub qty: i64,
    /// The limit is already exhausted; auto-buy must be switched off now,
    /// before any purchase is attempted
    pub disable_now: bool,
}

/// Compute the legal purchase quantity for one cycle.
///
/// `buy_limit == 0` means unlimited. The quantity is clamped to the remaining
/// budget and the available stock, and never goes negative.
pub fn compute_purchase_qty(
    cycle_amount: i64,
    buy_limit: i64,
    bought_count: i64,
    available_stock: i64,
) -> PurchaseQuota {
    if buy_limit > 0 && bought_count >= buy_limit {
        // Terminal guard: the limit can be reached between cycles (e.g. by a
        // user raising bought_count via a manual purchase elsewhere).
        return PurchaseQuota {
            qty: 0,
            disable_now: true,
        };
    }

    let remaining = if buy_limit > 0 {
        buy_limit - bought_count
    } else {
        i64::MAX
    };

    let qty = cycle_amount.min(remaining).min(available_stock).max(0);

    PurchaseQuota {
        qty,
        disable_now: false,
    }
}

/// Whether a structured purchase rejection indicates insufficient balance.
pub fn is_low_balance(message: &str) -> bool {
    let lower = message.to_lowercase();
    LOW_BALANCE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Informational pre-check used when a user enables auto-buy or a schedule:
/// does the current balance cover one full cycle at the current price?
///
/// Returns `true` when the price is unknown; the upstream purchase call is
/// authoritative at purchase time.
pub fn balance_covers(price: Option<Decimal>, cycle_amount: i64, balance: Decimal) -> bool {
    match price {
        Some(p) => p * Decimal::from(cycle_amount) <= balance,
        None => true,
    }
}

/// Parse a locale-formatted balance string from the upstream API.
///
/// Tolerates thousands separators (space, NBSP), a decimal comma, and a
/// trailing currency suffix, e.g. `"1 234,56 ₽"` or `"987.50 RUB"`.
pub fn parse_currency(raw: &str) -> Option<Decimal> {
    let mut cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    if cleaned.contains(',') {
        if cleaned.contains('.') {
            // Comma is a thousands separator
            cleaned = cleaned.replace(',', "");
        } else {
            // Comma is the decimal separator
            cleaned = cleaned.replace(',', ".");
        }
    }

    cleaned.parse().ok()
}
