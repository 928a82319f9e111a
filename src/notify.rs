//! Telegram notifications
//!
//! The scan engine emits events through the `Notify` trait; the Telegram
//! implementation renders them as HTML messages, with purchased items
//! delivered as a file attachment. A disabled notifier swallows everything so
//! the bot can run without Telegram configured.

use crate::error::{BotError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Upper bound on any single Bot API call. The scan engine awaits
/// notifications inside a user's pass, so a send must never hang the tick.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Why auto-buy was switched off by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableReason {
    LimitReached,
    InsufficientBalance,
}

/// Notification events produced by the scan engine, one per monitor event.
#[async_trait]
pub trait Notify: Send + Sync {
    /// Plain message to a chat (also used for command replies).
    async fn send_to(&self, chat_id: i64, text: &str) -> Result<()>;

    async fn restock(&self, chat_id: i64, name: &str, url: &str, amount: i64) -> Result<()>;

    async fn out_of_stock(&self, chat_id: i64, name: &str) -> Result<()>;

    async fn schedule_activated(&self, chat_id: i64, name: &str, amount: i64, limit: i64) -> Result<()>;

    async fn purchase_success(&self, chat_id: i64, name: &str, qty: i64, items: &[String]) -> Result<()>;

    async fn purchase_failure(&self, chat_id: i64, name: &str, detail: &str) -> Result<()>;

    async fn auto_buy_disabled(&self, chat_id: i64, name: &str, reason: DisableReason) -> Result<()>;

    async fn watch_delta(&self, chat_id: i64, name: &str, previous: i64, current: i64) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: i64,
    text: String,
    parse_mode: String,
    disable_web_page_preview: bool,
}

/// Telegram Bot API notifier
#[derive(Clone)]
pub struct TelegramNotifier {
    http: Client,
    bot_token: String,
    admin_chat_id: i64,
    notify_errors: bool,
    enabled: bool,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, admin_chat_id: i64, notify_errors: bool) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            bot_token,
            admin_chat_id,
            notify_errors,
            enabled: true,
        })
    }

    /// No-op notifier for running without Telegram configured.
    pub fn disabled() -> Self {
        Self {
            http: Client::new(),
            bot_token: String::new(),
            admin_chat_id: 0,
            notify_errors: false,
            enabled: false,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        if !self.enabled {
            debug!("Notifier disabled, dropping message for chat {}", chat_id);
            return Ok(());
        }

        let req = SendMessageRequest {
            chat_id,
            text: text.to_string(),
            parse_mode: "HTML".to_string(),
            disable_web_page_preview: true,
        };

        let resp = self
            .http
            .post(self.api_url("sendMessage"))
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::Telegram(body));
        }
        Ok(())
    }

    async fn send_document_inner(
        &self,
        chat_id: i64,
        filename: &str,
        content: String,
        caption: &str,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let part = reqwest::multipart::Part::bytes(content.into_bytes())
            .file_name(filename.to_string())
            .mime_str("text/plain")
            .map_err(|e| BotError::Telegram(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", part);

        let resp = self
            .http
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::Telegram(body));
        }
        Ok(())
    }

    /// Startup notice to the admin chat.
    pub async fn startup(&self) -> Result<()> {
        self.send_message(self.admin_chat_id, "🤖 <b>Shopwatch bot started</b>")
            .await
    }

    /// Error notice to the admin chat, gated by config.
    pub async fn error(&self, context: &str, detail: &str) -> Result<()> {
        if !self.notify_errors {
            return Ok(());
        }
        self.send_message(
            self.admin_chat_id,
            &format!("⚠️ <b>{}</b>\n\n<code>{}</code>", context, detail),
        )
        .await
    }

    /// Free-form message to the admin chat (reports).
    pub async fn send_raw(&self, text: &str) -> Result<()> {
        self.send_message(self.admin_chat_id, text).await
    }
}

#[async_trait]
impl Notify for TelegramNotifier {
    async fn send_to(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_message(chat_id, text).await
    }

    async fn restock(&self, chat_id: i64, name: &str, url: &str, amount: i64) -> Result<()> {
        self.send_message(
            chat_id,
            &format!(
                "📦 <b>Back in stock</b>\n\n<a href=\"{}\">{}</a>\nAvailable: {}",
                url, name, amount
            ),
        )
        .await
    }

    async fn out_of_stock(&self, chat_id: i64, name: &str) -> Result<()> {
        self.send_message(chat_id, &format!("🚫 <b>Out of stock</b>\n\n{}", name))
            .await
    }

    async fn schedule_activated(&self, chat_id: i64, name: &str, amount: i64, limit: i64) -> Result<()> {
        let limit_text = if limit > 0 {
            format!("{}", limit)
        } else {
            "unlimited".to_string()
        };
        self.send_message(
            chat_id,
            &format!(
                "⏰ <b>Scheduled auto-buy activated</b>\n\n{}\nPer cycle: {}\nLimit: {}",
                name, amount, limit_text
            ),
        )
        .await
    }

    async fn purchase_success(&self, chat_id: i64, name: &str, qty: i64, items: &[String]) -> Result<()> {
        self.send_message(
            chat_id,
            &format!("✅ <b>Purchased</b>\n\n{}\nQuantity: {}", name, qty),
        )
        .await?;

        if !items.is_empty() {
            self.send_document_inner(
                chat_id,
                "purchase.txt",
                items.join("\n"),
                &format!("{} — {} item(s)", name, items.len()),
            )
            .await?;
        }
        Ok(())
    }

    async fn purchase_failure(&self, chat_id: i64, name: &str, detail: &str) -> Result<()> {
        self.send_message(
            chat_id,
            &format!("❌ <b>Purchase failed</b>\n\n{}\n<code>{}</code>", name, detail),
        )
        .await
    }

    async fn auto_buy_disabled(&self, chat_id: i64, name: &str, reason: DisableReason) -> Result<()> {
        let text = match reason {
            DisableReason::LimitReached => {
                format!("🛑 <b>Auto-buy disabled</b>\n\n{}\nPurchase limit reached.", name)
            }
            DisableReason::InsufficientBalance => {
                format!("🛑 <b>Auto-buy disabled</b>\n\n{}\nInsufficient balance.", name)
            }
        };
        self.send_message(chat_id, &text).await
    }

    async fn watch_delta(&self, chat_id: i64, name: &str, previous: i64, current: i64) -> Result<()> {
        let arrow = if current > previous { "📈" } else { "📉" };
        self.send_message(
            chat_id,
            &format!("{} <b>{}</b>: {} → {}", arrow, name, previous, current),
        )
        .await
    }
}
