//! Telegram command front end
//!
//! Thin caller over the core: a long-poll listener parses chat commands into
//! `BotCommand` values and the `CommandHandler` invokes core operations
//! (storage, cache, engine) and replies through the notifier. All monitoring
//! semantics live in the core; nothing here mutates state directly beyond the
//! storage calls a command maps to.

use crate::cache::CatalogCache;
use crate::client::ShopApi;
use crate::engine::{ScanEngine, ScanOutcome};
use crate::error::Result;
use crate::governor;
use crate::locator;
use crate::notify::Notify;
use crate::schedule;
use crate::storage::{Database, NewMonitor};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

/// Who issued a command and where to reply
#[derive(Debug, Clone, Copy)]
pub struct CommandContext {
    pub user_id: i64,
    pub chat_id: i64,
}

/// Commands a user can issue from chat
#[derive(Debug, Clone, PartialEq)]
pub enum BotCommand {
    /// Store shop credentials (overwrites prior login)
    Login { username: String, password: String },
    Logout,
    /// Start tracking a product
    Track { product_id: String },
    /// Stop tracking a monitor
    Untrack { monitor_id: i64 },
    /// List this user's monitors
    List,
    /// Enable auto-buy: per-cycle amount plus optional cumulative limit
    AutoBuy { monitor_id: i64, amount: i64, limit: i64 },
    AutoBuyOff { monitor_id: i64 },
    /// Schedule auto-buy activation at a wall-clock minute
    Schedule { monitor_id: i64, time: String, amount: i64, limit: i64 },
    /// Manual rescan of this user's monitors
    Scan,
    Balance,
    Help,
}

/// Parse a chat message into a command, or a usage string for bad input.
/// Non-command text returns `Ok(None)` and is ignored.
pub fn parse_command(text: &str) -> std::result::Result<Option<BotCommand>, String> {
    let text = text.trim();
    if !text.starts_with('/') {
        return Ok(None);
    }

    let parts: Vec<&str> = text[1..].splitn(2, ' ').collect();
    let cmd = parts[0].split('@').next().unwrap_or(parts[0]);
    let args: Vec<&str> = parts
        .get(1)
        .map(|s| s.split_whitespace().collect())
        .unwrap_or_default();

    let parse_i64 = |s: &&str| s.parse::<i64>().ok();

    match cmd.to_lowercase().as_str() {
        "start" | "help" => Ok(Some(BotCommand::Help)),
        "login" => match args.as_slice() {
            [username, password] => Ok(Some(BotCommand::Login {
                username: (*username).to_string(),
                password: (*password).to_string(),
            })),
            _ => Err("Usage: /login <username> <password>".into()),
        },
        "logout" => Ok(Some(BotCommand::Logout)),
        "track" => match args.as_slice() {
            [product_id] => Ok(Some(BotCommand::Track {
                product_id: (*product_id).to_string(),
            })),
            _ => Err("Usage: /track <product_id>".into()),
        },
        "untrack" => match args.first().and_then(parse_i64) {
            Some(monitor_id) if args.len() == 1 => Ok(Some(BotCommand::Untrack { monitor_id })),
            _ => Err("Usage: /untrack <monitor_id>".into()),
        },
        "list" => Ok(Some(BotCommand::List)),
        "autobuy" => {
            let monitor_id = args.first().and_then(parse_i64);
            let amount = args.get(1).and_then(parse_i64);
            let limit = args.get(2).and_then(parse_i64).unwrap_or(0);
            match (monitor_id, amount) {
                (Some(monitor_id), Some(amount)) if amount > 0 && limit >= 0 => {
                    Ok(Some(BotCommand::AutoBuy { monitor_id, amount, limit }))
                }
                _ => Err("Usage: /autobuy <monitor_id> <amount> [limit]".into()),
            }
        }
        "autobuyoff" => match args.first().and_then(parse_i64) {
            Some(monitor_id) => Ok(Some(BotCommand::AutoBuyOff { monitor_id })),
            _ => Err("Usage: /autobuyoff <monitor_id>".into()),
        },
        "schedule" => {
            let monitor_id = args.first().and_then(parse_i64);
            let time = args.get(1).and_then(|s| schedule::normalize(s));
            let amount = args.get(2).and_then(parse_i64);
            let limit = args.get(3).and_then(parse_i64).unwrap_or(0);
            match (monitor_id, time, amount) {
                (Some(monitor_id), Some(time), Some(amount)) if amount > 0 && limit >= 0 => {
                    Ok(Some(BotCommand::Schedule { monitor_id, time, amount, limit }))
                }
                _ => Err("Usage: /schedule <monitor_id> <HH:mm> <amount> [limit]".into()),
            }
        }
        "scan" => Ok(Some(BotCommand::Scan)),
        "balance" => Ok(Some(BotCommand::Balance)),
        other => Err(format!(
            "Unknown command: /{}\nUse /help for available commands",
            other
        )),
    }
}

const HELP_TEXT: &str = r#"🤖 <b>Shopwatch Bot Commands</b>

<b>Account</b>
/login &lt;username&gt; &lt;password&gt; - Store shop credentials
/logout - Remove stored credentials
/balance - Show shop balance

<b>Tracking</b>
/track &lt;product_id&gt; - Watch a product
/untrack &lt;monitor_id&gt; - Stop watching
/list - Your monitors
/scan - Rescan now

<b>Auto-buy</b>
/autobuy &lt;monitor_id&gt; &lt;amount&gt; [limit] - Buy on restock
/autobuyoff &lt;monitor_id&gt; - Disable auto-buy
/schedule &lt;monitor_id&gt; &lt;HH:mm&gt; &lt;amount&gt; [limit] - Activate at a set time

/help - Show this message"#;

// ----- long-poll listener -----

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    from: Option<TelegramUser>,
    chat: TelegramChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    #[allow(dead_code)]
    ok: bool,
    result: Vec<TelegramUpdate>,
}

/// Server-side hold of a getUpdates long poll, in seconds.
const POLL_WINDOW_SECS: u64 = 30;
/// Client-side request timeout; must comfortably exceed the poll window so a
/// healthy empty poll is not cut short, while a dead connection still fails.
const POLL_TIMEOUT_SECS: u64 = 50;

/// Long-poll listener that feeds parsed commands into the handler channel.
pub struct TelegramBot {
    http: Client,
    bot_token: String,
    last_update_id: RwLock<i64>,
    command_tx: mpsc::Sender<(CommandContext, BotCommand)>,
}

impl TelegramBot {
    pub fn new(
        bot_token: String,
        command_tx: mpsc::Sender<(CommandContext, BotCommand)>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            bot_token,
            last_update_id: RwLock::new(0),
            command_tx,
        })
    }

    pub async fn start_polling(self: Arc<Self>) {
        info!("Starting Telegram command listener...");

        loop {
            match self.poll_updates().await {
                Ok(updates) => {
                    for update in updates {
                        if let Some(msg) = update.message {
                            let chat_id = msg.chat.id;
                            let user_id = msg.from.as_ref().map(|u| u.id).unwrap_or(chat_id);
                            if let Some(text) = msg.text {
                                self.handle_message(CommandContext { user_id, chat_id }, &text)
                                    .await;
                            }
                        }

                        let mut last_id = self.last_update_id.write().await;
                        *last_id = update.update_id + 1;
                    }
                }
                Err(e) => {
                    warn!("Failed to poll Telegram updates: {}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
        }
    }

    async fn poll_updates(&self) -> Result<Vec<TelegramUpdate>> {
        let last_id = *self.last_update_id.read().await;

        let url = format!(
            "https://api.telegram.org/bot{}/getUpdates?offset={}&timeout={}",
            self.bot_token, last_id, POLL_WINDOW_SECS
        );

        let response: GetUpdatesResponse = self.http.get(&url).send().await?.json().await?;
        Ok(response.result)
    }

    async fn handle_message(&self, ctx: CommandContext, text: &str) {
        match parse_command(text) {
            Ok(Some(cmd)) => {
                info!("Command from user {}: {:?}", ctx.user_id, cmd);
                let _ = self.command_tx.send((ctx, cmd)).await;
            }
            Ok(None) => {}
            Err(usage) => {
                self.reply(ctx.chat_id, &format!("❌ {}", usage)).await;
            }
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Err(e) = self.http.post(&url).json(&body).send().await {
            warn!("Failed to send reply: {}", e);
        }
    }
}

// ----- command handler -----

/// Executes chat commands against the core and replies to the issuing chat.
pub struct CommandHandler {
    db: Arc<Database>,
    shop: Arc<dyn ShopApi>,
    cache: Arc<CatalogCache>,
    engine: Arc<ScanEngine>,
    notifier: Arc<dyn Notify>,
    shop_base_url: String,
}

impl CommandHandler {
    pub fn new(
        db: Arc<Database>,
        shop: Arc<dyn ShopApi>,
        cache: Arc<CatalogCache>,
        engine: Arc<ScanEngine>,
        notifier: Arc<dyn Notify>,
        shop_base_url: String,
    ) -> Self {
        Self {
            db,
            shop,
            cache,
            engine,
            notifier,
            shop_base_url: shop_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn handle(&self, ctx: CommandContext, cmd: BotCommand) {
        if let Err(e) = self.dispatch(ctx, cmd).await {
            warn!("Command failed for user {}: {}", ctx.user_id, e);
            let _ = self
                .notifier
                .send_to(ctx.chat_id, &format!("❌ {}", e))
                .await;
        }
    }

    async fn dispatch(&self, ctx: CommandContext, cmd: BotCommand) -> Result<()> {
        match cmd {
            BotCommand::Help => {
                self.notifier.send_to(ctx.chat_id, HELP_TEXT).await?;
            }
            BotCommand::Login { username, password } => {
                self.db
                    .upsert_credential(ctx.user_id, &username, &password)
                    .await?;
                // Informational verification; a failed fetch does not undo the login
                let cred = crate::types::Credential {
                    user_id: ctx.user_id,
                    username,
                    password,
                };
                let text = match self.shop.fetch_balance(&cred).await {
                    Ok(balance) => format!("✅ Logged in. Balance: {}", balance),
                    Err(_) => {
                        "✅ Credentials stored (balance check failed — verify them)".to_string()
                    }
                };
                self.notifier.send_to(ctx.chat_id, &text).await?;
            }
            BotCommand::Logout => {
                let removed = self.db.delete_credential(ctx.user_id).await?;
                let text = if removed {
                    "✅ Logged out"
                } else {
                    "Nothing to log out: no stored credentials"
                };
                self.notifier.send_to(ctx.chat_id, text).await?;
            }
            BotCommand::Track { product_id } => self.track(ctx, &product_id).await?,
            BotCommand::Untrack { monitor_id } => {
                let removed = self.db.delete_monitor(monitor_id, ctx.user_id).await?;
                let text = if removed {
                    format!("✅ Monitor {} removed", monitor_id)
                } else {
                    format!("Monitor {} not found", monitor_id)
                };
                self.notifier.send_to(ctx.chat_id, &text).await?;
            }
            BotCommand::List => {
                let monitors = self.db.monitors_for_user(ctx.user_id).await?;
                if monitors.is_empty() {
                    self.notifier
                        .send_to(ctx.chat_id, "No monitors yet. Use /track <product_id>")
                        .await?;
                } else {
                    let lines: Vec<String> = monitors.iter().map(format_monitor_line).collect();
                    self.notifier.send_to(ctx.chat_id, &lines.join("\n")).await?;
                }
            }
            BotCommand::AutoBuy { monitor_id, amount, limit } => {
                self.enable_auto_buy(ctx, monitor_id, amount, limit).await?;
            }
            BotCommand::AutoBuyOff { monitor_id } => {
                let changed = self.db.clear_auto_buy(monitor_id, ctx.user_id).await?;
                let text = if changed {
                    format!("✅ Auto-buy disabled for monitor {}", monitor_id)
                } else {
                    format!("Monitor {} not found", monitor_id)
                };
                self.notifier.send_to(ctx.chat_id, &text).await?;
            }
            BotCommand::Schedule { monitor_id, time, amount, limit } => {
                let changed = self
                    .db
                    .set_schedule(monitor_id, ctx.user_id, &time, amount, limit)
                    .await?;
                if changed {
                    let warning = self.balance_warning(ctx.user_id, monitor_id, amount).await;
                    self.notifier
                        .send_to(
                            ctx.chat_id,
                            &format!(
                                "⏰ Monitor {} will activate auto-buy at {}{}",
                                monitor_id, time, warning
                            ),
                        )
                        .await?;
                } else {
                    self.notifier
                        .send_to(ctx.chat_id, &format!("Monitor {} not found", monitor_id))
                        .await?;
                }
            }
            BotCommand::Scan => {
                let text = match self.engine.scan_user(ctx.user_id).await {
                    ScanOutcome::Processed => "🔄 Rescan finished",
                    ScanOutcome::AlreadyRunning => "⏳ Your monitors are already being scanned",
                    ScanOutcome::NoMonitors => "No monitors yet. Use /track <product_id>",
                    ScanOutcome::NoCredentials => "No stored credentials. Use /login first",
                    ScanOutcome::FetchFailed => "❌ Catalog fetch failed, try again shortly",
                };
                self.notifier.send_to(ctx.chat_id, text).await?;
            }
            BotCommand::Balance => {
                let cred = self
                    .db
                    .get_credential(ctx.user_id)
                    .await?
                    .ok_or(crate::error::BotError::NoCredentials(ctx.user_id))?;
                let balance = self.shop.fetch_balance(&cred).await?;
                self.notifier
                    .send_to(ctx.chat_id, &format!("💰 Balance: {}", balance))
                    .await?;
            }
        }
        Ok(())
    }

    async fn track(&self, ctx: CommandContext, product_id: &str) -> Result<()> {
        let cred = self
            .db
            .get_credential(ctx.user_id)
            .await?
            .ok_or(crate::error::BotError::NoCredentials(ctx.user_id))?;

        if let Some(existing) = self.db.monitor_for_product(ctx.user_id, product_id).await? {
            self.notifier
                .send_to(
                    ctx.chat_id,
                    &format!("Already tracking as monitor {}", existing.id),
                )
                .await?;
            return Ok(());
        }

        let catalog = self.cache.fetch(&cred).await?;
        let Some(record) = locator::locate(&catalog, product_id) else {
            self.notifier
                .send_to(
                    ctx.chat_id,
                    &format!("Product {} not found in catalog", product_id),
                )
                .await?;
            return Ok(());
        };

        // Seed last_amount with the live quantity so the first scan does not
        // fire a false restock notification
        let monitor = self
            .db
            .create_monitor(&NewMonitor {
                user_id: ctx.user_id,
                chat_id: ctx.chat_id,
                product_id: record.id.clone(),
                product_name: record.name.clone(),
                product_url: format!("{}/item/{}", self.shop_base_url, record.id),
                last_amount: record.amount,
            })
            .await?;

        self.notifier
            .send_to(
                ctx.chat_id,
                &format!(
                    "👁 Monitor {} created for <b>{}</b> (stock: {})",
                    monitor.id, record.name, record.amount
                ),
            )
            .await?;
        Ok(())
    }

    async fn enable_auto_buy(
        &self,
        ctx: CommandContext,
        monitor_id: i64,
        amount: i64,
        limit: i64,
    ) -> Result<()> {
        let changed = self
            .db
            .set_auto_buy(monitor_id, ctx.user_id, amount, limit)
            .await?;
        if !changed {
            self.notifier
                .send_to(ctx.chat_id, &format!("Monitor {} not found", monitor_id))
                .await?;
            return Ok(());
        }

        let warning = self.balance_warning(ctx.user_id, monitor_id, amount).await;
        let limit_text = if limit > 0 {
            format!(", limit {}", limit)
        } else {
            String::new()
        };
        self.notifier
            .send_to(
                ctx.chat_id,
                &format!(
                    "🛒 Auto-buy enabled for monitor {} ({} per cycle{}){}",
                    monitor_id, amount, limit_text, warning
                ),
            )
            .await?;
        Ok(())
    }

    /// Informational balance pre-check at enable time only; the upstream call
    /// is authoritative at purchase time.
    async fn balance_warning(&self, user_id: i64, monitor_id: i64, amount: i64) -> String {
        let check = async {
            let cred = self.db.get_credential(user_id).await.ok()??;
            let monitor = self.db.get_monitor(monitor_id).await.ok()??;
            let balance = governor::parse_currency(&self.shop.fetch_balance(&cred).await.ok()?)?;
            let catalog = self.cache.fetch(&cred).await.ok()?;
            let record = locator::locate(&catalog, &monitor.product_id)?;
            Some(governor::balance_covers(record.price, amount, balance))
        };
        match check.await {
            Some(false) => "\n⚠️ Current balance may not cover one full cycle".to_string(),
            _ => String::new(),
        }
    }
}

fn format_monitor_line(m: &crate::types::Monitor) -> String {
    let extra = if m.auto_buy {
        let limit = if m.buy_limit > 0 {
            m.buy_limit.to_string()
        } else {
            "∞".to_string()
        };
        format!(" | auto-buy {}/{}", m.bought_count, limit)
    } else if let Some(t) = &m.schedule_time {
        format!(" | scheduled {}", t)
    } else {
        String::new()
    };
    format!(
        "#{} <b>{}</b> — {} (stock: {}){}",
        m.id,
        m.product_name,
        m.status.as_str(),
        m.last_amount,
        extra
    )
}
