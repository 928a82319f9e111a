//! Shopwatch Bot
//!
//! A multi-user stock-watch and auto-buy bot for a web shop.

use clap::{Parser, Subcommand};
use shopwatch_bot::{
    cache::CatalogCache,
    client::ShopClient,
    config::Config,
    dashboard::{self, DashboardState},
    engine::ScanEngine,
    notify::{Notify, TelegramNotifier},
    storage::Database,
    telegram::{BotCommand, CommandContext, CommandHandler, TelegramBot},
    watchlist::WatchlistReporter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shopwatch-bot")]
#[command(about = "Stock-watch and auto-buy bot for a web shop")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot
    Run,
    /// Show monitor and credential counts
    Status,
    /// Send a status report to the admin chat
    Report,
    /// Test Telegram notification
    TestNotify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run => run_bot(config).await,
        Commands::Status => show_status(config).await,
        Commands::Report => send_report(config).await,
        Commands::TestNotify => test_notify(config).await,
    }
}

async fn run_bot(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting shopwatch bot");

    // Initialize Telegram notifier
    let notifier = if let Some(tg) = &config.telegram {
        TelegramNotifier::new(tg.bot_token.clone(), tg.admin_chat_id, tg.notify_errors)?
    } else {
        tracing::warn!("Telegram not configured, notifications disabled");
        TelegramNotifier::disabled()
    };

    // Send startup notification
    if let Err(e) = notifier.startup().await {
        tracing::warn!("Failed to send startup notification: {}", e);
    }

    // Initialize components
    let db = Arc::new(Database::connect(&config.database.path).await?);
    let shop: Arc<dyn shopwatch_bot::client::ShopApi> =
        Arc::new(ShopClient::new(&config.shop)?);
    let cache = Arc::new(CatalogCache::new(
        shop.clone(),
        Duration::from_millis(config.scan.cache_ttl_ms),
    ));
    cache.spawn_sweeper(Duration::from_secs(config.scan.sweep_interval_secs));

    let notifier: Arc<dyn Notify> = Arc::new(notifier);
    let engine = Arc::new(ScanEngine::new(
        db.clone(),
        cache.clone(),
        shop.clone(),
        notifier.clone(),
        config.scan.timezone_offset_hours,
    ));

    // Start Telegram command listener if configured
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<(CommandContext, BotCommand)>(100);
    if let Some(tg) = &config.telegram {
        let telegram_bot = Arc::new(TelegramBot::new(tg.bot_token.clone(), cmd_tx)?);
        tokio::spawn(async move {
            telegram_bot.start_polling().await;
        });
        tracing::info!("Telegram command listener started");
    }

    let cmd_handler = Arc::new(CommandHandler::new(
        db.clone(),
        shop.clone(),
        cache.clone(),
        engine.clone(),
        notifier.clone(),
        config.shop.base_url.clone(),
    ));
    tokio::spawn(async move {
        while let Some((ctx, cmd)) = cmd_rx.recv().await {
            cmd_handler.handle(ctx, cmd).await;
        }
    });

    // Watch-list delta reporter on its own slower interval
    if let Some(wl) = &config.watchlist {
        if !wl.product_ids.is_empty() {
            let reporter = Arc::new(WatchlistReporter::new(
                db.clone(),
                cache.clone(),
                notifier.clone(),
                wl.product_ids.clone(),
            ));
            let interval_secs = wl.interval_secs;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
                loop {
                    interval.tick().await;
                    reporter.tick().await;
                }
            });
            tracing::info!(
                "Watch-list reporter started ({} products, every {}s)",
                wl.product_ids.len(),
                interval_secs
            );
        }
    }

    // Dashboard
    if let Some(dash) = &config.dashboard {
        let state = Arc::new(DashboardState {
            db: db.clone(),
            cache: cache.clone(),
            engine: engine.clone(),
            started_at: chrono::Utc::now(),
        });
        let bind_addr = dash.bind_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::serve(state, &bind_addr).await {
                tracing::error!("Dashboard error: {}", e);
            }
        });
    }

    // Main scan loop
    tracing::info!("Scanning every {}s", config.scan.tick_secs);
    let mut interval = tokio::time::interval(Duration::from_secs(config.scan.tick_secs));
    loop {
        interval.tick().await;
        let engine = engine.clone();
        // The tick's own guard makes overlapping spawns a no-op
        tokio::spawn(async move {
            engine.tick().await;
        });
    }
}

async fn show_status(config: Config) -> anyhow::Result<()> {
    let db = Database::connect(&config.database.path).await?;

    let by_status = db.count_monitors_by_status().await?;
    let credentials = db.count_credentials().await?;

    println!("\n📊 Shopwatch Status\n");
    println!("Logged-in users: {}", credentials);
    let total: i64 = by_status.iter().map(|(_, c)| c).sum();
    println!("Monitors: {}", total);
    for (status, count) in &by_status {
        println!("  {:<12} {}", status, count);
    }

    Ok(())
}

async fn send_report(config: Config) -> anyhow::Result<()> {
    let tg = config
        .telegram
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Telegram not configured in config.toml"))?;

    let notifier = TelegramNotifier::new(tg.bot_token.clone(), tg.admin_chat_id, tg.notify_errors)?;
    let db = Database::connect(&config.database.path).await?;

    let by_status = db.count_monitors_by_status().await?;
    let credentials = db.count_credentials().await?;
    let total: i64 = by_status.iter().map(|(_, c)| c).sum();

    let mut lines = vec![
        "📊 <b>Shopwatch Report</b>".to_string(),
        String::new(),
        format!("Logged-in users: {}", credentials),
        format!("Monitors: {}", total),
    ];
    for (status, count) in &by_status {
        lines.push(format!("  {}: {}", status, count));
    }

    notifier.send_raw(&lines.join("\n")).await?;

    println!("✅ Report sent to Telegram");
    Ok(())
}

async fn test_notify(config: Config) -> anyhow::Result<()> {
    let tg = config
        .telegram
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Telegram not configured in config.toml"))?;

    let notifier = TelegramNotifier::new(tg.bot_token.clone(), tg.admin_chat_id, tg.notify_errors)?;
    notifier
        .send_raw("🧪 <b>Test Notification</b>\n\nIf you see this, Telegram integration is working!")
        .await?;

    println!("✅ Test notification sent!");
    Ok(())
}
