//! Shopwatch Bot
//!
//! A multi-user stock-watch and auto-buy bot for a web shop, driven from
//! Telegram.
//!
//! ## Architecture
//!
//! ```text
//! Telegram commands → CommandHandler → Storage (sqlite)
//!                                          ↑
//! Scan loop → ScanEngine → CatalogCache → ShopClient (HTTP)
//!                 ↓
//!             Notify (Telegram) / Dashboard (axum)
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod governor;
pub mod locator;
pub mod notify;
pub mod schedule;
pub mod storage;
pub mod telegram;
pub mod types;
pub mod watchlist;
