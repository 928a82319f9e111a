//! SQLite persistence for monitors and credentials
//!
//! All engine writes are conditional `UPDATE ... WHERE id = ?` statements
//! against a row the engine re-read moments before, never blind overwrites of
//! a stale in-memory copy.

use crate::error::Result;
use crate::types::{Credential, Monitor, MonitorStatus};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Fields needed to start tracking a product
#[derive(Debug, Clone)]
pub struct NewMonitor {
    pub user_id: i64,
    pub chat_id: i64,
    pub product_id: String,
    pub product_name: String,
    pub product_url: String,
    /// Live quantity at creation time; seeding last_amount with it prevents a
    /// false "just restocked" notification on the first scan
    pub last_amount: i64,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `path` and ensure schema.
    pub async fn connect(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path).to_string();
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", expanded))
            .unwrap_or_else(|_| SqliteConnectOptions::new().filename(&expanded))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS monitors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                product_id TEXT NOT NULL,
                product_name TEXT NOT NULL,
                product_url TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'monitoring',
                last_amount INTEGER NOT NULL DEFAULT 0,
                auto_buy INTEGER NOT NULL DEFAULT 0,
                auto_buy_amount INTEGER NOT NULL DEFAULT 1,
                buy_limit INTEGER NOT NULL DEFAULT 0,
                bought_count INTEGER NOT NULL DEFAULT 0,
                schedule_time TEXT,
                schedule_amount INTEGER NOT NULL DEFAULT 1,
                schedule_limit INTEGER NOT NULL DEFAULT 0,
                checked_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_monitors_user ON monitors(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_monitors_product ON monitors(product_id)",
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                user_id INTEGER PRIMARY KEY,
                username TEXT NOT NULL,
                password TEXT NOT NULL
            )
            "#,
        ];

        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ----- credentials -----

    /// Store credentials for a user, replacing any prior login.
    pub async fn upsert_credential(&self, user_id: i64, username: &str, password: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO credentials (user_id, username, password) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET username = excluded.username, password = excluded.password",
        )
        .bind(user_id)
        .bind(username)
        .bind(password)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_credential(&self, user_id: i64) -> Result<Option<Credential>> {
        let cred = sqlx::query_as::<_, Credential>(
            "SELECT user_id, username, password FROM credentials WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(cred)
    }

    pub async fn all_credentials(&self) -> Result<Vec<Credential>> {
        let creds = sqlx::query_as::<_, Credential>(
            "SELECT user_id, username, password FROM credentials ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(creds)
    }

    pub async fn delete_credential(&self, user_id: i64) -> Result<bool> {
        let res = sqlx::query("DELETE FROM credentials WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // ----- monitors -----

    pub async fn create_monitor(&self, new: &NewMonitor) -> Result<Monitor> {
        let res = sqlx::query(
            "INSERT INTO monitors
             (user_id, chat_id, product_id, product_name, product_url, last_amount, checked_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.user_id)
        .bind(new.chat_id)
        .bind(&new.product_id)
        .bind(&new.product_name)
        .bind(&new.product_url)
        .bind(new.last_amount)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let id = res.last_insert_rowid();
        self.get_monitor(id)
            .await?
            .ok_or(crate::error::BotError::MonitorNotFound(id))
    }

    pub async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>> {
        let m = sqlx::query_as::<_, Monitor>("SELECT * FROM monitors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(m)
    }

    pub async fn all_monitors(&self) -> Result<Vec<Monitor>> {
        let ms = sqlx::query_as::<_, Monitor>("SELECT * FROM monitors ORDER BY user_id, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ms)
    }

    pub async fn monitors_for_user(&self, user_id: i64) -> Result<Vec<Monitor>> {
        let ms = sqlx::query_as::<_, Monitor>(
            "SELECT * FROM monitors WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ms)
    }

    pub async fn monitor_for_product(&self, user_id: i64, product_id: &str) -> Result<Option<Monitor>> {
        let m = sqlx::query_as::<_, Monitor>(
            "SELECT * FROM monitors WHERE user_id = ? AND product_id = ?",
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(m)
    }

    /// Delete a monitor, scoped to its owner.
    pub async fn delete_monitor(&self, id: i64, user_id: i64) -> Result<bool> {
        let res = sqlx::query("DELETE FROM monitors WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Refresh only the last-checked timestamp (quiet cycle, nothing changed).
    pub async fn touch_checked(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE monitors SET checked_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist a scan outcome: new status and observed quantity.
    pub async fn set_scan_state(&self, id: i64, status: MonitorStatus, last_amount: i64) -> Result<()> {
        sqlx::query("UPDATE monitors SET status = ?, last_amount = ?, checked_at = ? WHERE id = ?")
            .bind(status)
            .bind(last_amount)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Refresh only the observed quantity (failed purchase, quantity still valid).
    pub async fn set_last_amount(&self, id: i64, last_amount: i64) -> Result<()> {
        sqlx::query("UPDATE monitors SET last_amount = ?, checked_at = ? WHERE id = ?")
            .bind(last_amount)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Enable auto-buy with a fresh limit window, scoped to the owner.
    pub async fn set_auto_buy(&self, id: i64, user_id: i64, amount: i64, limit: i64) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE monitors SET auto_buy = 1, auto_buy_amount = ?, buy_limit = ?, bought_count = 0
             WHERE id = ? AND user_id = ?",
        )
        .bind(amount)
        .bind(limit)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Disable auto-buy and re-arm the restock notification, owner-scoped.
    pub async fn clear_auto_buy(&self, id: i64, user_id: i64) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE monitors SET auto_buy = 0, status = 'monitoring' WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Engine-side auto-buy disable (limit reached or balance insufficiency).
    pub async fn disable_auto_buy(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE monitors SET auto_buy = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Configure a scheduled activation, owner-scoped.
    pub async fn set_schedule(&self, id: i64, user_id: i64, time: &str, amount: i64, limit: i64) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE monitors SET schedule_time = ?, schedule_amount = ?, schedule_limit = ?
             WHERE id = ? AND user_id = ?",
        )
        .bind(time)
        .bind(amount)
        .bind(limit)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Atomically promote a scheduled monitor to active auto-buy.
    ///
    /// The `schedule_time IS NOT NULL` condition makes the promotion
    /// at-most-once even when two scan passes race on the same minute.
    pub async fn promote_schedule(&self, id: i64) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE monitors SET
                auto_buy = 1,
                auto_buy_amount = schedule_amount,
                buy_limit = schedule_limit,
                bought_count = 0,
                schedule_time = NULL,
                status = 'monitoring',
                checked_at = ?
             WHERE id = ? AND schedule_time IS NOT NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Record a successful purchase: bump the counter, mark purchased, and
    /// force auto-buy off when the limit is now met.
    pub async fn record_purchase(&self, id: i64, qty: i64, last_amount: i64, disable: bool) -> Result<()> {
        sqlx::query(
            "UPDATE monitors SET
                bought_count = bought_count + ?,
                status = 'purchased',
                last_amount = ?,
                auto_buy = CASE WHEN ? THEN 0 ELSE auto_buy END,
                checked_at = ?
             WHERE id = ?",
        )
        .bind(qty)
        .bind(last_amount)
        .bind(disable)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ----- stats -----

    pub async fn count_monitors_by_status(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM monitors GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_credentials(&self) -> Result<i64> {
        let (n,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM credentials")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
