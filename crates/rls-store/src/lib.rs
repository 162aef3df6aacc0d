//! SQLite-backed store for raw crawled pages, one row per URL.
//! Writing an already-stored URL replaces the body and metadata.

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use rls_crawler::{PageMeta, PageStore};

pub struct RawPageStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct StoredPage {
    pub url: String,
    pub html: String,
    pub meta: PageMeta,
    pub last_updated: DateTime<Utc>,
}

impl RawPageStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url: {database_url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("connecting to database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw_pages (
                url TEXT PRIMARY KEY,
                html TEXT NOT NULL,
                title TEXT NOT NULL,
                asin TEXT NOT NULL,
                price TEXT,
                rating TEXT,
                review_count TEXT,
                crawled_at TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating raw_pages table")?;
        Ok(())
    }

    pub async fn get(&self, url: &str) -> Result<Option<StoredPage>> {
        let row = sqlx::query(
            r#"
            SELECT url, html, title, asin, price, rating, review_count, crawled_at, last_updated
            FROM raw_pages WHERE url = ?1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("reading {url}"))?;

        row.map(|row| {
            Ok(StoredPage {
                url: row.try_get("url")?,
                html: row.try_get("html")?,
                meta: PageMeta {
                    title: row.try_get("title")?,
                    asin: row.try_get("asin")?,
                    crawled_at: row.try_get("crawled_at")?,
                    price: row.try_get("price")?,
                    rating: row.try_get("rating")?,
                    review_count: row.try_get("review_count")?,
                },
                last_updated: row.try_get("last_updated")?,
            })
        })
        .transpose()
    }

    pub async fn all_urls(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT url FROM raw_pages ORDER BY url")
            .fetch_all(&self.pool)
            .await
            .context("listing urls")?;
        rows.into_iter()
            .map(|row| row.try_get("url").map_err(Into::into))
            .collect()
    }

    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM raw_pages")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    /// Delete pages not updated in the last `days` days; returns how many
    /// rows went away.
    pub async fn cleanup_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let result = sqlx::query("DELETE FROM raw_pages WHERE last_updated < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("cleaning up old pages")?;
        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PageStore for RawPageStore {
    async fn upsert(&self, url: &str, body: &str, meta: &PageMeta) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO raw_pages
                (url, html, title, asin, price, rating, review_count, crawled_at, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(url) DO UPDATE SET
                html = excluded.html,
                title = excluded.title,
                asin = excluded.asin,
                price = excluded.price,
                rating = excluded.rating,
                review_count = excluded.review_count,
                crawled_at = excluded.crawled_at,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(url)
        .bind(body)
        .bind(&meta.title)
        .bind(&meta.asin)
        .bind(&meta.price)
        .bind(&meta.rating)
        .bind(&meta.review_count)
        .bind(meta.crawled_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving {url}"))?;
        Ok(())
    }
}
