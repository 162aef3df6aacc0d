use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

/// Issues one HTTP GET and hands back status + body. Implemented over
/// reqwest in production, stubbed out in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, headers: HeaderMap) -> anyhow::Result<TransportResponse>;
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Upsert-capable document store keyed by URL. Writing the same URL twice
/// keeps one record reflecting the latest body and metadata.
#[async_trait]
pub trait PageStore: Send + Sync {
    async fn upsert(&self, url: &str, body: &str, meta: &PageMeta) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct PageMeta {
    pub title: String,
    pub asin: String,
    pub crawled_at: DateTime<Utc>,
    pub price: Option<String>,
    pub rating: Option<String>,
    pub review_count: Option<String>,
}

/// Turns page markup into structured data. Pure, synchronous.
pub trait Extract: Send + Sync {
    /// Product candidates found on a listing page. Empty means the listing
    /// has run out of products, not that parsing failed.
    fn listing_candidates(&self, body: &str) -> Vec<crate::walker::ProductCandidate>;

    /// Fields of a product detail page. `None` when the page has no product
    /// title element, i.e. it is not an actual product page.
    fn product_fields(&self, body: &str) -> Option<ProductFields>;
}

/// Raw strings as they appear in the page, no normalization.
#[derive(Debug, Clone)]
pub struct ProductFields {
    pub title: String,
    pub price: Option<String>,
    pub rating: Option<String>,
    pub review_count: Option<String>,
}
