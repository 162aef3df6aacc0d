//! Turns raw page markup into the structures the crawler consumes.
//!
//! The target site serves several layout variants, so both the result-card
//! and the in-card title lookups try an ordered list of selectors and keep
//! the first that matches.

use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};

use rls_crawler::{Extract, ProductCandidate, ProductFields};

lazy_static! {
    static ref CARD_SELECTORS: Vec<Selector> = [
        "div[data-asin]",
        "div.s-result-item[data-asin]",
        "div.sg-col-inner div[data-asin]",
        ".s-main-slot div[data-asin]",
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect();
    static ref TITLE_SELECTORS: Vec<Selector> = [
        "h2 a.a-text-normal",
        "h2 span.a-text-normal",
        ".a-size-medium.a-text-normal",
        ".a-size-base-plus.a-text-normal",
        "h2 a span",
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect();
    static ref LISTED_PRICE: Selector = Selector::parse(".a-price-whole").unwrap();
    static ref PRODUCT_TITLE: Selector = Selector::parse("#productTitle").unwrap();
    static ref PRODUCT_PRICE: Selector =
        Selector::parse("#priceblock_ourprice, #priceblock_dealprice, .a-price .a-offscreen")
            .unwrap();
    static ref PRODUCT_RATING: Selector = Selector::parse("#acrPopover .a-text-normal").unwrap();
    static ref PRODUCT_REVIEWS: Selector = Selector::parse("#acrCustomerReviewText").unwrap();
}

/// Selector-based extractor for the supported site layouts.
pub struct HtmlExtractor {
    product_base: String,
}

impl HtmlExtractor {
    /// `product_base` is the site root used to build `/dp/{asin}` URLs.
    pub fn new(product_base: impl Into<String>) -> Self {
        Self {
            product_base: product_base.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Extract for HtmlExtractor {
    fn listing_candidates(&self, body: &str) -> Vec<ProductCandidate> {
        let doc = Html::parse_document(body);

        let mut cards = Vec::new();
        for selector in CARD_SELECTORS.iter() {
            cards = doc.select(selector).collect();
            if !cards.is_empty() {
                break;
            }
        }

        cards
            .into_iter()
            .filter_map(|card| self.candidate_from_card(card))
            .collect()
    }

    fn product_fields(&self, body: &str) -> Option<ProductFields> {
        let doc = Html::parse_document(body);
        let title = doc.select(&PRODUCT_TITLE).next().map(element_text)?;

        Some(ProductFields {
            title,
            price: doc.select(&PRODUCT_PRICE).next().map(element_text),
            rating: doc.select(&PRODUCT_RATING).next().map(element_text),
            review_count: doc.select(&PRODUCT_REVIEWS).next().map(element_text),
        })
    }
}

impl HtmlExtractor {
    fn candidate_from_card(&self, card: ElementRef) -> Option<ProductCandidate> {
        let asin = card.value().attr("data-asin")?.trim();
        if asin.is_empty() {
            return None;
        }

        let title = TITLE_SELECTORS
            .iter()
            .find_map(|selector| card.select(selector).next())
            .map(element_text)?;

        let listed_price = card.select(&LISTED_PRICE).next().map(element_text);

        Some(ProductCandidate {
            asin: asin.to_string(),
            url: format!("{}/dp/{asin}", self.product_base),
            title,
            listed_price,
        })
    }
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}
