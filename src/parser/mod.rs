pub mod amiami;
pub mod bandai_candy;
pub mod generic;
pub mod shopify;
pub mod sitemap;

use scraper::{ElementRef, Selector};
use tracing::warn;
use url::Url;

use crate::config::{ParseRules, SiteDescriptor};
use crate::error::FetchError;
use crate::model::ItemRecord;
use crate::normalize::normalize_text;

/// Items parsed from one fetched page.
#[derive(Debug)]
pub struct Page {
    pub items: Vec<ItemRecord>,
    /// The body was read as a complete catalog document (`products.json`,
    /// a sitemap `urlset`), so zero items means an empty catalog rather than
    /// markup the rules no longer match.
    pub well_formed: bool,
}

/// Extract listing entries from one fetched page using the site's rules.
///
/// Entries that cannot be turned into an item are skipped with a warning.
/// Only a body that cannot be read as the expected format at all is an error.
pub fn parse_page(site: &SiteDescriptor, page_url: &Url, body: &str) -> Result<Page, FetchError> {
    let format_error = |reason: String| FetchError::ParseFormat {
        url: page_url.to_string(),
        reason,
    };
    let (entries, well_formed) = match &site.rules {
        ParseRules::Amiami => (amiami::extract(page_url, body), false),
        ParseRules::Generic(rules) => (generic::extract(rules, page_url, body), false),
        ParseRules::BandaiCandy => (bandai_candy::extract(page_url, body), false),
        ParseRules::Shopify { base_url } => (
            shopify::extract(base_url.as_ref(), page_url, body).map_err(format_error)?,
            true,
        ),
        ParseRules::Sitemap { pattern } => (sitemap::extract(pattern, body).map_err(format_error)?, true),
    };

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            Ok(e) => items.push(ItemRecord {
                id: e.id,
                title: e.title,
                price: e.price,
                url: e.url,
                site_id: site.id.clone(),
            }),
            Err(reason) => warn!(site = %site.id, page = %page_url, "skipping entry: {}", reason),
        }
    }
    Ok(Page { items, well_formed })
}

/// A listing entry before it is attributed to a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    pub title: String,
    pub price: String,
    pub url: String,
}

pub type EntryResult = Result<Entry, String>;

pub(crate) fn text_of(node: ElementRef<'_>, selector: &Selector) -> String {
    node.select(selector)
        .next()
        .map(|el| normalize_text(&el.text().collect::<String>()))
        .unwrap_or_default()
}

pub(crate) fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_bad_entries_and_tags_site() {
        let html = r#"
            <a href="/top/detail/detail?gcode=FIGURE-1"><span class="product_name_inner">A</span></a>
            <a href="/top/detail/detail?gcode="><span class="product_name_inner">broken</span></a>
        "#;
        let site = testutil::site("amiami", "https://slist.amiami.jp/top/search/list", ParseRules::Amiami);
        let url = site.listing_urls[0].clone();
        let page = parse_page(&site, &url, html).unwrap();
        assert!(!page.well_formed);
        let items = page.items;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].site_id, "amiami");
        assert_eq!(items[0].id, "FIGURE-1");
    }

    #[test]
    fn bad_json_is_parse_format() {
        let site = testutil::site(
            "shop",
            "https://shop.example.com/products.json",
            ParseRules::Shopify { base_url: None },
        );
        let url = site.listing_urls[0].clone();
        let err = parse_page(&site, &url, "<html>not json</html>").unwrap_err();
        assert!(matches!(err, FetchError::ParseFormat { .. }));
    }

    #[test]
    fn empty_catalog_is_well_formed() {
        let site = testutil::site(
            "shop",
            "https://shop.example.com/products.json",
            ParseRules::Shopify { base_url: None },
        );
        let url = site.listing_urls[0].clone();
        let page = parse_page(&site, &url, r#"{"products": []}"#).unwrap();
        assert!(page.items.is_empty());
        assert!(page.well_formed);
    }
}
