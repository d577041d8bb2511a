use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

use super::{query_param, text_of, Entry, EntryResult};

static LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="detail?gcode="]"#).unwrap());
static NAME: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".product_name_inner").unwrap());
static PRICE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".product_price").unwrap());

/// AmiAmi search results: every product tile is an anchor carrying `gcode`.
pub fn extract(base: &Url, html: &str) -> Vec<EntryResult> {
    let doc = Html::parse_document(html);
    let entries = doc
        .select(&LINK)
        .map(|a| -> EntryResult {
            let href = a.value().attr("href").unwrap_or_default();
            let url = base
                .join(href)
                .map_err(|e| format!("bad href {href:?}: {e}"))?;
            let id = query_param(&url, "gcode").ok_or_else(|| format!("no gcode in {url}"))?;
            Ok(Entry {
                id,
                title: text_of(a, &NAME),
                price: text_of(a, &PRICE),
                url: url.to_string(),
            })
        })
        .collect();
    entries
}
