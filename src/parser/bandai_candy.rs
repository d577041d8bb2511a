use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::{Entry, EntryResult};
use crate::normalize::normalize_text;

static LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/candy/products/"]"#).unwrap());
static IMG_ALT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img[alt]").unwrap());
static PRODUCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/candy/products/\d{4}/(\d+)\.html").unwrap());

// The top page links one product from several blocks (slider, news, grid),
// so entries are deduplicated by id here. Price only appears on the detail page.
pub fn extract(base: &Url, html: &str) -> Vec<EntryResult> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for a in doc.select(&LINK) {
        let href = a.value().attr("href").unwrap_or_default();
        let url = match base.join(href) {
            Ok(u) => u,
            Err(e) => {
                out.push(Err(format!("bad href {href:?}: {e}")));
                continue;
            }
        };
        let Some(caps) = PRODUCT_RE.captures(url.as_str()) else {
            // category and campaign pages under /candy/products/
            continue;
        };
        let id = caps[1].to_string();
        if !seen.insert(id.clone()) {
            continue;
        }

        let mut title = normalize_text(&a.text().collect::<String>());
        if title.is_empty() {
            if let Some(alt) = a.select(&IMG_ALT).next().and_then(|img| img.value().attr("alt")) {
                title = normalize_text(alt);
            }
        }

        out.push(Ok(Entry {
            id,
            title,
            price: String::new(),
            url: url.to_string(),
        }));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_and_uses_img_alt() {
        let html = r#"
            <div class="slider"><a href="/candy/products/2025/4570117923456.html"><img alt="ホロライブ ウエハース"></a></div>
            <div class="grid">
              <a href="/candy/products/2025/4570117923456.html">ホロライブ ウエハース 第3弾</a>
              <a href="https://www.bandai.co.jp/candy/products/2024/4549660000001.html">ガム</a>
              <a href="/candy/products/list/">すべての商品</a>
            </div>
        "#;
        let base = Url::parse("https://www.bandai.co.jp/candy/").unwrap();
        let entries: Vec<Entry> = extract(&base, html).into_iter().map(Result::unwrap).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "4570117923456");
        assert_eq!(entries[0].title, "ホロライブ ウエハース");
        assert_eq!(
            entries[0].url,
            "https://www.bandai.co.jp/candy/products/2025/4570117923456.html"
        );
        assert_eq!(entries[1].id, "4549660000001");
        assert_eq!(entries[1].title, "ガム");
    }
}
