use std::sync::LazyLock;

use itertools::Itertools;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use super::{absolute, attr_of, date_only, first_text, images, tax_flag, text_with_breaks, uniq, Detail};
use crate::normalize::{fold_width, jan_code, normalize_text, price_digits, release_date};

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

static TITLE: LazyLock<Selector> = LazyLock::new(|| sel("#maincontents > div.title_area > h2"));
static MAIN_IMAGE: LazyLock<Selector> =
    LazyLock::new(|| sel("#detail_detail__main_image_area[data-main-image]"));
static MAIN_IMAGE_IMG: LazyLock<Selector> = LazyLock::new(|| sel("#detail_detail__main_image_area img"));
static GALLERY: LazyLock<Selector> =
    LazyLock::new(|| sel("#gallery [data-item-image], .gallery_area [data-item-image]"));
static NOTE: LazyLock<Selector> = LazyLock::new(|| {
    sel("#maincontents > div.sales_overview > dl > dd.remarks, #detail__overview .note, #maincontents .note")
});
static SPEC: LazyLock<Selector> = LazyLock::new(|| sel("#detail_detail__item_spec"));
static DETAIL: LazyLock<Selector> = LazyLock::new(|| sel("#detail_detail__item_detail"));
static PRICE: LazyLock<Selector> = LazyLock::new(|| sel("#detail_detail__item_price"));
static META_PRICE: LazyLock<Selector> =
    LazyLock::new(|| sel(r#"meta[property="og:price:amount"], meta[property="product:price:amount"]"#));
static RELEASE: LazyLock<Selector> = LazyLock::new(|| {
    sel("#maincontents > div.sales_overview > dl > dd.releasedate, #detail_detail__releaseDate, .item_detail_release p.release")
});
static MAKER: LazyLock<Selector> =
    LazyLock::new(|| sel("#maincontents > div.sales_overview > dl > dd.brand a"));
static SERIES: LazyLock<Selector> = LazyLock::new(|| {
    sel("#maincontents > div.sales_overview > dl > dd.seriestitle a, #maincontents > div.sales_overview > dl > dd.originaltitle a")
});
static CHARACTER: LazyLock<Selector> =
    LazyLock::new(|| sel("#maincontents > div.sales_overview > dl > dd.charactername a"));
static MODELER: LazyLock<Selector> =
    LazyLock::new(|| sel("#maincontents > div.sales_overview > dl > dd.modeler"));
static COPYRIGHT: LazyLock<Selector> = LazyLock::new(|| sel("p.copyright"));
static TAGS: LazyLock<Selector> = LazyLock::new(|| sel("#explain > div > a:nth-child(1)"));
static LD_JSON: LazyLock<Selector> = LazyLock::new(|| sel(r#"script[type="application/ld+json"]"#));
static JAN_SCOPE: LazyLock<Selector> =
    LazyLock::new(|| sel("#detail_detail__item_spec, #detail__overview, #maincontents"));

static LARGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)/images/product/(?:main|review)/").unwrap());
static THUMB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rthumb|thumbnail|thumb|blank\.gif|_s\.|_m\.|_small\.|_150|_200|_240").unwrap()
});
static IMAGE_EXT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\.(?:jpe?g|png|webp)$").unwrap());
static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}").unwrap());

/// AmiAmi product page (`/top/detail/detail?gcode=`).
pub fn scrape(url: &Url, doc: &Html) -> Detail {
    let overview = doc.select(&NOTE).next().map(text_with_breaks).unwrap_or_default();
    let body = [&*SPEC, &*DETAIL]
        .into_iter()
        .filter_map(|s| doc.select(s).next())
        .map(text_with_breaks)
        .filter(|t| !t.is_empty())
        .join("\n");
    let body = if body.is_empty() { overview.clone() } else { body };

    let mut detail = Detail {
        title: first_text(doc, &TITLE),
        images: product_images(url, doc),
        maker: first_text(doc, &MAKER),
        series: first_text(doc, &SERIES),
        character: first_text(doc, &CHARACTER),
        modeler: first_text(doc, &MODELER),
        copyright: first_text(doc, &COPYRIGHT),
        tags: doc
            .select(&TAGS)
            .map(|a| normalize_text(&a.text().collect::<String>()))
            .filter(|t| !t.is_empty())
            .unique()
            .join(", "),
        release_date: release(doc),
        jan: jan(doc),
        overview,
        body,
        ..Detail::default()
    };

    let price_text = first_text(doc, &PRICE);
    if !price_text.is_empty() {
        detail.price_value = price_digits(&price_text);
        detail.price_tax_included = tax_flag(&format!("{} {}", price_text, detail.body));
    } else {
        detail.price_value = price_digits(&attr_of(doc, &META_PRICE, "content"));
    }
    detail
}

/// Full-size product shots; thumbnails only when nothing larger is linked.
fn product_images(url: &Url, doc: &Html) -> Vec<String> {
    let mut found: Vec<String> = doc
        .select(&MAIN_IMAGE)
        .filter_map(|el| el.value().attr("data-main-image"))
        .filter_map(|src| absolute(url, src))
        .collect();
    found.extend(images(doc, &MAIN_IMAGE_IMG, url));
    found.extend(
        doc.select(&GALLERY)
            .filter_map(|el| el.value().attr("data-item-image"))
            .filter_map(|src| absolute(url, src)),
    );
    let all = uniq(found);

    let large: Vec<String> = all
        .iter()
        .filter(|u| LARGE_RE.is_match(u) && !THUMB_RE.is_match(u) && IMAGE_EXT_RE.is_match(u))
        .cloned()
        .collect();
    if large.is_empty() {
        all
    } else {
        large
    }
}

fn release(doc: &Html) -> String {
    let labelled = first_text(doc, &RELEASE);
    if !labelled.is_empty() {
        return release_date(&labelled);
    }
    // some layouts only mention the date in running text
    let text = doc.root_element().text().collect::<String>();
    text.lines()
        .map(str::trim)
        .find(|line| line.contains("発売") && YEAR_RE.is_match(line))
        .map(date_only)
        .unwrap_or_default()
}

fn jan(doc: &Html) -> String {
    for script in doc.select(&LD_JSON) {
        let Ok(data) = serde_json::from_str::<Value>(&script.text().collect::<String>()) else {
            continue;
        };
        let code = ["gtin13", "gtin", "sku"]
            .iter()
            .filter_map(|k| data.get(*k))
            .find_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .map(|s| fold_width(&s).chars().filter(char::is_ascii_digit).collect::<String>());
        if let Some(code) = code.filter(|c| c.len() == 13) {
            return code;
        }
    }
    let scope = doc
        .select(&JAN_SCOPE)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join("\n"))
        .unwrap_or_default();
    jan_code(&scope).unwrap_or_default()
}
