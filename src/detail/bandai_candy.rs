use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{absolute, first_text, images, tax_flag, text_with_breaks, uniq, Detail};
use crate::normalize::{jan_code, normalize_text, release_date};

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

static TITLE: LazyLock<Selector> = LazyLock::new(|| sel("article .itemDetailWrapper > h2"));
static SPEC_ROWS: LazyLock<Selector> = LazyLock::new(|| sel("article .itemDetailWrapper table tr"));
static CELL: LazyLock<Selector> = LazyLock::new(|| sel("td"));
static BODY: LazyLock<Selector> = LazyLock::new(|| sel("article > div.bgWhite > div"));
static COPYRIGHT: LazyLock<Selector> = LazyLock::new(|| sel("article > div.bgWhite > div > p"));
static SLIDER_IMG: LazyLock<Selector> =
    LazyLock::new(|| sel(".itemSliderWrapper img, .itemSliderWrapper source"));
static SLIDER_STYLED: LazyLock<Selector> = LazyLock::new(|| sel(".itemSliderWrapper [style]"));
static SLIDER_LINK: LazyLock<Selector> = LazyLock::new(|| sel(".itemSliderWrapper a[href]"));

static BACKGROUND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)background-image\s*:\s*url\(([^)]+)\)").unwrap());
static IMAGE_EXT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\.(?:jpe?g|png|webp)$").unwrap());
static FIRST_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9][0-9,]*").unwrap());

/// Bandai Candy product page. The spec table lists price, release month
/// and age rating in its first, second and fourth rows.
pub fn scrape(url: &Url, doc: &Html) -> Detail {
    let rows: Vec<ElementRef<'_>> = doc.select(&SPEC_ROWS).collect();
    let cell = |i: usize| {
        rows.get(i)
            .map(|tr| text_of(tr.select(&CELL).next().unwrap_or(*tr)))
            .unwrap_or_default()
    };

    let price_text = cell(0);
    // "希望小売価格：350円（税込385円）" lists the pre-tax price first
    let price_value = FIRST_NUMBER_RE
        .find(&price_text)
        .map(|m| m.as_str().replace(',', ""))
        .unwrap_or_default();
    let page_text = doc.root_element().text().collect::<Vec<_>>().join("\n");

    Detail {
        title: first_text(doc, &TITLE),
        body: doc.select(&BODY).next().map(text_with_breaks).unwrap_or_default(),
        images: slider_images(url, doc),
        price_tax_included: tax_flag(&price_text),
        price_value,
        release_date: release_date(&cell(1)),
        age_rating: rows.get(3).map(|tr| text_of(*tr)).unwrap_or_default(),
        copyright: first_text(doc, &COPYRIGHT),
        jan: jan_code(&page_text).unwrap_or_default(),
        ..Detail::default()
    }
}

fn text_of(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn slider_images(url: &Url, doc: &Html) -> Vec<String> {
    let mut found = images(doc, &SLIDER_IMG, url);
    for el in doc.select(&SLIDER_STYLED) {
        let style = el.value().attr("style").unwrap_or_default();
        if let Some(caps) = BACKGROUND_RE.captures(style) {
            let src = caps[1].trim_matches(|c: char| c == '"' || c == '\'' || c == ' ');
            found.extend(absolute(url, src));
        }
    }
    found.extend(
        doc.select(&SLIDER_LINK)
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| IMAGE_EXT_RE.is_match(href))
            .filter_map(|href| absolute(url, href)),
    );
    uniq(found)
}
