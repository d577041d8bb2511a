use std::sync::LazyLock;

use itertools::Itertools;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{attr_of, first_text, images, text_with_breaks, Detail};
use crate::normalize::{normalize_text, price_digits};

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| sel("h1.Pdt_title, .Pdt_heading > h1.Pdt_title, .Pdt_heading > h1, h1"));
static OG_TITLE: LazyLock<Selector> = LazyLock::new(|| sel(r#"meta[property="og:title"]"#));
static SLIDES: LazyLock<Selector> = LazyLock::new(|| {
    sel("#swiper-product .swiper-wrapper img, .Product__Slideshow .swiper-wrapper img, .swiper-wrapper .swiper-slide img")
});
static DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| sel(".Pdt_description"));
static DETAILS: LazyLock<Selector> = LazyLock::new(|| sel("details"));
static SUMMARY: LazyLock<Selector> = LazyLock::new(|| sel("summary"));
static DETAILS_BODY: LazyLock<Selector> =
    LazyLock::new(|| sel(".details_inner, .Accordion__Body, .content, div"));
static OPTION: LazyLock<Selector> = LazyLock::new(|| sel(".Option"));
static OPTION_TITLE: LazyLock<Selector> = LazyLock::new(|| sel(".Option_title"));
static OPTION_PRICE: LazyLock<Selector> = LazyLock::new(|| sel(".Option_price .money, .money"));
static META_PRICE: LazyLock<Selector> =
    LazyLock::new(|| sel(r#"meta[property="og:price:amount"], meta[property="product:price:amount"]"#));
static SHIPPING: LazyLock<Selector> = LazyLock::new(|| sel(".Pdt_shipping"));
static SHIPPING_NOTE: LazyLock<Selector> = LazyLock::new(|| sel(".Pdt_shipping p"));
static NOTE: LazyLock<Selector> = LazyLock::new(|| sel("#Pdt_note > div, #Pdt_note, .Pdt_note > div"));

static LARGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)_1024x1024\.(?:jpe?g|png|webp)$").unwrap());
static DAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日").unwrap());
static MONTH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{4})\s*年\s*(\d{1,2})\s*月").unwrap());
static AUDITION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"試聴.*$").unwrap());

/// hololive production official store (Shopify theme). Variants carry their
/// own prices, reported as `name：price` pairs.
pub fn scrape(url: &Url, doc: &Html) -> Detail {
    let mut title = first_text(doc, &TITLE);
    if title.is_empty() {
        title = attr_of(doc, &OG_TITLE, "content");
    }

    let all_images = images(doc, &SLIDES, url);
    let large: Vec<String> = all_images.iter().filter(|u| LARGE_RE.is_match(u)).cloned().collect();

    let mut detail = Detail {
        title,
        body: body(doc),
        images: if large.is_empty() { all_images } else { large },
        price_value: option_prices(doc),
        bonus: section_text(doc, "特典").unwrap_or_default(),
        overview: doc.select(&NOTE).next().map(text_with_breaks).unwrap_or_default(),
        ..Detail::default()
    };
    if detail.price_value.is_empty() {
        detail.price_value = price_digits(&attr_of(doc, &META_PRICE, "content"));
    }

    let window = first_text(doc, &SHIPPING_NOTE);
    let mut days = DAY_RE.captures_iter(&window).map(|c| ymd(&c[1], &c[2], Some(&c[3])));
    detail.preorder_start = days.next().unwrap_or_default();
    detail.preorder_end = days.next().unwrap_or_default();

    if let Some(section) = doc.select(&SHIPPING).next() {
        let text = section.text().collect::<String>();
        let scope = text.find("お届け予定日").map_or(text.as_str(), |i| &text[i..]);
        detail.shipping_date = DAY_RE
            .captures(scope)
            .map(|c| ymd(&c[1], &c[2], Some(&c[3])))
            .or_else(|| MONTH_RE.captures(scope).map(|c| ymd(&c[1], &c[2], None)))
            .unwrap_or_default();
    }
    detail
}

fn ymd(year: &str, month: &str, day: Option<&str>) -> String {
    let num = |s: &str| s.parse::<u32>().unwrap_or_default();
    match day {
        Some(d) => format!("{}-{:02}-{:02}", year, num(month), num(d)),
        None => format!("{}-{:02}", year, num(month)),
    }
}

/// Description followed by the "グッズ詳細" accordion, or the first
/// non-empty accordion when that one is missing.
fn body(doc: &Html) -> String {
    let mut parts = Vec::new();
    if let Some(desc) = doc.select(&DESCRIPTION).next() {
        parts.push(text_with_breaks(desc));
    }
    let goods = section_text(doc, "グッズ詳細").or_else(|| {
        doc.select(&DETAILS)
            .map(details_text)
            .find(|t| !t.is_empty())
    });
    parts.extend(goods);
    parts.into_iter().filter(|p| !p.is_empty()).join("\n")
}

fn section_text(doc: &Html, label: &str) -> Option<String> {
    doc.select(&DETAILS)
        .find(|d| {
            d.select(&SUMMARY)
                .next()
                .is_some_and(|s| s.text().collect::<String>().contains(label))
        })
        .map(details_text)
}

fn details_text(details: ElementRef<'_>) -> String {
    text_with_breaks(details.select(&DETAILS_BODY).next().unwrap_or(details))
}

fn option_prices(doc: &Html) -> String {
    doc.select(&OPTION)
        .filter_map(|opt| {
            let name = opt
                .select(&OPTION_TITLE)
                .next()
                .map(|t| normalize_text(&t.text().collect::<String>()))
                .unwrap_or_default();
            let name = AUDITION_RE.replace(&name, "").trim().to_string();
            let price = opt
                .select(&OPTION_PRICE)
                .next()
                .map(|p| price_digits(&p.text().collect::<String>()))
                .unwrap_or_default();
            (!name.is_empty() && !price.is_empty()).then(|| format!("{name}：{price}"))
        })
        .unique()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><meta property="og:title" content="ignored"></head><body>
      <section class="Pdt_heading"><h1 class="Pdt_title">兎田ぺこら 誕生日記念2025</h1></section>
      <div id="swiper-product"><div class="swiper-wrapper">
        <div class="swiper-slide"><img src="//shop.hololivepro.com/cdn/shop/files/pekora_1024x1024.jpg?v=1"></div>
        <div class="swiper-slide"><img src="//shop.hololivepro.com/cdn/shop/files/pekora_small.jpg"></div>
      </div></div>
      <div class="Pdt_description"><p>誕生日を記念したグッズが登場！</p></div>
      <div class="Pdt_variant">
        <div class="Option"><label><span class="Option_title">フルセット</span><span class="Option_price"><span class="money">¥16,500</span></span></label></div>
        <div class="Option"><label><span class="Option_title">アクリルスタンド 試聴あり</span><span class="money">¥2,200</span></label></div>
        <div class="Option"><label><span class="Option_title">売り切れ</span></label></div>
      </div>
      <section class="Pdt_shipping"><p>受注期間：2025年1月12日 18:00 ～ 2025年2月3日 23:59</p>
        <p>お届け予定日：2025年5月下旬より順次発送予定</p></section>
      <section class="Pdt">
        <details><summary>グッズ詳細</summary><div class="details_inner">サイズ：約W100×H150mm<br>素材：アクリル</div></details>
        <details><summary>購入特典</summary><div>ブロマイド 1枚</div></details>
      </section>
      <div id="Pdt_note"><div>※画像はイメージです</div></div>
    </body></html>"#;

    #[test]
    fn reads_product_page() {
        let url = Url::parse("https://shop.hololivepro.com/products/pekora-birthday-2025").unwrap();
        let d = scrape(&url, &Html::parse_document(PAGE));
        assert_eq!(d.title, "兎田ぺこら 誕生日記念2025");
        assert_eq!(d.images, vec!["https://shop.hololivepro.com/cdn/shop/files/pekora_1024x1024.jpg"]);
        assert_eq!(d.price_value, "フルセット：16500, アクリルスタンド：2200");
        assert_eq!(d.preorder_start, "2025-01-12");
        assert_eq!(d.preorder_end, "2025-02-03");
        assert_eq!(d.shipping_date, "2025-05");
        assert_eq!(d.body, "誕生日を記念したグッズが登場！\nサイズ：約W100×H150mm\n素材：アクリル");
        assert_eq!(d.bonus, "ブロマイド 1枚");
        assert_eq!(d.overview, "※画像はイメージです");
    }

    #[test]
    fn og_title_and_meta_price_fallbacks() {
        let html = r#"<head><meta property="og:title" content="Tapestry">
            <meta property="og:price:amount" content="3300.00"></head><body></body>"#;
        let url = Url::parse("https://shop.hololivepro.com/products/tapestry").unwrap();
        let d = scrape(&url, &Html::parse_document(html));
        assert_eq!(d.title, "Tapestry");
        assert_eq!(d.price_value, "3300");
        assert_eq!(d.shipping_date, "");
    }
}
