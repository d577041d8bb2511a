pub mod amiami;
pub mod bandai_candy;
pub mod hololive;

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use itertools::Itertools;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::fetch::{PageClient, WebClient};
use crate::normalize::{normalize_text, release_date};

static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title, h1, h2").unwrap());
// first match wins, in this order
static CONTENT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["main", "article", "body"]
        .iter()
        .map(|css| Selector::parse(css).unwrap())
        .collect()
});
static IMG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());
static SRCSET_WIDTH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s(\d+)[wx]$").unwrap());
static DATE_ONLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}(?:-\d{2})?$").unwrap());

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "li", "h1", "h2", "h3", "h4", "h5", "h6", "section", "ul", "ol", "table", "tr",
    "thead", "tbody", "tfoot", "dl", "dt", "dd",
];

/// Product facts read from an item's own page. Empty means the page did not say.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Detail {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub overview: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub price_value: String,
    /// `TRUE`, `FALSE`, or empty when the page does not say.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub price_tax_included: String,
    #[serde(rename = "JAN", skip_serializing_if = "String::is_empty")]
    pub jan: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub release_date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub preorder_start: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub preorder_end: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub shipping_date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub maker: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub series: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub character: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub modeler: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub materials: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub copyright: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub age_rating: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tags: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bonus: String,
}

/// Which scraper reads a product page, chosen by host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLayout {
    Amiami,
    BandaiCandy,
    HololiveStore,
    /// Any other shop: page title, main text and images.
    Fallback,
}

impl PageLayout {
    pub fn for_url(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if host_is(&host, "amiami.jp") {
            PageLayout::Amiami
        } else if host_is(&host, "bandai.co.jp") && url.path().contains("/candy/") {
            PageLayout::BandaiCandy
        } else if host_is(&host, "shop.hololivepro.com") {
            PageLayout::HololiveStore
        } else {
            PageLayout::Fallback
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PageLayout::Amiami => "amiami",
            PageLayout::BandaiCandy => "bandai_candy",
            PageLayout::HololiveStore => "hololive_store",
            PageLayout::Fallback => "generic",
        }
    }
}

fn host_is(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|rest| rest.ends_with('.'))
}

/// Read `html` (fetched from `url`) with the scraper for its host.
pub fn scrape(url: &Url, html: &str) -> Detail {
    let doc = Html::parse_document(html);
    match PageLayout::for_url(url) {
        PageLayout::Amiami => amiami::scrape(url, &doc),
        PageLayout::BandaiCandy => bandai_candy::scrape(url, &doc),
        PageLayout::HololiveStore => hololive::scrape(url, &doc),
        PageLayout::Fallback => fallback(url, &doc),
    }
}

fn fallback(url: &Url, doc: &Html) -> Detail {
    Detail {
        title: first_text(doc, &TITLE),
        body: CONTENT
            .iter()
            .find_map(|sel| doc.select(sel).next())
            .map(text_with_breaks)
            .unwrap_or_default(),
        images: images(doc, &IMG, url),
        ..Detail::default()
    }
}

/// Looks up product pages for newly listed items.
#[async_trait]
pub trait DetailSource: Send + Sync {
    async fn detail(&self, url: &Url) -> Result<Detail, FetchError>;
}

pub struct PageDetails<C = WebClient> {
    client: C,
}

impl<C: PageClient> PageDetails<C> {
    pub fn new(client: C) -> Self {
        PageDetails { client }
    }
}

#[async_trait]
impl<C: PageClient> DetailSource for PageDetails<C> {
    async fn detail(&self, url: &Url) -> Result<Detail, FetchError> {
        let html = self.client.get_text(url).await?;
        let layout = PageLayout::for_url(url);
        let detail = scrape(url, &html);
        if detail.title.is_empty() && detail.body.is_empty() {
            return Err(FetchError::ParseFormat {
                url: url.to_string(),
                reason: format!("{} product page has no title or text", layout.name()),
            });
        }
        debug!(url = %url, layout = layout.name(), images = detail.images.len(), "detail page read");
        Ok(detail)
    }
}

pub(crate) fn first_text(doc: &Html, selector: &Selector) -> String {
    doc.select(selector)
        .map(|el| normalize_text(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
        .unwrap_or_default()
}

pub(crate) fn attr_of(doc: &Html, selector: &Selector, name: &str) -> String {
    doc.select(selector)
        .filter_map(|el| el.value().attr(name))
        .map(normalize_text)
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

/// Element text with block elements and `<br>` turned into line breaks.
/// Scripts and styles are dropped; blank lines are removed.
pub(crate) fn text_with_breaks(el: ElementRef<'_>) -> String {
    let mut raw = String::new();
    push_text(el, &mut raw);
    raw.lines().map(normalize_text).filter(|l| !l.is_empty()).join("\n")
}

fn push_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(e) => {
                let name = e.name();
                if matches!(name, "script" | "style") {
                    continue;
                }
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                if let Some(inner) = ElementRef::wrap(child) {
                    push_text(inner, out);
                }
                if BLOCK_TAGS.contains(&name) {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Image URLs under `selector`: the widest `srcset` candidate plus
/// `data-src`/`src`, absolute, without query strings, first occurrence kept.
pub(crate) fn images(doc: &Html, selector: &Selector, base: &Url) -> Vec<String> {
    let mut found = Vec::new();
    for el in doc.select(selector) {
        let attrs = el.value();
        if let Some(best) = attrs.attr("srcset").and_then(best_from_srcset) {
            found.extend(absolute(base, best));
        }
        if let Some(src) = attrs.attr("data-src").or_else(|| attrs.attr("src")) {
            found.extend(absolute(base, src));
        }
    }
    uniq(found)
}

pub(crate) fn best_from_srcset(srcset: &str) -> Option<&str> {
    srcset
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .filter_map(|c| {
            let url = c.split_whitespace().next()?;
            let width = SRCSET_WIDTH_RE
                .captures(c)
                .and_then(|m| m[1].parse::<u32>().ok())
                .unwrap_or(0);
            Some((width, url))
        })
        .rev()
        .max_by_key(|(w, _)| *w)
        .map(|(_, url)| url)
}

/// `href` resolved against `base` with query and fragment removed.
pub(crate) fn absolute(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("data:") {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

pub(crate) fn uniq(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

/// `release_date` output only when it is an actual `YYYY-MM[-DD]` date.
pub(crate) fn date_only(raw: &str) -> String {
    let date = release_date(raw);
    if DATE_ONLY_RE.is_match(&date) {
        date
    } else {
        String::new()
    }
}

/// `TRUE`/`FALSE` from Japanese tax wording, empty when neither appears.
pub(crate) fn tax_flag(text: &str) -> String {
    if text.contains("税込") {
        "TRUE".into()
    } else if text.contains("税抜") {
        "FALSE".into()
    } else {
        String::new()
    }
}
