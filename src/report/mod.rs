pub mod sheets;
pub mod workbook;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::detail::Detail;
use crate::error::SinkError;
use crate::model::ItemRecord;
use crate::normalize::{price_digits, title_key};

pub use sheets::SheetsSink;
pub use workbook::WorkbookSink;

/// Column order used when a worksheet has to be created.
pub const SHEET_HEADERS: &[&str] = &[
    "Date", "Title", "SourceTitle", "slug", "BodySource", "Body", "Tags", "category", "Keyword",
    "AffiliateLink", "ImageURL", "PriceValue", "PriceTaxIncluded", "PriceCurrency", "JAN",
    "TitleKey", "PreorderStart", "PreorderEnd", "ReleaseDate", "ShippingDate", "Maker",
    "Materials", "AgeRating", "Copyright", "Series", "Modeler", "Character", "SourceURL", "Bonus",
    "overview", "UpdatedAt", "WPPostID", "WPPostURL", "SourceHash", "NeedsReview", "status",
];

/// Appends rows to a named worksheet-like target.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn append(&self, worksheet: &str, rows: &[ReportRow]) -> Result<usize, SinkError>;
}

/// One sheet row, as header name -> cell value. Unset headers stay blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    fields: Vec<(&'static str, String)>,
}

impl ReportRow {
    /// A row from the listing entry, filled out with whatever its product
    /// page said. Page values win over listing values.
    pub fn from_item(item: &ItemRecord, detail: Option<&Detail>, now: DateTime<Utc>) -> Self {
        let empty = Detail::default();
        let d = detail.unwrap_or(&empty);

        let title = [&d.title, &item.title, &d.character]
            .into_iter()
            .find(|t| !t.is_empty())
            .cloned()
            .unwrap_or_default();
        let price = if d.price_value.is_empty() {
            price_digits(&item.price)
        } else {
            d.price_value.clone()
        };
        let currency = if price.is_empty() { "" } else { "JPY" };
        let body_source = detail
            .and_then(|d| serde_json::to_string(d).ok())
            .unwrap_or_default();
        let images = d.images.join(",\n");
        let hash = source_hash(&[
            title.as_str(), &d.body, &d.overview, &d.bonus, &price, &d.price_tax_included, currency,
            &d.preorder_start, &d.preorder_end, &d.release_date, &d.shipping_date, &d.maker,
            &d.materials, &d.modeler, &d.character, &d.series, &d.tags, &d.copyright,
            &d.images.join("|"), &item.url,
        ]);
        // sheet consumers read dates in Japan time
        let jst = now + Duration::hours(9);

        ReportRow {
            fields: vec![
                ("Date", jst.format("%Y/%m/%d %H:%M:%S").to_string()),
                ("Title", title.clone()),
                ("SourceTitle", title.clone()),
                ("BodySource", body_source),
                ("Body", d.body.clone()),
                ("Tags", d.tags.clone()),
                ("ImageURL", images),
                ("PriceValue", price),
                ("PriceTaxIncluded", d.price_tax_included.clone()),
                ("PriceCurrency", currency.to_string()),
                ("JAN", d.jan.clone()),
                ("TitleKey", title_key(&title)),
                ("PreorderStart", d.preorder_start.clone()),
                ("PreorderEnd", d.preorder_end.clone()),
                ("ReleaseDate", d.release_date.clone()),
                ("ShippingDate", d.shipping_date.clone()),
                ("Maker", d.maker.clone()),
                ("Materials", d.materials.clone()),
                ("AgeRating", d.age_rating.clone()),
                ("Copyright", d.copyright.clone()),
                ("Series", d.series.clone()),
                ("Modeler", d.modeler.clone()),
                ("Character", d.character.clone()),
                ("SourceURL", item.url.clone()),
                ("Bonus", d.bonus.clone()),
                ("overview", d.overview.clone()),
                ("UpdatedAt", now.to_rfc3339()),
                ("SourceHash", hash),
                ("NeedsReview", "FALSE".to_string()),
            ]
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .collect(),
        }
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        let key = canon_key(header);
        self.fields
            .iter()
            .find(|(h, _)| canon_key(h) == key)
            .map(|(_, v)| v.as_str())
    }

    /// Cells laid out under an existing header row. Header matching ignores
    /// case, spacing and punctuation.
    pub fn to_cells<S: AsRef<str>>(&self, headers: &[S]) -> Vec<String> {
        headers
            .iter()
            .map(|h| self.get(h.as_ref()).unwrap_or_default().to_string())
            .collect()
    }
}

fn source_hash(parts: &[&str]) -> String {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    format!("{:08x}", hasher.finalize())
}

pub fn canon_key(s: &str) -> String {
    s.trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}
