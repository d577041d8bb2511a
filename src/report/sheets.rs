use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use super::{canon_key, ReportRow, ReportSink, SHEET_HEADERS};
use crate::error::SinkError;

const API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets/";
const DATE_COLUMNS: &[&str] = &["preorderstart", "preorderend", "releasedate", "shippingdate"];

static MONTH_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}$").unwrap());

/// Google Sheets values API. The worksheet is created with the standard
/// header row on first use; rows follow whatever header row the sheet has.
pub struct SheetsSink {
    client: reqwest::Client,
    base: Url,
    spreadsheet_id: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_rows: Option<usize>,
}

impl SheetsSink {
    pub fn new(spreadsheet_id: &str, token: &str, timeout_secs: u64) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let base = Url::parse(API_BASE).map_err(|e| SinkError::Target(e.to_string()))?;
        Ok(SheetsSink {
            client,
            base,
            spreadsheet_id: spreadsheet_id.to_string(),
            token: token.to_string(),
        })
    }

    /// `{base}/{spreadsheet_id}{suffix}` followed by `segments`. Segments are
    /// percent-encoded, so worksheet names may hold any character.
    fn endpoint(&self, suffix: &str, segments: &[&str]) -> Result<Url, SinkError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SinkError::Target(self.base.to_string()))?
            .pop_if_empty()
            .push(&format!("{}{}", self.spreadsheet_id, suffix))
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.token)
    }

    async fn sheet_titles(&self) -> Result<Vec<String>, SinkError> {
        let mut url = self.endpoint("", &[])?;
        url.query_pairs_mut().append_pair("fields", "sheets.properties.title");
        let resp = checked(self.request(Method::GET, url).send().await?).await?;
        let meta: Spreadsheet = resp.json().await?;
        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    async fn add_sheet(&self, worksheet: &str) -> Result<(), SinkError> {
        let url = self.endpoint(":batchUpdate", &[])?;
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": worksheet } } }]
        });
        checked(self.request(Method::POST, url).json(&body).send().await?).await?;

        let mut url = self.endpoint("", &["values", &a1_range(worksheet, "A1")])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = json!({ "values": [SHEET_HEADERS] });
        checked(self.request(Method::PUT, url).json(&body).send().await?).await?;
        info!(worksheet, "created worksheet");
        Ok(())
    }

    async fn header_row(&self, worksheet: &str) -> Result<Vec<String>, SinkError> {
        let url = self.endpoint("", &["values", &a1_range(worksheet, "1:1")])?;
        let resp = checked(self.request(Method::GET, url).send().await?).await?;
        let range: ValueRange = resp.json().await?;
        Ok(range.values.into_iter().next().unwrap_or_default())
    }
}

#[async_trait]
impl ReportSink for SheetsSink {
    async fn append(&self, worksheet: &str, rows: &[ReportRow]) -> Result<usize, SinkError> {
        if worksheet.trim().is_empty() {
            return Err(SinkError::Target(worksheet.to_string()));
        }
        if rows.is_empty() {
            return Ok(0);
        }

        if !self.sheet_titles().await?.iter().any(|t| t == worksheet) {
            self.add_sheet(worksheet).await?;
        }
        let mut headers = self.header_row(worksheet).await?;
        if headers.iter().all(|h| h.trim().is_empty()) {
            headers = SHEET_HEADERS.iter().map(|h| h.to_string()).collect();
        }
        let values: Vec<Vec<String>> = rows.iter().map(|r| entered_cells(r, &headers)).collect();

        let append_range = format!("{}:append", a1_range(worksheet, "A1"));
        let mut url = self.endpoint("", &["values", &append_range])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let resp = checked(
            self.request(Method::POST, url)
                .json(&json!({ "values": values }))
                .send()
                .await?,
        )
        .await?;
        let out: AppendResponse = resp.json().await?;
        let written = out
            .updates
            .and_then(|u| u.updated_rows)
            .unwrap_or(values.len());
        debug!(worksheet, rows = written, "rows appended");
        Ok(written)
    }
}

async fn checked(resp: Response) -> Result<Response, SinkError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SinkError::Api {
        status: status.as_u16(),
        body: body.chars().take(500).collect(),
    })
}

/// Cells as typed under `USER_ENTERED`. A month-only value in a date column
/// gets a leading apostrophe so it stays text; full dates are left to parse.
fn entered_cells(row: &ReportRow, headers: &[String]) -> Vec<String> {
    row.to_cells(headers)
        .into_iter()
        .zip(headers)
        .map(|(value, header)| {
            if DATE_COLUMNS.contains(&canon_key(header).as_str()) && MONTH_ONLY_RE.is_match(&value) {
                format!("'{value}")
            } else {
                value
            }
        })
        .collect()
}

/// A1 notation with the sheet name quoted: `'It''s'!A1`.
fn a1_range(worksheet: &str, cells: &str) -> String {
    format!("'{}'!{}", worksheet.replace('\'', "''"), cells)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::detail::Detail;
    use crate::model::ItemRecord;

    fn sink() -> SheetsSink {
        SheetsSink::new("sheet-123", "token", 5).unwrap()
    }

    #[test]
    fn quotes_sheet_names() {
        assert_eq!(a1_range("Product", "1:1"), "'Product'!1:1");
        assert_eq!(a1_range("Pekora's", "A1"), "'Pekora''s'!A1");
    }

    #[test]
    fn builds_endpoints() {
        let s = sink();
        assert_eq!(
            s.endpoint(":batchUpdate", &[]).unwrap().as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-123:batchUpdate"
        );
        let url = s
            .endpoint("", &["values", &format!("{}:append", a1_range("Product", "A1"))])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-123/values/'Product'!A1:append"
        );
    }

    #[test]
    fn encodes_odd_worksheet_names() {
        let url = sink()
            .endpoint("", &["values", &a1_range("new items/#1", "1:1")])
            .unwrap();
        assert!(url.path().ends_with("/values/'new%20items%2F%231'!1:1"));
    }

    #[test]
    fn month_only_dates_stay_text() {
        let item = ItemRecord {
            id: "1".into(),
            title: "Acrylic Stand".into(),
            price: String::new(),
            url: "https://shop.example.jp/items/1".into(),
            site_id: "shop".into(),
        };
        let detail = Detail {
            release_date: "2025-08".into(),
            shipping_date: "2025-09-15".into(),
            preorder_end: "2025-07".into(),
            ..Detail::default()
        };
        let row = ReportRow::from_item(&item, Some(&detail), Utc::now());
        let headers: Vec<String> = ["Release Date", "ShippingDate", "PreorderEnd", "Title"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        assert_eq!(
            entered_cells(&row, &headers),
            vec!["'2025-08", "2025-09-15", "'2025-07", "Acrylic Stand"]
        );
    }

    #[test]
    fn reads_append_response() {
        let out: AppendResponse =
            serde_json::from_str(r#"{"spreadsheetId":"x","updates":{"updatedRows":3}}"#).unwrap();
        assert_eq!(out.updates.and_then(|u| u.updated_rows), Some(3));
        let empty: ValueRange = serde_json::from_str(r#"{"range":"'Product'!A1:Z1"}"#).unwrap();
        assert!(empty.values.is_empty());
    }
}
