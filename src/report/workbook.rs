use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use itertools::Itertools;
use rusqlite::Connection;
use tracing::debug;

use super::{ReportRow, ReportSink, SHEET_HEADERS};
use crate::error::SinkError;

/// Local report sink: an SQLite file with one table per worksheet. Tables
/// are created with the standard headers as TEXT columns; an existing
/// table's own columns decide what gets written. The file is opened on the
/// first append.
pub struct WorkbookSink {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl WorkbookSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        WorkbookSink {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }
}

fn open(path: &Path) -> Result<Connection, SinkError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| SinkError::Target(format!("{}: {}", dir.display(), e)))?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    debug!(path = %path.display(), "workbook opened");
    Ok(conn)
}

#[async_trait]
impl ReportSink for WorkbookSink {
    async fn append(&self, worksheet: &str, rows: &[ReportRow]) -> Result<usize, SinkError> {
        let name = worksheet.trim();
        if name.is_empty() || name.to_ascii_lowercase().starts_with("sqlite_") {
            return Err(SinkError::Target(worksheet.to_string()));
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(open(&self.path)?);
        }
        let Some(conn) = guard.as_ref() else {
            return Err(SinkError::Target(self.path.display().to_string()));
        };
        let columns = ensure_sheet(conn, name)?;

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(name),
            columns.iter().map(|c| quote_ident(c)).join(", "),
            (1..=columns.len()).map(|i| format!("?{i}")).join(", "),
        );
        let tx = conn.unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                count += stmt.execute(rusqlite::params_from_iter(row.to_cells(&columns)))?;
            }
        }
        tx.commit()?;
        debug!(worksheet = name, rows = count, "rows appended to workbook");
        Ok(count)
    }
}

/// Create the worksheet table if needed and return its data columns.
fn ensure_sheet(conn: &Connection, worksheet: &str) -> Result<Vec<String>, SinkError> {
    let table = quote_ident(worksheet);
    let cols = SHEET_HEADERS
        .iter()
        .map(|h| format!("{} TEXT", quote_ident(h)))
        .join(",\n            ");
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            row_id      INTEGER PRIMARY KEY,
            {cols},
            appended_at TEXT NOT NULL DEFAULT (datetime('now'))
        );"
    ))?;

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names
        .into_iter()
        .filter(|n| n != "row_id" && n != "appended_at")
        .collect())
}

fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::model::ItemRecord;

    fn item(id: &str) -> ItemRecord {
        ItemRecord {
            id: id.into(),
            title: format!("title {id}"),
            price: "3,300円".into(),
            url: format!("https://shop.example.jp/items/{id}"),
            site_id: "shop".into(),
        }
    }

    fn rows_for(items: &[ItemRecord], now: chrono::DateTime<Utc>) -> Vec<ReportRow> {
        items.iter().map(|it| ReportRow::from_item(it, None, now)).collect()
    }

    fn column(path: &Path, ws: &str, col: &str) -> Vec<String> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM {} ORDER BY rowid", quote_ident(col), quote_ident(ws)))
            .unwrap();
        let out = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        out
    }

    #[tokio::test]
    async fn creates_sheet_and_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data/report.sqlite");
        let sink = WorkbookSink::new(&path);
        assert!(!path.exists());
        let rows = rows_for(&[item("a"), item("b")], Utc::now());
        assert_eq!(sink.append("Product", &rows).await.unwrap(), 2);
        assert_eq!(sink.append("Product", &rows[..1]).await.unwrap(), 1);

        assert_eq!(
            column(&path, "Product", "SourceURL"),
            vec![
                "https://shop.example.jp/items/a",
                "https://shop.example.jp/items/b",
                "https://shop.example.jp/items/a",
            ]
        );
        assert_eq!(column(&path, "Product", "PriceValue"), vec!["3300"; 3]);
    }

    #[tokio::test]
    async fn follows_existing_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch(r#"CREATE TABLE "Legacy Sheet" ("Source URL" TEXT, "title" TEXT, "notes" TEXT);"#)
            .unwrap();
        let sink = WorkbookSink::new(&path);

        sink.append("Legacy Sheet", &rows_for(&[item("x")], Utc::now())).await.unwrap();
        assert_eq!(column(&path, "Legacy Sheet", "Source URL"), vec!["https://shop.example.jp/items/x"]);
        assert_eq!(column(&path, "Legacy Sheet", "title"), vec!["title x"]);
        assert_eq!(column(&path, "Legacy Sheet", "notes"), vec![""]);
    }

    #[tokio::test]
    async fn rejects_bad_worksheet() {
        let dir = TempDir::new().unwrap();
        let sink = WorkbookSink::new(dir.path().join("report.sqlite"));
        let rows = rows_for(&[item("a")], Utc::now());
        assert!(matches!(sink.append("  ", &rows).await, Err(SinkError::Target(_))));
        assert!(matches!(sink.append("sqlite_master", &rows).await, Err(SinkError::Target(_))));
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.sqlite");
        {
            let sink = WorkbookSink::new(&path);
            sink.append("Product", &rows_for(&[item("a")], Utc::now())).await.unwrap();
        }
        let sink = WorkbookSink::new(&path);
        sink.append("Product", &rows_for(&[item("b")], Utc::now())).await.unwrap();
        assert_eq!(column(&path, "Product", "Title"), vec!["title a", "title b"]);
    }
}
