use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};
use url::Url;

use crate::config::SiteDescriptor;
use crate::detail::DetailSource;
use crate::diff::diff;
use crate::error::{ConfigError, RunError};
use crate::fetch::ListingSource;
use crate::model::ItemRecord;
use crate::normalize::title_matches;
use crate::notify::Notifier;
use crate::report::{ReportRow, ReportSink};
use crate::state;

const MAX_ERROR_LINES: usize = 10;

/// What this invocation should do, decided once from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    FullSweep,
    SingleUrl(Url),
}

impl Intent {
    /// `--url` beats a positional argument, which beats `MANUAL_ITEM_URL`.
    /// Blank values count as absent.
    pub fn resolve(
        flag: Option<&str>,
        positional: Option<&str>,
        env: Option<&str>,
    ) -> Result<Intent, ConfigError> {
        let Some(raw) = [flag, positional, env]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
        else {
            return Ok(Intent::FullSweep);
        };

        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason,
        };
        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(Intent::SingleUrl(url)),
            other => Err(invalid(format!("unsupported scheme {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteStatus {
    Ok,
    FetchFailed,
    PersistenceFailed,
    ReportFailed,
    NotifyFailed,
    /// The site's task died before reporting back.
    Aborted,
}

impl SiteStatus {
    fn of(err: &RunError) -> Self {
        match err {
            RunError::Fetch(_) => SiteStatus::FetchFailed,
            RunError::Persistence(_) => SiteStatus::PersistenceFailed,
            RunError::Sink(_) => SiteStatus::ReportFailed,
            RunError::Notify(_) => SiteStatus::NotifyFailed,
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SiteStatus::Ok => "ok",
            SiteStatus::FetchFailed => "fetch failed",
            SiteStatus::PersistenceFailed => "persistence failed",
            SiteStatus::ReportFailed => "report failed",
            SiteStatus::NotifyFailed => "notify failed",
            SiteStatus::Aborted => "aborted",
        })
    }
}

#[derive(Debug)]
pub struct SiteReport {
    pub site_id: String,
    pub status: SiteStatus,
    pub new_items: Vec<ItemRecord>,
    pub unchanged: usize,
    /// `new_items` made it into the worksheet.
    pub reported: bool,
    /// Product pages that could not be read; their rows carry listing data only.
    pub detail_errors: Vec<String>,
    pub error: Option<String>,
}

impl SiteReport {
    fn new(site_id: &str) -> Self {
        SiteReport {
            site_id: site_id.to_string(),
            status: SiteStatus::Ok,
            new_items: Vec::new(),
            unchanged: 0,
            reported: false,
            detail_errors: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub sites: Vec<SiteReport>,
}

impl RunReport {
    pub fn failures(&self) -> usize {
        self.sites.iter().filter(|s| s.status != SiteStatus::Ok).count()
    }

    /// NEW items that were written to the worksheet. Items found by a site
    /// whose report failed are still pending and are not counted.
    pub fn new_items(&self) -> usize {
        self.sites
            .iter()
            .filter(|s| s.reported)
            .map(|s| s.new_items.len())
            .sum()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ManualOptions {
    /// Append rows and commit state.
    pub write: bool,
    /// Post the summary to the site's channel.
    pub notify: bool,
}

#[derive(Debug)]
pub struct ManualReport {
    pub site_id: String,
    pub url: Url,
    pub fetched: usize,
    pub new_items: Vec<ItemRecord>,
    pub unchanged: usize,
    pub detail_errors: Vec<String>,
    pub reported: bool,
    pub notified: bool,
    pub saved: bool,
}

/// Drives sites through fetch, diff, enrich, report, notify and save.
#[derive(Clone)]
pub struct Monitor {
    source: Arc<dyn ListingSource>,
    details: Arc<dyn DetailSource>,
    sink: Arc<dyn ReportSink>,
    notifier: Arc<dyn Notifier>,
    worksheet: String,
}

impl Monitor {
    pub fn new(
        source: Arc<dyn ListingSource>,
        details: Arc<dyn DetailSource>,
        sink: Arc<dyn ReportSink>,
        notifier: Arc<dyn Notifier>,
        worksheet: impl Into<String>,
    ) -> Self {
        Monitor {
            source,
            details,
            sink,
            notifier,
            worksheet: worksheet.into(),
        }
    }

    /// Run every site once. A failing site is recorded and the sweep moves on.
    /// Results come back in `sites` order whatever `jobs` is.
    pub async fn sweep(&self, sites: &[SiteDescriptor], jobs: usize) -> RunReport {
        let pb = progress_bar(sites.len());
        let reports = if jobs <= 1 || sites.len() <= 1 {
            let mut out = Vec::with_capacity(sites.len());
            for site in sites {
                pb.set_message(site.id.clone());
                out.push(self.run_site(site).await);
                pb.inc(1);
            }
            out
        } else {
            self.sweep_parallel(sites, jobs, &pb).await
        };
        pb.finish_and_clear();

        let report = RunReport { sites: reports };
        info!(
            sites = report.sites.len(),
            failed = report.failures(),
            new = report.new_items(),
            "sweep finished"
        );
        report
    }

    async fn sweep_parallel(&self, sites: &[SiteDescriptor], jobs: usize, pb: &ProgressBar) -> Vec<SiteReport> {
        let semaphore = Arc::new(Semaphore::new(jobs));
        let (tx, mut rx) = mpsc::channel::<(usize, SiteReport)>(jobs * 2);

        for (idx, site) in sites.iter().cloned().enumerate() {
            let monitor = self.clone();
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return;
                };
                let report = monitor.run_site(&site).await;
                let _ = tx.send((idx, report)).await;
            });
        }
        // rx closes once every task has dropped its sender
        drop(tx);

        let mut slots: Vec<Option<SiteReport>> = sites.iter().map(|_| None).collect();
        while let Some((idx, report)) = rx.recv().await {
            pb.inc(1);
            slots[idx] = Some(report);
        }

        slots
            .into_iter()
            .zip(sites)
            .map(|(slot, site)| {
                slot.unwrap_or_else(|| {
                    warn!(site = %site.id, "site task ended without a result");
                    SiteReport {
                        status: SiteStatus::Aborted,
                        ..SiteReport::new(&site.id)
                    }
                })
            })
            .collect()
    }

    /// One site's full cycle. State is committed only after report and notify succeed.
    pub async fn run_site(&self, site: &SiteDescriptor) -> SiteReport {
        let mut report = SiteReport::new(&site.id);

        let items = match self.source.fetch_listing(site).await {
            Ok(items) => items,
            Err(e) => {
                warn!(site = %site.id, kind = e.kind(), "fetch failed: {}", e);
                report.status = SiteStatus::FetchFailed;
                report.error = Some(e.to_string());
                return report;
            }
        };

        if let Err(e) = self.process(site, items, &mut report).await {
            warn!(site = %site.id, "{} after fetch: {}", SiteStatus::of(&e), e);
            report.status = SiteStatus::of(&e);
            report.error = Some(e.to_string());
            if !matches!(e, RunError::Notify(_)) {
                let message = format!("{}: {}", report.status, e);
                self.post_error(site, &message).await;
            }
        }
        if !report.detail_errors.is_empty() {
            self.post_error(site, &detail_error_notice(&report.detail_errors)).await;
        }
        report
    }

    async fn post_error(&self, site: &SiteDescriptor, message: &str) {
        if let Err(e) = self.notifier.notify_error(site, message).await {
            warn!(site = %site.id, "could not post error notice: {}", e);
        }
    }

    async fn process(
        &self,
        site: &SiteDescriptor,
        items: Vec<ItemRecord>,
        report: &mut SiteReport,
    ) -> Result<(), RunError> {
        let fetched = items.len();
        let matching: Vec<ItemRecord> = items
            .into_iter()
            .filter(|it| title_matches(&it.title, &site.keywords))
            .collect();
        info!(site = %site.id, fetched, matching = matching.len(), "items collected");
        if fetched > 0 && matching.is_empty() && !site.keywords.is_empty() {
            warn!(
                site = %site.id,
                fetched,
                keywords = %site.keywords.join(", "),
                "keyword filter removed every item"
            );
        }

        let known = state::load(&site.state_path)?;
        let (result, updated) = diff(&site.id, matching, &known);
        report.unchanged = result.unchanged_count;
        report.new_items = result.new_items;

        if !report.new_items.is_empty() {
            let rows = self.build_rows(site, &report.new_items, &mut report.detail_errors).await;
            let written = self.sink.append(&self.worksheet, &rows).await?;
            report.reported = true;
            info!(site = %site.id, rows = written, worksheet = %self.worksheet, "reported");
            self.notifier.notify(site, &report.new_items).await?;
            info!(site = %site.id, "notified");
        }

        state::save(&site.state_path, &site.id, &updated)?;
        info!(site = %site.id, known = updated.len(), "state saved");
        Ok(())
    }

    /// One report row per item. Each item's product page is read when the
    /// site asks for it; a page that cannot be read leaves the row with
    /// listing data and adds a line to `errors`.
    async fn build_rows(&self, site: &SiteDescriptor, items: &[ItemRecord], errors: &mut Vec<String>) -> Vec<ReportRow> {
        let now = Utc::now();
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let detail = if site.fetch_details {
                let looked_up = match Url::parse(&item.url) {
                    Ok(url) => self.details.detail(&url).await.map_err(|e| e.to_string()),
                    Err(e) => Err(format!("bad item url: {e}")),
                };
                match looked_up {
                    Ok(d) => Some(d),
                    Err(e) => {
                        warn!(site = %site.id, item = %item.id, "product page skipped: {}", e);
                        errors.push(format!("{}: {}", item.url, e));
                        None
                    }
                }
            } else {
                None
            };
            rows.push(ReportRow::from_item(item, detail.as_ref(), now));
        }
        rows
    }

    /// Fetch exactly `url` with `site`'s rules and diff it against the site's
    /// state. Nothing is written unless `opts` asks for it.
    pub async fn check_url(&self, site: &SiteDescriptor, url: &Url, opts: ManualOptions) -> Result<ManualReport, RunError> {
        let items = self.source.fetch_page(site, url).await?;
        let known = state::load(&site.state_path)?;
        let fetched = items.len();
        let (result, updated) = diff(&site.id, items, &known);
        info!(
            site = %site.id,
            url = %url,
            fetched,
            new = result.new_items.len(),
            write = opts.write,
            notify = opts.notify,
            "manual url diffed"
        );

        let mut out = ManualReport {
            site_id: site.id.clone(),
            url: url.clone(),
            fetched,
            new_items: result.new_items,
            unchanged: result.unchanged_count,
            detail_errors: Vec::new(),
            reported: false,
            notified: false,
            saved: false,
        };
        let has_new = !out.new_items.is_empty();

        if opts.write && has_new {
            let rows = self.build_rows(site, &out.new_items, &mut out.detail_errors).await;
            self.sink.append(&self.worksheet, &rows).await?;
            out.reported = true;
        }
        if opts.notify && has_new {
            self.notifier.notify(site, &out.new_items).await?;
            out.notified = true;
        }
        if opts.write {
            state::save(&site.state_path, &site.id, &updated)?;
            out.saved = true;
        }
        Ok(out)
    }
}

fn detail_error_notice(errors: &[String]) -> String {
    let mut lines = vec![format!("{} product page(s) could not be read:", errors.len())];
    lines.extend(errors.iter().take(MAX_ERROR_LINES).cloned());
    if errors.len() > MAX_ERROR_LINES {
        lines.push(format!("... ({} more)", errors.len() - MAX_ERROR_LINES));
    }
    lines.join("\n")
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}
