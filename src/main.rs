mod config;
mod detail;
mod diff;
mod error;
mod fetch;
mod model;
mod normalize;
mod notify;
mod parser;
mod report;
mod runner;
mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;

use crate::config::{MonitorConfig, Overrides, Settings};
use crate::detail::PageDetails;
use crate::error::ConfigError;
use crate::fetch::{HttpSource, WebClient};
use crate::notify::DiscordNotifier;
use crate::report::{ReportSink, SheetsSink, WorkbookSink};
use crate::runner::{Intent, ManualOptions, ManualReport, Monitor, RunReport, SiteStatus};

#[derive(Parser)]
#[command(
    name = "holo_monitor",
    about = "Watch merchandise listings and report newly listed items"
)]
struct Cli {
    /// Listing or search URL to check instead of sweeping every site
    #[arg(value_name = "URL")]
    target: Option<String>,

    /// Same as the positional URL; wins over it when both are given
    #[arg(short = 'u', long = "url", value_name = "URL")]
    url: Option<String>,

    #[arg(long = "manual-item-url", env = "MANUAL_ITEM_URL", hide = true)]
    manual_item_url: Option<String>,

    /// Site whose parse rules and state a manual URL uses (default: matched by URL)
    #[arg(long)]
    site: Option<String>,

    /// Manual mode: append new items to the sheet and save state
    #[arg(long)]
    write: bool,

    /// Manual mode: post the summary to the site's Discord channel
    #[arg(long, visible_alias = "post-discord")]
    notify: bool,

    /// Site configuration file
    #[arg(short, long, env = "SITES_YAML", default_value = "sites.yaml")]
    config: PathBuf,

    /// Worksheet new items are appended to
    #[arg(long, env = "SHEETS_WORKSHEET_NAME")]
    worksheet: Option<String>,

    /// Directory holding per-site state files
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Sites checked concurrently during a sweep
    #[arg(short, long)]
    jobs: Option<usize>,

    #[arg(long, env = "DISCORD_WEBHOOK_URL", hide_env_values = true)]
    discord_webhook: Option<String>,

    #[arg(long, env = "GOOGLE_SHEETS_ID")]
    sheets_id: Option<String>,

    #[arg(long, env = "GOOGLE_SHEETS_TOKEN", hide_env_values = true)]
    sheets_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let intent = Intent::resolve(
        cli.url.as_deref(),
        cli.target.as_deref(),
        cli.manual_item_url.as_deref(),
    )?;
    let overrides = Overrides {
        state_dir: cli.state_dir.clone(),
        worksheet: cli.worksheet.clone(),
        jobs: cli.jobs,
    };
    let cfg = MonitorConfig::load(&cli.config, &overrides)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let monitor = build_monitor(&cli, &cfg.settings)?;

    let result = match intent {
        Intent::FullSweep => {
            if cfg.sites.is_empty() {
                println!("No sites configured in {}.", cli.config.display());
                return Ok(());
            }
            println!(
                "Checking {} sites ({} at a time)...",
                cfg.sites.len(),
                cfg.settings.jobs
            );
            let run = monitor.sweep(&cfg.sites, cfg.settings.jobs).await;
            print_run(&run);
            Ok(())
        }
        Intent::SingleUrl(url) => {
            let site = match &cli.site {
                Some(id) => cfg.site(id)?,
                None => cfg.site_for_url(&url)?,
            };
            let opts = ManualOptions {
                write: cli.write,
                notify: cli.notify,
            };
            println!(
                "Checking {} with {} rules (site {}, {})",
                url,
                site.rules.name(),
                site.id,
                if opts.write { "write" } else { "dry run" }
            );
            match monitor.check_url(site, &url, opts).await {
                Ok(out) => {
                    print_manual(&out);
                    println!("PASS");
                    Ok(())
                }
                Err(e) => {
                    println!("FAIL: {}", e);
                    Err(e.into())
                }
            }
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn build_monitor(cli: &Cli, settings: &Settings) -> anyhow::Result<Monitor> {
    let web = WebClient::new(settings).context("building HTTP client")?;
    let source = HttpSource::with_client(web.clone());
    let details = PageDetails::new(web);

    let sheets_id = cli.sheets_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let sink: Arc<dyn ReportSink> = match sheets_id {
        Some(id) => {
            let token = cli
                .sheets_token
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ConfigError::Backend("GOOGLE_SHEETS_TOKEN is required when GOOGLE_SHEETS_ID is set".into())
                })?;
            Arc::new(SheetsSink::new(id, token, settings.http_timeout_secs)?)
        }
        None => Arc::new(WorkbookSink::new(&settings.workbook_path)),
    };

    let notifier = DiscordNotifier::new(cli.discord_webhook.clone(), settings.notify_timeout_secs)
        .context("building webhook client")?;

    Ok(Monitor::new(
        Arc::new(source),
        Arc::new(details),
        sink,
        Arc::new(notifier),
        settings.worksheet.clone(),
    ))
}

fn print_run(run: &RunReport) {
    println!("{:<20} | {:<18} | {:>5} | {:>9}", "Site", "Status", "New", "Unchanged");
    println!("{}", "-".repeat(62));
    for s in &run.sites {
        println!(
            "{:<20} | {:<18} | {:>5} | {:>9}",
            truncate(&s.site_id, 20),
            s.status.to_string(),
            if s.reported { s.new_items.len() } else { 0 },
            s.unchanged
        );
    }

    for s in run.sites.iter().filter(|s| s.reported && !s.new_items.is_empty()) {
        println!("\n--- {} ---", s.site_id);
        for item in &s.new_items {
            println!("  [{}] {}  {}", item.id, truncate(item.label(), 60), item.url);
        }
        for line in &s.detail_errors {
            println!("  ! {}", line);
        }
    }

    let failed: Vec<_> = run
        .sites
        .iter()
        .filter(|s| s.status != SiteStatus::Ok)
        .collect();
    if !failed.is_empty() {
        println!("\n--- Failures ---");
        for s in failed {
            println!("  {}: {}", s.site_id, s.error.as_deref().unwrap_or("-"));
            if !s.reported {
                for item in &s.new_items {
                    println!("    pending [{}] {}  {}", item.id, truncate(item.label(), 60), item.url);
                }
            }
        }
    }

    println!(
        "\n{} sites | {} new items | {} failed",
        run.sites.len(),
        run.new_items(),
        run.failures()
    );
}

fn print_manual(out: &ManualReport) {
    println!(
        "Site {} ({}): {} items on page, {} new, {} already known.",
        out.site_id,
        out.url,
        out.fetched,
        out.new_items.len(),
        out.unchanged
    );
    for item in &out.new_items {
        println!("  [{}] {}  {}", item.id, truncate(item.label(), 60), item.url);
    }
    for line in &out.detail_errors {
        println!("  ! {}", line);
    }
    println!(
        "Reported: {} | Notified: {} | State saved: {}",
        yes_no(out.reported),
        yes_no(out.notified),
        yes_no(out.saved)
    );
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
