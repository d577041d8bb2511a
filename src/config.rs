use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use regex::Regex;
use scraper::Selector;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::error::ConfigError;

const DEFAULT_WORKSHEET: &str = "Product";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Run-wide knobs. Every field has a default so `settings:` may be omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub state_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub notify_timeout_secs: u64,
    pub worksheet: String,
    pub workbook_path: PathBuf,
    pub jobs: usize,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            state_dir: PathBuf::from("state"),
            http_timeout_secs: 30,
            notify_timeout_secs: 20,
            worksheet: DEFAULT_WORKSHEET.to_string(),
            workbook_path: PathBuf::from("data/report.sqlite"),
            jobs: 1,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// CLI values that win over the file and the `HOLO_` environment layer.
#[derive(Debug, Default)]
pub struct Overrides {
    pub state_dir: Option<PathBuf>,
    pub worksheet: Option<String>,
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SiteDescriptor {
    pub id: String,
    pub listing_urls: Vec<Url>,
    pub rules: ParseRules,
    pub top_n: usize,
    pub keywords: Vec<String>,
    pub state_path: PathBuf,
    pub discord_webhook: Option<String>,
    pub pagination: Option<Pagination>,
    /// Read each NEW item's product page before reporting it.
    pub fetch_details: bool,
}

#[derive(Debug, Clone)]
pub enum ParseRules {
    Amiami,
    Generic(GenericRules),
    Shopify { base_url: Option<Url> },
    BandaiCandy,
    Sitemap { pattern: Regex },
}

impl ParseRules {
    pub fn name(&self) -> &'static str {
        match self {
            ParseRules::Amiami => "amiami",
            ParseRules::Generic(_) => "generic",
            ParseRules::Shopify { .. } => "shopify",
            ParseRules::BandaiCandy => "bandai_candy",
            ParseRules::Sitemap { .. } => "sitemap",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenericRules {
    pub item: Selector,
    pub link: Option<Selector>,
    pub title: Option<Selector>,
    pub price: Option<Selector>,
    pub id: IdRule,
}

#[derive(Debug, Clone)]
pub enum IdRule {
    QueryParam(String),
    /// First capture group if the pattern has one, else the whole match.
    Regex(Regex),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    /// URL with a `{page}` placeholder.
    pub template: String,
    #[serde(default = "default_page_start")]
    pub start: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Pagination {
    pub fn page_url(&self, page: u32) -> String {
        self.template.replace("{page}", &page.to_string())
    }
}

fn default_page_start() -> u32 {
    2
}

fn default_max_pages() -> u32 {
    1
}

fn default_parser() -> String {
    "amiami".to_string()
}

fn default_top_n() -> usize {
    40
}

fn default_fetch_details() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    sites: Vec<RawSite>,
}

#[derive(Debug, Deserialize)]
struct RawSite {
    id: String,
    monitor_url: Option<String>,
    #[serde(default)]
    listing_urls: Vec<String>,
    #[serde(default = "default_parser")]
    parser: String,
    #[serde(default = "default_top_n")]
    top_n: usize,
    #[serde(default)]
    keywords: Vec<String>,
    state_file: Option<PathBuf>,
    discord_webhook: Option<String>,
    selectors: Option<RawSelectors>,
    #[serde(default)]
    parser_options: RawParserOptions,
    pagination: Option<Pagination>,
    #[serde(default = "default_fetch_details")]
    fetch_details: bool,
}

#[derive(Debug, Deserialize)]
struct RawSelectors {
    item: String,
    link: Option<String>,
    title: Option<String>,
    price: Option<String>,
    #[serde(default)]
    id: RawIdRule,
}

#[derive(Debug, Default, Deserialize)]
struct RawIdRule {
    #[serde(rename = "type")]
    kind: Option<String>,
    param: Option<String>,
    pattern: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawParserOptions {
    base_url: Option<String>,
    pattern: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub settings: Settings,
    pub sites: Vec<SiteDescriptor>,
}

impl MonitorConfig {
    /// Read the YAML site file plus `HOLO_`-prefixed environment overrides.
    pub fn load(path: &Path, overrides: &Overrides) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let raw: RawConfig = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("HOLO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        let cfg = Self::from_raw(raw, overrides)?;
        info!(
            path = %path.display(),
            sites = cfg.sites.len(),
            "loaded site configuration"
        );
        Ok(cfg)
    }

    /// Parse configuration text directly; used by tests and tooling.
    pub fn from_yaml(text: &str, overrides: &Overrides) -> Result<Self, ConfigError> {
        let raw: RawConfig = Config::builder()
            .add_source(File::from_str(text, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        Self::from_raw(raw, overrides)
    }

    fn from_raw(raw: RawConfig, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut settings = raw.settings;
        if let Some(dir) = &overrides.state_dir {
            settings.state_dir = dir.clone();
        }
        if let Some(ws) = &overrides.worksheet {
            settings.worksheet = ws.clone();
        }
        if let Some(jobs) = overrides.jobs {
            settings.jobs = jobs;
        }
        settings.worksheet = resolve_worksheet(&settings.worksheet);
        settings.jobs = settings.jobs.max(1);

        let mut sites = Vec::with_capacity(raw.sites.len());
        let mut ids: HashSet<String> = HashSet::new();
        let mut state_paths: HashMap<PathBuf, String> = HashMap::new();

        for raw_site in raw.sites {
            let site = build_site(raw_site, &settings)?;
            if !ids.insert(site.id.clone()) {
                return Err(ConfigError::DuplicateSite(site.id));
            }
            if let Some(first) = state_paths.insert(site.state_path.clone(), site.id.clone()) {
                return Err(ConfigError::SharedStateFile {
                    first,
                    second: site.id,
                    path: site.state_path,
                });
            }
            sites.push(site);
        }

        Ok(MonitorConfig { settings, sites })
    }

    pub fn site(&self, id: &str) -> Result<&SiteDescriptor, ConfigError> {
        self.sites
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ConfigError::UnknownSite(id.to_string()))
    }

    /// The site whose listing URL shares `url`'s host and the longest path prefix.
    /// Ties go to the site listed first.
    pub fn site_for_url(&self, url: &Url) -> Result<&SiteDescriptor, ConfigError> {
        let mut best: Option<(&SiteDescriptor, usize)> = None;
        for site in &self.sites {
            for listing in &site.listing_urls {
                if listing.host_str() != url.host_str() || url.host_str().is_none() {
                    continue;
                }
                let score = common_prefix_len(listing.path(), url.path());
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((site, score));
                }
            }
        }
        best.map(|(site, _)| site)
            .ok_or_else(|| ConfigError::NoMatchingSite(url.to_string()))
    }
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

/// Blank names and spreadsheet defaults ("Sheet1", "シート1") land on "Product".
pub fn resolve_worksheet(raw: &str) -> String {
    let name = raw.trim();
    if name.is_empty() || name == "Sheet1" || name == "シート1" {
        DEFAULT_WORKSHEET.to_string()
    } else {
        name.to_string()
    }
}

fn build_site(raw: RawSite, settings: &Settings) -> Result<SiteDescriptor, ConfigError> {
    let id = raw.id.trim().to_string();
    let invalid = |reason: String| ConfigError::InvalidSite {
        site: id.clone(),
        reason,
    };

    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("id must be non-empty [A-Za-z0-9._-]".into()));
    }

    let mut urls = Vec::new();
    for u in raw.monitor_url.iter().chain(raw.listing_urls.iter()) {
        let parsed = Url::parse(u.trim()).map_err(|e| invalid(format!("bad listing url {u:?}: {e}")))?;
        if !urls.contains(&parsed) {
            urls.push(parsed);
        }
    }
    if urls.is_empty() {
        return Err(invalid("no monitor_url or listing_urls configured".into()));
    }

    if raw.top_n == 0 {
        return Err(invalid("top_n must be at least 1".into()));
    }
    if let Some(p) = &raw.pagination {
        if !p.template.contains("{page}") {
            return Err(invalid("pagination.template needs a {page} placeholder".into()));
        }
        Url::parse(&p.page_url(p.start))
            .map_err(|e| invalid(format!("bad pagination.template: {e}")))?;
    }

    let rules = match raw.parser.as_str() {
        "amiami" => ParseRules::Amiami,
        "bandai_candy" => ParseRules::BandaiCandy,
        "shopify" => {
            let base_url = raw
                .parser_options
                .base_url
                .as_deref()
                .map(|b| Url::parse(&format!("{}/", b.trim_end_matches('/'))))
                .transpose()
                .map_err(|e| invalid(format!("bad parser_options.base_url: {e}")))?;
            ParseRules::Shopify { base_url }
        }
        "sitemap" => {
            let pattern = raw
                .parser_options
                .pattern
                .as_deref()
                .ok_or_else(|| invalid("sitemap parser needs parser_options.pattern".into()))?;
            let pattern = Regex::new(pattern).map_err(|e| invalid(format!("bad pattern: {e}")))?;
            ParseRules::Sitemap { pattern }
        }
        "generic" => {
            let sel = raw
                .selectors
                .ok_or_else(|| invalid("generic parser needs selectors".into()))?;
            ParseRules::Generic(build_generic(sel).map_err(invalid)?)
        }
        other => return Err(invalid(format!("unknown parser {other:?}"))),
    };

    let keywords: Vec<String> = raw
        .keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    // sitemap entries have no title until their product page is read
    if matches!(rules, ParseRules::Sitemap { .. }) && !keywords.is_empty() {
        return Err(invalid(
            "keywords cannot be used with the sitemap parser: entries carry no titles".into(),
        ));
    }

    let state_path = raw
        .state_file
        .unwrap_or_else(|| settings.state_dir.join(format!("{id}.json")));

    Ok(SiteDescriptor {
        listing_urls: urls,
        rules,
        top_n: raw.top_n,
        keywords,
        state_path,
        discord_webhook: raw.discord_webhook.filter(|w| !w.trim().is_empty()),
        pagination: raw.pagination,
        fetch_details: raw.fetch_details,
        id,
    })
}

fn build_generic(raw: RawSelectors) -> Result<GenericRules, String> {
    let compile = |css: &str| Selector::parse(css).map_err(|e| format!("bad selector {css:?}: {e:?}"));
    let optional = |css: Option<String>| css.as_deref().map(|c| compile(c)).transpose();

    let id = match raw.id.kind.as_deref().unwrap_or("query_param") {
        "query_param" => IdRule::QueryParam(
            raw.id
                .param
                .filter(|p| !p.is_empty())
                .ok_or("id.param is required for query_param ids")?,
        ),
        "regex" => {
            let pat = raw.id.pattern.ok_or("id.pattern is required for regex ids")?;
            IdRule::Regex(Regex::new(&pat).map_err(|e| format!("bad id pattern: {e}"))?)
        }
        other => return Err(format!("unknown id type {other:?}")),
    };

    Ok(GenericRules {
        item: compile(&raw.item)?,
        link: optional(raw.link)?,
        title: optional(raw.title)?,
        price: optional(raw.price)?,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITES: &str = r#"
settings:
  state_dir: /tmp/holo-state
  http_timeout_secs: 10
sites:
  - id: amiami
    monitor_url: https://slist.amiami.jp/top/search/list?s_keywords=hololive
    keywords: [ホロライブ, hololive]
  - id: gamers
    parser: generic
    monitor_url: https://www.gamers.co.jp/pd/search/?keyword=hololive
    top_n: 20
    selectors:
      item: ".item_list li"
      link: "a"
      title: ".item_name"
      price: ".price"
      id: { type: regex, pattern: "/pd/(\\d+)/" }
  - id: holoshop
    parser: shopify
    monitor_url: https://shop.hololivepro.com/products.json
    parser_options: { base_url: "https://shop.hololivepro.com" }
"#;

    #[test]
    fn parses_sites_in_order() {
        let cfg = MonitorConfig::from_yaml(SITES, &Overrides::default()).unwrap();
        let ids: Vec<_> = cfg.sites.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["amiami", "gamers", "holoshop"]);
        assert_eq!(cfg.settings.http_timeout_secs, 10);
        assert_eq!(cfg.settings.worksheet, "Product");
        assert_eq!(cfg.sites[0].top_n, 40);
        assert_eq!(cfg.sites[1].top_n, 20);
        assert_eq!(cfg.sites[0].keywords.len(), 2);
        assert!(cfg.sites[0].fetch_details);
        assert_eq!(cfg.sites[1].state_path, PathBuf::from("/tmp/holo-state/gamers.json"));
        assert!(matches!(cfg.sites[1].rules, ParseRules::Generic(_)));
        assert!(matches!(cfg.sites[2].rules, ParseRules::Shopify { base_url: Some(_) }));
    }

    #[test]
    fn overrides_win() {
        let ov = Overrides {
            state_dir: Some(PathBuf::from("elsewhere")),
            worksheet: Some("Goods_Test".into()),
            jobs: Some(0),
        };
        let cfg = MonitorConfig::from_yaml(SITES, &ov).unwrap();
        assert_eq!(cfg.sites[0].state_path, PathBuf::from("elsewhere/amiami.json"));
        assert_eq!(cfg.settings.worksheet, "Goods_Test");
        assert_eq!(cfg.settings.jobs, 1);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let yaml = r#"
sites:
  - id: a
    monitor_url: https://a.example.com/
  - id: a
    monitor_url: https://b.example.com/
"#;
        let err = MonitorConfig::from_yaml(yaml, &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSite(id) if id == "a"));
    }

    #[test]
    fn rejects_shared_state_file() {
        let yaml = r#"
sites:
  - id: a
    monitor_url: https://a.example.com/
    state_file: state/shared.json
  - id: b
    monitor_url: https://b.example.com/
    state_file: state/shared.json
"#;
        let err = MonitorConfig::from_yaml(yaml, &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::SharedStateFile { .. }));
    }

    #[test]
    fn rejects_unknown_parser_and_bad_selector() {
        let yaml = r#"
sites:
  - id: x
    parser: browser
    monitor_url: https://x.example.com/
"#;
        assert!(matches!(
            MonitorConfig::from_yaml(yaml, &Overrides::default()),
            Err(ConfigError::InvalidSite { .. })
        ));

        let yaml = r#"
sites:
  - id: x
    parser: generic
    monitor_url: https://x.example.com/
    selectors: { item: "li[[", id: { param: id } }
"#;
        assert!(matches!(
            MonitorConfig::from_yaml(yaml, &Overrides::default()),
            Err(ConfigError::InvalidSite { .. })
        ));
    }

    #[test]
    fn rejects_keywords_on_sitemap() {
        let yaml = r#"
sites:
  - id: store
    parser: sitemap
    monitor_url: https://store.example.jp/sitemap.xml
    parser_options: { pattern: "/products/(\\d+)$" }
    keywords: [hololive]
"#;
        let err = MonitorConfig::from_yaml(yaml, &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSite { site, reason } if site == "store" && reason.contains("keywords")));

        let without = yaml.replace("    keywords: [hololive]\n", "    fetch_details: false\n");
        let cfg = MonitorConfig::from_yaml(&without, &Overrides::default()).unwrap();
        assert!(cfg.sites[0].keywords.is_empty());
        assert!(!cfg.sites[0].fetch_details);
    }

    #[test]
    fn rejects_site_without_url() {
        let yaml = "sites:\n  - id: nourl\n";
        assert!(matches!(
            MonitorConfig::from_yaml(yaml, &Overrides::default()),
            Err(ConfigError::InvalidSite { .. })
        ));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = MonitorConfig::load(Path::new("/nonexistent/sites.yaml"), &Overrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn bundled_sites_file_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("sites.yaml");
        let cfg = MonitorConfig::load(&path, &Overrides::default()).unwrap();
        let kinds: Vec<_> = cfg.sites.iter().map(|s| s.rules.name()).collect();
        assert_eq!(kinds, vec!["amiami", "generic", "shopify", "bandai_candy", "sitemap"]);
        assert_eq!(cfg.settings.jobs, 2);
    }

    #[test]
    fn matches_site_by_host_and_path() {
        let cfg = MonitorConfig::from_yaml(SITES, &Overrides::default()).unwrap();
        let url = Url::parse("https://www.gamers.co.jp/pd/10712345/").unwrap();
        assert_eq!(cfg.site_for_url(&url).unwrap().id, "gamers");

        let url = Url::parse("https://unknown.example.com/item").unwrap();
        assert!(matches!(cfg.site_for_url(&url), Err(ConfigError::NoMatchingSite(_))));
    }

    #[test]
    fn worksheet_defaults() {
        assert_eq!(resolve_worksheet(""), "Product");
        assert_eq!(resolve_worksheet("Sheet1"), "Product");
        assert_eq!(resolve_worksheet("シート1"), "Product");
        assert_eq!(resolve_worksheet(" Goods "), "Goods");
    }
}
