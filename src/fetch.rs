use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Settings, SiteDescriptor};
use crate::error::FetchError;
use crate::model::ItemRecord;
use crate::parser;

/// Where the orchestrator gets items from.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Items across the site's listing and pagination pages, at most `top_n`.
    async fn fetch_listing(&self, site: &SiteDescriptor) -> Result<Vec<ItemRecord>, FetchError>;

    /// Items on exactly `url`, parsed with the site's rules.
    async fn fetch_page(&self, site: &SiteDescriptor, url: &Url) -> Result<Vec<ItemRecord>, FetchError>;
}

/// Raw page retrieval, split out so listing logic can run against canned pages.
#[async_trait]
pub trait PageClient: Send + Sync {
    async fn get_text(&self, url: &Url) -> Result<String, FetchError>;
}

const AMIAMI_TOP: &str = "https://www.amiami.jp/";
const AMIAMI_SEARCH: &str = "https://slist.amiami.jp/top/search/list?s_sortkey=regtimed&pagemax=60";

/// reqwest client with a cookie jar shared by every request of the run.
/// Clones share the jar.
#[derive(Clone)]
pub struct WebClient {
    client: reqwest::Client,
    warmed: Arc<Mutex<HashSet<&'static str>>>,
}

impl WebClient {
    pub fn new(settings: &Settings) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/json;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ja-JP,ja;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .cookie_store(true)
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()?;
        Ok(WebClient {
            client,
            warmed: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Visit the pages that hand out the session cookies `url` needs, once per run.
    async fn warm_up(&self, url: &Url) {
        for page in warmup_pages(url) {
            let first = self
                .warmed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(page);
            if !first {
                continue;
            }
            match self.client.get(page).send().await {
                Ok(resp) => debug!(page, status = resp.status().as_u16(), "session warmed"),
                Err(e) => debug!(page, "warm-up request failed: {}", e),
            }
        }
    }
}

#[async_trait]
impl PageClient for WebClient {
    async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        let network = |source| FetchError::Network {
            url: url.to_string(),
            source,
        };
        self.warm_up(url).await;

        let mut req = self.client.get(url.clone());
        if let Some(referer) = referer_for(url) {
            req = req.header(REFERER, referer);
        }
        if is_amiami_detail(url) {
            req = req
                .header("Sec-Fetch-Dest", "document")
                .header("Sec-Fetch-Mode", "navigate")
                .header("Sec-Fetch-Site", "same-site");
        }
        let resp = req.send().await.map_err(network)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(network)
    }
}

fn is_amiami(url: &Url) -> bool {
    url.host_str()
        .is_some_and(|h| h.eq_ignore_ascii_case("amiami.jp") || h.to_ascii_lowercase().ends_with(".amiami.jp"))
}

fn is_amiami_detail(url: &Url) -> bool {
    is_amiami(url) && url.path().contains("/top/detail/detail")
}

/// AmiAmi answers 403 to cookieless requests: its top page sets the session,
/// and product pages also expect a prior visit to the search list.
fn warmup_pages(url: &Url) -> Vec<&'static str> {
    if is_amiami_detail(url) {
        vec![AMIAMI_TOP, AMIAMI_SEARCH]
    } else if is_amiami(url) {
        vec![AMIAMI_TOP]
    } else {
        Vec::new()
    }
}

/// The page a browser would have come from.
fn referer_for(url: &Url) -> Option<String> {
    if is_amiami_detail(url) {
        Some(AMIAMI_SEARCH.to_string())
    } else if is_amiami(url) {
        Some(AMIAMI_TOP.to_string())
    } else if url.has_host() {
        Some(format!("{}/", url.origin().ascii_serialization()))
    } else {
        None
    }
}

pub struct HttpSource<C = WebClient> {
    client: C,
}

impl<C: PageClient> HttpSource<C> {
    pub fn with_client(client: C) -> Self {
        HttpSource { client }
    }
}

#[async_trait]
impl<C: PageClient> ListingSource for HttpSource<C> {
    async fn fetch_listing(&self, site: &SiteDescriptor) -> Result<Vec<ItemRecord>, FetchError> {
        let mut listing = Listing::new(&self.client, site);
        let mut items = Vec::new();
        while items.len() < site.top_n {
            match listing.next_page().await? {
                Some(page) => items.extend(page),
                None => break,
            }
        }
        items.truncate(site.top_n);
        info!(site = %site.id, items = items.len(), pages = listing.fetched, "listing fetched");
        Ok(items)
    }

    async fn fetch_page(&self, site: &SiteDescriptor, url: &Url) -> Result<Vec<ItemRecord>, FetchError> {
        let body = self.client.get_text(url).await?;
        let page = parser::parse_page(site, url, &body)?;
        if page.items.is_empty() && !page.well_formed && !body.trim().is_empty() {
            return Err(no_entries(site, url));
        }
        Ok(dedup(page.items, &mut HashSet::new()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageKind {
    /// A configured listing URL; it must yield entries.
    Listing,
    /// A numbered follow-up page; an empty one ends the listing.
    Continuation,
}

/// Lazy cursor over one site's pages. Pages are fetched only when asked for,
/// and once the cursor is exhausted or has failed it yields nothing more.
pub struct Listing<'a, C: ?Sized> {
    client: &'a C,
    site: &'a SiteDescriptor,
    pending: VecDeque<(Url, PageKind)>,
    seen: HashSet<String>,
    fetched: usize,
}

impl<'a, C: PageClient + ?Sized> Listing<'a, C> {
    pub fn new(client: &'a C, site: &'a SiteDescriptor) -> Self {
        let mut pending: VecDeque<(Url, PageKind)> = site
            .listing_urls
            .iter()
            .map(|u| (u.clone(), PageKind::Listing))
            .collect();

        if let Some(p) = &site.pagination {
            for page in p.start..p.start.saturating_add(p.max_pages) {
                let raw = p.page_url(page);
                match Url::parse(&raw) {
                    Ok(u) => pending.push_back((u, PageKind::Continuation)),
                    Err(e) => warn!(site = %site.id, url = %raw, "skipping pagination url: {}", e),
                }
            }
        }

        Listing {
            client,
            site,
            pending,
            seen: HashSet::new(),
            fetched: 0,
        }
    }

    /// The next page's new-to-this-run items, or `None` when the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<ItemRecord>>, FetchError> {
        let Some((url, kind)) = self.pending.pop_front() else {
            return Ok(None);
        };

        debug!(site = %self.site.id, url = %url, "fetching page");
        let outcome = self.load(&url, kind).await;
        match outcome {
            Ok(Some(items)) => {
                self.fetched += 1;
                Ok(Some(dedup(items, &mut self.seen)))
            }
            Ok(None) => {
                self.pending.clear();
                Ok(None)
            }
            Err(e) => {
                self.pending.clear();
                Err(e)
            }
        }
    }

    async fn load(&self, url: &Url, kind: PageKind) -> Result<Option<Vec<ItemRecord>>, FetchError> {
        let body = self.client.get_text(url).await?;
        let page = parser::parse_page(self.site, url, &body)?;
        if !page.items.is_empty() {
            debug!(site = %self.site.id, url = %url, items = page.items.len(), "page parsed");
            return Ok(Some(page.items));
        }
        match kind {
            PageKind::Continuation => {
                debug!(site = %self.site.id, url = %url, "empty continuation page, listing ends");
                Ok(None)
            }
            PageKind::Listing if page.well_formed || body.trim().is_empty() => {
                info!(site = %self.site.id, url = %url, "listing is empty");
                Ok(Some(Vec::new()))
            }
            PageKind::Listing => Err(no_entries(self.site, url)),
        }
    }
}

fn no_entries(site: &SiteDescriptor, url: &Url) -> FetchError {
    FetchError::ParseFormat {
        url: url.to_string(),
        reason: format!("{} rules matched no entries", site.rules.name()),
    }
}

fn dedup(items: Vec<ItemRecord>, seen: &mut HashSet<String>) -> Vec<ItemRecord> {
    items
        .into_iter()
        .filter(|it| seen.insert(it.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::config::{Pagination, ParseRules};
    use crate::parser::testutil;

    /// Serves canned bodies; unknown URLs answer 404.
    #[derive(Default)]
    struct Canned {
        pages: HashMap<String, String>,
        hits: Mutex<Vec<String>>,
    }

    impl Canned {
        fn page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }

        fn hits(&self) -> Vec<String> {
            self.hits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageClient for Canned {
        async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
            self.hits.lock().unwrap().push(url.to_string());
            self.pages
                .get(url.as_str())
                .cloned()
                .ok_or(FetchError::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    fn tiles(ids: &[&str]) -> String {
        ids.iter()
            .map(|id| {
                format!(r#"<a href="/top/detail/detail?gcode={id}"><span class="product_name_inner">{id}</span></a>"#)
            })
            .collect()
    }

    fn amiami_site(pages: u32) -> SiteDescriptor {
        let mut site = testutil::site("amiami", "https://slist.amiami.jp/list?page=1", ParseRules::Amiami);
        site.pagination = Some(Pagination {
            template: "https://slist.amiami.jp/list?page={page}".into(),
            start: 2,
            max_pages: pages,
        });
        site
    }

    fn ids(items: &[ItemRecord]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[tokio::test]
    async fn walks_pages_and_dedups() {
        let client = Canned::default()
            .page("https://slist.amiami.jp/list?page=1", &tiles(&["a", "b"]))
            .page("https://slist.amiami.jp/list?page=2", &tiles(&["b", "c"]))
            .page("https://slist.amiami.jp/list?page=3", "<html><body>no results</body></html>");
        let source = HttpSource::with_client(client);
        let items = source.fetch_listing(&amiami_site(5)).await.unwrap();
        assert_eq!(ids(&items), vec!["a", "b", "c"]);
        // page 3 is empty so pages 4-6 are never requested
        assert_eq!(source.client.hits().len(), 3);
    }

    #[tokio::test]
    async fn stops_at_top_n() {
        let client = Canned::default()
            .page("https://slist.amiami.jp/list?page=1", &tiles(&["a", "b", "c"]))
            .page("https://slist.amiami.jp/list?page=2", &tiles(&["d"]));
        let source = HttpSource::with_client(client);
        let mut site = amiami_site(1);
        site.top_n = 2;
        let items = source.fetch_listing(&site).await.unwrap();
        assert_eq!(ids(&items), vec!["a", "b"]);
        assert_eq!(source.client.hits().len(), 1);
    }

    #[tokio::test]
    async fn structural_change_is_parse_format() {
        let client = Canned::default().page(
            "https://slist.amiami.jp/list?page=1",
            "<html><body><div class='renamed'>redesigned page</div></body></html>",
        );
        let source = HttpSource::with_client(client);
        let err = source.fetch_listing(&amiami_site(1)).await.unwrap_err();
        assert!(matches!(err, FetchError::ParseFormat { .. }));
    }

    #[tokio::test]
    async fn http_error_propagates() {
        let source = HttpSource::with_client(Canned::default());
        let err = source.fetch_listing(&amiami_site(1)).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn cursor_is_not_restartable() {
        let client = Canned::default().page("https://slist.amiami.jp/list?page=1", &tiles(&["a"]));
        let site = amiami_site(0);
        let mut listing = Listing::new(&client, &site);
        assert_eq!(listing.next_page().await.unwrap().map(|p| p.len()), Some(1));
        assert!(listing.next_page().await.unwrap().is_none());
        assert!(listing.next_page().await.unwrap().is_none());
        assert_eq!(client.hits().len(), 1);
    }

    #[tokio::test]
    async fn empty_catalogs_are_not_errors() {
        let shop = testutil::site(
            "shop",
            "https://shop.example.com/products.json",
            ParseRules::Shopify { base_url: None },
        );
        let source = HttpSource::with_client(
            Canned::default().page("https://shop.example.com/products.json", r#"{"products": []}"#),
        );
        assert!(source.fetch_listing(&shop).await.unwrap().is_empty());
        let url = shop.listing_urls[0].clone();
        assert!(source.fetch_page(&shop, &url).await.unwrap().is_empty());

        let sitemap = testutil::site(
            "store",
            "https://store.example.jp/sitemap.xml",
            ParseRules::Sitemap {
                pattern: regex::Regex::new(r"/products/(\d+)$").unwrap(),
            },
        );
        let source = HttpSource::with_client(Canned::default().page(
            "https://store.example.jp/sitemap.xml",
            r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"><url><loc>https://store.example.jp/about</loc></url></urlset>"#,
        ));
        assert!(source.fetch_listing(&sitemap).await.unwrap().is_empty());
    }

    #[test]
    fn amiami_session_headers() {
        let detail = Url::parse("https://www.amiami.jp/top/detail/detail?gcode=FIGURE-1").unwrap();
        let search = Url::parse("https://slist.amiami.jp/top/search/list?s_keywords=hololive").unwrap();
        let other = Url::parse("https://shop.hololivepro.com/products.json?limit=50").unwrap();

        assert_eq!(warmup_pages(&detail), vec![AMIAMI_TOP, AMIAMI_SEARCH]);
        assert_eq!(warmup_pages(&search), vec![AMIAMI_TOP]);
        assert!(warmup_pages(&other).is_empty());

        assert_eq!(referer_for(&detail).as_deref(), Some(AMIAMI_SEARCH));
        assert_eq!(referer_for(&search).as_deref(), Some(AMIAMI_TOP));
        assert_eq!(referer_for(&other).as_deref(), Some("https://shop.hololivepro.com/"));
    }

    #[tokio::test]
    async fn single_page_fetch() {
        let client = Canned::default().page(
            "https://slist.amiami.jp/top/search/list?s_keywords=pekora",
            &tiles(&["i9"]),
        );
        let source = HttpSource::with_client(client);
        let url = Url::parse("https://slist.amiami.jp/top/search/list?s_keywords=pekora").unwrap();
        let items = source.fetch_page(&amiami_site(3), &url).await.unwrap();
        assert_eq!(ids(&items), vec!["i9"]);
        assert_eq!(source.client.hits().len(), 1);
    }
}
