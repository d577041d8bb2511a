use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use serde_json::json;
use tracing::{debug, info};

use crate::config::SiteDescriptor;
use crate::error::NotifyError;
use crate::model::ItemRecord;

const SHOWN_ITEMS: usize = 5;
// Discord rejects messages over 2000 characters.
const MAX_CONTENT: usize = 1900;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post the NEW-item summary for one site.
    async fn notify(&self, site: &SiteDescriptor, items: &[ItemRecord]) -> Result<(), NotifyError>;

    /// Tell the site's channel that its run failed.
    async fn notify_error(&self, site: &SiteDescriptor, message: &str) -> Result<(), NotifyError>;
}

pub struct DiscordNotifier {
    client: reqwest::Client,
    default_webhook: Option<String>,
}

impl DiscordNotifier {
    pub fn new(default_webhook: Option<String>, timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(DiscordNotifier {
            client,
            default_webhook: default_webhook.filter(|w| !w.trim().is_empty()),
        })
    }

    fn webhook_for<'a>(&'a self, site: &'a SiteDescriptor) -> Option<&'a str> {
        site.discord_webhook
            .as_deref()
            .or(self.default_webhook.as_deref())
    }

    async fn post(&self, site: &SiteDescriptor, content: String) -> Result<(), NotifyError> {
        let Some(webhook) = self.webhook_for(site) else {
            info!(site = %site.id, "no webhook configured, notification skipped");
            return Ok(());
        };
        let resp = self
            .client
            .post(webhook)
            .json(&json!({ "content": clip(content) }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(site = %site.id, status = status.as_u16(), "webhook delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, site: &SiteDescriptor, items: &[ItemRecord]) -> Result<(), NotifyError> {
        self.post(site, summary(&site.id, items)).await
    }

    async fn notify_error(&self, site: &SiteDescriptor, message: &str) -> Result<(), NotifyError> {
        self.post(site, format!("**{} error**\n{}", site.id, message)).await
    }
}

/// The chat message for one site's NEW items.
pub fn summary(site_id: &str, items: &[ItemRecord]) -> String {
    let mut lines = vec![format!("**{site_id} updates**"), format!("New: {}", items.len())];
    if items.len() > SHOWN_ITEMS {
        lines.push(format!("(showing {} of {})", SHOWN_ITEMS, items.len()));
    }
    lines.extend(items.iter().take(SHOWN_ITEMS).map(item_line));
    lines.iter().join("\n")
}

fn item_line(item: &ItemRecord) -> String {
    let parts = [item.title.as_str(), item.url.as_str()];
    format!("- {}", parts.iter().filter(|p| !p.is_empty()).join(" | "))
}

fn clip(content: String) -> String {
    if content.chars().count() <= MAX_CONTENT {
        return content;
    }
    let mut out: String = content.chars().take(MAX_CONTENT - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParseRules;
    use crate::parser::testutil;

    fn item(n: usize) -> ItemRecord {
        ItemRecord {
            id: format!("i{n}"),
            title: format!("Item {n}"),
            price: String::new(),
            url: format!("https://shop.example.jp/i{n}"),
            site_id: "shop".into(),
        }
    }

    #[test]
    fn short_summary() {
        let text = summary("amiami", &[item(1), item(2)]);
        assert_eq!(
            text,
            "**amiami updates**\nNew: 2\n- Item 1 | https://shop.example.jp/i1\n- Item 2 | https://shop.example.jp/i2"
        );
    }

    #[test]
    fn long_summary_is_capped() {
        let items: Vec<ItemRecord> = (1..=8).map(item).collect();
        let text = summary("gamers", &items);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "New: 8");
        assert_eq!(lines[2], "(showing 5 of 8)");
        assert_eq!(lines.len(), 3 + 5);
        assert_eq!(lines[7], "- Item 5 | https://shop.example.jp/i5");
    }

    #[test]
    fn partial_items() {
        let mut untitled = item(1);
        untitled.title.clear();
        let mut no_url = item(2);
        no_url.url.clear();
        assert_eq!(item_line(&untitled), "- https://shop.example.jp/i1");
        assert_eq!(item_line(&no_url), "- Item 2");
    }

    #[test]
    fn clips_long_content() {
        let clipped = clip("x".repeat(5000));
        assert_eq!(clipped.chars().count(), MAX_CONTENT);
        assert!(clipped.ends_with('…'));
        assert_eq!(clip("short".into()), "short");
    }

    #[test]
    fn site_webhook_wins() {
        let notifier = DiscordNotifier::new(Some("https://discord.test/default".into()), 5).unwrap();
        let mut site = testutil::site("shop", "https://shop.example.jp/new", ParseRules::Amiami);
        assert_eq!(notifier.webhook_for(&site), Some("https://discord.test/default"));
        site.discord_webhook = Some("https://discord.test/shop".into());
        assert_eq!(notifier.webhook_for(&site), Some("https://discord.test/shop"));

        let silent = DiscordNotifier::new(Some("  ".into()), 5).unwrap();
        site.discord_webhook = None;
        assert_eq!(silent.webhook_for(&site), None);
    }

    #[tokio::test]
    async fn no_webhook_is_success() {
        let notifier = DiscordNotifier::new(None, 5).unwrap();
        let site = testutil::site("shop", "https://shop.example.jp/new", ParseRules::Amiami);
        notifier.notify(&site, &[item(1)]).await.unwrap();
        notifier.notify_error(&site, "fetch failed").await.unwrap();
    }
}
