use scraper::Html;
use url::Url;

use super::{query_param, text_of, Entry, EntryResult};
use crate::config::{GenericRules, IdRule};

/// Selector-driven extraction for sites without a dedicated parser.
pub fn extract(rules: &GenericRules, base: &Url, html: &str) -> Vec<EntryResult> {
    let doc = Html::parse_document(html);
    let entries = doc
        .select(&rules.item)
        .map(|node| -> EntryResult {
            let link = match &rules.link {
                Some(sel) => node.select(sel).next().ok_or("no link element")?,
                None => node,
            };
            let href = link.value().attr("href").ok_or("link has no href")?;
            let url = base
                .join(href)
                .map_err(|e| format!("bad href {href:?}: {e}"))?;
            let id = item_id(&rules.id, &url).ok_or_else(|| format!("no id in {url}"))?;

            Ok(Entry {
                id,
                title: rules.title.as_ref().map(|s| text_of(node, s)).unwrap_or_default(),
                price: rules.price.as_ref().map(|s| text_of(node, s)).unwrap_or_default(),
                url: url.to_string(),
            })
        })
        .collect();
    entries
}

fn item_id(rule: &IdRule, url: &Url) -> Option<String> {
    match rule {
        IdRule::QueryParam(name) => query_param(url, name),
        IdRule::Regex(re) => {
            let caps = re.captures(url.as_str())?;
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty())
        }
    }
}
