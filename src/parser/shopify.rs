use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{Entry, EntryResult};
use crate::normalize::{normalize_text, price_digits};

#[derive(Debug, Deserialize)]
struct Catalog {
    products: Vec<Product>,
}

#[derive(Debug, Deserialize)]
struct Product {
    id: Option<Value>,
    #[serde(default)]
    handle: String,
    #[serde(default)]
    title: String,
    online_store_url: Option<String>,
    published_at: Option<String>,
    created_at: Option<String>,
    #[serde(default)]
    variants: Vec<Variant>,
}

#[derive(Debug, Deserialize)]
struct Variant {
    price: Option<Value>,
}

/// Shopify `products.json`, newest first.
///
/// `store_base` overrides the origin used to build `/products/<handle>` URLs.
pub fn extract(store_base: Option<&Url>, source: &Url, body: &str) -> Result<Vec<EntryResult>, String> {
    let mut catalog: Catalog =
        serde_json::from_str(body).map_err(|e| format!("not a products.json document: {e}"))?;

    let origin = match store_base {
        Some(u) => Some(u.clone()),
        None => Url::parse(&source.origin().ascii_serialization())
            .ok()
            .filter(|u| u.has_host()),
    };

    // ISO-8601 timestamps sort lexicographically
    catalog.products.sort_by(|a, b| {
        let ka = a.published_at.as_deref().or(a.created_at.as_deref()).unwrap_or("");
        let kb = b.published_at.as_deref().or(b.created_at.as_deref()).unwrap_or("");
        kb.cmp(ka)
    });

    Ok(catalog
        .products
        .into_iter()
        .map(|p| product_entry(p, origin.as_ref()))
        .collect())
}

fn product_entry(p: Product, origin: Option<&Url>) -> EntryResult {
    let title = normalize_text(&p.title);
    if title.is_empty() {
        return Err(format!("product {:?} has no title", p.handle));
    }

    let url = match p.online_store_url.filter(|u| !u.is_empty()) {
        Some(u) => u,
        None => origin
            .filter(|_| !p.handle.is_empty())
            .and_then(|o| o.join(&format!("products/{}", p.handle)).ok())
            .map(|u| u.to_string())
            .ok_or_else(|| format!("product {title:?} has no url or handle"))?,
    };

    let id = p
        .id
        .as_ref()
        .and_then(scalar)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| if p.handle.is_empty() { url.clone() } else { p.handle.clone() });

    let price = p
        .variants
        .iter()
        .filter_map(|v| v.price.as_ref().and_then(scalar))
        .map(|raw| price_digits(&raw))
        .find(|d| !d.is_empty())
        .unwrap_or_default();

    Ok(Entry { id, title, price, url })
}

fn scalar(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
