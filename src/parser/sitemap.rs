use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use super::{Entry, EntryResult};

/// Product URLs from a sitemap `urlset`. `pattern` selects product pages and
/// its first capture group (or the whole match) is the item id.
pub fn extract(pattern: &Regex, xml: &str) -> Result<Vec<EntryResult>, String> {
    let locs = parse_urlset(xml).map_err(|e| format!("invalid sitemap xml: {e}"))?;
    Ok(locs
        .into_iter()
        .filter_map(|url| {
            let caps = pattern.captures(&url)?;
            let id = caps.get(1).or_else(|| caps.get(0))?.as_str().to_string();
            Some(Ok(Entry {
                id,
                title: String::new(),
                price: String::new(),
                url,
            }))
        })
        .collect())
}

/// Every `<loc>` inside a `<url>`, in document order. A document without a
/// `<urlset>` element is not a sitemap.
fn parse_urlset(xml: &str) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut urls = Vec::new();
    let mut saw_urlset = false;
    let mut in_url = false;
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| e.to_string())? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"urlset" => saw_urlset = true,
                b"url" => in_url = true,
                b"loc" if in_url => in_loc = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"urlset" => saw_urlset = true,
            Event::Text(e) if in_loc => {
                let text = e.unescape().map_err(|e| e.to_string())?;
                let text = text.trim();
                if !text.is_empty() {
                    urls.push(text.to_string());
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"loc" => in_loc = false,
                b"url" => in_url = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    if !saw_urlset {
        return Err("no <urlset> element".into());
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    const URLSET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://store.example.jp/products/detail/5101</loc><lastmod>2025-06-01</lastmod></url>
  <url><loc>https://store.example.jp/about</loc></url>
  <url><loc>
    https://store.example.jp/products/detail/5102
  </loc></url>
</urlset>"#;

    #[test]
    fn product_locs_only() {
        let re = Regex::new(r"/products/detail/(\d+)$").unwrap();
        let out: Vec<Entry> = extract(&re, URLSET).unwrap().into_iter().map(Result::unwrap).collect();
        let ids: Vec<&str> = out.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["5101", "5102"]);
        assert_eq!(out[1].url, "https://store.example.jp/products/detail/5102");
    }

    #[test]
    fn broken_xml_is_error() {
        let re = Regex::new(r"\d+").unwrap();
        assert!(extract(&re, "<urlset><url><loc>x</url></urlset>").is_err());
    }

    #[test]
    fn empty_urlset_is_valid_but_other_documents_are_not() {
        let re = Regex::new(r"/products/detail/(\d+)$").unwrap();
        let empty = r#"<?xml version="1.0"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"></urlset>"#;
        assert!(extract(&re, empty).unwrap().is_empty());
        assert!(extract(&re, "<urlset/>").unwrap().is_empty());
        assert!(extract(&re, "<html><body><p>maintenance</p></body></html>").is_err());
    }
}
