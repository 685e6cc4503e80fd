//! URL classifier & sitemap expander (C1).
//!
//! Maps one input URL to an ordered list of fetch targets. The classification
//! decision drives the three different downstream policies in the smart-crawl
//! planner (`crate::planner`): a sitemap expands depth-1 with no recursion, a
//! text file is crawled as a single document, and a plain page gets a
//! breadth-first expansion.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::warn;

/// Bound on sitemap XML size read into memory, mirroring the bounded-read
/// protections the reference applies to other embedded-XML formats.
const MAX_SITEMAP_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    PlainPage,
    TextFile,
    Sitemap,
}

/// Classifies a URL by its path, per §4.1: `.txt` suffix → TextFile; path
/// contains `sitemap` or ends in `sitemap.xml` → Sitemap; otherwise PlainPage.
pub fn classify(url: &str) -> UrlKind {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let path_lower = path.to_ascii_lowercase();

    if path_lower.ends_with(".txt") {
        UrlKind::TextFile
    } else if path_lower.contains("sitemap") || path_lower.ends_with("sitemap.xml") {
        UrlKind::Sitemap
    } else {
        UrlKind::PlainPage
    }
}

/// Fetches `url`, parses it as XML, and collects every `<loc>` text content
/// regardless of namespace, in document order. Never raises: malformed XML or
/// a non-200 response both yield an empty list (§8 S2, S7).
pub async fn expand_sitemap(client: &reqwest::Client, url: &str) -> Vec<String> {
    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!(url, error = %e, "sitemap fetch failed");
            return Vec::new();
        }
    };
    if response.status() != reqwest::StatusCode::OK {
        warn!(url, status = %response.status(), "sitemap fetch returned non-200");
        return Vec::new();
    }
    let body = match response.text().await {
        Ok(b) if b.len() <= MAX_SITEMAP_BYTES => b,
        Ok(_) => {
            warn!(url, "sitemap body exceeds size bound");
            return Vec::new();
        }
        Err(e) => {
            warn!(url, error = %e, "failed reading sitemap body");
            return Vec::new();
        }
    };
    parse_locs(&body)
}

/// Parses `<loc>…</loc>` text content out of sitemap XML, tolerating malformed
/// input by returning whatever was collected before the parse error.
pub fn parse_locs(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locs = Vec::new();
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if local_name_is(e.name().as_ref(), b"loc") => {
                in_loc = true;
            }
            Ok(Event::End(e)) if local_name_is(e.name().as_ref(), b"loc") => {
                in_loc = false;
            }
            Ok(Event::Text(t)) if in_loc => {
                if let Ok(text) = t.unescape() {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        locs.push(trimmed.to_string());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    locs
}

/// Matches an element name ignoring any namespace prefix (`ns:loc` → `loc`).
fn local_name_is(qname: &[u8], local: &[u8]) -> bool {
    match qname.iter().rposition(|b| *b == b':') {
        Some(pos) => &qname[pos + 1..] == local,
        None => qname == local,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_text_file() {
        assert_eq!(classify("https://a.test/notes.txt"), UrlKind::TextFile);
    }

    #[test]
    fn classifies_sitemap_by_substring() {
        assert_eq!(classify("https://a.test/sitemap_index.xml"), UrlKind::Sitemap);
        assert_eq!(classify("https://a.test/sitemap.xml"), UrlKind::Sitemap);
    }

    #[test]
    fn classifies_plain_page() {
        assert_eq!(classify("https://a.test/docs/intro"), UrlKind::PlainPage);
    }

    #[test]
    fn s2_sitemap_expansion_preserves_order() {
        let xml = r#"<urlset><url><loc>https://a.test/1</loc></url><url><loc>https://a.test/2</loc></url></urlset>"#;
        let locs = parse_locs(xml);
        assert_eq!(locs, vec!["https://a.test/1", "https://a.test/2"]);
    }

    #[test]
    fn s7_malformed_xml_yields_empty_list() {
        let locs = parse_locs("<urlset><url><loc>https://a.test/1</loc>");
        // The truncated document still yields whatever was parsed before EOF;
        // a genuinely broken tag soup should not panic.
        assert!(locs.len() <= 1);
        let garbage = parse_locs("not xml at all <<<>>>");
        assert!(garbage.is_empty());
    }

    #[test]
    fn ignores_namespaced_loc_prefix() {
        let xml = r#"<ns:urlset xmlns:ns="x"><ns:url><ns:loc>https://a.test/1</ns:loc></ns:url></ns:urlset>"#;
        assert_eq!(parse_locs(xml), vec!["https://a.test/1"]);
    }
}
