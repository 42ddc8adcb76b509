//! CalDAV transport: discovery, sync-collection, and multiget.
//!
//! Speaks the handful of WebDAV verbs the engine needs over blocking
//! reqwest (digest auth via diqwest) and pulls what it needs out of the
//! multistatus responses by string scanning, prefix-tolerant for
//! whatever XML namespace aliases the server picked.

use anyhow::{Context, Result};
use diqwest::blocking::WithDigestAuth;
use url::Url;

use caltext_core::CoreError;

/// One sync-collection response line: a resource path and whether the
/// server still has it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedPath {
    pub path: String,
    pub is_actual: bool,
}

pub struct CalDavClient {
    http: reqwest::blocking::Client,
    base: Url,
    username: String,
    password: String,
}

impl CalDavClient {
    pub fn connect(uri: &str, username: &str, password: &str) -> Result<CalDavClient> {
        let http = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;
        let base = Url::parse(uri).with_context(|| format!("Invalid CalDAV URL '{uri}'"))?;

        Ok(CalDavClient {
            http,
            base,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// PROPFIND the path of the current user's principal resource.
    pub fn find_current_user_principal(&self) -> Result<String> {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop><d:current-user-principal/></d:prop>
</d:propfind>"#;
        let xml = self.request("PROPFIND", self.base.clone(), Some("0"), body)?;

        extract_tag_content(&xml, "current-user-principal")
            .and_then(|inner| extract_tag_content(&inner, "href"))
            .map(|href| xml_unescape(&href))
            .context("No current-user-principal in PROPFIND response")
    }

    /// PROPFIND the principal's calendar-home-set path.
    pub fn find_calendar_home_set(&self, principal: &str) -> Result<String> {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop><c:calendar-home-set/></d:prop>
</d:propfind>"#;
        let url = self.absolute(principal)?;
        let xml = self.request("PROPFIND", url, Some("0"), body)?;

        extract_tag_content(&xml, "calendar-home-set")
            .and_then(|inner| extract_tag_content(&inner, "href"))
            .map(|href| xml_unescape(&href))
            .context("No calendar-home-set in PROPFIND response")
    }

    /// List the home set and return the path of the calendar whose
    /// display name matches.
    pub fn find_calendar_path(&self, home_set: &str, name: &str) -> Result<String> {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#;
        let url = self.absolute(home_set)?;
        let xml = self.request("PROPFIND", url, Some("1"), body)?;

        for block in response_blocks(&xml) {
            // Only calendar collections; the home set itself is a plain
            // collection and has no calendar resourcetype.
            let is_calendar = extract_tag_content(block, "resourcetype")
                .is_some_and(|inner| inner.to_lowercase().contains("calendar"));
            if !is_calendar {
                continue;
            }

            let display_name = extract_tag_content(block, "displayname")
                .map(|n| xml_unescape(&n))
                .unwrap_or_default();
            if display_name == name
                && let Some(href) = extract_tag_content(block, "href")
            {
                return Ok(xml_unescape(&href));
            }
        }

        Err(CoreError::CalendarNotFound(name.to_string()).into())
    }

    /// REPORT the changes to a collection since `token`.
    pub fn sync_collection(&self, calendar_path: &str, token: &str) -> Result<Vec<ChangedPath>> {
        let body = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<d:sync-collection xmlns:d="DAV:">
  <d:sync-token>{}</d:sync-token>
  <d:sync-level>1</d:sync-level>
  <d:prop><d:getetag/></d:prop>
</d:sync-collection>"#,
            xml_escape(token)
        );
        let url = self.absolute(calendar_path)?;
        let xml = self.request("REPORT", url, Some("0"), &body)?;

        let mut changes = Vec::new();
        for block in response_blocks(&xml) {
            let Some(href) = extract_tag_content(block, "href") else {
                continue;
            };
            let path = xml_unescape(&href);

            // Deleted resources report a 404 status directly on the
            // response; present ones carry a 200 inside a propstat.
            let status = extract_tag_content(block, "status").unwrap_or_default();
            if status.contains("404") {
                changes.push(ChangedPath { path, is_actual: false });
            } else if status.contains("200") {
                changes.push(ChangedPath { path, is_actual: true });
            }
        }
        Ok(changes)
    }

    /// PROPFIND the collection's current sync token.
    pub fn get_sync_token(&self, calendar_path: &str) -> Result<String> {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop><d:sync-token/></d:prop>
</d:propfind>"#;
        let url = self.absolute(calendar_path)?;
        let xml = self.request("PROPFIND", url, Some("0"), body)?;

        extract_tag_content(&xml, "sync-token")
            .map(|token| xml_unescape(&token))
            .context("No sync-token in PROPFIND response")
    }

    /// REPORT calendar-multiget; returns the raw iCalendar payloads in
    /// response order.
    pub fn multiget(&self, calendar_path: &str, paths: &[String]) -> Result<Vec<String>> {
        let hrefs: String = paths
            .iter()
            .map(|p| format!("  <d:href>{}</d:href>\n", xml_escape(p)))
            .collect();
        let body = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<c:calendar-multiget xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop><c:calendar-data/></d:prop>
{hrefs}</c:calendar-multiget>"#
        );
        let url = self.absolute(calendar_path)?;
        let xml = self.request("REPORT", url, Some("1"), &body)?;

        Ok(response_blocks(&xml)
            .into_iter()
            .filter_map(|block| extract_tag_content(block, "calendar-data"))
            .map(|data| xml_unescape(&data))
            .collect())
    }

    fn absolute(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid CalDAV path '{path}'"))
    }

    fn request(&self, method: &str, url: Url, depth: Option<&str>, body: &str) -> Result<String> {
        let method =
            reqwest::Method::from_bytes(method.as_bytes()).expect("static WebDAV method name");
        let mut request = self
            .http
            .request(method.clone(), url)
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(body.to_string());
        if let Some(depth) = depth {
            request = request.header("Depth", depth);
        }

        let response = request
            .send_with_digest_auth(&self.username, &self.password)
            .with_context(|| format!("CalDAV {method} request failed"))?;

        let status = response.status();
        if !status.is_success() && status.as_u16() != 207 {
            anyhow::bail!("CalDAV {method} returned status {status}");
        }

        response.text().context("Failed to read CalDAV response body")
    }
}

// =============================================================================
// Multistatus scanning
// =============================================================================

/// Split a multistatus document into its `<response>` bodies.
fn response_blocks(xml: &str) -> Vec<&str> {
    let lower = xml.to_lowercase();
    let mut blocks = Vec::new();
    let mut from = 0;
    while let Some((content_start, _)) = find_open(&lower, "response", from) {
        let Some(close_start) = find_close(&lower, "response", content_start) else {
            break;
        };
        blocks.push(&xml[content_start..close_start]);
        from = close_start + 1;
    }
    blocks
}

/// Extract the text content of the first `<[ns:]tag>` element.
fn extract_tag_content(xml: &str, tag: &str) -> Option<String> {
    let lower = xml.to_lowercase();
    let (content_start, _) = find_open(&lower, &tag.to_lowercase(), 0)?;
    let close_start = find_close(&lower, &tag.to_lowercase(), content_start)?;
    let content = xml[content_start..close_start].trim();
    (!content.is_empty()).then(|| content.to_string())
}

/// Locate an opening `<[ns:]tag ...>` at or after `from` in a
/// lowercased document; returns (content_start, tag_start).
/// Self-closing elements are skipped: they have no content.
fn find_open(lower: &str, tag: &str, from: usize) -> Option<(usize, usize)> {
    let mut search = from;
    while let Some(rel) = lower[search..].find('<') {
        let start = search + rel;
        let rest = &lower[start + 1..];
        if rest.starts_with('/') {
            search = start + 1;
            continue;
        }

        let name_end = rest
            .find(|c: char| c == '>' || c == '/' || c.is_whitespace())
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        let local = name.rsplit(':').next().unwrap_or(name);

        if local == tag {
            let gt = lower[start..].find('>')?;
            if lower[..start + gt].ends_with('/') {
                search = start + gt;
                continue;
            }
            return Some((start + gt + 1, start));
        }
        search = start + 1;
    }
    None
}

/// Locate the closing `</[ns:]tag>` at or after `from`; returns its
/// byte offset.
fn find_close(lower: &str, tag: &str, from: usize) -> Option<usize> {
    let mut search = from;
    while let Some(rel) = lower[search..].find("</") {
        let start = search + rel;
        let rest = &lower[start + 2..];
        let name_end = rest.find('>').unwrap_or(rest.len());
        let name = rest[..name_end].trim();
        let local = name.rsplit(':').next().unwrap_or(name);
        if local == tag {
            return Some(start);
        }
        search = start + 2;
    }
    None
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#13;", "\r")
        .replace("&amp;", "&")
}
