//! Research module
//!
//! Models ask for outside information by writing `RESEARCH: <query>` on its
//! own line. This module picks those lines out, runs a bounded number of web
//! searches and formats the hits as a prompt block. Search never fails a
//! round: network trouble just means no results.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Research request marker
static RESEARCH_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^RESEARCH:[ \t]*(.+?)[ \t\r]*$").expect("valid research regex"));

/// Searches per round
pub const MAX_QUERIES_PER_ROUND: usize = 3;
/// Hits requested per search
pub const RESULTS_PER_QUERY: usize = 3;
/// Search and fetch timeout
pub const WEB_TIMEOUT: Duration = Duration::from_secs(15);
/// Default cap on fetched page text
pub const DEFAULT_FETCH_CHARS: usize = 4000;

const SNIPPET_CHARS: usize = 200;
const MAX_RESPONSE_BYTES: usize = 512_000;
const USER_AGENT: &str = "reverie/0.1 (research bot)";

/// One search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Web search collaborator. Implementations fail soft to an empty list.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchHit>;
}

/// Search provider that never finds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Vec<SearchHit> {
        Vec::new()
    }
}

/// DuckDuckGo HTML endpoint search (no API key)
pub struct DuckDuckGoSearch {
    http: reqwest::Client,
}

impl DuckDuckGoSearch {
    pub fn new() -> Self {
        Self { http: web_client() }
    }

    async fn try_search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchHit>> {
        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencoding::encode(query)
        );
        debug!(url = %url, "web search request");

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("web search returned HTTP {}", status);
        }

        let body = resp.text().await?;
        Ok(parse_ddg_html(cap_bytes(&body, MAX_RESPONSE_BYTES), max_results))
    }
}

impl Default for DuckDuckGoSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchHit> {
        match self.try_search(query, max_results).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Web search failed for '{}': {}", query, e);
                Vec::new()
            }
        }
    }
}

fn web_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(WEB_TIMEOUT)
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(3))
        .build()
        .unwrap_or_default()
}

/// Every research query in a model output, in order
pub fn extract_queries(output: &str) -> Vec<String> {
    RESEARCH_MARKER
        .captures_iter(output)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

/// Formatted research for one round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResearchReport {
    /// Prompt block, empty when nothing was found or research is off
    pub text: String,
    /// Searches actually issued
    pub queries_run: usize,
}

impl ResearchReport {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Runs research requests found in model output
#[derive(Clone)]
pub struct Researcher {
    search: Arc<dyn SearchProvider>,
}

impl Researcher {
    pub fn new(search: Arc<dyn SearchProvider>) -> Self {
        Self { search }
    }

    /// Parse `output` for research markers and run up to
    /// [`MAX_QUERIES_PER_ROUND`] searches
    pub async fn research_if_needed(&self, output: &str, enabled: bool) -> ResearchReport {
        if !enabled {
            return ResearchReport::default();
        }

        let queries = extract_queries(output);
        if queries.is_empty() {
            return ResearchReport::default();
        }

        let mut blocks = Vec::new();
        let mut queries_run = 0;

        for query in queries.iter().take(MAX_QUERIES_PER_ROUND) {
            info!("  Research: {}", query);
            let hits = self.search.search(query, RESULTS_PER_QUERY).await;
            queries_run += 1;

            if !hits.is_empty() {
                blocks.push(format_hits(query, &hits));
            }
        }

        if blocks.is_empty() {
            return ResearchReport {
                text: String::new(),
                queries_run,
            };
        }

        ResearchReport {
            text: format!("=== RESEARCH RESULTS ===\n{}\n", blocks.join("\n\n")),
            queries_run,
        }
    }
}

fn format_hits(query: &str, hits: &[SearchHit]) -> String {
    let mut lines = vec![format!("Search: {}", query)];
    for hit in hits {
        lines.push(format!("  [{}]({})", hit.title, hit.url));
        if !hit.snippet.is_empty() {
            let snippet: String = hit.snippet.chars().take(SNIPPET_CHARS).collect();
            lines.push(format!("  {}", snippet));
        }
    }
    lines.join("\n")
}

/// Fetch a page and return its readable text, capped at `max_chars`.
/// `None` on any failure.
pub async fn fetch_readable(url: &str, max_chars: usize) -> Option<String> {
    let resp = match web_client().get(url).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            debug!("Fetch {} returned {}", url, resp.status());
            return None;
        }
        Err(e) => {
            debug!("Fetch failed for {}: {}", url, e);
            return None;
        }
    };

    let html = resp.text().await.ok()?;
    let text = extract_readable_text(cap_bytes(&html, MAX_RESPONSE_BYTES));
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(max_chars).collect())
}

/// Visible text of an HTML document, skipping boilerplate containers
pub fn extract_readable_text(html: &str) -> String {
    const SKIPPED: [&str; 5] = ["script", "style", "nav", "footer", "header"];

    let mut chunks: Vec<String> = Vec::new();
    let mut skip_depth = 0usize;
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        let text = rest[..open].trim();
        if skip_depth == 0 && !text.is_empty() {
            chunks.push(decode_entities(text));
        }

        let Some(close) = rest[open..].find('>') else {
            rest = "";
            break;
        };
        let tag = &rest[open + 1..open + close];
        let closing = tag.starts_with('/');
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        if SKIPPED.contains(&name.as_str()) && !tag.ends_with('/') {
            if closing {
                skip_depth = skip_depth.saturating_sub(1);
            } else {
                skip_depth += 1;
            }
        }
        rest = &rest[open + close + 1..];
    }

    let tail = rest.trim();
    if skip_depth == 0 && !tail.is_empty() {
        chunks.push(decode_entities(tail));
    }

    chunks.join(" ")
}

/// Parse DuckDuckGo HTML results into hits
fn parse_ddg_html(html: &str, max_results: usize) -> Vec<SearchHit> {
    const LINK_MARKER: &str = "class=\"result__a\"";
    const SNIPPET_MARKER: &str = "class=\"result__snippet\"";

    let mut hits = Vec::new();
    let mut pos = 0;

    while hits.len() < max_results {
        let Some(found) = html[pos..].find(LINK_MARKER) else {
            break;
        };
        let marker_at = pos + found;

        // The href sits on the same anchor tag, before or after the class
        let tag_start = html[..marker_at].rfind('<').unwrap_or(marker_at);
        let tag_end = html[marker_at..]
            .find('>')
            .map(|i| marker_at + i)
            .unwrap_or(html.len());
        let href = attr_value(&html[tag_start..tag_end], "href=\"");

        let title_end = html[tag_end..].find("</a>").map(|i| tag_end + i);
        let title = title_end
            .map(|end| strip_tags(&html[(tag_end + 1).min(end)..end]))
            .unwrap_or_default();

        let search_from = title_end.unwrap_or(tag_end);
        let next_link = html[search_from..]
            .find(LINK_MARKER)
            .map(|i| search_from + i)
            .unwrap_or(html.len());
        let snippet = html[search_from..next_link]
            .find(SNIPPET_MARKER)
            .map(|i| search_from + i)
            .and_then(|at| {
                let start = html[at..].find('>').map(|i| at + i + 1)?;
                let end = html[start..].find("</a>").map(|i| start + i)?;
                Some(strip_tags(&html[start..end]))
            })
            .unwrap_or_default();

        let url = href.map(|h| resolve_ddg_url(&h)).unwrap_or_default();
        if !url.is_empty() && !title.is_empty() {
            hits.push(SearchHit {
                title,
                url,
                snippet,
            });
        }

        pos = search_from.max(marker_at + LINK_MARKER.len()).min(html.len());
    }

    hits
}

fn attr_value(tag: &str, attr: &str) -> Option<String> {
    let start = tag.find(attr)? + attr.len();
    let len = tag[start..].find('"')?;
    Some(tag[start..start + len].to_string())
}

/// DuckDuckGo wraps targets as `//duckduckgo.com/l/?uddg=<encoded>&...`
fn resolve_ddg_url(href: &str) -> String {
    if let Some(at) = href.find("uddg=") {
        let start = at + "uddg=".len();
        let end = href[start..].find('&').map(|i| start + i).unwrap_or(href.len());
        let encoded = &href[start..end];
        urlencoding::decode(encoded)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| encoded.to_string())
    } else if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    }
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    decode_entities(out.trim())
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Truncate to at most `max` bytes on a char boundary
fn cap_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
