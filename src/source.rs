//! Source feed: the JSON document listing candidate articles.
//!
//! The feed is fetched once per run. A non-success status or a body that is
//! not valid JSON aborts the run before anything is written.
//!
//! Accepted shapes:
//!
//! ```json
//! { "articles": [ { "title": "...", "link": "...", ... } ] }
//! [ { "original_title": "...", "optimized_title": "...", ... } ]
//! ```

use crate::error::FeedError;
use crate::models::{ArticleRecord, DEFAULT_DESCRIPTION};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedDocument {
    Wrapped { articles: Vec<FeedEntry> },
    Bare(Vec<FeedEntry>),
}

/// A feed entry as published. Any field may be missing or `null`.
#[derive(Debug, Deserialize)]
struct FeedEntry {
    #[serde(default)]
    original_title: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    optimized_title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    published: Option<String>,
}

impl FeedEntry {
    fn into_record(self) -> Option<ArticleRecord> {
        let original_title = self
            .original_title
            .filter(|t| !t.trim().is_empty())
            .or(self.title)
            .unwrap_or_default()
            .trim()
            .to_string();
        let link = self.link.unwrap_or_default().trim().to_string();
        if original_title.is_empty() && link.is_empty() {
            return None;
        }
        let optimized_title = self
            .optimized_title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| original_title.clone());
        let description = self
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
        Some(ArticleRecord {
            original_title,
            optimized_title,
            description,
            link,
            published: self.published.unwrap_or_default(),
        })
    }
}

/// Parse a feed body into article records, keeping feed order.
///
/// Entries with neither a title nor a link are dropped.
pub fn parse_feed(body: &str, limit: Option<usize>) -> Result<Vec<ArticleRecord>, FeedError> {
    let entries = match serde_json::from_str::<FeedDocument>(body) {
        Ok(FeedDocument::Wrapped { articles }) | Ok(FeedDocument::Bare(articles)) => articles,
        Err(_) => {
            // Re-parse untyped to surface serde's positional error instead of
            // the generic untagged-enum message.
            serde_json::from_str::<serde_json::Value>(body)?;
            return Err(FeedError::Malformed(serde::de::Error::custom(
                "expected an object with an `articles` array or a bare array",
            )));
        }
    };

    let total = entries.len();
    let mut records: Vec<ArticleRecord> = entries
        .into_iter()
        .filter_map(FeedEntry::into_record)
        .collect();
    let dropped = total - records.len();
    if dropped > 0 {
        warn!(dropped, "Dropped feed entries with neither title nor link");
    }
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    Ok(records)
}

/// Fetch and parse the feed at `source_url`.
#[instrument(level = "info", skip_all, fields(%source_url))]
pub async fn fetch_articles(
    source_url: &str,
    limit: Option<usize>,
    timeout: Duration,
) -> Result<Vec<ArticleRecord>, FeedError> {
    let url = Url::parse(source_url).map_err(|_| FeedError::InvalidUrl(source_url.to_string()))?;

    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FeedError::Status { status });
    }
    let body = resp.text().await?;
    debug!(bytes = body.len(), "Fetched feed");

    let records = parse_feed(&body, limit)?;
    info!(count = records.len(), "Loaded candidate articles");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_feed() {
        let body = r#"{
            "optimization_timestamp": "2025-01-01T00:00:00",
            "articles": [
                {"original_title": "A", "optimized_title": "A!", "description": "d", "link": "u1", "published": "p"},
                {"title": "B", "link": "u2", "description": null}
            ]
        }"#;
        let records = parse_feed(body, None).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].optimized_title, "A!");
        assert_eq!(records[1].original_title, "B");
        assert_eq!(records[1].optimized_title, "B");
        assert_eq!(records[1].description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn test_parse_bare_array_with_limit() {
        let body = r#"[{"title": "A", "link": "u1"}, {"title": "B", "link": "u2"}, {"title": "C", "link": "u3"}]"#;
        let records = parse_feed(body, Some(2)).unwrap();
        let links: Vec<_> = records.iter().map(|r| r.link.as_str()).collect();
        assert_eq!(links, ["u1", "u2"]);
    }

    #[test]
    fn test_original_title_wins_over_title() {
        let body = r#"[{"title": "Feed title", "original_title": "Original", "link": "u1"}]"#;
        let records = parse_feed(body, None).unwrap();
        assert_eq!(records[0].original_title, "Original");
    }

    #[test]
    fn test_drops_empty_entries() {
        let body = r#"{"articles": [{"description": "orphan"}, {"title": "A"}]}"#;
        let records = parse_feed(body, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_title, "A");
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(
            parse_feed("{\"articles\": [", None),
            Err(FeedError::Malformed(_))
        ));
        assert!(matches!(
            parse_feed("{\"items\": []}", None),
            Err(FeedError::Malformed(_))
        ));
    }

    /// Serve one canned HTTP response on a local port and return its URL.
    async fn serve_once(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/feed.json")
    }

    #[tokio::test]
    async fn test_non_success_status_is_fatal() {
        let url = serve_once(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;

        let result = fetch_articles(&url, None, Duration::from_secs(5)).await;
        assert!(matches!(
            result,
            Err(FeedError::Status { status }) if status.as_u16() == 500
        ));
    }

    #[tokio::test]
    async fn test_fetch_parses_served_feed() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 43\r\nconnection: close\r\n\r\n{\"articles\": [{\"title\": \"A\", \"link\": \"u\"}]}",
        )
        .await;

        let records = fetch_articles(&url, None, Duration::from_secs(5)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].link, "u");
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_any_request() {
        let result = fetch_articles("not a url", None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(FeedError::InvalidUrl(_))));
    }
}
