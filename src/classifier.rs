//! The classifier port and its chat-completions implementation.
//!
//! - [`Classifier`]: the seam the pipeline calls, one article at a time
//! - [`ChatClassifier`]: talks to an OpenAI-compatible `/chat/completions`
//!   endpoint (Mistral by default)
//! - [`parse_response`]: turns the model's free text into a [`Classification`]
//!
//! The HTTP layer only decides *whether* a failure is a rate limit; retrying
//! is the caller's business (see [`crate::backoff`]).

use crate::config::AppConfig;
use crate::error::ClassifyError;
use crate::models::{ArticleRecord, Classification};
use crate::utils::truncate_for_log;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Something that can label an article.
///
/// Implementors own no state that outlives a call, so one failing article
/// never affects the next.
pub trait Classifier {
    async fn classify(&self, article: &ArticleRecord) -> Result<Classification, ClassifyError>;
}

/// What the model is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierMode {
    /// A bare category name.
    #[default]
    CategoryOnly,
    /// `CATEGORY:` and `SUMMARY:` lines.
    CategoryAndSummary,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`Classifier`] backed by a chat-completions API.
pub struct ChatClassifier {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    mode: ClassifierMode,
    categories: Vec<String>,
    prompt_template: Option<String>,
}

impl fmt::Debug for ChatClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClassifier")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("mode", &self.mode)
            .field("categories", &self.categories.len())
            .finish()
    }
}

impl ChatClassifier {
    /// Build a client from the loaded configuration and an API key.
    pub fn new(config: &AppConfig, api_key: &str) -> Result<Self, ClassifyError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| ClassifyError::Response("API key is not a valid header value".to_string()))?;
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.api.base_url.trim_end_matches('/')),
            model: config.api.model.clone(),
            mode: config.classifier.mode,
            categories: config.classifier.categories.clone(),
            prompt_template: config.classifier.prompt_template.clone(),
        })
    }

    fn messages(&self, article: &ArticleRecord) -> Vec<ChatMessage> {
        build_messages(
            article,
            self.mode,
            &self.categories,
            self.prompt_template.as_deref(),
        )
    }
}

impl Classifier for ChatClassifier {
    #[instrument(level = "info", skip_all, fields(link = %article.link))]
    async fn classify(&self, article: &ArticleRecord) -> Result<Classification, ClassifyError> {
        let t0 = Instant::now();
        let body = ChatRequest {
            model: &self.model,
            messages: self.messages(article),
        };
        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            warn!(
                elapsed_ms = t0.elapsed().as_millis(),
                %status,
                body = %truncate_for_log(&text, 300),
                "Classifier call failed"
            );
            return Err(status_error(status, text));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ClassifyError::Response(format!("malformed completion: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| ClassifyError::Response("completion has no content".to_string()))?;

        debug!(
            elapsed_ms = t0.elapsed().as_millis(),
            response_preview = %truncate_for_log(&content, 200),
            "Classifier answered"
        );
        parse_response(&content, self.mode, &self.categories)
    }
}

/// Map a non-success HTTP status to a classifier error.
///
/// 429, or any error body that talks about rate limiting, is retryable.
fn status_error(status: StatusCode, body: String) -> ClassifyError {
    if status == StatusCode::TOO_MANY_REQUESTS || body.to_lowercase().contains("rate limit") {
        ClassifyError::RateLimited(format!("HTTP {status}: {}", truncate_for_log(&body, 200)))
    } else {
        ClassifyError::Status { status, body }
    }
}

fn build_messages(
    article: &ArticleRecord,
    mode: ClassifierMode,
    categories: &[String],
    template: Option<&str>,
) -> Vec<ChatMessage> {
    let vocabulary = categories.join(", ");
    let system = match mode {
        ClassifierMode::CategoryOnly => format!(
            "You are a content categorizer. Analyze the given content and assign ONE category \
             from the following list: {vocabulary}. Return ONLY the category name, nothing else."
        ),
        ClassifierMode::CategoryAndSummary => format!(
            "You are a content categorizer. Analyze the given content, assign ONE category \
             from the following list: {vocabulary}, and write a one or two sentence summary. \
             Answer in exactly this format:\nCATEGORY: <category>\nSUMMARY: <summary>"
        ),
    };

    let user = match template {
        Some(t) => t
            .replace("{title}", &article.original_title)
            .replace("{optimized_title}", article.display_title())
            .replace("{description}", &article.description),
        None => format!(
            "Original Title: {}\nOptimized Title: {}\nDescription: {}",
            article.original_title,
            article.display_title(),
            article.description
        ),
    };

    vec![
        ChatMessage {
            role: "system",
            content: system,
        },
        ChatMessage {
            role: "user",
            content: user,
        },
    ]
}

static FIELD_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*[*_#]*\s*(category|summary)\s*[*_]*\s*:\s*[*_]*\s*(.*)$")
        .expect("static regex is valid")
});

/// Parse a model answer into a [`Classification`].
///
/// In [`ClassifierMode::CategoryOnly`] the first non-empty line is the
/// category. In [`ClassifierMode::CategoryAndSummary`] the answer must carry a
/// `CATEGORY:` line; a `SUMMARY:` line is optional and may continue over the
/// following lines.
pub fn parse_response(
    text: &str,
    mode: ClassifierMode,
    vocabulary: &[String],
) -> Result<Classification, ClassifyError> {
    let (raw_category, summary) = match mode {
        ClassifierMode::CategoryOnly => {
            let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
            let line = match FIELD_LINE.captures(line) {
                Some(caps) if caps[1].eq_ignore_ascii_case("category") => {
                    caps.get(2).map_or("", |m| m.as_str())
                }
                _ => line,
            };
            (line.to_string(), None)
        }
        ClassifierMode::CategoryAndSummary => {
            let mut category = None;
            let mut summary: Option<String> = None;
            let mut in_summary = false;
            for line in text.lines() {
                if let Some(caps) = FIELD_LINE.captures(line) {
                    let value = caps
                        .get(2)
                        .map_or("", |m| m.as_str())
                        .trim()
                        .trim_end_matches(['*', '_'])
                        .trim()
                        .to_string();
                    if caps[1].eq_ignore_ascii_case("category") {
                        category.get_or_insert(value);
                        in_summary = false;
                    } else {
                        summary = Some(value);
                        in_summary = true;
                    }
                } else if in_summary && !line.trim().is_empty() {
                    if let Some(s) = summary.as_mut() {
                        if !s.is_empty() {
                            s.push(' ');
                        }
                        s.push_str(line.trim());
                    }
                }
            }
            let category = category.ok_or_else(|| {
                ClassifyError::Response(format!(
                    "no CATEGORY line in {}",
                    truncate_for_log(text, 120)
                ))
            })?;
            (category, summary.filter(|s| !s.is_empty()))
        }
    };

    let category = normalize_category(&raw_category, vocabulary);
    if category.is_empty() {
        return Err(ClassifyError::Response("empty category".to_string()));
    }
    Ok(Classification { category, summary })
}

/// Strip decoration and snap to the vocabulary's spelling when it matches.
fn normalize_category(raw: &str, vocabulary: &[String]) -> String {
    let decoration = ['"', '\'', '*', '`'];
    let cleaned = raw
        .trim()
        .trim_end_matches('.')
        .trim_matches(decoration)
        .trim_end_matches('.')
        .trim();
    match vocabulary.iter().find(|v| v.eq_ignore_ascii_case(cleaned)) {
        Some(known) => known.clone(),
        None => {
            if !cleaned.is_empty() {
                warn!(category = %cleaned, "Category is not in the configured vocabulary");
            }
            cleaned.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CATEGORIES;

    fn vocab() -> Vec<String> {
        DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
    }

    fn article() -> ArticleRecord {
        ArticleRecord {
            original_title: "Chip makers rally".to_string(),
            optimized_title: "Why chip stocks jumped today".to_string(),
            description: "Semiconductor shares rose.".to_string(),
            link: "https://example.com/chips".to_string(),
            published: "2025-05-06".to_string(),
        }
    }

    #[test]
    fn test_category_only_trims_and_normalizes() {
        let c = parse_response("  \"technology\".\n", ClassifierMode::CategoryOnly, &vocab()).unwrap();
        assert_eq!(c.category, "Technology");
        assert_eq!(c.summary, None);
    }

    #[test]
    fn test_category_only_accepts_prefixed_answer() {
        let c = parse_response("Category: Sports", ClassifierMode::CategoryOnly, &vocab()).unwrap();
        assert_eq!(c.category, "Sports");
    }

    #[test]
    fn test_unknown_category_is_kept_verbatim() {
        let c = parse_response("Astrology", ClassifierMode::CategoryOnly, &vocab()).unwrap();
        assert_eq!(c.category, "Astrology");
    }

    #[test]
    fn test_empty_answer_is_an_error() {
        let err = parse_response("  \n ", ClassifierMode::CategoryOnly, &vocab()).unwrap_err();
        assert!(matches!(err, ClassifyError::Response(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_category_and_summary() {
        let text = "CATEGORY: Business\nSUMMARY: Chip stocks rose\non strong demand.\n";
        let c = parse_response(text, ClassifierMode::CategoryAndSummary, &vocab()).unwrap();
        assert_eq!(c.category, "Business");
        assert_eq!(c.summary.as_deref(), Some("Chip stocks rose on strong demand."));
    }

    #[test]
    fn test_category_and_summary_tolerates_markdown_and_case() {
        let text = "**Category:** science\n\n**Summary:** A new telescope.";
        let c = parse_response(text, ClassifierMode::CategoryAndSummary, &vocab()).unwrap();
        assert_eq!(c.category, "Science");
        assert_eq!(c.summary.as_deref(), Some("A new telescope."));
    }

    #[test]
    fn test_missing_category_line_is_an_error() {
        let err = parse_response("SUMMARY: nothing", ClassifierMode::CategoryAndSummary, &vocab())
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Response(_)));
    }

    #[test]
    fn test_status_error_classification() {
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(
            status_error(
                StatusCode::BAD_REQUEST,
                r#"{"message":"Rate limit exceeded"}"#.to_string()
            )
            .is_retryable()
        );
        assert!(!status_error(StatusCode::UNAUTHORIZED, "bad key".to_string()).is_retryable());
        assert!(!status_error(StatusCode::INTERNAL_SERVER_ERROR, String::new()).is_retryable());
    }

    #[test]
    fn test_messages_are_role_tagged() {
        let msgs = build_messages(&article(), ClassifierMode::CategoryOnly, &vocab(), None);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "system");
        assert!(msgs[0].content.contains("Technology, Business"));
        assert_eq!(msgs[1].role, "user");
        assert!(msgs[1].content.contains("Why chip stocks jumped today"));
        assert!(msgs[1].content.contains("Semiconductor shares rose."));
    }

    #[test]
    fn test_messages_use_template() {
        let msgs = build_messages(
            &article(),
            ClassifierMode::CategoryAndSummary,
            &vocab(),
            Some("T={title} O={optimized_title} D={description}"),
        );
        assert!(msgs[0].content.contains("SUMMARY:"));
        assert_eq!(
            msgs[1].content,
            "T=Chip makers rally O=Why chip stocks jumped today D=Semiconductor shares rose."
        );
    }
}
