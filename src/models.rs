//! Data models for feed articles and their categorized representations.
//!
//! - [`ArticleRecord`]: an article as delivered by the source feed
//! - [`Classification`]: what the classifier said about one article
//! - [`AnnotatedRecord`]: an article plus its classification, as persisted
//! - [`RunSummary`]: per-run counts reported at the end of a pipeline run

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Placeholder used when the feed carries no description.
pub const DEFAULT_DESCRIPTION: &str = "No description available";

fn default_description() -> String {
    DEFAULT_DESCRIPTION.to_string()
}

/// A single article from the source feed.
///
/// Feed entries are normalized into this shape by [`crate::source`]; the
/// serde defaults only matter when reading result files from older runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArticleRecord {
    /// The headline as published.
    pub original_title: String,
    /// A rewritten headline produced upstream, or the original when absent.
    #[serde(default)]
    pub optimized_title: String,
    /// Short description or teaser text.
    #[serde(default = "default_description")]
    pub description: String,
    /// Canonical URL of the article.
    #[serde(default)]
    pub link: String,
    /// Publication date as given by the feed (not parsed).
    #[serde(default)]
    pub published: String,
}

impl ArticleRecord {
    /// Stable identifier used to decide whether an article was already
    /// categorized.
    ///
    /// The trimmed link is the key. Articles without a link fall back to
    /// `sha256:<hex>` of the title and description, where a blank
    /// description counts as [`DEFAULT_DESCRIPTION`] so old result files and
    /// the feed agree.
    pub fn dedup_key(&self) -> String {
        let link = self.link.trim();
        if !link.is_empty() {
            return link.to_string();
        }
        let description = match self.description.trim() {
            "" => DEFAULT_DESCRIPTION,
            d => d,
        };
        let mut hasher = Sha256::new();
        hasher.update(self.original_title.trim().as_bytes());
        hasher.update(b"\n");
        hasher.update(description.as_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    /// Title to show the classifier; falls back to the original title.
    pub fn display_title(&self) -> &str {
        if self.optimized_title.trim().is_empty() {
            &self.original_title
        } else {
            &self.optimized_title
        }
    }
}

/// Structured result of a classifier call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: String,
    pub summary: Option<String>,
}

/// An article together with the label assigned to it.
///
/// Created once per dedup key and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AnnotatedRecord {
    #[serde(flatten)]
    pub article: ArticleRecord,
    /// Category assigned by the classifier (e.g. "Technology").
    pub category: String,
    /// Optional short summary when the classifier was asked for one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// RFC 3339 time the record was categorized. Empty for legacy entries
    /// written before timestamps were recorded.
    #[serde(default, alias = "categorized_at")]
    pub annotated_at: String,
}

impl AnnotatedRecord {
    /// Stamp a fresh classification onto an article.
    pub fn new(article: ArticleRecord, classification: Classification) -> Self {
        Self {
            article,
            category: classification.category,
            summary: classification.summary,
            annotated_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn dedup_key(&self) -> String {
        self.article.dedup_key()
    }
}

/// Why a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every candidate was visited.
    Completed,
    /// The configured time budget ran out; the rest is left for the next run.
    BudgetExhausted,
    /// The operator interrupted the run.
    Interrupted,
}

/// Counts reported at the end of a run.
///
/// For a completed run `processed + skipped + failed` equals the number of
/// candidates; an early stop leaves the difference in `remaining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub remaining: usize,
    pub stop: StopReason,
}

impl RunSummary {
    pub fn visited(&self) -> usize {
        self.processed + self.skipped + self.failed
    }
}
