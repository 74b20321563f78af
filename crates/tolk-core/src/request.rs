//! Caller-facing request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of translation work as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    /// Source language code.
    pub from: String,
    /// Target language code.
    pub to: String,
    /// The text to translate.
    pub text: String,
    /// Treat the text as HTML and preserve its markup.
    #[serde(default)]
    pub html: bool,
    /// Scheduling niceness: lower numbers are served first. Defaults to 0.
    #[serde(default)]
    pub priority: i32,
    /// Ask the kernel to estimate per-sentence translation quality.
    #[serde(default)]
    pub quality_scores: bool,
}

impl TranslationRequest {
    pub fn new(from: impl Into<String>, to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            text: text.into(),
            html: false,
            priority: 0,
            quality_scores: false,
        }
    }

    pub fn with_html(mut self, html: bool) -> Self {
        self.html = html;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_quality_scores(mut self, quality_scores: bool) -> Self {
        self.quality_scores = quality_scores;
        self
    }
}

/// The translated result, echoing the request it belongs to so callers can
/// correlate responses without extra bookkeeping.
#[derive(Debug, Clone)]
pub struct TranslationResponse {
    pub request: TranslationRequest,
    /// Translated text.
    pub text: String,
    /// Token alignment data, when the kernel produced any.
    pub alignment: Option<Value>,
    /// Quality estimates, when requested and produced.
    pub quality: Option<Value>,
}
