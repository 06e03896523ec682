//! Input document model: a titled collection of articles whose bodies are raw HTML fragments.

use serde::{Deserialize, Serialize};

/// One document to bundle (a column, a collection, a single answer...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        rename = "coverUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cover_url: Option<String>,
    #[serde(
        rename = "sourceUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_url: Option<String>,
    pub articles: Vec<Article>,
}

/// One article in reading order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    /// 1-based position in the document.
    pub index: u32,
    /// Raw HTML fragment. May contain page markers.
    pub body: String,
}
