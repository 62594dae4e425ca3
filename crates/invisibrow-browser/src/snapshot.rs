//! Bounded, structured views of the live page.
//!
//! A snapshot is the only page representation the executor's LLM ever sees,
//! and [`BrowserResult`] is the only information that crosses the
//! executor -> planner boundary. Raw DOM stops here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum interactive elements carried by a snapshot.
pub const MAX_ELEMENTS: usize = 100;

/// Maximum characters of visible text per element.
pub const MAX_ELEMENT_TEXT: usize = 50;

/// Maximum characters of the page's visible body text.
pub const MAX_CONTENT_SNIPPET: usize = 1500;

/// One visible interactive element: anchor, button, input, or an element
/// with an interactive role. The index is stable within its snapshot and is
/// the only way actions reference elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub index: usize,
    pub tag: String,
    /// Up to [`MAX_ELEMENT_TEXT`] chars of visible text, placeholder, or
    /// accessible label.
    pub text: String,
}

/// Ephemeral input to the executor's decision call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub interactive_elements: Vec<InteractiveElement>,
    /// First [`MAX_CONTENT_SNIPPET`] chars of the visible body text.
    pub content_snippet: String,
}

/// The only information the executor returns to the planner for a task
/// segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserResult {
    /// Natural-language summary of what happened.
    pub summary: String,
    /// Structured values extracted from the page.
    pub extracted: Value,
    /// URL of the page when the segment ended.
    pub url: String,
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

/// Apply the snapshot contract to raw driver output: cap the element list,
/// re-index sequentially, truncate element text and the content snippet.
pub fn normalize_snapshot(
    url: String,
    title: String,
    elements: Vec<(String, String)>,
    content: String,
) -> PageSnapshot {
    let interactive_elements = elements
        .into_iter()
        .take(MAX_ELEMENTS)
        .enumerate()
        .map(|(index, (tag, text))| InteractiveElement {
            index,
            tag,
            text: truncate_chars(text.trim(), MAX_ELEMENT_TEXT),
        })
        .collect();
    PageSnapshot {
        url,
        title,
        interactive_elements,
        content_snippet: truncate_chars(&content, MAX_CONTENT_SNIPPET),
    }
}

impl PageSnapshot {
    /// Serialize for the decision prompt: URL, title, indexed element list,
    /// then the content snippet.
    pub fn to_prompt_text(&self) -> String {
        let mut out = format!("URL: {}\nTITLE: {}\nELEMENTS:\n", self.url, self.title);
        for element in &self.interactive_elements {
            out.push_str(&format!(
                "  [{}] <{}> {}\n",
                element.index, element.tag, element.text
            ));
        }
        out.push_str("CONTENT:\n");
        out.push_str(&self.content_snippet);
        out
    }
}
