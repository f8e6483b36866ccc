// Pull a JSON array out of free-form model output.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Greedy: from the first `[` to the last `]`, across newlines.
static JSON_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[\s\S]*\]").expect("JSON array pattern is valid"));

/// Find the outermost bracketed span in `text` and decode it as `Vec<T>`.
///
/// Returns `None` when no span exists, the span is not valid JSON for `T`,
/// or the array is empty. Models often wrap the array in prose or a Markdown
/// fence; both are tolerated.
pub fn extract_json_array<T: DeserializeOwned>(text: &str) -> Option<Vec<T>> {
    let Some(found) = JSON_ARRAY.find(text) else {
        debug!("no JSON array in model output");
        return None;
    };
    match serde_json::from_str::<Vec<T>>(found.as_str()) {
        Ok(items) if items.is_empty() => {
            debug!("model returned an empty JSON array");
            None
        }
        Ok(items) => Some(items),
        Err(e) => {
            warn!(error = %e, "model output contained an undecodable JSON array");
            None
        }
    }
}

/// Like [`extract_json_array`], substituting `fallback()` when extraction
/// fails.
pub fn extract_or_else<T: DeserializeOwned>(text: &str, fallback: impl FnOnce() -> Vec<T>) -> Vec<T> {
    extract_json_array(text).unwrap_or_else(fallback)
}
