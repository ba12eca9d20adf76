//! Client-supplied inputs: event batches and verse content files.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use hifz_core::{RawEvent, VerseContent, VerseId};

pub type ContentMap = HashMap<VerseId, VerseContent>;

/// Decode loosely shaped event objects. Entries that are not even event
/// records are counted and skipped, like any other invalid event.
pub fn decode_events(values: Vec<serde_json::Value>) -> (Vec<RawEvent>, usize) {
    let mut events = Vec::with_capacity(values.len());
    let mut malformed = 0;
    for (i, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<RawEvent>(value) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!("dropping malformed session event #{i}: {e}");
                malformed += 1;
            }
        }
    }
    (events, malformed)
}

pub fn read_events(path: &Path) -> Result<(Vec<RawEvent>, usize)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let values: Vec<serde_json::Value> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of events", path.display()))?;
    Ok(decode_events(values))
}

/// Load verse text from a JSON array of `{verse, text, translation?}`.
pub fn read_content(path: Option<&Path>) -> Result<ContentMap> {
    let Some(path) = path else {
        return Ok(ContentMap::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let verses: Vec<VerseContent> = serde_json::from_str(&content)
        .with_context(|| format!("invalid verse content in {}", path.display()))?;
    Ok(verses.into_iter().map(|v| (v.verse, v)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_skips_non_events() {
        let (events, malformed) = decode_events(vec![
            json!({"verse": 1, "stage": "NEW", "phase": "BLIND", "grade": "GOOD", "occurred_at": 10}),
            json!("not an event"),
            json!({"verse": 2, "stage": "NEW"}),
        ]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].verse, Some(1));
        assert_eq!(malformed, 2);
    }

    #[test]
    fn test_read_content_keys_by_verse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verses.json");
        std::fs::write(
            &path,
            r#"[{"verse": 1, "text": "bismillah"}, {"verse": 2, "text": "alhamdu", "translation": "praise"}]"#,
        )
        .unwrap();
        let map = read_content(Some(&path)).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&2].translation.as_deref(), Some("praise"));
        assert!(read_content(None).unwrap().is_empty());
    }
}
