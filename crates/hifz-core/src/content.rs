use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::VerseId;

/// Display text for one verse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerseContent {
    pub verse: VerseId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

/// Verse text lookup. The engine never owns content; it only asks for it
/// when rendering a plan.
pub trait ContentProvider {
    fn lookup(&self, verse: VerseId) -> Option<VerseContent>;
}

/// Provider that knows no text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContent;

impl ContentProvider for NoContent {
    fn lookup(&self, _verse: VerseId) -> Option<VerseContent> {
        None
    }
}

impl ContentProvider for HashMap<VerseId, VerseContent> {
    fn lookup(&self, verse: VerseId) -> Option<VerseContent> {
        self.get(&verse).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_provider() {
        let mut map = HashMap::new();
        map.insert(
            1,
            VerseContent {
                verse: 1,
                text: "bismi-llahi".into(),
                translation: Some("In the name of God".into()),
            },
        );
        assert_eq!(map.lookup(1).map(|c| c.text), Some("bismi-llahi".to_string()));
        assert!(map.lookup(2).is_none());
        assert!(NoContent.lookup(1).is_none());
    }
}
