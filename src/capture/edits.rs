//! Authorship signature over edit events: how much inserted text came from the
//! keyboard, from paste, or from applied AI suggestions.

use super::{EditEvent, EditKind, EditSource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSummary {
    pub edit_count: u64,
    pub keyboard_chars: u64,
    pub paste_chars: u64,
    pub ai_chars: u64,
    pub deleted_chars: u64,
    /// Paste share of inserted characters, 0 when nothing was inserted
    pub paste_ratio: f64,
    /// AI-suggestion share of inserted characters, 0 when nothing was inserted
    pub ai_ratio: f64,
}

impl EditSummary {
    pub fn from_edits<'a>(edits: impl IntoIterator<Item = &'a EditEvent>) -> Self {
        let mut s = EditSummary::default();
        s.extend(edits);
        s
    }

    /// Fold more edits in. Counters saturate instead of wrapping.
    pub fn extend<'a>(&mut self, edits: impl IntoIterator<Item = &'a EditEvent>) {
        for e in edits {
            self.edit_count = self.edit_count.saturating_add(1);
            if e.kind == EditKind::CursorMove {
                continue;
            }
            if e.length_delta < 0 {
                self.deleted_chars = self.deleted_chars.saturating_add(e.length_delta.unsigned_abs());
                continue;
            }
            let n = e.length_delta as u64;
            let bucket = match e.source {
                EditSource::Keyboard => &mut self.keyboard_chars,
                EditSource::Paste => &mut self.paste_chars,
                EditSource::AiSuggestion => &mut self.ai_chars,
            };
            *bucket = bucket.saturating_add(n);
        }
        let inserted = self.inserted_chars();
        if inserted > 0 {
            self.paste_ratio = self.paste_chars as f64 / inserted as f64;
            self.ai_ratio = self.ai_chars as f64 / inserted as f64;
        }
    }

    pub fn inserted_chars(&self) -> u64 {
        self.keyboard_chars
            .saturating_add(self.paste_chars)
            .saturating_add(self.ai_chars)
    }
}
