//! Multi-source transcript aggregation
//!
//! Tracks finalized and volatile (still-refining) text per source and
//! renders the merged and annotated views. Recomputation is O(sources) on
//! every read; no engine state lives here.

use notevox_foundation::SourceKind;
use std::collections::HashMap;

pub const TRANSCRIPT_HEADER: &str = "=== Session Transcript ===";
pub const EMPTY_PLACEHOLDER: &str = "(no transcript captured)";

#[derive(Debug, Clone, Default)]
struct SourceText {
    finalized: String,
    volatile: String,
}

#[derive(Debug, Clone)]
pub struct TranscriptAggregator {
    /// Stable presentation order.
    order: Vec<SourceKind>,
    text: HashMap<SourceKind, SourceText>,
}

impl TranscriptAggregator {
    pub fn new(sources: &[SourceKind]) -> Self {
        Self {
            order: sources.to_vec(),
            text: sources
                .iter()
                .map(|&s| (s, SourceText::default()))
                .collect(),
        }
    }

    /// Replace the volatile text for a source; snippets supersede each
    /// other.
    pub fn apply_snippet(&mut self, source: SourceKind, text: &str) {
        if let Some(entry) = self.text.get_mut(&source) {
            entry.volatile = text.to_string();
        }
    }

    /// Append finalized text for a source and clear its volatile text.
    pub fn apply_final(&mut self, source: SourceKind, text: &str) {
        if let Some(entry) = self.text.get_mut(&source) {
            if !text.is_empty() {
                if !entry.finalized.is_empty() {
                    entry.finalized.push(' ');
                }
                entry.finalized.push_str(text);
            }
            entry.volatile.clear();
        }
    }

    /// Finalized text of every source in stable order, blank-line separated.
    pub fn merged_transcript(&self) -> String {
        self.order
            .iter()
            .filter_map(|s| self.text.get(s))
            .map(|t| t.finalized.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Best available text per source (finalized plus any volatile tail),
    /// used when a stop must not wait for the engine.
    pub fn best_text(&self) -> String {
        self.order
            .iter()
            .filter_map(|s| self.text.get(s))
            .map(|t| {
                if t.volatile.is_empty() {
                    t.finalized.clone()
                } else if t.finalized.is_empty() {
                    t.volatile.clone()
                } else {
                    format!("{} {}", t.finalized, t.volatile)
                }
            })
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Human-readable block format: fixed header, one labeled section per
    /// source, placeholder when nothing was captured.
    pub fn annotated_transcript(&self) -> String {
        let mut blocks = Vec::new();
        for source in &self.order {
            let Some(entry) = self.text.get(source) else {
                continue;
            };
            let body = if entry.volatile.is_empty() {
                entry.finalized.clone()
            } else if entry.finalized.is_empty() {
                entry.volatile.clone()
            } else {
                format!("{} {}", entry.finalized, entry.volatile)
            };
            if !body.is_empty() {
                blocks.push(format!("[{}]\n{}", source.label(), body));
            }
        }

        if blocks.is_empty() {
            format!("{}\n\n{}", TRANSCRIPT_HEADER, EMPTY_PLACEHOLDER)
        } else {
            format!("{}\n\n{}", TRANSCRIPT_HEADER, blocks.join("\n\n"))
        }
    }

    pub fn reset(&mut self) {
        for entry in self.text.values_mut() {
            entry.finalized.clear();
            entry.volatile.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dual() -> TranscriptAggregator {
        TranscriptAggregator::new(&[SourceKind::Microphone, SourceKind::SystemAudio])
    }

    #[test]
    fn empty_aggregator_renders_placeholder() {
        let agg = dual();
        assert_eq!(agg.merged_transcript(), "");
        let annotated = agg.annotated_transcript();
        assert!(annotated.starts_with(TRANSCRIPT_HEADER));
        assert!(annotated.contains(EMPTY_PLACEHOLDER));
    }

    #[test]
    fn two_finalized_sources_merge_in_stable_order() {
        let mut agg = dual();
        agg.apply_final(SourceKind::SystemAudio, "World");
        agg.apply_final(SourceKind::Microphone, "Hello");

        assert_eq!(agg.merged_transcript(), "Hello\n\nWorld");

        let annotated = agg.annotated_transcript();
        assert!(annotated.contains("[Microphone]\nHello"));
        assert!(annotated.contains("[System Audio]\nWorld"));
        assert!(annotated.find("[Microphone]").unwrap() < annotated.find("[System Audio]").unwrap());
    }

    #[test]
    fn snippets_supersede_each_other() {
        let mut agg = dual();
        agg.apply_snippet(SourceKind::Microphone, "hel");
        agg.apply_snippet(SourceKind::Microphone, "hello wor");
        assert_eq!(agg.best_text(), "hello wor");
        // Volatile text never leaks into the finalized merge.
        assert_eq!(agg.merged_transcript(), "");
    }

    #[test]
    fn final_clears_volatile() {
        let mut agg = dual();
        agg.apply_snippet(SourceKind::Microphone, "hello wor");
        agg.apply_final(SourceKind::Microphone, "hello world");
        assert_eq!(agg.best_text(), "hello world");
        assert_eq!(agg.merged_transcript(), "hello world");
    }

    #[test]
    fn consecutive_finals_accumulate() {
        let mut agg = dual();
        agg.apply_final(SourceKind::Microphone, "first part.");
        agg.apply_final(SourceKind::Microphone, "second part.");
        assert_eq!(agg.merged_transcript(), "first part. second part.");
    }

    #[test]
    fn reset_returns_to_placeholder() {
        let mut agg = dual();
        agg.apply_final(SourceKind::Microphone, "something");
        agg.reset();
        assert!(agg.annotated_transcript().contains(EMPTY_PLACEHOLDER));
    }
}
