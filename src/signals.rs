//! Boundary to the text-signal extractor
//!
//! Mood, entity and safety detection happen outside this crate. The router
//! only needs this trait; `NoSignals` is the do-nothing extractor.

use crate::types::Signals;

pub trait SignalExtractor: Send + Sync {
    fn detect_mood(&self, text: &str) -> Option<String>;

    fn extract_entities(&self, text: &str) -> Vec<String>;

    /// True when the turn must bypass intent resolution entirely.
    fn detect_critical(&self, text: &str) -> bool;

    fn signals(&self, text: &str) -> Signals {
        Signals::new(self.detect_mood(text), self.extract_entities(text))
    }
}

/// Extractor that never reports anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSignals;

impl SignalExtractor for NoSignals {
    fn detect_mood(&self, _text: &str) -> Option<String> {
        None
    }

    fn extract_entities(&self, _text: &str) -> Vec<String> {
        Vec::new()
    }

    fn detect_critical(&self, _text: &str) -> bool {
        false
    }
}
