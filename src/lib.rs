//! Resolver core - intent resolution with score fusion and online learning
//!
//! Routes a free-text utterance to the best-matching intent in a corpus:
//! synonym-aware keyword, pattern and TF-IDF scoring, fusion with mood, entity
//! and history signals, a threshold/ambiguity decision, and a feedback loop
//! that tunes per-intent thresholds and weights from observed successes.

pub mod config;
pub mod decision;
pub mod error;
pub mod fusion;
pub mod index;
pub mod learning;
pub mod lexicon;
pub mod persistence;
pub mod relations;
pub mod router;
pub mod scorer;
pub mod signals;
pub mod similarity;
pub mod text;
pub mod types;

pub use config::ResolverConfig;
pub use decision::{
    resolve_clarification, ClarifyOption, Decision, NearMiss, PendingClarification, ReviewItem, ReviewQueue,
    SecondarySuggestion,
};
pub use error::{ResolverError, ResolverResult};
pub use index::{load_corpus_dir, IntentIndex, IntentRecord};
pub use learning::{AdaptiveSnapshot, AdaptiveStore, InMemoryAdaptiveStore, MetaLearner};
pub use lexicon::Lexicon;
pub use persistence::{JsonFilePersistence, MemoryPersistence, Persistence, PersistenceWriter};
pub use router::{IntentRouter, Routed, TurnOutcome};
pub use scorer::{Query, Scorer};
pub use signals::{NoSignals, SignalExtractor};
pub use types::*;

// Python bindings
#[cfg(feature = "python")]
pub mod py;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn resolver_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<py::PyIntentRouter>()?;
    Ok(())
}
