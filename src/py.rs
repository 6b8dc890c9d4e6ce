//! Python bindings for the resolver using PyO3

use chrono::Utc;
use parking_lot::Mutex;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ResolverConfig;
use crate::decision::Decision;
use crate::persistence::JsonFilePersistence;
use crate::router::IntentRouter;
use crate::types::{ConversationContext, RecentTurn, Signals, UserAffinityState};

fn value_error(e: impl std::fmt::Display) -> PyErr {
    PyErr::new::<PyValueError, _>(e.to_string())
}

fn context_from(history: Vec<(String, u32)>) -> ConversationContext {
    ConversationContext::new(history.into_iter().map(|(tag, age)| RecentTurn::new(tag, age)).collect())
}

/// Python wrapper for the intent router
///
/// Keeps one affinity profile per user id in memory.
#[pyclass]
pub struct PyIntentRouter {
    router: IntentRouter,
    profiles: Mutex<HashMap<String, UserAffinityState>>,
}

#[pymethods]
impl PyIntentRouter {
    /// Load the corpus directory, optional synonym file, TOML config and
    /// state directory for adaptive thresholds.
    #[new]
    #[pyo3(signature = (corpus_dir, synonyms=None, config=None, state_dir=None))]
    fn new(
        corpus_dir: PathBuf,
        synonyms: Option<PathBuf>,
        config: Option<PathBuf>,
        state_dir: Option<PathBuf>,
    ) -> PyResult<Self> {
        let config = match config {
            Some(path) => ResolverConfig::load(path).map_err(value_error)?,
            None => ResolverConfig::default(),
        };
        let mut router =
            IntentRouter::from_corpus_dir(corpus_dir, synonyms.as_deref(), config).map_err(value_error)?;
        if let Some(dir) = state_dir {
            router = router
                .with_persistence(Arc::new(JsonFilePersistence::new(dir)))
                .map_err(value_error)?;
        }
        Ok(Self {
            router,
            profiles: Mutex::new(HashMap::new()),
        })
    }

    /// Ranked candidates as a list of dicts
    #[pyo3(signature = (text, user_id="", history=Vec::new(), top_n=3, min_score=0.08))]
    fn resolve<'py>(
        &self,
        py: Python<'py>,
        text: &str,
        user_id: &str,
        history: Vec<(String, u32)>,
        top_n: usize,
        min_score: f64,
    ) -> PyResult<Vec<Bound<'py, PyDict>>> {
        let profile = self.profiles.lock().get(user_id).cloned().unwrap_or_default();
        let ranked = self
            .router
            .resolve(text, &context_from(history), &profile, top_n, min_score);

        ranked
            .iter()
            .map(|c| -> PyResult<Bound<'py, PyDict>> {
                let dict = PyDict::new_bound(py);
                dict.set_item("tag", &c.tag)?;
                dict.set_item("score", c.score)?;
                dict.set_item("matched_terms", &c.matched_terms)?;
                let breakdown = serde_json::to_string(&c.score_breakdown).map_err(value_error)?;
                dict.set_item("score_breakdown", breakdown)?;
                Ok(dict)
            })
            .collect()
    }

    /// Decide one turn; returns a dict with an `outcome` key
    #[pyo3(signature = (text, user_id="", mood=None, entities=Vec::new(), history=Vec::new()))]
    fn route<'py>(
        &self,
        py: Python<'py>,
        text: &str,
        user_id: &str,
        mood: Option<String>,
        entities: Vec<String>,
        history: Vec<(String, u32)>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let signals = Signals::new(mood, entities);
        let mut profiles = self.profiles.lock();
        let profile = profiles.entry(user_id.to_string()).or_default();
        let routed = self
            .router
            .route(text, &signals, &context_from(history), profile, Utc::now());

        let dict = PyDict::new_bound(py);
        dict.set_item("outcome", routed.decision.label())?;
        dict.set_item("effective_threshold", routed.effective_threshold)?;
        match &routed.decision {
            Decision::Accepted { tag, fused_score, secondary } => {
                dict.set_item("tag", tag)?;
                dict.set_item("fused_score", fused_score)?;
                dict.set_item("secondary", secondary.as_ref().map(|s| s.tag.clone()))?;
                if let Some(payload) = &routed.payload {
                    dict.set_item("payload", payload.to_string())?;
                }
            }
            Decision::Clarifying { options, .. } => {
                let options: Vec<(String, String)> = options
                    .iter()
                    .map(|o| (o.tag.clone(), o.prompt_text.clone()))
                    .collect();
                dict.set_item("options", options)?;
            }
            Decision::Fallback { near_misses } => {
                let near: Vec<(String, f64)> = near_misses
                    .iter()
                    .map(|n| (n.tag.clone(), n.fused_score))
                    .collect();
                dict.set_item("near_misses", near)?;
            }
        }
        Ok(dict)
    }

    /// Explicit success feedback for a tag; false when the tag is unknown
    #[pyo3(signature = (tag, user_id=""))]
    fn confirm_success(&self, tag: &str, user_id: &str) -> bool {
        let mut profiles = self.profiles.lock();
        let profile = profiles.entry(user_id.to_string()).or_default();
        self.router.confirm_success(tag, profile, Utc::now()).is_some()
    }

    /// Block until adaptive state is written
    fn flush(&self) {
        self.router.flush();
    }

    /// Number of indexed intents
    fn len(&self) -> usize {
        self.router.index().len()
    }
}
