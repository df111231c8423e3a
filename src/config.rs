//! Evaluator configuration.

use std::env;
use std::path::PathBuf;

use serde::Deserialize;

/// Directory the diagnostic export writes into.
pub const DEBUG_DIR_ENV: &str = "OPGRAPH_DEBUG_DIR";
/// Value templates see as `.Tag`.
pub const GLOBAL_TAG_ENV: &str = "OPGRAPH_GLOBAL_TAG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// When set, [`crate::Evaluator::evaluate`] writes DOT diagrams here.
    pub debug_dir: Option<PathBuf>,
    pub global_tag: String,
}

impl EvalConfig {
    /// Read the configuration from the process environment. Unset or empty
    /// variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());
        Self {
            debug_dir: non_empty(DEBUG_DIR_ENV).map(PathBuf::from),
            global_tag: non_empty(GLOBAL_TAG_ENV).unwrap_or_default(),
        }
    }

    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    pub fn with_global_tag(mut self, tag: impl Into<String>) -> Self {
        self.global_tag = tag.into();
        self
    }
}
