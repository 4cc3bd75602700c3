//! Error types for schema loading and validation.

use thiserror::Error;

use crate::validator::Failure;

/// Fatal error while building the schema registry.
///
/// Load errors abort the run before any tree walk, unlike validation
/// failures which are accumulated.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A schema element declared a pattern that does not compile.
    #[error("invalid pattern '{pattern}' in schema element '{element}': {source}")]
    BadPattern {
        element: String,
        pattern: String,
        source: regex::Error,
    },

    /// A fragment declared a top-level element that is not a node.
    #[error("fragment '{fragment}': top-level element '{element}' must be a node")]
    NotANode { fragment: String, element: String },

    /// Additive fragments that never found a base element within the
    /// pass budget.
    #[error("cannot locate schema base for fragments: {0}")]
    UnresolvedFragments(String),

    /// Two file properties with the same name declared different
    /// target directories.
    #[error("target directory '{target_dir}' for element '{element}' is inconsistent with previous '{previous}'")]
    InconsistentTargetDir {
        element: String,
        target_dir: String,
        previous: String,
    },
}

/// Error aborting a run in raise-on-first-failure mode.
///
/// Carries the failure that triggered the abort; the same failure is also
/// the last entry in the context's accumulated list.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ValidationError(pub Failure);
