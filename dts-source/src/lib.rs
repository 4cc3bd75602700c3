//! Config-tree provider: parses device-tree-shaped source text into the
//! [`ConfigTree`](dt_schema::ConfigTree) validated by `dt-schema`.

pub mod ast;
pub mod build;
pub mod parser;

pub use build::BuildError;
pub use parser::ParseError;

use dt_schema::ConfigTree;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Parse source text and lower it into a config tree.
pub fn from_str(s: &str) -> Result<ConfigTree, SourceError> {
    let source = parser::from_str(s)?;
    Ok(build::build(&source)?)
}
