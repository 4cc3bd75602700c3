//! Schema validation for device-tree-shaped configuration documents.
//!
//! A config tree (named nodes holding named properties and ordered child
//! nodes) is validated against a composable schema whose structure mirrors
//! the tree. Schemas arrive as fragments, possibly out of dependency
//! order, and are merged into a [`Registry`] by a bounded fixed-point
//! loader; the [`Validator`] then walks the tree, matching each node to a
//! schema via compatible strings, structural paths or its parent schema.
//!
//! Schema elements can be optional or required, and their presence for a
//! given node instance can be controlled by conditional rules over global
//! settings or sibling/ancestor field values. Phandle properties are
//! validated by the target they point at.
//!
//! Building the tree from source text is the `dts-source` crate's job;
//! this crate never performs I/O.

pub mod cond;
pub mod error;
pub mod phandle;
pub mod registry;
pub mod schema;
pub mod tree;
pub mod validator;

pub use error::{LoadError, ValidationError};
pub use registry::{DescKind, ElementDesc, FragmentDescriptor, PropDesc, Registry};
pub use schema::{ElementId, ElementKind, ElementName, PropValidator, SchemaSet};
pub use tree::{ConfigNode, ConfigProperty, ConfigTree, NodeId, PropValue};
pub use validator::{validate_tree, Failure, ValidationContext, Validator};
