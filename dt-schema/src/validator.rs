//! The recursive tree validator.
//!
//! Walks a concrete config tree from its root against a frozen
//! [`Registry`], selecting a schema for each node (compatible-string
//! lookup, path lookup, or parent-schema child lookup), validating
//! properties and required children, and recursing. Failures accumulate in
//! the [`ValidationContext`]; in raise mode the first failure aborts the
//! whole run by propagating a [`ValidationError`].

use std::collections::HashMap;
use std::fmt;

use crate::{
    cond::element_present,
    error::ValidationError,
    registry::Registry,
    schema::{ElementId, ElementKind, ElementName, SchemaSet},
    tree::{base_path, parent_path, ConfigTree, NodeId},
};

/// Property maintained by tree compilers as an alias of `phandle`;
/// ignored during property matching.
const PHANDLE_ALIAS: &str = "linux,phandle";

/// A single validation failure, attributed to a node path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub location: String,
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Per-run validation state, passed explicitly through every check.
#[derive(Debug, Default, Clone)]
pub struct ValidationContext {
    /// Global settings consulted by conditional-presence rules
    /// (e.g. `#arch` -> `armv8`).
    pub settings: HashMap<String, String>,
    /// Abort on the first failure instead of accumulating.
    pub raise_on_error: bool,
    failures: Vec<Failure>,
    notes: Vec<String>,
}

impl ValidationContext {
    pub fn new(settings: HashMap<String, String>, raise_on_error: bool) -> Self {
        Self {
            settings,
            raise_on_error,
            ..Self::default()
        }
    }

    /// Record a validation failure.
    ///
    /// In raise mode the failure is also returned as an error, aborting
    /// the run through the caller's `?` chain.
    pub fn fail(
        &mut self,
        location: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), ValidationError> {
        let failure = Failure {
            location: location.into(),
            message: message.into(),
        };
        self.failures.push(failure.clone());
        if self.raise_on_error {
            return Err(ValidationError(failure));
        }
        Ok(())
    }

    /// Record an informational note; never counted as a failure.
    pub fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.notes.push(message);
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn into_failures(self) -> Vec<Failure> {
        self.failures
    }
}

/// What kind of element a schema lookup expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    Node,
    Prop,
}

/// Validator for one (registry, tree) pair.
pub struct Validator<'a> {
    registry: &'a Registry,
    tree: &'a ConfigTree,
}

impl<'a> Validator<'a> {
    pub fn new(registry: &'a Registry, tree: &'a ConfigTree) -> Self {
        Self { registry, tree }
    }

    /// Validate the whole tree, accumulating failures into the context.
    pub fn run(&self, ctx: &mut ValidationContext) -> Result<(), ValidationError> {
        self.validate_subtree(ctx, self.tree.root(), None)
    }

    fn set(&self) -> &SchemaSet {
        self.registry.set()
    }

    /// Find a child element of `schema` matching `name`.
    ///
    /// Scans children in order, skipping elements whose presence rules are
    /// not satisfied for `node`; an exact (unit-address-stripped) name
    /// match wins, with wildcard elements of the expected kind as
    /// fallback. The second result is false when the name is internal to
    /// the tree format and needs no schema.
    fn get_element(
        &self,
        ctx: &mut ValidationContext,
        schema: ElementId,
        name: &str,
        node: Option<NodeId>,
        expected: Option<Expected>,
    ) -> Result<(Option<ElementId>, bool), ValidationError> {
        if let ElementKind::Node(node_schema) = &self.set().element(schema).kind {
            for &child in &node_schema.children {
                if !element_present(ctx, self.set(), self.tree, child, node)? {
                    continue;
                }
                let elem = self.set().element(child);
                if elem.name.matches(name) {
                    return Ok((Some(child), true));
                }
                let wildcard_ok = match (&elem.name, &elem.kind) {
                    (ElementName::Any, ElementKind::Node(_)) => expected != Some(Expected::Prop),
                    (ElementName::Any, ElementKind::Prop(_)) => expected != Some(Expected::Node),
                    _ => false,
                };
                if wildcard_ok {
                    return Ok((Some(child), true));
                }
            }
        }
        if expected == Some(Expected::Prop) && name == PHANDLE_ALIAS {
            return Ok((None, false));
        }
        Ok((None, true))
    }

    /// Names of property elements currently present on this schema, for
    /// "valid list" messages.
    fn legal_prop_names(
        &self,
        ctx: &mut ValidationContext,
        schema: ElementId,
        node: NodeId,
    ) -> Result<Vec<String>, ValidationError> {
        self.legal_names(ctx, schema, node, Expected::Prop)
    }

    fn legal_names(
        &self,
        ctx: &mut ValidationContext,
        schema: ElementId,
        node: NodeId,
        expected: Expected,
    ) -> Result<Vec<String>, ValidationError> {
        let ElementKind::Node(node_schema) = &self.set().element(schema).kind else {
            return Ok(Vec::new());
        };
        let mut names = Vec::new();
        for &child in &node_schema.children {
            let elem = self.set().element(child);
            let wanted = match expected {
                Expected::Prop => elem.is_prop(),
                Expected::Node => elem.is_node(),
            };
            if wanted && element_present(ctx, self.set(), self.tree, child, Some(node))? {
                names.push(elem.name.as_str().to_owned());
            }
        }
        Ok(names)
    }

    /// Validate a node against its selected schema: the schema's own
    /// checks, each present property, then required properties and
    /// subnodes.
    fn validate_node(
        &self,
        ctx: &mut ValidationContext,
        node: NodeId,
        schema: ElementId,
    ) -> Result<(), ValidationError> {
        self.set().validate_node(schema, ctx, self.tree, node)?;
        let n = self.tree.node(node);

        // Validate each property and report the ones the schema does not
        // mention.
        for (prop_name, prop) in &n.props {
            if prop_name == PHANDLE_ALIAS {
                continue;
            }
            let (element, _) =
                self.get_element(ctx, schema, prop_name, Some(node), Some(Expected::Prop))?;
            match element.filter(|e| self.set().element(*e).is_prop()) {
                Some(element) => {
                    self.set().validate_prop(element, ctx, self.tree, node, prop)?;
                }
                None if prop_name == "phandle" => {
                    ctx.fail(&n.path, "phandle target not valid for this node")?;
                }
                None => {
                    let legal = self.legal_prop_names(ctx, schema, node)?;
                    ctx.fail(
                        &n.path,
                        format!(
                            "Unexpected property '{}', valid list is ({})",
                            prop_name,
                            legal.join(", ")
                        ),
                    )?;
                }
            }
        }

        // Required properties, subject to their own presence rules.
        let ElementKind::Node(node_schema) = &self.set().element(schema).kind else {
            return Ok(());
        };
        for &child in &node_schema.children {
            let elem = self.set().element(child);
            if !elem.is_prop() || !elem.required {
                continue;
            }
            if !element_present(ctx, self.set(), self.tree, child, Some(node))? {
                continue;
            }
            if !n.props.contains_key(elem.name.as_str()) {
                ctx.fail(
                    &n.path,
                    format!("Required property '{}' missing", elem.name.as_str()),
                )?;
            }
        }

        // Required subnodes.
        let subnode_names: Vec<&str> = n
            .children()
            .iter()
            .map(|c| self.tree.node(*c).name.as_str())
            .collect();
        for &child in &node_schema.children {
            let elem = self.set().element(child);
            if !elem.is_node() || !elem.required {
                continue;
            }
            if !element_present(ctx, self.set(), self.tree, child, Some(node))? {
                continue;
            }
            let found = subnode_names
                .iter()
                .any(|name| elem.name.matches(name));
            if !found {
                let mut msg = format!("Missing subnode '{}'", elem.name.as_str());
                if !subnode_names.is_empty() {
                    msg.push_str(&format!(" in {}", subnode_names.join(", ")));
                }
                ctx.fail(&n.path, msg)?;
            }
        }
        Ok(())
    }

    /// Look for this node's schema among the parent schema's children.
    ///
    /// An unmatched node under a matched parent is an "unexpected subnode"
    /// failure, reported at the parent's path.
    fn subnode_schema(
        &self,
        ctx: &mut ValidationContext,
        node: NodeId,
        parent_schema: ElementId,
    ) -> Result<Option<ElementId>, ValidationError> {
        let n = self.tree.node(node);
        let (schema, needed) =
            self.get_element(ctx, parent_schema, &n.name, n.parent(), Some(Expected::Node))?;
        let schema = schema.filter(|s| self.set().element(*s).is_node());
        if schema.is_none() && needed {
            let legal = match n.parent() {
                Some(parent) => self.legal_names(ctx, parent_schema, parent, Expected::Node)?,
                None => Vec::new(),
            };
            ctx.fail(
                parent_path(&n.path),
                format!(
                    "Unexpected subnode '{}', valid list is ({})",
                    n.name,
                    legal.join(", ")
                ),
            )?;
        }
        Ok(schema)
    }

    /// Validate a node and all of its subnodes recursively.
    ///
    /// Schema selection order: compatible strings (the last string with a
    /// registered schema wins), then the path index, then the parent
    /// schema's children. A node whose compatible strings are all
    /// unregistered gets an informational note, not a failure.
    fn validate_subtree(
        &self,
        ctx: &mut ValidationContext,
        node: NodeId,
        parent_schema: Option<ElementId>,
    ) -> Result<(), ValidationError> {
        let n = self.tree.node(node);
        let mut schema = None;

        if n.props.contains_key("compatible") {
            let compats = self.tree.compatible_list(node);
            for compat in &compats {
                if let Some(id) = self.registry.by_compat(compat) {
                    schema = Some(id);
                }
            }
            if schema.is_none() {
                ctx.note(format!("No schema for: {}", compats.join(", ")));
            }
        } else if let Some(id) = self.registry.by_path(base_path(&n.path)) {
            schema = Some(id);
        } else if let Some(parent) = parent_schema {
            schema = self.subnode_schema(ctx, node, parent)?;
        }

        if let Some(schema) = schema {
            self.validate_node(ctx, node, schema)?;
        }
        for &child in self.tree.node(node).children() {
            self.validate_subtree(ctx, child, schema.or(parent_schema))?;
        }
        Ok(())
    }
}

/// Validate a config tree against a registry, accumulating failures into
/// the context. The error case only occurs in raise mode.
pub fn validate_tree(
    registry: &Registry,
    tree: &ConfigTree,
    ctx: &mut ValidationContext,
) -> Result<(), ValidationError> {
    Validator::new(registry, tree).run(ctx)
}
