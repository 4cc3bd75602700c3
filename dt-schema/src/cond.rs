//! Conditional presence rules.
//!
//! A schema element may carry rules deciding whether it applies to a given
//! node instance. This lets one schema describe mutually exclusive node
//! shapes selected by a global build setting or by which sibling field is
//! actually populated.
//!
//! Rule keys starting with [`SETTING_SIGIL`] are looked up in the context's
//! global settings. Any other key is a structural reference: each leading
//! `../` segment walks one level up both the schema-parent chain and the
//! concrete-node-parent chain in lock-step, then the named sibling
//! property's value is compared at that level. A property that is absent
//! satisfies the rule; a present property satisfies it iff its rendered
//! value matches. Prefixing the expected value with [`NEGATION`] inverts
//! the comparison.

use crate::{
    error::ValidationError,
    schema::{ElementId, SchemaSet},
    tree::{ConfigTree, NodeId},
    validator::ValidationContext,
};

/// Prefix marking a rule key as a global-settings lookup.
pub const SETTING_SIGIL: char = '#';

/// Prefix on an expected value inverting the comparison.
pub const NEGATION: char = '!';

/// One "go up one level" segment in a structural rule key.
const UP: &str = "../";

/// A single conditional-presence rule: (key, expected value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub key: String,
    pub value: String,
}

impl Condition {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Decide whether a schema element applies to this node instance.
///
/// An element with no rules is always present. All rules must be satisfied;
/// any unsatisfied rule makes the element absent for this instance.
pub fn element_present(
    ctx: &mut ValidationContext,
    set: &SchemaSet,
    tree: &ConfigTree,
    element: ElementId,
    parent_node: Option<NodeId>,
) -> Result<bool, ValidationError> {
    let elem = set.element(element);
    if elem.conditions.is_empty() {
        return Ok(true);
    }
    let Some(node) = parent_node else {
        return Ok(true);
    };
    for cond in &elem.conditions {
        if !check_condition(ctx, set, tree, cond, node, elem.parent)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Check a single rule against a node and its schema position.
///
/// An undeclared setting records a failure and leaves the rule unsatisfied.
fn check_condition(
    ctx: &mut ValidationContext,
    set: &SchemaSet,
    tree: &ConfigTree,
    cond: &Condition,
    node: NodeId,
    schema: Option<ElementId>,
) -> Result<bool, ValidationError> {
    if cond.key.starts_with(SETTING_SIGIL) {
        let Some(actual) = ctx.settings.get(&cond.key).cloned() else {
            ctx.fail(
                &tree.node(node).path,
                format!("Setting '{}' does not exist", cond.key),
            )?;
            return Ok(false);
        };
        return Ok(expected_matches(&cond.value, &actual));
    }

    let mut key = cond.key.as_str();
    let mut node = Some(node);
    let mut schema = schema;
    while let Some(rest) = key.strip_prefix(UP) {
        key = rest;
        node = node.and_then(|n| tree.node(n).parent());
        schema = schema.and_then(|s| set.element(s).parent);
    }
    // Walking above the root leaves the rule unsatisfied.
    let Some(node) = node else {
        return Ok(false);
    };
    match tree.node(node).props.get(key) {
        Some(prop) => Ok(expected_matches(&cond.value, &prop.value.render())),
        None => Ok(true),
    }
}

fn expected_matches(expected: &str, actual: &str) -> bool {
    match expected.strip_prefix(NEGATION) {
        Some(want) => want != actual,
        None => expected == actual,
    }
}
