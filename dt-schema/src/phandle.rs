//! Phandle resolution and target-shape checks.
//!
//! Phandle properties carry one or more 32-bit big-endian reference cells
//! pointing at other nodes in the same tree. A reference is valid when the
//! target node's compatible list satisfies the schema's expected pattern.

use std::collections::HashSet;

use crate::{
    error::ValidationError,
    tree::{ConfigProperty, ConfigTree, NodeId},
    validator::ValidationContext,
};

/// Largest plain SKU identifier allowed in a SKU map.
pub const MAX_SKU_ID: u32 = 0xffff;

/// Wildcard SKU identifier matching any SKU.
pub const SKU_ANY: u32 = 0xffff_ffff;

/// Compatible patterns a SKU-map phandle may target.
const SKU_MAP_TARGETS: &[&str] = &["model", "model/submodel"];

/// Check that a phandle target's compatible list satisfies a pattern.
///
/// A compatible string matches when it equals the pattern, or when the
/// pattern is a hierarchical prefix of it (`model` accepts `model/xyz`).
pub fn check_phandle_target(tree: &ConfigTree, target: NodeId, target_compat: &str) -> bool {
    tree.compatible_list(target)
        .iter()
        .any(|c| *c == target_compat || c.strip_prefix(target_compat).is_some_and(|r| r.starts_with('/')))
}

/// Validate every reference cell of a phandle property.
pub(crate) fn validate_phandle(
    ctx: &mut ValidationContext,
    tree: &ConfigTree,
    node: NodeId,
    prop: &ConfigProperty,
    target_compat: &str,
) -> Result<(), ValidationError> {
    let path = tree.node(node).path.clone();
    for cell in prop.cells() {
        let Some(target) = tree.lookup_phandle(cell) else {
            ctx.fail(
                &path,
                format!("Phandle '{}' references unknown node", prop.name),
            )?;
            continue;
        };
        if !check_phandle_target(tree, target, target_compat) {
            ctx.fail(
                &path,
                format!(
                    "Phandle '{}' targets node '{}' which does not have compatible string '{}'",
                    prop.name,
                    tree.node(target).path,
                    target_compat
                ),
            )?;
        }
    }
    Ok(())
}

/// Custom validator for SKU-map properties.
///
/// The value interleaves a plain SKU identifier with a following reference
/// cell. Identifiers must be unique within the property and within bounds
/// ([`SKU_ANY`] is a legal wildcard); each reference must target a model or
/// submodel node.
pub fn validate_sku_map(
    ctx: &mut ValidationContext,
    tree: &ConfigTree,
    node: NodeId,
    prop: &ConfigProperty,
) -> Result<(), ValidationError> {
    let path = tree.node(node).path.clone();
    let mut seen = HashSet::new();
    for pair in prop.cells().chunks_exact(2) {
        let (sku_id, phandle) = (pair[0], pair[1]);
        if sku_id > MAX_SKU_ID && sku_id != SKU_ANY {
            ctx.fail(&path, format!("sku_id {sku_id} out of range"))?;
        }
        if !seen.insert(sku_id) {
            ctx.fail(&path, format!("Duplicate sku_id {sku_id}"))?;
        }
        let valid = tree.lookup_phandle(phandle).is_some_and(|target| {
            SKU_MAP_TARGETS
                .iter()
                .any(|compat| check_phandle_target(tree, target, compat))
        });
        if !valid {
            ctx.fail(
                &path,
                format!(
                    "Phandle '{}' sku_id {} must target a model or submodel",
                    prop.name, sku_id
                ),
            )?;
        }
    }
    Ok(())
}
