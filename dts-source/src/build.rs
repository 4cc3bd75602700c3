//! Lowering from the syntax tree to a [`ConfigTree`].
//!
//! Root blocks are merged in document order: a node that already exists is
//! extended, and a property that already exists is replaced. Label
//! references are then resolved by assigning each referenced label a
//! phandle, attaching a `phandle` property to its target and registering
//! the mapping with the tree.

use std::collections::HashMap;

use dt_schema::{ConfigTree, NodeId, PropValue};

use crate::ast::{Cell, Node, Property, Source, Value};

#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    #[error("reference to unknown label '&{0}'")]
    UnknownLabel(String),
    #[error("property '{0}' mixes value types")]
    MixedValues(String),
}

/// Build a config tree from a parsed source file.
pub fn build(source: &Source) -> Result<ConfigTree, BuildError> {
    let mut builder = Builder::default();
    for root in &source.roots {
        builder.merge_node(root, None)?;
    }
    builder.resolve_phandles()?;
    for (node, prop) in std::mem::take(&mut builder.pending) {
        let value = builder.decode(&prop)?;
        builder.tree.add_prop(node, prop.name, value);
    }
    Ok(builder.tree)
}

#[derive(Default)]
struct Builder<'s> {
    tree: ConfigTree,
    labels: HashMap<&'s str, NodeId>,
    /// Properties deferred until phandles are assigned.
    pending: Vec<(NodeId, Property<'s>)>,
    phandles: HashMap<&'s str, u32>,
}

impl<'s> Builder<'s> {
    /// Merge one syntax node into the tree, reusing an existing node of the
    /// same full name.
    fn merge_node(&mut self, node: &Node<'s>, parent: Option<NodeId>) -> Result<(), BuildError> {
        let id = match parent {
            None => self.tree.root(),
            Some(parent) => {
                let full = node.full_name();
                match self.tree.child_by_name(parent, &full) {
                    Some(existing) => existing,
                    None => self.tree.add_node(parent, &full),
                }
            }
        };
        for &label in &node.labels {
            self.labels.insert(label, id);
        }
        for prop in &node.props {
            self.pending.push((id, prop.clone()));
        }
        for child in &node.children {
            self.merge_node(child, Some(id))?;
        }
        Ok(())
    }

    /// Assign phandles to labels referenced from cell arrays, in
    /// first-reference order. Bare reference values resolve to a path and
    /// need no phandle.
    fn resolve_phandles(&mut self) -> Result<(), BuildError> {
        let mut referenced = Vec::new();
        for (_, prop) in &self.pending {
            for value in &prop.values {
                if let Value::Cells(cells) = value {
                    for cell in cells {
                        if let Cell::Ref(label) = *cell {
                            referenced.push(label);
                        }
                    }
                }
            }
        }
        for label in referenced {
            if self.phandles.contains_key(label) {
                continue;
            }
            let Some(&target) = self.labels.get(label) else {
                return Err(BuildError::UnknownLabel(label.to_owned()));
            };
            let phandle = self.phandles.len() as u32 + 1;
            self.phandles.insert(label, phandle);
            self.tree
                .add_prop(target, "phandle", PropValue::Int(phandle as i64));
            self.tree.register_phandle(phandle, target);
        }
        Ok(())
    }

    /// Decode a property's values into a single [`PropValue`].
    ///
    /// No values is a presence-only boolean. A lone single-cell array is an
    /// integer; any other cell content is an integer list with references
    /// replaced by their assigned phandle. Multiple cell arrays in one
    /// property concatenate.
    fn decode(&self, prop: &Property<'s>) -> Result<PropValue, BuildError> {
        if prop.values.is_empty() {
            return Ok(PropValue::Bool);
        }
        if prop.values.iter().all(|v| matches!(v, Value::Str(_))) {
            let mut strings: Vec<String> = Vec::new();
            for value in &prop.values {
                if let Value::Str(s) = value {
                    strings.push(unescape(s));
                }
            }
            return Ok(match strings.len() {
                1 => PropValue::String(strings.remove(0)),
                _ => PropValue::StringList(strings),
            });
        }
        if prop.values.iter().all(|v| matches!(v, Value::Cells(_))) {
            let mut ints = Vec::new();
            for value in &prop.values {
                let Value::Cells(cells) = value else {
                    unreachable!()
                };
                for cell in cells {
                    ints.push(match cell {
                        Cell::Num(n) => *n as i64,
                        // Resolved earlier; missing labels were an error.
                        Cell::Ref(label) => self.phandles[label] as i64,
                    });
                }
            }
            return Ok(match (ints.len(), &prop.values[..]) {
                (1, [Value::Cells(cells)]) if matches!(cells[..], [Cell::Num(_)]) => {
                    PropValue::Int(ints[0])
                }
                _ => PropValue::IntList(ints),
            });
        }
        match &prop.values[..] {
            [Value::Bytes(bytes)] => Ok(PropValue::Bytes(bytes.clone())),
            [Value::Ref(label)] => {
                let Some(&target) = self.labels.get(label) else {
                    return Err(BuildError::UnknownLabel((*label).to_owned()));
                };
                Ok(PropValue::String(self.tree.node(target).path.clone()))
            }
            _ => Err(BuildError::MixedValues(prop.name.to_owned())),
        }
    }
}

/// Resolve backslash escapes inside a string literal.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}
