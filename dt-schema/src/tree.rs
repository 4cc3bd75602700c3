//! The concrete configuration tree being validated.
//!
//! The tree is built once by a provider (e.g. the `dts-source` crate) and is
//! immutable for the duration of a validation run. Nodes live in a single
//! arena owned by [`ConfigTree`]; parent and child links are [`NodeId`]
//! indices into it, never shared ownership.

use std::collections::HashMap;

use indexmap::IndexMap;

/// Index of a node inside a [`ConfigTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Decoded value of a configuration property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    /// Presence-only property: the property carries no payload.
    Bool,
    Int(i64),
    IntList(Vec<i64>),
    String(String),
    StringList(Vec<String>),
    Bytes(Vec<u8>),
}

impl PropValue {
    /// Render the value for failure messages and condition comparisons.
    pub fn render(&self) -> String {
        match self {
            PropValue::Bool => "true".to_owned(),
            PropValue::Int(v) => v.to_string(),
            PropValue::IntList(vs) => {
                let items: Vec<String> = vs.iter().map(|v| v.to_string()).collect();
                items.join(" ")
            }
            PropValue::String(s) => s.clone(),
            PropValue::StringList(ss) => ss.join(", "),
            PropValue::Bytes(bs) => {
                let items: Vec<String> = bs.iter().map(|b| format!("{b:02x}")).collect();
                items.join(" ")
            }
        }
    }

    /// The textual payload, if this is a string-shaped value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A named property attached to a [`ConfigNode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigProperty {
    pub name: String,
    pub value: PropValue,
}

impl ConfigProperty {
    pub fn new(name: impl Into<String>, value: PropValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Decode the value as 32-bit big-endian reference cells.
    ///
    /// Integer values map one cell per entry; raw bytes are split into
    /// 4-byte big-endian groups, ignoring a trailing partial group.
    pub fn cells(&self) -> Vec<u32> {
        match &self.value {
            PropValue::Int(v) => vec![*v as u32],
            PropValue::IntList(vs) => vs.iter().map(|v| *v as u32).collect(),
            PropValue::Bytes(bs) => bs
                .chunks_exact(4)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A node in the configuration tree.
#[derive(Debug, Clone)]
pub struct ConfigNode {
    /// Node name, including any unit address (`serial@1000`).
    pub name: String,
    /// Full path from the root (`/soc/serial@1000`).
    pub path: String,
    /// Ordered mapping of properties.
    pub props: IndexMap<String, ConfigProperty>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

impl ConfigNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Arena holding a whole configuration document.
#[derive(Debug, Clone)]
pub struct ConfigTree {
    nodes: Vec<ConfigNode>,
    phandles: HashMap<u32, NodeId>,
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigTree {
    /// Create a tree containing only the root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![ConfigNode {
                name: String::new(),
                path: "/".to_owned(),
                props: IndexMap::new(),
                children: Vec::new(),
                parent: None,
            }],
            phandles: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &ConfigNode {
        &self.nodes[id.0]
    }

    /// Append a child node under `parent` and return its id.
    pub fn add_node(&mut self, parent: NodeId, name: &str) -> NodeId {
        let path = if self.nodes[parent.0].parent.is_none() {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.nodes[parent.0].path)
        };
        let id = NodeId(self.nodes.len());
        self.nodes.push(ConfigNode {
            name: name.to_owned(),
            path,
            props: IndexMap::new(),
            children: Vec::new(),
            parent: Some(parent),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Attach a property to a node, replacing any previous value.
    pub fn add_prop(&mut self, node: NodeId, name: &str, value: PropValue) {
        self.nodes[node.0]
            .props
            .insert(name.to_owned(), ConfigProperty::new(name, value));
    }

    /// Find a direct child of `parent` by exact name.
    pub fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].name == name)
    }

    /// Record that `node` is the target of the given phandle.
    pub fn register_phandle(&mut self, phandle: u32, node: NodeId) {
        self.phandles.insert(phandle, node);
    }

    /// Resolve a phandle reference cell to its target node.
    pub fn lookup_phandle(&self, phandle: u32) -> Option<NodeId> {
        self.phandles.get(&phandle).copied()
    }

    /// The node's compatible strings, in declaration order.
    ///
    /// A single-string `compatible` property decodes as one entry; a node
    /// without the property yields an empty list.
    pub fn compatible_list(&self, id: NodeId) -> Vec<&str> {
        match self.node(id).props.get("compatible").map(|p| &p.value) {
            Some(PropValue::String(s)) => vec![s.as_str()],
            Some(PropValue::StringList(ss)) => ss.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// Strip a trailing unit address (`@...`) from a node name.
pub fn strip_unit_address(name: &str) -> &str {
    match name.split_once('@') {
        Some((base, _)) => base,
        None => name,
    }
}

/// Strip the unit address from the final component of a node path.
pub fn base_path(path: &str) -> &str {
    match (path.rfind('/'), path.rfind('@')) {
        (Some(slash), Some(at)) if at > slash => &path[..at],
        _ => path,
    }
}

/// The directory part of a node path (`/a/b` yields `/a`).
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_nesting() {
        let mut tree = ConfigTree::new();
        let soc = tree.add_node(tree.root(), "soc");
        let serial = tree.add_node(soc, "serial@1000");

        assert_eq!(tree.node(tree.root()).path, "/");
        assert_eq!(tree.node(soc).path, "/soc");
        assert_eq!(tree.node(serial).path, "/soc/serial@1000");
        assert_eq!(tree.node(serial).parent(), Some(soc));
        assert_eq!(tree.node(soc).children(), &[serial]);
    }

    #[test]
    fn cells_from_ints_and_bytes() {
        let prop = ConfigProperty::new("x", PropValue::IntList(vec![5, 0x10]));
        assert_eq!(prop.cells(), vec![5, 0x10]);

        let prop = ConfigProperty::new("x", PropValue::Bytes(vec![0, 0, 0, 5, 0, 0, 1, 0]));
        assert_eq!(prop.cells(), vec![5, 0x100]);

        let prop = ConfigProperty::new("x", PropValue::String("no cells".into()));
        assert!(prop.cells().is_empty());
    }

    #[test]
    fn compatible_list_shapes() {
        let mut tree = ConfigTree::new();
        let a = tree.add_node(tree.root(), "a");
        let b = tree.add_node(tree.root(), "b");
        tree.add_prop(a, "compatible", PropValue::String("vendor,widget".into()));
        tree.add_prop(
            b,
            "compatible",
            PropValue::StringList(vec!["a".into(), "b".into()]),
        );

        assert_eq!(tree.compatible_list(a), vec!["vendor,widget"]);
        assert_eq!(tree.compatible_list(b), vec!["a", "b"]);
        assert!(tree.compatible_list(tree.root()).is_empty());
    }

    #[test]
    fn name_and_path_stripping() {
        assert_eq!(strip_unit_address("widget@2"), "widget");
        assert_eq!(strip_unit_address("widget"), "widget");
        assert_eq!(base_path("/soc/serial@1000"), "/soc/serial");
        assert_eq!(base_path("/soc@0/serial"), "/soc@0/serial");
        assert_eq!(parent_path("/soc/serial"), "/soc");
        assert_eq!(parent_path("/soc"), "/");
    }
}
