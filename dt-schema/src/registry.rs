//! Schema registry construction.
//!
//! The registry is built once per run from externally supplied fragment
//! descriptors, then frozen. Fragments are plain data: the core never
//! inspects a filesystem, so discovery and decoding stay with the caller.
//!
//! Fragments arrive in any order and may depend on each other: an
//! *additive* fragment (no compatible string, no path) extends a
//! previously registered element instead of registering its own. The
//! loader resolves such forward dependencies with a bounded fixed-point:
//! increasing priority passes, deferring additive fragments whose base has
//! not appeared yet, until a pass budget is exhausted.

use indexmap::{IndexMap, IndexSet};

use crate::{
    cond::Condition,
    error::LoadError,
    schema::{
        ElementId, ElementKind, ElementName, NodeSchema, Pattern, PropSchema, PropValidator,
        SchemaElement, SchemaSet,
    },
};

/// Pass budget for the fixed-point merge.
pub const MAX_PASSES: usize = 10;

/// Plain-data description of a schema element, before interning.
#[derive(Debug, Clone)]
pub struct ElementDesc {
    pub name: ElementName,
    pub required: bool,
    pub conditions: Vec<Condition>,
    pub kind: DescKind,
}

#[derive(Debug, Clone)]
pub enum DescKind {
    Node {
        compatible: Vec<String>,
        path: Option<String>,
        name_pattern: Option<String>,
        children: Vec<ElementDesc>,
    },
    Prop(PropDesc),
}

/// Property descriptions, mirroring [`PropSchema`] with uncompiled patterns.
#[derive(Debug, Clone)]
pub enum PropDesc {
    Bool,
    Int { range: Option<(i64, i64)> },
    IntList { range: Option<(i64, i64)> },
    Float { range: Option<(f64, f64)> },
    String { pattern: Option<String> },
    StringList { pattern: Option<String> },
    File { pattern: Option<String>, target_dir: Option<String> },
    Phandle { target_compat: String },
    PhandleTarget,
    Custom { validator: PropValidator },
    Any { validator: Option<PropValidator> },
}

impl ElementDesc {
    /// A node schema identified by its compatible strings (possibly none).
    pub fn node(
        name: impl Into<String>,
        compatible: impl IntoIterator<Item = impl Into<String>>,
        children: Vec<ElementDesc>,
    ) -> Self {
        Self {
            name: ElementName::Name(name.into()),
            required: false,
            conditions: Vec::new(),
            kind: DescKind::Node {
                compatible: compatible.into_iter().map(Into::into).collect(),
                path: None,
                name_pattern: None,
                children,
            },
        }
    }

    /// A node schema identified by structural path instead of identity.
    pub fn node_by_path(path: impl Into<String>, children: Vec<ElementDesc>) -> Self {
        let path = path.into();
        Self {
            name: ElementName::Name(
                path.rsplit('/').next().unwrap_or(path.as_str()).to_owned(),
            ),
            required: false,
            conditions: Vec::new(),
            kind: DescKind::Node {
                compatible: Vec::new(),
                path: Some(path),
                name_pattern: None,
                children,
            },
        }
    }

    /// A wildcard node schema matching any child name against a pattern.
    pub fn any_node(name_pattern: impl Into<String>, children: Vec<ElementDesc>) -> Self {
        Self {
            name: ElementName::Any,
            required: false,
            conditions: Vec::new(),
            kind: DescKind::Node {
                compatible: Vec::new(),
                path: None,
                name_pattern: Some(name_pattern.into()),
                children,
            },
        }
    }

    /// A property schema element.
    pub fn prop(name: impl Into<String>, kind: PropDesc) -> Self {
        Self {
            name: ElementName::Name(name.into()),
            required: false,
            conditions: Vec::new(),
            kind: DescKind::Prop(kind),
        }
    }

    /// A wildcard property matching any name not otherwise matched.
    pub fn any_prop(validator: Option<PropValidator>) -> Self {
        Self {
            name: ElementName::Any,
            required: false,
            conditions: Vec::new(),
            kind: DescKind::Prop(PropDesc::Any { validator }),
        }
    }

    /// Mark the element as mandatory.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Add a conditional-presence rule.
    pub fn when(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::new(key, value));
        self
    }

    fn is_additive(&self) -> bool {
        matches!(
            &self.kind,
            DescKind::Node {
                compatible,
                path: None,
                ..
            } if compatible.is_empty()
        ) && !matches!(self.name, ElementName::Any)
    }
}

/// An independently discovered unit of schema.
#[derive(Debug, Clone)]
pub struct FragmentDescriptor {
    /// Name used in load failure reports.
    pub name: String,
    /// Ordering level used to resolve forward dependencies. Default 0.
    pub priority: u32,
    /// Top-level node elements.
    pub elements: Vec<ElementDesc>,
}

impl FragmentDescriptor {
    pub fn new(name: impl Into<String>, priority: u32, elements: Vec<ElementDesc>) -> Self {
        Self {
            name: name.into(),
            priority,
            elements,
        }
    }
}

impl SchemaSet {
    /// Intern a descriptor tree, compiling patterns and fixing parent links.
    ///
    /// Node elements auto-append the universally legal optional properties
    /// (`#address-cells`, `#size-cells`, `interrupt-parent`), plus a
    /// required `compatible` string-list check when the node declares
    /// compatible strings.
    pub fn intern(
        &mut self,
        desc: ElementDesc,
        parent: Option<ElementId>,
    ) -> Result<ElementId, LoadError> {
        match desc.kind {
            DescKind::Node {
                compatible,
                path,
                name_pattern,
                children,
            } => {
                let name_pattern = name_pattern
                    .map(|p| Pattern::new(desc.name.as_str(), &p))
                    .transpose()?;
                let id = self.insert(SchemaElement {
                    name: desc.name,
                    required: desc.required,
                    conditions: desc.conditions,
                    parent,
                    kind: ElementKind::Node(NodeSchema {
                        compatible: compatible.clone(),
                        path,
                        name_pattern,
                        children: Vec::new(),
                    }),
                });
                for child in children {
                    let cid = self.intern(child, Some(id))?;
                    self.add_child(id, cid);
                }
                if !compatible.is_empty() {
                    let check = ElementDesc::prop(
                        "compatible",
                        PropDesc::StringList {
                            pattern: Some(compatible.join("|")),
                        },
                    )
                    .required();
                    let cid = self.intern(check, Some(id))?;
                    self.add_child(id, cid);
                }
                for extra in ["#address-cells", "#size-cells", "interrupt-parent"] {
                    let cid = self.intern(
                        ElementDesc::prop(extra, PropDesc::Int { range: None }),
                        Some(id),
                    )?;
                    self.add_child(id, cid);
                }
                Ok(id)
            }
            DescKind::Prop(prop) => {
                let element = desc.name.as_str().to_owned();
                let compile =
                    |p: Option<String>| p.map(|p| Pattern::new(&element, &p)).transpose();
                let kind = match prop {
                    PropDesc::Bool => PropSchema::Bool,
                    PropDesc::Int { range } => PropSchema::Int { range },
                    PropDesc::IntList { range } => PropSchema::IntList { range },
                    PropDesc::Float { range } => PropSchema::Float { range },
                    PropDesc::String { pattern } => PropSchema::String {
                        pattern: compile(pattern)?,
                    },
                    PropDesc::StringList { pattern } => PropSchema::StringList {
                        pattern: compile(pattern)?,
                    },
                    PropDesc::File {
                        pattern,
                        target_dir,
                    } => PropSchema::File {
                        pattern: compile(pattern)?,
                        target_dir,
                    },
                    PropDesc::Phandle { target_compat } => PropSchema::Phandle { target_compat },
                    PropDesc::PhandleTarget => PropSchema::PhandleTarget,
                    PropDesc::Custom { validator } => PropSchema::Custom { validator },
                    PropDesc::Any { validator } => PropSchema::Any { validator },
                };
                Ok(self.insert(SchemaElement {
                    name: desc.name,
                    required: desc.required,
                    conditions: desc.conditions,
                    parent,
                    kind: ElementKind::Prop(kind),
                }))
            }
        }
    }
}

/// Indexed, read-only schema for one validation run.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    set: SchemaSet,
    by_compat: IndexMap<String, ElementId>,
    by_path: IndexMap<String, ElementId>,
    /// Top-level elements in registration order, the merge bases for
    /// additive fragments.
    loaded: Vec<ElementId>,
}

impl Registry {
    /// Build a registry from fragment descriptors.
    ///
    /// The result is independent of discovery order: only declared priority
    /// and dependency availability affect merge order, and each additive
    /// fragment is merged exactly once.
    pub fn load(fragments: Vec<FragmentDescriptor>) -> Result<Self, LoadError> {
        let mut registry = Registry::default();
        let mut remaining = fragments;
        for pass in 0..MAX_PASSES {
            if remaining.is_empty() {
                break;
            }
            let mut leftover = Vec::new();
            for fragment in remaining {
                if fragment.priority as usize > pass || !registry.bases_available(&fragment) {
                    leftover.push(fragment);
                    continue;
                }
                tracing::debug!(fragment = %fragment.name, pass, "registering schema fragment");
                registry.register_fragment(fragment)?;
            }
            remaining = leftover;
        }
        if !remaining.is_empty() {
            let names: Vec<&str> = remaining.iter().map(|f| f.name.as_str()).collect();
            return Err(LoadError::UnresolvedFragments(names.join(", ")));
        }
        Ok(registry)
    }

    /// Whether every additive element in the fragment has a merge base,
    /// either already registered or declared earlier in the same fragment.
    fn bases_available(&self, fragment: &FragmentDescriptor) -> bool {
        let mut local: Vec<&ElementName> = Vec::new();
        for elem in &fragment.elements {
            if elem.is_additive() {
                if self.find_base(&elem.name).is_none() && !local.contains(&&elem.name) {
                    return false;
                }
            } else if matches!(elem.kind, DescKind::Node { .. }) {
                local.push(&elem.name);
            }
        }
        true
    }

    /// Find a previously registered element with this name and node kind.
    fn find_base(&self, name: &ElementName) -> Option<ElementId> {
        self.loaded
            .iter()
            .copied()
            .find(|id| self.set.element(*id).is_node() && self.set.element(*id).name == *name)
    }

    fn register_fragment(&mut self, fragment: FragmentDescriptor) -> Result<(), LoadError> {
        for desc in fragment.elements {
            let DescKind::Node {
                ref compatible,
                ref path,
                ..
            } = desc.kind
            else {
                return Err(LoadError::NotANode {
                    fragment: fragment.name,
                    element: desc.name.as_str().to_owned(),
                });
            };

            if desc.is_additive() {
                // Append the fragment's children onto the existing base.
                let base = self
                    .find_base(&desc.name)
                    .expect("checked by bases_available");
                let DescKind::Node { children, .. } = desc.kind else {
                    unreachable!()
                };
                for child in children {
                    let cid = self.set.intern(child, Some(base))?;
                    self.set.add_child(base, cid);
                }
                continue;
            }

            let compatible = compatible.clone();
            let path = path.clone();
            let id = self.set.intern(desc, None)?;
            // Later registrations for the same string win.
            for compat in compatible {
                self.by_compat.insert(compat, id);
            }
            if let Some(path) = path {
                self.by_path.insert(path, id);
            }
            self.loaded.push(id);
        }
        Ok(())
    }

    pub fn set(&self) -> &SchemaSet {
        &self.set
    }

    /// Look up the node schema registered for a compatible string.
    pub fn by_compat(&self, compat: &str) -> Option<ElementId> {
        self.by_compat.get(compat).copied()
    }

    /// Look up the node schema registered for a structural path.
    pub fn by_path(&self, path: &str) -> Option<ElementId> {
        self.by_path.get(path).copied()
    }

    /// Walk a `/`-separated path below a registered element by child name.
    pub fn element_by_path(&self, root: ElementId, path: &str) -> Option<ElementId> {
        let mut current = root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let ElementKind::Node(schema) = &self.set.element(current).kind else {
                return None;
            };
            current = schema
                .children
                .iter()
                .copied()
                .find(|c| self.set.element(*c).name.matches(part))?;
        }
        Some(current)
    }

    /// Map of file-kind property name to its declared target directory.
    ///
    /// Two file properties with the same name must agree on the directory.
    pub fn target_directories(&self) -> Result<IndexMap<String, String>, LoadError> {
        let mut dirs: IndexMap<String, String> = IndexMap::new();
        for id in self.set.ids() {
            let elem = self.set.element(id);
            let ElementKind::Prop(PropSchema::File {
                target_dir: Some(dir),
                ..
            }) = &elem.kind
            else {
                continue;
            };
            let name = elem.name.as_str();
            match dirs.get(name) {
                Some(previous) if previous != dir => {
                    return Err(LoadError::InconsistentTargetDir {
                        element: name.to_owned(),
                        target_dir: dir.clone(),
                        previous: previous.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    dirs.insert(name.to_owned(), dir.clone());
                }
            }
        }
        Ok(dirs)
    }

    /// Names of phandle-kind properties across the whole schema.
    ///
    /// `default` is excluded: it is not a simple phandle link and is
    /// handled separately by consumers.
    pub fn phandle_props(&self) -> IndexSet<String> {
        let mut props = IndexSet::new();
        for id in self.set.ids() {
            let elem = self.set.element(id);
            if let ElementKind::Prop(PropSchema::Phandle { .. }) = &elem.kind {
                props.insert(elem.name.as_str().to_owned());
            }
        }
        props.shift_remove("default");
        props
    }
}
