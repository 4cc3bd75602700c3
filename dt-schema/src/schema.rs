//! Schema elements.
//!
//! A schema mirrors the shape of the tree it validates: node elements hold
//! an ordered list of child elements (properties and nested node schemas).
//! The element kinds form a closed set; extension happens through wildcards,
//! conditional presence and additive fragment merge, not through new kinds.
//!
//! Elements live in a [`SchemaSet`] arena. Parent links are non-owning
//! [`ElementId`] indices used only for upward walks by the conditional
//! presence rules.

use regex::Regex;

use crate::{
    cond::Condition,
    error::{LoadError, ValidationError},
    phandle,
    tree::{strip_unit_address, ConfigProperty, ConfigTree, NodeId, PropValue},
    validator::ValidationContext,
};

/// Index of an element inside a [`SchemaSet`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(usize);

/// Name of a schema element, or the wildcard matching any name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementName {
    Name(String),
    Any,
}

impl ElementName {
    pub fn as_str(&self) -> &str {
        match self {
            ElementName::Name(n) => n,
            ElementName::Any => "ANY",
        }
    }

    /// Whether this name matches a concrete node or property name,
    /// ignoring any trailing unit address. Wildcards never match here;
    /// they are a separate fallback during lookup.
    pub fn matches(&self, concrete: &str) -> bool {
        match self {
            ElementName::Name(n) => n == strip_unit_address(concrete),
            ElementName::Any => false,
        }
    }
}

impl<S: Into<String>> From<S> for ElementName {
    fn from(s: S) -> Self {
        ElementName::Name(s.into())
    }
}

/// A `^...$`-anchored regular expression kept with its source pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    re: Regex,
}

impl Pattern {
    /// Compile a pattern, anchoring it to the full string.
    pub fn new(element: &str, pattern: &str) -> Result<Self, LoadError> {
        let re = Regex::new(&format!("^{pattern}$")).map_err(|source| LoadError::BadPattern {
            element: element.to_owned(),
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(Self {
            source: pattern.to_owned(),
            re,
        })
    }

    pub fn matches(&self, s: &str) -> bool {
        self.re.is_match(s)
    }

    /// The anchored form, as quoted in failure messages.
    pub fn anchored(&self) -> String {
        format!("^{}$", self.source)
    }
}

/// Externally supplied check for custom and wildcard properties.
pub type PropValidator =
    fn(&mut ValidationContext, &ConfigTree, NodeId, &ConfigProperty) -> Result<(), ValidationError>;

/// A single schema element: a node or a property description.
#[derive(Debug, Clone)]
pub struct SchemaElement {
    pub name: ElementName,
    pub required: bool,
    /// Rules controlling whether this element applies to a node instance.
    pub conditions: Vec<Condition>,
    /// Syntactic parent, used only for upward condition walks.
    pub parent: Option<ElementId>,
    pub kind: ElementKind,
}

#[derive(Debug, Clone)]
pub enum ElementKind {
    Node(NodeSchema),
    Prop(PropSchema),
}

impl SchemaElement {
    pub fn is_node(&self) -> bool {
        matches!(self.kind, ElementKind::Node(_))
    }

    pub fn is_prop(&self) -> bool {
        matches!(self.kind, ElementKind::Prop(_))
    }
}

/// Schema for a node and its contents.
#[derive(Debug, Clone)]
pub struct NodeSchema {
    /// Compatible strings this schema answers to.
    pub compatible: Vec<String>,
    /// Structural path identifying the node when it has no compatible string.
    pub path: Option<String>,
    /// Name pattern checked by wildcard node schemas.
    pub name_pattern: Option<Pattern>,
    /// Ordered child elements: properties and nested node schemas.
    pub children: Vec<ElementId>,
}

/// Schema for a single property.
#[derive(Debug, Clone)]
pub enum PropSchema {
    /// Presence is the value; nothing further to check.
    Bool,
    Int {
        range: Option<(i64, i64)>,
    },
    /// Every element is checked against the range; an empty list passes.
    IntList {
        range: Option<(i64, i64)>,
    },
    /// Decoded from the property's string payload.
    Float {
        range: Option<(f64, f64)>,
    },
    String {
        pattern: Option<Pattern>,
    },
    StringList {
        pattern: Option<Pattern>,
    },
    /// A file to be installed; `target_dir` tags its install directory.
    File {
        pattern: Option<Pattern>,
        target_dir: Option<String>,
    },
    /// Reference cells whose targets must carry the given compatible string.
    Phandle {
        target_compat: String,
    },
    /// Marks a node as a legal phandle target.
    PhandleTarget,
    Custom {
        validator: PropValidator,
    },
    /// Matches any property name not otherwise matched.
    Any {
        validator: Option<PropValidator>,
    },
}

/// Arena owning every element of a loaded schema.
#[derive(Debug, Default, Clone)]
pub struct SchemaSet {
    elements: Vec<SchemaElement>,
}

impl SchemaSet {
    pub fn element(&self, id: ElementId) -> &SchemaElement {
        &self.elements[id.0]
    }

    pub(crate) fn insert(&mut self, element: SchemaElement) -> ElementId {
        let id = ElementId(self.elements.len());
        self.elements.push(element);
        id
    }

    /// Append `child` to a node element's child list, fixing its parent link.
    pub(crate) fn add_child(&mut self, parent: ElementId, child: ElementId) {
        self.elements[child.0].parent = Some(parent);
        match &mut self.elements[parent.0].kind {
            ElementKind::Node(node) => node.children.push(child),
            ElementKind::Prop(_) => unreachable!("properties have no children"),
        }
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = ElementId> {
        (0..self.elements.len()).map(ElementId)
    }

    /// Run a node element's own local checks against a concrete node.
    ///
    /// Only wildcard node schemas carry a check of their own: the node name
    /// must match the declared pattern.
    pub fn validate_node(
        &self,
        id: ElementId,
        ctx: &mut ValidationContext,
        tree: &ConfigTree,
        node: NodeId,
    ) -> Result<(), ValidationError> {
        let ElementKind::Node(schema) = &self.element(id).kind else {
            return Ok(());
        };
        if let Some(pattern) = &schema.name_pattern {
            let n = tree.node(node);
            if !pattern.matches(&n.name) {
                ctx.fail(
                    &n.path,
                    format!(
                        "Node name '{}' does not match pattern '{}'",
                        n.name,
                        pattern.anchored()
                    ),
                )?;
            }
        }
        Ok(())
    }

    /// Run a property element's type-specific checks against a concrete
    /// property. Failures are appended to the context; in raise mode the
    /// first one aborts the run.
    pub fn validate_prop(
        &self,
        id: ElementId,
        ctx: &mut ValidationContext,
        tree: &ConfigTree,
        node: NodeId,
        prop: &ConfigProperty,
    ) -> Result<(), ValidationError> {
        let path = tree.node(node).path.clone();
        let ElementKind::Prop(schema) = &self.element(id).kind else {
            return Ok(());
        };
        match schema {
            PropSchema::Bool | PropSchema::PhandleTarget => {}
            PropSchema::Int { range } => {
                let Some(value) = int_value(prop) else {
                    return ctx.fail(
                        &path,
                        format!(
                            "'{}' value '{}' is not an int",
                            prop.name,
                            prop.value.render()
                        ),
                    );
                };
                check_int_range(ctx, &path, &prop.name, value, *range)?;
            }
            PropSchema::IntList { range } => {
                let values = match &prop.value {
                    PropValue::Int(v) => vec![*v],
                    PropValue::IntList(vs) => vs.clone(),
                    PropValue::Bytes(_) => prop.cells().iter().map(|c| *c as i64).collect(),
                    _ => {
                        return ctx.fail(
                            &path,
                            format!(
                                "'{}' value '{}' is not an int list",
                                prop.name,
                                prop.value.render()
                            ),
                        );
                    }
                };
                for value in values {
                    check_int_range(ctx, &path, &prop.name, value, *range)?;
                }
            }
            PropSchema::Float { range } => {
                let parsed = prop.value.as_text().and_then(|s| s.parse::<f64>().ok());
                let Some(value) = parsed else {
                    return ctx.fail(
                        &path,
                        format!(
                            "'{}' value '{}' is not a float",
                            prop.name,
                            prop.value.render()
                        ),
                    );
                };
                if let Some((min, max)) = range {
                    if value < *min || value > *max {
                        ctx.fail(
                            &path,
                            format!(
                                "'{}' value '{}' is out of range [{}..{}]",
                                prop.name, value, min, max
                            ),
                        )?;
                    }
                }
            }
            PropSchema::String { pattern } | PropSchema::File { pattern, .. } => {
                let Some(value) = prop.value.as_text() else {
                    return ctx.fail(
                        &path,
                        format!(
                            "'{}' value '{}' is not a string",
                            prop.name,
                            prop.value.render()
                        ),
                    );
                };
                check_pattern(ctx, &path, &prop.name, value, pattern.as_ref())?;
            }
            PropSchema::StringList { pattern } => {
                // A one-element string list decodes as a plain string.
                let values: Vec<&str> = match &prop.value {
                    PropValue::String(s) => vec![s.as_str()],
                    PropValue::StringList(ss) => ss.iter().map(String::as_str).collect(),
                    _ => {
                        return ctx.fail(
                            &path,
                            format!(
                                "'{}' value '{}' is not a string list",
                                prop.name,
                                prop.value.render()
                            ),
                        );
                    }
                };
                for value in values {
                    check_pattern(ctx, &path, &prop.name, value, pattern.as_ref())?;
                }
            }
            PropSchema::Phandle { target_compat } => {
                phandle::validate_phandle(ctx, tree, node, prop, target_compat)?;
            }
            PropSchema::Custom { validator } => validator(ctx, tree, node, prop)?,
            PropSchema::Any { validator } => {
                if let Some(validator) = validator {
                    validator(ctx, tree, node, prop)?;
                }
            }
        }
        Ok(())
    }
}

/// Decode a property as a single integer, if possible.
fn int_value(prop: &ConfigProperty) -> Option<i64> {
    match &prop.value {
        PropValue::Int(v) => Some(*v),
        PropValue::Bytes(bs) if bs.len() == 4 => {
            Some(u32::from_be_bytes([bs[0], bs[1], bs[2], bs[3]]) as i64)
        }
        _ => None,
    }
}

fn check_int_range(
    ctx: &mut ValidationContext,
    path: &str,
    name: &str,
    value: i64,
    range: Option<(i64, i64)>,
) -> Result<(), ValidationError> {
    if let Some((min, max)) = range {
        if value < min || value > max {
            ctx.fail(
                path,
                format!("'{name}' value '{value}' is out of range [{min}..{max}]"),
            )?;
        }
    }
    Ok(())
}

fn check_pattern(
    ctx: &mut ValidationContext,
    path: &str,
    name: &str,
    value: &str,
    pattern: Option<&Pattern>,
) -> Result<(), ValidationError> {
    if let Some(pattern) = pattern {
        if !pattern.matches(value) {
            ctx.fail(
                path,
                format!(
                    "'{name}' value '{value}' does not match pattern '{}'",
                    pattern.anchored()
                ),
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ElementDesc, PropDesc};

    fn check(desc: ElementDesc, value: PropValue) -> Vec<String> {
        let mut set = SchemaSet::default();
        let id = set.intern(desc, None).unwrap();
        let mut tree = ConfigTree::new();
        let node = tree.add_node(tree.root(), "n");
        let prop = ConfigProperty::new("p", value);
        let mut ctx = ValidationContext::default();
        set.validate_prop(id, &mut ctx, &tree, node, &prop).unwrap();
        ctx.failures().iter().map(|f| f.message.clone()).collect()
    }

    #[test]
    fn int_range_is_inclusive() {
        let range = Some((0, 7));
        for (value, ok) in [(0, true), (7, true), (3, true), (-1, false), (9, false)] {
            let failures = check(
                ElementDesc::prop("p", PropDesc::Int { range }),
                PropValue::Int(value),
            );
            assert_eq!(failures.is_empty(), ok, "value {value}");
        }

        let failures = check(
            ElementDesc::prop("p", PropDesc::Int { range }),
            PropValue::Int(9),
        );
        assert_eq!(failures, vec!["'p' value '9' is out of range [0..7]"]);
    }

    #[test]
    fn undeclared_range_accepts_anything() {
        let failures = check(
            ElementDesc::prop("p", PropDesc::Int { range: None }),
            PropValue::Int(i64::MAX),
        );
        assert!(failures.is_empty());
    }

    #[test]
    fn int_list_checks_each_element() {
        let desc = || {
            ElementDesc::prop(
                "p",
                PropDesc::IntList {
                    range: Some((1, 256)),
                },
            )
        };
        assert!(check(desc(), PropValue::IntList(vec![1, 100, 256])).is_empty());
        assert_eq!(check(desc(), PropValue::IntList(vec![1, 300, 0])).len(), 2);
        // An empty list is always accepted.
        assert!(check(desc(), PropValue::IntList(Vec::new())).is_empty());
    }

    #[test]
    fn string_pattern_is_fully_anchored() {
        let desc = || {
            ElementDesc::prop(
                "p",
                PropDesc::String {
                    pattern: Some("[a-z]+".into()),
                },
            )
        };
        assert!(check(desc(), PropValue::String("abc".into())).is_empty());
        assert_eq!(
            check(desc(), PropValue::String("abc1".into())),
            vec!["'p' value 'abc1' does not match pattern '^[a-z]+$'"]
        );
    }

    #[test]
    fn string_list_accepts_single_string() {
        let desc = || {
            ElementDesc::prop(
                "p",
                PropDesc::StringList {
                    pattern: Some("a|b".into()),
                },
            )
        };
        assert!(check(desc(), PropValue::String("a".into())).is_empty());
        assert!(check(desc(), PropValue::StringList(vec!["a".into(), "b".into()])).is_empty());
        assert_eq!(
            check(desc(), PropValue::StringList(vec!["a".into(), "c".into()])).len(),
            1
        );
    }

    #[test]
    fn float_parses_string_payload() {
        let desc = || {
            ElementDesc::prop(
                "p",
                PropDesc::Float {
                    range: Some((0.0, 1.5)),
                },
            )
        };
        assert!(check(desc(), PropValue::String("0.5".into())).is_empty());
        assert_eq!(check(desc(), PropValue::String("2.5".into())).len(), 1);
        assert_eq!(check(desc(), PropValue::String("oops".into())).len(), 1);
    }

    #[test]
    fn element_name_matching_strips_unit_address() {
        let name = ElementName::from("widget");
        assert!(name.matches("widget"));
        assert!(name.matches("widget@2"));
        assert!(!name.matches("gadget"));
        assert!(!ElementName::Any.matches("widget"));
    }

    #[test]
    fn bad_pattern_is_a_load_error() {
        assert!(matches!(
            Pattern::new("p", "("),
            Err(LoadError::BadPattern { .. })
        ));
    }
}
