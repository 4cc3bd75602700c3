//! Schema fragment files.
//!
//! Fragments are JSON documents describing schema elements; this module
//! decodes them into the descriptors consumed by the registry loader. A
//! fragment looks like:
//!
//! ```json
//! {
//!   "priority": 0,
//!   "elements": [
//!     {
//!       "type": "node",
//!       "name": "widget",
//!       "compatible": ["vendor,widget"],
//!       "elements": [
//!         { "type": "int", "name": "index", "required": true,
//!           "min": 0, "max": 7 }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;

use dt_schema::{
    phandle, DescKind, ElementDesc, ElementName, FragmentDescriptor, PropDesc, PropValidator,
};

#[derive(Debug, Deserialize)]
struct FragmentFile {
    #[serde(default)]
    priority: u32,
    elements: Vec<ElementBinding>,
}

#[derive(Debug, Deserialize)]
struct ElementBinding {
    /// Absent for wildcard elements.
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    required: bool,
    /// Conditional-presence rules, key to expected value.
    #[serde(default)]
    when: IndexMap<String, String>,
    #[serde(flatten)]
    kind: KindBinding,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum KindBinding {
    Node {
        #[serde(default)]
        compatible: Vec<String>,
        #[serde(default)]
        path: Option<String>,
        #[serde(default, rename = "name-pattern")]
        name_pattern: Option<String>,
        #[serde(default)]
        elements: Vec<ElementBinding>,
    },
    Bool,
    Int {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    IntList {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    Float {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    String {
        #[serde(default)]
        pattern: Option<String>,
    },
    StringList {
        #[serde(default)]
        pattern: Option<String>,
    },
    File {
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default, rename = "target-dir")]
        target_dir: Option<String>,
    },
    Phandle {
        target: String,
    },
    PhandleTarget,
    Custom {
        validator: String,
    },
    Any {
        #[serde(default)]
        validator: Option<String>,
    },
}

/// Discover and decode every fragment file under a directory.
///
/// Files are visited in path order, which the loader then ignores: fragment
/// merge order depends only on declared priorities.
pub fn discover(dir: &Path) -> Result<Vec<FragmentDescriptor>> {
    let pattern = format!("{}/**/*.json", dir.display());
    let mut fragments = Vec::new();
    for entry in glob::glob(&pattern).context("bad schema directory")? {
        let path = entry?;
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading fragment {}", path.display()))?;
        fragments.push(decode(&path.display().to_string(), &text)?);
    }
    Ok(fragments)
}

/// Decode a single fragment document.
pub fn decode(name: &str, text: &str) -> Result<FragmentDescriptor> {
    let file: FragmentFile =
        serde_json::from_str(text).with_context(|| format!("decoding fragment {name}"))?;
    let elements = file
        .elements
        .into_iter()
        .map(|e| element(name, e))
        .collect::<Result<Vec<_>>>()?;
    Ok(FragmentDescriptor::new(name, file.priority, elements))
}

fn element(fragment: &str, binding: ElementBinding) -> Result<ElementDesc> {
    let kind = match binding.kind {
        KindBinding::Node {
            compatible,
            path,
            name_pattern,
            elements,
        } => DescKind::Node {
            compatible,
            path,
            name_pattern,
            children: elements
                .into_iter()
                .map(|e| element(fragment, e))
                .collect::<Result<Vec<_>>>()?,
        },
        KindBinding::Bool => DescKind::Prop(PropDesc::Bool),
        KindBinding::Int { min, max } => DescKind::Prop(PropDesc::Int {
            range: range(min, max),
        }),
        KindBinding::IntList { min, max } => DescKind::Prop(PropDesc::IntList {
            range: range(min, max),
        }),
        KindBinding::Float { min, max } => DescKind::Prop(PropDesc::Float {
            range: match (min, max) {
                (None, None) => None,
                (min, max) => Some((
                    min.unwrap_or(f64::NEG_INFINITY),
                    max.unwrap_or(f64::INFINITY),
                )),
            },
        }),
        KindBinding::String { pattern } => DescKind::Prop(PropDesc::String { pattern }),
        KindBinding::StringList { pattern } => DescKind::Prop(PropDesc::StringList { pattern }),
        KindBinding::File {
            pattern,
            target_dir,
        } => DescKind::Prop(PropDesc::File {
            pattern,
            target_dir,
        }),
        KindBinding::Phandle { target } => DescKind::Prop(PropDesc::Phandle {
            target_compat: target,
        }),
        KindBinding::PhandleTarget => DescKind::Prop(PropDesc::PhandleTarget),
        KindBinding::Custom { validator } => DescKind::Prop(PropDesc::Custom {
            validator: validator_by_name(fragment, &validator)?,
        }),
        KindBinding::Any { validator } => DescKind::Prop(PropDesc::Any {
            validator: validator
                .map(|v| validator_by_name(fragment, &v))
                .transpose()?,
        }),
    };

    let name = match (binding.name, &kind) {
        (Some(name), _) => ElementName::Name(name),
        (None, DescKind::Node { .. }) | (None, DescKind::Prop(PropDesc::Any { .. })) => {
            ElementName::Any
        }
        (None, _) => bail!("{fragment}: element without a name must be a node or 'any'"),
    };

    let mut desc = ElementDesc {
        name,
        required: binding.required,
        conditions: Vec::new(),
        kind,
    };
    for (key, value) in binding.when {
        desc = desc.when(key, value);
    }
    Ok(desc)
}

fn range(min: Option<i64>, max: Option<i64>) -> Option<(i64, i64)> {
    match (min, max) {
        (None, None) => None,
        (min, max) => Some((min.unwrap_or(i64::MIN), max.unwrap_or(i64::MAX))),
    }
}

/// Look up a named custom validator.
fn validator_by_name(fragment: &str, name: &str) -> Result<PropValidator> {
    match name {
        "sku-map" => Ok(phandle::validate_sku_map),
        other => bail!("{fragment}: unknown validator '{other}'"),
    }
}
