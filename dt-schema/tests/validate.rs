//! End-to-end validation scenarios against small trees and schemas.

use std::collections::HashMap;

use dt_schema::{
    validate_tree, ConfigTree, ElementDesc, FragmentDescriptor, PropDesc, PropValue, Registry,
    ValidationContext,
};

/// Registry with one node schema for `vendor,widget`: a required `index`
/// integer in [0, 7].
fn widget_registry() -> Registry {
    let widget = ElementDesc::node(
        "widget",
        ["vendor,widget"],
        vec![ElementDesc::prop(
            "index",
            PropDesc::Int {
                range: Some((0, 7)),
            },
        )
        .required()],
    );
    Registry::load(vec![FragmentDescriptor::new("widget", 0, vec![widget])]).unwrap()
}

fn widget_tree(props: &[(&str, PropValue)]) -> ConfigTree {
    let mut tree = ConfigTree::new();
    let node = tree.add_node(tree.root(), "widget@2");
    tree.add_prop(node, "compatible", PropValue::String("vendor,widget".into()));
    for (name, value) in props {
        tree.add_prop(node, name, value.clone());
    }
    tree
}

fn run(registry: &Registry, tree: &ConfigTree) -> Vec<String> {
    let mut ctx = ValidationContext::default();
    validate_tree(registry, tree, &mut ctx).unwrap();
    ctx.into_failures().into_iter().map(|f| f.to_string()).collect()
}

#[test]
fn conforming_document_passes() {
    let registry = widget_registry();
    let tree = widget_tree(&[("index", PropValue::Int(3))]);
    assert_eq!(run(&registry, &tree), Vec::<String>::new());
}

#[test]
fn missing_required_property() {
    let registry = widget_registry();
    let tree = widget_tree(&[]);
    assert_eq!(
        run(&registry, &tree),
        vec!["/widget@2: Required property 'index' missing"]
    );
}

#[test]
fn out_of_range_value_cites_the_bounds() {
    let registry = widget_registry();
    let tree = widget_tree(&[("index", PropValue::Int(9))]);
    assert_eq!(
        run(&registry, &tree),
        vec!["/widget@2: 'index' value '9' is out of range [0..7]"]
    );
}

#[test]
fn unexpected_property_lists_the_legal_names() {
    let registry = widget_registry();
    let tree = widget_tree(&[
        ("index", PropValue::Int(3)),
        ("foo", PropValue::String("bar".into())),
    ]);
    let failures = run(&registry, &tree);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("Unexpected property 'foo'"));
    assert!(failures[0].contains("index"));
}

#[test]
fn unit_address_is_ignored_when_matching_subnode_schema() {
    // Schema: bus with a child node schema named "widget"; the concrete
    // child is "widget@2".
    let bus = ElementDesc::node(
        "bus",
        ["vendor,bus"],
        vec![ElementDesc::node(
            "widget",
            Vec::<String>::new(),
            vec![ElementDesc::prop("index", PropDesc::Int { range: None })],
        )],
    );
    let registry = Registry::load(vec![FragmentDescriptor::new("bus", 0, vec![bus])]).unwrap();

    let mut tree = ConfigTree::new();
    let bus_node = tree.add_node(tree.root(), "bus");
    tree.add_prop(bus_node, "compatible", PropValue::String("vendor,bus".into()));
    let widget = tree.add_node(bus_node, "widget@2");
    tree.add_prop(widget, "index", PropValue::Int(1));

    assert_eq!(run(&registry, &tree), Vec::<String>::new());
}

#[test]
fn last_compatible_in_the_node_list_wins() {
    // Schema "b" accepts property "p" and both compatible strings; schema
    // "a" accepts neither. Although "a" is registered later (and so owns
    // the "a" index entry), a node listing ["a", "b"] must be validated
    // against "b": the last string with a schema wins.
    let schema_b = ElementDesc::node(
        "b",
        ["a", "b"],
        vec![ElementDesc::prop("p", PropDesc::Bool)],
    );
    let schema_a = ElementDesc::node("a", ["a"], Vec::new());
    let registry = Registry::load(vec![FragmentDescriptor::new(
        "both",
        0,
        vec![schema_b, schema_a],
    )])
    .unwrap();

    let mut tree = ConfigTree::new();
    let node = tree.add_node(tree.root(), "dev");
    tree.add_prop(
        node,
        "compatible",
        PropValue::StringList(vec!["a".into(), "b".into()]),
    );
    tree.add_prop(node, "p", PropValue::Bool);
    assert_eq!(run(&registry, &tree), Vec::<String>::new());
}

#[test]
fn unregistered_compatible_is_a_note_not_a_failure() {
    let registry = widget_registry();
    let mut tree = ConfigTree::new();
    let node = tree.add_node(tree.root(), "mystery");
    tree.add_prop(node, "compatible", PropValue::String("vendor,mystery".into()));

    let mut ctx = ValidationContext::default();
    validate_tree(&registry, &tree, &mut ctx).unwrap();
    assert!(ctx.failures().is_empty());
    assert_eq!(ctx.notes(), ["No schema for: vendor,mystery"]);
}

#[test]
fn additive_fragment_contributes_properties() {
    let base = FragmentDescriptor::new(
        "base",
        0,
        vec![ElementDesc::node(
            "bus",
            ["vendor,bus"],
            vec![ElementDesc::prop("a", PropDesc::Bool)],
        )],
    );
    let addition = FragmentDescriptor::new(
        "addition",
        1,
        vec![ElementDesc::node(
            "bus",
            Vec::<String>::new(),
            vec![ElementDesc::prop("b", PropDesc::Bool).required()],
        )],
    );

    for fragments in [
        vec![base.clone(), addition.clone()],
        vec![addition.clone(), base.clone()],
    ] {
        let registry = Registry::load(fragments).unwrap();

        let mut tree = ConfigTree::new();
        let node = tree.add_node(tree.root(), "bus");
        tree.add_prop(node, "compatible", PropValue::String("vendor,bus".into()));
        tree.add_prop(node, "a", PropValue::Bool);
        tree.add_prop(node, "b", PropValue::Bool);
        assert_eq!(run(&registry, &tree), Vec::<String>::new());

        let mut tree = ConfigTree::new();
        let node = tree.add_node(tree.root(), "bus");
        tree.add_prop(node, "compatible", PropValue::String("vendor,bus".into()));
        tree.add_prop(node, "a", PropValue::Bool);
        assert_eq!(
            run(&registry, &tree),
            vec!["/bus: Required property 'b' missing"]
        );
    }
}

#[test]
fn conditionally_absent_required_property_is_not_missing() {
    // "wifi-firmware" is only required when kind == "wifi".
    let dev = ElementDesc::node(
        "dev",
        ["vendor,dev"],
        vec![
            ElementDesc::prop("kind", PropDesc::String { pattern: None }),
            ElementDesc::prop("wifi-firmware", PropDesc::String { pattern: None })
                .required()
                .when("kind", "wifi"),
        ],
    );
    let registry = Registry::load(vec![FragmentDescriptor::new("dev", 0, vec![dev])]).unwrap();

    let mut tree = ConfigTree::new();
    let node = tree.add_node(tree.root(), "dev");
    tree.add_prop(node, "compatible", PropValue::String("vendor,dev".into()));
    tree.add_prop(node, "kind", PropValue::String("ethernet".into()));
    assert_eq!(run(&registry, &tree), Vec::<String>::new());

    let mut tree = ConfigTree::new();
    let node = tree.add_node(tree.root(), "dev");
    tree.add_prop(node, "compatible", PropValue::String("vendor,dev".into()));
    tree.add_prop(node, "kind", PropValue::String("wifi".into()));
    assert_eq!(
        run(&registry, &tree),
        vec!["/dev: Required property 'wifi-firmware' missing"]
    );
}

#[test]
fn setting_selects_between_node_shapes() {
    let dev = ElementDesc::node(
        "dev",
        ["vendor,dev"],
        vec![
            ElementDesc::prop("arm-clock", PropDesc::Int { range: None })
                .required()
                .when("#arch", "armv8"),
            ElementDesc::prop("x86-clock", PropDesc::Int { range: None })
                .required()
                .when("#arch", "!armv8"),
        ],
    );
    let registry = Registry::load(vec![FragmentDescriptor::new("dev", 0, vec![dev])]).unwrap();

    let mut tree = ConfigTree::new();
    let node = tree.add_node(tree.root(), "dev");
    tree.add_prop(node, "compatible", PropValue::String("vendor,dev".into()));
    tree.add_prop(node, "arm-clock", PropValue::Int(1000));

    let mut settings = HashMap::new();
    settings.insert("#arch".to_owned(), "armv8".to_owned());
    let mut ctx = ValidationContext::new(settings, false);
    validate_tree(&registry, &tree, &mut ctx).unwrap();
    assert!(ctx.failures().is_empty());

    // Under a different architecture the same document is wrong twice:
    // arm-clock is unexpected and x86-clock is missing.
    let mut settings = HashMap::new();
    settings.insert("#arch".to_owned(), "x86".to_owned());
    let mut ctx = ValidationContext::new(settings, false);
    validate_tree(&registry, &tree, &mut ctx).unwrap();
    let messages: Vec<&str> = ctx.failures().iter().map(|f| f.message.as_str()).collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("Unexpected property 'arm-clock'"));
    assert!(messages[1].contains("Required property 'x86-clock' missing"));
}

#[test]
fn missing_required_subnode() {
    let bus = ElementDesc::node(
        "bus",
        ["vendor,bus"],
        vec![
            ElementDesc::node("config", Vec::<String>::new(), Vec::new()).required(),
        ],
    );
    let registry = Registry::load(vec![FragmentDescriptor::new("bus", 0, vec![bus])]).unwrap();

    let mut tree = ConfigTree::new();
    let node = tree.add_node(tree.root(), "bus");
    tree.add_prop(node, "compatible", PropValue::String("vendor,bus".into()));
    tree.add_node(node, "other");

    // "other" is also flagged as unexpected when the walk recurses into it.
    assert_eq!(
        run(&registry, &tree),
        vec![
            "/bus: Missing subnode 'config' in other",
            "/bus: Unexpected subnode 'other', valid list is (config)",
        ]
    );
}

#[test]
fn unexpected_subnode_is_reported_at_the_parent() {
    let bus = ElementDesc::node(
        "bus",
        ["vendor,bus"],
        vec![ElementDesc::node("config", Vec::<String>::new(), Vec::new())],
    );
    let registry = Registry::load(vec![FragmentDescriptor::new("bus", 0, vec![bus])]).unwrap();

    let mut tree = ConfigTree::new();
    let node = tree.add_node(tree.root(), "bus");
    tree.add_prop(node, "compatible", PropValue::String("vendor,bus".into()));
    tree.add_node(node, "rogue");

    assert_eq!(
        run(&registry, &tree),
        vec!["/bus: Unexpected subnode 'rogue', valid list is (config)"]
    );
}

#[test]
fn path_registered_schema_applies_without_compatible() {
    let cpus = ElementDesc::node_by_path(
        "/cpus",
        vec![ElementDesc::prop("count", PropDesc::Int { range: Some((1, 64)) }).required()],
    );
    let registry = Registry::load(vec![FragmentDescriptor::new("cpus", 0, vec![cpus])]).unwrap();

    let mut tree = ConfigTree::new();
    let node = tree.add_node(tree.root(), "cpus");
    tree.add_prop(node, "count", PropValue::Int(0));

    assert_eq!(
        run(&registry, &tree),
        vec!["/cpus: 'count' value '0' is out of range [1..64]"]
    );
}

#[test]
fn phandle_property_checks_target_compatible() {
    let board = ElementDesc::node(
        "board",
        ["vendor,board"],
        vec![ElementDesc::prop(
            "audio-codec",
            PropDesc::Phandle {
                target_compat: "vendor,codec".into(),
            },
        )],
    );
    let codec = ElementDesc::node("codec", ["vendor,codec"], vec![
        ElementDesc::prop("phandle", PropDesc::PhandleTarget),
    ]);
    let registry =
        Registry::load(vec![FragmentDescriptor::new("f", 0, vec![board, codec])]).unwrap();

    let mut tree = ConfigTree::new();
    let codec_node = tree.add_node(tree.root(), "codec");
    tree.add_prop(codec_node, "compatible", PropValue::String("vendor,codec".into()));
    tree.add_prop(codec_node, "phandle", PropValue::Int(1));
    tree.register_phandle(1, codec_node);

    let wrong = tree.add_node(tree.root(), "wrong");
    tree.add_prop(wrong, "compatible", PropValue::String("vendor,other".into()));
    tree.register_phandle(2, wrong);

    let board_node = tree.add_node(tree.root(), "board");
    tree.add_prop(board_node, "compatible", PropValue::String("vendor,board".into()));
    tree.add_prop(board_node, "audio-codec", PropValue::Int(1));
    assert!(run(&registry, &tree).iter().all(|f| !f.contains("audio-codec")));

    tree.add_prop(board_node, "audio-codec", PropValue::Int(2));
    let failures = run(&registry, &tree);
    assert_eq!(
        failures
            .iter()
            .filter(|f| f.contains(
                "Phandle 'audio-codec' targets node '/wrong' which does not have compatible string 'vendor,codec'"
            ))
            .count(),
        1
    );
}

#[test]
fn phandle_prop_needs_a_declared_target() {
    // A node whose schema declares no phandle-target marker must not be
    // referenced.
    let dev = ElementDesc::node("dev", ["vendor,dev"], Vec::new());
    let registry = Registry::load(vec![FragmentDescriptor::new("dev", 0, vec![dev])]).unwrap();

    let mut tree = ConfigTree::new();
    let node = tree.add_node(tree.root(), "dev");
    tree.add_prop(node, "compatible", PropValue::String("vendor,dev".into()));
    tree.add_prop(node, "phandle", PropValue::Int(1));
    tree.register_phandle(1, node);

    assert_eq!(
        run(&registry, &tree),
        vec!["/dev: phandle target not valid for this node"]
    );
}

#[test]
fn phandle_alias_property_is_ignored() {
    let registry = widget_registry();
    let tree = {
        let mut tree = widget_tree(&[("index", PropValue::Int(3))]);
        let node = tree.child_by_name(tree.root(), "widget@2").unwrap();
        tree.add_prop(node, "linux,phandle", PropValue::Int(7));
        tree
    };
    assert_eq!(run(&registry, &tree), Vec::<String>::new());
}

#[test]
fn wildcard_property_accepts_any_name() {
    let aliases = ElementDesc::node(
        "aliases",
        ["vendor,aliases"],
        vec![ElementDesc::any_prop(None)],
    );
    let registry =
        Registry::load(vec![FragmentDescriptor::new("aliases", 0, vec![aliases])]).unwrap();

    let mut tree = ConfigTree::new();
    let node = tree.add_node(tree.root(), "aliases");
    tree.add_prop(node, "compatible", PropValue::String("vendor,aliases".into()));
    tree.add_prop(node, "serial0", PropValue::String("/soc/serial".into()));
    tree.add_prop(node, "ethernet0", PropValue::String("/soc/eth".into()));

    assert_eq!(run(&registry, &tree), Vec::<String>::new());
}

#[test]
fn wildcard_node_checks_its_name_pattern() {
    let cpus = ElementDesc::node(
        "cpus",
        ["vendor,cpus"],
        vec![ElementDesc::any_node("cpu(@[0-9a-f]+)?", Vec::new())],
    );
    let registry = Registry::load(vec![FragmentDescriptor::new("cpus", 0, vec![cpus])]).unwrap();

    let mut tree = ConfigTree::new();
    let parent = tree.add_node(tree.root(), "cpus");
    tree.add_prop(parent, "compatible", PropValue::String("vendor,cpus".into()));
    tree.add_node(parent, "cpu@0");
    tree.add_node(parent, "gpu@0");

    let failures = run(&registry, &tree);
    assert_eq!(failures.len(), 1);
    assert!(failures[0]
        .contains("Node name 'gpu@0' does not match pattern '^cpu(@[0-9a-f]+)?$'"));
}

#[test]
fn sku_map_scenario_reports_two_failures() {
    use dt_schema::phandle::validate_sku_map;

    let board = ElementDesc::node(
        "board",
        ["vendor,board"],
        vec![ElementDesc::prop(
            "sku-map",
            PropDesc::Custom {
                validator: validate_sku_map,
            },
        )],
    );
    let registry = Registry::load(vec![FragmentDescriptor::new("f", 0, vec![board])]).unwrap();

    let mut tree = ConfigTree::new();
    let model = tree.add_node(tree.root(), "model");
    tree.add_prop(model, "compatible", PropValue::String("model".into()));
    tree.register_phandle(1, model);
    let invalid = tree.add_node(tree.root(), "invalid");
    tree.add_prop(invalid, "compatible", PropValue::String("vendor,other".into()));
    tree.register_phandle(2, invalid);

    let board_node = tree.add_node(tree.root(), "board");
    tree.add_prop(board_node, "compatible", PropValue::String("vendor,board".into()));
    tree.add_prop(board_node, "sku-map", PropValue::IntList(vec![5, 2, 5, 1]));

    let failures = run(&registry, &tree);
    let sku_failures: Vec<&String> =
        failures.iter().filter(|f| f.contains("sku")).collect();
    assert_eq!(sku_failures.len(), 2);
    assert!(sku_failures[0].contains("must target a model or submodel"));
    assert!(sku_failures[1].contains("Duplicate sku_id 5"));
}

#[test]
fn raise_mode_aborts_on_first_failure() {
    let registry = widget_registry();
    let tree = widget_tree(&[
        ("index", PropValue::Int(9)),
        ("foo", PropValue::String("bar".into())),
    ]);

    let mut ctx = ValidationContext::new(HashMap::new(), true);
    let err = validate_tree(&registry, &tree, &mut ctx).unwrap_err();
    assert!(err.0.message.contains("out of range"));
    assert_eq!(ctx.failures().len(), 1);
}

#[test]
fn schema_discovered_under_unmatched_ancestor() {
    // The parent has no schema at all, but a deeper node identifies
    // itself via its compatible string and is still validated.
    let registry = widget_registry();
    let mut tree = ConfigTree::new();
    let wrapper = tree.add_node(tree.root(), "wrapper");
    let node = tree.add_node(wrapper, "widget");
    tree.add_prop(node, "compatible", PropValue::String("vendor,widget".into()));

    assert_eq!(
        run(&registry, &tree),
        vec!["/wrapper/widget: Required property 'index' missing"]
    );
}
