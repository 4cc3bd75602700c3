//! Parser for config source files.
//!
//! The grammar is device-tree-source shaped: an optional `/dts-v1/;`
//! directive, then one or more `/ { ... };` root blocks containing
//! properties and labelled child nodes.

use nom::{
    branch::alt,
    bytes::complete::{escaped, is_a, tag, take_while_m_n},
    character::complete::{
        alphanumeric1, anychar, char, hex_digit1, line_ending, multispace1, one_of, space1, u32,
    },
    combinator::{all_consuming, cut, map, opt, recognize},
    multi::{many0, many1, many_m_n, many_till, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    Finish,
};
use nom_locate::LocatedSpan;

use crate::ast::{Cell, Node, Property, Source, Value};

pub type Input<'a> = LocatedSpan<&'a str>;

type IResult<'a, T> = nom::IResult<Input<'a>, T, nom::error::Error<Input<'a>>>;

/// A syntax error, located in the input text.
#[derive(Debug, Clone, thiserror::Error)]
#[error("syntax error at line {line}, column {column}: unexpected input near '{near}'")]
pub struct ParseError {
    pub line: u32,
    pub column: usize,
    pub near: String,
}

impl ParseError {
    fn at(span: &Input) -> Self {
        let near: String = span.fragment().chars().take(24).collect();
        Self {
            line: span.location_line(),
            column: span.get_utf8_column(),
            near,
        }
    }
}

/// Parse a config source file.
pub fn from_str(s: &str) -> Result<Source, ParseError> {
    match all_consuming(source_file)(Input::new(s)).finish() {
        Ok((_, source)) => Ok(source),
        Err(e) => Err(ParseError::at(&e.input)),
    }
}

/// Parse the top level of a source file.
fn source_file(input: Input) -> IResult<Source> {
    map(
        terminated(
            many0(alt((
                map(version_directive, |_| None),
                map(root_node, Some),
            ))),
            ws,
        ),
        |items| Source {
            roots: items.into_iter().flatten().collect(),
        },
    )(input)
}

/// Parse a version directive.
fn version_directive(input: Input) -> IResult<()> {
    map(terminated(dts_v1_keyword, cut(terminator)), |_| ())(input)
}

/// Parse a root block. Its name is always `/`.
fn root_node(input: Input) -> IResult<Node> {
    map(
        tuple((root_node_name, node_body, cut(terminator))),
        |(_, (props, children), _)| Node {
            name: "/",
            props,
            children,
            ..Default::default()
        },
    )(input)
}

/// Parse a child node, with optional labels and unit address.
fn inner_node(input: Input) -> IResult<Node> {
    map(
        tuple((node_labels, node_name, node_body, cut(terminator))),
        |(labels, (name, unit), (props, children), _)| Node {
            name,
            unit,
            labels,
            props,
            children,
        },
    )(input)
}

/// Recognize the name of a root block.
fn root_node_name(input: Input) -> IResult<Input> {
    lexeme(tag("/"))(input)
}

/// Parse the braced body of a node.
fn node_body(input: Input) -> IResult<(Vec<Property>, Vec<Node>)> {
    preceded(left_brace, cut(terminated(node_contents, right_brace)))(input)
}

/// Parse a list of node labels.
fn node_labels(input: Input) -> IResult<Vec<&str>> {
    many0(terminated(node_label, label_separator))(input)
}

/// Parse a node label.
fn node_label(input: Input) -> IResult<&str> {
    lexeme(map(label_str, |s: Input| *s.fragment()))(input)
}

/// Parse the contents of a node: properties and child nodes, interleaved.
fn node_contents(input: Input) -> IResult<(Vec<Property>, Vec<Node>)> {
    enum Item<'s> {
        Node(Node<'s>),
        Prop(Property<'s>),
    }

    map(
        many0(alt((map(inner_node, Item::Node), map(property, Item::Prop)))),
        |items| {
            let mut props = Vec::new();
            let mut children = Vec::new();
            for item in items {
                match item {
                    Item::Prop(p) => props.push(p),
                    Item::Node(n) => children.push(n),
                }
            }
            (props, children)
        },
    )(input)
}

/// Parse a property. A property without `=` is presence-only.
fn property(input: Input) -> IResult<Property> {
    map(
        tuple((
            prop_name,
            opt(preceded(assignment, cut(prop_values))),
            cut(terminator),
        )),
        |(name, values, _)| Property {
            name,
            values: values.unwrap_or_default(),
        },
    )(input)
}

/// Parse a property name.
fn prop_name(input: Input) -> IResult<&str> {
    lexeme(map(prop_name_str, |s: Input| *s.fragment()))(input)
}

/// Parse a comma-separated property value list.
fn prop_values(input: Input) -> IResult<Vec<Value>> {
    separated_list1(
        list_separator,
        alt((value_cells, value_bytes, value_ref, value_str)),
    )(input)
}

/// Parse a `<...>` cell array. It can be empty.
fn value_cells(input: Input) -> IResult<Value> {
    map(
        preceded(
            left_chevron,
            cut(terminated(many0(alt((cell_ref, cell_num))), right_chevron)),
        ),
        Value::Cells,
    )(input)
}

/// Parse a `[...]` byte string.
fn value_bytes(input: Input) -> IResult<Value> {
    map(
        preceded(
            left_bracket,
            cut(terminated(many1(lexeme(hex_byte)), right_bracket)),
        ),
        Value::Bytes,
    )(input)
}

/// Parse a bare reference value (`serial0 = &uart3;`).
fn value_ref(input: Input) -> IResult<Value> {
    map(node_reference, Value::Ref)(input)
}

/// Parse a string value.
fn value_str(input: Input) -> IResult<Value> {
    lexeme(map(string_literal, |s: Input| Value::Str(*s.fragment())))(input)
}

/// Parse a cell holding a reference to a labelled node.
fn cell_ref(input: Input) -> IResult<Cell> {
    map(node_reference, Cell::Ref)(input)
}

/// Parse a numeric cell.
fn cell_num(input: Input) -> IResult<Cell> {
    lexeme(map(alt((hex_u32, dec_u32)), Cell::Num))(input)
}

/// Parse a node reference: `&` followed by a label.
fn node_reference(input: Input) -> IResult<&str> {
    preceded(
        reference_operator,
        cut(map(label_str, |s: Input| *s.fragment())),
    )(input)
}

/// Parse a node name: an identifier with an optional `@` unit address.
fn node_name(input: Input) -> IResult<(&str, Option<&str>)> {
    delimited(
        ws,
        pair(
            map(node_name_str, |s: Input| *s.fragment()),
            opt(preceded(
                char('@'),
                cut(map(node_name_str, |s: Input| *s.fragment())),
            )),
        ),
        ws,
    )(input)
}

/// Parse a valid string literal.
fn string_literal(input: Input) -> IResult<Input> {
    preceded(double_quote, cut(terminated(printable_ascii, double_quote)))(input)
}

/* === Low-level syntax parsers === */

/// Recognize a double-quote character.
fn double_quote(input: Input) -> IResult<char> {
    lexeme(char('"'))(input)
}

/// Recognize an assignment operator.
fn assignment(input: Input) -> IResult<char> {
    lexeme(char('='))(input)
}

/// Recognize a statement terminator.
fn terminator(input: Input) -> IResult<char> {
    lexeme(char(';'))(input)
}

/// Recognize a list separator.
fn list_separator(input: Input) -> IResult<char> {
    lexeme(char(','))(input)
}

/// Recognize a label separator.
fn label_separator(input: Input) -> IResult<char> {
    lexeme(char(':'))(input)
}

/// Recognize an opening brace.
fn left_brace(input: Input) -> IResult<char> {
    lexeme(char('{'))(input)
}

/// Recognize a closing brace.
fn right_brace(input: Input) -> IResult<char> {
    lexeme(char('}'))(input)
}

/// Recognize an opening chevron.
fn left_chevron(input: Input) -> IResult<char> {
    lexeme(char('<'))(input)
}

/// Recognize a closing chevron.
fn right_chevron(input: Input) -> IResult<char> {
    lexeme(char('>'))(input)
}

/// Recognize an opening bracket.
fn left_bracket(input: Input) -> IResult<char> {
    lexeme(char('['))(input)
}

/// Recognize a closing bracket.
fn right_bracket(input: Input) -> IResult<char> {
    lexeme(char(']'))(input)
}

/// Recognize a reference operator.
fn reference_operator(input: Input) -> IResult<char> {
    lexeme(char('&'))(input)
}

/// Parse an unsigned 32-bit number in base 16, prefixed by `0x`.
fn hex_u32(input: Input) -> IResult<u32> {
    map(
        preceded(alt((tag("0x"), tag("0X"))), cut(hex_digit1)),
        |s: Input| u64::from_str_radix(s.fragment(), 16).unwrap_or(u64::MAX) as u32,
    )(input)
}

/// Parse an unsigned 32-bit number in base 10.
fn dec_u32(input: Input) -> IResult<u32> {
    u32(input)
}

/// Parse a byte represented by two hex digits.
fn hex_byte(input: Input) -> IResult<u8> {
    map(
        take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
        |s: Input| u8::from_str_radix(s.fragment(), 16).unwrap_or(0),
    )(input)
}

/// Recognize a sequence of printable ASCII characters.
fn printable_ascii(input: Input) -> IResult<Input> {
    recognize(many0(escaped(
        alt((
            alphanumeric1,
            space1,
            is_a("!#$%&'()*+,-./:;<=>?@[]^_`{|}~"),
        )),
        '\\',
        one_of("\\\""),
    )))(input)
}

/// Recognize a valid node name string.
fn node_name_str(input: Input) -> IResult<Input> {
    recognize(many_m_n(1, 31, alt((alphanumeric1, is_a(",._+-")))))(input)
}

/// Recognize a valid node label string.
fn label_str(input: Input) -> IResult<Input> {
    recognize(many_m_n(1, 31, alt((alphanumeric1, is_a("_")))))(input)
}

/// Recognize a valid property name string.
fn prop_name_str(input: Input) -> IResult<Input> {
    recognize(many_m_n(1, 31, alt((alphanumeric1, is_a(",._+?#-")))))(input)
}

/// Recognize the `/dts-v1/` keyword.
fn dts_v1_keyword(input: Input) -> IResult<Input> {
    lexeme(tag("/dts-v1/"))(input)
}

/* === Utility functions === */

/// Parse a lexeme using the combinator passed as its argument,
/// also consuming any whitespaces or comments before or after.
fn lexeme<'a, O, F>(f: F) -> impl FnMut(Input<'a>) -> IResult<'a, O>
where
    F: FnMut(Input<'a>) -> IResult<'a, O>,
{
    delimited(ws, f, ws)
}

/// Consume zero or more whitespace characters or comments.
fn ws(input: Input) -> IResult<Input> {
    recognize(many0(alt((multispace1, line_comment, block_comment))))(input)
}

/// Parse a block comment.
fn block_comment(input: Input) -> IResult<Input> {
    recognize(preceded(tag("/*"), many_till(anychar, tag("*/"))))(input)
}

/// Parse a single line comment.
fn line_comment(input: Input) -> IResult<Input> {
    recognize(preceded(tag("//"), many_till(anychar, line_ending)))(input)
}

/* === Unit Tests === */

#[cfg(test)]
mod tests {
    use super::*;

    fn parse<'a, T>(
        mut parser: impl FnMut(Input<'a>) -> IResult<'a, T>,
        input: &'a str,
    ) -> (String, T) {
        let (rest, value) = parser(Input::new(input)).expect(input);
        ((*rest.fragment()).to_owned(), value)
    }

    #[test]
    fn parse_node_names() {
        for (input, exp) in [
            ("cpus", ("cpus", None)),
            ("cpu@0", ("cpu", Some("0"))),
            ("l2-cache", ("l2-cache", None)),
            ("soc_gpio1", ("soc_gpio1", None)),
            ("uart@fe001000", ("uart", Some("fe001000"))),
        ] {
            assert_eq!(parse(node_name, input), (String::new(), exp));
        }
    }

    #[test]
    fn parse_node_labels() {
        for label in ["L3", "L2_0", "mmc0", "eth0", "pinctrl_wifi_pin"] {
            assert_eq!(parse(node_label, label), (String::new(), label));
        }
    }

    #[test]
    fn parse_prop_names() {
        for name in [
            "reg",
            "compatible",
            "#size-cells",
            "#address-cells",
            "vendor,channel-fifo-len",
            "linux,network-index",
        ] {
            assert_eq!(parse(prop_name, name), (String::new(), name));
        }
    }

    #[test]
    fn parse_properties() {
        use Cell::{Num, Ref};
        use Value::{Bytes, Cells, Str};

        for (input, prop) in [
            (
                r#"device_type = "cpu";"#,
                Property {
                    name: "device_type",
                    values: vec![Str("cpu")],
                },
            ),
            (
                r#"compatible = "ns16550", "ns8250";"#,
                Property {
                    name: "compatible",
                    values: vec![Str("ns16550"), Str("ns8250")],
                },
            ),
            (
                r#"reg = <0x101f0000 0x1000>;"#,
                Property {
                    name: "reg",
                    values: vec![Cells(vec![Num(0x101f_0000), Num(0x1000)])],
                },
            ),
            (
                r#"cache-unified;"#,
                Property {
                    name: "cache-unified",
                    values: vec![],
                },
            ),
            (
                r#"audio-codec = <&codec>;"#,
                Property {
                    name: "audio-codec",
                    values: vec![Cells(vec![Ref("codec")])],
                },
            ),
            (
                r#"sku-map = <5 &model_a 7 &model_b>;"#,
                Property {
                    name: "sku-map",
                    values: vec![Cells(vec![
                        Num(5),
                        Ref("model_a"),
                        Num(7),
                        Ref("model_b"),
                    ])],
                },
            ),
            (
                r#"serial0 = &uart3;"#,
                Property {
                    name: "serial0",
                    values: vec![Value::Ref("uart3")],
                },
            ),
            (
                r#"mac-address = [00 1a 2b 3c];"#,
                Property {
                    name: "mac-address",
                    values: vec![Bytes(vec![0x00, 0x1a, 0x2b, 0x3c])],
                },
            ),
            (
                r#"empty-cells = <>;"#,
                Property {
                    name: "empty-cells",
                    values: vec![Cells(vec![])],
                },
            ),
        ] {
            assert_eq!(parse(property, input), (String::new(), prop));
        }
    }

    #[test]
    fn parse_inner_nodes() {
        let input = r#"codec: audio-codec@1a {
            compatible = "vendor,codec";
            reg = <0x1a>; // i2c address
        };"#;

        let (rest, node) = parse(inner_node, input);
        assert_eq!(rest, "");
        assert_eq!(node.name, "audio-codec");
        assert_eq!(node.unit, Some("1a"));
        assert_eq!(node.labels, vec!["codec"]);
        assert_eq!(node.props.len(), 2);
        assert!(node.children.is_empty());
    }

    #[test]
    fn parse_simple_file() {
        let input = r#"
/dts-v1/;

/ {
    compatible = "vendor,board";

    /* The shared audio codec. */
    codec: audio@1a {
        compatible = "vendor,codec";
    };

    sound {
        compatible = "vendor,sound";
        audio-codec = <&codec>;
    };
};

/ {
    model = "Board Rev 2";
};
"#;

        let source = from_str(input).unwrap();
        assert_eq!(source.roots.len(), 2);
        assert_eq!(source.roots[0].children.len(), 2);
        assert_eq!(source.roots[1].props[0].name, "model");
    }

    #[test]
    fn syntax_errors_carry_a_location() {
        let err = from_str("/ {\n    oops = ;\n};\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.to_string().contains("line 2"));
    }
}
