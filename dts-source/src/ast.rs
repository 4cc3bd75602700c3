//! Syntax tree for config source files, borrowing from the input text.

/// A parsed source file: one or more root blocks, merged later in document
/// order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Source<'s> {
    pub roots: Vec<Node<'s>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<'s> {
    /// Name without the unit address.
    pub name: &'s str,
    /// Unit address, if the name carried one (`serial@1000`).
    pub unit: Option<&'s str>,
    pub labels: Vec<&'s str>,
    pub props: Vec<Property<'s>>,
    pub children: Vec<Node<'s>>,
}

impl<'s> Default for Node<'s> {
    fn default() -> Self {
        Self {
            name: "",
            unit: None,
            labels: Vec::new(),
            props: Vec::new(),
            children: Vec::new(),
        }
    }
}

impl<'s> Node<'s> {
    /// The full node name, unit address included.
    pub fn full_name(&self) -> String {
        match self.unit {
            Some(unit) => format!("{}@{}", self.name, unit),
            None => self.name.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property<'s> {
    pub name: &'s str,
    pub values: Vec<Value<'s>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<'s> {
    Str(&'s str),
    /// A `<...>` cell array of numbers and label references.
    Cells(Vec<Cell<'s>>),
    /// A `[...]` byte string.
    Bytes(Vec<u8>),
    /// A bare `&label` reference outside a cell array.
    Ref(&'s str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell<'s> {
    Num(u32),
    Ref(&'s str),
}
