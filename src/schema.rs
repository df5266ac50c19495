use indexmap::IndexMap;
use serde::Deserialize;

use crate::codec::FunctionArgs;
use crate::value::Value;

/// A structure description: the ordered sequence of items the interpreter
/// walks, in stream order.
pub type Structure = Vec<Item>;

/// One item of a structure description.
///
/// An item without `structure` and `macro` is a primitive and consumes bytes
/// directly; anything else is a compound. Unrecognized keys in the source
/// document are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Item {
    /// Output key. Empty or absent marks an unknown (raw) field.
    pub name: Option<String>,
    /// Primitive type name, resolved against the types description.
    #[serde(rename = "type")]
    pub dtype: Option<String>,
    /// Fixed field size, literal or the name of a previously parsed field.
    pub size: Option<Length>,
    /// Byte sequence terminating a variable-length field.
    pub delimiter: Option<Vec<u8>>,
    /// Padding byte stripped from the end of the field on read.
    pub trim: Option<u8>,
    /// `-1` reverses the field bytes before decoding / after encoding.
    pub order: Option<i64>,
    /// Skip this item when the expression is falsy.
    #[serde(rename = "if")]
    pub condition: Option<Expression>,
    /// Nested items; makes this item a compound.
    pub structure: Option<Vec<Item>>,
    /// Repeat the nested structure a fixed or late-bound number of times.
    #[serde(rename = "for")]
    pub repeat: Option<Length>,
    /// Repeat the nested structure while the expression is truthy,
    /// evaluated after each iteration.
    pub do_while: Option<Expression>,
    /// Repeat with a leading delimiter item and a preserved terminator.
    #[serde(rename = "while")]
    pub while_loop: Option<WhileClause>,
    /// Expand a named substructure from the `macros` table.
    #[serde(rename = "macro")]
    pub macro_name: Option<String>,
    /// Sibling key unknown fields are queued under, overriding the default.
    pub unknown_destination: Option<String>,
    /// Codec applied to unknown fields, overriding the default.
    pub unknown_function: Option<String>,
}

impl Item {
    /// An item with neither `structure` nor `macro` reads or writes bytes
    /// itself.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.structure.is_none() && self.macro_name.is_none()
    }

    /// Loop modifiers turn a compound's destination into a sequence.
    #[must_use]
    pub fn is_loop(&self) -> bool {
        self.repeat.is_some() || self.do_while.is_some() || self.while_loop.is_some()
    }
}

/// A size or loop count: either a literal or the name of an integer field
/// resolved through the internal cache at use time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Length {
    Literal(usize),
    Name(String),
}

impl std::fmt::Display for Length {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(n) => write!(f, "{n}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// An operator applied to resolved operands.
///
/// A single operand with no operator evaluates to that operand, which lets
/// descriptions use `{operands: [flag]}` as a bare variable reference.
#[derive(Debug, Clone, Deserialize)]
pub struct Expression {
    pub operator: Option<String>,
    #[serde(default)]
    pub operands: Vec<Operand>,
}

/// Expression operands are scalars (names or literals) or nested
/// expressions.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Nested(Expression),
    Literal(Value),
}

/// The `while` clause: a predicate plus the key under which the terminating
/// value is stored once the loop ends.
#[derive(Debug, Clone, Deserialize)]
pub struct WhileClause {
    #[serde(flatten)]
    pub predicate: Expression,
    pub term: String,
}

/// The types description: constants, per-item defaults, type definitions
/// and reusable macros.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Types {
    /// Read-only names visible to the evaluator.
    pub constants: IndexMap<String, Value>,
    /// Fallbacks for per-item keys.
    pub defaults: Defaults,
    /// Type name to definition.
    pub types: IndexMap<String, TypeDef>,
    /// Reusable structure fragments, referenced by `macro`.
    pub macros: IndexMap<String, Vec<Item>>,
}

/// Global defaults, pre-populated with the hard-coded fallbacks and
/// overridden key-by-key by the caller's `defaults` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub delimiter: Vec<u8>,
    pub name: String,
    pub size: Option<Length>,
    #[serde(rename = "type")]
    pub dtype: String,
    pub unknown_destination: String,
    pub unknown_function: String,
    pub trim: Option<u8>,
    pub order: Option<i64>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            delimiter: Vec::new(),
            name: String::new(),
            size: None,
            dtype: "text".to_string(),
            unknown_destination: "__raw__".to_string(),
            unknown_function: "raw".to_string(),
            trim: None,
            order: None,
        }
    }
}

/// A type definition. Any key absent here falls through to the global
/// defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TypeDef {
    pub name: Option<String>,
    pub size: Option<Length>,
    pub delimiter: Option<Vec<u8>>,
    pub trim: Option<u8>,
    pub order: Option<i64>,
    pub function: Option<FunctionSpec>,
    pub unknown_destination: Option<String>,
    pub unknown_function: Option<String>,
}

/// The codec behind a type: a registry name plus its keyword arguments.
/// When the name is absent the type's own name is used.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FunctionSpec {
    pub name: Option<String>,
    pub args: FunctionArgs,
}
