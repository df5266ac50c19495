use std::{error, fmt};

use bitflags::bitflags;
use indexmap::IndexMap;
use log::debug;

use crate::bytes::FieldLayout;
use crate::codec::{CodecError, FunctionArgs, Registry};
use crate::eval;
use crate::schema::{Defaults, Expression, Item, Length, Operand, TypeDef, Types};
use crate::value::{Map, Value};

bitflags! {
    /// Debug instrumentation bits, matching the CLI's `-d` level.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugFlags: u8 {
        /// Log the internal cache once a walk finishes.
        const DUMP_CACHE = 0x01;
        /// Log every field read or written, with offset and raw bytes.
        const TRACE_FIELDS = 0x02;
    }
}

impl DebugFlags {
    /// Validate a raw debug level. Bits outside the defined set are fatal.
    pub fn from_level(level: u8) -> Result<Self, Error> {
        Self::from_bits(level).ok_or(Error::InvalidDebugLevel(level))
    }
}

/// Engine errors.
///
/// `EndOfInput` doubles as the reader's clean termination signal; every
/// other kind is fatal and carries the dotted item path where it arose.
#[derive(Debug)]
pub enum Error {
    EndOfInput,
    UnknownType { name: String, path: String },
    UnknownFunction { name: String, path: String },
    UnknownOperator(String),
    UnknownMacro { name: String, path: String },
    InvalidDebugLevel(u8),
    Expression(String),
    BadLength { name: String, path: String },
    Description { reason: String, path: String },
    Source { reason: String, path: String },
    Codec { source: CodecError, path: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfInput => f.write_str("end of input"),
            Self::UnknownType { name, path } => {
                write!(f, "unknown type `{name}` at `{path}`")
            }
            Self::UnknownFunction { name, path } => {
                write!(f, "unknown codec `{name}` at `{path}`")
            }
            Self::UnknownOperator(name) => write!(f, "unknown operator `{name}`"),
            Self::UnknownMacro { name, path } => {
                write!(f, "unknown macro `{name}` at `{path}`")
            }
            Self::InvalidDebugLevel(level) => write!(f, "invalid debug level {level:#04x}"),
            Self::Expression(reason) => write!(f, "bad expression: {reason}"),
            Self::BadLength { name, path } => {
                write!(f, "`{name}` does not name an integer field at `{path}`")
            }
            Self::Description { reason, path } => {
                write!(f, "bad description at `{path}`: {reason}")
            }
            Self::Source { reason, path } => write!(f, "bad source tree at `{path}`: {reason}"),
            Self::Codec { source, path } => write!(f, "codec error at `{path}`: {source}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Codec { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Everything a field read or write needs: where the bytes sit in the
/// stream and which codec interprets them.
#[derive(Debug)]
pub(crate) struct FieldPlan {
    pub layout: FieldLayout,
    pub func: String,
    pub args: FunctionArgs,
}

/// State shared by one reader or writer walk: the merged type table, the
/// internal name-resolution cache and the item path breadcrumb.
///
/// The cache is a single flat namespace per walk; expressions in nested
/// structures may reference any ancestor's primitives.
pub(crate) struct Walk<'a> {
    types: IndexMap<String, TypeDef>,
    constants: &'a IndexMap<String, Value>,
    defaults: &'a Defaults,
    macros: &'a IndexMap<String, Vec<Item>>,
    registry: &'a Registry,
    pub(crate) cache: Map,
    pub(crate) debug: DebugFlags,
    path: Vec<String>,
}

impl<'a> Walk<'a> {
    pub(crate) fn new(types: &'a Types, registry: &'a Registry, debug: DebugFlags) -> Self {
        let mut table = types.types.clone();
        // Registry primitives and the implicit built-ins always resolve,
        // even without a definition in the types description.
        for name in registry.names() {
            table.entry(name.to_string()).or_default();
        }
        for name in ["raw", "text"] {
            table.entry(name.to_string()).or_default();
        }
        Self {
            types: table,
            constants: &types.constants,
            defaults: &types.defaults,
            macros: &types.macros,
            registry,
            cache: Map::new(),
            debug,
            path: Vec::new(),
        }
    }

    pub(crate) fn push_path(&mut self, name: &str) {
        self.path.push(name.to_string());
    }

    pub(crate) fn pop_path(&mut self) {
        self.path.pop();
    }

    pub(crate) fn path_string(&self) -> String {
        if self.path.is_empty() {
            "(top)".to_string()
        } else {
            self.path.join(".")
        }
    }

    fn path_to(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.path.join("."))
        }
    }

    /// Resolve a name through the cache, then the constants. Unresolved
    /// names are literals.
    pub(crate) fn lookup(&self, name: &str) -> Option<&Value> {
        self.cache.get(name).or_else(|| self.constants.get(name))
    }

    fn resolve_str(&self, raw: &str) -> String {
        match self.lookup(raw) {
            Some(Value::Str(s)) => s.clone(),
            _ => raw.to_string(),
        }
    }

    /// The item's data type, with name resolution so a type can be chosen
    /// by a previously parsed field.
    pub(crate) fn resolve_dtype(&self, item: &Item) -> String {
        let raw = item.dtype.as_deref().unwrap_or(&self.defaults.dtype);
        self.resolve_str(raw)
    }

    /// The item's output key, through the item / type / defaults chain.
    pub(crate) fn resolve_name(&self, item: &Item, dtype: &str) -> String {
        item.name
            .clone()
            .or_else(|| self.types.get(dtype).and_then(|t| t.name.clone()))
            .unwrap_or_else(|| self.defaults.name.clone())
    }

    /// A literal length, or a late-bound one resolved through the cache.
    pub(crate) fn resolve_length(&self, length: &Length) -> Result<usize, Error> {
        match length {
            Length::Literal(n) => Ok(*n),
            Length::Name(name) => self
                .lookup(name)
                .and_then(Value::as_int)
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| Error::BadLength {
                    name: name.clone(),
                    path: self.path_string(),
                }),
        }
    }

    /// Determine what to read or write and how to interpret it.
    ///
    /// When neither a delimiter nor a size is given anywhere in the chain,
    /// the field is a single byte. An explicit size of zero reads zero
    /// bytes.
    pub(crate) fn field_plan(&self, item: &Item, dtype: &str) -> Result<FieldPlan, Error> {
        let tdef = self.types.get(dtype).ok_or_else(|| Error::UnknownType {
            name: dtype.to_string(),
            path: self.path_string(),
        })?;

        let delimiter = item
            .delimiter
            .clone()
            .or_else(|| tdef.delimiter.clone())
            .unwrap_or_else(|| self.defaults.delimiter.clone());
        let size = match item.size.as_ref().or(tdef.size.as_ref()).or(self.defaults.size.as_ref()) {
            Some(length) => self.resolve_length(length)?,
            None => usize::from(delimiter.is_empty()),
        };
        let trim = item.trim.or(tdef.trim).or(self.defaults.trim);
        let order = item.order.or(tdef.order).or(self.defaults.order);

        let (func, args) = match &tdef.function {
            Some(spec) => (
                spec.name.clone().unwrap_or_else(|| dtype.to_string()),
                spec.args.clone(),
            ),
            None => (dtype.to_string(), FunctionArgs::default()),
        };

        Ok(FieldPlan {
            layout: FieldLayout {
                size,
                delimiter,
                trim,
                reversed: order == Some(-1),
            },
            func,
            args,
        })
    }

    /// Codec name applied to unknown fields, itself name-resolved.
    pub(crate) fn unknown_function(&self, item: &Item, dtype: &str) -> String {
        let raw = item
            .unknown_function
            .clone()
            .or_else(|| self.types.get(dtype).and_then(|t| t.unknown_function.clone()))
            .unwrap_or_else(|| self.defaults.unknown_function.clone());
        self.resolve_str(&raw)
    }

    /// Sibling queue key for unknown fields.
    pub(crate) fn unknown_destination(&self, item: &Item, dtype: &str) -> String {
        item.unknown_destination
            .clone()
            .or_else(|| {
                self.types
                    .get(dtype)
                    .and_then(|t| t.unknown_destination.clone())
            })
            .unwrap_or_else(|| self.defaults.unknown_destination.clone())
    }

    /// Evaluate an expression against the cache and constants.
    pub(crate) fn evaluate(&self, expression: &Expression) -> Result<Value, Error> {
        let mut operands = Vec::with_capacity(expression.operands.len());
        for operand in &expression.operands {
            operands.push(match operand {
                Operand::Nested(nested) => self.evaluate(nested)?,
                Operand::Literal(value) => self.resolve_operand(value),
            });
        }

        if operands.len() == 1 && expression.operator.is_none() {
            return Ok(operands.remove(0));
        }
        let operator = expression.operator.as_deref().ok_or_else(|| {
            Error::Expression(format!(
                "{} operands with no operator",
                operands.len()
            ))
        })?;
        eval::apply(operator, &operands)
    }

    fn resolve_operand(&self, value: &Value) -> Value {
        match value {
            Value::Str(name) => self.lookup(name).unwrap_or(value).clone(),
            other => other.clone(),
        }
    }

    pub(crate) fn store(&mut self, name: &str, value: Value) {
        self.cache.insert(name.to_string(), value);
    }

    /// Splice a composite codec result into the cache member-wise, so the
    /// members are usable in evaluations.
    pub(crate) fn splice(&mut self, members: &Map) {
        for (member, value) in members {
            self.cache.insert(member.clone(), value.clone());
        }
    }

    pub(crate) fn decode_field(
        &self,
        name: &str,
        plan: &FieldPlan,
        data: &[u8],
    ) -> Result<Value, Error> {
        let codec = self
            .registry
            .get(&plan.func)
            .ok_or_else(|| Error::UnknownFunction {
                name: plan.func.clone(),
                path: self.path_to(name),
            })?;
        codec.decode(data, &plan.args).map_err(|source| Error::Codec {
            source,
            path: self.path_to(name),
        })
    }

    pub(crate) fn encode_field(
        &self,
        name: &str,
        plan: &FieldPlan,
        value: &Value,
    ) -> Result<Vec<u8>, Error> {
        let codec = self
            .registry
            .get(&plan.func)
            .ok_or_else(|| Error::UnknownFunction {
                name: plan.func.clone(),
                path: self.path_to(name),
            })?;
        codec.encode(value, &plan.args).map_err(|source| Error::Codec {
            source,
            path: self.path_to(name),
        })
    }

    /// Log the internal cache once a walk completes.
    pub(crate) fn dump_cache(&self) {
        if !self.debug.contains(DebugFlags::DUMP_CACHE) {
            return;
        }
        debug!("--- internal variables ---");
        for (name, value) in &self.cache {
            debug!("{name}: {value}");
        }
    }

    pub(crate) fn macro_items(&self, name: &str) -> Result<&'a [Item], Error> {
        self.macros
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::UnknownMacro {
                name: name.to_string(),
                path: self.path_string(),
            })
    }
}
