use std::collections::HashMap;
use std::sync::Once;
use std::{error, fmt};

use indexmap::IndexMap;
use log::warn;
use serde::Deserialize;

use crate::value::{Map, Value};

/// Substitution table used by `struct`, `flags`, `map` and `date`: raw
/// integer value to replacement name.
pub type Annotation = IndexMap<i64, String>;

/// Keyword arguments handed to a codec, taken from a type definition's
/// `function.args` mapping.
///
/// The named fields cover the built-in codecs; anything else lands in
/// `extra` for caller-registered codecs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FunctionArgs {
    pub fmt: Option<String>,
    pub labels: Option<Vec<String>>,
    pub annotation: Option<Annotation>,
    pub split: Option<Vec<u8>>,
    pub encoding: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// Codec failures.
#[derive(Debug, Clone)]
pub enum CodecError {
    /// Field length does not match what the codec expects.
    Size { expected: usize, actual: usize },
    /// Malformed input bytes or format string.
    Format(String),
    /// A value of the wrong shape was handed to an encoder.
    Value(String),
    /// Unknown encoding label, or bytes invalid for the named encoding.
    Encoding(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size { expected, actual } => {
                write!(f, "field size mismatch: expected {expected}, got {actual}")
            }
            Self::Format(msg) => write!(f, "bad format: {msg}"),
            Self::Value(msg) => write!(f, "bad value: {msg}"),
            Self::Encoding(msg) => write!(f, "bad encoding: {msg}"),
        }
    }
}

impl error::Error for CodecError {}

/// A matched decoder/encoder pair.
///
/// The pair must be invertible: `encode(decode(b, a), a) == b` for every
/// byte string `b` the decoder accepts under args `a`.
pub trait Codec {
    fn decode(&self, data: &[u8], args: &FunctionArgs) -> Result<Value, CodecError>;
    fn encode(&self, value: &Value, args: &FunctionArgs) -> Result<Vec<u8>, CodecError>;
}

/// Codec registry: one slot per name, both halves of the pair in the slot.
///
/// This is the engine's extension point; callers may register additional
/// codecs or override the built-ins.
pub struct Registry {
    slots: HashMap<String, Box<dyn Codec>>,
}

impl Registry {
    /// Registry with the stable built-ins (`raw`, `bit`, `struct`, `text`,
    /// `flags`) and the deprecated basic types (`int`, `float`, `colour`,
    /// `date`, `map`).
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self {
            slots: HashMap::new(),
        };
        registry.register("raw", Raw);
        registry.register("bit", Bit);
        registry.register("struct", Pack);
        registry.register("text", Text);
        registry.register("flags", Flags);
        registry.register("int", Int);
        registry.register("float", Float);
        registry.register("colour", Colour);
        registry.register("date", Date);
        registry.register("map", Mapped);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, codec: impl Codec + 'static) {
        self.slots.insert(name.into(), Box::new(codec));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Codec> {
        self.slots.get(name).map(|codec| &**codec)
    }

    /// Registered names, used to seed the implicit type table.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("slots", &names).finish()
    }
}

fn inverse(annotation: &Annotation) -> IndexMap<&str, i64> {
    annotation.iter().map(|(&k, v)| (v.as_str(), k)).collect()
}

static DEPRECATION: Once = Once::new();

fn deprecation_warning(name: &str) {
    DEPRECATION.call_once(|| {
        warn!("type `{name}` is deprecated, use `struct` instead");
    });
}

/// Hex representation of a byte buffer, grouped per byte (`"00 01 02"`).
pub struct Raw;

impl Codec for Raw {
    fn decode(&self, data: &[u8], _args: &FunctionArgs) -> Result<Value, CodecError> {
        let groups: Vec<String> = data.iter().map(|b| format!("{b:02x}")).collect();
        Ok(Value::Str(groups.join(" ")))
    }

    fn encode(&self, value: &Value, _args: &FunctionArgs) -> Result<Vec<u8>, CodecError> {
        let text = value
            .as_str()
            .ok_or_else(|| CodecError::Value("raw field must be a hex string".to_string()))?;
        let compact: String = text.split_whitespace().collect();
        hex::decode(&compact).map_err(|e| CodecError::Format(e.to_string()))
    }
}

/// Eight-character binary representation of a single byte.
pub struct Bit;

impl Codec for Bit {
    fn decode(&self, data: &[u8], _args: &FunctionArgs) -> Result<Value, CodecError> {
        let [byte] = data else {
            return Err(CodecError::Size {
                expected: 1,
                actual: data.len(),
            });
        };
        Ok(Value::Str(format!("{byte:08b}")))
    }

    fn encode(&self, value: &Value, _args: &FunctionArgs) -> Result<Vec<u8>, CodecError> {
        let text = value
            .as_str()
            .ok_or_else(|| CodecError::Value("bit field must be a binary string".to_string()))?;
        let byte =
            u8::from_str_radix(text, 2).map_err(|e| CodecError::Format(e.to_string()))?;
        Ok(vec![byte])
    }
}

/// One unit of a `struct` format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Char,
}

impl Unit {
    fn width(self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::Char => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }
}

fn parse_format(fmt: &str) -> Result<(bool, Vec<Unit>), CodecError> {
    let mut chars = fmt.chars().peekable();
    let little = match chars.peek() {
        Some('<') => {
            chars.next();
            true
        }
        Some('>') => {
            chars.next();
            false
        }
        _ => true,
    };

    let mut units = Vec::new();
    let mut repeat: Option<usize> = None;
    for c in chars {
        if let Some(digit) = c.to_digit(10) {
            repeat = Some(repeat.unwrap_or(0) * 10 + digit as usize);
            continue;
        }
        let unit = match c {
            'b' => Unit::I8,
            'B' => Unit::U8,
            'h' => Unit::I16,
            'H' => Unit::U16,
            'i' | 'l' => Unit::I32,
            'I' | 'L' => Unit::U32,
            'q' => Unit::I64,
            'Q' => Unit::U64,
            'f' => Unit::F32,
            'd' => Unit::F64,
            'c' => Unit::Char,
            other => {
                return Err(CodecError::Format(format!(
                    "unsupported format character `{other}`"
                )));
            }
        };
        for _ in 0..repeat.take().unwrap_or(1) {
            units.push(unit);
        }
    }
    Ok((little, units))
}

fn unpack_unit(unit: Unit, bytes: &[u8], little: bool) -> Result<Value, CodecError> {
    let mut buf = bytes.to_vec();
    if !little {
        buf.reverse();
    }
    // `buf` is now little-endian.
    let raw = buf
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    Ok(match unit {
        Unit::I8 => Value::Int(i64::from(raw as u8 as i8)),
        Unit::U8 => Value::Int(i64::from(raw as u8)),
        Unit::I16 => Value::Int(i64::from(raw as u16 as i16)),
        Unit::U16 => Value::Int(i64::from(raw as u16)),
        Unit::I32 => Value::Int(i64::from(raw as u32 as i32)),
        Unit::U32 => Value::Int(i64::from(raw as u32)),
        Unit::I64 => Value::Int(raw as i64),
        Unit::U64 => Value::Int(
            i64::try_from(raw).map_err(|_| CodecError::Format("u64 out of range".to_string()))?,
        ),
        Unit::F32 => Value::Float(f64::from(f32::from_bits(raw as u32))),
        Unit::F64 => Value::Float(f64::from_bits(raw)),
        Unit::Char => Value::Str(
            std::str::from_utf8(bytes)
                .map_err(|_| CodecError::Format("non-ascii `c` unit".to_string()))?
                .to_string(),
        ),
    })
}

fn pack_unit(unit: Unit, value: &Value, little: bool) -> Result<Vec<u8>, CodecError> {
    fn int_bytes(value: &Value, width: usize, min: i64, max: i64) -> Result<Vec<u8>, CodecError> {
        let i = value
            .as_int()
            .ok_or_else(|| CodecError::Value(format!("expected an integer, got `{value}`")))?;
        if i < min || i > max {
            return Err(CodecError::Value(format!("integer {i} out of range")));
        }
        Ok((i as u64).to_le_bytes()[..width].to_vec())
    }

    let mut buf = match unit {
        Unit::I8 => int_bytes(value, 1, i64::from(i8::MIN), i64::from(i8::MAX))?,
        Unit::U8 => int_bytes(value, 1, 0, i64::from(u8::MAX))?,
        Unit::I16 => int_bytes(value, 2, i64::from(i16::MIN), i64::from(i16::MAX))?,
        Unit::U16 => int_bytes(value, 2, 0, i64::from(u16::MAX))?,
        Unit::I32 => int_bytes(value, 4, i64::from(i32::MIN), i64::from(i32::MAX))?,
        Unit::U32 => int_bytes(value, 4, 0, i64::from(u32::MAX))?,
        Unit::I64 | Unit::U64 => int_bytes(value, 8, i64::MIN, i64::MAX)?,
        Unit::F32 => {
            let x = match value {
                Value::Float(x) => *x,
                Value::Int(i) => *i as f64,
                other => {
                    return Err(CodecError::Value(format!("expected a float, got `{other}`")));
                }
            };
            (x as f32).to_le_bytes().to_vec()
        }
        Unit::F64 => {
            let x = match value {
                Value::Float(x) => *x,
                Value::Int(i) => *i as f64,
                other => {
                    return Err(CodecError::Value(format!("expected a float, got `{other}`")));
                }
            };
            x.to_le_bytes().to_vec()
        }
        Unit::Char => {
            let s = value
                .as_str()
                .ok_or_else(|| CodecError::Value("`c` unit takes a string".to_string()))?;
            if s.len() != 1 {
                return Err(CodecError::Value(format!(
                    "`c` unit takes a single character, got `{s}`"
                )));
            }
            s.as_bytes().to_vec()
        }
    };
    if !little {
        buf.reverse();
    }
    Ok(buf)
}

/// Multi-purpose basic-type codec driven by a packing format string.
///
/// `fmt` takes an optional `<`/`>` endian marker (little-endian when
/// absent) followed by unit codes with optional decimal repeat counts:
/// `b B` 8-bit, `h H` 16-bit, `i I l L` 32-bit, `q Q` 64-bit, `f d`
/// floats, `c` a single character. A single decoded unit is returned bare;
/// several become a sequence, or a mapping when `labels` is given.
/// `annotation` substitutes decoded integers through a name table.
pub struct Pack;

impl Codec for Pack {
    fn decode(&self, data: &[u8], args: &FunctionArgs) -> Result<Value, CodecError> {
        let (little, units) = parse_format(args.fmt.as_deref().unwrap_or("b"))?;
        let expected: usize = units.iter().map(|u| u.width()).sum();
        if data.len() != expected {
            return Err(CodecError::Size {
                expected,
                actual: data.len(),
            });
        }

        let mut decoded = Vec::with_capacity(units.len());
        let mut rest = data;
        for &unit in &units {
            let (bytes, tail) = rest.split_at(unit.width());
            decoded.push(unpack_unit(unit, bytes, little)?);
            rest = tail;
        }

        if let Some(annotation) = &args.annotation {
            for value in &mut decoded {
                if let Some(name) = value.as_int().and_then(|i| annotation.get(&i)) {
                    *value = Value::Str(name.clone());
                }
            }
        }

        if decoded.len() > 1 {
            if let Some(labels) = &args.labels {
                let map: Map = labels.iter().cloned().zip(decoded).collect();
                return Ok(Value::Map(map));
            }
            return Ok(Value::Seq(decoded));
        }
        decoded
            .pop()
            .ok_or_else(|| CodecError::Format("empty format".to_string()))
    }

    fn encode(&self, value: &Value, args: &FunctionArgs) -> Result<Vec<u8>, CodecError> {
        let (little, units) = parse_format(args.fmt.as_deref().unwrap_or("b"))?;

        let mut values: Vec<Value> = match value {
            Value::Map(map) => {
                let labels = args.labels.as_ref().ok_or_else(|| {
                    CodecError::Value("labelled value without `labels`".to_string())
                })?;
                labels
                    .iter()
                    .map(|label| {
                        map.get(label).cloned().ok_or_else(|| {
                            CodecError::Value(format!("missing labelled member `{label}`"))
                        })
                    })
                    .collect::<Result<_, _>>()?
            }
            Value::Seq(seq) => seq.clone(),
            other => vec![other.clone()],
        };

        if let Some(annotation) = &args.annotation {
            let inverse = inverse(annotation);
            for value in &mut values {
                if let Some(&raw) = value.as_str().and_then(|s| inverse.get(s)) {
                    *value = Value::Int(raw);
                }
            }
        }

        if values.len() != units.len() {
            return Err(CodecError::Size {
                expected: units.len(),
                actual: values.len(),
            });
        }
        let mut out = Vec::new();
        for (unit, value) in units.iter().zip(&values) {
            out.extend(pack_unit(*unit, value, little)?);
        }
        Ok(out)
    }
}

/// Byte sequence decoded in a named character encoding.
///
/// `encoding` is an `encoding_rs` label (`utf-8` when absent); `split`
/// replaces an internal byte delimiter with logical newlines.
pub struct Text;

impl Text {
    fn encoding(args: &FunctionArgs) -> Result<&'static encoding_rs::Encoding, CodecError> {
        let label = args.encoding.as_deref().unwrap_or("utf-8");
        encoding_rs::Encoding::for_label(label.as_bytes())
            .ok_or_else(|| CodecError::Encoding(format!("unknown encoding `{label}`")))
    }

    fn separator(split: &[u8]) -> String {
        split.iter().map(|&b| char::from(b)).collect()
    }
}

impl Codec for Text {
    fn decode(&self, data: &[u8], args: &FunctionArgs) -> Result<Value, CodecError> {
        let encoding = Self::encoding(args)?;
        let decoded = encoding
            .decode_without_bom_handling_and_without_replacement(data)
            .ok_or_else(|| {
                CodecError::Encoding(format!("invalid {} data", encoding.name()))
            })?;
        let text = match &args.split {
            Some(split) if !split.is_empty() => {
                decoded.replace(&Self::separator(split), "\n")
            }
            _ => decoded.into_owned(),
        };
        Ok(Value::Str(text))
    }

    fn encode(&self, value: &Value, args: &FunctionArgs) -> Result<Vec<u8>, CodecError> {
        let encoding = Self::encoding(args)?;
        let text = value
            .as_str()
            .ok_or_else(|| CodecError::Value("text field must be a string".to_string()))?;
        let joined = match &args.split {
            Some(split) if !split.is_empty() => text.replace('\n', &Self::separator(split)),
            _ => text.to_string(),
        };
        let (bytes, _, unmappable) = encoding.encode(&joined);
        if unmappable {
            return Err(CodecError::Encoding(format!(
                "text not representable in {}",
                encoding.name()
            )));
        }
        Ok(bytes.into_owned())
    }
}

/// A single byte exploded into eight named flags.
///
/// Bits present in the annotation always appear with their boolean state;
/// unannotated bits appear as `flag_<hex>` only when set.
pub struct Flags;

impl Codec for Flags {
    fn decode(&self, data: &[u8], args: &FunctionArgs) -> Result<Value, CodecError> {
        let [bitfield] = data else {
            return Err(CodecError::Size {
                expected: 1,
                actual: data.len(),
            });
        };
        let empty = Annotation::new();
        let annotation = args.annotation.as_ref().unwrap_or(&empty);

        let mut flags = Map::new();
        for bit in 0..8 {
            let flag = 1u8 << bit;
            let set = bitfield & flag != 0;
            match annotation.get(&i64::from(flag)) {
                Some(name) => {
                    flags.insert(name.clone(), Value::Bool(set));
                }
                None if set => {
                    flags.insert(format!("flag_{flag:02x}"), Value::Bool(true));
                }
                None => {}
            }
        }
        Ok(Value::Map(flags))
    }

    fn encode(&self, value: &Value, args: &FunctionArgs) -> Result<Vec<u8>, CodecError> {
        let flags = value
            .as_map()
            .ok_or_else(|| CodecError::Value("flags field must be a mapping".to_string()))?;
        let empty = Annotation::new();
        let inverse = inverse(args.annotation.as_ref().unwrap_or(&empty));

        let mut bitfield = 0u8;
        for (name, state) in flags {
            if !state.is_truthy() {
                continue;
            }
            let flag = match inverse.get(name.as_str()) {
                Some(&flag) => u8::try_from(flag)
                    .map_err(|_| CodecError::Value(format!("flag `{name}` out of range")))?,
                None => {
                    let hex = name.strip_prefix("flag_").ok_or_else(|| {
                        CodecError::Value(format!("unannotated flag `{name}`"))
                    })?;
                    u8::from_str_radix(hex, 16)
                        .map_err(|e| CodecError::Format(e.to_string()))?
                }
            };
            bitfield |= flag;
        }
        Ok(vec![bitfield])
    }
}

/// Little-endian integer of arbitrary field width. Deprecated alias for
/// `struct` with an integer format.
pub struct Int;

fn int_decode(data: &[u8]) -> Result<i64, CodecError> {
    if data.len() > 8 {
        return Err(CodecError::Size {
            expected: 8,
            actual: data.len(),
        });
    }
    Ok(data
        .iter()
        .rev()
        .fold(0i64, |acc, &b| (acc << 8) | i64::from(b)))
}

fn int_encode(mut value: i64) -> Result<Vec<u8>, CodecError> {
    if value < 0 {
        return Err(CodecError::Value(format!("negative integer {value}")));
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push((value & 0xff) as u8);
        value >>= 8;
    }
    if out.is_empty() {
        out.push(0x00);
    }
    Ok(out)
}

impl Codec for Int {
    fn decode(&self, data: &[u8], _args: &FunctionArgs) -> Result<Value, CodecError> {
        deprecation_warning("int");
        int_decode(data).map(Value::Int)
    }

    fn encode(&self, value: &Value, _args: &FunctionArgs) -> Result<Vec<u8>, CodecError> {
        deprecation_warning("int");
        let i = value
            .as_int()
            .ok_or_else(|| CodecError::Value("int field must be an integer".to_string()))?;
        int_encode(i)
    }
}

/// Big-endian IEEE 754 single precision. Deprecated alias for `struct`
/// with `fmt: '>f'`.
pub struct Float;

impl Codec for Float {
    fn decode(&self, data: &[u8], _args: &FunctionArgs) -> Result<Value, CodecError> {
        deprecation_warning("float");
        let bytes: [u8; 4] = data.try_into().map_err(|_| CodecError::Size {
            expected: 4,
            actual: data.len(),
        })?;
        Ok(Value::Float(f64::from(f32::from_be_bytes(bytes))))
    }

    fn encode(&self, value: &Value, _args: &FunctionArgs) -> Result<Vec<u8>, CodecError> {
        deprecation_warning("float");
        let x = match value {
            Value::Float(x) => *x,
            Value::Int(i) => *i as f64,
            other => {
                return Err(CodecError::Value(format!("expected a float, got `{other}`")));
            }
        };
        Ok((x as f32).to_be_bytes().to_vec())
    }
}

/// Little-endian integer rendered as `0x%06x`. Deprecated.
pub struct Colour;

impl Codec for Colour {
    fn decode(&self, data: &[u8], _args: &FunctionArgs) -> Result<Value, CodecError> {
        deprecation_warning("colour");
        int_decode(data).map(|i| Value::Str(format!("0x{i:06x}")))
    }

    fn encode(&self, value: &Value, _args: &FunctionArgs) -> Result<Vec<u8>, CodecError> {
        deprecation_warning("colour");
        let text = value
            .as_str()
            .ok_or_else(|| CodecError::Value("colour field must be a string".to_string()))?;
        let i = i64::from_str_radix(text.trim_start_matches("0x"), 16)
            .map_err(|e| CodecError::Format(e.to_string()))?;
        int_encode(i)
    }
}

/// Integer date with named special cases. Deprecated.
pub struct Date;

impl Codec for Date {
    fn decode(&self, data: &[u8], args: &FunctionArgs) -> Result<Value, CodecError> {
        deprecation_warning("date");
        let date = int_decode(data)?;
        let empty = Annotation::new();
        let annotation = args.annotation.as_ref().unwrap_or(&empty);
        Ok(Value::Str(
            annotation
                .get(&date)
                .cloned()
                .unwrap_or_else(|| date.to_string()),
        ))
    }

    fn encode(&self, value: &Value, args: &FunctionArgs) -> Result<Vec<u8>, CodecError> {
        deprecation_warning("date");
        let text = value
            .as_str()
            .ok_or_else(|| CodecError::Value("date field must be a string".to_string()))?;
        let empty = Annotation::new();
        let inverse = inverse(args.annotation.as_ref().unwrap_or(&empty));
        let date = match inverse.get(text) {
            Some(&raw) => raw,
            None => text
                .parse::<i64>()
                .map_err(|e| CodecError::Format(e.to_string()))?,
        };
        int_encode(date)
    }
}

/// A single byte replaced by its annotation, with a two-digit hex fallback.
/// Deprecated.
pub struct Mapped;

impl Codec for Mapped {
    fn decode(&self, data: &[u8], args: &FunctionArgs) -> Result<Value, CodecError> {
        deprecation_warning("map");
        let [index] = data else {
            return Err(CodecError::Size {
                expected: 1,
                actual: data.len(),
            });
        };
        let empty = Annotation::new();
        let annotation = args.annotation.as_ref().unwrap_or(&empty);
        Ok(Value::Str(
            annotation
                .get(&i64::from(*index))
                .cloned()
                .unwrap_or_else(|| format!("{index:02x}")),
        ))
    }

    fn encode(&self, value: &Value, args: &FunctionArgs) -> Result<Vec<u8>, CodecError> {
        deprecation_warning("map");
        let text = value
            .as_str()
            .ok_or_else(|| CodecError::Value("map field must be a string".to_string()))?;
        let empty = Annotation::new();
        let inverse = inverse(args.annotation.as_ref().unwrap_or(&empty));
        let index = match inverse.get(text) {
            Some(&raw) => u8::try_from(raw)
                .map_err(|_| CodecError::Value(format!("annotation for `{text}` out of range")))?,
            None => u8::from_str_radix(text, 16).map_err(|e| CodecError::Format(e.to_string()))?,
        };
        Ok(vec![index])
    }
}
