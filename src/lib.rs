//! Data-driven binary codec
//!
//! A structure description (what the stream looks like) and a types
//! description (how each primitive is interpreted) drive both directions:
//! [`Reader`] turns bytes into a nested tree of named values, [`Writer`]
//! turns that tree back into the original bytes.

/// Cursor I/O: field extraction and emission
pub mod bytes;
/// Codec registry and the built-in codec pairs
pub mod codec;
/// Shared walk state and errors
pub mod engine;
mod eval;
/// Structure interpreter, reading direction
pub mod read;
/// Structure and types description model
pub mod schema;
/// Parsed-tree value model
pub mod value;
/// Structure interpreter, writing direction
pub mod write;

pub use self::codec::{Codec, CodecError, FunctionArgs, Registry};
pub use self::engine::{DebugFlags, Error};
pub use self::read::{ReadOptions, Reader};
pub use self::schema::{Item, Structure, Types};
pub use self::value::{Map, Value};
pub use self::write::Writer;
