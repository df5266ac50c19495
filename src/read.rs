use log::trace;

use crate::bytes::Cursor;
use crate::codec::Registry;
use crate::engine::{DebugFlags, Error, Walk};
use crate::schema::{Item, Types};
use crate::value::{Map, Value};

/// Reader behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Drop unknown fields from the output instead of queueing them.
    pub prune: bool,
    pub debug: DebugFlags,
}

/// General binary reader: walks a structure description over a byte stream
/// and produces the parsed tree.
///
/// Running out of input is clean termination; the tree holds whatever was
/// parsed up to that point.
#[derive(Debug)]
pub struct Reader {
    /// The parsed tree.
    pub parsed: Map,
    /// Byte offset reached in the input. May point past the end after a
    /// clamped fixed-size read.
    pub offset: usize,
    /// Bytes consumed by unknown (unnamed) fields.
    pub unknown_byte_count: usize,
}

impl Reader {
    /// Read with the standard codec registry and default options.
    pub fn read(data: &[u8], structure: &[Item], types: &Types) -> Result<Self, Error> {
        Self::read_with(
            data,
            structure,
            types,
            &Registry::standard(),
            ReadOptions::default(),
        )
    }

    pub fn read_with(
        data: &[u8],
        structure: &[Item],
        types: &Types,
        functions: &Registry,
        options: ReadOptions,
    ) -> Result<Self, Error> {
        let mut state = ReadState {
            cursor: Cursor::new(data),
            walk: Walk::new(types, functions, options.debug),
            prune: options.prune,
            unknown_byte_count: 0,
        };

        let mut parsed = Map::new();
        match state.parse_items(structure, &mut parsed) {
            // End of input terminates the walk, keeping what was parsed.
            Ok(()) | Err(Error::EndOfInput) => {}
            Err(err) => return Err(err),
        }
        state.walk.dump_cache();

        Ok(Self {
            parsed,
            offset: state.cursor.offset(),
            unknown_byte_count: state.unknown_byte_count,
        })
    }
}

struct ReadState<'a> {
    cursor: Cursor<'a>,
    walk: Walk<'a>,
    prune: bool,
    unknown_byte_count: usize,
}

impl ReadState<'_> {
    fn parse_items(&mut self, items: &[Item], dest: &mut Map) -> Result<(), Error> {
        for item in items {
            if let Some(condition) = &item.condition {
                if !self.walk.evaluate(condition)?.is_truthy() {
                    continue;
                }
            }

            let dtype = self.walk.resolve_dtype(item);
            let name = self.walk.resolve_name(item, &dtype);

            if item.is_primitive() {
                self.parse_primitive(item, &dtype, dest, &name)?;
            } else {
                if self.walk.debug.contains(DebugFlags::TRACE_FIELDS) {
                    trace!("-- {name}");
                }
                self.walk.push_path(&name);
                let result = self.parse_compound(item, dest, &name);
                self.walk.pop_path();
                result?;
            }
        }
        Ok(())
    }

    fn parse_primitive(
        &mut self,
        item: &Item,
        dtype: &str,
        dest: &mut Map,
        name: &str,
    ) -> Result<(), Error> {
        let dtype = if name.is_empty() {
            self.walk.unknown_function(item, dtype)
        } else {
            dtype.to_string()
        };
        let plan = self.walk.field_plan(item, &dtype)?;

        let offset = self.cursor.offset();
        let field = self.cursor.extract(&plan.layout).ok_or(Error::EndOfInput)?;
        if self.walk.debug.contains(DebugFlags::TRACE_FIELDS) {
            trace!(
                "0x{offset:06x}: {} ({}) --> {name}",
                hex::encode(&field),
                plan.layout.size
            );
        }

        let value = self.walk.decode_field(name, &plan, &field)?;
        if name.is_empty() {
            if !self.prune {
                let queue = self.walk.unknown_destination(item, &dtype);
                let path = self.walk.path_string();
                dest.entry(queue)
                    .or_insert_with(|| Value::Seq(Vec::new()))
                    .as_seq_mut()
                    .ok_or_else(|| Error::Description {
                        reason: "unknown destination is not a sequence".to_string(),
                        path,
                    })?
                    .push(value);
            }
            self.unknown_byte_count += plan.layout.size;
        } else {
            // Composite results are spliced into the cache member-wise so
            // expressions can reference them; scalars are cached by name.
            match &value {
                Value::Map(members) => self.walk.splice(members),
                _ => self.walk.store(name, value.clone()),
            }
            dest.insert(name.to_string(), value);
        }
        Ok(())
    }

    fn parse_compound(&mut self, item: &Item, dest: &mut Map, name: &str) -> Result<(), Error> {
        // `while` always starts from a fresh sequence; the other compounds
        // reuse an existing slot, so a repeated name keeps appending.
        if item.while_loop.is_some() {
            dest.insert(name.to_string(), Value::Seq(Vec::new()));
        } else if !dest.contains_key(name) {
            let slot = if item.is_loop() {
                Value::Seq(Vec::new())
            } else {
                Value::Map(Map::new())
            };
            dest.insert(name.to_string(), slot);
        }

        if let Some(count) = &item.repeat {
            let length = self.walk.resolve_length(count)?;
            let structure = self.structure_items(item)?;
            for _ in 0..length {
                let mut entry = Map::new();
                self.parse_items(structure, &mut entry)?;
                self.seq_slot(dest, name)?.push(Value::Map(entry));
            }
        } else if let Some(predicate) = &item.do_while {
            let structure = self.structure_items(item)?;
            loop {
                let mut entry = Map::new();
                self.parse_items(structure, &mut entry)?;
                self.seq_slot(dest, name)?.push(Value::Map(entry));
                if !self.walk.evaluate(predicate)?.is_truthy() {
                    break;
                }
            }
        } else if let Some(clause) = &item.while_loop {
            let structure = self.structure_items(item)?;
            let (delimiter_item, rest) =
                structure.split_first().ok_or_else(|| Error::Description {
                    reason: "`while` needs a leading delimiter item".to_string(),
                    path: self.walk.path_string(),
                })?;
            let delimiter_item = std::slice::from_ref(delimiter_item);

            self.seq_slot(dest, name)?.push(Value::Map(Map::new()));
            self.parse_last(delimiter_item, dest, name)?;
            while self.walk.evaluate(&clause.predicate)?.is_truthy() {
                self.parse_last(rest, dest, name)?;
                self.seq_slot(dest, name)?.push(Value::Map(Map::new()));
                self.parse_last(delimiter_item, dest, name)?;
            }

            // The trailing entry holds only the delimiter field; its value
            // is lifted out of the list as the terminator.
            let trailing = self
                .seq_slot(dest, name)?
                .pop()
                .unwrap_or_else(|| Value::Map(Map::new()));
            let term = trailing
                .as_map()
                .and_then(|entry| entry.values().next())
                .cloned()
                .ok_or_else(|| Error::Description {
                    reason: "`while` delimiter item produced no value".to_string(),
                    path: self.walk.path_string(),
                })?;
            dest.insert(clause.term.clone(), term);
        } else if let Some(macro_name) = &item.macro_name {
            let items = self.walk.macro_items(macro_name)?;
            let target = self.map_slot(dest, name)?;
            self.parse_items(items, target)?;
        } else {
            let structure = self.structure_items(item)?;
            let target = self.map_slot(dest, name)?;
            self.parse_items(structure, target)?;
        }
        Ok(())
    }

    /// Parse into the last element of the sequence under `dest[name]`.
    fn parse_last(&mut self, items: &[Item], dest: &mut Map, name: &str) -> Result<(), Error> {
        let path = self.walk.path_string();
        let entry = dest
            .get_mut(name)
            .and_then(Value::as_seq_mut)
            .and_then(|seq| seq.last_mut())
            .and_then(Value::as_map_mut)
            .ok_or(Error::Description {
                reason: "loop destination is not a sequence of mappings".to_string(),
                path,
            })?;
        self.parse_items(items, entry)
    }

    fn seq_slot<'m>(&self, dest: &'m mut Map, name: &str) -> Result<&'m mut Vec<Value>, Error> {
        dest.get_mut(name)
            .and_then(Value::as_seq_mut)
            .ok_or_else(|| Error::Description {
                reason: "loop destination is not a sequence".to_string(),
                path: self.walk.path_string(),
            })
    }

    fn map_slot<'m>(&self, dest: &'m mut Map, name: &str) -> Result<&'m mut Map, Error> {
        dest.get_mut(name)
            .and_then(Value::as_map_mut)
            .ok_or_else(|| Error::Description {
                reason: "nested destination is not a mapping".to_string(),
                path: self.walk.path_string(),
            })
    }

    fn structure_items<'i>(&self, item: &'i Item) -> Result<&'i [Item], Error> {
        item.structure.as_deref().ok_or_else(|| Error::Description {
            reason: "compound item without nested structure".to_string(),
            path: self.walk.path_string(),
        })
    }
}
