use log::{trace, warn};

use crate::bytes;
use crate::codec::Registry;
use crate::engine::{DebugFlags, Error, Walk};
use crate::schema::{Item, Length, Operand, Types, WhileClause};
use crate::value::{Map, Value};

/// General binary writer: walks a structure description over a parsed tree
/// and produces the byte stream a reader would have consumed.
#[derive(Debug)]
pub struct Writer {
    /// The encoded byte stream.
    pub data: Vec<u8>,
}

impl Writer {
    /// Write with the standard codec registry.
    pub fn write(parsed: &Map, structure: &[Item], types: &Types) -> Result<Self, Error> {
        Self::write_with(
            parsed,
            structure,
            types,
            &Registry::standard(),
            DebugFlags::default(),
        )
    }

    pub fn write_with(
        parsed: &Map,
        structure: &[Item],
        types: &Types,
        functions: &Registry,
        debug: DebugFlags,
    ) -> Result<Self, Error> {
        let mut state = WriteState {
            walk: Walk::new(types, functions, debug),
            data: Vec::new(),
        };
        state.encode_items(structure, parsed)?;
        state.walk.dump_cache();
        Ok(Self { data: state.data })
    }
}

struct WriteState<'a> {
    walk: Walk<'a>,
    data: Vec<u8>,
}

impl WriteState<'_> {
    fn encode_items(&mut self, items: &[Item], source: &Map) -> Result<(), Error> {
        // Unknown fields are replayed from the front of their queue, one
        // per unnamed item, in this parent scope.
        let mut unknown_index = 0usize;

        for item in items {
            // Items already written in this walk are cached, so predicates
            // see the same names a reader would have seen at this point.
            if let Some(condition) = &item.condition {
                if !self.walk.evaluate(condition)?.is_truthy() {
                    continue;
                }
            }

            let mut dtype = self.walk.resolve_dtype(item);
            let name = self.walk.resolve_name(item, &dtype);

            let value = if name.is_empty() {
                dtype = self.walk.unknown_function(item, &dtype);
                let queue_name = self.walk.unknown_destination(item, &dtype);
                let queue = source
                    .get(&queue_name)
                    .and_then(Value::as_seq)
                    .ok_or_else(|| Error::Source {
                        reason: format!("missing unknown-field queue `{queue_name}`"),
                        path: self.walk.path_string(),
                    })?;
                let value = queue.get(unknown_index).cloned().ok_or_else(|| {
                    Error::Source {
                        reason: format!("unknown-field queue `{queue_name}` exhausted"),
                        path: self.walk.path_string(),
                    }
                })?;
                unknown_index += 1;
                value
            } else {
                source.get(&name).cloned().ok_or_else(|| Error::Source {
                    reason: format!("missing field `{name}`"),
                    path: self.walk.path_string(),
                })?
            };

            if item.is_primitive() {
                self.encode_primitive(item, &dtype, &name, &value)?;
            } else {
                if self.walk.debug.contains(DebugFlags::TRACE_FIELDS) {
                    trace!("-- {name}");
                }
                self.walk.push_path(&name);
                let result = self.encode_compound(item, source, &name, &value);
                self.walk.pop_path();
                result?;
            }
        }
        Ok(())
    }

    fn encode_primitive(
        &mut self,
        item: &Item,
        dtype: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), Error> {
        let plan = self.walk.field_plan(item, dtype)?;

        // Mirror the reader's cache population order.
        match value {
            Value::Map(members) => self.walk.splice(members),
            _ if !name.is_empty() => self.walk.store(name, value.clone()),
            _ => {}
        }

        if self.walk.debug.contains(DebugFlags::TRACE_FIELDS) {
            trace!("0x{:06x}: {name} --> {value}", self.data.len());
        }
        let encoded = self.walk.encode_field(name, &plan, value)?;
        bytes::emit(&mut self.data, &encoded, &plan.layout);
        Ok(())
    }

    fn encode_compound(
        &mut self,
        item: &Item,
        source: &Map,
        name: &str,
        value: &Value,
    ) -> Result<(), Error> {
        if item.is_loop() {
            let elements = value.as_seq().ok_or_else(|| Error::Source {
                reason: format!("`{name}` is not a sequence"),
                path: self.walk.path_string(),
            })?;

            if let Some(count) = &item.repeat {
                let declared = match count {
                    Length::Literal(n) => Some(*n),
                    Length::Name(field) => self
                        .walk
                        .lookup(field)
                        .and_then(Value::as_int)
                        .and_then(|i| usize::try_from(i).ok()),
                };
                // Non-fatal; the source sequence length wins.
                if declared != Some(elements.len()) {
                    warn!("size of `{name}` and `{count}` differ");
                }
            }

            let structure = self.structure_items(item)?;
            for element in elements {
                let entry = element.as_map().ok_or_else(|| Error::Source {
                    reason: format!("`{name}` element is not a mapping"),
                    path: self.walk.path_string(),
                })?;
                self.encode_items(structure, entry)?;
            }

            if let Some(clause) = &item.while_loop {
                self.encode_terminator(item, clause, source)?;
            }
        } else if let Some(macro_name) = &item.macro_name {
            let items = self.walk.macro_items(macro_name)?;
            let entry = value.as_map().ok_or_else(|| Error::Source {
                reason: format!("`{name}` is not a mapping"),
                path: self.walk.path_string(),
            })?;
            self.encode_items(items, entry)?;
        } else {
            let structure = self.structure_items(item)?;
            let entry = value.as_map().ok_or_else(|| Error::Source {
                reason: format!("`{name}` is not a mapping"),
                path: self.walk.path_string(),
            })?;
            self.encode_items(structure, entry)?;
        }
        Ok(())
    }

    /// Re-emit the terminator a reader consumed: find the structure field
    /// named by the `while` operands and encode a synthetic instance built
    /// from the lifted `term` value.
    fn encode_terminator(
        &mut self,
        item: &Item,
        clause: &WhileClause,
        source: &Map,
    ) -> Result<(), Error> {
        let terminator = self.terminator_item(item, clause)?;
        let field_name = terminator.name.clone().unwrap_or_default();
        let term_value = source.get(&clause.term).cloned().ok_or_else(|| {
            Error::Source {
                reason: format!("missing terminator field `{}`", clause.term),
                path: self.walk.path_string(),
            }
        })?;

        let mut synthetic = Map::new();
        synthetic.insert(field_name, term_value);
        self.encode_items(std::slice::from_ref(terminator), &synthetic)
    }

    fn terminator_item<'i>(
        &self,
        item: &'i Item,
        clause: &WhileClause,
    ) -> Result<&'i Item, Error> {
        let structure = item.structure.as_deref().unwrap_or_default();
        for operand in &clause.predicate.operands {
            if let Operand::Literal(Value::Str(operand_name)) = operand {
                if let Some(field) = structure
                    .iter()
                    .find(|field| field.name.as_deref() == Some(operand_name))
                {
                    return Ok(field);
                }
            }
        }
        Err(Error::Description {
            reason: "no structure field matches the `while` operands".to_string(),
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
