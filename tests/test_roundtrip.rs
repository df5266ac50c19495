use binform::{Reader, Structure, Types, Value, Writer};

/// Decode `data`, re-encode the parsed tree and check the original bytes
/// come back.
fn round_trip(data: &[u8], structure: &str, types: &str) {
    let structure: Structure = serde_yaml::from_str(structure).unwrap();
    let types: Types = serde_yaml::from_str(types).unwrap();
    let reader = Reader::read(data, &structure, &types).unwrap();
    let writer = Writer::write(&reader.parsed, &structure, &types).unwrap();
    assert_eq!(writer.data, data);
}

/// As `round_trip`, but through a YAML dump and reload of the parsed tree,
/// the way the CLI round-trips.
fn round_trip_via_yaml(data: &[u8], structure: &str, types: &str) {
    let structure: Structure = serde_yaml::from_str(structure).unwrap();
    let types: Types = serde_yaml::from_str(types).unwrap();
    let reader = Reader::read(data, &structure, &types).unwrap();
    let dumped = serde_yaml::to_string(&reader.parsed).unwrap();
    let reloaded: Value = serde_yaml::from_str(&dumped).unwrap();
    let writer = Writer::write(reloaded.as_map().unwrap(), &structure, &types).unwrap();
    assert_eq!(writer.data, data);
}

const LIST_TYPES: &str = r"
types:
  u_char:
    size: 1
    function:
      name: struct
      args:
        fmt: B
  text:
    delimiter: [0x00]
";

#[test]
fn balance_round_trips() {
    let structure = r"
- name: name
- name: year_of_birth
  type: s_short
- name: balance
  type: s_short
";
    let types = r"
types:
  s_short:
    size: 2
    function:
      name: struct
      args:
        fmt: '<h'
  text:
    delimiter: [0x00]
";
    round_trip(b"John Doe\x00\xcf\x07\x8a\x0c", structure, types);
    round_trip_via_yaml(b"John Doe\x00\xcf\x07\x8a\x0c", structure, types);
}

const FOR_STRUCTURE: &str = r"
- name: size_of_list
  type: u_char
- name: lines
  for: size_of_list
  structure:
  - name: content
";

#[test]
fn for_loop_round_trips() {
    round_trip(
        b"\x05line1\x00line2\x00line3\x00line4\x00last\x00",
        FOR_STRUCTURE,
        LIST_TYPES,
    );
}

#[test]
fn for_zero_round_trips_to_empty_sequence() {
    let data = b"\x00";
    let structure: Structure = serde_yaml::from_str(FOR_STRUCTURE).unwrap();
    let types: Types = serde_yaml::from_str(LIST_TYPES).unwrap();
    let reader = Reader::read(data, &structure, &types).unwrap();
    assert_eq!(reader.parsed["lines"].as_seq().unwrap().len(), 0);
    let writer = Writer::write(&reader.parsed, &structure, &types).unwrap();
    assert_eq!(writer.data, data);
}

#[test]
fn do_while_round_trips() {
    let structure = r"
- name: lines
  do_while:
    operator: ne
    operands: [id, 0x02]
  structure:
  - name: id
    type: u_char
  - name: content
";
    round_trip(
        b"\x01line1\x00\x01line2\x00\x01line3\x00\x01line4\x00\x02line5\x00",
        structure,
        LIST_TYPES,
    );
}

const WHILE_STRUCTURE: &str = r"
- name: lines
  while:
    operator: eq
    operands: [id, 0x01]
    term: lines_term
  structure:
  - name: id
    type: u_char
  - name: content
";

#[test]
fn while_round_trips() {
    round_trip(
        b"\x01line1\x00\x01line2\x00\x01line3\x00\x01line4\x00\x01line5\x00\x02",
        WHILE_STRUCTURE,
        LIST_TYPES,
    );
    round_trip_via_yaml(
        b"\x01line1\x00\x01line2\x00\x01line3\x00\x01line4\x00\x01line5\x00\x02",
        WHILE_STRUCTURE,
        LIST_TYPES,
    );
}

#[test]
fn while_immediately_false_emits_only_the_terminator() {
    let data = b"\x02";
    let structure: Structure = serde_yaml::from_str(WHILE_STRUCTURE).unwrap();
    let types: Types = serde_yaml::from_str(LIST_TYPES).unwrap();
    let reader = Reader::read(data, &structure, &types).unwrap();
    assert_eq!(reader.parsed["lines"].as_seq().unwrap().len(), 0);
    assert_eq!(reader.parsed["lines_term"], Value::Int(2));
    let writer = Writer::write(&reader.parsed, &structure, &types).unwrap();
    assert_eq!(writer.data, data);
}

const CONDITIONAL_STRUCTURE: &str = r"
- name: kind
  type: u_char
- name: related_to_a
  if:
    operator: eq
    operands: [kind, 0x00]
- name: related_to_b
  if:
    operator: eq
    operands: [kind, 0x01]
";

#[test]
fn conditional_round_trips_both_ways() {
    // The skipped branch's name is absent from the source; that must not
    // fail as long as the predicate is falsy again on write.
    round_trip(b"\x00not skipped\x00", CONDITIONAL_STRUCTURE, LIST_TYPES);
    round_trip(b"\x01not skipped\x00", CONDITIONAL_STRUCTURE, LIST_TYPES);
}

#[test]
fn late_bound_size_round_trips() {
    let structure = r"
- name: field_2_size
  type: u_char
- name: field_2
  type: raw
  size: field_2_size
";
    round_trip(&[0x04, 0xaa, 0xbb, 0xcc, 0xdd], structure, LIST_TYPES);
}

#[test]
fn padding_round_trips() {
    let structure = r"
- name: string_1
  type: padded
- name: string_2
  type: padded
- name: string_3
  type: padded
";
    let types = r"
types:
  padded:
    size: 6
    trim: 0x00
    function:
      name: text
";
    round_trip(b"123\x00\x00\x00456789\x00\x00\x00\x00\x00\x00", structure, types);
}

#[test]
fn byte_order_round_trips() {
    let structure = r"
- name: val_1
  type: le_int
- name: val_2
  type: be_int
";
    let types = r"
types:
  le_int:
    size: 3
    function:
      name: int
  be_int:
    size: 3
    order: -1
    function:
      name: int
";
    round_trip(&[0x00, 0x02, 0x01, 0x01, 0x02, 0x00], structure, types);
}

#[test]
fn flags_round_trip() {
    let structure = r"
- name: flags
  type: flag_byte
";
    let types = r"
types:
  flag_byte:
    function:
      name: flags
      args:
        annotation:
          0x10: xxxx
          0x01: unused
";
    for byte in [0x00, 0x01, 0x31, 0xff] {
        round_trip(&[byte], structure, types);
    }
}

#[test]
fn mapped_round_trip() {
    let structure = r"
- name: number
  type: mapped
";
    let types = r"
types:
  mapped:
    function:
      name: map
      args:
        annotation:
          0x02: two hunderd and fifty-eight
";
    round_trip(&[0x02], structure, types);
    // Unannotated values fall back to hex strings and still invert.
    round_trip(&[0x03], structure, types);
}

#[test]
fn labelled_struct_round_trips() {
    let structure = r"
- name: background
  type: rgb
";
    let types = r"
types:
  rgb:
    size: 3
    function:
      name: struct
      args:
        fmt: BBB
        labels: [r, g, b]
        annotation:
          0xff: full
";
    round_trip(&[0x00, 0x80, 0xff], structure, types);
    round_trip_via_yaml(&[0x00, 0x80, 0xff], structure, types);
}

#[test]
fn float_round_trips_via_yaml() {
    let structure = r"
- name: ratio
  type: be_float
";
    let types = r"
types:
  be_float:
    size: 4
    function:
      name: struct
      args:
        fmt: '>f'
";
    round_trip(&[0x42, 0xc8, 0x00, 0x00], structure, types);
    round_trip_via_yaml(&[0x3e, 0x20, 0x00, 0x00], structure, types);
}

#[test]
fn unknown_fields_round_trip() {
    let structure = r"
- name: known
  type: u_char
- size: 2
- name: known_2
  type: u_char
- size: 1
";
    round_trip(&[0x01, 0xaa, 0xbb, 0x02, 0xcc], structure, LIST_TYPES);
}

#[test]
fn macro_round_trips() {
    let structure = r"
- name: point_a
  macro: point
- name: point_b
  macro: point
";
    let types = r"
types:
  u_char:
    size: 1
    function:
      name: struct
      args:
        fmt: B
defaults:
  type: u_char
macros:
  point:
  - name: x
  - name: y
";
    round_trip(&[1, 2, 3, 4], structure, types);
}

#[test]
fn var_type_round_trips() {
    let structure = r"
- name: value_1
  structure:
  - name: type_name
    type: type_string
  - name: content
    type: type_name
";
    let types = r"
types:
  type_string:
    delimiter: [0x00]
    function:
      name: text
  le_s_short:
    size: 2
    function:
      name: struct
      args:
        fmt: '<h'
";
    round_trip(b"le_s_short\x00\x7b\x00", structure, types);
}

#[test]
fn zero_size_field_reads_and_writes_nothing() {
    let structure = r"
- name: empty
  type: raw
  size: 0
- name: byte
  type: u_char
";
    let structure: Structure = serde_yaml::from_str(structure).unwrap();
    let types: Types = serde_yaml::from_str(LIST_TYPES).unwrap();
    let reader = Reader::read(&[0x07], &structure, &types).unwrap();
    assert_eq!(reader.parsed["empty"], Value::from(""));
    assert_eq!(reader.parsed["byte"], Value::Int(7));
    let writer = Writer::write(&reader.parsed, &structure, &types).unwrap();
    assert_eq!(writer.data, [0x07]);
}

#[test]
fn writer_prefers_source_length_over_declared() {
    let structure: Structure = serde_yaml::from_str(FOR_STRUCTURE).unwrap();
    let types: Types = serde_yaml::from_str(LIST_TYPES).unwrap();
    let reader = Reader::read(b"\x02a\x00b\x00", &structure, &types).unwrap();

    let mut parsed = reader.parsed;
    let lines = parsed["lines"].as_seq().unwrap().to_vec();
    let mut shorter = lines.clone();
    shorter.pop();
    parsed.insert("lines".to_string(), Value::Seq(shorter));

    // `size_of_list` still claims 2; the one-element source wins, with a
    // warning rather than an error.
    let writer = Writer::write(&parsed, &structure, &types).unwrap();
    assert_eq!(writer.data, b"\x02a\x00");
}

#[test]
fn cache_backs_writer_predicates() {
    // The writer must see previously written fields when evaluating `if`.
    let structure = r"
- name: kind
  type: u_char
- name: extra
  if:
    operator: eq
    operands: [kind, 0x01]
";
    round_trip(b"\x01extra\x00", structure, LIST_TYPES);
    round_trip(b"\x00", structure, LIST_TYPES);
}
