use binform::{ReadOptions, Reader, Registry, Structure, Types, Value};

fn read(data: &[u8], structure: &str, types: &str) -> Reader {
    let structure: Structure = serde_yaml::from_str(structure).unwrap();
    let types: Types = serde_yaml::from_str(types).unwrap();
    Reader::read(data, &structure, &types).unwrap()
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

const BALANCE_STRUCTURE: &str = r"
- name: name
- name: year_of_birth
  type: s_short
- name: balance
  type: s_short
";

const BALANCE_TYPES: &str = r"
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

const BALANCE_DATA: &[u8] = b"John Doe\x00\xcf\x07\x8a\x0c";

#[test]
fn balance() {
    let reader = read(BALANCE_DATA, BALANCE_STRUCTURE, BALANCE_TYPES);
    assert_eq!(reader.parsed["name"], Value::from("John Doe"));
    assert_eq!(reader.parsed["year_of_birth"], Value::Int(1999));
    assert_eq!(reader.parsed["balance"], Value::Int(3210));
    assert_eq!(reader.offset, BALANCE_DATA.len());
    assert_eq!(reader.unknown_byte_count, 0);
}

const FOR_STRUCTURE: &str = r"
- name: size_of_list
  type: u_char
- name: lines
  for: size_of_list
  structure:
  - name: content
";

const FOR_DATA: &[u8] = b"\x05line1\x00line2\x00line3\x00line4\x00last\x00";

#[test]
fn for_loop() {
    let reader = read(FOR_DATA, FOR_STRUCTURE, LIST_TYPES);
    assert_eq!(reader.parsed["size_of_list"], Value::Int(5));
    let lines = reader.parsed["lines"].as_seq().unwrap();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0].as_map().unwrap()["content"], Value::from("line1"));
    assert_eq!(lines[4].as_map().unwrap()["content"], Value::from("last"));
}

const DO_WHILE_STRUCTURE: &str = r"
- name: lines
  do_while:
    operator: ne
    operands: [id, 0x02]
  structure:
  - name: id
    type: u_char
  - name: content
";

const DO_WHILE_DATA: &[u8] =
    b"\x01line1\x00\x01line2\x00\x01line3\x00\x01line4\x00\x02line5\x00";

#[test]
fn do_while_loop() {
    let reader = read(DO_WHILE_DATA, DO_WHILE_STRUCTURE, LIST_TYPES);
    let lines = reader.parsed["lines"].as_seq().unwrap();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0].as_map().unwrap()["id"], Value::Int(1));
    assert_eq!(lines[4].as_map().unwrap()["id"], Value::Int(2));
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

const WHILE_DATA: &[u8] =
    b"\x01line1\x00\x01line2\x00\x01line3\x00\x01line4\x00\x01line5\x00\x02";

#[test]
fn while_loop_preserves_terminator() {
    let reader = read(WHILE_DATA, WHILE_STRUCTURE, LIST_TYPES);
    let lines = reader.parsed["lines"].as_seq().unwrap();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0].as_map().unwrap()["content"], Value::from("line1"));
    assert_eq!(lines[4].as_map().unwrap()["id"], Value::Int(1));
    assert_eq!(reader.parsed["lines_term"], Value::Int(2));
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
fn conditional_fields() {
    let reader = read(b"\x00not skipped\x00", CONDITIONAL_STRUCTURE, LIST_TYPES);
    assert_eq!(reader.parsed["related_to_a"], Value::from("not skipped"));
    assert!(!reader.parsed.contains_key("related_to_b"));

    let reader = read(b"\x01not skipped\x00", CONDITIONAL_STRUCTURE, LIST_TYPES);
    assert_eq!(reader.parsed["related_to_b"], Value::from("not skipped"));
    assert!(!reader.parsed.contains_key("related_to_a"));
}

const VAR_SIZE_STRUCTURE: &str = r"
- name: field_2_size
  type: u_char
- name: field_2
  type: raw
  size: field_2_size
";

#[test]
fn late_bound_size() {
    let reader = read(
        &[0x04, 0xaa, 0xbb, 0xcc, 0xdd],
        VAR_SIZE_STRUCTURE,
        LIST_TYPES,
    );
    assert_eq!(reader.parsed["field_2_size"], Value::Int(4));
    assert_eq!(reader.parsed["field_2"], Value::from("aa bb cc dd"));
}

const PADDING_STRUCTURE: &str = r"
- name: string_1
  type: padded
- name: string_2
  type: padded
- name: string_3
  type: padded
";

const PADDING_TYPES: &str = r"
types:
  padded:
    size: 6
    trim: 0x00
    function:
      name: text
";

#[test]
fn padding_is_trimmed() {
    let data = b"123\x00\x00\x00456789\x00\x00\x00\x00\x00\x00";
    let reader = read(data, PADDING_STRUCTURE, PADDING_TYPES);
    assert_eq!(reader.parsed["string_1"], Value::from("123"));
    assert_eq!(reader.parsed["string_2"], Value::from("456789"));
    assert_eq!(reader.parsed["string_3"], Value::from(""));
}

const ORDER_STRUCTURE: &str = r"
- name: val_1
  type: le_int
- name: val_2
  type: be_int
";

const ORDER_TYPES: &str = r"
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

#[test]
fn byte_order_reversal() {
    let reader = read(
        &[0x00, 0x02, 0x01, 0x01, 0x02, 0x00],
        ORDER_STRUCTURE,
        ORDER_TYPES,
    );
    assert_eq!(reader.parsed["val_1"], Value::Int(0x010200));
    assert_eq!(reader.parsed["val_2"], Value::Int(0x010200));
}

const FLAGS_STRUCTURE: &str = r"
- name: flags
  type: flag_byte
";

const FLAGS_TYPES: &str = r"
types:
  flag_byte:
    function:
      name: flags
      args:
        annotation:
          0x10: xxxx
          0x01: unused
";

#[test]
fn annotated_flags() {
    let reader = read(&[0x31], FLAGS_STRUCTURE, FLAGS_TYPES);
    let flags = reader.parsed["flags"].as_map().unwrap();
    assert_eq!(flags.len(), 3);
    assert_eq!(flags["unused"], Value::Bool(true));
    assert_eq!(flags["xxxx"], Value::Bool(true));
    assert_eq!(flags["flag_20"], Value::Bool(true));
    // Flag members are visible to the evaluator, the whole mapping to the
    // tree only.
    assert!(!reader.parsed.contains_key("xxxx"));
}

const MAP_STRUCTURE: &str = r"
- name: number
  type: mapped
- name: choice
  type: u_char
";

const MAP_TYPES: &str = r"
types:
  u_char:
    size: 1
    function:
      name: struct
      args:
        fmt: B
  mapped:
    function:
      name: map
      args:
        annotation:
          0x02: two hunderd and fifty-eight
";

#[test]
fn mapped_byte() {
    let reader = read(&[0x02, 0x01], MAP_STRUCTURE, MAP_TYPES);
    assert_eq!(
        reader.parsed["number"],
        Value::from("two hunderd and fifty-eight")
    );
    assert_eq!(reader.parsed["choice"], Value::Int(1));
}

const COLOUR_STRUCTURE: &str = r"
- name: background
  type: rgb
";

const COLOUR_TYPES: &str = r"
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

#[test]
fn labelled_struct_with_annotation() {
    let reader = read(&[0x00, 0x80, 0xff], COLOUR_STRUCTURE, COLOUR_TYPES);
    let background = reader.parsed["background"].as_map().unwrap();
    assert_eq!(background["g"], Value::Int(128));
    assert_eq!(background["b"], Value::from("full"));
}

const COMPLEX_EVAL_STRUCTURE: &str = r"
- name: value
  type: u_char
- name: item_1
  type: char
  if:
    operator: and
    operands:
    - operator: eq
      operands: [value, 1]
    - operator: ne
      operands: [value, 3]
- name: item_2
  type: char
  if:
    operator: or
    operands:
    - operator: eq
      operands: [value, 2]
    - operator: gt
      operands: [value, 10]
";

const COMPLEX_EVAL_TYPES: &str = r"
types:
  u_char:
    size: 1
    function:
      name: struct
      args:
        fmt: B
  char:
    size: 1
    function:
      name: struct
      args:
        fmt: c
";

#[test]
fn nested_predicates() {
    let reader = read(b"\x02A", COMPLEX_EVAL_STRUCTURE, COMPLEX_EVAL_TYPES);
    assert!(!reader.parsed.contains_key("item_1"));
    assert_eq!(reader.parsed["item_2"], Value::from("A"));
}

const SIZE_STRING_STRUCTURE: &str = r"
- name: string_1
  structure:
  - name: size_of_string
    type: u_char
  - name: string
    size: size_of_string
- name: string_2
  structure:
  - name: size_of_string
    type: u_char
  - name: string
    size: size_of_string
";

const SIZE_STRING_TYPES: &str = r"
types:
  u_char:
    size: 1
    function:
      name: struct
      args:
        fmt: B
";

#[test]
fn length_prefixed_strings() {
    let mut data = vec![3];
    data.extend(b"abc");
    data.push(5);
    data.extend(b"hello");
    let reader = read(&data, SIZE_STRING_STRUCTURE, SIZE_STRING_TYPES);
    let string_1 = reader.parsed["string_1"].as_map().unwrap();
    assert_eq!(string_1["size_of_string"], Value::Int(3));
    assert_eq!(string_1["string"], Value::from("abc"));
    let string_2 = reader.parsed["string_2"].as_map().unwrap();
    assert_eq!(string_2["size_of_string"], Value::Int(5));
    assert_eq!(string_2["string"], Value::from("hello"));
}

const VAR_TYPE_STRUCTURE: &str = r"
- name: value_1
  structure:
  - name: type_name
    type: type_string
  - name: content
    type: type_name
- name: value_2
  structure:
  - name: type_name
    type: type_string
  - name: content
    type: type_name
";

const VAR_TYPE_TYPES: &str = r"
types:
  type_string:
    delimiter: [0x00]
    function:
      name: text
  char:
    size: 1
    function:
      name: struct
      args:
        fmt: c
  le_s_short:
    size: 2
    function:
      name: struct
      args:
        fmt: '<h'
";

#[test]
fn type_chosen_by_parsed_field() {
    let data = b"char\x00Ale_s_short\x00\x7b\x00";
    let reader = read(data, VAR_TYPE_STRUCTURE, VAR_TYPE_TYPES);
    let value_1 = reader.parsed["value_1"].as_map().unwrap();
    assert_eq!(value_1["type_name"], Value::from("char"));
    assert_eq!(value_1["content"], Value::from("A"));
    let value_2 = reader.parsed["value_2"].as_map().unwrap();
    assert_eq!(value_2["type_name"], Value::from("le_s_short"));
    assert_eq!(value_2["content"], Value::Int(123));
}

const MACRO_STRUCTURE: &str = r"
- name: point_a
  macro: point
- name: point_b
  macro: point
";

const MACRO_TYPES: &str = r"
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

#[test]
fn macro_expansion() {
    let reader = read(&[1, 2, 3, 4], MACRO_STRUCTURE, MACRO_TYPES);
    let point_a = reader.parsed["point_a"].as_map().unwrap();
    assert_eq!(point_a["x"], Value::Int(1));
    assert_eq!(point_a["y"], Value::Int(2));
    let point_b = reader.parsed["point_b"].as_map().unwrap();
    assert_eq!(point_b["x"], Value::Int(3));
    assert_eq!(point_b["y"], Value::Int(4));
}

const UNKNOWN_STRUCTURE: &str = r"
- name: known
  type: u_char
- type: raw
  size: 2
- name: known_2
  type: u_char
";

#[test]
fn unknown_fields_are_queued() {
    let data = [0x01, 0xaa, 0xbb, 0x02];
    let reader = read(&data, UNKNOWN_STRUCTURE, LIST_TYPES);
    assert_eq!(reader.parsed["known"], Value::Int(1));
    assert_eq!(reader.parsed["known_2"], Value::Int(2));
    let queue = reader.parsed["__raw__"].as_seq().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0], Value::from("aa bb"));
    assert_eq!(reader.unknown_byte_count, 2);
}

#[test]
fn pruned_unknown_fields_are_dropped() {
    let data = [0x01, 0xaa, 0xbb, 0x02];
    let structure: Structure = serde_yaml::from_str(UNKNOWN_STRUCTURE).unwrap();
    let types: Types = serde_yaml::from_str(LIST_TYPES).unwrap();
    let reader = Reader::read_with(
        &data,
        &structure,
        &types,
        &Registry::standard(),
        ReadOptions {
            prune: true,
            ..ReadOptions::default()
        },
    )
    .unwrap();
    assert!(!reader.parsed.contains_key("__raw__"));
    assert_eq!(reader.parsed["known_2"], Value::Int(2));
    assert_eq!(reader.unknown_byte_count, 2);
}

#[test]
fn constants_back_expressions() {
    let structure = r"
- name: lines
  do_while:
    operator: ne
    operands: [id, sentinel]
  structure:
  - name: id
    type: u_char
";
    let types = r"
constants:
  sentinel: 3
types:
  u_char:
    size: 1
    function:
      name: struct
      args:
        fmt: B
";
    let reader = read(&[1, 2, 3], structure, types);
    assert_eq!(reader.parsed["lines"].as_seq().unwrap().len(), 3);
}

#[test]
fn end_of_input_terminates_cleanly() {
    let reader = read(b"only one\x00", "- name: first\n- name: second\n", LIST_TYPES);
    assert_eq!(reader.parsed["first"], Value::from("only one"));
    assert!(!reader.parsed.contains_key("second"));
    assert_eq!(reader.offset, 9);
}

#[test]
fn unknown_type_is_reported_with_path() {
    let structure: Structure =
        serde_yaml::from_str("- name: outer\n  structure:\n  - name: x\n    type: nonesuch\n")
            .unwrap();
    let types = Types::default();
    let err = Reader::read(b"\x00", &structure, &types).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("nonesuch"), "{message}");
    assert!(message.contains("outer"), "{message}");
}
