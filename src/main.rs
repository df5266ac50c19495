use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use binform::{DebugFlags, Map, ReadOptions, Reader, Registry, Structure, Types, Value, Writer};

#[derive(Parser)]
#[command(
    name = "binform",
    version,
    about = "Read and write binary files described by YAML structure and types definitions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a binary file to YAML
    Read {
        /// Input binary file
        input: PathBuf,
        /// Structure definition file
        structure: PathBuf,
        /// Types definition file
        types: PathBuf,
        /// Output YAML file
        output: PathBuf,
        /// Remove all unknown data fields from the output
        #[arg(long)]
        prune: bool,
        /// Debugging level: 0x01 dumps the internal cache, 0x02 traces
        /// field reads
        #[arg(short = 'd', long = "debug", default_value_t = 0)]
        debug: u8,
    },
    /// Convert a YAML file to binary
    Write {
        /// Input YAML file
        input: PathBuf,
        /// Structure definition file
        structure: PathBuf,
        /// Types definition file
        types: PathBuf,
        /// Output binary file
        output: PathBuf,
        /// Debugging level: 0x01 dumps the internal cache, 0x02 traces
        /// field writes
        #[arg(short = 'd', long = "debug", default_value_t = 0)]
        debug: u8,
    },
    /// Derive a rudimentary structure and types definition from an example
    /// file and a delimiter
    Skeleton {
        /// Example binary file
        input: PathBuf,
        /// Structure definition file to write
        structure: PathBuf,
        /// Types definition file to write
        types: PathBuf,
        /// Delimiter byte in hex; repeat for multi-byte delimiters
        #[arg(short = 'd', long = "delimiter", value_parser = parse_hex_byte, required = true)]
        delimiter: Vec<u8>,
    },
    /// Compare two YAML files
    Compare {
        first: PathBuf,
        second: PathBuf,
    },
}

fn parse_hex_byte(text: &str) -> Result<u8, String> {
    u8::from_str_radix(text.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn init_logging(debug: u8) {
    let level = if debug & 0x02 != 0 {
        log::LevelFilter::Trace
    } else if debug & 0x01 != 0 {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn load_structure(path: &Path) -> Result<Structure> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read structure file {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("malformed structure file {}", path.display()))
}

fn load_types(path: &Path) -> Result<Types> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read types file {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("malformed types file {}", path.display()))
}

fn load_value(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("malformed YAML in {}", path.display()))
}

fn read(
    input: &Path,
    structure: &Path,
    types: &Path,
    output: &Path,
    prune: bool,
    debug: u8,
) -> Result<()> {
    let data =
        fs::read(input).with_context(|| format!("cannot read input {}", input.display()))?;
    let structure = load_structure(structure)?;
    let types = load_types(types)?;
    let options = ReadOptions {
        prune,
        debug: DebugFlags::from_level(debug)?,
    };

    let reader = Reader::read_with(&data, &structure, &types, &Registry::standard(), options)?;
    let yaml = serde_yaml::to_string(&reader.parsed)?;
    fs::write(output, yaml)
        .with_context(|| format!("cannot write output {}", output.display()))?;
    Ok(())
}

fn write(input: &Path, structure: &Path, types: &Path, output: &Path, debug: u8) -> Result<()> {
    let parsed = match load_value(input)? {
        Value::Map(map) => map,
        _ => bail!("{} does not hold a top-level mapping", input.display()),
    };
    let structure = load_structure(structure)?;
    let types = load_types(types)?;
    let debug = DebugFlags::from_level(debug)?;

    let writer = Writer::write_with(&parsed, &structure, &types, &Registry::standard(), debug)?;
    fs::write(output, writer.data)
        .with_context(|| format!("cannot write output {}", output.display()))?;
    Ok(())
}

/// Split the example file on the delimiter and emit one `raw` field per
/// piece, plus a types definition that makes `raw` and `text` delimited.
fn skeleton(input: &Path, structure: &Path, types: &Path, delimiter: &[u8]) -> Result<()> {
    let data =
        fs::read(input).with_context(|| format!("cannot read input {}", input.display()))?;

    let mut pieces = 1usize;
    let mut at = 0;
    while at + delimiter.len() <= data.len() {
        if &data[at..at + delimiter.len()] == delimiter {
            pieces += 1;
            at += delimiter.len();
        } else {
            at += 1;
        }
    }

    let fields: Vec<Value> = (0..pieces)
        .map(|index| {
            let mut field = Map::new();
            field.insert("name".to_string(), Value::Str(format!("field_{index:06}")));
            field.insert("type".to_string(), Value::from("raw"));
            Value::Map(field)
        })
        .collect();
    fs::write(
        structure,
        format!("---\n{}", serde_yaml::to_string(&Value::Seq(fields))?),
    )
    .with_context(|| format!("cannot write structure {}", structure.display()))?;

    let delimiter_value =
        Value::Seq(delimiter.iter().map(|&b| Value::Int(i64::from(b))).collect());
    let mut raw_type = Map::new();
    raw_type.insert("delimiter".to_string(), delimiter_value.clone());
    let mut function = Map::new();
    function.insert("name".to_string(), Value::from("raw"));
    raw_type.insert("function".to_string(), Value::Map(function));
    let mut text_type = Map::new();
    text_type.insert("delimiter".to_string(), delimiter_value);
    let mut table = Map::new();
    table.insert("raw".to_string(), Value::Map(raw_type));
    table.insert("text".to_string(), Value::Map(text_type));
    let mut document = Map::new();
    document.insert("types".to_string(), Value::Map(table));
    fs::write(
        types,
        format!("---\n{}", serde_yaml::to_string(&Value::Map(document))?),
    )
    .with_context(|| format!("cannot write types {}", types.display()))?;
    Ok(())
}

fn compare(first: &Path, second: &Path) -> Result<Vec<String>> {
    let mut differences = Vec::new();
    diff(
        &load_value(first)?,
        &load_value(second)?,
        &mut differences,
    );
    Ok(differences)
}

fn diff(a: &Value, b: &Value, out: &mut Vec<String>) {
    match (a, b) {
        (Value::Map(left), Value::Map(right)) => {
            for key in left.keys().chain(right.keys().filter(|k| !left.contains_key(*k))) {
                match (left.get(key), right.get(key)) {
                    (Some(x), Some(y)) => diff(x, y, out),
                    _ => out.push(format!("missing key: {key}")),
                }
            }
        }
        (Value::Seq(left), Value::Seq(right)) => {
            if left.len() != right.len() {
                out.push("lists of different length".to_string());
            } else {
                for (x, y) in left.iter().zip(right) {
                    diff(x, y, out);
                }
            }
        }
        _ => {
            if a != b {
                out.push(format!("{a} != {b}"));
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let debug = match &cli.command {
        Command::Read { debug, .. } | Command::Write { debug, .. } => *debug,
        _ => 0,
    };
    init_logging(debug);

    let result = match cli.command {
        Command::Read {
            input,
            structure,
            types,
            output,
            prune,
            debug,
        } => read(&input, &structure, &types, &output, prune, debug),
        Command::Write {
            input,
            structure,
            types,
            output,
            debug,
        } => write(&input, &structure, &types, &output, debug),
        Command::Skeleton {
            input,
            structure,
            types,
            delimiter,
        } => skeleton(&input, &structure, &types, &delimiter),
        Command::Compare { first, second } => match compare(&first, &second) {
            Ok(differences) if differences.is_empty() => Ok(()),
            Ok(differences) => {
                for difference in differences {
                    println!("{difference}");
                }
                return ExitCode::FAILURE;
            }
            Err(err) => Err(err),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
