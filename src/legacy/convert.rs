//! Pickle → JSON re-encoding.

use super::pickle::{self, PickleValue};
use crate::compression::{gzip_bytes, write_atomic};
use crate::config::DEFAULT_COMPRESSION_LEVEL;
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use serde_json::{Map, Number, Value};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Largest decompressed legacy file accepted (decompression bomb protection).
const MAX_DECOMPRESSED_SIZE: u64 = 100 * 1024 * 1024;

/// Suffix of legacy CMap files.
pub const PICKLE_SUFFIX: &str = ".pickle.gz";

/// Convert a legacy gzip-compressed pickle into gzip-compressed JSON.
///
/// Integer, bool and `None` dict keys become strings, as JSON requires:
/// `{65: 1}` is written as `{"65":1}`. Running the conversion twice on the
/// same input produces byte-identical output.
///
/// # Errors
///
/// - [`Error::Io`] if the input cannot be read or the output cannot be written
/// - [`Error::CorruptInput`] if the input is not gzip, not a supported pickle,
///   or holds values JSON cannot represent
pub fn convert_pickle_to_json(input: &Path, output: &Path) -> Result<()> {
    convert_pickle_to_json_with_level(input, output, DEFAULT_COMPRESSION_LEVEL)
}

/// [`convert_pickle_to_json`] with an explicit gzip level.
pub fn convert_pickle_to_json_with_level(input: &Path, output: &Path, level: u32) -> Result<()> {
    let gz = reencode(input, level)?;
    write_atomic(output, &gz)?;
    log::info!("Converted {} -> {}", input.display(), output.display());
    Ok(())
}

/// Read a legacy file and return the gzip-compressed JSON for it.
fn reencode(input: &Path, level: u32) -> Result<Vec<u8>> {
    let compressed = fs::read(input)?;
    let value = load_pickle_gz(&compressed)?;
    let json = serde_json::to_vec(&to_json(&value)?)?;
    Ok(gzip_bytes(&json, level)?)
}

/// Convert every `*.pickle.gz` file in `input_dir` to `<stem>.json.gz` in
/// `output_dir`, in file name order. Returns the written paths.
///
/// Every input is converted in memory before the first output is written, so
/// a corrupt file leaves `output_dir` untouched.
pub fn convert_directory(input_dir: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for entry in fs::read_dir(input_dir)? {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        match name.strip_suffix(PICKLE_SUFFIX) {
            Some(stem) if !stem.is_empty() && path.is_file() => {
                inputs.push((path.clone(), format!("{}.json.gz", stem)));
            },
            _ => log::debug!("Skipping {}", path.display()),
        }
    }
    inputs.sort();

    let mut staged = Vec::with_capacity(inputs.len());
    for (input, name) in inputs {
        let gz = reencode(&input, DEFAULT_COMPRESSION_LEVEL)?;
        log::debug!("Converted {} ({} bytes)", input.display(), gz.len());
        staged.push((output_dir.join(name), gz));
    }

    let mut written = Vec::with_capacity(staged.len());
    for (output, gz) in staged {
        write_atomic(&output, &gz)?;
        written.push(output);
    }
    log::info!(
        "Converted {} legacy CMaps from {}",
        written.len(),
        input_dir.display()
    );
    Ok(written)
}

/// Decompress and decode a gzip-wrapped pickle.
pub fn load_pickle_gz(compressed: &[u8]) -> Result<PickleValue> {
    if compressed.len() < 2 || compressed[0..2] != [0x1f, 0x8b] {
        return Err(Error::corrupt("input is not gzip-compressed"));
    }

    let mut data = Vec::new();
    GzDecoder::new(compressed)
        .take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut data)
        .map_err(|e| Error::corrupt(format!("gzip decompression failed: {}", e)))?;
    if data.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(Error::corrupt(format!(
            "decompressed size exceeds {} bytes",
            MAX_DECOMPRESSED_SIZE
        )));
    }

    pickle::decode(&data)
}

/// Convert a decoded pickle value to JSON.
pub fn to_json(value: &PickleValue) -> Result<Value> {
    Ok(match value {
        PickleValue::None => Value::Null,
        PickleValue::Bool(b) => Value::Bool(*b),
        PickleValue::Int(i) => Value::Number(Number::from(*i)),
        PickleValue::Float(f) => Value::Number(
            Number::from_f64(*f)
                .ok_or_else(|| Error::corrupt(format!("float {} is not valid JSON", f)))?,
        ),
        PickleValue::Str(s) => Value::String(s.clone()),
        PickleValue::Bytes(_) => {
            return Err(Error::corrupt("bytes values cannot be represented in JSON"));
        },
        PickleValue::List(items) | PickleValue::Tuple(items) => {
            Value::Array(items.iter().map(to_json).collect::<Result<_>>()?)
        },
        PickleValue::Dict(pairs) => {
            let mut map = Map::with_capacity(pairs.len());
            for (key, value) in pairs {
                map.insert(json_key(key)?, to_json(value)?);
            }
            Value::Object(map)
        },
    })
}

/// JSON object key for a dict key.
fn json_key(key: &PickleValue) -> Result<String> {
    match key {
        PickleValue::Str(s) => Ok(s.clone()),
        PickleValue::Int(i) => Ok(i.to_string()),
        PickleValue::Bool(true) => Ok("true".to_string()),
        PickleValue::Bool(false) => Ok("false".to_string()),
        PickleValue::None => Ok("null".to_string()),
        PickleValue::Float(f) if f.is_finite() => Ok(format!("{:?}", f)),
        other => Err(Error::corrupt(format!(
            "dict key of type {} cannot be a JSON key",
            other.type_name()
        ))),
    }
}
