//! Legacy `.pickle.gz` → `.json.gz` migration tests.
//!
//! Fixtures are hand-assembled protocol 2 pickles, as written by
//! `pickle.dump(obj, f, 2)` on the legacy CMap dicts.

use cmap_oxide::legacy::{convert_directory, convert_pickle_to_json, load_pickle_gz, PickleValue};
use cmap_oxide::Error;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

/// `{"IS_VERTICAL": False, "CODE2CID": {65: 1, 66: 2}}`
const CMAP_PICKLE: &[u8] = b"\x80\x02}q\x00(X\x0b\x00\x00\x00IS_VERTICALq\x01\x89\
X\x08\x00\x00\x00CODE2CIDq\x02}q\x03(KAK\x01KBK\x02uu.";

/// `{"key": "value", "nested": {"a": 1, "b": 2}}`
const NESTED_PICKLE: &[u8] = b"\x80\x02}q\x00(X\x03\x00\x00\x00keyq\x01\
X\x05\x00\x00\x00valueq\x02X\x06\x00\x00\x00nestedq\x03}q\x04(\
X\x01\x00\x00\x00aq\x05K\x01X\x01\x00\x00\x00bq\x06K\x02uu.";

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn write_pickle(path: &Path, pickle: &[u8]) {
    fs::write(path, gzip(pickle)).unwrap();
}

fn read_output(path: &Path) -> (String, u32) {
    let bytes = fs::read(path).unwrap();
    let mut decoder = GzDecoder::new(&bytes[..]);
    let mut text = String::new();
    decoder.read_to_string(&mut text).unwrap();
    let mtime = decoder.header().unwrap().mtime();
    (text, mtime)
}

#[test]
fn test_load_legacy_cmap() {
    let value = load_pickle_gz(&gzip(CMAP_PICKLE)).unwrap();
    let PickleValue::Dict(pairs) = value else {
        panic!("expected a dict");
    };
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].0, PickleValue::Str("IS_VERTICAL".into()));
    assert_eq!(pairs[0].1, PickleValue::Bool(false));
}

#[test]
fn test_numeric_keys_written_as_strings() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("H.pickle.gz");
    let output = dir.path().join("H.json.gz");
    write_pickle(&input, CMAP_PICKLE);

    convert_pickle_to_json(&input, &output).unwrap();

    let (text, mtime) = read_output(&output);
    assert_eq!(text, r#"{"IS_VERTICAL":false,"CODE2CID":{"65":1,"66":2}}"#);
    assert_eq!(mtime, 0);
}

#[test]
fn test_nested_dict_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("nested.pickle.gz");
    let output = dir.path().join("nested.json.gz");
    write_pickle(&input, NESTED_PICKLE);

    convert_pickle_to_json(&input, &output).unwrap();

    let (text, _) = read_output(&output);
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value, json!({"key": "value", "nested": {"a": 1, "b": 2}}));
}

#[test]
fn test_conversion_is_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("H.pickle.gz");
    let output = dir.path().join("H.json.gz");
    write_pickle(&input, CMAP_PICKLE);

    convert_pickle_to_json(&input, &output).unwrap();
    let first = fs::read(&output).unwrap();
    convert_pickle_to_json(&input, &output).unwrap();
    let second = fs::read(&output).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_corrupt_input() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.json.gz");

    let not_gzip = dir.path().join("plain.pickle.gz");
    fs::write(&not_gzip, b"not gzip at all").unwrap();
    assert!(matches!(
        convert_pickle_to_json(&not_gzip, &output),
        Err(Error::CorruptInput(_))
    ));

    let not_pickle = dir.path().join("text.pickle.gz");
    fs::write(&not_pickle, gzip(b"not a pickle")).unwrap();
    assert!(matches!(
        convert_pickle_to_json(&not_pickle, &output),
        Err(Error::CorruptInput(_))
    ));

    assert!(!output.exists());
}

#[test]
fn test_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let err = convert_pickle_to_json(
        &dir.path().join("absent.pickle.gz"),
        &dir.path().join("out.json.gz"),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_convert_directory() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("old");
    let output_dir = dir.path().join("new");
    fs::create_dir(&input_dir).unwrap();
    fs::create_dir(&output_dir).unwrap();

    write_pickle(&input_dir.join("V.pickle.gz"), CMAP_PICKLE);
    write_pickle(&input_dir.join("H.pickle.gz"), CMAP_PICKLE);
    fs::write(input_dir.join("README.txt"), b"legacy files").unwrap();

    let written = convert_directory(&input_dir, &output_dir).unwrap();
    assert_eq!(
        written,
        vec![output_dir.join("H.json.gz"), output_dir.join("V.json.gz")]
    );

    let (text, _) = read_output(&output_dir.join("V.json.gz"));
    assert_eq!(text, r#"{"IS_VERTICAL":false,"CODE2CID":{"65":1,"66":2}}"#);
    assert!(!output_dir.join("README.txt").exists());
}

#[test]
fn test_convert_directory_stops_on_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    write_pickle(&dir.path().join("A.pickle.gz"), CMAP_PICKLE);
    fs::write(dir.path().join("B.pickle.gz"), b"garbage").unwrap();
    let output_dir = dir.path().join("out");
    fs::create_dir(&output_dir).unwrap();

    let err = convert_directory(dir.path(), &output_dir).unwrap_err();
    assert!(matches!(err, Error::CorruptInput(_)));
    // A.pickle.gz converts fine but is not written either
    assert_eq!(fs::read_dir(&output_dir).unwrap().count(), 0);
}

#[test]
fn test_deeply_nested_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("deep.pickle.gz");
    let output = dir.path().join("deep.json.gz");

    // [[[...]]] 200000 lists deep
    let depth = 200_000;
    let mut pickle = b"\x80\x02".to_vec();
    pickle.extend(std::iter::repeat(b']').take(depth));
    pickle.extend(std::iter::repeat(b'a').take(depth - 1));
    pickle.push(b'.');
    write_pickle(&input, &pickle);

    let err = convert_pickle_to_json(&input, &output).unwrap_err();
    assert!(matches!(err, Error::CorruptInput(_)));
    assert!(!output.exists());
}
