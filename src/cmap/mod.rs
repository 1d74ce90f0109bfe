//! CID table to JSON CMap conversion.
//!
//! Converts Adobe `cid2code.txt` tables into the gzip-compressed JSON CMaps
//! loaded at runtime for predefined CJK encodings (ISO 32000-1:2008 §9.7.5.2).
//!
//! For each encoding column the converter writes a horizontal and, where the
//! naming convention provides one, a vertical CMap:
//!
//! ```text
//! {"IS_VERTICAL":false,"CODE2CID":{"161":{"64":1,"65":2}}}
//! ```
//!
//! `CODE2CID` is a byte trie keyed by the decimal value of each code byte.
//! A ToUnicode document per character collection is written alongside:
//!
//! ```text
//! {"CID2UNICHR_H":{"1":"　"},"CID2UNICHR_V":{"1":"　"}}
//! ```
//!
//! This is not a flat `{cid: codepoint}` map: the CIDs are split by writing
//! mode, and each value is the character itself as a one-character string.
//! Readers expecting code points convert with `char as u32`.

mod converter;
pub mod table;
pub mod unicode;

pub use converter::{map_names, CMapConverter};
pub use table::{parse_table, CidRow, CidTable, Code};
pub use unicode::{resolve_codec, CodecLookup, NoLookup, UnicodeLookup};

use crate::config::ConvertConfig;
use crate::error::{Error, Result};
use serde::de::{self, MapAccess, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Code byte → next trie level.
pub type CodeMap = BTreeMap<u8, CodeNode>;

/// One trie entry: a CID for a complete code, or the bytes that may follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CodeNode {
    /// The code ends here
    Cid(u32),
    /// The code continues with another byte
    Branch(CodeMap),
}

// Untagged derive cannot read integer keys of nested maps, so the trie is
// deserialized by hand.
impl<'de> Deserialize<'de> for CodeNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct NodeVisitor;

        impl<'de> Visitor<'de> for NodeVisitor {
            type Value = CodeNode;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a CID or a map of code bytes")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<CodeNode, E> {
                u32::try_from(v)
                    .map(CodeNode::Cid)
                    .map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<CodeNode, A::Error> {
                let mut map = CodeMap::new();
                while let Some((key, value)) = access.next_entry::<String, CodeNode>()? {
                    let byte = key.parse::<u8>().map_err(|_| {
                        <A::Error as de::Error>::invalid_value(
                            Unexpected::Str(&key),
                            &"a code byte 0-255",
                        )
                    })?;
                    map.insert(byte, value);
                }
                Ok(CodeNode::Branch(map))
            }
        }

        deserializer.deserialize_any(NodeVisitor)
    }
}

/// Contents of `<cmap>.json.gz`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CMapDocument {
    /// Vertical writing mode CMap
    #[serde(rename = "IS_VERTICAL")]
    pub is_vertical: bool,
    /// Code trie
    #[serde(rename = "CODE2CID")]
    pub code2cid: CodeMap,
}

impl CMapDocument {
    /// Look up the CID for a complete code.
    pub fn lookup(&self, code: &[u8]) -> Option<u32> {
        let (&last, prefix) = code.split_last()?;
        let mut map = &self.code2cid;
        for byte in prefix {
            match map.get(byte)? {
                CodeNode::Branch(next) => map = next,
                CodeNode::Cid(_) => return None,
            }
        }
        match map.get(&last)? {
            CodeNode::Cid(cid) => Some(*cid),
            CodeNode::Branch(_) => None,
        }
    }
}

/// Contents of `to-unicode-<registry>.json.gz`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToUnicodeDocument {
    /// Character per CID in horizontal writing mode
    #[serde(rename = "CID2UNICHR_H")]
    pub cid2unichr_h: BTreeMap<u32, char>,
    /// Character per CID in vertical writing mode
    #[serde(rename = "CID2UNICHR_V")]
    pub cid2unichr_v: BTreeMap<u32, char>,
}

/// True for CMap names denoting vertical writing mode (`V`, `*-V`).
pub fn is_vertical(name: &str) -> bool {
    name == "V" || name.ends_with("-V")
}

/// Convert one CID table with the default configuration.
///
/// Writes `<cmap>.json.gz` for every CMap derived from the table's columns
/// and `to-unicode-<registry>.json.gz` into `output_dir`, returning the
/// written paths. Nothing is written if the table fails to parse.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
///
/// let written = cmap_oxide::cmap::convert(
///     Path::new("cid2code.txt"),
///     "Adobe-Japan1",
///     Path::new("cmap"),
/// )?;
/// assert!(written.iter().any(|p| p.ends_with("to-unicode-Adobe-Japan1.json.gz")));
/// # Ok::<(), cmap_oxide::Error>(())
/// ```
pub fn convert(input: &Path, registry: &str, output_dir: &Path) -> Result<Vec<PathBuf>> {
    convert_tables(&[input.to_path_buf()], registry, output_dir, &ConvertConfig::default())
}

/// Convert several CID tables of one character collection.
pub fn convert_tables(
    inputs: &[PathBuf],
    registry: &str,
    output_dir: &Path,
    config: &ConvertConfig,
) -> Result<Vec<PathBuf>> {
    if registry.is_empty() {
        return Err(Error::InvalidArgument("registry name must not be empty".into()));
    }
    let lookup = CodecLookup::new(&config.codecs)?;
    let mut converter = CMapConverter::with_level(lookup, config.compression_level);
    for input in inputs {
        converter.load_path(input)?;
    }
    converter.write(output_dir, registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_vertical() {
        assert!(is_vertical("V"));
        assert!(is_vertical("UniJIS-UCS2-V"));
        assert!(!is_vertical("H"));
        assert!(!is_vertical("UniJIS-UCS2-H"));
        assert!(!is_vertical("Identity"));
    }

    #[test]
    fn test_cmap_document_json_shape() {
        let mut inner = CodeMap::new();
        inner.insert(0x40, CodeNode::Cid(1));
        let mut code2cid = CodeMap::new();
        code2cid.insert(0x41, CodeNode::Cid(34));
        code2cid.insert(0xa1, CodeNode::Branch(inner));
        let doc = CMapDocument {
            is_vertical: false,
            code2cid,
        };

        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"IS_VERTICAL":false,"CODE2CID":{"65":34,"161":{"64":1}}}"#);

        let back: CMapDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
        assert_eq!(back.lookup(&[0x41]), Some(34));
        assert_eq!(back.lookup(&[0xa1, 0x40]), Some(1));
        assert_eq!(back.lookup(&[0xa1]), None);
        assert_eq!(back.lookup(&[]), None);
    }

    #[test]
    fn test_to_unicode_json_shape() {
        let mut doc = ToUnicodeDocument::default();
        doc.cid2unichr_h.insert(2, 'B');
        doc.cid2unichr_h.insert(10, 'J');
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"CID2UNICHR_H":{"2":"B","10":"J"},"CID2UNICHR_V":{}}"#);
    }

    #[test]
    fn test_convert_tables_rejects_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let err = convert_tables(&[], "", dir.path(), &ConvertConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
