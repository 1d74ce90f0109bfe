//! Code to Unicode lookups used to derive `to-unicode-*.json.gz`.
//!
//! Which characters a CID stands for is not recorded in the CID table itself.
//! It is recovered by decoding the CID's codes with a codec known to match a
//! column, e.g. `utf-16be` for `UniJIS-UCS2` or `cp950` for `B5`. The mapping
//! from column to codec is supplied by the caller through [`UnicodeLookup`].

use crate::error::{Error, Result};
use encoding_rs::Encoding;
use std::collections::BTreeMap;

/// Decodes the codes of one table column to text.
pub trait UnicodeLookup {
    /// Decode `code` as written in encoding column `encoding`.
    ///
    /// Returns `None` when the column has no codec or `code` is not valid in it.
    fn decode(&self, encoding: &str, code: &[u8]) -> Option<String>;
}

/// Lookup that never decodes anything.
///
/// Produces empty ToUnicode maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl UnicodeLookup for NoLookup {
    fn decode(&self, _encoding: &str, _code: &[u8]) -> Option<String> {
        None
    }
}

/// Lookup backed by `encoding_rs` codecs, selected per column.
#[derive(Debug, Clone, Default)]
pub struct CodecLookup {
    codecs: BTreeMap<String, &'static Encoding>,
}

impl CodecLookup {
    /// Build a lookup from column name → codec label pairs.
    ///
    /// Labels are WHATWG encoding labels; the Python codec names used by the
    /// Adobe tooling (`cp932`, `cp950`, `utf_16be`, ...) are accepted too.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if a label names no known encoding.
    pub fn new(codecs: &BTreeMap<String, String>) -> Result<Self> {
        let mut resolved = BTreeMap::new();
        for (column, label) in codecs {
            let encoding = resolve_codec(label).ok_or_else(|| {
                Error::InvalidArgument(format!("unknown codec '{}' for '{}'", label, column))
            })?;
            log::debug!("Column {} decodes as {}", column, encoding.name());
            resolved.insert(column.clone(), encoding);
        }
        Ok(Self { codecs: resolved })
    }

    /// Number of columns with a codec.
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// True if no column has a codec.
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl UnicodeLookup for CodecLookup {
    fn decode(&self, encoding: &str, code: &[u8]) -> Option<String> {
        let codec = self.codecs.get(encoding)?;
        codec
            .decode_without_bom_handling_and_without_replacement(code)
            .map(|text| text.into_owned())
    }
}

/// Resolve a codec label to an `encoding_rs` encoding.
pub fn resolve_codec(label: &str) -> Option<&'static Encoding> {
    let normalized = label.trim().to_ascii_lowercase().replace('_', "-");
    let whatwg = match normalized.as_str() {
        "cp932" | "ms-kanji" | "mskanji" => "shift_jis",
        "cp936" | "ms936" => "gbk",
        "cp949" | "ms949" | "uhc" => "euc-kr",
        "cp950" | "ms950" => "big5",
        "utf-16-be" => "utf-16be",
        "utf-16-le" => "utf-16le",
        "eucjp" | "ujis" => "euc-jp",
        "euckr" => "euc-kr",
        other => other,
    };
    Encoding::for_label(whatwg.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_python_names() {
        assert_eq!(resolve_codec("cp932"), Some(encoding_rs::SHIFT_JIS));
        assert_eq!(resolve_codec("cp950"), Some(encoding_rs::BIG5));
        assert_eq!(resolve_codec("utf_16be"), Some(encoding_rs::UTF_16BE));
        assert_eq!(resolve_codec("euc-jp"), Some(encoding_rs::EUC_JP));
        assert_eq!(resolve_codec("gb18030"), Some(encoding_rs::GB18030));
        assert!(resolve_codec("no-such-codec").is_none());
    }

    #[test]
    fn test_codec_lookup_decodes_per_column() {
        let mut codecs = BTreeMap::new();
        codecs.insert("UniJIS-UCS2".to_string(), "utf-16be".to_string());
        codecs.insert("90ms-RKSJ".to_string(), "cp932".to_string());
        let lookup = CodecLookup::new(&codecs).unwrap();
        assert_eq!(lookup.len(), 2);

        assert_eq!(lookup.decode("UniJIS-UCS2", &[0x00, 0x41]).as_deref(), Some("A"));
        // あ in Shift-JIS
        assert_eq!(lookup.decode("90ms-RKSJ", &[0x82, 0xa0]).as_deref(), Some("\u{3042}"));
        assert_eq!(lookup.decode("H", &[0x21, 0x21]), None);
    }

    #[test]
    fn test_codec_lookup_rejects_malformed_code() {
        let mut codecs = BTreeMap::new();
        codecs.insert("UniJIS-UCS2".to_string(), "utf-16be".to_string());
        let lookup = CodecLookup::new(&codecs).unwrap();
        // lone high surrogate
        assert_eq!(lookup.decode("UniJIS-UCS2", &[0xd8, 0x00]), None);
    }

    #[test]
    fn test_unknown_codec_is_invalid_argument() {
        let mut codecs = BTreeMap::new();
        codecs.insert("B5".to_string(), "klingon".to_string());
        assert!(matches!(CodecLookup::new(&codecs), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_no_lookup() {
        assert_eq!(NoLookup.decode("UniJIS-UCS2", &[0x00, 0x41]), None);
    }
}
