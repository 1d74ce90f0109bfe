//! Accumulates CID tables into per-CMap code tries and ToUnicode maps.

use super::table::{parse_table, CidTable, Code};
use super::unicode::UnicodeLookup;
use super::{is_vertical, CMapDocument, CodeMap, CodeNode, ToUnicodeDocument};
use crate::compression::{gzip_bytes, write_atomic};
use crate::config::DEFAULT_COMPRESSION_LEVEL;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Builds CMaps from one or more CID tables.
///
/// Tables are merged in load order. Nothing touches the filesystem until
/// [`CMapConverter::write`], which stages every output in memory first.
#[derive(Debug)]
pub struct CMapConverter<L: UnicodeLookup> {
    lookup: L,
    level: u32,
    code2cid: BTreeMap<String, CodeMap>,
    cid2unichr_h: BTreeMap<u32, char>,
    cid2unichr_v: BTreeMap<u32, char>,
}

impl<L: UnicodeLookup> CMapConverter<L> {
    /// Create an empty converter.
    pub fn new(lookup: L) -> Self {
        Self::with_level(lookup, DEFAULT_COMPRESSION_LEVEL)
    }

    /// Create an empty converter writing at the given gzip level.
    pub fn with_level(lookup: L, level: u32) -> Self {
        Self {
            lookup,
            level,
            code2cid: BTreeMap::new(),
            cid2unichr_h: BTreeMap::new(),
            cid2unichr_v: BTreeMap::new(),
        }
    }

    /// Parse a table from `reader` and merge it.
    ///
    /// The table is fully parsed before anything is merged, so a malformed
    /// table leaves the converter unchanged.
    pub fn load<R: BufRead>(&mut self, reader: R) -> Result<()> {
        let table = parse_table(reader)?;
        self.merge(&table)
    }

    /// Open and load a table file.
    pub fn load_path(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path)?;
        log::debug!("Loading CID table {}", path.display());
        self.load(BufReader::new(file))
    }

    fn merge(&mut self, table: &CidTable) -> Result<()> {
        // Work on copies so a conflicting code leaves `self` untouched.
        let mut code2cid = self.code2cid.clone();
        let mut cid2unichr_h = self.cid2unichr_h.clone();
        let mut cid2unichr_v = self.cid2unichr_v.clone();

        for row in &table.rows {
            let mut unimap_h: BTreeMap<char, usize> = BTreeMap::new();
            let mut unimap_v: BTreeMap<char, usize> = BTreeMap::new();

            for (enc, codes) in table.encodings.iter().zip(&row.cells) {
                if codes.is_empty() {
                    continue;
                }

                let (hname, vname) = map_names(enc);
                let (hcodes, vcodes): (Vec<&Code>, Vec<&Code>) =
                    codes.iter().partition(|code| !code.vertical);

                for code in &hcodes {
                    self.count_char(&mut unimap_h, enc, &code.bytes);
                }
                for code in &vcodes {
                    self.count_char(&mut unimap_v, enc, &code.bytes);
                }

                code2cid.entry(hname.clone()).or_default();
                if let Some(vname) = &vname {
                    code2cid.entry(vname.clone()).or_default();
                }

                let conflict = |reason: String| Error::malformed(row.line, reason);
                if !vcodes.is_empty() {
                    let Some(vname) = &vname else {
                        return Err(conflict(format!(
                            "vertical code in horizontal-only encoding '{}'",
                            enc
                        )));
                    };
                    let vmap = code2cid.entry(vname.clone()).or_default();
                    for code in &vcodes {
                        put(vmap, &code.bytes, row.cid, true).map_err(&conflict)?;
                    }
                    let hmap = code2cid.entry(hname.clone()).or_default();
                    for code in &hcodes {
                        put(hmap, &code.bytes, row.cid, true).map_err(&conflict)?;
                    }
                } else {
                    for name in std::iter::once(&hname).chain(vname.as_ref()) {
                        let map = code2cid.entry(name.clone()).or_default();
                        for code in &hcodes {
                            put(map, &code.bytes, row.cid, false).map_err(&conflict)?;
                        }
                    }
                }
            }

            if let Some(c) = pick(&unimap_h) {
                cid2unichr_h.insert(row.cid, c);
            }
            let vsource = if unimap_v.is_empty() {
                &unimap_h
            } else {
                &unimap_v
            };
            if let Some(c) = pick(vsource) {
                cid2unichr_v.insert(row.cid, c);
            }
        }

        self.code2cid = code2cid;
        self.cid2unichr_h = cid2unichr_h;
        self.cid2unichr_v = cid2unichr_v;
        Ok(())
    }

    fn count_char(&self, unimap: &mut BTreeMap<char, usize>, enc: &str, code: &[u8]) {
        let Some(text) = self.lookup.decode(enc, code) else {
            return;
        };
        let mut chars = text.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            *unimap.entry(c).or_insert(0) += 1;
        }
    }

    /// Names of all CMaps built so far, in output order.
    pub fn encodings(&self) -> impl Iterator<Item = &str> {
        self.code2cid.keys().map(String::as_str)
    }

    /// Document for one CMap, if it was built.
    pub fn cmap_document(&self, name: &str) -> Option<CMapDocument> {
        self.code2cid.get(name).map(|code2cid| CMapDocument {
            is_vertical: is_vertical(name),
            code2cid: code2cid.clone(),
        })
    }

    /// The CID → Unicode document for everything loaded.
    pub fn unicode_document(&self) -> ToUnicodeDocument {
        ToUnicodeDocument {
            cid2unichr_h: self.cid2unichr_h.clone(),
            cid2unichr_v: self.cid2unichr_v.clone(),
        }
    }

    /// Write `<cmap>.json.gz` for every CMap plus `to-unicode-<registry>.json.gz`.
    ///
    /// Returns the written paths. All payloads are serialized and compressed
    /// before the first file is created.
    pub fn write(&self, output_dir: &Path, registry: &str) -> Result<Vec<PathBuf>> {
        if registry.is_empty() || registry.contains(['/', '\\']) {
            return Err(Error::InvalidArgument(format!(
                "invalid registry name '{}'",
                registry
            )));
        }
        if !fs::metadata(output_dir)?.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", output_dir.display()),
            )));
        }

        let mut staged = Vec::with_capacity(self.code2cid.len() + 1);
        for name in self.code2cid.keys() {
            if let Some(doc) = self.cmap_document(name) {
                let json = serde_json::to_vec(&doc)?;
                let path = output_dir.join(format!("{}.json.gz", name));
                staged.push((path, gzip_bytes(&json, self.level)?));
            }
        }
        let json = serde_json::to_vec(&self.unicode_document())?;
        let path = output_dir.join(format!("to-unicode-{}.json.gz", registry));
        staged.push((path, gzip_bytes(&json, self.level)?));

        let mut written = Vec::with_capacity(staged.len());
        for (path, bytes) in staged {
            write_atomic(&path, &bytes)?;
            log::debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
            written.push(path);
        }
        log::info!(
            "Converted {} CMaps for {} into {}",
            self.code2cid.len(),
            registry,
            output_dir.display()
        );
        Ok(written)
    }
}

/// Horizontal and vertical CMap names fed by table column `enc`.
pub fn map_names(enc: &str) -> (String, Option<String>) {
    if enc.ends_with("-H") {
        (enc.to_string(), None)
    } else if enc == "H" {
        ("H".to_string(), Some("V".to_string()))
    } else {
        (format!("{}-H", enc), Some(format!("{}-V", enc)))
    }
}

/// Insert `code → cid` into the trie.
///
/// Without `force` an existing, different CID for the same code wins.
fn put(map: &mut CodeMap, code: &[u8], cid: u32, force: bool) -> std::result::Result<(), String> {
    let Some((&last, prefix)) = code.split_last() else {
        return Err("empty code".to_string());
    };

    let mut node = map;
    for (i, &byte) in prefix.iter().enumerate() {
        let entry = node
            .entry(byte)
            .or_insert_with(|| CodeNode::Branch(CodeMap::new()));
        node = match entry {
            CodeNode::Branch(next) => next,
            CodeNode::Cid(existing) => {
                return Err(format!(
                    "code {} extends code {} already mapped to CID {}",
                    hex(code),
                    hex(&code[..=i]),
                    existing
                ));
            },
        };
    }

    let keep_existing = match node.get(&last) {
        Some(CodeNode::Branch(_)) => {
            return Err(format!("code {} is a prefix of longer codes", hex(code)));
        },
        Some(CodeNode::Cid(existing)) => *existing != cid && !force,
        None => false,
    };
    if !keep_existing {
        node.insert(last, CodeNode::Cid(cid));
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Most frequent candidate; ties go to the lowest code point.
fn pick(unimap: &BTreeMap<char, usize>) -> Option<char> {
    unimap
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(c, _)| *c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmap::unicode::NoLookup;

    /// Test lookup treating every column as UTF-16BE.
    struct Utf16Lookup;

    impl UnicodeLookup for Utf16Lookup {
        fn decode(&self, _encoding: &str, code: &[u8]) -> Option<String> {
            if code.len() % 2 != 0 {
                return None;
            }
            let units: Vec<u16> = code
                .chunks(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).ok()
        }
    }

    fn leaf(cid: u32) -> CodeNode {
        CodeNode::Cid(cid)
    }

    #[test]
    fn test_map_names() {
        assert_eq!(map_names("H"), ("H".to_string(), Some("V".to_string())));
        assert_eq!(map_names("UniJIS-UCS2-H"), ("UniJIS-UCS2-H".to_string(), None));
        assert_eq!(
            map_names("B5"),
            ("B5-H".to_string(), Some("B5-V".to_string()))
        );
    }

    #[test]
    fn test_single_byte_codes() {
        let mut conv = CMapConverter::new(NoLookup);
        conv.load("CID\tH\n0\t00\n1\t01\n".as_bytes()).unwrap();

        let names: Vec<&str> = conv.encodings().collect();
        assert_eq!(names, vec!["H", "V"]);

        let h = conv.cmap_document("H").unwrap();
        assert!(!h.is_vertical);
        assert_eq!(h.code2cid.get(&0), Some(&leaf(0)));
        assert_eq!(h.code2cid.get(&1), Some(&leaf(1)));

        let v = conv.cmap_document("V").unwrap();
        assert!(v.is_vertical);
        assert_eq!(v.code2cid, h.code2cid);
    }

    #[test]
    fn test_multi_byte_codes_build_trie() {
        let mut conv = CMapConverter::new(NoLookup);
        conv.load("CID\tB5\n1\ta140\n2\ta141\n".as_bytes()).unwrap();
        let doc = conv.cmap_document("B5-H").unwrap();
        let CodeNode::Branch(inner) = doc.code2cid.get(&0xa1).unwrap() else {
            panic!("expected branch");
        };
        assert_eq!(inner.get(&0x40), Some(&leaf(1)));
        assert_eq!(inner.get(&0x41), Some(&leaf(2)));
    }

    #[test]
    fn test_first_mapping_wins_without_vertical_codes() {
        let mut conv = CMapConverter::new(NoLookup);
        conv.load("CID\tH\n1\t41\n2\t41\n".as_bytes()).unwrap();
        assert_eq!(conv.cmap_document("H").unwrap().code2cid.get(&0x41), Some(&leaf(1)));
    }

    #[test]
    fn test_vertical_codes_override() {
        let mut conv = CMapConverter::new(NoLookup);
        conv.load("CID\tB5\n10\ta14e\n20\ta14e,a3dfv\n".as_bytes())
            .unwrap();

        let h = conv.cmap_document("B5-H").unwrap();
        let v = conv.cmap_document("B5-V").unwrap();
        let CodeNode::Branch(h_a1) = h.code2cid.get(&0xa1).unwrap() else {
            panic!("expected branch");
        };
        // forced horizontal write replaces CID 10
        assert_eq!(h_a1.get(&0x4e), Some(&leaf(20)));

        let CodeNode::Branch(v_a3) = v.code2cid.get(&0xa3).unwrap() else {
            panic!("expected branch");
        };
        assert_eq!(v_a3.get(&0xdf), Some(&leaf(20)));
        assert!(h.code2cid.get(&0xa3).is_none());
    }

    #[test]
    fn test_vertical_code_in_horizontal_only_encoding() {
        let mut conv = CMapConverter::new(NoLookup);
        let err = conv.load("CID\tUniCNS-UCS2-H\n1\t0020v\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MalformedRow { line: 2, .. }));
    }

    #[test]
    fn test_prefix_conflict_leaves_converter_unchanged() {
        let mut conv = CMapConverter::new(NoLookup);
        conv.load("CID\tH\n1\t41\n".as_bytes()).unwrap();
        let err = conv.load("CID\tH\n2\t42\n3\t4142\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MalformedRow { line: 3, .. }));

        let h = conv.cmap_document("H").unwrap();
        assert_eq!(h.code2cid.len(), 1);
        assert!(h.code2cid.get(&0x42).is_none());
    }

    #[test]
    fn test_longer_code_then_prefix_conflicts() {
        let mut conv = CMapConverter::new(NoLookup);
        assert!(conv.load("CID\tH\n1\t4142\n2\t41\n".as_bytes()).is_err());
    }

    #[test]
    fn test_unicode_pick_prefers_most_frequent_then_lowest() {
        let mut conv = CMapConverter::new(Utf16Lookup);
        // CID 1: 'B' twice, 'A' once -> 'B'. CID 2: 'D' and 'C' once each -> 'C'.
        conv.load("CID\tU1\tU2\tU3\n1\t0042\t0041\t0042\n2\t0044\t0043\t*\n".as_bytes())
            .unwrap();
        let doc = conv.unicode_document();
        assert_eq!(doc.cid2unichr_h.get(&1), Some(&'B'));
        assert_eq!(doc.cid2unichr_h.get(&2), Some(&'C'));
        assert_eq!(doc.cid2unichr_v.get(&1), Some(&'B'));
    }

    #[test]
    fn test_unicode_vertical_candidates() {
        let mut conv = CMapConverter::new(Utf16Lookup);
        conv.load("CID\tU\n7\t3001,fe11v\n".as_bytes()).unwrap();
        let doc = conv.unicode_document();
        assert_eq!(doc.cid2unichr_h.get(&7), Some(&'\u{3001}'));
        assert_eq!(doc.cid2unichr_v.get(&7), Some(&'\u{fe11}'));
    }

    #[test]
    fn test_unicode_skips_multi_char_decodes() {
        let mut conv = CMapConverter::new(Utf16Lookup);
        conv.load("CID\tU\n3\t00410042\n".as_bytes()).unwrap();
        assert!(conv.unicode_document().cid2unichr_h.is_empty());
    }

    #[test]
    fn test_pick() {
        let mut unimap = BTreeMap::new();
        assert_eq!(pick(&unimap), None);
        unimap.insert('z', 1);
        unimap.insert('a', 1);
        assert_eq!(pick(&unimap), Some('a'));
        unimap.insert('q', 2);
        assert_eq!(pick(&unimap), Some('q'));
    }
}
