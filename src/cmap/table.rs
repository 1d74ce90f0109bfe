//! `cid2code.txt` table parser.
//!
//! Adobe publishes, for every character collection, a tab-separated table
//! listing for each CID the codes that select it in each supported encoding:
//!
//! ```text
//! # comment
//! CID	H	B5	UniCNS-UCS2
//! 0	*	*	*
//! 1	2121	a140	0020
//! 120	2133	a14e,a3dfv	fe50
//! ```
//!
//! The first column is the decimal CID. Every other cell is `*` (no mapping)
//! or a comma-separated list of hex codes; a trailing `v` marks a code that
//! only applies in vertical writing mode.

use crate::error::{Error, Result};
use std::io::{self, BufRead};

/// Name of the mandatory first header column.
pub const CID_COLUMN: &str = "CID";

/// One code from a table cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    /// Code bytes, most significant first
    pub bytes: Vec<u8>,
    /// Only valid in vertical writing mode
    pub vertical: bool,
}

/// One data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidRow {
    /// 1-based source line number
    pub line: usize,
    /// Character identifier
    pub cid: u32,
    /// One entry per encoding column, empty for `*`
    pub cells: Vec<Vec<Code>>,
}

/// A parsed table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidTable {
    /// Encoding column names, excluding the leading `CID` column
    pub encodings: Vec<String>,
    /// Data rows in source order
    pub rows: Vec<CidRow>,
}

/// Parse a complete table.
///
/// # Errors
///
/// Returns [`Error::MalformedRow`] when the header does not start with `CID`,
/// a row has the wrong number of columns, a CID is not decimal, a code is not
/// hexadecimal, a line is not UTF-8, or the table has no data rows. Other IO
/// errors while reading are returned as [`Error::Io`].
pub fn parse_table<R: BufRead>(reader: R) -> Result<CidTable> {
    let mut encodings: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    let mut last_line = 0;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        last_line = line_no;
        let line = line.map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData => Error::malformed(line_no, "line is not valid UTF-8"),
            _ => Error::Io(e),
        })?;
        let content = strip_comment(&line);
        if content.is_empty() {
            continue;
        }

        let values: Vec<&str> = content.split('\t').collect();
        match &encodings {
            None => encodings = Some(parse_header(&values, line_no)?),
            Some(encs) => rows.push(parse_row(&values, encs.len() + 1, line_no)?),
        }
    }

    let encodings = encodings.ok_or_else(|| Error::malformed(0, "table has no header line"))?;
    if rows.is_empty() {
        return Err(Error::malformed(last_line, "table has no data rows"));
    }

    log::debug!(
        "Parsed CID table: {} encodings, {} rows",
        encodings.len(),
        rows.len()
    );
    Ok(CidTable { encodings, rows })
}

fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim();
    match trimmed.find('#') {
        Some(pos) => trimmed[..pos].trim_end(),
        None => trimmed,
    }
}

fn parse_header(values: &[&str], line: usize) -> Result<Vec<String>> {
    if values.first().map(|v| v.trim()) != Some(CID_COLUMN) {
        return Err(Error::malformed(
            line,
            format!("header must start with '{}', found '{}'", CID_COLUMN, values.join("\t")),
        ));
    }

    let mut encodings = Vec::with_capacity(values.len() - 1);
    for value in &values[1..] {
        let name = value.trim();
        // Column names become output file names.
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
            || name == CID_COLUMN
        {
            return Err(Error::malformed(line, format!("invalid encoding column name '{}'", name)));
        }
        if encodings.iter().any(|e: &String| e == name) {
            return Err(Error::malformed(line, format!("duplicate encoding column '{}'", name)));
        }
        encodings.push(name.to_string());
    }
    if encodings.is_empty() {
        return Err(Error::malformed(line, "header names no encoding columns"));
    }
    Ok(encodings)
}

fn parse_row(values: &[&str], expected: usize, line: usize) -> Result<CidRow> {
    if values.len() != expected {
        return Err(Error::malformed(
            line,
            format!("expected {} columns, found {}", expected, values.len()),
        ));
    }

    let cid_text = values[0].trim();
    if cid_text.is_empty() || !cid_text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::malformed(line, format!("CID '{}' is not a decimal integer", cid_text)));
    }
    let cid = cid_text
        .parse::<u32>()
        .map_err(|e| Error::malformed(line, format!("CID '{}': {}", cid_text, e)))?;

    let cells = values[1..]
        .iter()
        .map(|cell| parse_cell(cell.trim(), line))
        .collect::<Result<Vec<_>>>()?;

    Ok(CidRow { line, cid, cells })
}

fn parse_cell(cell: &str, line: usize) -> Result<Vec<Code>> {
    if cell == "*" {
        return Ok(Vec::new());
    }
    cell.split(',').map(|code| parse_code(code.trim(), line)).collect()
}

/// Parse one hex code, with an optional `v` suffix.
///
/// Even-length codes are read as a byte string. An odd-length code is read as
/// a single integer and stored big-endian in as few bytes as it needs.
fn parse_code(text: &str, line: usize) -> Result<Code> {
    let (hex, vertical) = match text.strip_suffix('v') {
        Some(rest) => (rest, true),
        None => (text, false),
    };
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::malformed(line, format!("code '{}' is not hexadecimal", text)));
    }

    let bytes = if hex.len() % 2 == 0 {
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|e| Error::malformed(line, format!("code '{}': {}", text, e)))?
    } else {
        let value = u32::from_str_radix(hex, 16)
            .map_err(|e| Error::malformed(line, format!("code '{}': {}", text, e)))?;
        let be = value.to_be_bytes();
        let skip = be.iter().take(3).take_while(|b| **b == 0).count();
        be[skip..].to_vec()
    };

    Ok(Code { bytes, vertical })
}
