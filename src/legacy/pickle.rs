//! Decoder for the pickle subset used by legacy CMap files.
//!
//! Older releases shipped CMaps as gzip-compressed Python pickles. Those files
//! only contain plain data (dicts, ints, strings, bools), so this decoder runs
//! the pickle stack machine for the data opcodes of protocols 0-5 and rejects
//! anything that would construct arbitrary objects (`GLOBAL`, `REDUCE`,
//! `BUILD`, ...).

use crate::error::{Error, Result};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Read};

/// Highest pickle protocol understood.
pub const HIGHEST_PROTOCOL: u8 = 5;

/// Deepest container nesting accepted, the same bound as Python's default
/// recursion limit. Deeper input is rejected while decoding, so converting or
/// dropping a decoded value never recurses further than this.
pub const MAX_NESTING_DEPTH: usize = 1000;

/// A decoded pickle value.
#[derive(Debug, Clone, PartialEq)]
pub enum PickleValue {
    /// `None`
    None,
    /// `True` / `False`
    Bool(bool),
    /// Integer (up to 64 bits)
    Int(i64),
    /// Float
    Float(f64),
    /// Text string
    Str(String),
    /// Byte string
    Bytes(Vec<u8>),
    /// List
    List(Vec<PickleValue>),
    /// Tuple
    Tuple(Vec<PickleValue>),
    /// Dict, in insertion order
    Dict(Vec<(PickleValue, PickleValue)>),
}

impl PickleValue {
    /// Python type name, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            PickleValue::None => "NoneType",
            PickleValue::Bool(_) => "bool",
            PickleValue::Int(_) => "int",
            PickleValue::Float(_) => "float",
            PickleValue::Str(_) => "str",
            PickleValue::Bytes(_) => "bytes",
            PickleValue::List(_) => "list",
            PickleValue::Tuple(_) => "tuple",
            PickleValue::Dict(_) => "dict",
        }
    }

    fn is_mutable(&self) -> bool {
        matches!(self, PickleValue::List(_) | PickleValue::Dict(_))
    }
}

mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';
    pub const PROTO: u8 = 0x80;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;
}

/// Decode a complete (already decompressed) pickle.
///
/// # Errors
///
/// [`Error::CorruptInput`] for truncated data, unknown or unsupported opcodes,
/// stack underflow, or a missing `STOP`.
pub fn decode(data: &[u8]) -> Result<PickleValue> {
    Machine::new(data).run()
}

/// Stack entry: a value, its container nesting depth and, for lists and
/// dicts, the memo slot that refers to it while it is still being filled.
#[derive(Debug)]
struct Slot {
    value: PickleValue,
    depth: usize,
    memo: Option<u32>,
}

#[derive(Debug)]
enum MemoEntry {
    Value(PickleValue, usize),
    /// Container still on the stack; read it from there.
    Live,
}

struct Machine<'a> {
    input: Cursor<&'a [u8]>,
    stack: Vec<Slot>,
    metastack: Vec<Vec<Slot>>,
    memo: HashMap<u32, MemoEntry>,
}

impl<'a> Machine<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            input: Cursor::new(data),
            stack: Vec::new(),
            metastack: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<PickleValue> {
        loop {
            let offset = self.input.position();
            let opcode = self.input.read_u8().map_err(|_| corrupt("missing STOP opcode"))?;
            match opcode {
                op::PROTO => {
                    let version = self.read_u8()?;
                    if version > HIGHEST_PROTOCOL {
                        return Err(corrupt(format!("unsupported pickle protocol {}", version)));
                    }
                },
                op::FRAME => {
                    self.read_u64()?;
                },
                op::STOP => {
                    let (value, _) = self.pop().map_err(|_| corrupt("STOP on empty stack"))?;
                    return Ok(value);
                },

                op::NONE => self.push(PickleValue::None),
                op::NEWTRUE => self.push(PickleValue::Bool(true)),
                op::NEWFALSE => self.push(PickleValue::Bool(false)),
                op::BININT1 => {
                    let v = self.read_u8()?;
                    self.push(PickleValue::Int(i64::from(v)));
                },
                op::BININT2 => {
                    let v = self.read_u16()?;
                    self.push(PickleValue::Int(i64::from(v)));
                },
                op::BININT => {
                    let v = self.read_i32()?;
                    self.push(PickleValue::Int(i64::from(v)));
                },
                op::LONG1 => {
                    let n = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(n)?;
                    self.push(PickleValue::Int(decode_long(&bytes)?));
                },
                op::LONG4 => {
                    let n = self.read_i32()?;
                    let n = usize::try_from(n).map_err(|_| corrupt("negative LONG4 length"))?;
                    let bytes = self.read_bytes(n)?;
                    self.push(PickleValue::Int(decode_long(&bytes)?));
                },
                op::INT => {
                    let line = self.read_line()?;
                    let value = match line.as_str() {
                        "01" => PickleValue::Bool(true),
                        "00" => PickleValue::Bool(false),
                        text => PickleValue::Int(parse_int(text)?),
                    };
                    self.push(value);
                },
                op::LONG => {
                    let line = self.read_line()?;
                    let text = line.strip_suffix('L').unwrap_or(&line);
                    self.push(PickleValue::Int(parse_int(text)?));
                },
                op::BINFLOAT => {
                    let v = self
                        .input
                        .read_f64::<BigEndian>()
                        .map_err(|_| truncated(offset))?;
                    self.push(PickleValue::Float(v));
                },
                op::FLOAT => {
                    let line = self.read_line()?;
                    let v = line
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| corrupt(format!("bad FLOAT literal '{}'", line)))?;
                    self.push(PickleValue::Float(v));
                },

                op::SHORT_BINUNICODE => {
                    let n = usize::from(self.read_u8()?);
                    let s = self.read_utf8(n)?;
                    self.push(PickleValue::Str(s));
                },
                op::BINUNICODE => {
                    let n = self.read_u32()? as usize;
                    let s = self.read_utf8(n)?;
                    self.push(PickleValue::Str(s));
                },
                op::BINUNICODE8 => {
                    let n = self.read_len64()?;
                    let s = self.read_utf8(n)?;
                    self.push(PickleValue::Str(s));
                },
                op::UNICODE => {
                    let line = self.read_line()?;
                    self.push(PickleValue::Str(decode_raw_unicode_escape(&line)?));
                },
                // Python 2 str; Python 3 reads these as latin-1 text by default.
                op::SHORT_BINSTRING => {
                    let n = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(n)?;
                    self.push(PickleValue::Str(bytes.iter().map(|&b| char::from(b)).collect()));
                },
                op::BINSTRING => {
                    let n = self.read_i32()?;
                    let n = usize::try_from(n).map_err(|_| corrupt("negative BINSTRING length"))?;
                    let bytes = self.read_bytes(n)?;
                    self.push(PickleValue::Str(bytes.iter().map(|&b| char::from(b)).collect()));
                },
                op::SHORT_BINBYTES => {
                    let n = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(n)?;
                    self.push(PickleValue::Bytes(bytes));
                },
                op::BINBYTES => {
                    let n = self.read_u32()? as usize;
                    let bytes = self.read_bytes(n)?;
                    self.push(PickleValue::Bytes(bytes));
                },
                op::BINBYTES8 => {
                    let n = self.read_len64()?;
                    let bytes = self.read_bytes(n)?;
                    self.push(PickleValue::Bytes(bytes));
                },

                op::EMPTY_DICT => self.push(PickleValue::Dict(Vec::new())),
                op::EMPTY_LIST => self.push(PickleValue::List(Vec::new())),
                op::EMPTY_TUPLE => self.push(PickleValue::Tuple(Vec::new())),
                op::MARK => {
                    let outer = std::mem::take(&mut self.stack);
                    self.metastack.push(outer);
                },
                op::POP_MARK => {
                    self.pop_mark()?;
                },
                op::POP => {
                    self.pop()?;
                },
                op::DUP => {
                    let top = self.stack.last().ok_or_else(|| corrupt("DUP on empty stack"))?;
                    let copy = Slot {
                        value: top.value.clone(),
                        depth: top.depth,
                        memo: top.memo,
                    };
                    self.stack.push(copy);
                },
                op::TUPLE => {
                    let (items, depth) = self.pop_mark()?;
                    self.push_container(PickleValue::Tuple(items), depth)?;
                },
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let n = usize::from(opcode - op::TUPLE1 + 1);
                    let mut items = Vec::with_capacity(n);
                    let mut depth = 0;
                    for _ in 0..n {
                        let (item, item_depth) = self.pop()?;
                        items.push(item);
                        depth = depth.max(item_depth);
                    }
                    items.reverse();
                    self.push_container(PickleValue::Tuple(items), depth)?;
                },
                op::LIST => {
                    let (items, depth) = self.pop_mark()?;
                    self.push_container(PickleValue::List(items), depth)?;
                },
                op::DICT => {
                    let (items, depth) = self.pop_mark()?;
                    let pairs = into_pairs(items)?;
                    self.push_container(PickleValue::Dict(pairs), depth)?;
                },
                op::APPEND => {
                    let (item, depth) = self.pop()?;
                    self.list_top(depth)?.push(item);
                },
                op::APPENDS => {
                    let (items, depth) = self.pop_mark()?;
                    self.list_top(depth)?.extend(items);
                },
                op::SETITEM => {
                    let (value, value_depth) = self.pop()?;
                    let (key, key_depth) = self.pop()?;
                    self.dict_top(value_depth.max(key_depth))?.push((key, value));
                },
                op::SETITEMS => {
                    let (items, depth) = self.pop_mark()?;
                    let pairs = into_pairs(items)?;
                    self.dict_top(depth)?.extend(pairs);
                },

                op::PUT => {
                    let line = self.read_line()?;
                    let id = line
                        .parse::<u32>()
                        .map_err(|_| corrupt(format!("bad PUT index '{}'", line)))?;
                    self.memo_put(id)?;
                },
                op::BINPUT => {
                    let id = u32::from(self.read_u8()?);
                    self.memo_put(id)?;
                },
                op::LONG_BINPUT => {
                    let id = self.read_u32()?;
                    self.memo_put(id)?;
                },
                op::MEMOIZE => {
                    let id = u32::try_from(self.memo.len())
                        .map_err(|_| corrupt("memo table overflow"))?;
                    self.memo_put(id)?;
                },
                op::GET => {
                    let line = self.read_line()?;
                    let id = line
                        .parse::<u32>()
                        .map_err(|_| corrupt(format!("bad GET index '{}'", line)))?;
                    self.memo_get(id)?;
                },
                op::BINGET => {
                    let id = u32::from(self.read_u8()?);
                    self.memo_get(id)?;
                },
                op::LONG_BINGET => {
                    let id = self.read_u32()?;
                    self.memo_get(id)?;
                },

                other => {
                    return Err(corrupt(format!(
                        "unsupported opcode 0x{:02x} at offset {}",
                        other, offset
                    )));
                },
            }
        }
    }

    /// Push a scalar or a freshly created empty container.
    fn push(&mut self, value: PickleValue) {
        let depth = match value {
            PickleValue::List(_) | PickleValue::Tuple(_) | PickleValue::Dict(_) => 1,
            _ => 0,
        };
        self.stack.push(Slot {
            value,
            depth,
            memo: None,
        });
    }

    /// Push a container built from items nested `inner_depth` deep.
    fn push_container(&mut self, value: PickleValue, inner_depth: usize) -> Result<()> {
        let depth = nested_depth(1, inner_depth)?;
        self.stack.push(Slot {
            value,
            depth,
            memo: None,
        });
        Ok(())
    }

    /// Pop the top value and its depth, finalizing its memo entry.
    fn pop(&mut self) -> Result<(PickleValue, usize)> {
        let slot = self.stack.pop().ok_or_else(|| corrupt("stack underflow"))?;
        let depth = slot.depth;
        Ok((self.retire(slot), depth))
    }

    /// Pop everything above the last MARK, with the deepest item depth.
    fn pop_mark(&mut self) -> Result<(Vec<PickleValue>, usize)> {
        let outer = self.metastack.pop().ok_or_else(|| corrupt("no MARK on the stack"))?;
        let items = std::mem::replace(&mut self.stack, outer);
        let depth = items.iter().map(|slot| slot.depth).max().unwrap_or(0);
        let values = items.into_iter().map(|slot| self.retire(slot)).collect();
        Ok((values, depth))
    }

    fn retire(&mut self, slot: Slot) -> PickleValue {
        if let Some(id) = slot.memo {
            if matches!(self.memo.get(&id), Some(MemoEntry::Live)) {
                self.memo
                    .insert(id, MemoEntry::Value(slot.value.clone(), slot.depth));
            }
        }
        slot.value
    }

    /// The list on top of the stack, about to receive items `item_depth` deep.
    fn list_top(&mut self, item_depth: usize) -> Result<&mut Vec<PickleValue>> {
        let slot = self.stack.last_mut().ok_or_else(|| corrupt("stack underflow"))?;
        slot.depth = nested_depth(slot.depth, item_depth)?;
        match &mut slot.value {
            PickleValue::List(items) => Ok(items),
            other => Err(corrupt(format!("cannot append to {}", other.type_name()))),
        }
    }

    /// The dict on top of the stack, about to receive items `item_depth` deep.
    fn dict_top(&mut self, item_depth: usize) -> Result<&mut Vec<(PickleValue, PickleValue)>> {
        let slot = self.stack.last_mut().ok_or_else(|| corrupt("stack underflow"))?;
        slot.depth = nested_depth(slot.depth, item_depth)?;
        match &mut slot.value {
            PickleValue::Dict(pairs) => Ok(pairs),
            other => Err(corrupt(format!("cannot set item on {}", other.type_name()))),
        }
    }

    fn memo_put(&mut self, id: u32) -> Result<()> {
        let top = self.stack.last_mut().ok_or_else(|| corrupt("memo put on empty stack"))?;
        if top.value.is_mutable() {
            top.memo = Some(id);
            self.memo.insert(id, MemoEntry::Live);
        } else {
            self.memo
                .insert(id, MemoEntry::Value(top.value.clone(), top.depth));
        }
        Ok(())
    }

    fn memo_get(&mut self, id: u32) -> Result<()> {
        let (value, depth) = match self.memo.get(&id) {
            Some(MemoEntry::Value(value, depth)) => (value.clone(), *depth),
            Some(MemoEntry::Live) => self
                .metastack
                .iter()
                .flatten()
                .chain(self.stack.iter())
                .rev()
                .find(|slot| slot.memo == Some(id))
                .map(|slot| (slot.value.clone(), slot.depth))
                .ok_or_else(|| corrupt(format!("memo entry {} is not reachable", id)))?,
            None => return Err(corrupt(format!("memo entry {} was never stored", id))),
        };
        self.stack.push(Slot {
            value,
            depth,
            memo: None,
        });
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let offset = self.input.position();
        self.input.read_u8().map_err(|_| truncated(offset))
    }

    fn read_u16(&mut self) -> Result<u16> {
        let offset = self.input.position();
        self.input.read_u16::<LittleEndian>().map_err(|_| truncated(offset))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let offset = self.input.position();
        self.input.read_i32::<LittleEndian>().map_err(|_| truncated(offset))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let offset = self.input.position();
        self.input.read_u32::<LittleEndian>().map_err(|_| truncated(offset))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let offset = self.input.position();
        self.input.read_u64::<LittleEndian>().map_err(|_| truncated(offset))
    }

    fn read_len64(&mut self) -> Result<usize> {
        let n = self.read_u64()?;
        usize::try_from(n).map_err(|_| corrupt(format!("length {} too large", n)))
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let offset = self.input.position();
        let remaining = (self.input.get_ref().len() as u64).saturating_sub(offset);
        if n as u64 > remaining {
            return Err(truncated(offset));
        }
        let mut buf = vec![0u8; n];
        self.input.read_exact(&mut buf).map_err(|_| truncated(offset))?;
        Ok(buf)
    }

    fn read_utf8(&mut self, n: usize) -> Result<String> {
        let bytes = self.read_bytes(n)?;
        String::from_utf8(bytes).map_err(|e| corrupt(format!("invalid UTF-8 string: {}", e)))
    }

    /// Read a newline-terminated argument of the text opcodes.
    fn read_line(&mut self) -> Result<String> {
        let offset = self.input.position();
        let mut line = Vec::new();
        loop {
            let b = self.input.read_u8().map_err(|_| truncated(offset))?;
            if b == b'\n' {
                break;
            }
            line.push(b);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line).map_err(|_| corrupt(format!("non-UTF-8 argument at offset {}", offset)))
    }
}

fn corrupt(reason: impl Into<String>) -> Error {
    Error::corrupt(reason)
}

fn truncated(offset: u64) -> Error {
    corrupt(format!("pickle truncated at offset {}", offset))
}

/// Depth of a container at `current` depth after adding items `item_depth` deep.
fn nested_depth(current: usize, item_depth: usize) -> Result<usize> {
    let depth = current.max(item_depth + 1);
    if depth > MAX_NESTING_DEPTH {
        return Err(corrupt(format!(
            "containers nested deeper than {} levels",
            MAX_NESTING_DEPTH
        )));
    }
    Ok(depth)
}

fn into_pairs(items: Vec<PickleValue>) -> Result<Vec<(PickleValue, PickleValue)>> {
    if items.len() % 2 != 0 {
        return Err(corrupt("odd number of items for dict"));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// Little-endian two's complement integer of LONG1/LONG4.
fn decode_long(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 8 {
        return Err(corrupt(format!("{}-byte integer does not fit in 64 bits", bytes.len())));
    }
    let fill = if bytes[bytes.len() - 1] & 0x80 != 0 {
        0xff
    } else {
        0x00
    };
    let mut buf = [fill; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(i64::from_le_bytes(buf))
}

fn parse_int(text: &str) -> Result<i64> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| corrupt(format!("bad integer literal '{}'", text)))
}

/// Decode the `raw-unicode-escape` text of the protocol 0 UNICODE opcode.
fn decode_raw_unicode_escape(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let width = match chars.peek() {
            Some('u') => 4,
            Some('U') => 8,
            _ => {
                out.push(c);
                continue;
            },
        };
        chars.next();
        let hex: String = chars.by_ref().take(width).collect();
        let cp = u32::from_str_radix(&hex, 16)
            .ok()
            .filter(|_| hex.len() == width)
            .and_then(char::from_u32)
            .ok_or_else(|| corrupt(format!("bad escape '\\{}'", hex)))?;
        out.push(cp);
    }
    Ok(out)
}
