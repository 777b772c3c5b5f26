//! Big-endian NBT (named binary tag) codec, as used inside Anvil chunk payloads.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

const TAG_END: u8 = 0;
const TAG_BYTE: u8 = 1;
const TAG_SHORT: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_LONG: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_BYTE_ARRAY: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_LIST: u8 = 9;
const TAG_COMPOUND: u8 = 10;
const TAG_INT_ARRAY: u8 = 11;
const TAG_LONG_ARRAY: u8 = 12;

/// Nesting limit for lists and compounds. Real chunk data stays far below this.
pub const MAX_DEPTH: usize = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NbtError {
    #[error("unexpected end of data at byte {at} (needed {needed} more)")]
    UnexpectedEof { at: usize, needed: usize },

    #[error("unknown tag type {0}")]
    UnknownTag(u8),

    #[error("root tag is type {0}, expected compound")]
    RootNotCompound(u8),

    #[error("nesting deeper than {0}")]
    TooDeep(usize),

    #[error("negative length {0}")]
    NegativeLength(i32),
}

/// Decoded tag tree. Serializes to plain JSON values (no type annotations).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Tag {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(Vec<Tag>),
    Compound(BTreeMap<String, Tag>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl Tag {
    /// Look up a key when this tag is a compound.
    pub fn get(&self, key: &str) -> Option<&Tag> {
        self.as_compound().and_then(|c| c.get(key))
    }

    /// First key of `keys` present in this compound.
    pub fn get_any(&self, keys: &[&str]) -> Option<&Tag> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn as_compound(&self) -> Option<&BTreeMap<String, Tag>> {
        match self {
            Tag::Compound(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Tag]> {
        match self {
            Tag::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value of any integral tag.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Tag::Byte(v) => Some(v as i64),
            Tag::Short(v) => Some(v as i64),
            Tag::Int(v) => Some(v as i64),
            Tag::Long(v) => Some(v),
            _ => None,
        }
    }

    fn type_id(&self) -> u8 {
        match self {
            Tag::Byte(_) => TAG_BYTE,
            Tag::Short(_) => TAG_SHORT,
            Tag::Int(_) => TAG_INT,
            Tag::Long(_) => TAG_LONG,
            Tag::Float(_) => TAG_FLOAT,
            Tag::Double(_) => TAG_DOUBLE,
            Tag::ByteArray(_) => TAG_BYTE_ARRAY,
            Tag::String(_) => TAG_STRING,
            Tag::List(_) => TAG_LIST,
            Tag::Compound(_) => TAG_COMPOUND,
            Tag::IntArray(_) => TAG_INT_ARRAY,
            Tag::LongArray(_) => TAG_LONG_ARRAY,
        }
    }
}

/// Decode a named root compound. Returns the root name and its tag.
pub fn from_bytes(data: &[u8]) -> Result<(String, Tag), NbtError> {
    let mut reader = Reader { data, pos: 0 };
    let kind = reader.u8()?;
    if kind != TAG_COMPOUND {
        return Err(NbtError::RootNotCompound(kind));
    }
    let name = reader.string()?;
    let root = reader.payload(TAG_COMPOUND, 0)?;
    Ok((name, root))
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], NbtError> {
        let remaining = self.data.len() - self.pos;
        if n > remaining {
            return Err(NbtError::UnexpectedEof {
                at: self.pos,
                needed: n - remaining,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], NbtError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8, NbtError> {
        Ok(self.array::<1>()?[0])
    }

    fn i32(&mut self) -> Result<i32, NbtError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, NbtError> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    /// Array/list length. Each element needs at least `elem_size` bytes, so a length
    /// that cannot fit in what is left is reported before allocating.
    fn len(&mut self, elem_size: usize) -> Result<usize, NbtError> {
        let raw = self.i32()?;
        if raw < 0 {
            return Err(NbtError::NegativeLength(raw));
        }
        let len = raw as usize;
        let remaining = self.data.len() - self.pos;
        let needed = len.saturating_mul(elem_size);
        if needed > remaining {
            return Err(NbtError::UnexpectedEof {
                at: self.pos,
                needed: needed - remaining,
            });
        }
        Ok(len)
    }

    // Java modified UTF-8; anything that is not valid UTF-8 is decoded lossily.
    fn string(&mut self) -> Result<String, NbtError> {
        let len = u16::from_be_bytes(self.array()?) as usize;
        let raw = self.take(len)?;
        Ok(match std::str::from_utf8(raw) {
            Ok(s) => s.to_string(),
            Err(_) => String::from_utf8_lossy(raw).into_owned(),
        })
    }

    fn payload(&mut self, kind: u8, depth: usize) -> Result<Tag, NbtError> {
        if depth > MAX_DEPTH {
            return Err(NbtError::TooDeep(MAX_DEPTH));
        }
        Ok(match kind {
            TAG_BYTE => Tag::Byte(self.u8()? as i8),
            TAG_SHORT => Tag::Short(i16::from_be_bytes(self.array()?)),
            TAG_INT => Tag::Int(self.i32()?),
            TAG_LONG => Tag::Long(self.i64()?),
            TAG_FLOAT => Tag::Float(f32::from_be_bytes(self.array()?)),
            TAG_DOUBLE => Tag::Double(f64::from_be_bytes(self.array()?)),
            TAG_BYTE_ARRAY => {
                let len = self.len(1)?;
                Tag::ByteArray(self.take(len)?.iter().map(|b| *b as i8).collect())
            }
            TAG_STRING => Tag::String(self.string()?),
            TAG_LIST => {
                let inner = self.u8()?;
                // Empty lists are written with element type END.
                let elem_size = if inner == TAG_END { 0 } else { 1 };
                let len = self.len(elem_size)?;
                if inner == TAG_END && len > 0 {
                    return Err(NbtError::UnknownTag(TAG_END));
                }
                let mut items = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    items.push(self.payload(inner, depth + 1)?);
                }
                Tag::List(items)
            }
            TAG_COMPOUND => {
                let mut map = BTreeMap::new();
                loop {
                    let child = self.u8()?;
                    if child == TAG_END {
                        break;
                    }
                    let key = self.string()?;
                    let value = self.payload(child, depth + 1)?;
                    map.insert(key, value);
                }
                Tag::Compound(map)
            }
            TAG_INT_ARRAY => {
                let len = self.len(4)?;
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(self.i32()?);
                }
                Tag::IntArray(out)
            }
            TAG_LONG_ARRAY => {
                let len = self.len(8)?;
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(self.i64()?);
                }
                Tag::LongArray(out)
            }
            other => return Err(NbtError::UnknownTag(other)),
        })
    }
}

/// Encode `root` as a named root compound.
pub fn to_bytes(root_name: &str, root: &Tag) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(root.type_id());
    write_string(&mut out, root_name);
    write_payload(&mut out, root);
    out
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(&bytes[..len]);
}

fn write_payload(out: &mut Vec<u8>, tag: &Tag) {
    match tag {
        Tag::Byte(v) => out.push(*v as u8),
        Tag::Short(v) => out.extend_from_slice(&v.to_be_bytes()),
        Tag::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        Tag::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
        Tag::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
        Tag::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
        Tag::ByteArray(v) => {
            out.extend_from_slice(&(v.len() as i32).to_be_bytes());
            out.extend(v.iter().map(|b| *b as u8));
        }
        Tag::String(s) => write_string(out, s),
        Tag::List(items) => {
            out.push(items.first().map(Tag::type_id).unwrap_or(TAG_END));
            out.extend_from_slice(&(items.len() as i32).to_be_bytes());
            for item in items {
                write_payload(out, item);
            }
        }
        Tag::Compound(map) => {
            for (key, value) in map {
                out.push(value.type_id());
                write_string(out, key);
                write_payload(out, value);
            }
            out.push(TAG_END);
        }
        Tag::IntArray(v) => {
            out.extend_from_slice(&(v.len() as i32).to_be_bytes());
            for n in v {
                out.extend_from_slice(&n.to_be_bytes());
            }
        }
        Tag::LongArray(v) => {
            out.extend_from_slice(&(v.len() as i32).to_be_bytes());
            for n in v {
                out.extend_from_slice(&n.to_be_bytes());
            }
        }
    }
}
