//! Codec for the Python-marshal dictionaries spoken by `p4 -G`.
//!
//! Only the subset Perforce emits is supported: version-0 dictionaries whose
//! keys are strings and whose values are strings or 32-bit integers.

use std::collections::BTreeMap;

use crate::errors::P4Error;

const TYPE_DICT: u8 = b'{';
const TYPE_NULL: u8 = b'0';
const TYPE_NONE: u8 = b'N';
const TYPE_INT: u8 = b'i';
const TYPE_STRING: u8 = b's';
const TYPE_INTERNED: u8 = b't';
const TYPE_UNICODE: u8 = b'u';

/// A decoded marshal value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Int(i32),
    None,
}

impl Value {
    /// String form of the value; integers are formatted in decimal.
    pub fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Int(i) => i.to_string(),
            Self::None => String::new(),
        }
    }
}

/// One marshalled dictionary.
pub type Dict = BTreeMap<String, Value>;

/// Decode a concatenation of dictionaries, as written to stdout by `p4 -G`.
pub fn decode_stream(bytes: &[u8]) -> Result<Vec<Dict>, P4Error> {
    let mut reader = Reader { buf: bytes, pos: 0 };
    let mut dicts = Vec::new();
    while !reader.at_end() {
        let tag = reader.byte()?;
        if tag != TYPE_DICT {
            return Err(P4Error::MalformedOutput(format!(
                "expected dictionary at offset {}, found 0x{:02x}",
                reader.pos - 1,
                tag
            )));
        }
        dicts.push(reader.dict()?);
    }
    Ok(dicts)
}

/// Encode a flat string dictionary, as read from stdin by `p4 -G <cmd> -i`.
pub fn encode_dict(fields: &[(&str, &str)]) -> Vec<u8> {
    let mut out = vec![TYPE_DICT];
    for (key, value) in fields {
        write_string(&mut out, key);
        write_string(&mut out, value);
    }
    out.push(TYPE_NULL);
    out
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.push(TYPE_STRING);
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], P4Error> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(P4Error::MalformedOutput(format!(
                "truncated stream: wanted {} bytes at offset {}",
                n, self.pos
            ))),
        }
    }

    fn byte(&mut self) -> Result<u8, P4Error> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32, P4Error> {
        let raw = self.take(4)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn dict(&mut self) -> Result<Dict, P4Error> {
        let mut dict = Dict::new();
        loop {
            let key = match self.value()? {
                None => return Ok(dict),
                Some(Value::Str(key)) => key,
                Some(other) => {
                    return Err(P4Error::MalformedOutput(format!(
                        "non-string dictionary key: {:?}",
                        other
                    )))
                }
            };
            let value = self.value()?.ok_or_else(|| {
                P4Error::MalformedOutput(format!("dictionary key '{}' has no value", key))
            })?;
            dict.insert(key, value);
        }
    }

    /// Read one value; `None` marks the end of the enclosing dictionary.
    fn value(&mut self) -> Result<Option<Value>, P4Error> {
        let tag = self.byte()?;
        let value = match tag {
            TYPE_NULL => return Ok(None),
            TYPE_NONE => Value::None,
            TYPE_INT => Value::Int(self.i32()?),
            TYPE_STRING | TYPE_INTERNED | TYPE_UNICODE => {
                let len = self.i32()?;
                let len = usize::try_from(len).map_err(|_| {
                    P4Error::MalformedOutput(format!("negative string length {}", len))
                })?;
                let raw = self.take(len)?;
                Value::Str(String::from_utf8_lossy(raw).into_owned())
            }
            other => {
                return Err(P4Error::MalformedOutput(format!(
                    "unsupported marshal type 0x{:02x} at offset {}",
                    other,
                    self.pos - 1
                )))
            }
        };
        Ok(Some(value))
    }
}
