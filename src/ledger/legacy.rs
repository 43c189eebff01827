// Legacy ledger reader
//
// Early versions stored the ledger as a pickled Python dict (protocol 0, the
// text protocol), path -> hex digest. Such a file always starts with '(' (MARK).
// This reader understands exactly the opcodes a pickled dict of strings uses;
// anything else is rejected. The format is read-only: ledgers are always written
// back in the line format, so each file is migrated on its first run.

use std::collections::{BTreeMap, HashMap};

/// First byte of a legacy ledger.
pub const MARKER: u8 = b'(';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyError {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
enum Value {
    Mark,
    Str(String),
    Dict(BTreeMap<String, String>),
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Reader<'a> {
    fn fail<T>(&self, reason: impl Into<String>) -> Result<T, LegacyError> {
        Err(LegacyError {
            line: self.line,
            reason: reason.into(),
        })
    }

    /// Bytes up to the next newline (exclusive), consuming the newline.
    fn arg(&mut self) -> Result<&'a [u8], LegacyError> {
        let rest = &self.data[self.pos..];
        let Some(end) = rest.iter().position(|&b| b == b'\n') else {
            return self.fail("unterminated argument");
        };
        self.pos += end + 1;
        self.line += 1;
        let arg = &rest[..end];
        Ok(arg.strip_suffix(b"\r").unwrap_or(arg))
    }
}

fn pop_str(stack: &mut Vec<Value>, reader: &Reader<'_>) -> Result<String, LegacyError> {
    match stack.pop() {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => reader.fail(format!("expected string, found {:?}", other)),
        None => reader.fail("stack underflow"),
    }
}

fn pop_to_mark(stack: &mut Vec<Value>, reader: &Reader<'_>) -> Result<Vec<Value>, LegacyError> {
    let Some(mark) = stack.iter().rposition(|v| matches!(v, Value::Mark)) else {
        return reader.fail("no MARK on stack");
    };
    let items = stack.split_off(mark + 1);
    stack.pop();
    Ok(items)
}

fn insert_pairs(
    dict: &mut BTreeMap<String, String>,
    items: Vec<Value>,
    reader: &Reader<'_>,
) -> Result<(), LegacyError> {
    if items.len() % 2 != 0 {
        return reader.fail("odd number of dict items");
    }
    let mut items = items.into_iter();
    while let (Some(k), Some(v)) = (items.next(), items.next()) {
        match (k, v) {
            (Value::Str(k), Value::Str(v)) => {
                dict.insert(k, v);
            }
            _ => return reader.fail("dict items must be strings"),
        }
    }
    Ok(())
}

/// Decode the argument of an `S` opcode: a Python string literal.
fn decode_quoted(raw: &[u8]) -> Option<String> {
    let quote = *raw.first()?;
    if raw.len() < 2 || !matches!(quote, b'\'' | b'"') || raw[raw.len() - 1] != quote {
        return None;
    }
    let body = &raw[1..raw.len() - 1];

    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        let b = body[i];
        i += 1;
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let esc = *body.get(i)?;
        i += 1;
        match esc {
            b'\\' | b'\'' | b'"' => out.push(esc),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'x' => {
                let hex = std::str::from_utf8(body.get(i..i + 2)?).ok()?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 2;
            }
            b'0'..=b'7' => {
                let mut value = u32::from(esc - b'0');
                for _ in 0..2 {
                    match body.get(i) {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            i += 1;
                        }
                        _ => break,
                    }
                }
                out.push(u8::try_from(value).ok()?);
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Some(String::from_utf8_lossy(&out).into_owned())
}

/// Decode the argument of a `V` opcode (raw-unicode-escape).
fn decode_raw_unicode(raw: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && matches!(raw.get(i + 1), Some(b'u' | b'U')) {
            let width = if raw[i + 1] == b'u' { 4 } else { 8 };
            let hex = std::str::from_utf8(raw.get(i + 2..i + 2 + width)?).ok()?;
            out.push(char::from_u32(u32::from_str_radix(hex, 16).ok()?)?);
            i += 2 + width;
        } else {
            // Everything below U+0100 is stored as its Latin-1 byte.
            out.push(char::from(raw[i]));
            i += 1;
        }
    }
    Some(out)
}

/// Read a legacy ledger into a path -> digest map.
pub fn parse(data: &[u8]) -> Result<BTreeMap<String, String>, LegacyError> {
    let mut reader = Reader {
        data,
        pos: 0,
        line: 1,
    };
    let mut stack: Vec<Value> = Vec::new();
    let mut memo: HashMap<Vec<u8>, Value> = HashMap::new();

    while reader.pos < data.len() {
        let op = data[reader.pos];
        reader.pos += 1;

        match op {
            b'(' => stack.push(Value::Mark),
            b'}' => stack.push(Value::Dict(BTreeMap::new())),
            b'd' => {
                let items = pop_to_mark(&mut stack, &reader)?;
                let mut dict = BTreeMap::new();
                insert_pairs(&mut dict, items, &reader)?;
                stack.push(Value::Dict(dict));
            }
            b's' => {
                let value = pop_str(&mut stack, &reader)?;
                let key = pop_str(&mut stack, &reader)?;
                match stack.last_mut() {
                    Some(Value::Dict(dict)) => {
                        dict.insert(key, value);
                    }
                    _ => return reader.fail("SETITEM without a dict"),
                }
            }
            b'u' => {
                let items = pop_to_mark(&mut stack, &reader)?;
                let mut dict = match stack.pop() {
                    Some(Value::Dict(dict)) => dict,
                    _ => return reader.fail("SETITEMS without a dict"),
                };
                insert_pairs(&mut dict, items, &reader)?;
                stack.push(Value::Dict(dict));
            }
            b'S' => {
                let arg = reader.arg()?;
                match decode_quoted(arg) {
                    Some(s) => stack.push(Value::Str(s)),
                    None => return reader.fail("bad string literal"),
                }
            }
            b'V' => {
                let arg = reader.arg()?;
                match decode_raw_unicode(arg) {
                    Some(s) => stack.push(Value::Str(s)),
                    None => return reader.fail("bad unicode literal"),
                }
            }
            b'p' => {
                let key = reader.arg()?.to_vec();
                match stack.last() {
                    Some(top) => {
                        memo.insert(key, top.clone());
                    }
                    None => return reader.fail("PUT on empty stack"),
                }
            }
            b'g' => {
                let key = reader.arg()?;
                match memo.get(key) {
                    Some(value) => stack.push(value.clone()),
                    None => return reader.fail("GET of unknown memo key"),
                }
            }
            b'0' => {
                if stack.pop().is_none() {
                    return reader.fail("POP on empty stack");
                }
            }
            b'.' => {
                return match stack.pop() {
                    Some(Value::Dict(dict)) => Ok(dict),
                    _ => reader.fail("pickle does not hold a dict"),
                };
            }
            other => {
                return reader.fail(format!("unsupported opcode {:?}", char::from(other)));
            }
        }
    }

    reader.fail("missing STOP opcode")
}
