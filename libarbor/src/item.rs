use crate::conn::WireConn;
use crate::error::{ArborError, ArborResult};
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use std::fmt::{self, Display, Formatter};
use std::io::{Read, Write};

/// nesting depth past which an inbound item stream is considered hostile
const MAX_NESTING: usize = 64;

/// a parsed wire item; strings and words borrow from the per-exchange arena
#[derive(Debug, PartialEq)]
pub enum Item<'b> {
    Number(u64),
    Str(&'b [u8]),
    Word(&'b str),
    List(BumpVec<'b, Item<'b>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Number,
    Str,
    Word,
    List,
}

impl Display for ItemKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemKind::Number => "number",
            ItemKind::Str => "string",
            ItemKind::Word => "word",
            ItemKind::List => "list",
        };
        write!(f, "{}", s)
    }
}

impl<'b> Item<'b> {
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Number(..) => ItemKind::Number,
            Item::Str(..) => ItemKind::Str,
            Item::Word(..) => ItemKind::Word,
            Item::List(..) => ItemKind::List,
        }
    }

    pub fn as_number(&self) -> Option<u64> {
        match *self {
            Item::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'b [u8]> {
        match *self {
            Item::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_word(&self) -> Option<&'b str> {
        match *self {
            Item::Word(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Item<'b>]> {
        match self {
            Item::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn to_owned(&self) -> ItemBuf {
        match self {
            Item::Number(n) => ItemBuf::Number(*n),
            Item::Str(s) => ItemBuf::Str(s.to_vec()),
            Item::Word(w) => ItemBuf::Word((*w).to_owned()),
            Item::List(items) => ItemBuf::List(items.iter().map(Item::to_owned).collect()),
        }
    }
}

/// owned mirror of [Item] for data that must outlive the exchange arena
#[derive(Debug, Clone, PartialEq)]
pub enum ItemBuf {
    Number(u64),
    Str(Vec<u8>),
    Word(String),
    List(Vec<ItemBuf>),
}

pub fn is_valid_word(s: &str) -> bool {
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn malformed(msg: impl Into<String>) -> crate::error::ArborGenericError {
    ArborError::MalformedData(msg.into()).into()
}

impl<S: Read + Write> WireConn<S> {
    /// every item is terminated by whitespace on the wire
    fn expect_whitespace(&mut self) -> ArborResult<()> {
        match self.getchar()? {
            b' ' | b'\n' => Ok(()),
            byte => Err(malformed(format!("expected whitespace, found `0x{:02x}`", byte))),
        }
    }

    pub fn read_item<'b>(&mut self, arena: &'b Bump) -> ArborResult<Item<'b>> {
        let byte = self.getchar_skip_whitespace()?;
        self.read_item_at(arena, byte, 0)
    }

    /// read one item and require it to be a list, returning its elements as an
    /// arena-backed slice so they share the arena's lifetime
    pub fn read_tuple<'b>(&mut self, arena: &'b Bump) -> ArborResult<&'b [Item<'b>]> {
        match self.read_item(arena)? {
            Item::List(items) => Ok(items.into_bump_slice()),
            item => Err(malformed(format!("expected a tuple, found {}", item.kind()))),
        }
    }

    /// parse one item given its already-consumed first byte
    fn read_item_at<'b>(
        &mut self,
        arena: &'b Bump,
        first: u8,
        depth: usize,
    ) -> ArborResult<Item<'b>> {
        if depth > MAX_NESTING {
            return Err(malformed("items nested too deeply"));
        }
        match first {
            b'0'..=b'9' => self.read_number_or_str(arena, first),
            b'(' => {
                let mut items = BumpVec::new_in(arena);
                loop {
                    match self.getchar_skip_whitespace()? {
                        b')' => return Ok(Item::List(items)),
                        byte => items.push(self.read_item_at(arena, byte, depth + 1)?),
                    }
                }
            }
            byte if byte.is_ascii_alphabetic() => self.read_word(arena, byte),
            byte => Err(malformed(format!("unexpected item byte `0x{:02x}`", byte))),
        }
    }

    /// a leading digit run is either a number or the length prefix of a string
    fn read_number_or_str<'b>(&mut self, arena: &'b Bump, first: u8) -> ArborResult<Item<'b>> {
        let mut value = (first - b'0') as u64;
        loop {
            match self.getchar()? {
                digit @ b'0'..=b'9' => {
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add((digit - b'0') as u64))
                        .ok_or_else(|| malformed("number does not fit in 64 bits"))?;
                }
                b':' => {
                    let len = usize::try_from(value)
                        .map_err(|_| malformed("string length does not fit in memory"))?;
                    let mut bytes = BumpVec::with_capacity_in(len, arena);
                    self.read_exact_with(len, |chunk| bytes.extend_from_slice(chunk))?;
                    self.expect_whitespace()?;
                    return Ok(Item::Str(bytes.into_bump_slice()));
                }
                b' ' | b'\n' => return Ok(Item::Number(value)),
                byte => {
                    return Err(malformed(format!(
                        "unexpected byte `0x{:02x}` inside number",
                        byte
                    )));
                }
            }
        }
    }

    fn read_word<'b>(&mut self, arena: &'b Bump, first: u8) -> ArborResult<Item<'b>> {
        let mut bytes = BumpVec::new_in(arena);
        bytes.push(first);
        loop {
            match self.getchar()? {
                byte if byte.is_ascii_alphanumeric() || byte == b'-' => bytes.push(byte),
                b' ' | b'\n' => break,
                byte => {
                    return Err(malformed(format!("unexpected byte `0x{:02x}` inside word", byte)));
                }
            }
        }
        // the charset check above guarantees ascii
        let word = std::str::from_utf8(bytes.into_bump_slice()).unwrap();
        Ok(Item::Word(word))
    }

    pub fn write_number(&mut self, n: u64) -> ArborResult<()> {
        self.write(n.to_string().as_bytes())?;
        self.write(b" ")
    }

    pub fn write_str(&mut self, bytes: &[u8]) -> ArborResult<()> {
        self.write(format!("{}:", bytes.len()).as_bytes())?;
        self.write(bytes)?;
        self.write(b" ")
    }

    pub fn write_word(&mut self, word: &str) -> ArborResult<()> {
        debug_assert!(is_valid_word(word), "invalid word `{}`", word);
        self.write(word.as_bytes())?;
        self.write(b" ")
    }

    pub fn start_list(&mut self) -> ArborResult<()> {
        self.write(b"( ")
    }

    pub fn end_list(&mut self) -> ArborResult<()> {
        self.write(b") ")
    }

    pub fn write_item(&mut self, item: &ItemBuf) -> ArborResult<()> {
        match item {
            ItemBuf::Number(n) => self.write_number(*n),
            ItemBuf::Str(s) => self.write_str(s),
            ItemBuf::Word(w) => self.write_word(w),
            ItemBuf::List(items) => {
                self.start_list()?;
                for item in items {
                    self.write_item(item)?;
                }
                self.end_list()
            }
        }
    }
}

#[cfg(test)]
mod tests;
