use crate::conn::WireConn;
use crate::error::{ArborError, ArborGenericError, ArborResult};
use crate::item::{Item, ItemBuf};
use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter};
use std::io::{Read, Write};
use std::iter::Peekable;
use std::str::Chars;

/// a committed revision number
///
/// "no revision" (the current transaction, an omitted optional field) is
/// represented out-of-band as `Option<Revnum>`; there is no in-band sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revnum(pub u64);

impl Revnum {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for Revnum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// one argument of a tuple write, matching a format letter positionally
///
/// a `None` payload is written as nothing inside an optional group and is a
/// programming error outside one
#[derive(Debug)]
pub enum Arg<'a> {
    Number(u64),
    Rev(Option<Revnum>),
    Str(Option<&'a [u8]>),
    CStr(Option<&'a str>),
    Word(Option<&'a str>),
    List(Option<&'a [ItemBuf]>),
}

/// one parsed tuple field; `Absent` marks an optional field omitted on the wire
#[derive(Debug, PartialEq)]
pub enum Field<'b> {
    Number(u64),
    Rev(Revnum),
    Str(&'b [u8]),
    CStr(&'b str),
    Word(&'b str),
    List(&'b [Item<'b>]),
    Absent,
}

#[derive(Debug)]
pub struct Fields<'b>(SmallVec<[Field<'b>; 8]>);

fn malformed(msg: impl Into<String>) -> ArborGenericError {
    ArborError::MalformedData(msg.into()).into()
}

impl<S: Read + Write> WireConn<S> {
    /// write `( ` items per `fmt` `) `, eliding `None` values inside optional
    /// groups
    ///
    /// format letters: `n` number, `r` revision, `s` string, `c` c-string,
    /// `w` word, `l` list; `(`/`)` required group, `[`/`]` optional group
    pub fn write_tuple(&mut self, fmt: &str, args: &[Arg<'_>]) -> ArborResult<()> {
        self.start_list()?;
        let mut args = args.iter();
        let mut opt_depth = 0usize;
        for letter in fmt.chars() {
            match letter {
                '[' => {
                    opt_depth += 1;
                    self.start_list()?;
                }
                ']' => {
                    assert!(opt_depth > 0, "unbalanced `]` in tuple format `{}`", fmt);
                    opt_depth -= 1;
                    self.end_list()?;
                }
                '(' => self.start_list()?,
                ')' => self.end_list()?,
                letter => {
                    let arg = args
                        .next()
                        .unwrap_or_else(|| panic!("too few arguments for format `{}`", fmt));
                    self.write_arg(letter, arg, opt_depth > 0)?;
                }
            }
        }
        assert!(args.next().is_none(), "too many arguments for format `{}`", fmt);
        self.end_list()
    }

    fn write_arg(&mut self, letter: char, arg: &Arg<'_>, optional: bool) -> ArborResult<()> {
        macro_rules! required {
            ($opt:expr) => {
                match $opt {
                    Some(value) => value,
                    // a missing value is only meaningful inside an optional group
                    None if optional => return Ok(()),
                    None => panic!("missing value for required tuple field `{}`", letter),
                }
            };
        }
        match (letter, arg) {
            ('n', Arg::Number(n)) => self.write_number(*n),
            ('r', Arg::Rev(rev)) => self.write_number(required!(rev).0),
            ('s', Arg::Str(s)) => self.write_str(required!(*s)),
            ('c', Arg::CStr(s)) => self.write_str(required!(*s).as_bytes()),
            ('w', Arg::Word(w)) => self.write_word(required!(*w)),
            ('l', Arg::List(items)) => {
                let items = required!(*items);
                self.start_list()?;
                for item in items {
                    self.write_item(item)?;
                }
                self.end_list()
            }
            (letter, arg) => panic!("tuple format letter `{}` mismatches argument {:?}", letter, arg),
        }
    }
}

/// interpret a parsed list against a format descriptor
///
/// extra trailing items are tolerated for forward compatibility; a missing
/// item is malformed unless it falls inside an optional group, in which case
/// the field comes back [Field::Absent]
pub fn parse_tuple<'b>(list: &'b [Item<'b>], fmt: &str) -> ArborResult<Fields<'b>> {
    let mut fields = smallvec![];
    let mut chars = fmt.chars().peekable();
    parse_group(list, &mut chars, false, &mut fields)?;
    assert!(chars.next().is_none(), "unbalanced tuple format `{}`", fmt);
    Ok(Fields(fields))
}

fn parse_group<'b>(
    items: &'b [Item<'b>],
    fmt: &mut Peekable<Chars<'_>>,
    optional: bool,
    out: &mut SmallVec<[Field<'b>; 8]>,
) -> ArborResult<()> {
    let mut index = 0;
    while let Some(&letter) = fmt.peek() {
        if letter == ')' || letter == ']' {
            return Ok(());
        }
        fmt.next();
        let item = items.get(index);
        match letter {
            '(' | '[' => {
                let inner_optional = optional || letter == '[';
                match item {
                    Some(Item::List(inner)) => {
                        parse_group(inner, fmt, inner_optional, out)?;
                    }
                    Some(other) => {
                        return Err(malformed(format!(
                            "expected a list for `{}` group, found {}",
                            letter,
                            other.kind()
                        )));
                    }
                    None if inner_optional => fill_absent(fmt, out),
                    None => return Err(malformed("tuple is missing a required group")),
                }
                // consume the matching closer
                match fmt.next() {
                    Some(')' | ']') => {}
                    _ => panic!("unbalanced group in tuple format"),
                }
            }
            letter => match item {
                Some(item) => out.push(parse_field(letter, item)?),
                None if optional => out.push(Field::Absent),
                None => {
                    return Err(malformed(format!(
                        "tuple is missing an item for format letter `{}`",
                        letter
                    )));
                }
            },
        }
        index += 1;
    }
    Ok(())
}

/// a wholly absent optional group yields `Absent` for each of its letters so
/// field positions stay aligned
fn fill_absent(fmt: &mut Peekable<Chars<'_>>, out: &mut SmallVec<[Field<'_>; 8]>) {
    let mut depth = 0usize;
    while let Some(&letter) = fmt.peek() {
        match letter {
            '(' | '[' => depth += 1,
            ')' | ']' => {
                if depth == 0 {
                    return;
                }
                depth -= 1;
            }
            _ => out.push(Field::Absent),
        }
        fmt.next();
    }
}

fn parse_field<'b>(letter: char, item: &'b Item<'b>) -> ArborResult<Field<'b>> {
    let mismatch = |expected: &str| {
        malformed(format!("expected {} for format letter `{}`, found {}", expected, letter, item.kind()))
    };
    let field = match letter {
        'n' => Field::Number(item.as_number().ok_or_else(|| mismatch("number"))?),
        'r' => Field::Rev(Revnum(item.as_number().ok_or_else(|| mismatch("revision number"))?)),
        's' => Field::Str(item.as_str().ok_or_else(|| mismatch("string"))?),
        'c' => {
            let bytes = item.as_str().ok_or_else(|| mismatch("string"))?;
            if bytes.contains(&0) {
                return Err(malformed("embedded NUL in c-string field"));
            }
            Field::CStr(
                std::str::from_utf8(bytes)
                    .map_err(|_| malformed("c-string field is not valid utf-8"))?,
            )
        }
        'w' => Field::Word(item.as_word().ok_or_else(|| mismatch("word"))?),
        'l' => Field::List(item.as_list().ok_or_else(|| mismatch("list"))?),
        letter => panic!("unknown tuple format letter `{}`", letter),
    };
    Ok(field)
}

impl<'b> Fields<'b> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn get(&self, index: usize) -> ArborResult<&Field<'b>> {
        self.0.get(index).ok_or_else(|| malformed(format!("no tuple field at index {}", index)))
    }

    pub fn number(&self, index: usize) -> ArborResult<u64> {
        match *self.get(index)? {
            Field::Number(n) => Ok(n),
            ref field => Err(malformed(format!("field {} is not a number: {:?}", index, field))),
        }
    }

    pub fn rev(&self, index: usize) -> ArborResult<Revnum> {
        match *self.get(index)? {
            Field::Rev(rev) => Ok(rev),
            ref field => Err(malformed(format!("field {} is not a revision: {:?}", index, field))),
        }
    }

    pub fn opt_rev(&self, index: usize) -> ArborResult<Option<Revnum>> {
        match *self.get(index)? {
            Field::Rev(rev) => Ok(Some(rev)),
            Field::Absent => Ok(None),
            ref field => Err(malformed(format!("field {} is not a revision: {:?}", index, field))),
        }
    }

    pub fn bytes(&self, index: usize) -> ArborResult<&'b [u8]> {
        match *self.get(index)? {
            Field::Str(s) => Ok(s),
            ref field => Err(malformed(format!("field {} is not a string: {:?}", index, field))),
        }
    }

    pub fn opt_bytes(&self, index: usize) -> ArborResult<Option<&'b [u8]>> {
        match *self.get(index)? {
            Field::Str(s) => Ok(Some(s)),
            Field::Absent => Ok(None),
            ref field => Err(malformed(format!("field {} is not a string: {:?}", index, field))),
        }
    }

    pub fn cstr(&self, index: usize) -> ArborResult<&'b str> {
        match *self.get(index)? {
            Field::CStr(s) => Ok(s),
            ref field => Err(malformed(format!("field {} is not a c-string: {:?}", index, field))),
        }
    }

    pub fn opt_cstr(&self, index: usize) -> ArborResult<Option<&'b str>> {
        match *self.get(index)? {
            Field::CStr(s) => Ok(Some(s)),
            Field::Absent => Ok(None),
            ref field => Err(malformed(format!("field {} is not a c-string: {:?}", index, field))),
        }
    }

    pub fn word(&self, index: usize) -> ArborResult<&'b str> {
        match *self.get(index)? {
            Field::Word(w) => Ok(w),
            ref field => Err(malformed(format!("field {} is not a word: {:?}", index, field))),
        }
    }

    pub fn opt_word(&self, index: usize) -> ArborResult<Option<&'b str>> {
        match *self.get(index)? {
            Field::Word(w) => Ok(Some(w)),
            Field::Absent => Ok(None),
            ref field => Err(malformed(format!("field {} is not a word: {:?}", index, field))),
        }
    }

    pub fn list(&self, index: usize) -> ArborResult<&'b [Item<'b>]> {
        match *self.get(index)? {
            Field::List(items) => Ok(items),
            ref field => Err(malformed(format!("field {} is not a list: {:?}", index, field))),
        }
    }

    pub fn opt_list(&self, index: usize) -> ArborResult<Option<&'b [Item<'b>]>> {
        match *self.get(index)? {
            Field::List(items) => Ok(Some(items)),
            Field::Absent => Ok(None),
            ref field => Err(malformed(format!("field {} is not a list: {:?}", index, field))),
        }
    }
}

#[cfg(test)]
mod tests;
