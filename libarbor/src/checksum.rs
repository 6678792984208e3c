use crate::error::{ArborGenericError, ArborResult};
use rustc_hex::{FromHex, ToHex};
use sha1::digest::Output;
use sha1::{Digest, Sha1};
use std::fmt::{self, Debug, Display, Formatter};
use std::io::{self, Read};
use std::str::FromStr;

/// SHA-1 digest over the raw bytes of a file's text
#[derive(PartialEq, Eq, Hash, Clone, Ord, PartialOrd, Copy)]
#[repr(transparent)]
pub struct Checksum([u8; 20]);

impl From<Output<Sha1>> for Checksum {
    fn from(digest: Output<Sha1>) -> Self {
        Self(digest.into())
    }
}

// lets tests name digests as hex literals
#[cfg(test)]
impl<'a> From<&'a str> for Checksum {
    fn from(hex: &'a str) -> Self {
        hex.parse().unwrap()
    }
}

impl Checksum {
    /// digest of the empty byte string
    // da39a3ee5e6b4b0d3255bfef95601890afd80709
    pub const EMPTY: Self = Self([
        0xda, 0x39, 0xa3, 0xee, 0x5e, 0x6b, 0x4b, 0x0d, 0x32, 0x55, 0xbf, 0xef, 0x95, 0x60, 0x18,
        0x90, 0xaf, 0xd8, 0x07, 0x09,
    ]);

    #[inline]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl FromStr for Checksum {
    type Err = ArborGenericError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let digest: Vec<u8> = input.trim_end().from_hex()?;
        let digest = <[u8; 20]>::try_from(digest)
            .map_err(|_| anyhow!("checksum must be exactly 40 hex digits"))?;
        Ok(Self(digest))
    }
}

impl AsRef<[u8]> for Checksum {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let hex = self.0.to_hex::<String>();
        if f.alternate() { write!(f, "{}", &hex[..7]) } else { write!(f, "{}", hex) }
    }
}

pub fn hash_bytes(bytes: impl AsRef<[u8]>) -> Checksum {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    Checksum::from(hasher.finalize())
}

/// hashes all bytes read through it so a streamed file text can be verified
/// against its declared checksum once drained
pub struct HashingReader<R> {
    reader: R,
    hasher: Sha1,
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

impl<R: Read> HashingReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, hasher: Sha1::new() }
    }

    pub fn finalize(self) -> Checksum {
        Checksum::from(self.hasher.finalize())
    }

    /// drain the stream, returning the bytes only if they match `expected`
    pub fn read_verified(mut self, expected: Checksum) -> ArborResult<Vec<u8>> {
        let mut bytes = vec![];
        self.reader.read_to_end(&mut bytes)?;
        self.hasher.update(&bytes);
        let actual = self.finalize();
        ensure_eq!(
            actual,
            expected,
            "checksum mismatch: expected `{}`, actual `{}`",
            expected,
            actual
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests;
