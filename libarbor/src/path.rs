use crate::error::{ArborGenericError, ArborResult};
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

/// canonical repository-relative path
///
/// the empty path names the root; components are separated by single slashes
/// with no leading or trailing slash
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RelPath(String);

impl RelPath {
    pub const ROOT: Self = Self(String::new());

    pub fn new(s: impl Into<String>) -> ArborResult<Self> {
        let s = s.into();
        if !s.is_empty() {
            for component in s.split('/') {
                ensure!(!component.is_empty(), "empty path component in `{}`", s);
                ensure!(component != "." && component != "..", "unnormalized path `{}`", s);
                ensure!(!component.contains('\0'), "embedded NUL in path");
            }
        }
        Ok(Self(s))
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// foo/bar/baz -> [foo, bar, baz]; the root has no components
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    pub fn join(&self, name: &str) -> Self {
        debug_assert!(!name.contains('/'));
        if self.is_root() { Self(name.to_owned()) } else { Self(format!("{}/{}", self.0, name)) }
    }

    pub fn append(&self, rest: &RelPath) -> Self {
        if rest.is_root() {
            self.clone()
        } else if self.is_root() {
            rest.clone()
        } else {
            Self(format!("{}/{}", self.0, rest.0))
        }
    }

    /// split into parent path and final component; `None` for the root
    pub fn split_last(&self) -> Option<(Self, &str)> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(i) => Some((Self(self.0[..i].to_owned()), &self.0[i + 1..])),
            None => Some((Self::ROOT, &self.0)),
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.split_last().map(|(_, name)| name)
    }

    /// whether `prefix` names this path or one of its ancestors
    ///
    /// component-wise, so `trunk/ab` does not start with `trunk/a`
    pub fn starts_with(&self, prefix: &RelPath) -> bool {
        if prefix.is_root() {
            return true;
        }
        match self.0.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

impl FromStr for RelPath {
    type Err = ArborGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Display for RelPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_root() { write!(f, "^/") } else { write!(f, "^/{}", self.0) }
    }
}

impl Debug for RelPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
