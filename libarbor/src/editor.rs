use crate::checksum::{Checksum, HashingReader};
use crate::error::{ArborError, ArborResult};
use crate::path::RelPath;
use crate::tuple::Revnum;
use indexmap::IndexMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::io::Read;
use std::str::FromStr;

/// property name/value pairs; names are raw bytes, not assumed utf-8
pub type Props = IndexMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Dir,
    File,
    Symlink,
    Unknown,
}

impl NodeKind {
    pub fn as_word(self) -> &'static str {
        match self {
            NodeKind::Dir => "dir",
            NodeKind::File => "file",
            NodeKind::Symlink => "symlink",
            NodeKind::Unknown => "unknown",
        }
    }
}

impl FromStr for NodeKind {
    type Err = crate::error::ArborGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dir" => Ok(NodeKind::Dir),
            "file" => Ok(NodeKind::File),
            "symlink" => Ok(NodeKind::Symlink),
            "unknown" => Ok(NodeKind::Unknown),
            _ => Err(ArborError::MalformedData(format!("unknown node kind `{}`", s)).into()),
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_word())
    }
}

/// a `(revision, path)` pair naming a node by a location known to have
/// contained it; `rev: None` addresses the current transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PegPath {
    pub rev: Option<Revnum>,
    pub path: RelPath,
}

impl PegPath {
    pub fn committed(rev: Revnum, path: RelPath) -> Self {
        Self { rev: Some(rev), path }
    }

    pub fn in_txn(path: RelPath) -> Self {
        Self { rev: None, path }
    }
}

impl Display for PegPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.rev {
            Some(rev) => write!(f, "{}@{}", self.path, rev),
            None => write!(f, "{}@txn", self.path),
        }
    }
}

/// a peg plus a relative extension created within the current transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnPath {
    pub peg: PegPath,
    pub created: RelPath,
}

impl TxnPath {
    pub fn new(peg: PegPath, created: RelPath) -> Self {
        Self { peg, created }
    }

    pub fn of_peg(peg: PegPath) -> Self {
        Self { peg, created: RelPath::ROOT }
    }
}

impl Display for TxnPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.created.is_root() {
            write!(f, "{}", self.peg)
        } else {
            write!(f, "{}+{}", self.peg, self.created.as_str())
        }
    }
}

/// opaque node-branch identifier, chosen by the sender at creation time and
/// stable for the duration of one edit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// lazy, finite, non-restartable source of file text
pub type TextSource = Box<dyn Read + Send>;

/// a node's non-structural state as delivered through the editor
///
/// file text arrives as a stream and is materialized (and verified against
/// the declared checksum) by the receiver
pub struct Content {
    pub kind: NodeKind,
    /// committed node whose content forms the base, if any
    pub base: Option<PegPath>,
    pub props: Props,
    pub checksum: Option<Checksum>,
    pub text: Option<TextSource>,
    pub target: Option<Vec<u8>>,
}

impl Content {
    pub fn dir(props: Props) -> Self {
        Self { kind: NodeKind::Dir, base: None, props, checksum: None, text: None, target: None }
    }

    pub fn file(props: Props, checksum: Checksum, text: TextSource) -> Self {
        Self {
            kind: NodeKind::File,
            base: None,
            props,
            checksum: Some(checksum),
            text: Some(text),
            target: None,
        }
    }

    pub fn file_bytes(props: Props, bytes: Vec<u8>) -> Self {
        let checksum = crate::checksum::hash_bytes(&bytes);
        Self::file(props, checksum, Box::new(std::io::Cursor::new(bytes)))
    }

    pub fn symlink(props: Props, target: Vec<u8>) -> Self {
        Self {
            kind: NodeKind::Symlink,
            base: None,
            props,
            checksum: None,
            text: None,
            target: Some(target),
        }
    }

    pub fn with_base(mut self, base: PegPath) -> Self {
        self.base = Some(base);
        self
    }

    /// drain and verify the text stream; a file with no stream keeps its base
    /// text
    pub fn take_text(&mut self) -> ArborResult<Option<Vec<u8>>> {
        let text = match self.text.take() {
            Some(text) => text,
            None => return Ok(None),
        };
        let checksum = self
            .checksum
            .ok_or_else(|| anyhow!("file text stream delivered without a checksum"))?;
        let bytes = HashingReader::new(text).read_verified(checksum)?;
        Ok(Some(bytes))
    }
}

/// [Content] with the text stream drained and verified, safe to retain past
/// the exchange that delivered it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredContent {
    pub kind: NodeKind,
    pub base: Option<PegPath>,
    pub props: Props,
    pub text: Option<Vec<u8>>,
    pub target: Option<Vec<u8>>,
}

impl StoredContent {
    pub fn materialize(mut content: Content) -> ArborResult<Self> {
        let text = content.take_text()?;
        Ok(Self {
            kind: content.kind,
            base: content.base,
            props: content.props,
            text,
            target: content.target,
        })
    }
}

impl Debug for Content {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("kind", &self.kind)
            .field("base", &self.base)
            .field("props", &self.props.len())
            .field("checksum", &self.checksum)
            .field("has_text", &self.text.is_some())
            .field("target", &self.target)
            .finish()
    }
}

bitflags! {
    /// capabilities an editor advertises at negotiation time
    pub struct EditorCaps: u32 {
        /// path-addressed operations are live
        const PATH_OPS = 1 << 0;
        /// id-addressed operations are live
        const ID_OPS = 1 << 1;
        /// `cp`/`copy-one` may source from the current transaction
        const COPY_FROM_TXN = 1 << 2;
        /// `rm`/`delete` remove entire subtrees without per-child operations
        const RECURSIVE_DELETE = 1 << 3;
        /// conflicting changes with identical effect merge to a no-op
        const PERMISSIVE_REBASE = 1 << 4;
    }
}

fn unsupported(slot: &'static str) -> crate::error::ArborGenericError {
    ArborError::Unsupported(slot).into()
}

/// the uniform slot set of the tree-edit protocol
///
/// implementations may support either addressing style or both; an
/// unimplemented slot keeps its default body and reports itself unsupported
#[allow(unused_variables)]
pub trait Editor {
    fn capabilities(&self) -> EditorCaps;

    // path-addressed style

    fn mk(&mut self, kind: NodeKind, parent: TxnPath, name: &str) -> ArborResult<()> {
        Err(unsupported("mk"))
    }

    fn cp(&mut self, from: PegPath, parent: TxnPath, name: &str) -> ArborResult<()> {
        Err(unsupported("cp"))
    }

    fn mv(&mut self, from: PegPath, parent: TxnPath, name: &str) -> ArborResult<()> {
        Err(unsupported("mv"))
    }

    fn res(&mut self, from: PegPath, parent: TxnPath, name: &str) -> ArborResult<()> {
        Err(unsupported("res"))
    }

    fn rm(&mut self, loc: TxnPath) -> ArborResult<()> {
        Err(unsupported("rm"))
    }

    fn put(&mut self, loc: TxnPath, content: Content) -> ArborResult<()> {
        Err(unsupported("put"))
    }

    // id-addressed style

    fn add(
        &mut self,
        local_id: NodeId,
        kind: NodeKind,
        parent: NodeId,
        name: &str,
        content: Content,
    ) -> ArborResult<()> {
        Err(unsupported("add"))
    }

    /// non-recursive copy under a fresh sender-chosen id; `content` overrides
    /// the source's content when given; `src_rev: None` sources the current
    /// transaction's final state
    fn copy_one(
        &mut self,
        local_id: NodeId,
        src_rev: Option<Revnum>,
        src: NodeId,
        parent: NodeId,
        name: &str,
        content: Option<Content>,
    ) -> ArborResult<()> {
        Err(unsupported("copy-one"))
    }

    fn copy_tree(
        &mut self,
        src_rev: Option<Revnum>,
        src: NodeId,
        parent: NodeId,
        name: &str,
    ) -> ArborResult<()> {
        Err(unsupported("copy-tree"))
    }

    fn delete(&mut self, since_rev: Revnum, id: NodeId) -> ArborResult<()> {
        Err(unsupported("delete"))
    }

    fn alter(
        &mut self,
        since_rev: Revnum,
        id: NodeId,
        parent: NodeId,
        name: &str,
        content: Option<Content>,
    ) -> ArborResult<()> {
        Err(unsupported("alter"))
    }

    // terminal signals

    /// declare the edit ready; the receiver attempts to commit and reports
    /// the new revision
    fn complete(&mut self) -> ArborResult<Revnum>;

    /// discard the transaction
    fn abort(&mut self) -> ArborResult<()>;
}
