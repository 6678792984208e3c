use crate::editor::{NodeId, NodeKind, Props};
use crate::error::{ArborError, ArborResult, ErrCode};
use crate::path::RelPath;
use crate::tuple::Revnum;
use itertools::Itertools;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// state of one node-branch within a revision snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// `None` only for the root
    pub parent: Option<NodeId>,
    /// empty only for the root
    pub name: String,
    pub kind: NodeKind,
    pub props: Props,
    pub text: Vec<u8>,
    pub target: Option<Vec<u8>>,
}

impl NodeRecord {
    pub fn dir(parent: Option<NodeId>, name: impl Into<String>) -> Self {
        Self {
            parent,
            name: name.into(),
            kind: NodeKind::Dir,
            props: Props::default(),
            text: vec![],
            target: None,
        }
    }

    /// name or parent differs
    pub fn moved_from(&self, other: &Self) -> bool {
        self.name != other.name || self.parent != other.parent
    }

    /// kind, props, text or link target differs
    pub fn content_differs(&self, other: &Self) -> bool {
        self.kind != other.kind
            || self.props != other.props
            || self.text != other.text
            || self.target != other.target
    }
}

pub type Snapshot = FxHashMap<NodeId, NodeRecord>;

/// what happened to one node-branch across a revision range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub created: bool,
    pub deleted: bool,
    pub moved: bool,
    pub content_changed: bool,
}

impl ChangeSummary {
    pub fn is_unchanged(self) -> bool {
        self == Self::default()
    }

    /// whether the range invalidates an edit that requires the node-branch's
    /// own name, parent and content untouched
    pub fn blocks_source_edit(self) -> bool {
        !self.is_unchanged()
    }
}

/// the repository oracle the edit layer consumes
pub trait Repository {
    fn latest_rev(&self) -> Revnum;

    /// resolve a committed path to the node-branch occupying it
    fn resolve(&self, rev: Revnum, path: &RelPath) -> ArborResult<NodeId>;

    /// a node-branch's record at a revision, `None` if extinct or unborn there
    fn node_at(&self, rev: Revnum, id: &NodeId) -> ArborResult<Option<NodeRecord>>;

    fn snapshot(&self, rev: Revnum) -> ArborResult<Snapshot>;

    /// append `tree` as the next revision; `base` must still be the latest
    fn commit(&mut self, base: Revnum, tree: Snapshot) -> ArborResult<Revnum>;

    /// scan the history of one node-branch over `(since, base]`
    fn changed_since(
        &self,
        id: &NodeId,
        since: Revnum,
        base: Revnum,
    ) -> ArborResult<ChangeSummary> {
        ensure!(since <= base, "change scan range is inverted ({} > {})", since, base);
        let mut summary = ChangeSummary::default();
        let mut prev = self.node_at(since, id)?;
        for rev in since.0..base.0 {
            let next = self.node_at(Revnum(rev + 1), id)?;
            match (&prev, &next) {
                (None, Some(..)) => summary.created = true,
                (Some(..), None) => summary.deleted = true,
                (Some(a), Some(b)) => {
                    summary.moved |= b.moved_from(a);
                    summary.content_changed |= b.content_differs(a);
                }
                (None, None) => {}
            }
            prev = next;
        }
        Ok(summary)
    }

    /// fetch a node's record by committed path
    fn cat(&self, rev: Revnum, path: &RelPath) -> ArborResult<NodeRecord> {
        let id = self.resolve(rev, path)?;
        self.node_at(rev, &id)?
            .ok_or_else(|| anyhow!("node `{}` resolved but has no record at {}", id, rev))
    }
}

/// revision history held entirely in memory; r0 is an empty root directory
pub struct MemRepo {
    revisions: Vec<Snapshot>,
    root: NodeId,
}

impl Default for MemRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemRepo {
    pub fn new() -> Self {
        let root = NodeId::new("root");
        let mut r0 = Snapshot::default();
        r0.insert(root.clone(), NodeRecord::dir(None, ""));
        Self { revisions: vec![r0], root }
    }

    pub fn root_id(&self) -> &NodeId {
        &self.root
    }

    fn rev_snapshot(&self, rev: Revnum) -> ArborResult<&Snapshot> {
        self.revisions.get(rev.0 as usize).ok_or_else(|| {
            wire_err!(ErrCode::NoSuchRevision, "no revision {}", rev).into()
        })
    }

    fn child_of(&self, snapshot: &Snapshot, parent: &NodeId, name: &str) -> Option<NodeId> {
        snapshot
            .iter()
            .find(|(_, record)| record.name == name && record.parent.as_ref() == Some(parent))
            .map(|(id, _)| id.clone())
    }

    /// a committed hierarchy must be a connected tree with unique sibling
    /// names rooted at a directory
    fn validate(&self, tree: &Snapshot) -> ArborResult<()> {
        let precondition = |msg: String| -> crate::error::ArborGenericError {
            ArborError::PreconditionViolated(msg).into()
        };

        let mut roots = tree.iter().filter(|(_, record)| record.parent.is_none());
        match (roots.next(), roots.next()) {
            (Some((id, record)), None) => {
                if id != &self.root {
                    return Err(precondition(format!("root node-branch must be `{}`", self.root)));
                }
                if record.kind != NodeKind::Dir {
                    return Err(precondition("root must be a directory".to_owned()));
                }
            }
            _ => return Err(precondition("tree must have exactly one root".to_owned())),
        }

        if let Some((parent, name)) = tree
            .values()
            .filter_map(|record| record.parent.as_ref().map(|parent| (parent, &record.name)))
            .duplicates()
            .next()
        {
            return Err(precondition(format!(
                "sibling name `{}` duplicated under `{}`",
                name, parent
            )));
        }

        for (id, record) in tree {
            if let Some(parent) = &record.parent {
                let parent_record = tree
                    .get(parent)
                    .ok_or_else(|| precondition(format!("node `{}` is orphaned", id)))?;
                if parent_record.kind != NodeKind::Dir {
                    return Err(precondition(format!("parent of `{}` is not a directory", id)));
                }
                if record.name.is_empty() {
                    return Err(precondition(format!("non-root node `{}` has no name", id)));
                }
            }

            // walk to the root to reject cycles and disconnected subtrees
            let mut cursor = id;
            let mut steps = 0;
            loop {
                match &tree[cursor].parent {
                    None => break,
                    Some(parent) => {
                        if !tree.contains_key(parent) {
                            return Err(precondition(format!("node `{}` is orphaned", id)));
                        }
                        cursor = parent;
                    }
                }
                steps += 1;
                if steps > tree.len() {
                    return Err(precondition(format!("cycle through node `{}`", id)));
                }
            }
        }
        Ok(())
    }
}

impl Repository for MemRepo {
    fn latest_rev(&self) -> Revnum {
        Revnum(self.revisions.len() as u64 - 1)
    }

    fn resolve(&self, rev: Revnum, path: &RelPath) -> ArborResult<NodeId> {
        let snapshot = self.rev_snapshot(rev)?;
        let mut id = self.root.clone();
        for component in path.components() {
            id = self.child_of(snapshot, &id, component).ok_or_else(|| {
                wire_err!(ErrCode::PathNotFound, "path `{}` not found in {}", path, rev)
            })?;
        }
        Ok(id)
    }

    fn node_at(&self, rev: Revnum, id: &NodeId) -> ArborResult<Option<NodeRecord>> {
        Ok(self.rev_snapshot(rev)?.get(id).cloned())
    }

    fn snapshot(&self, rev: Revnum) -> ArborResult<Snapshot> {
        Ok(self.rev_snapshot(rev)?.clone())
    }

    fn commit(&mut self, base: Revnum, tree: Snapshot) -> ArborResult<Revnum> {
        if base != self.latest_rev() {
            return Err(ArborError::OutOfDate(format!(
                "commit built on {} but the repository is at {}",
                base,
                self.latest_rev()
            ))
            .into());
        }
        self.validate(&tree)?;
        self.revisions.push(tree);
        let rev = self.latest_rev();
        info!("committed {}", rev);
        Ok(rev)
    }
}

/// a clonable handle sharing one repository between connections
#[derive(Clone)]
pub struct SharedRepo(Arc<RwLock<MemRepo>>);

impl Default for SharedRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedRepo {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(MemRepo::new())))
    }

    pub fn root_id(&self) -> NodeId {
        self.0.read().root_id().clone()
    }
}

impl Repository for SharedRepo {
    fn latest_rev(&self) -> Revnum {
        self.0.read().latest_rev()
    }

    fn resolve(&self, rev: Revnum, path: &RelPath) -> ArborResult<NodeId> {
        self.0.read().resolve(rev, path)
    }

    fn node_at(&self, rev: Revnum, id: &NodeId) -> ArborResult<Option<NodeRecord>> {
        self.0.read().node_at(rev, id)
    }

    fn snapshot(&self, rev: Revnum) -> ArborResult<Snapshot> {
        self.0.read().snapshot(rev)
    }

    fn commit(&mut self, base: Revnum, tree: Snapshot) -> ArborResult<Revnum> {
        self.0.write().commit(base, tree)
    }
}
