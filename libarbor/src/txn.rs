use crate::editor::{
    Content, Editor, EditorCaps, NodeId, NodeKind, PegPath, StoredContent, TxnPath,
};
use crate::error::{ArborError, ArborGenericError, ArborResult};
use crate::repo::{NodeRecord, Repository, Snapshot};
use crate::tuple::Revnum;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditStyle {
    Path,
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Open,
    Completed(Revnum),
    Aborted,
}

/// replayable record of one edit operation, kept so the whole edit can be
/// rebased onto a newer revision at completion time
#[derive(Debug, Clone)]
enum EditOp {
    Mk { kind: NodeKind, parent: TxnPath, name: String },
    Cp { from: PegPath, parent: TxnPath, name: String },
    Mv { from: PegPath, parent: TxnPath, name: String },
    Res { from: PegPath, parent: TxnPath, name: String },
    Rm { loc: TxnPath },
    Put { loc: TxnPath, content: StoredContent },
    Add { id: NodeId, kind: NodeKind, parent: NodeId, name: String, content: StoredContent },
    CopyOne {
        id: NodeId,
        src_rev: Option<Revnum>,
        src: NodeId,
        parent: NodeId,
        name: String,
        content: Option<StoredContent>,
    },
    CopyTree { src_rev: Option<Revnum>, src: NodeId, parent: NodeId, name: String },
    Delete { since: Revnum, id: NodeId },
    Alter {
        since: Revnum,
        id: NodeId,
        parent: NodeId,
        name: String,
        content: Option<StoredContent>,
    },
}

/// transactional tree editor evaluating edits against a repository
///
/// path-addressed operations are ordered and applied eagerly to a working
/// tree; id-addressed operations are unordered and resolved when the edit
/// completes. either way the operation log is re-evaluated against the
/// latest revision at completion, which is where out-of-date conflicts with
/// concurrent commits surface.
pub struct TxnEditor<R: Repository> {
    repo: R,
    base: Revnum,
    tree: Snapshot,
    /// node-branches created within this txn
    created: FxHashSet<NodeId>,
    /// node-branches already `put` this edit
    put_done: FxHashSet<NodeId>,
    style: Option<EditStyle>,
    state: TxnState,
    log: Vec<EditOp>,
    fresh: u64,
    permissive: bool,
}

fn precondition(msg: String) -> ArborGenericError {
    ArborError::PreconditionViolated(msg).into()
}

fn out_of_date(msg: String) -> ArborGenericError {
    ArborError::OutOfDate(msg).into()
}

impl<R: Repository> TxnEditor<R> {
    pub fn new(repo: R) -> ArborResult<Self> {
        let base = repo.latest_rev();
        let tree = repo.snapshot(base)?;
        debug!("opened transaction on {}", base);
        Ok(Self {
            repo,
            base,
            tree,
            created: FxHashSet::default(),
            put_done: FxHashSet::default(),
            style: None,
            state: TxnState::Open,
            log: vec![],
            fresh: 0,
            permissive: false,
        })
    }

    /// accept conflicting changes with identical effect as null merges
    pub fn set_permissive(&mut self, permissive: bool) {
        self.permissive = permissive;
    }

    pub fn base_rev(&self) -> Revnum {
        self.base
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -- bookkeeping ------------------------------------------------------

    fn check_open(&self) -> ArborResult<()> {
        match self.state {
            TxnState::Open => Ok(()),
            TxnState::Completed(rev) => {
                Err(precondition(format!("edit already completed as {}", rev)))
            }
            TxnState::Aborted => Err(precondition("edit already aborted".to_owned())),
        }
    }

    fn lock_style(&mut self, style: EditStyle) -> ArborResult<()> {
        self.check_open()?;
        match self.style {
            None => {
                self.style = Some(style);
                Ok(())
            }
            Some(current) if current == style => Ok(()),
            Some(..) => Err(precondition(
                "path-addressed and id-addressed operations cannot be mixed in one edit"
                    .to_owned(),
            )),
        }
    }

    /// receiver-generated id, distinct from every id the edit has seen
    fn fresh_id(tree: &Snapshot, fresh: &mut u64) -> NodeId {
        loop {
            let id = NodeId::new(format!("t{}", fresh));
            *fresh += 1;
            if !tree.contains_key(&id) {
                return id;
            }
        }
    }

    fn root_of(tree: &Snapshot) -> ArborResult<NodeId> {
        tree.iter()
            .find(|(_, record)| record.parent.is_none())
            .map(|(id, _)| id.clone())
            .ok_or_else(|| anyhow!("working tree has no root"))
    }

    fn child_in(tree: &Snapshot, parent: &NodeId, name: &str) -> Option<NodeId> {
        tree.iter()
            .find(|(_, record)| record.parent.as_ref() == Some(parent) && record.name == name)
            .map(|(id, _)| id.clone())
    }

    /// ids of `id` plus every node below it by current parentage
    fn subtree_of(tree: &Snapshot, id: &NodeId) -> Vec<NodeId> {
        let mut result = vec![id.clone()];
        let mut queue = VecDeque::from(vec![id.clone()]);
        while let Some(next) = queue.pop_front() {
            for (child, record) in tree {
                if record.parent.as_ref() == Some(&next) {
                    result.push(child.clone());
                    queue.push_back(child.clone());
                }
            }
        }
        result
    }

    fn is_descendant(tree: &Snapshot, id: &NodeId, ancestor: &NodeId) -> bool {
        let mut cursor = id.clone();
        let mut steps = 0;
        while let Some(record) = tree.get(&cursor) {
            match &record.parent {
                Some(parent) if parent == ancestor => return true,
                Some(parent) => cursor = parent.clone(),
                None => return false,
            }
            steps += 1;
            if steps > tree.len() {
                return false;
            }
        }
        false
    }

    fn resolve_in_tree(tree: &Snapshot, path: &crate::path::RelPath) -> ArborResult<NodeId> {
        let mut id = Self::root_of(tree)?;
        for component in path.components() {
            id = Self::child_in(tree, &id, component)
                .ok_or_else(|| precondition(format!("path `{}` not in the transaction", path)))?;
        }
        Ok(id)
    }

    /// trace a txn path forward to the node-branch it names in the working
    /// tree, accounting for moves applied since the peg's revision
    fn trace(tree: &Snapshot, repo: &R, loc: &TxnPath) -> ArborResult<NodeId> {
        let mut id = match loc.peg.rev {
            Some(rev) => {
                let id = repo.resolve(rev, &loc.peg.path)?;
                if !tree.contains_key(&id) {
                    return Err(precondition(format!(
                        "node `{}` is not in the transaction",
                        loc.peg
                    )));
                }
                id
            }
            None => Self::resolve_in_tree(tree, &loc.peg.path)?,
        };
        for component in loc.created.components() {
            id = Self::child_in(tree, &id, component)
                .ok_or_else(|| precondition(format!("path `{}` not in the transaction", loc)))?;
        }
        Ok(id)
    }

    fn require_dir(tree: &Snapshot, id: &NodeId) -> ArborResult<()> {
        match tree.get(id).map(|record| record.kind) {
            Some(NodeKind::Dir) => Ok(()),
            Some(kind) => Err(precondition(format!("node `{}` is a {}, not a dir", id, kind))),
            None => Err(precondition(format!("node `{}` is not in the transaction", id))),
        }
    }

    fn require_name_free(tree: &Snapshot, parent: &NodeId, name: &str) -> ArborResult<()> {
        match Self::child_in(tree, parent, name) {
            Some(..) => {
                Err(precondition(format!("name `{}` already taken under `{}`", name, parent)))
            }
            None => Ok(()),
        }
    }

    /// whether the node-branch's own name, parent and content survived the
    /// range untouched; a violation is an out-of-date conflict
    fn check_source_fresh(&self, id: &NodeId, since: Revnum, upto: Revnum) -> ArborResult<()> {
        if since >= upto {
            return Ok(());
        }
        let summary = self.repo.changed_since(id, since, upto)?;
        if summary.blocks_source_edit() {
            return Err(out_of_date(format!("node `{}` changed since {}", id, since)));
        }
        Ok(())
    }

    fn record_from_content(
        parent: NodeId,
        name: String,
        kind: NodeKind,
        content: &StoredContent,
        base: Option<&NodeRecord>,
    ) -> NodeRecord {
        NodeRecord {
            parent: Some(parent),
            name,
            kind,
            props: content.props.clone(),
            text: match &content.text {
                Some(text) => text.clone(),
                None => base.map(|record| record.text.clone()).unwrap_or_default(),
            },
            target: content.target.clone().or_else(|| base.and_then(|r| r.target.clone())),
        }
    }

    // -- path-addressed application --------------------------------------

    fn apply_path_op(&mut self, op: &EditOp) -> ArborResult<()> {
        match op {
            EditOp::Mk { kind, parent, name } => {
                let parent_id = Self::trace(&self.tree, &self.repo, parent)?;
                Self::require_dir(&self.tree, &parent_id)?;
                Self::require_name_free(&self.tree, &parent_id, name)?;
                let id = Self::fresh_id(&self.tree, &mut self.fresh);
                let record = NodeRecord {
                    parent: Some(parent_id),
                    name: name.clone(),
                    kind: *kind,
                    props: Default::default(),
                    text: vec![],
                    target: None,
                };
                self.tree.insert(id.clone(), record);
                self.created.insert(id);
            }
            EditOp::Cp { from, parent, name } => {
                let parent_id = Self::trace(&self.tree, &self.repo, parent)?;
                Self::require_dir(&self.tree, &parent_id)?;
                Self::require_name_free(&self.tree, &parent_id, name)?;
                // the source tree is read wherever the peg says it lives
                let (src_tree, src_id) = match from.rev {
                    Some(rev) => (self.repo.snapshot(rev)?, self.repo.resolve(rev, &from.path)?),
                    None => (self.tree.clone(), Self::resolve_in_tree(&self.tree, &from.path)?),
                };
                self.graft_subtree(&src_tree, &src_id, parent_id, name.clone())?;
            }
            EditOp::Mv { from, parent, name } => {
                let rev = from.rev.ok_or_else(|| {
                    precondition("move source must be pegged to a committed revision".to_owned())
                })?;
                let id = Self::trace(&self.tree, &self.repo, &TxnPath::of_peg(from.clone()))?;
                self.check_source_fresh(&id, rev, self.base)?;
                let parent_id = Self::trace(&self.tree, &self.repo, parent)?;
                Self::require_dir(&self.tree, &parent_id)?;
                if parent_id == id || Self::is_descendant(&self.tree, &parent_id, &id) {
                    return Err(precondition(format!("cannot move `{}` below itself", from)));
                }
                if Self::child_in(&self.tree, &parent_id, name).as_ref() != Some(&id) {
                    Self::require_name_free(&self.tree, &parent_id, name)?;
                }
                let record = self.tree.get_mut(&id).unwrap();
                record.parent = Some(parent_id);
                record.name = name.clone();
            }
            EditOp::Res { from, parent, name } => {
                let rev = from.rev.ok_or_else(|| {
                    precondition("resurrection source must name a committed revision".to_owned())
                })?;
                let id = self.repo.resolve(rev, &from.path)?;
                if self.tree.contains_key(&id) {
                    return Err(precondition(format!(
                        "node `{}` still exists in the transaction",
                        from
                    )));
                }
                let mut record = self
                    .repo
                    .node_at(rev, &id)?
                    .ok_or_else(|| anyhow!("resolved node `{}` has no record at {}", id, rev))?;
                let parent_id = Self::trace(&self.tree, &self.repo, parent)?;
                Self::require_dir(&self.tree, &parent_id)?;
                Self::require_name_free(&self.tree, &parent_id, name)?;
                record.parent = Some(parent_id);
                record.name = name.clone();
                self.tree.insert(id, record);
            }
            EditOp::Rm { loc } => {
                let id = Self::trace(&self.tree, &self.repo, loc)?;
                if let Some(rev) = loc.peg.rev {
                    self.check_source_fresh(&id, rev, self.base)?;
                }
                if self.tree.get(&id).map(|r| r.parent.is_none()).unwrap_or(false) {
                    return Err(precondition("cannot remove the root".to_owned()));
                }
                if self.created.contains(&id) {
                    debug!("removing node `{}` created within the same edit", id);
                }
                for victim in Self::subtree_of(&self.tree, &id) {
                    self.tree.remove(&victim);
                }
            }
            EditOp::Put { loc, content } => {
                let id = Self::trace(&self.tree, &self.repo, loc)?;
                if let Some(rev) = loc.peg.rev {
                    if !self.created.contains(&id) {
                        self.check_source_fresh(&id, rev, self.base)?;
                    }
                }
                if !self.put_done.insert(id.clone()) {
                    return Err(precondition(format!(
                        "node `{}` already received content this edit",
                        loc
                    )));
                }
                let base_record = match &content.base {
                    Some(peg) => match peg.rev {
                        Some(rev) => Some(self.repo.cat(rev, &peg.path)?),
                        None => None,
                    },
                    None => None,
                };
                let record = self.tree.get_mut(&id).unwrap();
                if record.kind != content.kind {
                    return Err(precondition(format!(
                        "content kind {} does not match node kind {}",
                        content.kind, record.kind
                    )));
                }
                record.props = content.props.clone();
                record.text = match (&content.text, &base_record) {
                    (Some(text), _) => text.clone(),
                    (None, Some(base_record)) => base_record.text.clone(),
                    // an absent stream over an empty base leaves empty text
                    (None, None) => vec![],
                };
                record.target = content.target.clone();
            }
            _ => unreachable!("id-addressed op in path-addressed application"),
        }
        Ok(())
    }

    /// clone `src_id`'s subtree out of `src_tree` and hang it under
    /// `parent`/`name` with fresh identities
    fn graft_subtree(
        &mut self,
        src_tree: &Snapshot,
        src_id: &NodeId,
        parent: NodeId,
        name: String,
    ) -> ArborResult<()> {
        // the counter makes generated ids distinct from one another, so one
        // mapping pass suffices
        let mut mapping = rustc_hash::FxHashMap::default();
        for old in Self::subtree_of(src_tree, src_id) {
            let new = Self::fresh_id(&self.tree, &mut self.fresh);
            mapping.insert(old, new);
        }
        let mut grafted = vec![];
        for (old, new) in &mapping {
            let mut record = src_tree
                .get(old)
                .ok_or_else(|| anyhow!("copy source `{}` vanished mid-graft", old))?
                .clone();
            if old == src_id {
                record.parent = Some(parent.clone());
                record.name = name.clone();
            } else {
                let old_parent = record.parent.as_ref().expect("non-root copy child");
                record.parent = Some(mapping[old_parent].clone());
            }
            grafted.push((new.clone(), record));
        }
        for (new, record) in grafted {
            self.tree.insert(new.clone(), record);
            self.created.insert(new);
        }
        Ok(())
    }

    // -- id-addressed application -----------------------------------------

    /// resolve the unordered id-addressed log into a final tree rooted at
    /// `upto`'s snapshot
    fn build_id_style_tree(&mut self, upto: Revnum) -> ArborResult<Snapshot> {
        let mut tree = self.repo.snapshot(upto)?;
        let log = self.log.clone();

        // alters first: they only touch node-branches that already have history
        for op in &log {
            if let EditOp::Alter { since, id, parent, name, content } = op {
                self.apply_alter(&mut tree, upto, *since, id, parent, name, content.as_ref())?;
            }
        }

        for op in &log {
            if let EditOp::Add { id, kind, parent, name, content } = op {
                if tree.contains_key(id) {
                    return Err(precondition(format!("node id `{}` is not unique", id)));
                }
                let record = Self::record_from_content(
                    parent.clone(),
                    name.clone(),
                    *kind,
                    content,
                    None,
                );
                tree.insert(id.clone(), record);
            }
        }

        // copies may source one another within the transaction, so apply to a
        // fixpoint; a full pass with no progress means some source can never
        // materialize
        let mut pending: Vec<&EditOp> = log
            .iter()
            .filter(|op| matches!(op, EditOp::CopyOne { .. } | EditOp::CopyTree { .. }))
            .collect();
        while !pending.is_empty() {
            let mut retained = vec![];
            let mut progressed = false;
            for op in pending {
                if self.try_apply_copy(&mut tree, op)? {
                    progressed = true;
                } else {
                    retained.push(op);
                }
            }
            if !retained.is_empty() && !progressed {
                return Err(precondition("copy source is not reachable in this edit".to_owned()));
            }
            pending = retained;
        }

        for op in &log {
            if let EditOp::Delete { since, id } = op {
                self.check_source_fresh(id, *since, upto)?;
                if !tree.contains_key(id) {
                    return Err(precondition(format!("cannot delete unknown node `{}`", id)));
                }
                if tree.get(id).map(|r| r.parent.is_none()).unwrap_or(false) {
                    return Err(precondition("cannot delete the root".to_owned()));
                }
                for victim in Self::subtree_of(&tree, id) {
                    tree.remove(&victim);
                }
            }
        }

        Ok(tree)
    }

    fn apply_alter(
        &self,
        tree: &mut Snapshot,
        upto: Revnum,
        since: Revnum,
        id: &NodeId,
        parent: &NodeId,
        name: &str,
        content: Option<&StoredContent>,
    ) -> ArborResult<()> {
        let base_record = match tree.get(id) {
            Some(record) => record.clone(),
            // resurrection: take the last state the node-branch ever had
            None => self
                .last_record_at_or_before(id, since)?
                .ok_or_else(|| precondition(format!("unknown node-branch `{}`", id)))?,
        };

        let mut intended = match content {
            Some(content) => Self::record_from_content(
                parent.clone(),
                name.to_owned(),
                content.kind,
                content,
                Some(&base_record),
            ),
            None => {
                let mut record = base_record.clone();
                record.parent = Some(parent.clone());
                record.name = name.to_owned();
                record
            }
        };
        // the root cannot move; an alter aimed at it only carries content
        if base_record.parent.is_none() {
            intended.parent = None;
            intended.name = base_record.name.clone();
        }
        if intended.kind != base_record.kind {
            return Err(precondition(format!(
                "alter cannot change node `{}` from {} to {}",
                id, base_record.kind, intended.kind
            )));
        }

        if let Err(err) = self.check_source_fresh(id, since, upto) {
            // identical-effect conflicts merge to nothing under the
            // permissive policy
            if self.permissive && tree.get(id) == Some(&intended) {
                debug!("null merge of alter on `{}`", id);
                return Ok(());
            }
            return Err(err);
        }

        // no-op alters must be accepted
        tree.insert(id.clone(), intended);
        Ok(())
    }

    fn last_record_at_or_before(
        &self,
        id: &NodeId,
        rev: Revnum,
    ) -> ArborResult<Option<NodeRecord>> {
        let mut cursor = rev;
        loop {
            if let Some(record) = self.repo.node_at(cursor, id)? {
                return Ok(Some(record));
            }
            if cursor == Revnum::ZERO {
                return Ok(None);
            }
            cursor = Revnum(cursor.0 - 1);
        }
    }

    /// returns false when the copy's source has not materialized yet
    fn try_apply_copy(&mut self, tree: &mut Snapshot, op: &EditOp) -> ArborResult<bool> {
        match op {
            EditOp::CopyOne { id, src_rev, src, parent, name, content } => {
                let source = match src_rev {
                    Some(rev) => self.repo.node_at(*rev, src)?,
                    None => tree.get(src).cloned(),
                };
                let source = match source {
                    Some(source) => source,
                    None if src_rev.is_some() => {
                        return Err(precondition(format!(
                            "copy source `{}` does not exist at {}",
                            src,
                            src_rev.unwrap()
                        )));
                    }
                    None => return Ok(false),
                };
                if tree.contains_key(id) {
                    return Err(precondition(format!("node id `{}` is not unique", id)));
                }
                let record = match content {
                    Some(content) => Self::record_from_content(
                        parent.clone(),
                        name.clone(),
                        content.kind,
                        content,
                        Some(&source),
                    ),
                    None => {
                        let mut record = source;
                        record.parent = Some(parent.clone());
                        record.name = name.clone();
                        record
                    }
                };
                tree.insert(id.clone(), record);
                Ok(true)
            }
            EditOp::CopyTree { src_rev, src, parent, name } => {
                let src_tree = match src_rev {
                    Some(rev) => {
                        let snapshot = self.repo.snapshot(*rev)?;
                        if !snapshot.contains_key(src) {
                            return Err(precondition(format!(
                                "copy source `{}` does not exist at {}",
                                src, rev
                            )));
                        }
                        snapshot
                    }
                    None if tree.contains_key(src) => tree.clone(),
                    None => return Ok(false),
                };
                let mut mapping = rustc_hash::FxHashMap::default();
                for old in Self::subtree_of(&src_tree, src) {
                    let new = Self::fresh_id(tree, &mut self.fresh);
                    mapping.insert(old, new);
                }
                for (old, new) in &mapping {
                    let mut record = src_tree[old].clone();
                    if old == src {
                        record.parent = Some(parent.clone());
                        record.name = name.clone();
                    } else {
                        let old_parent = record.parent.as_ref().expect("non-root copy child");
                        record.parent = Some(mapping[old_parent].clone());
                    }
                    tree.insert(new.clone(), record);
                }
                Ok(true)
            }
            _ => unreachable!("non-copy op in copy fixpoint"),
        }
    }

    // -- path-addressed completion ----------------------------------------

    /// re-evaluate every logged path operation against `upto`; conflicts
    /// during the replay are out-of-date conflicts, not caller mistakes
    fn rebase_path_style(&mut self, upto: Revnum) -> ArborResult<()> {
        debug!("rebasing edit from {} onto {}", self.base, upto);
        self.tree = self.repo.snapshot(upto)?;
        self.base = upto;
        self.created.clear();
        self.put_done.clear();
        let log = std::mem::take(&mut self.log);
        let mut result = Ok(());
        for op in &log {
            if let Err(err) = self.apply_path_op(op) {
                result =
                    Err(out_of_date(format!("edit does not apply against {}: {}", upto, err)));
                break;
            }
        }
        self.log = log;
        result
    }
}

impl<R: Repository> Editor for TxnEditor<R> {
    fn capabilities(&self) -> EditorCaps {
        let mut caps = EditorCaps::PATH_OPS
            | EditorCaps::ID_OPS
            | EditorCaps::COPY_FROM_TXN
            | EditorCaps::RECURSIVE_DELETE;
        if self.permissive {
            caps |= EditorCaps::PERMISSIVE_REBASE;
        }
        caps
    }

    fn mk(&mut self, kind: NodeKind, parent: TxnPath, name: &str) -> ArborResult<()> {
        self.lock_style(EditStyle::Path)?;
        let op = EditOp::Mk { kind, parent, name: name.to_owned() };
        self.apply_path_op(&op)?;
        self.log.push(op);
        Ok(())
    }

    fn cp(&mut self, from: PegPath, parent: TxnPath, name: &str) -> ArborResult<()> {
        self.lock_style(EditStyle::Path)?;
        let op = EditOp::Cp { from, parent, name: name.to_owned() };
        self.apply_path_op(&op)?;
        self.log.push(op);
        Ok(())
    }

    fn mv(&mut self, from: PegPath, parent: TxnPath, name: &str) -> ArborResult<()> {
        self.lock_style(EditStyle::Path)?;
        let op = EditOp::Mv { from, parent, name: name.to_owned() };
        self.apply_path_op(&op)?;
        self.log.push(op);
        Ok(())
    }

    fn res(&mut self, from: PegPath, parent: TxnPath, name: &str) -> ArborResult<()> {
        self.lock_style(EditStyle::Path)?;
        let op = EditOp::Res { from, parent, name: name.to_owned() };
        self.apply_path_op(&op)?;
        self.log.push(op);
        Ok(())
    }

    fn rm(&mut self, loc: TxnPath) -> ArborResult<()> {
        self.lock_style(EditStyle::Path)?;
        let op = EditOp::Rm { loc };
        self.apply_path_op(&op)?;
        self.log.push(op);
        Ok(())
    }

    fn put(&mut self, loc: TxnPath, content: Content) -> ArborResult<()> {
        self.lock_style(EditStyle::Path)?;
        let op = EditOp::Put { loc, content: StoredContent::materialize(content)? };
        self.apply_path_op(&op)?;
        self.log.push(op);
        Ok(())
    }

    fn add(
        &mut self,
        local_id: NodeId,
        kind: NodeKind,
        parent: NodeId,
        name: &str,
        content: Content,
    ) -> ArborResult<()> {
        self.lock_style(EditStyle::Id)?;
        self.reserve_local_id(&local_id)?;
        self.log.push(EditOp::Add {
            id: local_id,
            kind,
            parent,
            name: name.to_owned(),
            content: StoredContent::materialize(content)?,
        });
        Ok(())
    }

    fn copy_one(
        &mut self,
        local_id: NodeId,
        src_rev: Option<Revnum>,
        src: NodeId,
        parent: NodeId,
        name: &str,
        content: Option<Content>,
    ) -> ArborResult<()> {
        self.lock_style(EditStyle::Id)?;
        self.reserve_local_id(&local_id)?;
        let content = content.map(StoredContent::materialize).transpose()?;
        self.log.push(EditOp::CopyOne {
            id: local_id,
            src_rev,
            src,
            parent,
            name: name.to_owned(),
            content,
        });
        Ok(())
    }

    fn copy_tree(
        &mut self,
        src_rev: Option<Revnum>,
        src: NodeId,
        parent: NodeId,
        name: &str,
    ) -> ArborResult<()> {
        self.lock_style(EditStyle::Id)?;
        self.log.push(EditOp::CopyTree { src_rev, src, parent, name: name.to_owned() });
        Ok(())
    }

    fn delete(&mut self, since_rev: Revnum, id: NodeId) -> ArborResult<()> {
        self.lock_style(EditStyle::Id)?;
        self.log.push(EditOp::Delete { since: since_rev, id });
        Ok(())
    }

    fn alter(
        &mut self,
        since_rev: Revnum,
        id: NodeId,
        parent: NodeId,
        name: &str,
        content: Option<Content>,
    ) -> ArborResult<()> {
        self.lock_style(EditStyle::Id)?;
        let content = content.map(StoredContent::materialize).transpose()?;
        self.log.push(EditOp::Alter {
            since: since_rev,
            id,
            parent,
            name: name.to_owned(),
            content,
        });
        Ok(())
    }

    fn complete(&mut self) -> ArborResult<Revnum> {
        self.check_open()?;
        let latest = self.repo.latest_rev();
        let tree = match self.style {
            Some(EditStyle::Id) => self.build_id_style_tree(latest)?,
            Some(EditStyle::Path) => {
                // re-verify every committed source against commits that landed
                // while the edit was in flight
                let log = self.log.clone();
                for op in &log {
                    match op {
                        EditOp::Mv { from, .. } => {
                            if let Some(rev) = from.rev {
                                let id = self.repo.resolve(rev, &from.path)?;
                                self.check_source_fresh(&id, rev, latest)?;
                            }
                        }
                        // a created-path extension targets a node born in this
                        // edit, which has no history to conflict with
                        EditOp::Rm { loc } | EditOp::Put { loc, .. } => {
                            if loc.created.is_root() {
                                if let Some(rev) = loc.peg.rev {
                                    let id = self.repo.resolve(rev, &loc.peg.path)?;
                                    if !self.created.contains(&id) {
                                        self.check_source_fresh(&id, rev, latest)?;
                                    }
                                }
                            }
                        }
                        _ => {}
                    }
                }
                if latest != self.base {
                    self.rebase_path_style(latest)?;
                }
                self.tree.clone()
            }
            // an empty edit must not resurrect its stale snapshot
            None => self.repo.snapshot(latest)?,
        };
        let rev = self.repo.commit(latest, tree)?;
        self.state = TxnState::Completed(rev);
        info!("edit completed as {}", rev);
        Ok(rev)
    }

    fn abort(&mut self) -> ArborResult<()> {
        self.check_open()?;
        self.state = TxnState::Aborted;
        debug!("edit aborted");
        Ok(())
    }
}

impl<R: Repository> TxnEditor<R> {
    /// sender-chosen ids must be unique for the edit and must not shadow a
    /// live node-branch
    fn reserve_local_id(&self, id: &NodeId) -> ArborResult<()> {
        if self.tree.contains_key(id) {
            return Err(precondition(format!("node id `{}` is already in use", id)));
        }
        let taken = self.log.iter().any(|op| match op {
            EditOp::Add { id: existing, .. } | EditOp::CopyOne { id: existing, .. } => {
                existing == id
            }
            _ => false,
        });
        if taken {
            return Err(precondition(format!("node id `{}` is already in use", id)));
        }
        Ok(())
    }
}
