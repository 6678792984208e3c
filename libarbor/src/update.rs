//! drive an editor with the difference between two committed revisions
//!
//! this is the update side of the protocol: the receiver of these operations
//! is typically a working copy reshaping itself toward `target`. running the
//! drive inline after a commit completes replaces the cross-linked
//! close-edit callbacks of older designs.

use crate::editor::{Content, Editor, NodeKind};
use crate::error::ArborResult;
use crate::repo::{NodeRecord, Repository};
use crate::tuple::Revnum;

fn content_of(record: &NodeRecord) -> Content {
    match record.kind {
        NodeKind::Dir => Content::dir(record.props.clone()),
        NodeKind::File => Content::file_bytes(record.props.clone(), record.text.clone()),
        NodeKind::Symlink => {
            Content::symlink(record.props.clone(), record.target.clone().unwrap_or_default())
        }
        NodeKind::Unknown => Content {
            kind: NodeKind::Unknown,
            base: None,
            props: record.props.clone(),
            checksum: None,
            text: None,
            target: None,
        },
    }
}

/// replay everything that happened between `base` and `target` as
/// id-addressed operations against `editor`, then complete the edit
///
/// operations are emitted unordered, as the id style allows; only the final
/// state must hang together on the receiving side
pub fn drive<R: Repository, E: Editor>(
    repo: &R,
    base: Revnum,
    target: Revnum,
    editor: &mut E,
) -> ArborResult<Revnum> {
    let before = repo.snapshot(base)?;
    let after = repo.snapshot(target)?;

    for (id, record) in &after {
        match before.get(id) {
            None => {
                let parent = record.parent.clone().expect("a node born non-root has a parent");
                editor.add(id.clone(), record.kind, parent, &record.name, content_of(record))?;
            }
            Some(prev) if prev == record => {}
            Some(prev) => {
                let parent = match &record.parent {
                    Some(parent) => parent.clone(),
                    // the root never moves, only its content can change
                    None => id.clone(),
                };
                let content =
                    if record.content_differs(prev) { Some(content_of(record)) } else { None };
                editor.alter(base, id.clone(), parent, &record.name, content)?;
            }
        }
    }

    for (id, record) in &before {
        // deleting the topmost vanished node takes its subtree with it
        let parent_also_vanished = record
            .parent
            .as_ref()
            .map(|parent| !after.contains_key(parent))
            .unwrap_or(false);
        if !after.contains_key(id) && !parent_also_vanished {
            editor.delete(base, id.clone())?;
        }
    }

    editor.complete()
}
