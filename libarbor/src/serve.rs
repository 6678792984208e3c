//! server-side binding of the dispatcher to the transactional editor
//!
//! wire formats: a peg path is `( ( rev? ) path )`, a txn path appends the
//! created extension, and node content is
//! `( kind ( rev? path )? proplist checksum? text? target? )` with a
//! `( ( name value ) ... )` proplist.

use crate::checksum::{hash_bytes, Checksum};
use crate::conn::WireConn;
use crate::dispatch::{serve_loop, CmdEntry, DispatchOpts};
use crate::editor::{Content, Editor, NodeId, NodeKind, PegPath, Props, TextSource, TxnPath};
use crate::error::{ArborError, ArborGenericError, ArborResult, ErrCode, WireFailure};
use crate::item::Item;
use crate::path::RelPath;
use crate::repo::{Repository, SharedRepo};
use crate::tuple::{parse_tuple, Arg, Fields};
use crate::txn::TxnEditor;
use bumpalo::Bump;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;

const MK_FMT: &str = "w(([r]c)c)c";
const COPYISH_FMT: &str = "([r]c)(([r]c)c)c";
const RM_FMT: &str = "(([r]c)c)";
const PUT_FMT: &str = "(([r]c)c)(w[([r]c)]l[c][s][s])";
const ADD_FMT: &str = "cwcc(w[([r]c)]l[c][s][s])";
const COPY_ONE_FMT: &str = "c[r]ccc[w[([r]c)]l[c][s][s]]";
const COPY_TREE_FMT: &str = "[r]ccc";
const DELETE_FMT: &str = "rc";
const ALTER_FMT: &str = "rccc[w[([r]c)]l[c][s][s]]";
const PEG_FMT: &str = "([r]c)";

pub struct ServeCtx {
    repo: SharedRepo,
    txn: Option<TxnEditor<SharedRepo>>,
    permissive: bool,
}

impl ServeCtx {
    pub fn new(repo: SharedRepo) -> Self {
        Self { repo, txn: None, permissive: false }
    }

    pub fn permissive(repo: SharedRepo) -> Self {
        Self { repo, txn: None, permissive: true }
    }

    /// the transaction is created implicitly by the first edit operation
    fn editor(&mut self) -> ArborResult<&mut TxnEditor<SharedRepo>> {
        if self.txn.is_none() {
            let mut txn = TxnEditor::new(self.repo.clone())?;
            txn.set_permissive(self.permissive);
            self.txn = Some(txn);
        }
        Ok(self.txn.as_mut().unwrap())
    }
}

/// run the dispatcher loop for one connection against a shared repository
pub fn serve<S: Read + Write>(
    conn: &mut WireConn<S>,
    repo: SharedRepo,
    opts: DispatchOpts<'_>,
) -> ArborResult<()> {
    serve_ctx(conn, ServeCtx::new(repo), opts)
}

pub fn serve_ctx<S: Read + Write>(
    conn: &mut WireConn<S>,
    mut ctx: ServeCtx,
    opts: DispatchOpts<'_>,
) -> ArborResult<()> {
    serve_loop(conn, &mut ctx, &cmd_table(), opts)
}

pub fn cmd_table<S: Read + Write>() -> Vec<CmdEntry<S, ServeCtx>> {
    vec![
        CmdEntry::new("ping", h_ping),
        CmdEntry::new("latest-rev", h_latest_rev),
        CmdEntry::new("check-path", h_check_path),
        CmdEntry::new("get-file", h_get_file),
        CmdEntry::new("mk", h_mk),
        CmdEntry::new("cp", h_cp),
        CmdEntry::new("mv", h_mv),
        CmdEntry::new("res", h_res),
        CmdEntry::new("rm", h_rm),
        CmdEntry::new("put", h_put),
        CmdEntry::new("add", h_add),
        CmdEntry::new("copy-one", h_copy_one),
        CmdEntry::new("copy-tree", h_copy_tree),
        CmdEntry::new("delete", h_delete),
        CmdEntry::new("alter", h_alter),
        CmdEntry::terminal("complete", h_complete),
        CmdEntry::terminal("abort", h_abort),
    ]
}

/// wrap an editor failure so the dispatcher reports it without dropping the
/// connection
fn as_cmd_err(err: ArborGenericError) -> ArborGenericError {
    if matches!(err.downcast_ref::<ArborError>(), Some(ArborError::CmdErr(..))) {
        return err;
    }
    ArborError::CmdErr(WireFailure::from_generic(&err, file!(), line!())).into()
}

fn respond_empty<S: Read + Write>(
    conn: &mut WireConn<S>,
    result: ArborResult<()>,
) -> ArborResult<()> {
    match result {
        Ok(()) => conn.write_success("", &[]),
        Err(err) => Err(as_cmd_err(err)),
    }
}

// -- wire shapes -----------------------------------------------------------

fn parse_peg(fields: &Fields<'_>, at: usize) -> ArborResult<PegPath> {
    Ok(PegPath { rev: fields.opt_rev(at)?, path: RelPath::new(fields.cstr(at + 1)?)? })
}

fn parse_txn_path(fields: &Fields<'_>, at: usize) -> ArborResult<TxnPath> {
    Ok(TxnPath { peg: parse_peg(fields, at)?, created: RelPath::new(fields.cstr(at + 2)?)? })
}

pub(crate) fn parse_props(entries: Option<&[Item<'_>]>) -> ArborResult<Props> {
    let mut props = Props::default();
    for entry in entries.unwrap_or(&[]) {
        let entry = entry.as_list().ok_or_else(|| {
            ArborError::MalformedData("property entry is not a pair".to_owned())
        })?;
        let pair = parse_tuple(entry, "ss")?;
        props.insert(pair.bytes(0)?.to_vec(), pair.bytes(1)?.to_vec());
    }
    Ok(props)
}

/// seven consecutive fields starting at `at`; an absent kind means the whole
/// content group was omitted
fn parse_content(fields: &Fields<'_>, at: usize) -> ArborResult<Option<Content>> {
    let kind = match fields.opt_word(at)? {
        Some(word) => NodeKind::from_str(word)?,
        None => return Ok(None),
    };
    let base = match fields.opt_cstr(at + 2)? {
        Some(path) => {
            Some(PegPath { rev: fields.opt_rev(at + 1)?, path: RelPath::new(path)? })
        }
        None => None,
    };
    let props = parse_props(fields.opt_list(at + 3)?)?;
    let checksum = fields.opt_cstr(at + 4)?.map(Checksum::from_str).transpose()?;
    let text = fields
        .opt_bytes(at + 5)?
        .map(|bytes| Box::new(Cursor::new(bytes.to_vec())) as TextSource);
    let target = fields.opt_bytes(at + 6)?.map(|bytes| bytes.to_vec());
    Ok(Some(Content { kind, base, props, checksum, text, target }))
}

fn require_content(fields: &Fields<'_>, at: usize) -> ArborResult<Content> {
    parse_content(fields, at)?
        .ok_or_else(|| ArborError::MalformedData("missing content tuple".to_owned()).into())
}

// -- handlers --------------------------------------------------------------

fn h_ping<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    _ctx: &mut ServeCtx,
    _params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    conn.write_success("", &[])
}

fn h_latest_rev<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    _params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let rev = ctx.repo.latest_rev();
    conn.write_success("r", &[Arg::Rev(Some(rev))])
}

fn h_check_path<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, PEG_FMT)?;
    let peg = parse_peg(&fields, 0)?;
    let rev = match peg.rev {
        Some(rev) => rev,
        None => ctx.repo.latest_rev(),
    };
    let kind = match ctx.repo.resolve(rev, &peg.path) {
        Ok(id) => match ctx.repo.node_at(rev, &id).map_err(as_cmd_err)? {
            Some(record) => record.kind,
            None => NodeKind::Unknown,
        },
        Err(err) => {
            let failure = WireFailure::from_generic(&err, file!(), line!());
            if failure.contains_code(ErrCode::PathNotFound) {
                NodeKind::Unknown
            } else {
                return Err(as_cmd_err(err));
            }
        }
    };
    conn.write_success("w", &[Arg::Word(Some(kind.as_word()))])
}

fn h_get_file<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, PEG_FMT)?;
    let peg = parse_peg(&fields, 0)?;
    let rev = match peg.rev {
        Some(rev) => rev,
        None => ctx.repo.latest_rev(),
    };
    let record = ctx.repo.cat(rev, &peg.path).map_err(as_cmd_err)?;
    if record.kind != NodeKind::File {
        return Err(as_cmd_err(
            ArborError::PreconditionViolated(format!(
                "`{}` is a {}, not a file",
                peg.path, record.kind
            ))
            .into(),
        ));
    }
    let props = props_items(&record.props);
    let checksum = hash_bytes(&record.text).to_hex();
    conn.write_success(
        "lcs",
        &[Arg::List(Some(&props)), Arg::CStr(Some(&checksum)), Arg::Str(Some(&record.text))],
    )
}

pub(crate) fn props_items(props: &Props) -> Vec<crate::item::ItemBuf> {
    use crate::item::ItemBuf;
    props
        .iter()
        .map(|(name, value)| {
            ItemBuf::List(vec![ItemBuf::Str(name.clone()), ItemBuf::Str(value.clone())])
        })
        .collect()
}

fn h_mk<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, MK_FMT)?;
    let kind = NodeKind::from_str(fields.word(0)?)?;
    let parent = parse_txn_path(&fields, 1)?;
    let name = fields.cstr(4)?;
    let result = ctx.editor()?.mk(kind, parent, name);
    respond_empty(conn, result)
}

fn h_cp<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, COPYISH_FMT)?;
    let from = parse_peg(&fields, 0)?;
    let parent = parse_txn_path(&fields, 2)?;
    let name = fields.cstr(5)?;
    let result = ctx.editor()?.cp(from, parent, name);
    respond_empty(conn, result)
}

fn h_mv<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, COPYISH_FMT)?;
    let from = parse_peg(&fields, 0)?;
    let parent = parse_txn_path(&fields, 2)?;
    let name = fields.cstr(5)?;
    let result = ctx.editor()?.mv(from, parent, name);
    respond_empty(conn, result)
}

fn h_res<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, COPYISH_FMT)?;
    let from = parse_peg(&fields, 0)?;
    let parent = parse_txn_path(&fields, 2)?;
    let name = fields.cstr(5)?;
    let result = ctx.editor()?.res(from, parent, name);
    respond_empty(conn, result)
}

fn h_rm<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, RM_FMT)?;
    let loc = parse_txn_path(&fields, 0)?;
    let result = ctx.editor()?.rm(loc);
    respond_empty(conn, result)
}

fn h_put<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, PUT_FMT)?;
    let loc = parse_txn_path(&fields, 0)?;
    let content = require_content(&fields, 3)?;
    let result = ctx.editor()?.put(loc, content);
    respond_empty(conn, result)
}

fn h_add<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, ADD_FMT)?;
    let id = NodeId::new(fields.cstr(0)?);
    let kind = NodeKind::from_str(fields.word(1)?)?;
    let parent = NodeId::new(fields.cstr(2)?);
    let name = fields.cstr(3)?;
    let content = require_content(&fields, 4)?;
    let result = ctx.editor()?.add(id, kind, parent, name, content);
    respond_empty(conn, result)
}

fn h_copy_one<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, COPY_ONE_FMT)?;
    let id = NodeId::new(fields.cstr(0)?);
    let src_rev = fields.opt_rev(1)?;
    let src = NodeId::new(fields.cstr(2)?);
    let parent = NodeId::new(fields.cstr(3)?);
    let name = fields.cstr(4)?;
    let content = parse_content(&fields, 5)?;
    let result = ctx.editor()?.copy_one(id, src_rev, src, parent, name, content);
    respond_empty(conn, result)
}

fn h_copy_tree<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, COPY_TREE_FMT)?;
    let src_rev = fields.opt_rev(0)?;
    let src = NodeId::new(fields.cstr(1)?);
    let parent = NodeId::new(fields.cstr(2)?);
    let name = fields.cstr(3)?;
    let result = ctx.editor()?.copy_tree(src_rev, src, parent, name);
    respond_empty(conn, result)
}

fn h_delete<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, DELETE_FMT)?;
    let since = fields.rev(0)?;
    let id = NodeId::new(fields.cstr(1)?);
    let result = ctx.editor()?.delete(since, id);
    respond_empty(conn, result)
}

fn h_alter<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let fields = parse_tuple(params, ALTER_FMT)?;
    let since = fields.rev(0)?;
    let id = NodeId::new(fields.cstr(1)?);
    let parent = NodeId::new(fields.cstr(2)?);
    let name = fields.cstr(3)?;
    let content = parse_content(&fields, 4)?;
    let result = ctx.editor()?.alter(since, id, parent, name, content);
    respond_empty(conn, result)
}

fn h_complete<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    _params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let result = ctx.editor()?.complete();
    match result {
        Ok(rev) => conn.write_success("r", &[Arg::Rev(Some(rev))]),
        Err(err) => Err(as_cmd_err(err)),
    }
}

fn h_abort<'b, S: Read + Write>(
    conn: &mut WireConn<S>,
    ctx: &mut ServeCtx,
    _params: &'b [Item<'b>],
    _arena: &'b Bump,
) -> ArborResult<()> {
    let result = match ctx.txn.as_mut() {
        Some(txn) => txn.abort(),
        // aborting an edit that never started is a no-op
        None => Ok(()),
    };
    respond_empty(conn, result)
}

#[cfg(test)]
mod tests;
