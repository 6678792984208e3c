use crate::checksum::{hash_bytes, Checksum};
use crate::conn::WireConn;
use crate::editor::{
    Content, Editor, EditorCaps, NodeId, NodeKind, PegPath, Props, StoredContent, TxnPath,
};
use crate::error::ArborResult;
use crate::item::ItemBuf;
use crate::serve::{parse_props, props_items};
use crate::tuple::{Arg, Revnum};
use bumpalo::Bump;
use std::io::{Read, Write};
use std::str::FromStr;

/// client endpoint: inspection calls plus an [EditDrive] that speaks the
/// tree-edit protocol
///
/// every command is answered before the next is sent; the connection's
/// flush-before-read discipline keeps the exchange deadlock-free
pub struct Session<S: Read + Write> {
    conn: WireConn<S>,
}

impl<S: Read + Write> Session<S> {
    pub fn new(stream: S) -> Self {
        Self { conn: WireConn::new(stream) }
    }

    pub fn into_inner(self) -> S {
        self.conn.into_inner()
    }

    pub fn ping(&mut self) -> ArborResult<()> {
        rpc_unit(&mut self.conn, "ping", "", &[])
    }

    pub fn latest_rev(&mut self) -> ArborResult<Revnum> {
        rpc_rev(&mut self.conn, "latest-rev", "", &[])
    }

    pub fn check_path(&mut self, peg: &PegPath) -> ArborResult<NodeKind> {
        self.conn.write_cmd("check-path", "([r]c)", &peg_args(peg))?;
        let arena = Bump::new();
        let fields = self.conn.read_response(&arena, "w")?;
        NodeKind::from_str(fields.word(0)?)
    }

    pub fn get_file(&mut self, peg: &PegPath) -> ArborResult<(Props, Checksum, Vec<u8>)> {
        self.conn.write_cmd("get-file", "([r]c)", &peg_args(peg))?;
        let arena = Bump::new();
        let fields = self.conn.read_response(&arena, "lcs")?;
        let props = parse_props(Some(fields.list(0)?))?;
        let checksum = Checksum::from_str(fields.cstr(1)?)?;
        let text = fields.bytes(2)?.to_vec();
        Ok((props, checksum, text))
    }

    /// drive an edit; the server opens its transaction on the first operation
    pub fn edit(&mut self) -> EditDrive<'_, S> {
        EditDrive { conn: &mut self.conn }
    }
}

fn rpc_unit<S: Read + Write>(
    conn: &mut WireConn<S>,
    name: &str,
    fmt: &str,
    args: &[Arg<'_>],
) -> ArborResult<()> {
    conn.write_cmd(name, fmt, args)?;
    let arena = Bump::new();
    conn.read_response(&arena, "")?;
    Ok(())
}

fn rpc_rev<S: Read + Write>(
    conn: &mut WireConn<S>,
    name: &str,
    fmt: &str,
    args: &[Arg<'_>],
) -> ArborResult<Revnum> {
    conn.write_cmd(name, fmt, args)?;
    let arena = Bump::new();
    let fields = conn.read_response(&arena, "r")?;
    fields.rev(0)
}

fn peg_args(peg: &PegPath) -> [Arg<'_>; 2] {
    [Arg::Rev(peg.rev), Arg::CStr(Some(peg.path.as_str()))]
}

/// node content staged in its wire shape so argument slices can borrow it
struct ContentWire {
    kind: Option<&'static str>,
    base_rev: Option<Revnum>,
    base_path: Option<String>,
    props: Vec<ItemBuf>,
    checksum: Option<String>,
    text: Option<Vec<u8>>,
    target: Option<Vec<u8>>,
}

impl ContentWire {
    fn absent() -> Self {
        Self {
            kind: None,
            base_rev: None,
            base_path: None,
            props: vec![],
            checksum: None,
            text: None,
            target: None,
        }
    }

    fn new(content: Content) -> ArborResult<Self> {
        let stored = StoredContent::materialize(content)?;
        Ok(Self {
            kind: Some(stored.kind.as_word()),
            base_rev: stored.base.as_ref().and_then(|peg| peg.rev),
            base_path: stored.base.as_ref().map(|peg| peg.path.as_str().to_owned()),
            props: props_items(&stored.props),
            checksum: stored.text.as_ref().map(|text| hash_bytes(text).to_hex()),
            text: stored.text,
            target: stored.target,
        })
    }

    fn of(content: Option<Content>) -> ArborResult<Self> {
        match content {
            Some(content) => Self::new(content),
            None => Ok(Self::absent()),
        }
    }

    /// the seven fields of the content tuple, in wire order
    fn args(&self) -> [Arg<'_>; 7] {
        [
            Arg::Word(self.kind),
            Arg::Rev(self.base_rev),
            Arg::CStr(self.base_path.as_deref()),
            Arg::List(self.kind.map(|_| &self.props[..])),
            Arg::CStr(self.checksum.as_deref()),
            Arg::Str(self.text.as_deref()),
            Arg::Str(self.target.as_deref()),
        ]
    }
}

/// remote editor: each slot becomes one command exchange on the session's
/// connection
pub struct EditDrive<'s, S: Read + Write> {
    conn: &'s mut WireConn<S>,
}

impl<'s, S: Read + Write> Editor for EditDrive<'s, S> {
    fn capabilities(&self) -> EditorCaps {
        EditorCaps::PATH_OPS
            | EditorCaps::ID_OPS
            | EditorCaps::COPY_FROM_TXN
            | EditorCaps::RECURSIVE_DELETE
    }

    fn mk(&mut self, kind: NodeKind, parent: TxnPath, name: &str) -> ArborResult<()> {
        rpc_unit(
            self.conn,
            "mk",
            "w(([r]c)c)c",
            &[
                Arg::Word(Some(kind.as_word())),
                Arg::Rev(parent.peg.rev),
                Arg::CStr(Some(parent.peg.path.as_str())),
                Arg::CStr(Some(parent.created.as_str())),
                Arg::CStr(Some(name)),
            ],
        )
    }

    fn cp(&mut self, from: PegPath, parent: TxnPath, name: &str) -> ArborResult<()> {
        self.copyish("cp", from, parent, name)
    }

    fn mv(&mut self, from: PegPath, parent: TxnPath, name: &str) -> ArborResult<()> {
        self.copyish("mv", from, parent, name)
    }

    fn res(&mut self, from: PegPath, parent: TxnPath, name: &str) -> ArborResult<()> {
        self.copyish("res", from, parent, name)
    }

    fn rm(&mut self, loc: TxnPath) -> ArborResult<()> {
        rpc_unit(
            self.conn,
            "rm",
            "(([r]c)c)",
            &[
                Arg::Rev(loc.peg.rev),
                Arg::CStr(Some(loc.peg.path.as_str())),
                Arg::CStr(Some(loc.created.as_str())),
            ],
        )
    }

    fn put(&mut self, loc: TxnPath, content: Content) -> ArborResult<()> {
        let wire = ContentWire::new(content)?;
        let mut args = vec![
            Arg::Rev(loc.peg.rev),
            Arg::CStr(Some(loc.peg.path.as_str())),
            Arg::CStr(Some(loc.created.as_str())),
        ];
        args.extend(wire.args());
        rpc_unit(self.conn, "put", "(([r]c)c)(w[([r]c)]l[c][s][s])", &args)
    }

    fn add(
        &mut self,
        local_id: NodeId,
        kind: NodeKind,
        parent: NodeId,
        name: &str,
        content: Content,
    ) -> ArborResult<()> {
        let wire = ContentWire::new(content)?;
        let mut args = vec![
            Arg::CStr(Some(local_id.as_str())),
            Arg::Word(Some(kind.as_word())),
            Arg::CStr(Some(parent.as_str())),
            Arg::CStr(Some(name)),
        ];
        args.extend(wire.args());
        rpc_unit(self.conn, "add", "cwcc(w[([r]c)]l[c][s][s])", &args)
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
        let wire = ContentWire::of(content)?;
        let mut args = vec![
            Arg::CStr(Some(local_id.as_str())),
            Arg::Rev(src_rev),
            Arg::CStr(Some(src.as_str())),
            Arg::CStr(Some(parent.as_str())),
            Arg::CStr(Some(name)),
        ];
        args.extend(wire.args());
        rpc_unit(self.conn, "copy-one", "c[r]ccc[w[([r]c)]l[c][s][s]]", &args)
    }

    fn copy_tree(
        &mut self,
        src_rev: Option<Revnum>,
        src: NodeId,
        parent: NodeId,
        name: &str,
    ) -> ArborResult<()> {
        rpc_unit(
            self.conn,
            "copy-tree",
            "[r]ccc",
            &[
                Arg::Rev(src_rev),
                Arg::CStr(Some(src.as_str())),
                Arg::CStr(Some(parent.as_str())),
                Arg::CStr(Some(name)),
            ],
        )
    }

    fn delete(&mut self, since_rev: Revnum, id: NodeId) -> ArborResult<()> {
        rpc_unit(
            self.conn,
            "delete",
            "rc",
            &[Arg::Rev(Some(since_rev)), Arg::CStr(Some(id.as_str()))],
        )
    }

    fn alter(
        &mut self,
        since_rev: Revnum,
        id: NodeId,
        parent: NodeId,
        name: &str,
        content: Option<Content>,
    ) -> ArborResult<()> {
        let wire = ContentWire::of(content)?;
        let mut args = vec![
            Arg::Rev(Some(since_rev)),
            Arg::CStr(Some(id.as_str())),
            Arg::CStr(Some(parent.as_str())),
            Arg::CStr(Some(name)),
        ];
        args.extend(wire.args());
        rpc_unit(self.conn, "alter", "rccc[w[([r]c)]l[c][s][s]]", &args)
    }

    fn complete(&mut self) -> ArborResult<Revnum> {
        rpc_rev(self.conn, "complete", "", &[])
    }

    fn abort(&mut self) -> ArborResult<()> {
        rpc_unit(self.conn, "abort", "", &[])
    }
}

impl<'s, S: Read + Write> EditDrive<'s, S> {
    fn copyish(&mut self, cmd: &str, from: PegPath, parent: TxnPath, name: &str) -> ArborResult<()> {
        rpc_unit(
            self.conn,
            cmd,
            "([r]c)(([r]c)c)c",
            &[
                Arg::Rev(from.rev),
                Arg::CStr(Some(from.path.as_str())),
                Arg::Rev(parent.peg.rev),
                Arg::CStr(Some(parent.peg.path.as_str())),
                Arg::CStr(Some(parent.created.as_str())),
                Arg::CStr(Some(name)),
            ],
        )
    }
}

#[cfg(test)]
mod tests;
