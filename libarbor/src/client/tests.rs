use super::*;
use crate::dispatch::DispatchOpts;
use crate::error::{ArborResultExt, ErrCode, WireFailure};
use crate::path::RelPath;
use crate::repo::{Repository, SharedRepo};
use crate::serve::serve;
use crate::test_utils::{pipe, PipeEnd};
use crate::txn::TxnEditor;

fn rel(s: &str) -> RelPath {
    RelPath::new(s).unwrap()
}

fn peg(rev: u64, path: &str) -> PegPath {
    PegPath::committed(Revnum(rev), rel(path))
}

fn at(peg: PegPath) -> TxnPath {
    TxnPath::of_peg(peg)
}

fn file(bytes: &[u8]) -> Content {
    Content::file_bytes(Props::default(), bytes.to_vec())
}

/// r1 holds `trunk/` with one file `trunk/a` containing `alpha\n`
fn fixture() -> SharedRepo {
    let repo = SharedRepo::new();
    let mut txn = TxnEditor::new(repo.clone()).unwrap();
    txn.mk(NodeKind::Dir, at(peg(0, "")), "trunk").unwrap();
    txn.mk(NodeKind::File, TxnPath::new(peg(0, ""), rel("trunk")), "a").unwrap();
    txn.put(TxnPath::new(peg(0, ""), rel("trunk/a")), file(b"alpha\n")).unwrap();
    txn.complete().unwrap();
    repo
}

/// run a server on one pipe end and the client closure on the other,
/// returning what the serve loop returned
fn with_session(
    repo: SharedRepo,
    f: impl FnOnce(&mut Session<PipeEnd>),
) -> ArborResult<()> {
    let (client_end, server_end) = pipe();
    crossbeam::thread::scope(|scope| {
        let server_repo = repo;
        let handle = scope.spawn(move |_| {
            let mut conn = WireConn::new(server_end);
            serve(&mut conn, server_repo, DispatchOpts::default())
        });
        let mut session = Session::new(client_end);
        f(&mut session);
        drop(session);
        handle.join().unwrap()
    })
    .unwrap()
}

#[test]
fn test_inspection_commands() {
    let repo = fixture();
    let result = with_session(repo.clone(), |session| {
        session.ping().unwrap();
        assert_eq!(session.latest_rev().unwrap(), Revnum(1));
        assert_eq!(session.check_path(&peg(1, "trunk")).unwrap(), NodeKind::Dir);
        assert_eq!(session.check_path(&peg(1, "trunk/a")).unwrap(), NodeKind::File);
        assert_eq!(session.check_path(&peg(1, "nowhere")).unwrap(), NodeKind::Unknown);

        let (props, checksum, text) = session.get_file(&peg(1, "trunk/a")).unwrap();
        assert!(props.is_empty());
        assert_eq!(text, b"alpha\n");
        assert_eq!(checksum, hash_bytes(b"alpha\n"));

        session.edit().abort().unwrap();
    });
    result.unwrap();
}

#[test]
fn test_remote_create_and_populate_commits() {
    let repo = fixture();
    let result = with_session(repo.clone(), |session| {
        let mut edit = session.edit();
        edit.mk(NodeKind::File, at(peg(1, "trunk")), "b").unwrap();
        let props: Props = indexmap! { b"mime-type".to_vec() => b"text/plain".to_vec() };
        edit.put(TxnPath::new(peg(1, "trunk"), rel("b")), Content::file_bytes(props, b"beta\n".to_vec()))
            .unwrap();
        assert_eq!(edit.complete().unwrap(), Revnum(2));
    });
    result.unwrap();

    let record = repo.cat(Revnum(2), &rel("trunk/b")).unwrap();
    assert_eq!(record.text, b"beta\n");
    assert_eq!(record.props.get(b"mime-type".as_ref()).unwrap(), b"text/plain");
}

#[test]
fn test_remote_failure_keeps_the_session_usable() {
    let repo = fixture();
    let result = with_session(repo.clone(), |session| {
        let err = session.edit().mk(NodeKind::File, at(peg(1, "trunk")), "a").unwrap_err();
        let failure = err.downcast_ref::<WireFailure>().unwrap();
        assert!(failure.contains_code(ErrCode::Precondition));

        // the connection survives a failure response
        session.ping().unwrap();
        let mut edit = session.edit();
        edit.mk(NodeKind::File, at(peg(1, "trunk")), "c").unwrap();
        assert_eq!(edit.complete().unwrap(), Revnum(2));
    });
    result.unwrap();
    assert!(repo.resolve(Revnum(2), &rel("trunk/c")).is_ok());
}

#[test]
fn test_remote_stale_edit_is_out_of_date() {
    let repo = fixture();

    let result = with_session(repo.clone(), |session| {
        let mut edit = session.edit();
        edit.put(at(peg(1, "trunk/a")), file(b"first\n")).unwrap();
        assert_eq!(edit.complete().unwrap(), Revnum(2));
    });
    result.unwrap();

    let result = with_session(repo.clone(), |session| {
        let mut edit = session.edit();
        let err = edit.put(at(peg(1, "trunk/a")), file(b"second\n")).unwrap_err();
        assert!(err.is_out_of_date());
        edit.abort().unwrap();
    });
    result.unwrap();
    assert_eq!(repo.latest_rev(), Revnum(2));
}

#[test]
fn test_remote_id_style_edit() {
    let repo = fixture();
    let root = repo.root_id();
    let trunk = repo.resolve(Revnum(1), &rel("trunk")).unwrap();

    let result = with_session(repo.clone(), |session| {
        let mut edit = session.edit();
        edit.add(NodeId::new("d"), NodeKind::Dir, root.clone(), "docs", Content::dir(Props::default()))
            .unwrap();
        edit.add(NodeId::new("f"), NodeKind::File, NodeId::new("d"), "notes", file(b"hi\n"))
            .unwrap();
        edit.alter(Revnum(1), trunk.clone(), root.clone(), "code", None).unwrap();
        assert_eq!(edit.complete().unwrap(), Revnum(2));
    });
    result.unwrap();

    assert_eq!(repo.cat(Revnum(2), &rel("docs/notes")).unwrap().text, b"hi\n");
    assert_eq!(repo.resolve(Revnum(2), &rel("code")).unwrap(), trunk);
    assert_eq!(repo.cat(Revnum(2), &rel("code/a")).unwrap().text, b"alpha\n");
}

#[test]
fn test_remote_abort_discards_the_edit() {
    let repo = fixture();
    let result = with_session(repo.clone(), |session| {
        let mut edit = session.edit();
        edit.mk(NodeKind::Dir, at(peg(1, "")), "doomed").unwrap();
        edit.abort().unwrap();
    });
    result.unwrap();
    assert_eq!(repo.latest_rev(), Revnum(1));
    assert!(repo.resolve(Revnum(1), &rel("doomed")).is_err());
}

#[test]
fn test_remote_symlink_content() {
    let repo = fixture();
    let result = with_session(repo.clone(), |session| {
        let mut edit = session.edit();
        edit.mk(NodeKind::Symlink, at(peg(1, "trunk")), "link").unwrap();
        edit.put(
            TxnPath::new(peg(1, "trunk"), rel("link")),
            Content::symlink(Props::default(), b"a".to_vec()),
        )
        .unwrap();
        assert_eq!(edit.complete().unwrap(), Revnum(2));
    });
    result.unwrap();
    let record = repo.cat(Revnum(2), &rel("trunk/link")).unwrap();
    assert_eq!(record.kind, NodeKind::Symlink);
    assert_eq!(record.target.as_deref(), Some(b"a" as &[u8]));
}
