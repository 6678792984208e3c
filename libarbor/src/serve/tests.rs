use super::*;
use crate::error::ArborResultExt;
use crate::test_utils::conn_over;
use crate::tuple::Revnum;

fn run(repo: SharedRepo, input: &[u8]) -> (ArborResult<()>, Vec<u8>) {
    let mut conn = conn_over(input);
    let result = serve(&mut conn, repo, DispatchOpts::default());
    let _ = conn.flush();
    (result, conn.into_inner().output)
}

#[test]
fn test_ping_exchange_byte_for_byte() {
    let (result, output) = run(SharedRepo::new(), b"( ping ( ) ) ( abort ( ) ) ");
    result.unwrap();
    assert_eq!(output, b"( success ( ) ) ( success ( ) ) ");
}

#[test]
fn test_latest_rev_on_a_fresh_repository() {
    let (result, output) = run(SharedRepo::new(), b"( latest-rev ( ) ) ( abort ( ) ) ");
    result.unwrap();
    assert_eq!(output, b"( success ( 0 ) ) ( success ( ) ) ");
}

#[test]
fn test_mk_and_complete_from_raw_bytes() {
    let repo = SharedRepo::new();
    let (result, output) = run(
        repo.clone(),
        b"( mk ( dir ( ( ( 0 ) 0: ) 0: ) 4:tags ) ) ( complete ( ) ) ",
    );
    result.unwrap();
    assert_eq!(output, b"( success ( ) ) ( success ( 1 ) ) ");
    assert_eq!(repo.latest_rev(), Revnum(1));
    assert!(repo.resolve(Revnum(1), &RelPath::new("tags").unwrap()).is_ok());
}

#[test]
fn test_unknown_command_keeps_serving() {
    let (result, output) = run(SharedRepo::new(), b"( frobnicate ( ) ) ( abort ( ) ) ");
    result.unwrap();
    assert!(output.starts_with(b"( failure ( ( 120103 "));
    assert!(output.ends_with(b"( success ( ) ) "));
}

#[test]
fn test_malformed_command_poisons_the_connection() {
    let (result, output) = run(SharedRepo::new(), b"( 9 ( ) ) ( abort ( ) ) ");
    assert!(result.is_err());
    assert!(!result.is_connection_closed());
    assert!(output.is_empty());
}

#[test]
fn test_edit_failure_is_a_failure_response() {
    // removing a path absent from the transaction violates a precondition
    let (result, output) = run(
        SharedRepo::new(),
        b"( rm ( ( ( ( 0 ) 5:ghost ) 0: ) ) ) ( abort ( ) ) ",
    );
    result.unwrap();
    assert!(output.starts_with(b"( failure ( ( 125002 "));
}
