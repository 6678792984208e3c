use super::*;
use crate::test_utils::{conn_over, wire_to_bytes};
use bumpalo::Bump;

fn write_to_bytes(fmt: &str, args: &[Arg<'_>]) -> Vec<u8> {
    wire_to_bytes(|conn| conn.write_tuple(fmt, args)).unwrap()
}

fn with_parsed(bytes: &[u8], fmt: &str, check: impl FnOnce(ArborResult<Fields<'_>>)) {
    let arena = Bump::new();
    let mut conn = conn_over(bytes);
    let list = conn.read_tuple(&arena).unwrap();
    check(parse_tuple(list, fmt))
}

#[test]
fn test_write_tuple_wire_form() {
    let bytes = write_to_bytes(
        "w(nn)",
        &[Arg::Word(Some("edit")), Arg::Number(1), Arg::Number(2)],
    );
    assert_eq!(bytes, b"( edit ( 1 2 ) ) ");
}

#[test]
fn test_optional_group_with_value() {
    let bytes =
        write_to_bytes("[r]c", &[Arg::Rev(Some(Revnum(5))), Arg::CStr(Some("trunk/a"))]);
    assert_eq!(bytes, b"( ( 5 ) 7:trunk/a ) ");
}

#[test]
fn test_optional_group_omits_missing_value() {
    let bytes = write_to_bytes("[r]c", &[Arg::Rev(None), Arg::CStr(Some("trunk/a"))]);
    assert_eq!(bytes, b"( ( ) 7:trunk/a ) ");
}

#[test]
#[should_panic(expected = "missing value for required tuple field")]
fn test_missing_required_value_is_a_programming_error() {
    let _ = write_to_bytes("r", &[Arg::Rev(None)]);
}

#[test]
fn test_parse_tuple_positional_kinds() {
    let bytes = write_to_bytes(
        "nws",
        &[Arg::Number(9), Arg::Word(Some("dir")), Arg::Str(Some(b"raw\0bytes"))],
    );
    with_parsed(&bytes, "nws", |fields| {
        let fields = fields.unwrap();
        assert_eq!(fields.number(0).unwrap(), 9);
        assert_eq!(fields.word(1).unwrap(), "dir");
        assert_eq!(fields.bytes(2).unwrap(), b"raw\0bytes");
    });
}

#[test]
fn test_parse_optional_group_round_trip() {
    let bytes = write_to_bytes("[r]c", &[Arg::Rev(Some(Revnum(5))), Arg::CStr(Some("trunk"))]);
    with_parsed(&bytes, "[r]c", |fields| {
        let fields = fields.unwrap();
        assert_eq!(fields.opt_rev(0).unwrap(), Some(Revnum(5)));
        assert_eq!(fields.cstr(1).unwrap(), "trunk");
    });

    let bytes = write_to_bytes("[r]c", &[Arg::Rev(None), Arg::CStr(Some("trunk"))]);
    with_parsed(&bytes, "[r]c", |fields| {
        let fields = fields.unwrap();
        assert_eq!(fields.opt_rev(0).unwrap(), None);
        assert_eq!(fields.cstr(1).unwrap(), "trunk");
    });
}

#[test]
fn test_parse_wholly_absent_optional_group_keeps_positions_aligned() {
    // peer sent nothing at all where `[rc]` could have been
    with_parsed(b"( 3 ) ", "n[rc]", |fields| {
        let fields = fields.unwrap();
        assert_eq!(fields.number(0).unwrap(), 3);
        assert_eq!(fields.opt_rev(1).unwrap(), None);
        assert_eq!(fields.opt_cstr(2).unwrap(), None);
    });
}

#[test]
fn test_parse_required_group() {
    with_parsed(b"( ( 1 2 ) ) ", "(nn)", |fields| {
        let fields = fields.unwrap();
        assert_eq!(fields.number(0).unwrap(), 1);
        assert_eq!(fields.number(1).unwrap(), 2);
    });
}

#[test]
fn test_parse_kind_mismatch_is_malformed() {
    with_parsed(b"( 5 ) ", "w", |fields| assert!(fields.is_err()));
}

#[test]
fn test_parse_missing_required_item_is_malformed() {
    with_parsed(b"( 5 ) ", "nn", |fields| assert!(fields.is_err()));
}

#[test]
fn test_parse_tolerates_extra_trailing_items() {
    with_parsed(b"( 5 newfangled ) ", "n", |fields| {
        let fields = fields.unwrap();
        assert_eq!(fields.number(0).unwrap(), 5);
        assert_eq!(fields.len(), 1);
    });
}

#[test]
fn test_cstr_rejects_embedded_nul() {
    let bytes = write_to_bytes("s", &[Arg::Str(Some(b"nul\0inside"))]);
    with_parsed(&bytes, "c", |fields| assert!(fields.is_err()));
}

#[quickcheck]
fn tuple_round_trips_for_mixed_format(n: u64, rev: Option<u64>, payload: Vec<u8>) -> bool {
    let rev = rev.map(Revnum);
    let bytes = write_to_bytes(
        "n[r]sw",
        &[Arg::Number(n), Arg::Rev(rev), Arg::Str(Some(&payload)), Arg::Word(Some("ok"))],
    );
    let arena = Bump::new();
    let mut conn = conn_over(&bytes);
    let list = conn.read_tuple(&arena).unwrap();
    let fields = parse_tuple(list, "n[r]sw").unwrap();
    fields.number(0).unwrap() == n
        && fields.opt_rev(1).unwrap() == rev
        && fields.bytes(2).unwrap() == &payload[..]
        && fields.word(3).unwrap() == "ok"
}
