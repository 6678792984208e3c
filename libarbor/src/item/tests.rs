use super::*;
use crate::error::ArborResultExt;
use crate::test_utils::{conn_over, wire_to_bytes};
use quickcheck::{Arbitrary, Gen};

fn serialize(item: &ItemBuf) -> Vec<u8> {
    wire_to_bytes(|conn| conn.write_item(item)).unwrap()
}

fn parse_one(bytes: &[u8]) -> ArborResult<ItemBuf> {
    let arena = Bump::new();
    let mut conn = conn_over(bytes);
    let item = conn.read_item(&arena)?;
    Ok(item.to_owned())
}

impl Arbitrary for ItemBuf {
    fn arbitrary(g: &mut Gen) -> Self {
        arbitrary_item(g, 3)
    }
}

fn arbitrary_item(g: &mut Gen, depth: usize) -> ItemBuf {
    let variants = if depth == 0 { 3 } else { 4 };
    match u8::arbitrary(g) % variants {
        0 => ItemBuf::Number(u64::arbitrary(g)),
        1 => ItemBuf::Str(Vec::arbitrary(g)),
        2 => ItemBuf::Word(arbitrary_word(g)),
        _ => {
            let len = usize::arbitrary(g) % 4;
            ItemBuf::List((0..len).map(|_| arbitrary_item(g, depth - 1)).collect())
        }
    }
}

fn arbitrary_word(g: &mut Gen) -> String {
    const ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const TAIL: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789-";
    let mut word = String::new();
    word.push(*g.choose(ALPHA).unwrap() as char);
    for _ in 0..usize::arbitrary(g) % 8 {
        word.push(*g.choose(TAIL).unwrap() as char);
    }
    word
}

#[quickcheck]
fn item_serialization_round_trips(item: ItemBuf) -> bool {
    parse_one(&serialize(&item)).unwrap() == item
}

#[quickcheck]
fn serialized_items_end_with_whitespace(item: ItemBuf) -> bool {
    matches!(serialize(&item).last(), Some(b' ' | b'\n'))
}

#[test]
fn test_number_wire_form() {
    assert_eq!(serialize(&ItemBuf::Number(42)), b"42 ");
    assert_eq!(parse_one(b"42 ").unwrap(), ItemBuf::Number(42));
    // newline is also a valid terminator
    assert_eq!(parse_one(b"42\n").unwrap(), ItemBuf::Number(42));
}

#[test]
fn test_number_at_the_63_bit_boundary() {
    let n = (1 << 63) - 1;
    assert_eq!(parse_one(&serialize(&ItemBuf::Number(n))).unwrap(), ItemBuf::Number(n));
    // we define the full unsigned range rather than the legacy signed artifact
    assert_eq!(parse_one(&serialize(&ItemBuf::Number(u64::MAX))).unwrap(), ItemBuf::Number(u64::MAX));
    assert!(parse_one(b"18446744073709551616 ").is_err());
}

#[test]
fn test_string_with_embedded_whitespace() {
    let item = ItemBuf::Str(b"hello world\n".to_vec());
    let bytes = serialize(&item);
    assert_eq!(bytes, b"12:hello world\n ");
    assert_eq!(parse_one(&bytes).unwrap(), item);
}

#[test]
fn test_string_may_contain_any_bytes() {
    let item = ItemBuf::Str(vec![0, 1, 2, b' ', b'\n', 0xff, b')']);
    assert_eq!(parse_one(&serialize(&item)).unwrap(), item);
}

#[test]
fn test_empty_string_wire_form() {
    assert_eq!(serialize(&ItemBuf::Str(vec![])), b"0: ");
    assert_eq!(parse_one(b"0: ").unwrap(), ItemBuf::Str(vec![]));
}

#[test]
fn test_singleton_list_of_empty_string() {
    let item = ItemBuf::List(vec![ItemBuf::Str(vec![])]);
    let bytes = serialize(&item);
    assert_eq!(bytes, b"( 0: ) ");
    assert_eq!(parse_one(&bytes).unwrap(), item);
}

#[test]
fn test_nested_list_round_trip() {
    let item = ItemBuf::List(vec![
        ItemBuf::Word("edit".to_owned()),
        ItemBuf::List(vec![ItemBuf::Number(7), ItemBuf::Str(b"trunk/a".to_vec())]),
        ItemBuf::List(vec![]),
    ]);
    assert_eq!(parse_one(&serialize(&item)).unwrap(), item);
}

#[test]
fn test_word_charset() {
    assert!(is_valid_word("success"));
    assert!(is_valid_word("copy-one"));
    assert!(is_valid_word("r2d2"));
    assert!(!is_valid_word("2fast"));
    assert!(!is_valid_word("-dash"));
    assert!(!is_valid_word("under_score"));
    assert!(!is_valid_word(""));
}

#[test]
fn test_malformed_inputs() {
    // leading byte that starts no item kind
    assert!(parse_one(b"@ ").is_err());
    // number terminated by a non-whitespace byte
    assert!(parse_one(b"5x ").is_err());
    // string payload not followed by whitespace
    assert!(parse_one(b"3:abcx").is_err());
    // bad byte inside a word
    assert!(parse_one(b"ab_c ").is_err());
}

#[test]
fn test_truncated_string_is_connection_closed() {
    assert!(parse_one(b"10:abc").is_connection_closed());
}

#[test]
fn test_unterminated_list_is_connection_closed() {
    assert!(parse_one(b"( 1 2 ").is_connection_closed());
}

#[test]
fn test_hostile_nesting_is_rejected() {
    let mut bytes = vec![b'('; MAX_NESTING + 2];
    bytes.push(b' ');
    let mut spaced = vec![];
    for byte in bytes {
        spaced.push(byte);
        spaced.push(b' ');
    }
    assert!(parse_one(&spaced).is_err());
}
