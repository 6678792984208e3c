use super::*;

#[test]
fn test_hash_of_empty_bytes_is_the_well_known_digest() {
    assert_eq!(hash_bytes(b""), Checksum::EMPTY);
}

#[test]
fn test_checksum_hex_round_trip() -> ArborResult<()> {
    let checksum = hash_bytes(b"hello world\n");
    let parsed = Checksum::from_str(&checksum.to_hex())?;
    assert_eq!(checksum, parsed);
    Ok(())
}

#[test]
fn test_checksum_from_str_rejects_bad_length() {
    assert!(Checksum::from_str("abcd").is_err());
}

#[test]
fn test_hashing_reader_accepts_matching_stream() -> ArborResult<()> {
    let text = b"some file text" as &[u8];
    let reader = HashingReader::new(text);
    let bytes = reader.read_verified(hash_bytes(text))?;
    assert_eq!(bytes, text);
    Ok(())
}

#[test]
fn test_hashing_reader_rejects_mismatched_stream() {
    let reader = HashingReader::new(b"some file text" as &[u8]);
    assert!(reader.read_verified(hash_bytes(b"different text")).is_err());
}

#[test]
fn test_hashing_reader_hashes_incrementally() {
    let text = b"incrementally hashed" as &[u8];
    let mut reader = HashingReader::new(text);
    let mut buf = [0; 7];
    loop {
        match reader.read(&mut buf).unwrap() {
            0 => break,
            _ => continue,
        }
    }
    assert_eq!(reader.finalize(), hash_bytes(text));
}
