//! Short, URL-safe public ids.
//!
//! Every entity has a hidden 64-bit primary key and a public id of the form
//! `{prefix}-{body}`, where `body` is a random value encoded in a 32-symbol,
//! URL-safe alphabet (Crockford base32, lowercased, no padding). The body
//! starts at 4 characters and widens to 5/6/7 as a table's row count grows
//! or a collision is observed at insert time (spec.md §9).

/// Crockford base32 alphabet, lowercase, with no ambiguous characters
/// (`i`, `l`, `o`, `u` are excluded).
const ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";

/// Entity-type prefixes used throughout the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityPrefix {
    Task,
    Epic,
    Run,
    Review,
}

impl EntityPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityPrefix::Task => "f",
            EntityPrefix::Epic => "e",
            EntityPrefix::Run => "r",
            EntityPrefix::Review => "v",
        }
    }
}

/// The adaptive length schedule: 4 -> 5 -> 6 -> 7 characters.
pub fn next_length(current: usize) -> usize {
    match current {
        4 => 5,
        5 => 6,
        6 => 7,
        _ => 7,
    }
}

/// Encode `random` (a 32/40/48-bit value, depending on `len`) as a
/// lowercase Crockford base32 string of exactly `len` characters.
pub fn encode(random: u64, len: usize) -> String {
    let mut out = vec![0u8; len];
    let mut value = random;
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(value & 0x1f) as usize];
        value >>= 5;
    }
    String::from_utf8(out).expect("alphabet is ASCII")
}

/// Generate a short id body using the process-wide RNG source provided by
/// the caller (the store owns randomness so tests can inject determinism).
pub fn generate_body(random_bits: u64, len: usize) -> String {
    encode(random_bits, len)
}

/// Build a full public id: `{prefix}-{body}`.
pub fn format_public_id(prefix: EntityPrefix, body: &str) -> String {
    format!("{}-{}", prefix.as_str(), body)
}

/// Split a full public id into its prefix and body, if it matches the
/// `{prefix}-{body}` shape.
pub fn split_public_id(id: &str) -> Option<(&str, &str)> {
    id.split_once('-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_stable_length() {
        for len in 4..=7 {
            let s = encode(0xdead_beef, len);
            assert_eq!(s.len(), len);
        }
    }

    #[test]
    fn encode_uses_only_alphabet_chars() {
        let s = encode(u64::MAX, 7);
        assert!(s.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn next_length_schedule() {
        assert_eq!(next_length(4), 5);
        assert_eq!(next_length(5), 6);
        assert_eq!(next_length(6), 7);
        assert_eq!(next_length(7), 7);
    }

    #[test]
    fn format_and_split_round_trip() {
        let id = format_public_id(EntityPrefix::Task, "a1b2c");
        assert_eq!(id, "f-a1b2c");
        assert_eq!(split_public_id(&id), Some(("f", "a1b2c")));
    }
}
