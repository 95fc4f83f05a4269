//! Fixed-size on-disk representation of a single trie node.
//!
//! A record is laid out as:
//!
//! | bytes   | field                 | encoding                       |
//! |---------|-----------------------|--------------------------------|
//! | 0       | `character`           | raw byte                       |
//! | 1..9    | `child_offset`        | zig-zag varint, zero padded    |
//! | 9..17   | `next_sibling_offset` | zig-zag varint, zero padded    |
//! | 17..21  | `terminal_count`      | zig-zag varint, zero padded    |
//!
//! Each integer lives in a slot of fixed width, so every record is exactly
//! [`RECORD_SIZE`] bytes no matter how large the values are. Inside a slot the
//! value is written as a signed LEB128 varint (7 data bits per byte), which
//! bounds what a slot can hold: 56 bits for the offsets and 28 bits for the
//! count. Both bounds are far beyond what a store ever reaches, but values
//! outside them are rejected rather than silently truncated.

use crate::error::{CodecError, Field};

/// Offset value meaning "no such node".
pub const NO_NODE: i64 = -1;

const CHARACTER_POS: usize = 0;
const CHILD_POS: usize = CHARACTER_POS + 1;
const SIBLING_POS: usize = CHILD_POS + 8;
const COUNT_POS: usize = SIBLING_POS + 8;

/// Size in bytes of one encoded node.
pub const RECORD_SIZE: usize = COUNT_POS + 4;

/// Largest offset an 8-byte slot can hold.
pub const MAX_OFFSET: i64 = (1 << 55) - 1;
/// Smallest offset an 8-byte slot can hold.
pub const MIN_OFFSET: i64 = -(1 << 55);
/// Largest terminal count a 4-byte slot can hold.
pub const MAX_COUNT: i32 = (1 << 27) - 1;
/// Smallest terminal count a 4-byte slot can hold.
pub const MIN_COUNT: i32 = -(1 << 27);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TrieNode {
    /// The byte this node stands for. Meaningless on the root.
    pub character: u8,
    /// Offset of the first child, or [`NO_NODE`].
    pub child_offset: i64,
    /// Offset of the next node sharing this node's parent, or [`NO_NODE`].
    pub next_sibling_offset: i64,
    /// Number of inserted names ending exactly here.
    pub terminal_count: i32,
}

impl TrieNode {
    /// A leaf with no siblings that terminates nothing.
    pub fn new(character: u8) -> Self {
        Self {
            character,
            child_offset: NO_NODE,
            next_sibling_offset: NO_NODE,
            terminal_count: 0,
        }
    }

    /// The synthetic node stored at offset 0.
    pub fn root() -> Self {
        Self::new(0)
    }

    #[inline]
    pub fn has_child(&self) -> bool {
        self.child_offset != NO_NODE
    }

    #[inline]
    pub fn has_next_sibling(&self) -> bool {
        self.next_sibling_offset != NO_NODE
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.terminal_count > 0
    }

    pub fn encode(&self) -> Result<[u8; RECORD_SIZE], CodecError> {
        let mut record = [0u8; RECORD_SIZE];
        record[CHARACTER_POS] = self.character;
        put_varint(
            &mut record[CHILD_POS..SIBLING_POS],
            self.child_offset,
            Field::ChildOffset,
        )?;
        put_varint(
            &mut record[SIBLING_POS..COUNT_POS],
            self.next_sibling_offset,
            Field::NextSiblingOffset,
        )?;
        put_varint(
            &mut record[COUNT_POS..],
            i64::from(self.terminal_count),
            Field::TerminalCount,
        )?;
        Ok(record)
    }

    pub fn decode(record: &[u8]) -> Result<Self, CodecError> {
        if record.len() != RECORD_SIZE {
            return Err(CodecError::BadLength(record.len()));
        }

        let child_offset = get_varint(&record[CHILD_POS..SIBLING_POS], Field::ChildOffset)?;
        let next_sibling_offset =
            get_varint(&record[SIBLING_POS..COUNT_POS], Field::NextSiblingOffset)?;
        // A 4-byte slot carries at most 28 bits, which always fits.
        let terminal_count = get_varint(&record[COUNT_POS..], Field::TerminalCount)? as i32;

        Ok(Self {
            character: record[CHARACTER_POS],
            child_offset,
            next_sibling_offset,
            terminal_count,
        })
    }
}

#[inline]
fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
fn unzigzag(raw: u64) -> i64 {
    ((raw >> 1) as i64) ^ -((raw & 1) as i64)
}

/// Writes `value` into `slot`, which must already be zeroed.
fn put_varint(slot: &mut [u8], value: i64, field: Field) -> Result<(), CodecError> {
    let mut raw = zigzag(value);
    let mut pos = 0;
    while raw >= 0x80 {
        if pos + 1 >= slot.len() {
            return Err(CodecError::OutOfRange { field, value });
        }
        slot[pos] = (raw as u8) | 0x80;
        raw >>= 7;
        pos += 1;
    }
    slot[pos] = raw as u8;
    Ok(())
}

fn get_varint(slot: &[u8], field: Field) -> Result<i64, CodecError> {
    let mut raw = 0u64;
    let mut shift = 0;
    for &byte in slot {
        raw |= u64::from(byte & 0x7f) << shift;
        if byte < 0x80 {
            return Ok(unzigzag(raw));
        }
        shift += 7;
    }
    Err(CodecError::MalformedVarint(field))
}

#[cfg(test)]
mod tests {

    use super::*;

    fn roundtrip(node: TrieNode) {
        let record = node.encode().unwrap();
        assert_eq!(TrieNode::decode(&record).unwrap(), node);
    }

    #[test]
    fn test_roundtrip_sentinels() {
        roundtrip(TrieNode::new(b'S'));
        roundtrip(TrieNode::root());
    }

    #[test]
    fn test_roundtrip_boundaries() {
        for (child, sibling, count) in [
            (MAX_OFFSET, MIN_OFFSET, MAX_COUNT),
            (MIN_OFFSET, MAX_OFFSET, MIN_COUNT),
            (0, 0, 0),
            (21, 42, 1),
            (63, -64, 63),
            (64, -65, -64),
        ] {
            roundtrip(TrieNode {
                character: 0xff,
                child_offset: child,
                next_sibling_offset: sibling,
                terminal_count: count,
            });
        }
    }

    #[test]
    fn test_layout_matches_go_varint() {
        // Go's binary.PutVarint(-1) writes a single 0x01 byte, 21 writes 0x2a.
        let node = TrieNode {
            character: b'a',
            child_offset: 21,
            next_sibling_offset: NO_NODE,
            terminal_count: 1,
        };
        let record = node.encode().unwrap();
        assert_eq!(record.len(), 21);
        assert_eq!(record[0], b'a');
        assert_eq!(&record[1..9], &[0x2a, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&record[9..17], &[0x01, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&record[17..21], &[0x02, 0, 0, 0]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut node = TrieNode::new(b'x');
        node.child_offset = MAX_OFFSET + 1;
        assert!(matches!(
            node.encode(),
            Err(CodecError::OutOfRange {
                field: Field::ChildOffset,
                ..
            })
        ));

        let mut node = TrieNode::new(b'x');
        node.terminal_count = MAX_COUNT + 1;
        assert!(matches!(
            node.encode(),
            Err(CodecError::OutOfRange {
                field: Field::TerminalCount,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_bad_length() {
        assert!(matches!(
            TrieNode::decode(&[0u8; 20]),
            Err(CodecError::BadLength(20))
        ));
        assert!(matches!(
            TrieNode::decode(&[0u8; 22]),
            Err(CodecError::BadLength(22))
        ));
    }

    #[test]
    fn test_decode_unterminated_varint() {
        let mut record = TrieNode::new(b'x').encode().unwrap();
        record[COUNT_POS..].copy_from_slice(&[0x80; 4]);
        assert!(matches!(
            TrieNode::decode(&record),
            Err(CodecError::MalformedVarint(Field::TerminalCount))
        ));
    }
}
