// Record-level view of a bitcode stream. The parser never touches bits: it
// consumes enter/exit/record events from a Cursor. Two cursors exist, the
// bit-level reader for .pexe files and a memory cursor replaying a prepared
// event list, which is what the tests drive the parser with.

//! Bitstream cursor abstraction and the fixed record ABI.

use thiserror::Error;

pub mod abi;
pub mod reader;

pub use reader::PexeReader;

/// One record: a code plus its operand values, tagged with the bit offset at
/// which the record started (for diagnostics).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub code: u32,
    pub values: Vec<u64>,
    pub bit_offset: u64,
}

impl Record {
    pub fn new(code: u32, values: Vec<u64>) -> Self {
        Self { code, values, bit_offset: 0 }
    }
}

/// Events produced by a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Enter { block_id: u32 },
    Exit,
    Record(Record),
}

/// Errors raised below the record level.
#[derive(Debug, Error)]
pub enum BitstreamError {
    #[error("bitcode input is not a multiple of 4 bytes")]
    NotWordAligned,
    #[error("bad bitcode header magic")]
    BadMagic,
    #[error("unsupported bitcode header (version field {0})")]
    UnsupportedHeader(u32),
    #[error("bitstream truncated at bit {0}")]
    Truncated(u64),
    #[error("malformed bitstream: {0}")]
    Malformed(String),
}

/// Sequential access to the record stream.
///
/// `skip_block` must be called directly after an [`Event::Enter`] and advances
/// past the matching exit without yielding the block's contents.
pub trait Cursor {
    fn next_event(&mut self) -> Result<Option<Event>, BitstreamError>;

    fn skip_block(&mut self) -> Result<(), BitstreamError>;

    /// Size of the file header in bytes, added to bit offsets when rendering
    /// diagnostics.
    fn header_size(&self) -> usize {
        0
    }
}

/// Decode a sign-rotated integer: small signed values are stored with the sign
/// in the low bit.
pub fn decode_sign_rotated(value: u64) -> i64 {
    if value & 1 != 0 {
        -((value >> 1) as i64)
    } else {
        (value >> 1) as i64
    }
}

/// Replays a prepared event list. Record bit offsets are synthesized from the
/// event index so diagnostics remain distinguishable.
pub struct MemoryCursor {
    events: std::vec::IntoIter<Event>,
    position: u64,
}

impl MemoryCursor {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events: events.into_iter(), position: 0 }
    }
}

impl Cursor for MemoryCursor {
    fn next_event(&mut self) -> Result<Option<Event>, BitstreamError> {
        let mut event = match self.events.next() {
            Some(event) => event,
            None => return Ok(None),
        };
        self.position += 32;
        if let Event::Record(record) = &mut event {
            if record.bit_offset == 0 {
                record.bit_offset = self.position;
            }
        }
        Ok(Some(event))
    }

    fn skip_block(&mut self) -> Result<(), BitstreamError> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next_event()? {
                Some(Event::Enter { .. }) => depth += 1,
                Some(Event::Exit) => depth -= 1,
                Some(Event::Record(_)) => {}
                None => {
                    return Err(BitstreamError::Malformed(
                        "unterminated block while skipping".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_rotated_decoding() {
        assert_eq!(decode_sign_rotated(0), 0);
        assert_eq!(decode_sign_rotated(2), 1);
        assert_eq!(decode_sign_rotated(3), -1);
        assert_eq!(decode_sign_rotated(4), 2);
        assert_eq!(decode_sign_rotated(5), -2);
    }

    #[test]
    fn test_memory_cursor_skip() {
        let mut cursor = MemoryCursor::new(vec![
            Event::Enter { block_id: 17 },
            Event::Record(Record::new(1, vec![2])),
            Event::Enter { block_id: 11 },
            Event::Exit,
            Event::Exit,
            Event::Record(Record::new(9, vec![])),
        ]);
        assert!(matches!(
            cursor.next_event().unwrap(),
            Some(Event::Enter { block_id: 17 })
        ));
        cursor.skip_block().unwrap();
        match cursor.next_event().unwrap() {
            Some(Event::Record(record)) => assert_eq!(record.code, 9),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(cursor.next_event().unwrap().is_none());
    }
}
