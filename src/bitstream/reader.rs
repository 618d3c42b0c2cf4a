// Bit-level reader for .pexe inputs. Everything below the record level lives
// here: the fixed file header, VBR decoding, abbreviation definitions (fixed,
// vbr, char6, array, blob) and the blockinfo block, which registers
// abbreviations for other blocks and is consumed without ever reaching the
// parser. The reader surfaces the same Event stream as the memory cursor.

//! Bit-level `.pexe` bitstream reader.

use std::collections::HashMap;

use super::{BitstreamError, Cursor, Event, Record};

// Builtin abbreviation IDs, present in every block.
const END_BLOCK: u64 = 0;
const ENTER_SUBBLOCK: u64 = 1;
const DEFINE_ABBREV: u64 = 2;
const UNABBREV_RECORD: u64 = 3;
const FIRST_APPLICATION_ABBREV: u64 = 4;

// Record code inside the blockinfo block selecting the block being described.
const BLOCKINFO_CODE_SETBID: u32 = 1;

const INITIAL_ABBREV_WIDTH: u32 = 2;

/// One operand of an abbreviation definition.
#[derive(Debug, Clone)]
enum AbbrevOp {
    Literal(u64),
    Fixed(u32),
    Vbr(u32),
    Char6,
    Array(Box<AbbrevOp>),
    Blob,
}

#[derive(Debug, Clone)]
struct Abbrev {
    ops: Vec<AbbrevOp>,
}

struct Scope {
    abbrev_width: u32,
    abbrevs: Vec<Abbrev>,
    /// Absolute bit position just past the block's last word.
    end_bit: u64,
}

/// Reader yielding record events from raw `.pexe` bytes.
pub struct PexeReader<'a> {
    data: &'a [u8],
    header_size: usize,
    bit_pos: u64,
    scopes: Vec<Scope>,
    blockinfo: HashMap<u32, Vec<Abbrev>>,
}

impl<'a> PexeReader<'a> {
    /// Validate the fixed header and position the cursor on the first
    /// top-level abbreviation ID.
    pub fn new(data: &'a [u8]) -> Result<Self, BitstreamError> {
        if data.len() % 4 != 0 {
            return Err(BitstreamError::NotWordAligned);
        }
        if data.len() < 8 || &data[0..4] != b"PEXE" {
            return Err(BitstreamError::BadMagic);
        }
        let num_fields = u16::from_le_bytes([data[4], data[5]]) as usize;
        let field_bytes = u16::from_le_bytes([data[6], data[7]]) as usize;
        let header_size = 8 + field_bytes;
        if header_size % 4 != 0 || header_size > data.len() {
            return Err(BitstreamError::UnsupportedHeader(num_fields as u32));
        }
        Ok(Self {
            data: &data[header_size..],
            header_size,
            bit_pos: 0,
            scopes: Vec::new(),
            blockinfo: HashMap::new(),
        })
    }

    fn bits_total(&self) -> u64 {
        self.data.len() as u64 * 8
    }

    fn read(&mut self, nbits: u32) -> Result<u64, BitstreamError> {
        debug_assert!(nbits >= 1 && nbits <= 32);
        if self.bit_pos + nbits as u64 > self.bits_total() {
            return Err(BitstreamError::Truncated(self.bit_pos));
        }
        let mut result = 0u64;
        for i in 0..nbits as u64 {
            let pos = self.bit_pos + i;
            let bit = (self.data[(pos / 8) as usize] >> (pos % 8)) & 1;
            result |= (bit as u64) << i;
        }
        self.bit_pos += nbits as u64;
        Ok(result)
    }

    fn read_vbr(&mut self, nbits: u32) -> Result<u64, BitstreamError> {
        let hi_mask = 1u64 << (nbits - 1);
        let mut piece = self.read(nbits)?;
        if piece & hi_mask == 0 {
            return Ok(piece);
        }
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            result |= (piece & (hi_mask - 1)) << shift;
            if piece & hi_mask == 0 {
                return Ok(result);
            }
            shift += nbits - 1;
            if shift >= 64 {
                return Err(BitstreamError::Malformed("overlong VBR value".to_string()));
            }
            piece = self.read(nbits)?;
        }
    }

    fn align32(&mut self) {
        self.bit_pos = (self.bit_pos + 31) & !31;
    }

    fn abbrev_width(&self) -> u32 {
        self.scopes.last().map_or(INITIAL_ABBREV_WIDTH, |s| s.abbrev_width)
    }

    fn read_abbrev_def(&mut self) -> Result<Abbrev, BitstreamError> {
        let num_ops = self.read_vbr(5)? as usize;
        let mut raw = Vec::with_capacity(num_ops);
        for _ in 0..num_ops {
            let is_literal = self.read(1)? != 0;
            if is_literal {
                raw.push(AbbrevOp::Literal(self.read_vbr(8)?));
                continue;
            }
            let encoding = self.read(3)?;
            raw.push(match encoding {
                1 => AbbrevOp::Fixed(self.read_vbr(5)? as u32),
                2 => AbbrevOp::Vbr(self.read_vbr(5)? as u32),
                3 => AbbrevOp::Array(Box::new(AbbrevOp::Literal(0))), // element patched below
                4 => AbbrevOp::Char6,
                5 => AbbrevOp::Blob,
                other => {
                    return Err(BitstreamError::Malformed(format!(
                        "unknown abbreviation encoding {other}"
                    )))
                }
            });
        }
        // An array operand consumes the following operand as its element type.
        let mut ops = Vec::with_capacity(raw.len());
        let mut iter = raw.into_iter();
        while let Some(op) = iter.next() {
            if matches!(op, AbbrevOp::Array(_)) {
                let elem = iter.next().ok_or_else(|| {
                    BitstreamError::Malformed("array abbreviation missing element".to_string())
                })?;
                ops.push(AbbrevOp::Array(Box::new(elem)));
            } else {
                ops.push(op);
            }
        }
        if ops.is_empty() {
            return Err(BitstreamError::Malformed("empty abbreviation".to_string()));
        }
        Ok(Abbrev { ops })
    }

    fn decode_scalar(&mut self, op: &AbbrevOp) -> Result<u64, BitstreamError> {
        match op {
            AbbrevOp::Literal(v) => Ok(*v),
            AbbrevOp::Fixed(0) => Ok(0),
            AbbrevOp::Fixed(n) => self.read(*n),
            AbbrevOp::Vbr(n) => self.read_vbr(*n),
            AbbrevOp::Char6 => {
                let v = self.read(6)?;
                Ok(match v {
                    0..=25 => b'a' as u64 + v,
                    26..=51 => b'A' as u64 + v - 26,
                    52..=61 => b'0' as u64 + v - 52,
                    62 => b'.' as u64,
                    _ => b'_' as u64,
                })
            }
            AbbrevOp::Array(_) | AbbrevOp::Blob => {
                Err(BitstreamError::Malformed("nested aggregate abbreviation".to_string()))
            }
        }
    }

    fn read_abbreviated_record(&mut self, index: usize, start: u64) -> Result<Record, BitstreamError> {
        let abbrev = {
            let scope = self.scopes.last().ok_or_else(|| {
                BitstreamError::Malformed("abbreviated record outside any block".to_string())
            })?;
            scope.abbrevs.get(index).cloned().ok_or_else(|| {
                BitstreamError::Malformed(format!("abbreviation {index} not defined"))
            })?
        };
        let mut values = Vec::new();
        for op in &abbrev.ops {
            match op {
                AbbrevOp::Array(elem) => {
                    let count = self.read_vbr(6)?;
                    for _ in 0..count {
                        let v = self.decode_scalar(elem)?;
                        values.push(v);
                    }
                }
                AbbrevOp::Blob => {
                    let count = self.read_vbr(6)?;
                    self.align32();
                    for _ in 0..count {
                        values.push(self.read(8)?);
                    }
                    self.align32();
                }
                scalar => values.push(self.decode_scalar(scalar)?),
            }
        }
        if values.is_empty() {
            return Err(BitstreamError::Malformed("abbreviated record without code".to_string()));
        }
        let code = values.remove(0) as u32;
        Ok(Record { code, values, bit_offset: start })
    }

    /// Consume a blockinfo block, attaching its abbreviation definitions to
    /// the block IDs named by SETBID records.
    fn read_blockinfo(&mut self, end_bit: u64) -> Result<(), BitstreamError> {
        let width = self.read_vbr(4)? as u32;
        self.align32();
        let _len = self.read(32)?;
        let mut cur_bid: Option<u32> = None;
        loop {
            let id = self.read(width)?;
            match id {
                END_BLOCK => {
                    self.align32();
                    if self.bit_pos != end_bit {
                        return Err(BitstreamError::Malformed(
                            "blockinfo block length mismatch".to_string(),
                        ));
                    }
                    return Ok(());
                }
                DEFINE_ABBREV => {
                    let abbrev = self.read_abbrev_def()?;
                    let bid = cur_bid.ok_or_else(|| {
                        BitstreamError::Malformed(
                            "blockinfo abbreviation before SETBID".to_string(),
                        )
                    })?;
                    self.blockinfo.entry(bid).or_default().push(abbrev);
                }
                UNABBREV_RECORD => {
                    let code = self.read_vbr(6)? as u32;
                    let num = self.read_vbr(6)?;
                    let mut values = Vec::with_capacity(num as usize);
                    for _ in 0..num {
                        values.push(self.read_vbr(6)?);
                    }
                    if code == BLOCKINFO_CODE_SETBID {
                        let bid = *values.first().ok_or_else(|| {
                            BitstreamError::Malformed("SETBID without operand".to_string())
                        })?;
                        cur_bid = Some(bid as u32);
                    }
                    // Other blockinfo records (block names) are ignored.
                }
                ENTER_SUBBLOCK => {
                    return Err(BitstreamError::Malformed(
                        "nested block inside blockinfo".to_string(),
                    ))
                }
                _ => {
                    return Err(BitstreamError::Malformed(
                        "abbreviated record inside blockinfo".to_string(),
                    ))
                }
            }
        }
    }
}

impl Cursor for PexeReader<'_> {
    fn next_event(&mut self) -> Result<Option<Event>, BitstreamError> {
        loop {
            if self.scopes.is_empty() {
                // Top level: a fully consumed stream is a clean end of input.
                self.align32();
                if self.bit_pos >= self.bits_total() {
                    return Ok(None);
                }
            }
            let start = self.bit_pos;
            let id = self.read(self.abbrev_width())?;
            match id {
                END_BLOCK => {
                    self.align32();
                    let scope = self.scopes.pop().ok_or_else(|| {
                        BitstreamError::Malformed("END_BLOCK at top level".to_string())
                    })?;
                    if self.bit_pos != scope.end_bit {
                        return Err(BitstreamError::Malformed(
                            "block length mismatch".to_string(),
                        ));
                    }
                    return Ok(Some(Event::Exit));
                }
                ENTER_SUBBLOCK => {
                    let block_id = self.read_vbr(8)? as u32;
                    if block_id == super::abi::block::BLOCKINFO {
                        let peek = {
                            // Length word is read inside read_blockinfo; compute
                            // the end from it afterwards is not possible, so
                            // pre-read it here instead.
                            let save = self.bit_pos;
                            let _width = self.read_vbr(4)?;
                            self.align32();
                            let len = self.read(32)?;
                            let end = self.bit_pos + len * 32;
                            self.bit_pos = save;
                            end
                        };
                        self.read_blockinfo(peek)?;
                        continue;
                    }
                    let abbrev_width = self.read_vbr(4)? as u32;
                    if abbrev_width == 0 {
                        return Err(BitstreamError::Malformed(
                            "zero abbreviation width".to_string(),
                        ));
                    }
                    self.align32();
                    let len = self.read(32)?;
                    let end_bit = self.bit_pos + len * 32;
                    if end_bit > self.bits_total() {
                        return Err(BitstreamError::Truncated(self.bit_pos));
                    }
                    let abbrevs = self.blockinfo.get(&block_id).cloned().unwrap_or_default();
                    self.scopes.push(Scope { abbrev_width, abbrevs, end_bit });
                    return Ok(Some(Event::Enter { block_id }));
                }
                DEFINE_ABBREV => {
                    let abbrev = self.read_abbrev_def()?;
                    let scope = self.scopes.last_mut().ok_or_else(|| {
                        BitstreamError::Malformed("DEFINE_ABBREV at top level".to_string())
                    })?;
                    scope.abbrevs.push(abbrev);
                }
                UNABBREV_RECORD => {
                    let code = self.read_vbr(6)? as u32;
                    let num = self.read_vbr(6)?;
                    let mut values = Vec::with_capacity(num as usize);
                    for _ in 0..num {
                        values.push(self.read_vbr(6)?);
                    }
                    return Ok(Some(Event::Record(Record { code, values, bit_offset: start })));
                }
                abbrev_id => {
                    let index = (abbrev_id - FIRST_APPLICATION_ABBREV) as usize;
                    let record = self.read_abbreviated_record(index, start)?;
                    return Ok(Some(Event::Record(record)));
                }
            }
        }
    }

    fn skip_block(&mut self) -> Result<(), BitstreamError> {
        let scope = self.scopes.pop().ok_or_else(|| {
            BitstreamError::Malformed("skip_block outside a block".to_string())
        })?;
        self.bit_pos = scope.end_bit;
        Ok(())
    }

    fn header_size(&self) -> usize {
        self.header_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bit-granular writer mirroring the reader, for test inputs only.
    struct BitWriter {
        bytes: Vec<u8>,
        bit: u32,
    }

    impl BitWriter {
        fn new() -> Self {
            Self { bytes: Vec::new(), bit: 0 }
        }

        fn write(&mut self, value: u64, nbits: u32) {
            for i in 0..nbits {
                if self.bit == 0 {
                    self.bytes.push(0);
                }
                if (value >> i) & 1 != 0 {
                    *self.bytes.last_mut().unwrap() |= 1 << self.bit;
                }
                self.bit = (self.bit + 1) % 8;
            }
        }

        fn write_vbr(&mut self, mut value: u64, nbits: u32) {
            let hi = 1u64 << (nbits - 1);
            loop {
                let piece = value & (hi - 1);
                value >>= nbits - 1;
                if value != 0 {
                    self.write(piece | hi, nbits);
                } else {
                    self.write(piece, nbits);
                    return;
                }
            }
        }

        fn align32(&mut self) {
            while self.bytes.len() % 4 != 0 || self.bit != 0 {
                self.write(0, 1);
            }
        }
    }

    fn build_pexe(body: impl FnOnce(&mut BitWriter)) -> Vec<u8> {
        let mut out = b"PEXE\x00\x00\x00\x00".to_vec();
        let mut w = BitWriter::new();
        body(&mut w);
        w.align32();
        out.extend_from_slice(&w.bytes);
        out
    }

    /// Write an ENTER_SUBBLOCK with a placeholder length, returning the byte
    /// position of the length word so it can be patched.
    fn enter_block(w: &mut BitWriter, abbrev_width: u32, block_id: u64, outer_width: u32) -> usize {
        w.write(ENTER_SUBBLOCK, outer_width);
        w.write_vbr(block_id, 8);
        w.write_vbr(abbrev_width as u64, 4);
        w.align32();
        let pos = w.bytes.len();
        w.write(0, 32);
        pos
    }

    fn end_block(w: &mut BitWriter, abbrev_width: u32, len_pos: usize) {
        w.write(END_BLOCK, abbrev_width);
        w.align32();
        let words = ((w.bytes.len() - len_pos - 4) / 4) as u32;
        w.bytes[len_pos..len_pos + 4].copy_from_slice(&words.to_le_bytes());
    }

    fn unabbrev_record(w: &mut BitWriter, abbrev_width: u32, code: u64, values: &[u64]) {
        w.write(UNABBREV_RECORD, abbrev_width);
        w.write_vbr(code, 6);
        w.write_vbr(values.len() as u64, 6);
        for &v in values {
            w.write_vbr(v, 6);
        }
    }

    #[test]
    fn test_rejects_bad_magic() {
        assert!(matches!(PexeReader::new(b"EXEP\x00\x00\x00\x00"), Err(BitstreamError::BadMagic)));
    }

    #[test]
    fn test_rejects_unaligned_input() {
        assert!(matches!(
            PexeReader::new(b"PEXE\x00\x00\x00\x00\x01"),
            Err(BitstreamError::NotWordAligned)
        ));
    }

    #[test]
    fn test_reads_nested_blocks_and_records() {
        let data = build_pexe(|w| {
            let module = enter_block(w, 3, 8, INITIAL_ABBREV_WIDTH);
            unabbrev_record(w, 3, 1, &[1]);
            let types = enter_block(w, 3, 17, 3);
            unabbrev_record(w, 3, 1, &[2]);
            unabbrev_record(w, 3, 7, &[32]);
            end_block(w, 3, types);
            end_block(w, 3, module);
        });
        let mut reader = PexeReader::new(&data).unwrap();
        assert!(matches!(reader.next_event().unwrap(), Some(Event::Enter { block_id: 8 })));
        match reader.next_event().unwrap() {
            Some(Event::Record(r)) => {
                assert_eq!(r.code, 1);
                assert_eq!(r.values, vec![1]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(reader.next_event().unwrap(), Some(Event::Enter { block_id: 17 })));
        match reader.next_event().unwrap() {
            Some(Event::Record(r)) => assert_eq!(r.code, 1),
            other => panic!("unexpected {other:?}"),
        }
        match reader.next_event().unwrap() {
            Some(Event::Record(r)) => {
                assert_eq!(r.code, 7);
                assert_eq!(r.values, vec![32]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(reader.next_event().unwrap(), Some(Event::Exit)));
        assert!(matches!(reader.next_event().unwrap(), Some(Event::Exit)));
        assert!(reader.next_event().unwrap().is_none());
    }

    #[test]
    fn test_skip_block() {
        let data = build_pexe(|w| {
            let module = enter_block(w, 3, 8, INITIAL_ABBREV_WIDTH);
            let unknown = enter_block(w, 4, 99, 3);
            unabbrev_record(w, 4, 5, &[1, 2, 3]);
            end_block(w, 4, unknown);
            unabbrev_record(w, 3, 1, &[1]);
            end_block(w, 3, module);
        });
        let mut reader = PexeReader::new(&data).unwrap();
        assert!(matches!(reader.next_event().unwrap(), Some(Event::Enter { block_id: 8 })));
        assert!(matches!(reader.next_event().unwrap(), Some(Event::Enter { block_id: 99 })));
        reader.skip_block().unwrap();
        match reader.next_event().unwrap() {
            Some(Event::Record(r)) => assert_eq!(r.code, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_abbreviated_record() {
        let data = build_pexe(|w| {
            let module = enter_block(w, 3, 8, INITIAL_ABBREV_WIDTH);
            // define abbrev: literal code 7, vbr6 operand, fixed(2) operand
            w.write(DEFINE_ABBREV, 3);
            w.write_vbr(3, 5);
            w.write(1, 1); // literal
            w.write_vbr(7, 8);
            w.write(0, 1); // encoded
            w.write(2, 3); // vbr
            w.write_vbr(6, 5);
            w.write(0, 1); // encoded
            w.write(1, 3); // fixed
            w.write_vbr(2, 5);
            // use abbrev 4
            w.write(4, 3);
            w.write_vbr(45, 6);
            w.write(2, 2);
            end_block(w, 3, module);
        });
        let mut reader = PexeReader::new(&data).unwrap();
        assert!(matches!(reader.next_event().unwrap(), Some(Event::Enter { block_id: 8 })));
        match reader.next_event().unwrap() {
            Some(Event::Record(r)) => {
                assert_eq!(r.code, 7);
                assert_eq!(r.values, vec![45, 2]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_blockinfo_registers_abbrevs() {
        let data = build_pexe(|w| {
            let module = enter_block(w, 3, 8, INITIAL_ABBREV_WIDTH);
            // blockinfo defining an abbrev for block 17: literal 2 (VOID)
            let info = enter_block(w, 3, 0, 3);
            unabbrev_record(w, 3, BLOCKINFO_CODE_SETBID as u64, &[17]);
            w.write(DEFINE_ABBREV, 3);
            w.write_vbr(1, 5);
            w.write(1, 1);
            w.write_vbr(2, 8);
            end_block(w, 3, info);
            // types block using abbrev 4 from blockinfo
            let types = enter_block(w, 3, 17, 3);
            w.write(4, 3);
            end_block(w, 3, types);
            end_block(w, 3, module);
        });
        let mut reader = PexeReader::new(&data).unwrap();
        assert!(matches!(reader.next_event().unwrap(), Some(Event::Enter { block_id: 8 })));
        assert!(matches!(reader.next_event().unwrap(), Some(Event::Enter { block_id: 17 })));
        match reader.next_event().unwrap() {
            Some(Event::Record(r)) => {
                assert_eq!(r.code, 2);
                assert!(r.values.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
