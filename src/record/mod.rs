//! Framed append-only record log.
//!
//! The log is a sequence of 32 KiB physical blocks. Each block holds chunks:
//!
//! ```text
//! crc32(4, LE) | length(2, LE) | type(1) | payload(length)
//! ```
//!
//! A record is one `full` chunk or a `first`..`middle`..`last` run. When the
//! space left in a block cannot hold a chunk header the remainder is
//! zero-padded and the next chunk starts at the next block boundary; a zero
//! type byte therefore means "skip to the next block".
//!
//! The reader drops a partial record whose chunk fails its checksum or
//! arrives out of sequence and resynchronises at the next block boundary, so
//! a corrupt block costs only the records that touch it.

use std::io::{self, Read, Write};

/// Physical block size of the log.
pub const BLOCK_SIZE: usize = 32 * 1024;

const HEADER_SIZE: usize = 7;

const FULL_CHUNK: u8 = 1;
const FIRST_CHUNK: u8 = 2;
const MIDDLE_CHUNK: u8 = 3;
const LAST_CHUNK: u8 = 4;

#[derive(Debug)]
pub struct RecordWriter<W: Write> {
    w: W,
    buf: Box<[u8; BLOCK_SIZE]>,
    offset: usize,
    flushed: usize,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            buf: Box::new([0u8; BLOCK_SIZE]),
            offset: 0,
            flushed: 0,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.w
    }

    /// Appends one record, splitting it into chunks across block boundaries
    /// as needed. The record is buffered; call [`flush`](Self::flush) to push
    /// it to the underlying sink.
    pub fn write_record(&mut self, mut data: &[u8]) -> io::Result<()> {
        let mut chunks = 0;
        loop {
            if BLOCK_SIZE - self.offset < HEADER_SIZE {
                self.finish_block()?;
                continue;
            }
            let room = BLOCK_SIZE - self.offset - HEADER_SIZE;
            if room >= data.len() {
                let kind = if chunks > 0 { LAST_CHUNK } else { FULL_CHUNK };
                self.put_chunk(data, kind);
                return Ok(());
            }
            let kind = if chunks == 0 { FIRST_CHUNK } else { MIDDLE_CHUNK };
            self.put_chunk(&data[..room], kind);
            data = &data[room..];
            self.finish_block()?;
            chunks += 1;
        }
    }

    /// Pushes buffered bytes up to the current offset to the sink. Flushing
    /// mid-block is fine; later chunks continue filling the same block.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.offset > self.flushed {
            self.w.write_all(&self.buf[self.flushed..self.offset])?;
            self.flushed = self.offset;
        }
        self.w.flush()
    }

    fn put_chunk(&mut self, data: &[u8], kind: u8) {
        debug_assert!(data.len() <= u16::MAX as usize);
        let crc = crc32c::crc32c(data);
        let at = self.offset;
        self.buf[at..at + 4].copy_from_slice(&crc.to_le_bytes());
        self.buf[at + 4..at + 6].copy_from_slice(&(data.len() as u16).to_le_bytes());
        self.buf[at + 6] = kind;
        self.buf[at + HEADER_SIZE..at + HEADER_SIZE + data.len()].copy_from_slice(data);
        self.offset += HEADER_SIZE + data.len();
    }

    fn finish_block(&mut self) -> io::Result<()> {
        self.buf[self.offset..].fill(0);
        self.offset = BLOCK_SIZE;
        self.flush()?;
        self.offset = 0;
        self.flushed = 0;
        Ok(())
    }
}

pub struct RecordReader<R: Read> {
    r: R,
    buf: Box<[u8; BLOCK_SIZE]>,
    offset: usize,
    size: usize,
}

impl<R: Read> RecordReader<R> {
    pub fn new(r: R) -> Self {
        Self {
            r,
            buf: Box::new([0u8; BLOCK_SIZE]),
            offset: 0,
            size: 0,
        }
    }

    /// Reads the next record, or `None` at end of log. A record whose chunks
    /// fail validation is dropped; reading resumes at the next block boundary
    /// when the chunk length cannot be trusted, or at the next chunk when it
    /// can.
    pub fn read_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut data = Vec::new();
        let mut in_record = false;
        loop {
            if self.size - self.offset < HEADER_SIZE || self.buf[self.offset + 6] == 0 {
                if !self.next_block()? {
                    // A first/middle run without its last chunk is a
                    // truncated tail; drop it.
                    return Ok(None);
                }
                continue;
            }

            let at = self.offset;
            let expected_crc = u32::from_le_bytes(self.buf[at..at + 4].try_into().unwrap());
            let len = u16::from_le_bytes(self.buf[at + 4..at + 6].try_into().unwrap()) as usize;
            let kind = self.buf[at + 6];

            // A chunk that claims to extend past its block, or one whose
            // checksum fails, leaves nothing trustworthy to skip by.
            let chunk_end = at + HEADER_SIZE + len;
            if chunk_end > self.size
                || crc32c::crc32c(&self.buf[at + HEADER_SIZE..chunk_end]) != expected_crc
            {
                tracing::warn!(offset = at, "corrupt record chunk, resyncing at next block");
                data.clear();
                in_record = false;
                if !self.next_block()? {
                    return Ok(None);
                }
                continue;
            }

            // The chunk itself is sound but continues a record whose earlier
            // chunks were lost (or starts mid-run). Skip just this chunk.
            let in_sequence = if in_record {
                kind == MIDDLE_CHUNK || kind == LAST_CHUNK
            } else {
                kind == FULL_CHUNK || kind == FIRST_CHUNK
            };
            if !in_sequence {
                tracing::warn!(offset = at, kind, "record chunk out of sequence, skipping");
                data.clear();
                in_record = false;
                self.offset = chunk_end;
                continue;
            }

            data.extend_from_slice(&self.buf[at + HEADER_SIZE..chunk_end]);
            self.offset = chunk_end;
            match kind {
                FULL_CHUNK | LAST_CHUNK => return Ok(Some(data)),
                _ => in_record = true,
            }
        }
    }

    fn next_block(&mut self) -> io::Result<bool> {
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let n = self.r.read(&mut self.buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.offset = 0;
        self.size = filled;
        Ok(filled > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn write_all(records: &[Vec<u8>]) -> Vec<u8> {
        let mut sink = Vec::new();
        let mut writer = RecordWriter::new(&mut sink);
        for r in records {
            writer.write_record(r).unwrap();
        }
        writer.flush().unwrap();
        drop(writer);
        sink
    }

    fn read_all(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut reader = RecordReader::new(bytes);
        let mut out = Vec::new();
        while let Some(record) = reader.read_record().unwrap() {
            out.push(record);
        }
        out
    }

    #[test]
    fn round_trip_small_records() {
        let records = vec![b"one".to_vec(), b"two".to_vec(), Vec::new(), b"four".to_vec()];
        assert_eq!(read_all(&write_all(&records)), records);
    }

    #[test]
    fn record_spanning_multiple_blocks() {
        let big = vec![0xabu8; 3 * BLOCK_SIZE + 100];
        let records = vec![b"head".to_vec(), big.clone(), b"tail".to_vec()];
        let bytes = write_all(&records);
        assert!(bytes.len() > 3 * BLOCK_SIZE);
        assert_eq!(read_all(&bytes), records);
    }

    #[test]
    fn short_block_tail_is_padded() {
        // Leave fewer than seven bytes at the end of the first block so the
        // second record must start at the next boundary.
        let first = vec![1u8; BLOCK_SIZE - HEADER_SIZE - 3];
        let records = vec![first, b"second".to_vec()];
        let bytes = write_all(&records);
        assert_eq!(&bytes[BLOCK_SIZE - 3..BLOCK_SIZE], &[0, 0, 0]);
        assert_eq!(read_all(&bytes), records);
    }

    #[test]
    fn corruption_is_contained_to_its_block() {
        let records: Vec<Vec<u8>> = (0..200)
            .map(|i| format!("record-{i:04}-{}", "x".repeat(700)).into_bytes())
            .collect();
        let mut bytes = write_all(&records);
        assert!(bytes.len() > 3 * BLOCK_SIZE);

        // Flip one payload byte in the second block.
        bytes[BLOCK_SIZE + 600] ^= 0xff;

        let read = read_all(&bytes);
        assert!(read.len() < records.len());

        // Records living entirely in the first block are untouched.
        for r in &records[..40] {
            assert!(read.contains(r));
        }
        // Records in blocks after the corrupt one are all recovered.
        for r in &records[100..] {
            assert!(read.contains(r));
        }
        // What was read is a subsequence of what was written.
        let mut remaining = records.iter();
        for got in &read {
            assert!(remaining.any(|r| r == got));
        }
    }

    #[test]
    fn truncated_tail_record_is_dropped() {
        let records = vec![b"keep".to_vec(), vec![7u8; 2 * BLOCK_SIZE]];
        let mut bytes = write_all(&records);
        bytes.truncate(BLOCK_SIZE + 100);
        let read = read_all(&bytes);
        assert_eq!(read, vec![b"keep".to_vec()]);
    }

    proptest! {
        #[test]
        fn round_trip_arbitrary_records(
            records in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..4096), 0..64)
        ) {
            prop_assert_eq!(read_all(&write_all(&records)), records);
        }
    }
}
