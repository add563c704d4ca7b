//! Write-ahead log.
//!
//! Every mutation is appended here, through the shared record framing,
//! before it reaches the memtable:
//!
//! ```text
//! kind(1) | varint(seqno) | varint(key_len) | key | varint(value_len) | value
//! ```
//!
//! Recovery rebuilds state from the manifest and tables; the log is written
//! for offline inspection and future replay, not read back at open.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use crate::internal_key::KeyKind;
use crate::record::RecordWriter;
use crate::varint::put_uvarint;

#[derive(Debug)]
pub struct WalWriter {
    writer: RecordWriter<File>,
    buf: Vec<u8>,
}

impl WalWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)?;
        Ok(Self {
            writer: RecordWriter::new(file),
            buf: Vec::new(),
        })
    }

    pub fn append(
        &mut self,
        kind: KeyKind,
        seqno: u64,
        key: &[u8],
        value: &[u8],
    ) -> io::Result<()> {
        self.buf.clear();
        self.buf.push(kind as u8);
        put_uvarint(&mut self.buf, seqno);
        put_uvarint(&mut self.buf, key.len() as u64);
        self.buf.extend_from_slice(key);
        put_uvarint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(value);

        self.writer.write_record(&self.buf)?;
        self.writer.flush()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
