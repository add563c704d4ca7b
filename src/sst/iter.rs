//! Two-level table iterator: an index-block iterator steering a data-block
//! iterator.

use crate::sst::block::BlockIter;
use crate::sst::{BlockHandle, SstError, SstReader};

pub struct SstIter<'a> {
    reader: &'a SstReader,
    index_iter: BlockIter,
    data_iter: Option<BlockIter>,
}

impl<'a> SstIter<'a> {
    pub(crate) fn new(reader: &'a SstReader) -> Result<Self, SstError> {
        let index_iter = BlockIter::new(reader.index_block(), reader.comparator())?;
        Ok(Self {
            reader,
            index_iter,
            data_iter: None,
        })
    }

    /// Positions the iterator at the first entry whose key is `>= target`.
    ///
    /// The index is seeked to the first block whose last key is `>= target`;
    /// the search then continues inside that block.
    pub fn seek(&mut self, target: &[u8]) -> Result<bool, SstError> {
        self.data_iter = None;
        if !self.index_iter.seek(target)? {
            return Ok(false);
        }
        let mut data_iter = self.open_data_block()?;
        let found = data_iter.seek(target)?;
        self.data_iter = Some(data_iter);
        Ok(found)
    }

    /// Advances to the next entry, crossing into the next data block as
    /// needed. Returns `false` at end of table.
    pub fn next(&mut self) -> Result<bool, SstError> {
        loop {
            if let Some(data_iter) = &mut self.data_iter {
                if data_iter.next()? {
                    return Ok(true);
                }
            }
            if !self.index_iter.next()? {
                self.data_iter = None;
                return Ok(false);
            }
            self.data_iter = Some(self.open_data_block()?);
        }
    }

    pub fn key(&self) -> &[u8] {
        self.data_iter.as_ref().map_or(&[], BlockIter::key)
    }

    pub fn value(&self) -> &[u8] {
        self.data_iter.as_ref().map_or(&[], BlockIter::value)
    }

    /// Opens the data block the index iterator currently points at.
    fn open_data_block(&self) -> Result<BlockIter, SstError> {
        let (handle, _) = BlockHandle::decode(self.index_iter.value())?;
        let block = self.reader.read_block(handle)?;
        BlockIter::new(block, self.reader.comparator())
    }
}
