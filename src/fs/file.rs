//! Regular-file payload operations.

use crate::error::FsError;
use crate::fs::inode::InodeHeader;
use crate::storage::Stream;

/// Byte-addressable payload over an authenticated stream.
///
/// The header's `size` field, not the stream length, is the authoritative
/// end-of-file; the two agree after every successful operation.
pub(crate) struct RegularFile {
    stream: Box<dyn Stream>,
}

impl RegularFile {
    pub(crate) fn new(stream: Box<dyn Stream>) -> Self {
        Self { stream }
    }

    /// Read up to `buf.len()` bytes at `offset`. Returns 0 at or past EOF;
    /// short reads happen only at EOF.
    pub(crate) fn read(
        &mut self,
        header: &InodeHeader,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize, FsError> {
        let size = header.size();
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let available = usize::try_from(size - offset).unwrap_or(usize::MAX);
        let wanted = buf.len().min(available);
        self.stream.read_at(&mut buf[..wanted], offset)
    }

    /// Write `buf` at `offset`, extending the file and zero-filling any hole
    /// between the old EOF and `offset`.
    pub(crate) fn write(
        &mut self,
        header: &mut InodeHeader,
        buf: &[u8],
        offset: u64,
    ) -> Result<(), FsError> {
        let size = header.size();
        if offset > size {
            // resize() zero-fills the gap [size, offset).
            self.stream.resize(offset)?;
        }
        self.stream.write_at(buf, offset)?;
        let end = offset + buf.len() as u64;
        if end > size {
            header.set_size(end);
        }
        Ok(())
    }

    /// Grow with zero bytes or shrink, discarding the tail.
    pub(crate) fn truncate(
        &mut self,
        header: &mut InodeHeader,
        new_size: u64,
    ) -> Result<(), FsError> {
        self.stream.resize(new_size)?;
        header.set_size(new_size);
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<(), FsError> {
        self.stream.flush()
    }
}
