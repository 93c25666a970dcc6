//! Symlink payload operations.

use crate::error::FsError;
use crate::fs::inode::InodeHeader;
use crate::storage::Stream;

/// A symlink stores one UTF-8 target path as its whole payload; `size` is
/// the byte length of the target.
pub(crate) struct Symlink {
    stream: Box<dyn Stream>,
}

impl Symlink {
    pub(crate) fn new(stream: Box<dyn Stream>) -> Self {
        Self { stream }
    }

    /// Replace the stored target.
    pub(crate) fn set(&mut self, header: &mut InodeHeader, target: &str) -> Result<(), FsError> {
        self.stream.resize(0)?;
        self.stream.write_at(target.as_bytes(), 0)?;
        header.set_size(target.len() as u64);
        Ok(())
    }

    /// Read the full target back.
    pub(crate) fn target(&mut self, header: &InodeHeader) -> Result<String, FsError> {
        let len = usize::try_from(header.size())
            .map_err(|_| FsError::Corrupted("symlink target length overflows memory".to_owned()))?;
        let mut buf = vec![0u8; len];
        let n = self.stream.read_at(&mut buf, 0)?;
        if n != len {
            return Err(FsError::Corrupted(format!(
                "symlink payload truncated: {n} of {len} bytes"
            )));
        }
        String::from_utf8(buf)
            .map_err(|_| FsError::Corrupted("symlink target is not UTF-8".to_owned()))
    }

    pub(crate) fn flush(&mut self) -> Result<(), FsError> {
        self.stream.flush()
    }
}
