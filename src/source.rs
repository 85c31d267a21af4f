use std::fs::File;
use std::path::Path;

use memmap::Mmap;

use crate::errors::{HprofError, Result};

/// Read-only random-access window over the dump bytes.
///
/// Either a file-backed mapping or an in-memory buffer. Closing the source
/// invalidates every view derived from it; reads issued afterwards fail with
/// [`HprofError::ClosedSource`].
pub enum ByteSource {
    Mapped(Mmap),
    Buffer(Vec<u8>),
    Closed,
}

impl ByteSource {
    pub fn map_file(path: &Path) -> Result<ByteSource> {
        let file = File::open(path)?;
        // Safety: the mapping is read-only and the dump file is not expected
        // to change underneath us while it is open.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(ByteSource::Mapped(mmap))
    }

    pub fn from_vec(data: Vec<u8>) -> ByteSource {
        ByteSource::Buffer(data)
    }

    pub fn bytes(&self) -> Result<&[u8]> {
        match self {
            ByteSource::Mapped(mmap) => Ok(&mmap[..]),
            ByteSource::Buffer(data) => Ok(data),
            ByteSource::Closed => Err(HprofError::ClosedSource),
        }
    }

    pub fn len(&self) -> Result<usize> {
        self.bytes().map(<[u8]>::len)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.bytes().map(<[u8]>::is_empty)
    }

    /// Borrows `len` bytes starting at `start`.
    pub fn read(&self, start: usize, len: usize) -> Result<&[u8]> {
        let data = self.bytes()?;
        let end = start.checked_add(len).ok_or_else(|| {
            HprofError::OutOfBounds(format!("read of {len} bytes at {start:#x} overflows"))
        })?;
        data.get(start..end).ok_or_else(|| {
            HprofError::OutOfBounds(format!(
                "tried to read bytes {start:#x}..{end:#x}, but source size is {:#x}",
                data.len()
            ))
        })
    }

    /// Borrows the bytes from `start` up to (not including) the next NUL.
    pub fn read_until_nul(&self, start: usize) -> Result<&[u8]> {
        let data = self.bytes()?;
        let tail = data.get(start..).ok_or_else(|| {
            HprofError::OutOfBounds(format!(
                "tried to read at {start:#x}, but source size is {:#x}",
                data.len()
            ))
        })?;
        match tail.iter().position(|b| *b == 0) {
            Some(nul) => Ok(&tail[..nul]),
            None => Err(HprofError::OutOfBounds(format!(
                "no NUL terminator between {start:#x} and end of source"
            ))),
        }
    }

    pub fn close(&mut self) {
        *self = ByteSource::Closed;
    }
}
