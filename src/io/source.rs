use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::{BUFFER_SIZE, DataSink, LocalFileReader, MemoryReader, MmapReader, ReadAt};
use crate::error::{Error, Result};

/// Largest range [`DataSource::get_byte_buffer`] will materialize.
const MAX_BYTE_BUFFER_SIZE: u64 = i32::MAX as u64;

/// An immutable, sliceable view over a range of a [`ReadAt`] store.
///
/// A `DataSource` is a plain `(store, offset, size)` value: cloning or
/// slicing it shares the store and copies no data, and since it carries no
/// cursor, independent callers may use slices of one store concurrently.
#[derive(Clone)]
pub struct DataSource {
    base: Arc<dyn ReadAt>,
    offset: u64,
    size: u64,
}

impl DataSource {
    /// View the whole of `base`.
    pub fn new(base: impl ReadAt + 'static) -> Self {
        let size = base.size();
        Self {
            base: Arc::new(base),
            offset: 0,
            size,
        }
    }

    /// View an in-memory buffer.
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(MemoryReader::new(data))
    }

    /// View a file through positional reads.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(LocalFileReader::new(path)?))
    }

    /// View a file through a read-only memory map.
    pub fn map(path: &Path) -> Result<Self> {
        Ok(Self::new(MmapReader::new(path)?))
    }

    /// Number of bytes visible through this view.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Validate `offset..offset + size` against this view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if the range does not fit, including when
    /// `offset + size` overflows.
    fn check_range(&self, offset: u64, size: u64) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::Range {
                offset,
                size,
                source_size: self.size,
            }),
        }
    }

    /// A view of `size` bytes starting at `offset`. No data is copied.
    pub fn slice(&self, offset: u64, size: u64) -> Result<DataSource> {
        self.check_range(offset, size)?;
        Ok(DataSource {
            base: Arc::clone(&self.base),
            offset: self.offset + offset,
            size,
        })
    }

    /// Stream `size` bytes starting at `offset` into `sink`.
    ///
    /// Data is moved in chunks of at most [`BUFFER_SIZE`] bytes, so the range
    /// never has to fit in memory at once. Contiguous backings are handed to
    /// the sink directly without an intermediate copy.
    pub fn feed(&self, offset: u64, size: u64, sink: &mut dyn DataSink) -> Result<()> {
        self.check_range(offset, size)?;
        if size == 0 {
            return Ok(());
        }

        let start = self.offset + offset;
        if let Some(bytes) = self.base.as_slice() {
            let (start, end) = (start as usize, (start + size) as usize);
            let region = bytes.get(start..end).ok_or_else(|| short_read(start as u64))?;
            for chunk in region.chunks(BUFFER_SIZE) {
                sink.consume(chunk)?;
            }
            return Ok(());
        }

        let mut buf = vec![0u8; BUFFER_SIZE.min(size as usize)];
        let mut done = 0u64;
        while done < size {
            let len = (size - done).min(buf.len() as u64) as usize;
            self.read_exact_at(start + done, &mut buf[..len])?;
            sink.consume(&buf[..len])?;
            done += len as u64;
        }
        Ok(())
    }

    /// Fill `buf` with the bytes starting at `offset`.
    pub fn copy_to(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len() as u64)?;
        self.read_exact_at(self.offset + offset, buf)
    }

    /// Materialize `size` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if the range is out of bounds or larger than
    /// a single buffer may be (`i32::MAX` bytes).
    pub fn get_byte_buffer(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        self.check_range(offset, size)?;
        if size > MAX_BYTE_BUFFER_SIZE {
            return Err(Error::Range {
                offset,
                size,
                source_size: self.size,
            });
        }

        let mut buf = vec![0u8; size as usize];
        self.read_exact_at(self.offset + offset, &mut buf)?;
        Ok(buf)
    }

    /// Read the whole view into memory.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.get_byte_buffer(0, self.size)
    }

    /// Absolute read against the backing store; bounds already checked.
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.base.read_at(offset, buf)?;
            if n == 0 {
                return Err(short_read(offset));
            }
            buf = &mut buf[n..];
            offset += n as u64;
        }
        Ok(())
    }
}

fn short_read(offset: u64) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("backing store ended early at offset {offset}"),
    ))
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}
