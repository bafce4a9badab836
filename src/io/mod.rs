//! Byte-range I/O.
//!
//! [`ReadAt`] is the random-access backing store (file, memory map or
//! buffer). [`DataSource`] is a sliceable view over one, and [`DataSink`] is
//! the append-only consumer the rewritten archive is streamed into.

mod local;
mod memory;
mod mmap;
mod sink;
mod source;

pub use local::LocalFileReader;
pub use memory::MemoryReader;
pub use mmap::MmapReader;
pub use sink::{DataSink, FileSink, MemorySink, ReadableDataSink};
pub use source::DataSource;

/// Chunk size used when streaming ranges between sources and sinks.
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Trait for random access reading from a backing store
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    ///
    /// Returns the number of bytes read, which may be less than `buf.len()`.
    /// Zero means end of data.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Get the total size of the backing store
    fn size(&self) -> u64;

    /// Contiguous view of the whole store, for backings that have one.
    fn as_slice(&self) -> Option<&[u8]> {
        None
    }
}
