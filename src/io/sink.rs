use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{BUFFER_SIZE, DataSource, LocalFileReader};
use crate::error::Result;

/// Append-only consumer of bytes.
///
/// Callers guarantee writes are sequential and non-overlapping. Every
/// [`std::io::Write`] is a `DataSink`.
pub trait DataSink {
    fn consume(&mut self, data: &[u8]) -> std::io::Result<()>;
}

impl<W: Write + ?Sized> DataSink for W {
    fn consume(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.write_all(data)
    }
}

/// A sink whose output so far can be read back.
///
/// The signing engine computes signatures over the already written part of
/// the output archive, so the rewriter needs both halves of the same store.
pub trait ReadableDataSink: DataSink {
    /// Snapshot of every byte consumed so far.
    fn as_data_source(&mut self) -> Result<DataSource>;

    /// Number of bytes consumed so far.
    fn position(&self) -> u64;
}

/// Growable in-memory output archive.
#[derive(Debug, Default)]
pub struct MemorySink {
    data: Vec<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ReadableDataSink for MemorySink {
    fn as_data_source(&mut self) -> Result<DataSource> {
        Ok(DataSource::from_bytes(self.data.clone()))
    }

    fn position(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Buffered output file that can be read back while it is being written.
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    written: u64,
}

impl FileSink {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            writer: BufWriter::with_capacity(BUFFER_SIZE, file),
            path: path.to_path_buf(),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered data and sync it to disk.
    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl ReadableDataSink for FileSink {
    fn as_data_source(&mut self) -> Result<DataSource> {
        // Buffered bytes must reach the file before the reader sizes it. A
        // separate handle keeps reads off the writer's cursor.
        self.writer.flush()?;
        Ok(DataSource::new(LocalFileReader::new(&self.path)?))
    }

    fn position(&self) -> u64 {
        self.written
    }
}
