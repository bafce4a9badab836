use super::ReadAt;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Read-only memory-mapped file.
///
/// The map is immutable once created, so any number of [`DataSource`]
/// slices can read it concurrently without locking.
///
/// [`DataSource`]: super::DataSource
pub struct MmapReader {
    mmap: Mmap,
}

impl MmapReader {
    pub fn new(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: Read-only access; the input archive is not modified while mapped.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }
}

impl ReadAt for MmapReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let start = self.mmap.len().min(offset.min(usize::MAX as u64) as usize);
        let data = &self.mmap[start..];
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn as_slice(&self) -> Option<&[u8]> {
        Some(&self.mmap)
    }
}
