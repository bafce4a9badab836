use super::ReadAt;
use std::sync::Arc;

/// In-memory backing store, shareable across threads and slices.
#[derive(Clone)]
pub struct MemoryReader {
    data: Arc<[u8]>,
}

impl MemoryReader {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl ReadAt for MemoryReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let start = self.data.len().min(offset.min(usize::MAX as u64) as usize);
        let data = &self.data[start..];
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn as_slice(&self) -> Option<&[u8]> {
        Some(&self.data)
    }
}
