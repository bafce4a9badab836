use super::ReadAt;
use std::fs::File;
use std::path::Path;

/// Local file reader with random access support
///
/// On Unix reads are positional (`pread`) and never touch the shared file
/// cursor. Elsewhere the cursor is guarded by a mutex held only for the
/// seek+read pair, so concurrent readers never observe a torn position.
pub struct LocalFileReader {
    #[cfg(unix)]
    file: File,
    #[cfg(not(unix))]
    file: std::sync::Mutex<File>,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> std::io::Result<Self> {
        Self::from_file(File::open(path)?)
    }

    /// Wrap an already open file. The size is captured now; bytes appended
    /// later are not visible through this reader.
    pub fn from_file(file: File) -> std::io::Result<Self> {
        let size = file.metadata()?.len();

        #[cfg(not(unix))]
        let file = std::sync::Mutex::new(file);

        Ok(Self { file, size })
    }
}

impl ReadAt for LocalFileReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let available = (self.size - offset).min(buf.len() as u64) as usize;
        let buf = &mut buf[..available];

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, offset)
        }

        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = self
                .file
                .lock()
                .map_err(|_| std::io::Error::other("file reader lock poisoned"))?;
            file.seek(SeekFrom::Start(offset))?;
            file.read(buf)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}
