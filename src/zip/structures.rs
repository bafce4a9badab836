use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Error, Result};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// General purpose flag: CRC-32 and sizes follow the data in a data descriptor.
pub const GP_FLAG_DATA_DESCRIPTOR_USED: u16 = 0x0008;
/// General purpose flag: name is UTF-8 encoded.
pub const GP_FLAG_EFS: u16 = 0x0800;

/// Version needed to extract DEFLATE entries (2.0).
pub const VERSION_DEFLATE: u16 = 20;

/// Marker stored in 16/32-bit fields that moved to ZIP64 records.
pub const ZIP64_MARKER_U16: u16 = 0xFFFF;
pub const ZIP64_MARKER_U32: u32 = 0xFFFF_FFFF;

/// Timestamp used for new entries when no input entry survives.
pub const DEFAULT_NEW_ENTRY_TIMESTAMP: DosDateTime = DosDateTime {
    // 2009-01-01 00:00:00
    date: 0x3a21,
    time: 0,
};

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: u32 = 0x0201_4b50;
pub const CDFH_MIN_SIZE: usize = 46;
pub(crate) const CDFH_GP_FLAGS_OFFSET: usize = 8;
pub(crate) const CDFH_LFH_OFFSET_OFFSET: usize = 42;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: u32 = 0x0403_4b50;
pub const LFH_SIZE: usize = 30;
pub(crate) const LFH_EXTRA_LENGTH_OFFSET: usize = 28;

/// Optional data descriptor following entry data.
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
pub const DATA_DESCRIPTOR_SIZE_WITHOUT_SIGNATURE: u64 = 12;

/// DOS timestamp pair as stored in ZIP headers.
///
/// Ordering compares the date first, then the time, which matches
/// chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl DosDateTime {
    /// Parse modification date to (year, month, day)
    pub fn ymd(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn hms(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: u32 = 0x0605_4b50;
    pub const SIZE: usize = 22;

    pub(crate) const DISK_ENTRIES_OFFSET: usize = 8;
    pub(crate) const TOTAL_ENTRIES_OFFSET: usize = 10;
    pub(crate) const CD_SIZE_OFFSET: usize = 12;
    pub(crate) const CD_OFFSET_OFFSET: usize = 16;
    pub(crate) const COMMENT_LENGTH_OFFSET: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::format(format!(
                "End of Central Directory too short: {} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        let signature = cursor.read_u32::<LittleEndian>()?;
        if signature != Self::SIGNATURE {
            return Err(Error::format(format!(
                "Not an End of Central Directory record. Signature: 0x{signature:08x}"
            )));
        }

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_MARKER_U16
            || self.total_entries == ZIP64_MARKER_U16
            || self.cd_size == ZIP64_MARKER_U32
            || self.cd_offset == ZIP64_MARKER_U32
    }

    /// Copy of `eocd` (record plus comment) describing a different
    /// Central Directory. Every other byte, comment included, is preserved.
    pub fn with_central_directory(
        eocd: &[u8],
        record_count: u16,
        cd_size: u32,
        cd_offset: u32,
    ) -> Vec<u8> {
        let mut out = eocd.to_vec();
        LittleEndian::write_u16(&mut out[Self::DISK_ENTRIES_OFFSET..], record_count);
        LittleEndian::write_u16(&mut out[Self::TOTAL_ENTRIES_OFFSET..], record_count);
        LittleEndian::write_u32(&mut out[Self::CD_SIZE_OFFSET..], cd_size);
        LittleEndian::write_u32(&mut out[Self::CD_OFFSET_OFFSET..], cd_offset);
        out
    }

    /// Rewrite the Central Directory offset field of `eocd` in place.
    pub fn set_central_directory_offset(eocd: &mut [u8], cd_offset: u32) {
        LittleEndian::write_u32(&mut eocd[Self::CD_OFFSET_OFFSET..], cd_offset);
    }

    /// Copy of `eocd` with `extra` zero bytes appended to its comment.
    pub fn with_comment_padding(eocd: &[u8], extra: usize) -> Result<Vec<u8>> {
        let comment_len =
            LittleEndian::read_u16(&eocd[Self::COMMENT_LENGTH_OFFSET..]) as usize + extra;
        let comment_len = u16::try_from(comment_len).map_err(|_| {
            Error::format(format!(
                "End of Central Directory comment would grow to {comment_len} bytes"
            ))
        })?;

        let mut out = Vec::with_capacity(eocd.len() + extra);
        out.extend_from_slice(eocd);
        out.resize(eocd.len() + extra, 0);
        LittleEndian::write_u16(&mut out[Self::COMMENT_LENGTH_OFFSET..], comment_len);
        Ok(out)
    }
}
