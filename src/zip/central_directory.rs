//! Central Directory records.
//!
//! A record keeps the exact bytes it was parsed from, so entries the
//! rewriter does not touch are re-emitted byte for byte.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::borrow::Cow;
use std::collections::HashSet;

use super::locator::ZipSections;
use super::structures::*;
use crate::error::{Error, Result};

/// One Central Directory File Header with its name, extra field and comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryRecord {
    data: Vec<u8>,
    name: String,
    name_size: usize,
    gp_flags: u16,
    compression_method: u16,
    last_modified: DosDateTime,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    local_header_offset: u32,
}

impl CentralDirectoryRecord {
    /// Parse the record at the start of `buf`.
    ///
    /// # Returns
    ///
    /// The record and the number of bytes it occupies.
    ///
    /// # Errors
    ///
    /// Returns a format error on a bad signature or when the declared name,
    /// extra field or comment run past the end of `buf`. The error carries no
    /// location; [`parse_central_directory`] adds it.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < CDFH_MIN_SIZE {
            return Err(Error::format(format!(
                "Input too short. Need at least: {CDFH_MIN_SIZE} bytes, available: {} bytes",
                buf.len()
            )));
        }

        let signature = LittleEndian::read_u32(&buf[0..]);
        if signature != CDFH_SIGNATURE {
            return Err(Error::format(format!(
                "Not a Central Directory record. Signature: 0x{signature:08x}"
            )));
        }

        // Variable field lengths sit at fixed positions in the header.
        let name_size = LittleEndian::read_u16(&buf[28..]) as usize;
        let extra_size = LittleEndian::read_u16(&buf[30..]) as usize;
        let comment_size = LittleEndian::read_u16(&buf[32..]) as usize;
        let record_size = CDFH_MIN_SIZE + name_size + extra_size + comment_size;
        if record_size > buf.len() {
            return Err(Error::format(format!(
                "Input too short. Need: {record_size} bytes, available: {} bytes",
                buf.len()
            )));
        }

        let name_bytes = &buf[CDFH_MIN_SIZE..CDFH_MIN_SIZE + name_size];
        let record = Self {
            data: buf[..record_size].to_vec(),
            name: String::from_utf8_lossy(name_bytes).into_owned(),
            name_size,
            gp_flags: LittleEndian::read_u16(&buf[CDFH_GP_FLAGS_OFFSET..]),
            compression_method: LittleEndian::read_u16(&buf[10..]),
            last_modified: DosDateTime {
                time: LittleEndian::read_u16(&buf[12..]),
                date: LittleEndian::read_u16(&buf[14..]),
            },
            crc32: LittleEndian::read_u32(&buf[16..]),
            compressed_size: LittleEndian::read_u32(&buf[20..]),
            uncompressed_size: LittleEndian::read_u32(&buf[24..]),
            local_header_offset: LittleEndian::read_u32(&buf[CDFH_LFH_OFFSET_OFFSET..]),
        };
        Ok((record, record_size))
    }

    /// Record for a new DEFLATE-compressed entry with a UTF-8 name.
    pub fn new_deflated(
        name: &str,
        last_modified: DosDateTime,
        crc32: u32,
        compressed_size: u32,
        uncompressed_size: u32,
        local_header_offset: u32,
    ) -> Result<Self> {
        let name_size = u16::try_from(name.len())
            .map_err(|_| Error::format(format!("Entry name too long: {name}")))?;

        let mut data = Vec::with_capacity(CDFH_MIN_SIZE + name.len());
        data.write_u32::<LittleEndian>(CDFH_SIGNATURE)?;
        data.write_u16::<LittleEndian>(VERSION_DEFLATE)?; // Version made by
        data.write_u16::<LittleEndian>(VERSION_DEFLATE)?; // Version needed to extract
        data.write_u16::<LittleEndian>(GP_FLAG_EFS)?;
        data.write_u16::<LittleEndian>(CompressionMethod::Deflate.as_u16())?;
        data.write_u16::<LittleEndian>(last_modified.time)?;
        data.write_u16::<LittleEndian>(last_modified.date)?;
        data.write_u32::<LittleEndian>(crc32)?;
        data.write_u32::<LittleEndian>(compressed_size)?;
        data.write_u32::<LittleEndian>(uncompressed_size)?;
        data.write_u16::<LittleEndian>(name_size)?;
        data.write_u16::<LittleEndian>(0)?; // Extra field length
        data.write_u16::<LittleEndian>(0)?; // File comment length
        data.write_u16::<LittleEndian>(0)?; // Disk number
        data.write_u16::<LittleEndian>(0)?; // Internal attributes
        data.write_u32::<LittleEndian>(0)?; // External attributes
        data.write_u32::<LittleEndian>(local_header_offset)?;
        data.extend_from_slice(name.as_bytes());

        Ok(Self {
            data,
            name: name.to_string(),
            name_size: name.len(),
            gp_flags: GP_FLAG_EFS,
            compression_method: CompressionMethod::Deflate.as_u16(),
            last_modified,
            crc32,
            compressed_size,
            uncompressed_size,
            local_header_offset,
        })
    }

    /// This record pointing at a different Local File Header.
    ///
    /// Borrows `self` unchanged when the offset is the same, so untouched
    /// entries keep byte-identical records.
    pub fn with_local_header_offset(&self, offset: u32) -> Cow<'_, Self> {
        if offset == self.local_header_offset {
            return Cow::Borrowed(self);
        }
        let mut data = self.data.clone();
        LittleEndian::write_u32(&mut data[CDFH_LFH_OFFSET_OFFSET..], offset);
        Cow::Owned(Self {
            data,
            local_header_offset: offset,
            name: self.name.clone(),
            ..*self
        })
    }

    /// Append the record's bytes to `out`.
    pub fn copy_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.data);
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw name bytes as stored in the record.
    pub fn name_bytes(&self) -> &[u8] {
        &self.data[CDFH_MIN_SIZE..CDFH_MIN_SIZE + self.name_size]
    }

    pub fn gp_flags(&self) -> u16 {
        self.gp_flags
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.gp_flags & GP_FLAG_DATA_DESCRIPTOR_USED != 0
    }

    pub fn compression_method(&self) -> CompressionMethod {
        CompressionMethod::from_u16(self.compression_method)
    }

    pub fn last_modified(&self) -> DosDateTime {
        self.last_modified
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size as u64
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size as u64
    }

    pub fn local_header_offset(&self) -> u64 {
        self.local_header_offset as u64
    }
}

/// Parse every record of the Central Directory.
///
/// # Arguments
///
/// * `cd` - The Central Directory bytes
/// * `sections` - Where `cd` was read from, for the record count and offsets
///
/// # Errors
///
/// Returns [`Error::Format`] when a record is malformed (carrying its 1-based
/// index and file offset), when two records share a name, or when bytes are
/// left over after the declared number of records.
pub fn parse_central_directory(
    cd: &[u8],
    sections: &ZipSections,
) -> Result<Vec<CentralDirectoryRecord>> {
    let cd_offset = sections.central_directory_offset;
    let expected = sections.central_directory_record_count as usize;
    let mut records = Vec::with_capacity(expected);
    let mut names = HashSet::with_capacity(expected);
    let mut pos = 0usize;

    for index in 1..=expected {
        let offset = cd_offset + pos as u64;
        let (record, size) = CentralDirectoryRecord::parse(&cd[pos..]).map_err(|e| match e {
            Error::Format { message, .. } => Error::format_at(message, Some(index), offset),
            other => other,
        })?;

        if !names.insert(record.name().to_string()) {
            return Err(Error::format_at(
                format!("Multiple ZIP entries with the same name: {}", record.name()),
                Some(index),
                offset,
            ));
        }
        records.push(record);
        pos += size;
    }

    if pos < cd.len() {
        return Err(Error::format_at(
            format!(
                "Unused space at the end of ZIP Central Directory: {} bytes",
                cd.len() - pos
            ),
            None,
            cd_offset + pos as u64,
        ));
    }

    Ok(records)
}
