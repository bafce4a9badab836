//! Locating the main sections of a ZIP archive.
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. Read where the Central Directory lives from the EOCD
//! 3. Look just before the Central Directory for an APK Signing Block
//!
//! Nothing before the Central Directory is read here, so the whole archive
//! never needs to be in memory.

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use super::structures::EndOfCentralDirectory;
use crate::error::{Error, Result};
use crate::io::DataSource;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = u16::MAX as u64;

/// Magic trailing the APK Signing Block: "APK Sig Block 42".
pub const APK_SIGNING_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";

/// Size of the block footer: `u64` size followed by the magic.
const APK_SIGNING_BLOCK_FOOTER_SIZE: u64 = 24;

/// Smallest possible block: both size fields plus the magic.
const APK_SIGNING_BLOCK_MIN_SIZE: u64 = 32;

/// Where the main parts of a ZIP archive live.
///
/// Computed once per input and never changed afterwards.
#[derive(Debug, Clone)]
pub struct ZipSections {
    /// Offset of the first Central Directory record.
    pub central_directory_offset: u64,
    /// Size of the Central Directory in bytes.
    pub central_directory_size: u64,
    /// Number of records the EOCD declares.
    pub central_directory_record_count: u16,
    /// Offset of the EOCD record.
    pub eocd_offset: u64,
    /// The EOCD record including its comment.
    pub eocd: Vec<u8>,
    /// The APK Signing Block preceding the Central Directory, if any.
    pub signing_block: Option<ApkSigningBlock>,
}

impl ZipSections {
    /// Size of the region holding local file records, i.e. everything
    /// before the signing block (or the Central Directory if there is none).
    pub fn local_file_section_size(&self) -> u64 {
        self.signing_block
            .as_ref()
            .map_or(self.central_directory_offset, |block| block.offset)
    }

    /// Read the Central Directory bytes from `apk`.
    pub fn read_central_directory(&self, apk: &DataSource) -> Result<Vec<u8>> {
        if self.central_directory_size > i32::MAX as u64 {
            return Err(Error::format_at(
                format!(
                    "Central Directory too large: {} bytes",
                    self.central_directory_size
                ),
                None,
                self.central_directory_offset,
            ));
        }
        apk.get_byte_buffer(self.central_directory_offset, self.central_directory_size)
    }
}

/// An opaque signing block found in front of the Central Directory.
#[derive(Debug, Clone)]
pub struct ApkSigningBlock {
    /// Offset of the block's first byte in the archive.
    pub offset: u64,
    /// The whole block, header size field to magic.
    pub contents: DataSource,
}

impl ApkSigningBlock {
    /// Walk the block's length-prefixed `(u64 length, u32 id, value)` pairs.
    ///
    /// Returns `(id, value)` for every pair, in order.
    ///
    /// # Errors
    ///
    /// Returns a format error when a pair's declared length is shorter than
    /// its id field or runs past the pair section.
    pub fn pairs(&self) -> Result<Vec<(u32, Vec<u8>)>> {
        let size = self.contents.size();
        let section_size = size
            .checked_sub(APK_SIGNING_BLOCK_FOOTER_SIZE + 8)
            .ok_or_else(|| {
                Error::format_at(
                    format!("APK Signing Block too small: {size} bytes"),
                    None,
                    self.offset,
                )
            })?;
        let section = self.contents.get_byte_buffer(8, section_size)?;

        let mut pairs = Vec::new();
        let mut pos = 0usize;
        while pos < section.len() {
            let entry_offset = self.offset + 8 + pos as u64;
            if section.len() - pos < 8 {
                return Err(Error::format_at(
                    "Insufficient data to read size of APK Signing Block entry",
                    None,
                    entry_offset,
                ));
            }
            let len = LittleEndian::read_u64(&section[pos..]);
            pos += 8;
            if len < 4 || len > (section.len() - pos) as u64 {
                return Err(Error::format_at(
                    format!("APK Signing Block entry length out of range: {len}"),
                    None,
                    entry_offset,
                ));
            }
            let len = len as usize;
            let id = LittleEndian::read_u32(&section[pos..]);
            pairs.push((id, section[pos + 4..pos + len].to_vec()));
            pos += len;
        }
        Ok(pairs)
    }
}

/// Find and parse the End of Central Directory record.
///
/// First tries the simple case where there's no comment, then searches
/// backwards through the last 64 KiB + 22 bytes. A candidate is only
/// accepted when its comment length reaches exactly to the end of the file,
/// which rejects signature bytes that happen to occur inside a comment.
///
/// # Returns
///
/// A tuple of (EOCD bytes including the comment, offset of EOCD in file),
/// or `None` if there is no EOCD.
pub fn find_eocd(apk: &DataSource) -> Result<Option<(Vec<u8>, u64)>> {
    let size = apk.size();
    let min = EndOfCentralDirectory::SIZE as u64;
    if size < min {
        return Ok(None);
    }

    // Optimization: nearly all APKs have an empty comment.
    if let Some(found) = search_eocd(apk, 0)? {
        return Ok(Some(found));
    }
    search_eocd(apk, MAX_COMMENT_SIZE)
}

fn search_eocd(apk: &DataSource, max_comment_size: u64) -> Result<Option<(Vec<u8>, u64)>> {
    let min = EndOfCentralDirectory::SIZE;
    let max_comment_size = max_comment_size.min(apk.size() - min as u64);
    let search_start = apk.size() - min as u64 - max_comment_size;
    let buf = apk.get_byte_buffer(search_start, min as u64 + max_comment_size)?;

    let last_candidate = buf.len() - min;
    for comment_len in 0..=max_comment_size as usize {
        let i = last_candidate - comment_len;
        if LittleEndian::read_u32(&buf[i..]) != EndOfCentralDirectory::SIGNATURE {
            continue;
        }
        let declared =
            LittleEndian::read_u16(&buf[i + EndOfCentralDirectory::COMMENT_LENGTH_OFFSET..]);
        if declared as usize == comment_len {
            return Ok(Some((buf[i..].to_vec(), search_start + i as u64)));
        }
    }
    Ok(None)
}

/// Locate the EOCD, the Central Directory and any APK Signing Block.
///
/// # Errors
///
/// Returns [`Error::Format`] if there is no EOCD, if it describes a ZIP64
/// archive, or if the Central Directory is not immediately followed by the
/// EOCD.
pub fn find_zip_sections(apk: &DataSource) -> Result<ZipSections> {
    let (eocd_bytes, eocd_offset) = find_eocd(apk)?
        .ok_or_else(|| Error::format("ZIP End of Central Directory record not found"))?;
    let eocd = EndOfCentralDirectory::from_bytes(&eocd_bytes)?;

    if eocd.is_zip64() {
        return Err(Error::format_at(
            "ZIP64 archives are not supported",
            None,
            eocd_offset,
        ));
    }

    let cd_offset = eocd.cd_offset as u64;
    if cd_offset > eocd_offset {
        return Err(Error::format_at(
            format!(
                "ZIP Central Directory start offset out of range: {cd_offset}. \
                 ZIP End of Central Directory offset: {eocd_offset}"
            ),
            None,
            eocd_offset,
        ));
    }

    let cd_end = cd_offset + eocd.cd_size as u64;
    if cd_end != eocd_offset {
        return Err(Error::format_at(
            format!(
                "ZIP Central Directory is not immediately followed by End of Central Directory. \
                 CD end: {cd_end}, EOCD start: {eocd_offset}"
            ),
            None,
            eocd_offset,
        ));
    }

    let mut sections = ZipSections {
        central_directory_offset: cd_offset,
        central_directory_size: eocd.cd_size as u64,
        central_directory_record_count: eocd.total_entries,
        eocd_offset,
        eocd: eocd_bytes,
        signing_block: None,
    };
    sections.signing_block = find_apk_signing_block(apk, &sections)?;
    Ok(sections)
}

/// Find the APK Signing Block immediately preceding the Central Directory.
///
/// Block layout:
/// * `u64`: size in bytes, excluding this field
/// * pairs of `u64 length, u32 id, value`
/// * `u64`: size in bytes, same as above
/// * 16 bytes: magic
///
/// A missing or inconsistent footer means there is no block; that is not an
/// error.
pub fn find_apk_signing_block(
    apk: &DataSource,
    sections: &ZipSections,
) -> Result<Option<ApkSigningBlock>> {
    let cd_offset = sections.central_directory_offset;
    if cd_offset < APK_SIGNING_BLOCK_MIN_SIZE {
        return Ok(None);
    }

    let footer = apk.get_byte_buffer(
        cd_offset - APK_SIGNING_BLOCK_FOOTER_SIZE,
        APK_SIGNING_BLOCK_FOOTER_SIZE,
    )?;
    if &footer[8..] != APK_SIGNING_BLOCK_MAGIC {
        return Ok(None);
    }

    let size_in_footer = LittleEndian::read_u64(&footer);
    if size_in_footer < APK_SIGNING_BLOCK_FOOTER_SIZE || size_in_footer > i32::MAX as u64 - 8 {
        warn!("Ignoring APK Signing Block with size out of range: {size_in_footer}");
        return Ok(None);
    }

    let total_size = size_in_footer + 8;
    let Some(block_offset) = cd_offset.checked_sub(total_size) else {
        warn!("Ignoring APK Signing Block starting before the file: size {total_size}");
        return Ok(None);
    };

    let header = apk.get_byte_buffer(block_offset, 8)?;
    let size_in_header = LittleEndian::read_u64(&header);
    if size_in_header != size_in_footer {
        warn!(
            "Ignoring APK Signing Block with mismatched sizes: header {size_in_header}, footer {size_in_footer}"
        );
        return Ok(None);
    }

    Ok(Some(ApkSigningBlock {
        offset: block_offset,
        contents: apk.slice(block_offset, total_size)?,
    }))
}
