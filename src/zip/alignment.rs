//! Data alignment for uncompressed entries.
//!
//! Uncompressed entries (native libraries above all) are memory-mapped
//! straight out of the APK, so their data must start on a suitable boundary.
//! Alignment is achieved by padding the entry's extra field with a dedicated
//! sub-field:
//!
//! * `u16`: header id `0xd935`
//! * `u16`: payload size
//! * `u16`: alignment multiple in bytes
//! * zero padding up to the next multiple

use byteorder::{ByteOrder, LittleEndian};

use super::central_directory::parse_central_directory;
use super::local_file::LocalFileRecord;
use super::locator::find_zip_sections;
use crate::error::Result;
use crate::io::DataSource;

/// Extra field header id of the alignment sub-field.
pub const ALIGNMENT_EXTRA_FIELD_ID: u16 = 0xd935;

/// Alignment sub-field size without padding.
pub const ALIGNMENT_EXTRA_FIELD_MIN_SIZE: usize = 6;

/// Alignment applied to uncompressed shared libraries.
pub const PAGE_ALIGNMENT: u16 = 4096;

/// Entries with this suffix are shared libraries.
pub const SHARED_LIBRARY_SUFFIX: &str = ".so";

/// Alignment policy for entry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataAlignment {
    default_alignment: u16,
    preserve_unaligned: bool,
}

impl Default for DataAlignment {
    fn default() -> Self {
        Self::new(4)
    }
}

impl DataAlignment {
    /// Align uncompressed entries to `default_alignment` bytes and shared
    /// libraries to [`PAGE_ALIGNMENT`]. Zero disables alignment entirely.
    pub fn new(default_alignment: u16) -> Self {
        Self {
            default_alignment,
            preserve_unaligned: false,
        }
    }

    /// Leave entries whose data was not aligned in the input as they are.
    pub fn preserve_unaligned(mut self, preserve: bool) -> Self {
        self.preserve_unaligned = preserve;
        self
    }

    pub fn default_alignment(&self) -> u16 {
        self.default_alignment
    }

    /// The alignment an entry's data should have; 1 means none.
    pub fn alignment_for(&self, name: &str, compressed: bool) -> u16 {
        if compressed || self.default_alignment == 0 {
            1
        } else if name.ends_with(SHARED_LIBRARY_SUFFIX) {
            PAGE_ALIGNMENT
        } else {
            self.default_alignment
        }
    }

    /// Decide how `record` is emitted when its header lands at `output_offset`.
    pub fn plan(&self, record: &LocalFileRecord, output_offset: u64) -> AlignmentPlan {
        let alignment = self.alignment_for(record.name(), record.is_compressed());
        if alignment <= 1 {
            return AlignmentPlan::Unchanged;
        }
        let multiple = alignment as u64;

        let data_offset = record.data_start_offset() as u64;
        if (output_offset + data_offset) % multiple == 0 {
            return AlignmentPlan::Unchanged;
        }
        if self.preserve_unaligned && (record.start_offset() + data_offset) % multiple != 0 {
            return AlignmentPlan::Unchanged;
        }

        let extra_start = output_offset + record.extra_start_offset() as u64;
        AlignmentPlan::Realign {
            alignment,
            extra: build_aligning_extra(record.extra(), extra_start, alignment),
        }
    }
}

/// How an entry's local record is emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignmentPlan {
    /// Copy the record verbatim.
    Unchanged,
    /// Copy the record with `extra` as its extra field.
    Realign { alignment: u16, extra: Vec<u8> },
}

impl AlignmentPlan {
    /// Offset of the entry data relative to the start of the emitted record.
    pub fn data_start_offset(&self, record: &LocalFileRecord) -> usize {
        match self {
            AlignmentPlan::Unchanged => record.data_start_offset(),
            AlignmentPlan::Realign { extra, .. } => {
                record.data_start_offset() - record.extra().len() + extra.len()
            }
        }
    }
}

/// Build an extra field that places the data following it on a multiple
/// of `alignment`.
///
/// Every sub-field of `original` is kept except legacy zero padding
/// (`id 0, size 0`) and earlier alignment sub-fields; a sub-field whose
/// declared size overruns the field ends the copy. A fresh alignment
/// sub-field with the minimal padding is appended.
///
/// # Arguments
///
/// * `original` - The current extra field
/// * `extra_start_offset` - File offset at which the extra field will start
/// * `alignment` - Required alignment of the data
pub fn build_aligning_extra(original: &[u8], extra_start_offset: u64, alignment: u16) -> Vec<u8> {
    if alignment <= 1 {
        return original.to_vec();
    }

    let mut result = Vec::with_capacity(original.len() + ALIGNMENT_EXTRA_FIELD_MIN_SIZE + alignment as usize);
    let mut pos = 0usize;
    while original.len() - pos >= 4 {
        let header_id = LittleEndian::read_u16(&original[pos..]);
        let data_size = LittleEndian::read_u16(&original[pos + 2..]) as usize;
        let field_end = pos + 4 + data_size;
        if field_end > original.len() {
            break;
        }
        let legacy_padding = header_id == 0 && data_size == 0;
        if !legacy_padding && header_id != ALIGNMENT_EXTRA_FIELD_ID {
            result.extend_from_slice(&original[pos..field_end]);
        }
        pos = field_end;
    }

    let multiple = alignment as u64;
    let data_min_start =
        extra_start_offset + result.len() as u64 + ALIGNMENT_EXTRA_FIELD_MIN_SIZE as u64;
    let padding = ((multiple - data_min_start % multiple) % multiple) as usize;

    result.extend_from_slice(&ALIGNMENT_EXTRA_FIELD_ID.to_le_bytes());
    result.extend_from_slice(&((2 + padding) as u16).to_le_bytes());
    result.extend_from_slice(&alignment.to_le_bytes());
    result.resize(result.len() + padding, 0);
    result
}

/// Where one entry's data sits and the alignment it should have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAlignment {
    pub name: String,
    pub data_offset: u64,
    pub alignment: u16,
    pub compressed: bool,
}

impl EntryAlignment {
    pub fn is_aligned(&self) -> bool {
        self.data_offset % self.alignment as u64 == 0
    }
}

/// Check the data alignment of every entry of `apk`, in file order.
///
/// Uses the same rules as rewriting with `DataAlignment::new(alignment)`:
/// compressed entries always pass, shared libraries need page alignment.
pub fn verify_alignment(apk: &DataSource, alignment: u16) -> Result<Vec<EntryAlignment>> {
    let policy = DataAlignment::new(alignment);
    let sections = find_zip_sections(apk)?;
    let central_directory = sections.read_central_directory(apk)?;
    let mut records = parse_central_directory(&central_directory, &sections)?;
    records.sort_by_key(|r| r.local_header_offset());

    let lfh_section_size = sections.local_file_section_size();
    let lfh_section = apk.slice(0, lfh_section_size)?;
    records
        .iter()
        .map(|cd_record| {
            let record =
                LocalFileRecord::from_central_directory(&lfh_section, cd_record, lfh_section_size)?;
            Ok(EntryAlignment {
                name: record.name().to_string(),
                data_offset: record.start_offset() + record.data_start_offset() as u64,
                alignment: policy.alignment_for(record.name(), record.is_compressed()),
                compressed: record.is_compressed(),
            })
        })
        .collect()
}
