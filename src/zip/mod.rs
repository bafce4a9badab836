//! ZIP archive structures as APKs use them.
//!
//! ## Architecture
//!
//! - [`structures`]: Constants and fixed-size records (EOCD, timestamps, flags)
//! - [`locator`]: Finding the EOCD, the Central Directory and the APK Signing Block
//! - [`central_directory`]: Central Directory records, kept byte for byte
//! - [`local_file`]: Local File Header records and their data
//! - [`alignment`]: Extra field padding that aligns uncompressed data
//!
//! ## ZIP Format Overview
//!
//! An APK consists of:
//! 1. Local file headers and data for each entry
//! 2. An optional APK Signing Block
//! 3. Central Directory with metadata for all entries
//! 4. End of Central Directory (EOCD) record at the end
//!
//! Everything is located from the EOCD backwards, so the Central Directory
//! is known before any entry data is touched.
//!
//! ## Limitations
//!
//! - No ZIP64 support
//! - No encryption support
//! - No multi-disk archive support
//! - Only STORED and DEFLATE entry data can be inspected

pub mod alignment;
pub mod central_directory;
pub mod local_file;
pub mod locator;
mod structures;

pub use alignment::{AlignmentPlan, DataAlignment, EntryAlignment, verify_alignment};
pub use central_directory::{CentralDirectoryRecord, parse_central_directory};
pub use local_file::LocalFileRecord;
pub use locator::{ApkSigningBlock, ZipSections, find_zip_sections};
pub use structures::*;
