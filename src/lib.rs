//! # apkzip
//!
//! An APK rewriting engine that preserves entries, order and data alignment
//! while handing signing decisions to a pluggable engine.
//!
//! The input archive is read through [`DataSource`], a cheap sliceable view
//! over a file, memory map or buffer, so archives never have to be loaded
//! into memory as a whole. The output is streamed into a [`ReadableDataSink`].
//!
//! ## Features
//!
//! - Byte-for-byte preservation of untouched entries and inter-entry data
//! - 4-byte (configurable) alignment of uncompressed data, page alignment
//!   of uncompressed shared libraries
//! - Signing block insertion in front of the Central Directory
//! - Optional output size alignment via EOCD comment padding
//! - Strict structural validation: malformed input is rejected, never
//!   half-copied into a valid-looking archive
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use apkzip::{ApkSigner, DataSource, FileSink, PassThroughEngine, SignerConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let input = DataSource::map(Path::new("app.apk"))?;
//!     let mut output = FileSink::create(Path::new("app-aligned.apk"))?;
//!
//!     let signer = ApkSigner::new(SignerConfig::default());
//!     let summary = signer.sign(&input, &mut output, &mut PassThroughEngine::new())?;
//!     output.finish()?;
//!
//!     println!("{} entries re-aligned", summary.realigned);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod signer;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{DataSink, DataSource, FileSink, MemorySink, ReadAt, ReadableDataSink};
pub use signer::{ApkSigner, PassThroughEngine, SignerConfig, SigningEngine, SigningSummary};
pub use zip::{EntryAlignment, verify_alignment};
