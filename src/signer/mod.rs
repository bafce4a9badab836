//! Rewriting an APK around a signing engine.
//!
//! [`ApkSigner`] streams the input archive into the output, entry by entry,
//! letting a [`SigningEngine`] decide which entries survive, inspect their
//! contents, append new entries and insert a signing block. Everything the
//! engine does not touch is copied byte for byte, apart from alignment
//! padding and the offsets that move with it.

mod engine;
mod passthrough;

pub use engine::*;
pub use passthrough::{PassThroughEngine, is_jar_signature_entry};

use flate2::{Compression, write::DeflateEncoder};
use log::{debug, info, trace};
use std::collections::HashSet;
use std::io::Write;

use crate::error::{Error, Result};
use crate::io::{DataSink, DataSource, ReadableDataSink};
use crate::zip::{
    AlignmentPlan, CentralDirectoryRecord, DEFAULT_NEW_ENTRY_TIMESTAMP, DataAlignment, DosDateTime,
    EndOfCentralDirectory, LocalFileRecord, find_zip_sections, parse_central_directory,
};

/// Rounds of EOCD comment padding tried before giving up on output size
/// alignment.
pub const MAX_SIZE_ALIGNMENT_ATTEMPTS: usize = 8;

/// Options of a signing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignerConfig {
    /// Alignment of uncompressed entry data. Zero disables alignment,
    /// shared libraries included.
    pub alignment: u16,
    /// Leave entries whose data was unaligned in the input as they are.
    pub preserve_alignment: bool,
    /// Pad the EOCD comment so the output size is a multiple of this.
    pub output_size_alignment: Option<u32>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            alignment: 4,
            preserve_alignment: false,
            output_size_alignment: None,
        }
    }
}

/// What a signing run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningSummary {
    /// Input entries copied to the output.
    pub copied: usize,
    /// Copied entries whose extra field was rewritten to align their data.
    pub realigned: usize,
    /// Input entries dropped.
    pub skipped: usize,
    /// Input entries dropped in favor of the engine's version.
    pub output_by_engine: usize,
    /// Entries appended by the engine.
    pub added: usize,
    /// Signing block bytes written, padding included.
    pub signing_block_size: u64,
    /// Total bytes written.
    pub output_size: u64,
}

/// Drives one or more signing runs with a fixed configuration.
#[derive(Debug, Clone)]
pub struct ApkSigner {
    config: SignerConfig,
    alignment: DataAlignment,
}

/// Output of the entry pass: Central Directory records in output order and
/// where the Central Directory starts.
struct EntryOutput {
    records: Vec<CentralDirectoryRecord>,
    central_directory_offset: u64,
}

impl ApkSigner {
    pub fn new(config: SignerConfig) -> Self {
        let alignment =
            DataAlignment::new(config.alignment).preserve_unaligned(config.preserve_alignment);
        Self { config, alignment }
    }

    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// Rewrite `input` into `output`, which must be empty.
    ///
    /// The input's structure is validated before any byte is written, so a
    /// damaged EOCD or Central Directory leaves `output` untouched. Errors
    /// found later abort the run with `output` partially written; callers
    /// discard it.
    ///
    /// # Errors
    ///
    /// * [`Error::Format`] for malformed input, or output that would need ZIP64
    /// * [`Error::UnsupportedCompression`] when the engine inspects an entry
    ///   that is neither STORED nor DEFLATE
    /// * [`Error::Convergence`] when size alignment does not settle
    /// * [`Error::Engine`] for anything the engine reports
    pub fn sign<S: ReadableDataSink>(
        &self,
        input: &DataSource,
        output: &mut S,
        engine: &mut dyn SigningEngine,
    ) -> Result<SigningSummary> {
        if output.position() != 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "output sink is not empty",
            )));
        }

        let sections = find_zip_sections(input)?;
        let central_directory = sections.read_central_directory(input)?;
        let records = parse_central_directory(&central_directory, &sections)?;
        debug!(
            "Input: {} entries, Central Directory at {}, signing block: {}",
            records.len(),
            sections.central_directory_offset,
            sections.signing_block.is_some()
        );

        engine
            .input_apk_signing_block(sections.signing_block.as_ref().map(|b| &b.contents))
            .map_err(Error::Engine)?;

        // The old signing block, if any, is never carried over.
        let lfh_section = input.slice(0, sections.local_file_section_size())?;

        let mut summary = SigningSummary::default();
        let entries = self.output_entries(&lfh_section, &records, output, engine, &mut summary)?;
        summary.signing_block_size =
            self.output_central_directory(&sections.eocd, entries, output, engine)?;
        summary.output_size = output.position();

        engine.output_done().map_err(Error::Engine)?;
        info!(
            "Wrote {} bytes: {} entries copied ({} re-aligned), {} skipped, {} replaced, {} added",
            summary.output_size,
            summary.copied,
            summary.realigned,
            summary.skipped,
            summary.output_by_engine,
            summary.added
        );
        Ok(summary)
    }

    /// Copy input entries in file order, then append the engine's entries.
    fn output_entries<S: ReadableDataSink>(
        &self,
        lfh_section: &DataSource,
        records: &[CentralDirectoryRecord],
        output: &mut S,
        engine: &mut dyn SigningEngine,
        summary: &mut SigningSummary,
    ) -> Result<EntryOutput> {
        let lfh_section_size = lfh_section.size();

        // Stable, so records sharing an offset keep their directory order.
        let mut by_offset: Vec<usize> = (0..records.len()).collect();
        by_offset.sort_by_key(|&i| records[i].local_header_offset());

        let mut output_records: Vec<Option<CentralDirectoryRecord>> = vec![None; records.len()];
        let mut names = HashSet::with_capacity(records.len());
        let mut last_modified: Option<DosDateTime> = None;
        let mut input_offset = 0u64;
        let mut output_offset = 0u64;

        for index in by_offset {
            let cd_record = &records[index];
            let name = cd_record.name();
            let header_start = cd_record.local_header_offset();
            let record =
                LocalFileRecord::from_central_directory(lfh_section, cd_record, lfh_section_size)
                    .map_err(|e| e.with_entry(index + 1))?;

            if header_start > input_offset {
                let gap = header_start - input_offset;
                trace!("Copying {gap} unprocessed bytes at offset {input_offset}");
                lfh_section.feed(input_offset, gap, output)?;
                output_offset += gap;
            }
            input_offset = input_offset.max(header_start + record.size());

            let instructions = engine.input_jar_entry(name).map_err(Error::Engine)?;
            if let Some(request) = instructions.inspect {
                fulfill_inspect_request(&record, lfh_section, request)?;
            }
            match instructions.policy {
                OutputPolicy::Output => {}
                OutputPolicy::OutputByEngine => {
                    debug!("{name}: left to the signing engine");
                    summary.output_by_engine += 1;
                    continue;
                }
                OutputPolicy::Skip => {
                    debug!("{name}: skipped");
                    summary.skipped += 1;
                    continue;
                }
            }

            if let Some(request) = engine.output_jar_entry(name).map_err(Error::Engine)? {
                fulfill_inspect_request(&record, lfh_section, request)?;
            }

            let modified = cd_record.last_modified();
            last_modified = Some(last_modified.map_or(modified, |max| max.max(modified)));

            let new_offset = output_offset_u32(output_offset)?;
            let plan = self.alignment.plan(&record, output_offset);
            let written = match &plan {
                AlignmentPlan::Unchanged => record.output_record(lfh_section, output)?,
                AlignmentPlan::Realign { alignment, extra } => {
                    debug!("{name}: aligning data to {alignment} bytes");
                    summary.realigned += 1;
                    record.output_record_with_modified_extra(lfh_section, extra, output)?
                }
            };
            debug!(
                "{name}: copied from {header_start} to {output_offset}, data at {}",
                output_offset + plan.data_start_offset(&record) as u64
            );
            output_offset += written;

            output_records[index] = Some(cd_record.with_local_header_offset(new_offset).into_owned());
            names.insert(name.to_string());
            summary.copied += 1;
        }

        if input_offset < lfh_section_size {
            let gap = lfh_section_size - input_offset;
            trace!("Copying {gap} trailing bytes at offset {input_offset}");
            lfh_section.feed(input_offset, gap, output)?;
            output_offset += gap;
        }

        let mut cd_records: Vec<CentralDirectoryRecord> =
            output_records.into_iter().flatten().collect();

        let timestamp = last_modified.unwrap_or(DEFAULT_NEW_ENTRY_TIMESTAMP);
        if let Some(mut request) = engine.output_jar_entries().map_err(Error::Engine)? {
            for entry in request.additional_jar_entries() {
                if !names.insert(entry.name.clone()) {
                    return Err(Error::Engine(anyhow::anyhow!(
                        "Signing engine added entry {} which is already in the output",
                        entry.name
                    )));
                }
                if let Some(mut inspect) = engine.output_jar_entry(&entry.name).map_err(Error::Engine)? {
                    inspect.data_sink().consume(&entry.data)?;
                    inspect.done().map_err(Error::Engine)?;
                }

                let lfh_offset = output_offset_u32(output_offset)?;
                let uncompressed_size = u32::try_from(entry.data.len())
                    .map_err(|_| Error::format(format!("Entry {} too large", entry.name)))?;
                let (compressed, crc32) = deflate(&entry.data)?;
                output_offset += LocalFileRecord::output_record_with_deflated_data(
                    &entry.name,
                    timestamp,
                    &compressed,
                    crc32,
                    uncompressed_size,
                    output,
                )?;
                cd_records.push(CentralDirectoryRecord::new_deflated(
                    &entry.name,
                    timestamp,
                    crc32,
                    compressed.len() as u32,
                    uncompressed_size,
                    lfh_offset,
                )?);
                debug!("{}: added by the signing engine at {lfh_offset}", entry.name);
                summary.added += 1;
            }
            request.done().map_err(Error::Engine)?;
        }

        Ok(EntryOutput {
            records: cd_records,
            central_directory_offset: output_offset,
        })
    }

    /// Write the signing block, Central Directory and EOCD.
    ///
    /// # Returns
    ///
    /// The size of the signing block including its padding, zero if the
    /// engine asked for none.
    fn output_central_directory<S: ReadableDataSink>(
        &self,
        input_eocd: &[u8],
        entries: EntryOutput,
        output: &mut S,
        engine: &mut dyn SigningEngine,
    ) -> Result<u64> {
        let cd_size: usize = entries.records.iter().map(CentralDirectoryRecord::size).sum();
        if cd_size > i32::MAX as usize {
            return Err(Error::format(format!(
                "Output Central Directory too large: {cd_size} bytes"
            )));
        }
        let mut central_directory = Vec::with_capacity(cd_size);
        for record in &entries.records {
            record.copy_to(&mut central_directory);
        }

        let record_count = u16::try_from(entries.records.len()).map_err(|_| {
            Error::format(format!(
                "Too many entries for a non-ZIP64 archive: {}",
                entries.records.len()
            ))
        })?;
        let cd_offset = entries.central_directory_offset;
        let mut eocd = EndOfCentralDirectory::with_central_directory(
            input_eocd,
            record_count,
            cd_size as u32,
            output_offset_u32(cd_offset)?,
        );

        let before_central_directory = output.as_data_source()?;
        let central_directory = DataSource::from_bytes(central_directory);
        let mut attempts = 0;
        let request = loop {
            attempts += 1;
            let request = engine
                .output_zip_sections(
                    &before_central_directory,
                    &central_directory,
                    &DataSource::from_bytes(eocd.clone()),
                )
                .map_err(Error::Engine)?;

            let Some(multiple) = self.config.output_size_alignment.filter(|&m| m > 1) else {
                break request;
            };
            let block_size = request.as_ref().map_or(0, |r| {
                (r.padding_before() + r.apk_signing_block().len()) as u64
            });
            let total = cd_offset + block_size + cd_size as u64 + eocd.len() as u64;
            let remainder = total % multiple as u64;
            if remainder == 0 {
                break request;
            }
            if attempts >= MAX_SIZE_ALIGNMENT_ATTEMPTS {
                return Err(Error::Convergence { attempts });
            }
            let padding = (multiple as u64 - remainder) as usize;
            debug!("Padding EOCD comment by {padding} bytes to make output size a multiple of {multiple}");
            eocd = EndOfCentralDirectory::with_comment_padding(&eocd, padding)?;
        };

        let mut signing_block_size = 0u64;
        if let Some(mut request) = request {
            let padding = request.padding_before();
            let block = request.apk_signing_block();
            output.consume(&vec![0u8; padding])?;
            output.consume(block)?;
            signing_block_size = (padding + block.len()) as u64;
            debug!("Inserted {} byte signing block after {padding} bytes of padding", block.len());

            let shifted = output_offset_u32(cd_offset + signing_block_size)?;
            EndOfCentralDirectory::set_central_directory_offset(&mut eocd, shifted);
            request.done().map_err(Error::Engine)?;
        }

        central_directory.feed(0, central_directory.size(), output)?;
        output.consume(&eocd)?;
        Ok(signing_block_size)
    }
}

/// Stream an entry's uncompressed data to the engine.
fn fulfill_inspect_request(
    record: &LocalFileRecord,
    lfh_section: &DataSource,
    mut request: Box<dyn InspectJarEntryRequest>,
) -> Result<()> {
    trace!("Feeding {} to the signing engine", request.entry_name());
    record.output_uncompressed_data(lfh_section, request.data_sink())?;
    request.done().map_err(Error::Engine)
}

fn output_offset_u32(offset: u64) -> Result<u32> {
    u32::try_from(offset)
        .map_err(|_| Error::format(format!("Output too large: offset {offset} needs ZIP64")))
}

/// DEFLATE `data` at the best compression level.
///
/// # Returns
///
/// The compressed bytes and the CRC-32 of `data`.
fn deflate(data: &[u8]) -> Result<(Vec<u8>, u32)> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    Ok((encoder.finish()?, crc32fast::hash(data)))
}
