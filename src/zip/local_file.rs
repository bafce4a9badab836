//! Local File Header records and the entry data behind them.
//!
//! Parsing mirrors what the platform's own APK verifier accepts: the Central
//! Directory is the source of truth and the Local File Header is checked
//! against it, except for fields a data descriptor makes non-authoritative.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::write::DeflateDecoder;
use std::io::Write;

use super::central_directory::CentralDirectoryRecord;
use super::structures::*;
use crate::error::{Error, Result};
use crate::io::{DataSink, DataSource};

/// One entry's Local File Header, name, extra field, data and (optional)
/// data descriptor, as located in the input archive.
#[derive(Debug, Clone)]
pub struct LocalFileRecord {
    name: String,
    name_size: usize,
    extra: Vec<u8>,
    start_offset: u64,
    size: u64,
    data_start_offset: usize,
    data_size: u64,
    compression_method: CompressionMethod,
    uncompressed_size: u64,
}

impl LocalFileRecord {
    /// Read and validate the local record `cd_record` points at.
    ///
    /// # Arguments
    ///
    /// * `lfh_section` - The archive bytes before the Central Directory
    /// * `cd_record` - The entry's Central Directory record
    /// * `cd_start` - Where the Central Directory (or signing block) begins;
    ///   no part of the record may reach past it
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] describing the first inconsistency found.
    pub fn from_central_directory(
        lfh_section: &DataSource,
        cd_record: &CentralDirectoryRecord,
        cd_start: u64,
    ) -> Result<Self> {
        let name = cd_record.name();
        let cd_name_size = cd_record.name_bytes().len();
        let header_start = cd_record.local_header_offset();
        let header_size = (LFH_SIZE + cd_name_size) as u64;
        let fail = |message: String| Error::format_at(message, None, header_start);

        let header_end = header_start + header_size;
        if header_end > cd_start {
            return Err(fail(format!(
                "Local File Header of {name} extends beyond start of Central Directory. \
                 LFH end: {header_end}, CD start: {cd_start}"
            )));
        }
        let header = lfh_section.get_byte_buffer(header_start, header_size)?;

        let signature = LittleEndian::read_u32(&header[0..]);
        if signature != LFH_SIGNATURE {
            return Err(fail(format!(
                "Not a Local File Header record for entry {name}. Signature: 0x{signature:08x}"
            )));
        }

        let gp_flags = LittleEndian::read_u16(&header[6..]);
        let data_descriptor_used = gp_flags & GP_FLAG_DATA_DESCRIPTOR_USED != 0;
        if data_descriptor_used != cd_record.has_data_descriptor() {
            return Err(fail(format!(
                "Data Descriptor presence mismatch between Local File Header and Central \
                 Directory for entry {name}. LFH: {data_descriptor_used}, CD: {}",
                cd_record.has_data_descriptor()
            )));
        }

        // With a data descriptor these fields are typically zero and only the
        // descriptor (and the Central Directory) carry the real values.
        if !data_descriptor_used {
            let crc32 = LittleEndian::read_u32(&header[14..]);
            if crc32 != cd_record.crc32() {
                return Err(fail(format!(
                    "CRC-32 mismatch between Local File Header and Central Directory for entry \
                     {name}. LFH: {crc32}, CD: {}",
                    cd_record.crc32()
                )));
            }
            let compressed_size = LittleEndian::read_u32(&header[18..]) as u64;
            if compressed_size != cd_record.compressed_size() {
                return Err(fail(format!(
                    "Compressed size mismatch between Local File Header and Central Directory \
                     for entry {name}. LFH: {compressed_size}, CD: {}",
                    cd_record.compressed_size()
                )));
            }
            let uncompressed_size = LittleEndian::read_u32(&header[22..]) as u64;
            if uncompressed_size != cd_record.uncompressed_size() {
                return Err(fail(format!(
                    "Uncompressed size mismatch between Local File Header and Central Directory \
                     for entry {name}. LFH: {uncompressed_size}, CD: {}",
                    cd_record.uncompressed_size()
                )));
            }
        }

        let name_size = LittleEndian::read_u16(&header[26..]) as usize;
        if name_size > cd_name_size {
            return Err(fail(format!(
                "Name mismatch between Local File Header and Central Directory for entry {name}. \
                 LFH: {name_size} bytes, CD: {cd_name_size} bytes"
            )));
        }
        let lfh_name = &header[LFH_SIZE..LFH_SIZE + name_size];
        if lfh_name != cd_record.name_bytes() {
            return Err(fail(format!(
                "Name mismatch between Local File Header and Central Directory. \
                 LFH: \"{}\", CD: \"{name}\"",
                String::from_utf8_lossy(lfh_name)
            )));
        }

        let extra_size = LittleEndian::read_u16(&header[LFH_EXTRA_LENGTH_OFFSET..]) as usize;
        let data_start_offset = LFH_SIZE + name_size + extra_size;
        let data_start = header_start + data_start_offset as u64;
        let compression_method = cd_record.compression_method();
        let data_size = match compression_method {
            CompressionMethod::Stored => cd_record.uncompressed_size(),
            _ => cd_record.compressed_size(),
        };
        let data_end = data_start + data_size;
        if data_end > cd_start {
            return Err(fail(format!(
                "Local File Header data of {name} overlaps with Central Directory. \
                 LFH data start: {data_start}, LFH data end: {data_end}, CD start: {cd_start}"
            )));
        }

        let extra = if extra_size > 0 {
            let extra_start = header_start + (LFH_SIZE + name_size) as u64;
            lfh_section.get_byte_buffer(extra_start, extra_size as u64)?
        } else {
            Vec::new()
        };

        let mut record_end = data_end;
        if data_descriptor_used {
            // The descriptor's signature is optional. Like the platform, treat
            // the first four bytes as a signature whenever they look like one.
            let mut descriptor_end = data_end + DATA_DESCRIPTOR_SIZE_WITHOUT_SIGNATURE;
            if descriptor_end > cd_start {
                return Err(fail(format!(
                    "Data Descriptor of {name} overlaps with Central Directory. \
                     Data Descriptor end: {descriptor_end}, CD start: {cd_start}"
                )));
            }
            let mut maybe_signature = [0u8; 4];
            lfh_section.copy_to(data_end, &mut maybe_signature)?;
            if LittleEndian::read_u32(&maybe_signature) == DATA_DESCRIPTOR_SIGNATURE {
                descriptor_end += 4;
                if descriptor_end > cd_start {
                    return Err(fail(format!(
                        "Data Descriptor of {name} overlaps with Central Directory. \
                         Data Descriptor end: {descriptor_end}, CD start: {cd_start}"
                    )));
                }
            }
            record_end = descriptor_end;
        }

        Ok(Self {
            name: name.to_string(),
            name_size,
            extra,
            start_offset: header_start,
            size: record_end - header_start,
            data_start_offset,
            data_size,
            compression_method,
            uncompressed_size: cd_record.uncompressed_size(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The record's extra field.
    pub fn extra(&self) -> &[u8] {
        &self.extra
    }

    /// Offset of the Local File Header in the archive.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Bytes from the header start through the data (and data descriptor).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Offset of the extra field relative to the record start.
    pub fn extra_start_offset(&self) -> usize {
        LFH_SIZE + self.name_size
    }

    /// Offset of the entry data relative to the record start.
    pub fn data_start_offset(&self) -> usize {
        self.data_start_offset
    }

    pub fn is_compressed(&self) -> bool {
        self.compression_method != CompressionMethod::Stored
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.compression_method
    }

    /// Copy the record verbatim from `source` into `sink`.
    ///
    /// # Returns
    ///
    /// The number of bytes written.
    pub fn output_record(&self, source: &DataSource, sink: &mut dyn DataSink) -> Result<u64> {
        source.feed(self.start_offset, self.size, sink)?;
        Ok(self.size)
    }

    /// Copy the record with its extra field replaced by `extra`.
    ///
    /// Only the extra length field of the header changes; everything else,
    /// including the data and any data descriptor, is copied verbatim.
    ///
    /// # Returns
    ///
    /// The number of bytes written.
    pub fn output_record_with_modified_extra(
        &self,
        source: &DataSource,
        extra: &[u8],
        sink: &mut dyn DataSink,
    ) -> Result<u64> {
        let extra_size = u16::try_from(extra.len()).map_err(|_| {
            Error::format(format!(
                "Extra field of {} too large: {} bytes",
                self.name,
                extra.len()
            ))
        })?;

        let extra_start = self.extra_start_offset();
        let mut header = vec![0u8; extra_start];
        source.copy_to(self.start_offset, &mut header)?;
        LittleEndian::write_u16(&mut header[LFH_EXTRA_LENGTH_OFFSET..], extra_size);
        header.extend_from_slice(extra);
        sink.consume(&header)?;

        let remaining = self.size - self.data_start_offset as u64;
        source.feed(
            self.start_offset + self.data_start_offset as u64,
            remaining,
            sink,
        )?;
        Ok(header.len() as u64 + remaining)
    }

    /// Stream the entry's uncompressed data into `sink`.
    ///
    /// DEFLATE data is inflated on the fly; STORED data is passed through.
    /// The CRC-32 of the result is not checked, matching the platform's
    /// verifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedCompression`] for other methods and
    /// [`Error::Format`] if the inflated size differs from the Central
    /// Directory's or the DEFLATE stream is corrupt.
    pub fn output_uncompressed_data(
        &self,
        source: &DataSource,
        sink: &mut dyn DataSink,
    ) -> Result<()> {
        let data_start = self.start_offset + self.data_start_offset as u64;
        match self.compression_method {
            CompressionMethod::Stored => source.feed(data_start, self.data_size, sink),
            CompressionMethod::Deflate => {
                let mut counter = CountingWriter { sink, count: 0 };
                {
                    let mut inflater = StreamEndGuard(DeflateDecoder::new(&mut counter));
                    source
                        .feed(data_start, self.data_size, &mut inflater)
                        .map_err(|e| self.inflate_error(e))?;
                    inflater
                        .0
                        .try_finish()
                        .map_err(|e| self.inflate_error(Error::Io(e)))?;
                }
                if counter.count != self.uncompressed_size {
                    return Err(Error::format(format!(
                        "Unexpected size of uncompressed data of {}. Expected: {} bytes, actual: {} bytes",
                        self.name, self.uncompressed_size, counter.count
                    )));
                }
                Ok(())
            }
            CompressionMethod::Unknown(method) => Err(Error::UnsupportedCompression {
                name: self.name.clone(),
                method,
            }),
        }
    }

    fn inflate_error(&self, err: Error) -> Error {
        match err {
            Error::Io(e) if e.kind() == std::io::ErrorKind::InvalidInput
                || e.kind() == std::io::ErrorKind::InvalidData =>
            {
                Error::format(format!("Data of entry {} malformed: {e}", self.name))
            }
            other => other,
        }
    }

    /// Write a Local File Header followed by already DEFLATE-compressed data.
    ///
    /// # Returns
    ///
    /// The number of bytes written.
    pub fn output_record_with_deflated_data(
        name: &str,
        last_modified: DosDateTime,
        compressed: &[u8],
        crc32: u32,
        uncompressed_size: u32,
        sink: &mut dyn DataSink,
    ) -> Result<u64> {
        let name_size = u16::try_from(name.len())
            .map_err(|_| Error::format(format!("Entry name too long: {name}")))?;
        let compressed_size = u32::try_from(compressed.len())
            .map_err(|_| Error::format(format!("Entry {name} too large")))?;

        let mut header = Vec::with_capacity(LFH_SIZE + name.len());
        header.write_u32::<LittleEndian>(LFH_SIGNATURE)?;
        header.write_u16::<LittleEndian>(VERSION_DEFLATE)?;
        header.write_u16::<LittleEndian>(GP_FLAG_EFS)?;
        header.write_u16::<LittleEndian>(CompressionMethod::Deflate.as_u16())?;
        header.write_u16::<LittleEndian>(last_modified.time)?;
        header.write_u16::<LittleEndian>(last_modified.date)?;
        header.write_u32::<LittleEndian>(crc32)?;
        header.write_u32::<LittleEndian>(compressed_size)?;
        header.write_u32::<LittleEndian>(uncompressed_size)?;
        header.write_u16::<LittleEndian>(name_size)?;
        header.write_u16::<LittleEndian>(0)?; // Extra field length
        header.extend_from_slice(name.as_bytes());

        sink.consume(&header)?;
        sink.consume(compressed)?;
        Ok((header.len() + compressed.len()) as u64)
    }
}

/// Counts bytes on their way to a [`DataSink`].
/// Rejects input a decoder refuses because its stream already ended.
struct StreamEndGuard<W>(W);

impl<W: Write> Write for StreamEndGuard<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.0.write(buf)? {
            0 if !buf.is_empty() => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "trailing bytes after DEFLATE stream",
            )),
            n => Ok(n),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

struct CountingWriter<'a> {
    sink: &'a mut dyn DataSink,
    count: u64,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.sink.consume(buf)?;
        self.count += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
