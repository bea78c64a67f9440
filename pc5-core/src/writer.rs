//! Sequential `.pc5` container writer.
//!
//! Used to produce fixtures and to re-emit filtered containers. Records are
//! appended in call order; the writer does not enforce sequence ordering.

use crate::decoder::{encode_ir_image, encode_point_cloud, encode_time_meta};
use crate::error::Result;
use crate::parser::{checked_payload_length, encode_record_header, RECORD_HEADER_SIZE};
use crate::types::{IrImage, PointCloud, RecordHeader, RecordKind, TimeMeta};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Appends records to any byte sink.
pub struct ContainerWriter<W: Write> {
    writer: BufWriter<W>,
    position: u64,
}

impl ContainerWriter<File> {
    /// Creates (or truncates) a container file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            position: 0,
        }
    }

    /// Bytes written so far, which is also the offset of the next record.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Writes one record with an already-encoded payload and returns its
    /// offset. The payload is written as given, without validation beyond
    /// the record size limit.
    pub fn write_record(
        &mut self,
        kind: RecordKind,
        sequence_number: u64,
        timestamp: u64,
        payload: &[u8],
    ) -> Result<u64> {
        let offset = self.position;
        let header = RecordHeader {
            kind,
            payload_length: checked_payload_length(kind, payload.len())?,
            sequence_number,
            timestamp,
        };
        self.writer.write_all(&encode_record_header(&header))?;
        self.writer.write_all(payload)?;
        self.position += (RECORD_HEADER_SIZE + payload.len()) as u64;
        Ok(offset)
    }

    pub fn write_point_cloud(
        &mut self,
        sequence_number: u64,
        timestamp: u64,
        cloud: &PointCloud,
    ) -> Result<u64> {
        let payload = encode_point_cloud(cloud)?;
        self.write_record(RecordKind::PointCloud, sequence_number, timestamp, &payload)
    }

    pub fn write_ir_image(
        &mut self,
        sequence_number: u64,
        timestamp: u64,
        image: &IrImage,
    ) -> Result<u64> {
        let payload = encode_ir_image(image)?;
        self.write_record(RecordKind::IrImage, sequence_number, timestamp, &payload)
    }

    pub fn write_time_meta(
        &mut self,
        sequence_number: u64,
        timestamp: u64,
        meta: &TimeMeta,
    ) -> Result<u64> {
        let payload = encode_time_meta(meta);
        self.write_record(RecordKind::TimeMeta, sequence_number, timestamp, &payload)
    }

    /// Writes arbitrary bytes, bypassing framing.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.position;
        self.writer.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(offset)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and returns the underlying sink.
    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error().into())
    }
}
