//! Frame index construction.
//!
//! The container has no table of contents, so the index is built with one
//! forward pass over the record headers. Payloads are validated but not
//! decoded: the index holds locations only, which keeps memory proportional
//! to the number of frames rather than the size of the file.
//!
//! Recovery is two-tier. A payload whose internal structure disagrees with
//! its length drops that one record and the pass continues at the next
//! header. A framing failure (unknown tag, truncated header or payload) or
//! an ordering inconsistency halts the pass; the frames indexed so far
//! remain usable and the report says where and why it stopped. A frame
//! whose own record was cut short is not part of that prefix.
//!
//! Sequence numbers never decrease and timestamps never decrease from one
//! frame to the next, so lookups by timestamp can binary-search the index.

use crate::cursor::Cursor;
use crate::decoder::{decode_time_meta, inspect_ir_image, inspect_point_cloud};
use crate::error::{Pc5Error, Result};
use crate::parser::{parse_record_header, peek_sequence_number, RECORD_HEADER_SIZE};
use crate::types::{RecordHeader, RecordKind};
use log::{debug, trace, warn};

/// Where one record lives in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    /// Offset of the record header
    pub record_offset: u64,
    /// Offset of the first payload byte
    pub payload_offset: u64,
    pub payload_length: u32,
}

impl RecordLocation {
    /// Header plus payload.
    #[inline]
    pub fn byte_length(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.payload_length as u64
    }
}

/// One frame: the locations of every record sharing a sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub sequence_number: u64,
    /// Sensor clock timestamp in nanoseconds
    pub timestamp: u64,
    pub point_cloud: Option<RecordLocation>,
    pub ir_image: Option<RecordLocation>,
    pub time_meta: Option<RecordLocation>,
}

impl IndexEntry {
    fn new(header: &RecordHeader, location: RecordLocation) -> Self {
        let mut entry = Self {
            sequence_number: header.sequence_number,
            timestamp: header.timestamp,
            point_cloud: None,
            ir_image: None,
            time_meta: None,
        };
        *entry.slot_mut(header.kind) = Some(location);
        entry
    }

    /// Location of this frame's record of the given kind.
    pub fn location(&self, kind: RecordKind) -> Option<RecordLocation> {
        match kind {
            RecordKind::PointCloud => self.point_cloud,
            RecordKind::IrImage => self.ir_image,
            RecordKind::TimeMeta => self.time_meta,
        }
    }

    fn slot_mut(&mut self, kind: RecordKind) -> &mut Option<RecordLocation> {
        match kind {
            RecordKind::PointCloud => &mut self.point_cloud,
            RecordKind::IrImage => &mut self.ir_image,
            RecordKind::TimeMeta => &mut self.time_meta,
        }
    }

    /// Number of records merged into this frame.
    pub fn record_count(&self) -> usize {
        [self.point_cloud, self.ir_image, self.time_meta]
            .iter()
            .filter(|l| l.is_some())
            .count()
    }
}

/// Frames ordered by strictly increasing sequence number.
///
/// Immutable once built and safe to share between threads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameIndex {
    entries: Vec<IndexEntry>,
}

impl FrameIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Entry at a 0-based position.
    pub fn get(&self, position: usize) -> Option<&IndexEntry> {
        self.entries.get(position)
    }

    /// Entry for a sequence number.
    pub fn find(&self, sequence_number: u64) -> Option<&IndexEntry> {
        self.position_of(sequence_number).map(|i| &self.entries[i])
    }

    /// Position of a sequence number in the index.
    pub fn position_of(&self, sequence_number: u64) -> Option<usize> {
        self.entries
            .binary_search_by_key(&sequence_number, |e| e.sequence_number)
            .ok()
    }

    /// Last entry whose timestamp is at or before `timestamp`.
    ///
    /// The builder keeps timestamps non-decreasing across entries.
    pub fn at_or_before(&self, timestamp: u64) -> Option<&IndexEntry> {
        let end = self.entries.partition_point(|e| e.timestamp <= timestamp);
        end.checked_sub(1).map(|i| &self.entries[i])
    }

    /// Timestamp range covered by the index.
    pub fn time_span(&self) -> Option<(u64, u64)> {
        Some((self.entries.first()?.timestamp, self.entries.last()?.timestamp))
    }

    /// Total records per kind across all frames.
    pub fn record_counts(&self) -> RecordCounts {
        let mut counts = RecordCounts::default();
        for entry in &self.entries {
            counts.point_clouds += entry.point_cloud.is_some() as usize;
            counts.ir_images += entry.ir_image.is_some() as usize;
            counts.time_metas += entry.time_meta.is_some() as usize;
        }
        counts
    }
}

/// Per-kind record totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub point_clouds: usize,
    pub ir_images: usize,
    pub time_metas: usize,
}

/// A record excluded from the index because its payload was malformed.
#[derive(Debug)]
pub struct SkippedRecord {
    pub record_offset: u64,
    pub kind: RecordKind,
    pub sequence_number: u64,
    pub error: Pc5Error,
}

/// Result of an index build.
///
/// A report whose build halted early still carries a usable index over the
/// prefix of the container; [`is_complete`](Self::is_complete) tells the two
/// apart.
#[derive(Debug)]
pub struct IndexReport {
    index: FrameIndex,
    halt: Option<Pc5Error>,
    skipped: Vec<SkippedRecord>,
    records_scanned: usize,
}

impl IndexReport {
    pub fn index(&self) -> &FrameIndex {
        &self.index
    }

    /// True when the pass reached the end of the container.
    pub fn is_complete(&self) -> bool {
        self.halt.is_none()
    }

    /// The error that halted the pass, if any.
    pub fn error(&self) -> Option<&Pc5Error> {
        self.halt.as_ref()
    }

    /// Offset at which the pass halted.
    pub fn halt_offset(&self) -> Option<u64> {
        self.halt.as_ref().and_then(Pc5Error::offset)
    }

    /// Records dropped for payload-level errors.
    pub fn skipped(&self) -> &[SkippedRecord] {
        &self.skipped
    }

    /// Record headers successfully parsed, including skipped records.
    pub fn records_scanned(&self) -> usize {
        self.records_scanned
    }

    /// Converts a halted build into its error, for callers that refuse
    /// partial indexes.
    pub fn into_complete(self) -> Result<FrameIndex> {
        match self.halt {
            None => Ok(self.index),
            Some(err) => Err(err),
        }
    }

    pub fn into_parts(self) -> (FrameIndex, Option<Pc5Error>, Vec<SkippedRecord>) {
        (self.index, self.halt, self.skipped)
    }
}

/// Builds the frame index for a whole container.
pub fn build_index(data: &[u8]) -> IndexReport {
    IndexBuilder::new(data).build()
}

/// Single-pass index builder.
#[derive(Debug)]
pub struct IndexBuilder<'a> {
    cursor: Cursor<'a>,
    entries: Vec<IndexEntry>,
    current: Option<IndexEntry>,
    skipped: Vec<SkippedRecord>,
    records_scanned: usize,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            entries: Vec::new(),
            current: None,
            skipped: Vec::new(),
            records_scanned: 0,
        }
    }

    /// Runs the pass to the end of the container or the first fatal error.
    pub fn build(mut self) -> IndexReport {
        let halt = loop {
            if self.cursor.at_end() {
                break None;
            }
            if let Err(err) = self.step() {
                break Some(err);
            }
        };

        if let Some(entry) = self.current.take() {
            self.entries.push(entry);
        }

        match &halt {
            None => debug!(
                "indexed {} frames from {} records ({} skipped)",
                self.entries.len(),
                self.records_scanned,
                self.skipped.len()
            ),
            Some(err) => warn!(
                "index build halted, {} frames usable: {}",
                self.entries.len(),
                err
            ),
        }

        IndexReport {
            index: FrameIndex {
                entries: self.entries,
            },
            halt,
            skipped: self.skipped,
            records_scanned: self.records_scanned,
        }
    }

    /// Indexes one record. Errors returned here are fatal to the pass.
    fn step(&mut self) -> Result<()> {
        let record_offset = self.cursor.position();
        let start = self.cursor.clone();
        let header = match parse_record_header(&mut self.cursor) {
            Ok(header) => header,
            Err(err) => {
                self.discard_cut_frame(&start);
                return Err(err);
            }
        };
        self.records_scanned += 1;

        let payload_offset = self.cursor.position();
        let payload = self.cursor.read_exact(header.payload_length as usize)?;
        trace!(
            "{} record seq={} t={} at offset {} ({} bytes)",
            header.kind,
            header.sequence_number,
            header.timestamp,
            record_offset,
            header.payload_length
        );

        // Ordering is checked on the header alone, malformed payload or not
        self.check_order(record_offset, &header)?;

        if let Err(err) = inspect_payload(header.kind, payload) {
            let err = err.rebase(payload_offset);
            warn!(
                "skipping {} record seq={} at offset {}: {}",
                header.kind, header.sequence_number, record_offset, err
            );
            self.skipped.push(SkippedRecord {
                record_offset,
                kind: header.kind,
                sequence_number: header.sequence_number,
                error: err,
            });
            return Ok(());
        }

        let location = RecordLocation {
            record_offset,
            payload_offset,
            payload_length: header.payload_length,
        };
        self.merge(record_offset, &header, location)
    }

    /// Drops the open frame when the record that stopped the pass belongs
    /// to it.
    fn discard_cut_frame(&mut self, start: &Cursor<'_>) {
        let cut = peek_sequence_number(start);
        if let Some(entry) = &self.current {
            if cut == Some(entry.sequence_number) {
                warn!(
                    "dropping frame {}: one of its records is cut short at offset {}",
                    entry.sequence_number,
                    start.position()
                );
                self.current = None;
            }
        }
    }

    /// Rejects a record whose sequence number goes back, or which opens a
    /// frame earlier in time than the open one. The open frame stays valid.
    fn check_order(&self, record_offset: u64, header: &RecordHeader) -> Result<()> {
        let Some(entry) = &self.current else {
            return Ok(());
        };
        let reason = if header.sequence_number < entry.sequence_number {
            format!("sequence number went back from {}", entry.sequence_number)
        } else if header.sequence_number > entry.sequence_number
            && header.timestamp < entry.timestamp
        {
            format!(
                "timestamp went back from {} (sequence {}) to {}",
                entry.timestamp, entry.sequence_number, header.timestamp
            )
        } else {
            return Ok(());
        };
        Err(Pc5Error::IndexConsistency {
            offset: record_offset,
            sequence: header.sequence_number,
            reason,
        })
    }

    /// Adds a record to the frame in progress or starts a new one.
    fn merge(
        &mut self,
        record_offset: u64,
        header: &RecordHeader,
        location: RecordLocation,
    ) -> Result<()> {
        let inconsistency = |reason: String| Pc5Error::IndexConsistency {
            offset: record_offset,
            sequence: header.sequence_number,
            reason,
        };

        if let Some(mut entry) = self.current.take() {
            if header.sequence_number == entry.sequence_number {
                // A frame whose records disagree is dropped as a whole
                if header.timestamp != entry.timestamp {
                    return Err(inconsistency(format!(
                        "timestamp {} disagrees with frame timestamp {}",
                        header.timestamp, entry.timestamp
                    )));
                }
                let slot = entry.slot_mut(header.kind);
                if slot.is_some() {
                    return Err(inconsistency(format!(
                        "second {} record in one frame",
                        header.kind
                    )));
                }
                *slot = Some(location);
                self.current = Some(entry);
                return Ok(());
            }
            self.entries.push(entry);
        }

        self.current = Some(IndexEntry::new(header, location));
        Ok(())
    }
}

/// Checks a payload's structure against its length without decoding it.
fn inspect_payload(kind: RecordKind, payload: &[u8]) -> Result<()> {
    match kind {
        RecordKind::PointCloud => inspect_point_cloud(payload).map(|_| ()),
        RecordKind::IrImage => inspect_ir_image(payload).map(|_| ()),
        RecordKind::TimeMeta => decode_time_meta(payload).map(|_| ()),
    }
}
