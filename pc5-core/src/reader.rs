//! Indexed random access to a `.pc5` container.
//!
//! [`Pc5Reader`] maps the container read-only and builds its
//! [`FrameIndex`] lazily on the first query (or on an explicit
//! [`build_index`](Pc5Reader::build_index) call). Every query decodes only
//! the records of the requested frame, using a fresh cursor positioned at
//! the indexed offsets.

use crate::cursor::Cursor;
use crate::decoder::{decode_ir_image, decode_point_cloud, decode_time_meta};
use crate::error::{Pc5Error, Result};
use crate::index::{build_index, FrameIndex, IndexEntry, IndexReport, RecordLocation};
use crate::types::Frame;
use log::{debug, warn};
use memmap2::Mmap;
use std::fs::File;
use std::iter::FusedIterator;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Container bytes, either mapped from disk or owned in memory.
enum Source {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Source {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Owned(bytes) => bytes,
        }
    }
}

/// Reader over one container.
///
/// The reader is `Send + Sync`: the mapped bytes and the built index are
/// immutable, and concurrent first queries serialise on the one-time build.
pub struct Pc5Reader {
    path: Option<PathBuf>,
    source: Source,
    report: OnceLock<IndexReport>,
}

impl std::fmt::Debug for Pc5Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pc5Reader")
            .field("path", &self.path)
            .field("len", &self.source.len())
            .field("indexed", &self.report.get().is_some())
            .finish()
    }
}

impl Pc5Reader {
    /// Opens a container without indexing it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        // Zero-length files cannot be mapped on every platform
        let source = if len == 0 {
            Source::Owned(Vec::new())
        } else {
            // SAFETY: the container is treated as immutable input; the map is
            // read-only and never handed out beyond the reader's lifetime.
            Source::Mapped(unsafe { Mmap::map(&file)? })
        };
        debug!("opened {:?} ({} bytes)", path, len);

        Ok(Self {
            path: Some(path.to_path_buf()),
            source,
            report: OnceLock::new(),
        })
    }

    /// Wraps an in-memory container.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            path: None,
            source: Source::Owned(data),
            report: OnceLock::new(),
        }
    }

    /// Path the reader was opened from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Container length in bytes.
    pub fn len(&self) -> u64 {
        self.source.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Builds the index if needed and returns the build report.
    ///
    /// Idempotent: later calls return the cached report. A halted build is
    /// cached too; callers that cannot work with a prefix should check
    /// [`IndexReport::is_complete`].
    pub fn build_index(&self) -> &IndexReport {
        self.report.get_or_init(|| {
            let report = build_index(&self.source);
            if let Some(err) = report.error() {
                warn!(
                    "{}: index is partial ({} frames): {}",
                    self.display_name(),
                    report.index().len(),
                    err
                );
            }
            report
        })
    }

    /// The frame index, built on first use.
    pub fn index(&self) -> &FrameIndex {
        self.build_index().index()
    }

    /// Number of indexed frames.
    pub fn frame_count(&self) -> usize {
        self.index().len()
    }

    /// `(sequence_number, timestamp)` for every indexed frame, in order.
    pub fn timestamps(&self) -> impl ExactSizeIterator<Item = (u64, u64)> + '_ {
        self.index()
            .entries()
            .iter()
            .map(|e| (e.sequence_number, e.timestamp))
    }

    /// Sequence numbers of every indexed frame, ascending.
    pub fn sequence_numbers(&self) -> impl ExactSizeIterator<Item = u64> + '_ {
        self.index().entries().iter().map(|e| e.sequence_number)
    }

    /// `(sequence_number, host_time_ns)` for every frame that has a timing
    /// record, in order. Only the `TIME` payloads are decoded.
    pub fn host_times(&self) -> impl Iterator<Item = Result<(u64, u64)>> + '_ {
        self.index().entries().iter().filter_map(move |entry| {
            let loc = entry.time_meta?;
            let mut cursor = Cursor::new(&self.source);
            let meta = read_payload(&mut cursor, loc).and_then(|payload| {
                decode_time_meta(payload).map_err(|e| e.rebase(loc.payload_offset))
            });
            Some(meta.map(|m| (entry.sequence_number, m.host_time_ns)))
        })
    }

    /// Decodes the frame with the given sequence number.
    pub fn get_frame(&self, sequence_number: u64) -> Result<Frame> {
        let entry = self
            .index()
            .find(sequence_number)
            .ok_or(Pc5Error::FrameNotFound(sequence_number))?;
        decode_entry(&self.source, entry)
    }

    /// Decodes the frame at a 0-based position in the index.
    pub fn get_frame_at(&self, position: usize) -> Result<Frame> {
        let index = self.index();
        let entry = index.get(position).ok_or(Pc5Error::FrameIndexOutOfRange {
            position,
            count: index.len(),
        })?;
        decode_entry(&self.source, entry)
    }

    /// Decodes the latest frame whose timestamp is at or before `timestamp`.
    pub fn get_frame_by_timestamp(&self, timestamp: u64) -> Result<Frame> {
        let entry = self
            .index()
            .at_or_before(timestamp)
            .ok_or(Pc5Error::NoFrameAtOrBefore(timestamp))?;
        decode_entry(&self.source, entry)
    }

    /// Decodes an entry of this reader's index.
    pub fn decode(&self, entry: &IndexEntry) -> Result<Frame> {
        decode_entry(&self.source, entry)
    }

    /// Iterates all frames in ascending sequence order, decoding each on
    /// demand. Each call starts an independent pass.
    pub fn iter_frames(&self) -> FrameIter<'_> {
        FrameIter {
            data: &self.source,
            entries: self.index().entries().iter(),
        }
    }

    /// Releases the mapping and the cached index.
    pub fn close(self) {
        debug!("closing {}", self.display_name());
    }

    fn display_name(&self) -> String {
        self.path
            .as_ref()
            .map_or_else(|| "<memory>".to_string(), |p| p.display().to_string())
    }
}

/// Lazy iterator over decoded frames.
#[derive(Debug, Clone)]
pub struct FrameIter<'a> {
    data: &'a [u8],
    entries: std::slice::Iter<'a, IndexEntry>,
}

impl Iterator for FrameIter<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries
            .next()
            .map(|entry| decode_entry(self.data, entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for FrameIter<'_> {}

impl FusedIterator for FrameIter<'_> {}

fn read_payload<'a>(cursor: &mut Cursor<'a>, location: RecordLocation) -> Result<&'a [u8]> {
    cursor.seek(location.payload_offset)?;
    cursor.read_exact(location.payload_length as usize)
}

/// Decodes every record an index entry points at.
fn decode_entry(data: &[u8], entry: &IndexEntry) -> Result<Frame> {
    let mut cursor = Cursor::new(data);

    let point_cloud = match entry.point_cloud {
        Some(loc) => Some(
            decode_point_cloud(read_payload(&mut cursor, loc)?)
                .map_err(|e| e.rebase(loc.payload_offset))?,
        ),
        None => None,
    };
    let ir_image = match entry.ir_image {
        Some(loc) => Some(
            decode_ir_image(read_payload(&mut cursor, loc)?)
                .map_err(|e| e.rebase(loc.payload_offset))?,
        ),
        None => None,
    };
    let time_meta = match entry.time_meta {
        Some(loc) => Some(
            decode_time_meta(read_payload(&mut cursor, loc)?)
                .map_err(|e| e.rebase(loc.payload_offset))?,
        ),
        None => None,
    };

    Ok(Frame {
        sequence_number: entry.sequence_number,
        timestamp: entry.timestamp,
        point_cloud,
        ir_image,
        time_meta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Point, PointCloud, PointLayout, TimeMeta};
    use crate::writer::ContainerWriter;

    fn sample_container() -> Vec<u8> {
        let mut w = ContainerWriter::new(Vec::new());
        w.write_time_meta(0, 100, &TimeMeta { host_time_ns: 105 })
            .unwrap();
        let cloud = PointCloud {
            layout: PointLayout::XyzF32,
            points: vec![
                Point::xyz(1.0, 0.0, 0.0),
                Point::xyz(0.0, 1.0, 0.0),
                Point::xyz(0.0, 0.0, 1.0),
            ],
        };
        w.write_point_cloud(0, 100, &cloud).unwrap();
        w.write_time_meta(1, 250, &TimeMeta { host_time_ns: 255 })
            .unwrap();
        w.into_inner().unwrap()
    }

    #[test]
    fn test_lazy_index() {
        let reader = Pc5Reader::from_bytes(sample_container());
        assert!(reader.report.get().is_none());
        assert_eq!(reader.frame_count(), 2);
        assert!(reader.report.get().is_some());
    }

    #[test]
    fn test_get_frame() {
        let reader = Pc5Reader::from_bytes(sample_container());
        let frame = reader.get_frame(0).unwrap();
        assert_eq!(frame.timestamp, 100);
        assert_eq!(frame.point_count(), 3);
        assert_eq!(frame.time_meta, Some(TimeMeta { host_time_ns: 105 }));
        assert!(frame.ir_image.is_none());

        assert!(matches!(
            reader.get_frame(7),
            Err(Pc5Error::FrameNotFound(7))
        ));
    }

    #[test]
    fn test_get_frame_by_timestamp() {
        let reader = Pc5Reader::from_bytes(sample_container());
        assert_eq!(reader.get_frame_by_timestamp(200).unwrap().sequence_number, 0);
        assert_eq!(reader.get_frame_by_timestamp(250).unwrap().sequence_number, 1);
        assert!(matches!(
            reader.get_frame_by_timestamp(99),
            Err(Pc5Error::NoFrameAtOrBefore(99))
        ));
    }

    #[test]
    fn test_get_frame_at() {
        let reader = Pc5Reader::from_bytes(sample_container());
        assert_eq!(reader.get_frame_at(1).unwrap().sequence_number, 1);
        assert!(matches!(
            reader.get_frame_at(2),
            Err(Pc5Error::FrameIndexOutOfRange {
                position: 2,
                count: 2
            })
        ));
    }

    #[test]
    fn test_iter_is_restartable() {
        let reader = Pc5Reader::from_bytes(sample_container());
        let mut first = reader.iter_frames();
        assert_eq!(first.len(), 2);
        first.next().unwrap().unwrap();

        // A second pass is independent of the first
        let seqs: Vec<u64> = reader
            .iter_frames()
            .map(|f| f.unwrap().sequence_number)
            .collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(first.next().unwrap().unwrap().sequence_number, 1);
        assert!(first.next().is_none());
    }

    #[test]
    fn test_timestamps() {
        let reader = Pc5Reader::from_bytes(sample_container());
        let ts: Vec<(u64, u64)> = reader.timestamps().collect();
        assert_eq!(ts, vec![(0, 100), (1, 250)]);
        assert_eq!(reader.sequence_numbers().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_host_times_skip_frames_without_timing() {
        let mut w = ContainerWriter::new(Vec::new());
        w.write_time_meta(0, 100, &TimeMeta { host_time_ns: 105 })
            .unwrap();
        w.write_point_cloud(1, 200, &PointCloud {
            layout: PointLayout::XyzF32,
            points: vec![Point::xyz(1.0, 0.0, 0.0)],
        })
        .unwrap();
        w.write_time_meta(2, 300, &TimeMeta { host_time_ns: 310 })
            .unwrap();
        let reader = Pc5Reader::from_bytes(w.into_inner().unwrap());

        let times: Vec<(u64, u64)> = reader.host_times().map(|r| r.unwrap()).collect();
        assert_eq!(times, vec![(0, 105), (2, 310)]);
    }

    #[test]
    fn test_reader_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Pc5Reader>();
        assert_send_sync::<FrameIndex>();
    }
}
