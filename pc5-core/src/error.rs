//! Error type shared by the cursor, decoders, index builder and reader.

use crate::types::RecordKind;
use thiserror::Error;

/// Errors that can occur while reading a `.pc5` container.
#[derive(Error, Debug)]
pub enum Pc5Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes remain than a header or payload needs.
    #[error("truncated at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("seek to offset {offset} is beyond container length {len}")]
    OutOfRange { offset: u64, len: u64 },

    /// Unrecognised framing tag. Nothing past this offset can be trusted.
    #[error("unknown record kind {tag:02x?} at offset {offset}")]
    UnknownRecordKind { offset: u64, tag: [u8; 4] },

    #[error("malformed point cloud at offset {offset}: {reason}")]
    MalformedPointCloud { offset: u64, reason: String },

    #[error("malformed IR image at offset {offset}: {reason}")]
    MalformedImage { offset: u64, reason: String },

    #[error("malformed time metadata at offset {offset}: {reason}")]
    MalformedTimeMeta { offset: u64, reason: String },

    #[error("index consistency error at offset {offset} (sequence {sequence}): {reason}")]
    IndexConsistency {
        offset: u64,
        sequence: u64,
        reason: String,
    },

    /// An encoded payload does not fit the header's `u32` length field.
    #[error("{kind} payload of {length} bytes exceeds the record size limit")]
    PayloadTooLarge { kind: RecordKind, length: u64 },

    #[error("frame with sequence number {0} not found")]
    FrameNotFound(u64),

    #[error("frame position {position} out of range (index holds {count} frames)")]
    FrameIndexOutOfRange { position: usize, count: usize },

    #[error("no frame at or before timestamp {0}")]
    NoFrameAtOrBefore(u64),
}

impl Pc5Error {
    /// Payload-level errors only invalidate a single record; the header
    /// length is still trusted so parsing can resume at the next record.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedPointCloud { .. }
                | Self::MalformedImage { .. }
                | Self::MalformedTimeMeta { .. }
        )
    }

    /// Byte offset the error refers to, if it is a parse-time error.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::Truncated { offset, .. }
            | Self::OutOfRange { offset, .. }
            | Self::UnknownRecordKind { offset, .. }
            | Self::MalformedPointCloud { offset, .. }
            | Self::MalformedImage { offset, .. }
            | Self::MalformedTimeMeta { offset, .. }
            | Self::IndexConsistency { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// Shifts the offset of a parse-time error by `base`.
    ///
    /// Payload decoders report offsets relative to the payload start; the
    /// index builder rebases them onto container offsets.
    pub(crate) fn rebase(mut self, base: u64) -> Self {
        match &mut self {
            Self::Truncated { offset, .. }
            | Self::OutOfRange { offset, .. }
            | Self::UnknownRecordKind { offset, .. }
            | Self::MalformedPointCloud { offset, .. }
            | Self::MalformedImage { offset, .. }
            | Self::MalformedTimeMeta { offset, .. }
            | Self::IndexConsistency { offset, .. } => *offset += base,
            _ => {}
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, Pc5Error>;
