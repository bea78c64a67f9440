//! Record framing for the `.pc5` container.
//!
//! Every record starts with a fixed 24-byte little-endian header:
//!
//! ```text
//! ┌──────────┬──────────────┬──────────────┬──────────────┐
//! │ tag [4]  │ payload:u32  │ sequence:u64 │ timestamp:u64│
//! │ 4B       │ 4B           │ 8B           │ 8B           │
//! └──────────┴──────────────┴──────────────┴──────────────┘
//! ```
//!
//! followed by `payload` bytes. There is no file header and no table of
//! contents; records are simply appended.

use crate::cursor::Cursor;
use crate::error::{Pc5Error, Result};
use crate::types::{RecordHeader, RecordKind};

/// Size of a record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 24;

/// Size of the point-cloud payload prefix (`count:u32`, `layout:u8`).
pub const POINT_CLOUD_PREFIX_SIZE: usize = 5;

/// Size of the IR payload header (`width:u32`, `height:u32`, `format:u8`).
pub const IR_IMAGE_HEADER_SIZE: usize = 9;

/// Size of a `TIME` payload (`host_time_ns:u64`).
pub const TIME_META_SIZE: usize = 8;

/// Parses one record header at the cursor position.
///
/// On success the cursor sits on the first payload byte. An unknown tag is
/// reported without consuming a length: framing past it cannot be trusted.
pub fn parse_record_header(cursor: &mut Cursor<'_>) -> Result<RecordHeader> {
    let offset = cursor.position();
    if cursor.remaining() < RECORD_HEADER_SIZE as u64 {
        return Err(Pc5Error::Truncated {
            offset,
            needed: RECORD_HEADER_SIZE as u64,
            available: cursor.remaining(),
        });
    }

    let tag = cursor.read_tag()?;
    let kind = RecordKind::from_tag(tag).ok_or(Pc5Error::UnknownRecordKind { offset, tag })?;
    let payload_length = cursor.read_u32()?;
    let sequence_number = cursor.read_u64()?;
    let timestamp = cursor.read_u64()?;

    // Payloads are never empty
    if payload_length == 0 || payload_length as u64 > cursor.remaining() {
        return Err(Pc5Error::Truncated {
            offset,
            needed: RECORD_HEADER_SIZE as u64 + (payload_length as u64).max(1),
            available: RECORD_HEADER_SIZE as u64 + cursor.remaining(),
        });
    }

    Ok(RecordHeader {
        kind,
        payload_length,
        sequence_number,
        timestamp,
    })
}

/// Reads the sequence number of the record at the cursor without moving it.
///
/// Works on a record whose payload is cut short; `None` if the header itself
/// is short or carries an unknown tag.
pub fn peek_sequence_number(cursor: &Cursor<'_>) -> Option<u64> {
    let mut ahead = cursor.clone();
    RecordKind::from_tag(ahead.read_tag().ok()?)?;
    ahead.read_u32().ok()?;
    ahead.read_u64().ok()
}

/// Converts an encoded payload size into the header's length field.
pub fn checked_payload_length(kind: RecordKind, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Pc5Error::PayloadTooLarge {
        kind,
        length: len as u64,
    })
}

/// Serialises a record header.
pub fn encode_record_header(header: &RecordHeader) -> [u8; RECORD_HEADER_SIZE] {
    let mut buf = [0u8; RECORD_HEADER_SIZE];
    buf[0..4].copy_from_slice(&header.kind.tag());
    buf[4..8].copy_from_slice(&header.payload_length.to_le_bytes());
    buf[8..16].copy_from_slice(&header.sequence_number.to_le_bytes());
    buf[16..24].copy_from_slice(&header.timestamp.to_le_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(tag: &[u8; 4], len: u32, seq: u64, ts: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(tag);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&seq.to_le_bytes());
        buf.extend_from_slice(&ts.to_le_bytes());
        buf
    }

    #[test]
    fn test_parse_header() {
        let mut data = header_bytes(b"TIME", 8, 7, 1_000);
        data.extend_from_slice(&[0u8; 8]);

        let mut cursor = Cursor::new(&data);
        let header = parse_record_header(&mut cursor).unwrap();
        assert_eq!(header.kind, RecordKind::TimeMeta);
        assert_eq!(header.payload_length, 8);
        assert_eq!(header.sequence_number, 7);
        assert_eq!(header.timestamp, 1_000);
        assert_eq!(cursor.position(), RECORD_HEADER_SIZE as u64);
    }

    #[test]
    fn test_header_encode_matches_layout() {
        let header = RecordHeader {
            kind: RecordKind::PointCloud,
            payload_length: 17,
            sequence_number: 3,
            timestamp: 99,
        };
        assert_eq!(
            encode_record_header(&header).to_vec(),
            header_bytes(b"PCLD", 17, 3, 99)
        );
    }

    #[test]
    fn test_unknown_tag() {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&header_bytes(b"ZZZZ", 8, 0, 0));
        data.extend_from_slice(&[0u8; 8]);

        let mut cursor = Cursor::new(&data);
        cursor.seek(16).unwrap();
        match parse_record_header(&mut cursor) {
            Err(Pc5Error::UnknownRecordKind { offset, tag }) => {
                assert_eq!(offset, 16);
                assert_eq!(&tag, b"ZZZZ");
            }
            other => panic!("expected UnknownRecordKind, got {:?}", other),
        }
    }

    #[test]
    fn test_short_header_is_truncated() {
        let data = header_bytes(b"TIME", 8, 0, 0);
        let mut cursor = Cursor::new(&data[..10]);
        assert!(matches!(
            parse_record_header(&mut cursor),
            Err(Pc5Error::Truncated { offset: 0, .. })
        ));
    }

    #[test]
    fn test_payload_longer_than_file_is_truncated() {
        let mut data = header_bytes(b"PCLD", 100, 0, 0);
        data.extend_from_slice(&[0u8; 40]);
        let mut cursor = Cursor::new(&data);
        assert!(matches!(
            parse_record_header(&mut cursor),
            Err(Pc5Error::Truncated { offset: 0, .. })
        ));
    }

    #[test]
    fn test_zero_payload_is_rejected() {
        let data = header_bytes(b"TIME", 0, 0, 0);
        let mut cursor = Cursor::new(&data);
        assert!(matches!(
            parse_record_header(&mut cursor),
            Err(Pc5Error::Truncated { .. })
        ));
    }

    #[test]
    fn test_peek_sequence_of_cut_record() {
        let mut data = header_bytes(b"PCLD", 100, 42, 0);
        data.extend_from_slice(&[0u8; 40]);
        let cursor = Cursor::new(&data);
        assert_eq!(peek_sequence_number(&cursor), Some(42));
        assert_eq!(cursor.position(), 0);

        assert_eq!(peek_sequence_number(&Cursor::new(&data[..12])), None);
        let unknown = header_bytes(b"ZZZZ", 8, 42, 0);
        assert_eq!(peek_sequence_number(&Cursor::new(&unknown)), None);
    }

    #[test]
    fn test_payload_length_limit() {
        assert_eq!(checked_payload_length(RecordKind::TimeMeta, 8).unwrap(), 8);
        assert_eq!(
            checked_payload_length(RecordKind::IrImage, u32::MAX as usize).unwrap(),
            u32::MAX
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_payload_length_overflow() {
        let len = u32::MAX as usize + 1;
        match checked_payload_length(RecordKind::PointCloud, len) {
            Err(Pc5Error::PayloadTooLarge { kind, length }) => {
                assert_eq!(kind, RecordKind::PointCloud);
                assert_eq!(length, len as u64);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
    }
}
