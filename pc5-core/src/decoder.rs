//! Payload decoders for point-cloud, IR image and timing records.
//!
//! Each decoder comes in two flavours: `inspect_*` validates the payload's
//! declared structure against its length without touching the body, and
//! `decode_*` produces the owned value. The index builder only inspects;
//! the reader decodes on demand.
//!
//! Error offsets are relative to the start of the payload.

use crate::cursor::Cursor;
use crate::error::{Pc5Error, Result};
use crate::parser::{IR_IMAGE_HEADER_SIZE, POINT_CLOUD_PREFIX_SIZE, TIME_META_SIZE};
use crate::types::{
    IrImage, PixelFormat, Point, PointCloud, PointLayout, Position, RecordKind, TimeMeta,
};

/// Prefix of a point-cloud payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointCloudInfo {
    pub count: u32,
    pub layout: PointLayout,
}

/// Header of an IR image payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl IrImageInfo {
    /// Pixel buffer size the header declares, if it fits in `usize`.
    pub fn buffer_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.format.bytes_per_pixel())
    }
}

fn malformed_cloud(offset: u64, reason: impl Into<String>) -> Pc5Error {
    Pc5Error::MalformedPointCloud {
        offset,
        reason: reason.into(),
    }
}

fn malformed_image(offset: u64, reason: impl Into<String>) -> Pc5Error {
    Pc5Error::MalformedImage {
        offset,
        reason: reason.into(),
    }
}

// ============================================================================
// Point cloud
// Prefix: count:u32 | layout:u8, then `count` records of `layout.stride()`
// ============================================================================

/// Validates a point-cloud payload's prefix and total size.
pub fn inspect_point_cloud(payload: &[u8]) -> Result<PointCloudInfo> {
    if payload.len() < POINT_CLOUD_PREFIX_SIZE {
        return Err(malformed_cloud(
            0,
            format!(
                "payload of {} bytes is shorter than the {}-byte prefix",
                payload.len(),
                POINT_CLOUD_PREFIX_SIZE
            ),
        ));
    }

    let mut cursor = Cursor::new(payload);
    let count = cursor.read_u32()?;
    let layout_tag = cursor.read_u8()?;
    let layout = PointLayout::from_u8(layout_tag)
        .ok_or_else(|| malformed_cloud(4, format!("unknown point layout {}", layout_tag)))?;

    let expected = (count as usize)
        .checked_mul(layout.stride())
        .and_then(|body| body.checked_add(POINT_CLOUD_PREFIX_SIZE));
    if expected != Some(payload.len()) {
        return Err(malformed_cloud(
            0,
            format!(
                "{} points of {} bytes do not fill a {}-byte payload",
                count,
                layout.stride(),
                payload.len()
            ),
        ));
    }

    Ok(PointCloudInfo { count, layout })
}

/// Decodes a point-cloud payload into points in scan order.
///
/// Size agreement is strict: either every declared point is decoded or the
/// whole payload is rejected.
pub fn decode_point_cloud(payload: &[u8]) -> Result<PointCloud> {
    let info = inspect_point_cloud(payload)?;
    let mut cursor = Cursor::new(payload);
    cursor.seek(POINT_CLOUD_PREFIX_SIZE as u64)?;

    let mut points = Vec::with_capacity(info.count as usize);
    for _ in 0..info.count {
        points.push(read_point(&mut cursor, info.layout)?);
    }

    Ok(PointCloud {
        layout: info.layout,
        points,
    })
}

#[inline]
fn read_point(cursor: &mut Cursor<'_>, layout: PointLayout) -> Result<Point> {
    let position = match layout {
        PointLayout::XyzF32 | PointLayout::XyzirF32 => Position::Float([
            cursor.read_f32()?,
            cursor.read_f32()?,
            cursor.read_f32()?,
        ]),
        PointLayout::XyzirI32 => Position::Fixed([
            cursor.read_i32()?,
            cursor.read_i32()?,
            cursor.read_i32()?,
        ]),
    };

    let (intensity, return_index) = if layout.has_attributes() {
        (Some(cursor.read_u16()?), Some(cursor.read_u8()?))
    } else {
        (None, None)
    };

    Ok(Point {
        position,
        intensity,
        return_index,
    })
}

/// Encoded payload size of `count` points, checked against the record
/// size limit.
pub fn point_cloud_payload_len(count: usize, layout: PointLayout) -> Result<u32> {
    let len = (count as u64)
        .checked_mul(layout.stride() as u64)
        .and_then(|n| n.checked_add(POINT_CLOUD_PREFIX_SIZE as u64))
        .unwrap_or(u64::MAX);
    u32::try_from(len).map_err(|_| Pc5Error::PayloadTooLarge {
        kind: RecordKind::PointCloud,
        length: len,
    })
}

/// Encodes a point cloud with its own layout.
///
/// `decode_point_cloud(&encode_point_cloud(&c)?)` yields `c`, and encoding a
/// decoded payload reproduces the original bytes. Points whose position or
/// attributes do not fit the layout are rejected.
pub fn encode_point_cloud(cloud: &PointCloud) -> Result<Vec<u8>> {
    let len = point_cloud_payload_len(cloud.points.len(), cloud.layout)?;
    // Bounded by the payload length
    let count = cloud.points.len() as u32;
    let stride = cloud.layout.stride();
    let mut buf = Vec::with_capacity(len as usize);
    buf.extend_from_slice(&count.to_le_bytes());
    buf.push(cloud.layout as u8);

    for (i, point) in cloud.points.iter().enumerate() {
        let offset = (POINT_CLOUD_PREFIX_SIZE + i * stride) as u64;
        match (cloud.layout, point.position) {
            (PointLayout::XyzF32 | PointLayout::XyzirF32, Position::Float(xyz)) => {
                for v in xyz {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
            }
            (PointLayout::XyzirI32, Position::Fixed(xyz)) => {
                for v in xyz {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
            }
            _ => {
                return Err(malformed_cloud(
                    offset,
                    format!("point {} does not match layout {:?}", i, cloud.layout),
                ))
            }
        }

        if cloud.layout.has_attributes() {
            buf.extend_from_slice(&point.intensity.unwrap_or(0).to_le_bytes());
            buf.push(point.return_index.unwrap_or(0));
        }
    }

    Ok(buf)
}

// ============================================================================
// IR image
// Header: width:u32 | height:u32 | format:u8, then the row-major buffer
// ============================================================================

/// Validates an IR payload's header against its size.
pub fn inspect_ir_image(payload: &[u8]) -> Result<IrImageInfo> {
    if payload.len() < IR_IMAGE_HEADER_SIZE {
        return Err(malformed_image(
            0,
            format!(
                "payload of {} bytes is shorter than the {}-byte header",
                payload.len(),
                IR_IMAGE_HEADER_SIZE
            ),
        ));
    }

    let mut cursor = Cursor::new(payload);
    let width = cursor.read_u32()?;
    let height = cursor.read_u32()?;
    let format_tag = cursor.read_u8()?;

    if width == 0 || height == 0 {
        return Err(malformed_image(
            0,
            format!("zero image dimension {}x{}", width, height),
        ));
    }
    let format = PixelFormat::from_u8(format_tag)
        .ok_or_else(|| malformed_image(8, format!("unknown pixel format {}", format_tag)))?;

    let info = IrImageInfo {
        width,
        height,
        format,
    };
    let actual = payload.len() - IR_IMAGE_HEADER_SIZE;
    match info.buffer_len() {
        Some(expected) if expected == actual => Ok(info),
        expected => Err(malformed_image(
            IR_IMAGE_HEADER_SIZE as u64,
            format!(
                "{}x{} {:?} needs {} bytes, buffer has {}",
                width,
                height,
                format,
                expected.map_or_else(|| "overflowing".to_string(), |n| n.to_string()),
                actual
            ),
        )),
    }
}

/// Decodes an IR payload; the returned image owns a copy of the pixels.
pub fn decode_ir_image(payload: &[u8]) -> Result<IrImage> {
    let info = inspect_ir_image(payload)?;
    Ok(IrImage {
        width: info.width,
        height: info.height,
        format: info.format,
        data: payload[IR_IMAGE_HEADER_SIZE..].to_vec(),
    })
}

/// Encodes an IR image. The buffer size must match the dimensions.
pub fn encode_ir_image(image: &IrImage) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(IR_IMAGE_HEADER_SIZE + image.data.len());
    buf.extend_from_slice(&image.width.to_le_bytes());
    buf.extend_from_slice(&image.height.to_le_bytes());
    buf.push(image.format as u8);
    buf.extend_from_slice(&image.data);
    inspect_ir_image(&buf)?;
    Ok(buf)
}

// ============================================================================
// Time metadata
// Payload: host_time_ns:u64
// ============================================================================

/// Decodes a `TIME` payload.
pub fn decode_time_meta(payload: &[u8]) -> Result<TimeMeta> {
    if payload.len() != TIME_META_SIZE {
        return Err(Pc5Error::MalformedTimeMeta {
            offset: 0,
            reason: format!(
                "expected {} bytes, payload has {}",
                TIME_META_SIZE,
                payload.len()
            ),
        });
    }
    let host_time_ns = Cursor::new(payload).read_u64()?;
    Ok(TimeMeta { host_time_ns })
}

/// Encodes a `TIME` payload.
pub fn encode_time_meta(meta: &TimeMeta) -> [u8; TIME_META_SIZE] {
    meta.host_time_ns.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud_payload(layout: u8, count: u32, body: &[u8]) -> Vec<u8> {
        let mut buf = count.to_le_bytes().to_vec();
        buf.push(layout);
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn test_decode_xyz_f32() {
        let mut body = Vec::new();
        for v in [1.0f32, 2.0, 3.0, -4.5, 0.25, 8.0] {
            body.extend_from_slice(&v.to_le_bytes());
        }
        let payload = cloud_payload(0, 2, &body);

        let cloud = decode_point_cloud(&payload).unwrap();
        assert_eq!(cloud.layout, PointLayout::XyzF32);
        assert_eq!(
            cloud.points,
            vec![Point::xyz(1.0, 2.0, 3.0), Point::xyz(-4.5, 0.25, 8.0)]
        );
    }

    #[test]
    fn test_decode_fixed_point_keeps_integers() {
        let mut body = Vec::new();
        for v in [1000i32, -2000, 30] {
            body.extend_from_slice(&v.to_le_bytes());
        }
        body.extend_from_slice(&200u16.to_le_bytes());
        body.push(1);
        let payload = cloud_payload(2, 1, &body);

        let cloud = decode_point_cloud(&payload).unwrap();
        let point = cloud.points[0];
        assert_eq!(point.position, Position::Fixed([1000, -2000, 30]));
        assert_eq!(point.intensity, Some(200));
        assert_eq!(point.return_index, Some(1));
    }

    #[test]
    fn test_point_cloud_size_mismatch() {
        // Declares 3 points but carries 2 and a half
        let payload = cloud_payload(0, 3, &[0u8; 30]);
        assert!(matches!(
            decode_point_cloud(&payload),
            Err(Pc5Error::MalformedPointCloud { .. })
        ));
        assert!(inspect_point_cloud(&payload).is_err());
    }

    #[test]
    fn test_point_cloud_unknown_layout() {
        let payload = cloud_payload(9, 0, &[]);
        assert!(matches!(
            inspect_point_cloud(&payload),
            Err(Pc5Error::MalformedPointCloud { offset: 4, .. })
        ));
    }

    #[test]
    fn test_point_cloud_short_prefix() {
        assert!(matches!(
            inspect_point_cloud(&[1, 0, 0]),
            Err(Pc5Error::MalformedPointCloud { .. })
        ));
    }

    #[test]
    fn test_point_cloud_round_trip_bytes() {
        let mut body = Vec::new();
        for (xyz, intensity, ret) in [([0.5f32, -1.25, 3.0], 17u16, 0u8), ([9.0, 8.0, 7.0], 255, 2)] {
            for v in xyz {
                body.extend_from_slice(&v.to_le_bytes());
            }
            body.extend_from_slice(&intensity.to_le_bytes());
            body.push(ret);
        }
        let payload = cloud_payload(1, 2, &body);

        let cloud = decode_point_cloud(&payload).unwrap();
        assert_eq!(encode_point_cloud(&cloud).unwrap(), payload);
    }

    #[test]
    fn test_encode_rejects_layout_mismatch() {
        let cloud = PointCloud {
            layout: PointLayout::XyzirI32,
            points: vec![Point::xyz(1.0, 2.0, 3.0)],
        };
        assert!(encode_point_cloud(&cloud).is_err());
    }

    fn image_payload(width: u32, height: u32, format: u8, pixels: &[u8]) -> Vec<u8> {
        let mut buf = width.to_le_bytes().to_vec();
        buf.extend_from_slice(&height.to_le_bytes());
        buf.push(format);
        buf.extend_from_slice(pixels);
        buf
    }

    #[test]
    fn test_point_cloud_payload_limit() {
        assert_eq!(point_cloud_payload_len(3, PointLayout::XyzF32).unwrap(), 41);

        // 300M fixed-point points: the count fits in u32, the payload does not
        match point_cloud_payload_len(300_000_000, PointLayout::XyzirI32) {
            Err(Pc5Error::PayloadTooLarge { kind, length }) => {
                assert_eq!(kind, RecordKind::PointCloud);
                assert_eq!(length, 4_500_000_005);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
        assert!(point_cloud_payload_len(usize::MAX, PointLayout::XyzF32).is_err());
    }

    #[test]
    fn test_decode_ir_image() {
        let pixels: Vec<u8> = (0..12).collect();
        let payload = image_payload(3, 2, 1, &pixels);

        let image = decode_ir_image(&payload).unwrap();
        assert_eq!(image.width, 3);
        assert_eq!(image.height, 2);
        assert_eq!(image.format, PixelFormat::Mono16);
        assert_eq!(image.data, pixels);
        assert_eq!(image.row(1).unwrap(), &pixels[6..12]);
        assert!(image.row(2).is_none());
        assert_eq!(encode_ir_image(&image).unwrap(), payload);
    }

    #[test]
    fn test_ir_image_buffer_mismatch() {
        let payload = image_payload(4, 4, 0, &[0u8; 15]);
        assert!(matches!(
            decode_ir_image(&payload),
            Err(Pc5Error::MalformedImage { offset: 9, .. })
        ));
    }

    #[test]
    fn test_ir_image_zero_dimension() {
        let payload = image_payload(0, 4, 0, &[]);
        assert!(matches!(
            inspect_ir_image(&payload),
            Err(Pc5Error::MalformedImage { .. })
        ));
    }

    #[test]
    fn test_ir_image_overflowing_dimensions() {
        let payload = image_payload(u32::MAX, u32::MAX, 2, &[0u8; 4]);
        assert!(inspect_ir_image(&payload).is_err());
    }

    #[test]
    fn test_time_meta() {
        let meta = TimeMeta {
            host_time_ns: 1_700_000_000_000_000_123,
        };
        assert_eq!(decode_time_meta(&encode_time_meta(&meta)).unwrap(), meta);
        assert!(matches!(
            decode_time_meta(&[0u8; 4]),
            Err(Pc5Error::MalformedTimeMeta { .. })
        ));
    }
}
