//! Core types for `.pc5` container data.
//!
//! This module defines the record kinds, decoded payload values and the
//! logical [`Frame`] that groups records sharing one sequence number.

/// The kind of a container record, identified by its 4-byte ASCII tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Point-cloud sweep (`PCLD`)
    PointCloud,
    /// Infrared raster image (`IRIM`)
    IrImage,
    /// Per-frame timing metadata (`TIME`)
    TimeMeta,
}

impl RecordKind {
    /// Attempts to parse a record kind from its framing tag.
    #[inline]
    pub fn from_tag(tag: [u8; 4]) -> Option<Self> {
        match &tag {
            b"PCLD" => Some(Self::PointCloud),
            b"IRIM" => Some(Self::IrImage),
            b"TIME" => Some(Self::TimeMeta),
            _ => None,
        }
    }

    /// The framing tag written for this kind.
    #[inline]
    pub fn tag(self) -> [u8; 4] {
        match self {
            Self::PointCloud => *b"PCLD",
            Self::IrImage => *b"IRIM",
            Self::TimeMeta => *b"TIME",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PointCloud => "point-cloud",
            Self::IrImage => "ir-image",
            Self::TimeMeta => "time-meta",
        };
        f.write_str(name)
    }
}

/// A decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: RecordKind,
    /// Payload bytes following the header
    pub payload_length: u32,
    /// Genlock-derived frame number
    pub sequence_number: u64,
    /// Sensor clock timestamp in nanoseconds
    pub timestamp: u64,
}

/// Point position, in the numeric representation the record declared.
///
/// No unit or frame conversion happens at decode time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Position {
    /// Floating-point coordinates (metres)
    Float([f32; 3]),
    /// Fixed-point coordinates (millimetres)
    Fixed([i32; 3]),
}

impl Position {
    /// Coordinates in metres as `f32`.
    pub fn to_metres(&self) -> [f32; 3] {
        match *self {
            Self::Float(xyz) => xyz,
            Self::Fixed([x, y, z]) => [x as f32 / 1000.0, y as f32 / 1000.0, z as f32 / 1000.0],
        }
    }

    /// True for the sensor origin, which LiDAR firmware emits for beams
    /// that produced no return.
    pub fn is_origin(&self) -> bool {
        match *self {
            Self::Float(xyz) => xyz == [0.0; 3],
            Self::Fixed(xyz) => xyz == [0; 3],
        }
    }
}

/// A single LiDAR return.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub position: Position,
    /// Raw reflectivity/intensity
    pub intensity: Option<u16>,
    /// Return index for multi-return sensors
    pub return_index: Option<u8>,
}

impl Point {
    /// Creates a float point without attributes.
    pub fn xyz(x: f32, y: f32, z: f32) -> Self {
        Self {
            position: Position::Float([x, y, z]),
            intensity: None,
            return_index: None,
        }
    }
}

/// Fixed-stride point record layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PointLayout {
    /// x, y, z as f32 (12 bytes)
    XyzF32 = 0,
    /// x, y, z as f32, intensity u16, return u8 (15 bytes)
    XyzirF32 = 1,
    /// x, y, z as i32 millimetres, intensity u16, return u8 (15 bytes)
    XyzirI32 = 2,
}

impl PointLayout {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::XyzF32),
            1 => Some(Self::XyzirF32),
            2 => Some(Self::XyzirI32),
            _ => None,
        }
    }

    /// Bytes per point record.
    #[inline]
    pub fn stride(self) -> usize {
        match self {
            Self::XyzF32 => 12,
            Self::XyzirF32 | Self::XyzirI32 => 15,
        }
    }

    /// Whether the layout carries intensity and return index.
    #[inline]
    pub fn has_attributes(self) -> bool {
        !matches!(self, Self::XyzF32)
    }
}

/// A decoded point-cloud sweep, in scan order.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    pub layout: PointLayout,
    pub points: Vec<Point>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// IR raster pixel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PixelFormat {
    Mono8 = 0,
    Mono16 = 1,
    /// Radiometric temperature, f32 little-endian
    Mono32F = 2,
}

impl PixelFormat {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Mono8),
            1 => Some(Self::Mono16),
            2 => Some(Self::Mono32F),
            _ => None,
        }
    }

    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Mono8 => 1,
            Self::Mono16 => 2,
            Self::Mono32F => 4,
        }
    }
}

/// A decoded IR raster. `data.len() == width * height * bytes_per_pixel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Row-major pixel buffer
    pub data: Vec<u8>,
}

impl IrImage {
    /// Raw bytes of one row, or `None` past the last row or the buffer end.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let stride = self.width as usize * self.format.bytes_per_pixel();
        let start = y as usize * stride;
        self.data.get(start..start.checked_add(stride)?)
    }
}

/// Timing metadata carried by `TIME` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeMeta {
    /// Host receive time in nanoseconds
    pub host_time_ns: u64,
}

/// All records sharing one sequence number, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sequence_number: u64,
    /// Sensor clock timestamp in nanoseconds
    pub timestamp: u64,
    pub point_cloud: Option<PointCloud>,
    pub ir_image: Option<IrImage>,
    pub time_meta: Option<TimeMeta>,
}

impl Frame {
    /// Number of points, zero when the frame carries no sweep.
    pub fn point_count(&self) -> usize {
        self.point_cloud.as_ref().map_or(0, PointCloud::len)
    }

    /// Timestamp split into whole seconds and nanoseconds.
    pub fn timestamp_parts(&self) -> (u64, u32) {
        (
            self.timestamp / 1_000_000_000,
            (self.timestamp % 1_000_000_000) as u32,
        )
    }
}
