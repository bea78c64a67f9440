//! Reader for `.pc5` multi-sensor survey containers.
//!
//! A `.pc5` container is an append-only log of interleaved records: LiDAR
//! point-cloud sweeps, infrared raster images and per-frame timing metadata.
//! Records carry a genlock-derived sequence number; all records with the
//! same number form one [`Frame`]. There is no table of contents, so the
//! reader indexes the file in a single pass and then serves random frame
//! access by seeking to the indexed offsets.
//!
//! # Example
//!
//! ```no_run
//! use pc5_core::Pc5Reader;
//!
//! let reader = Pc5Reader::open("survey.pc5").unwrap();
//! let report = reader.build_index();
//! if !report.is_complete() {
//!     eprintln!("partial index: {:?}", report.error());
//! }
//!
//! let frame = reader.get_frame_by_timestamp(1_700_000_000_000_000_000).unwrap();
//! println!("frame {} has {} points", frame.sequence_number, frame.point_count());
//! ```
//!
//! # Features
//!
//! - Lazy, cached frame index with two-tier error recovery
//! - On-demand decoding of point clouds (float or fixed-point layouts),
//!   IR images and timing metadata
//! - Memory-mapped input; the reader is `Send + Sync`
//! - Export to PCD, KITTI/nuScenes `.bin`, CSV and PGM
//! - Telemetry column projection and calibration loading for companion data

pub mod calibration;
pub mod cursor;
pub mod decoder;
pub mod error;
pub mod index;
pub mod output;
pub mod parser;
pub mod reader;
pub mod table;
pub mod types;
pub mod writer;

// Re-export commonly used types
pub use error::{Pc5Error, Result};
pub use index::{FrameIndex, IndexEntry, IndexReport, RecordLocation};
pub use output::{ExportFormat, ExportFormats, OutputError};
pub use reader::{FrameIter, Pc5Reader};
pub use types::{
    Frame, IrImage, PixelFormat, Point, PointCloud, PointLayout, Position, RecordKind, TimeMeta,
};
pub use writer::ContainerWriter;
