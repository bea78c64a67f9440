//! Export writers for decoded `.pc5` data.
//!
//! Supports a timestamp table, per-frame point dumps (binary PCD, KITTI and
//! nuScenes `.bin`, CSV) and PGM snapshots of IR images.

use crate::types::{Frame, IrImage, PixelFormat, Point, PointCloud};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Point dump formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Binary PCD v0.7
    Pcd,
    /// KITTI (x, y, z, i) and nuScenes (x, y, z, i, 0) float32 `.bin`
    Bin,
    /// CSV with `x,y,z,i` header
    Csv,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [Self::Pcd, Self::Bin, Self::Csv];

    pub fn name(self) -> &'static str {
        match self {
            Self::Pcd => "pcd",
            Self::Bin => "bin",
            Self::Csv => "csv",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pcd" => Ok(Self::Pcd),
            "bin" => Ok(Self::Bin),
            "csv" => Ok(Self::Csv),
            other => Err(OutputError::InvalidFormat(format!(
                "Unknown format: {}. Valid: bin, csv, pcd",
                other
            ))),
        }
    }
}

/// A set of export formats. Defaults to all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormats {
    pcd: bool,
    bin: bool,
    csv: bool,
}

impl Default for ExportFormats {
    fn default() -> Self {
        Self::all()
    }
}

impl ExportFormats {
    pub fn all() -> Self {
        Self {
            pcd: true,
            bin: true,
            csv: true,
        }
    }

    pub fn none() -> Self {
        Self {
            pcd: false,
            bin: false,
            csv: false,
        }
    }

    pub fn insert(&mut self, format: ExportFormat) {
        match format {
            ExportFormat::Pcd => self.pcd = true,
            ExportFormat::Bin => self.bin = true,
            ExportFormat::Csv => self.csv = true,
        }
    }

    pub fn contains(&self, format: ExportFormat) -> bool {
        match format {
            ExportFormat::Pcd => self.pcd,
            ExportFormat::Bin => self.bin,
            ExportFormat::Csv => self.csv,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.pcd || self.bin || self.csv)
    }

    pub fn iter(&self) -> impl Iterator<Item = ExportFormat> + '_ {
        ExportFormat::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl std::str::FromStr for ExportFormats {
    type Err = OutputError;

    /// Parses a comma-separated list such as `"pcd,bin"`. Empty items are
    /// ignored; an empty list selects every format.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut formats = Self::none();
        for part in s.split(',').filter(|p| !p.trim().is_empty()) {
            formats.insert(part.parse()?);
        }
        if formats.is_empty() {
            return Ok(Self::all());
        }
        Ok(formats)
    }
}

/// Normalises raw intensity to `[0, 1]` the way KITTI-style tools expect.
#[inline]
pub fn normalize_intensity(intensity: Option<u16>) -> f32 {
    match intensity {
        Some(raw) => (raw as f32 / 255.0).clamp(0.0, 1.0),
        None => 0.0,
    }
}

/// One exported point: x, y, z in metres and normalised intensity.
pub type XyziRow = [f32; 4];

#[inline]
fn xyzi(point: &Point) -> XyziRow {
    let [x, y, z] = point.position.to_metres();
    [x, y, z, normalize_intensity(point.intensity)]
}

/// Converts a sweep to XYZI rows, dropping no-return points at the origin.
pub fn xyzi_rows(cloud: &PointCloud) -> Vec<XyziRow> {
    cloud
        .points
        .iter()
        .filter(|p| !p.position.is_origin())
        .map(xyzi)
        .collect()
}

/// File stem for a nanosecond timestamp: `<secs>.<nanos:09>`.
pub fn timestamp_stem(timestamp_ns: u64) -> String {
    format!(
        "{}.{:09}",
        timestamp_ns / 1_000_000_000,
        timestamp_ns % 1_000_000_000
    )
}

/// CSV writer for the frame timestamp table.
pub struct TimestampCsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> TimestampCsvWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "sequence_number,timestamp_ns")?;
        Ok(())
    }

    #[inline]
    pub fn write_row(&mut self, sequence_number: u64, timestamp: u64) -> Result<(), OutputError> {
        writeln!(self.writer, "{},{}", sequence_number, timestamp)?;
        Ok(())
    }

    /// Writes rows and returns how many were written.
    pub fn write_rows<I>(&mut self, rows: I) -> Result<usize, OutputError>
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        let mut count = 0;
        for (sequence_number, timestamp) in rows {
            self.write_row(sequence_number, timestamp)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes the timestamp table to a file and returns the row count.
pub fn write_timestamps_csv<P, I>(path: P, rows: I) -> Result<usize, OutputError>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = (u64, u64)>,
{
    let file = File::create(path)?;
    let mut writer = TimestampCsvWriter::new(file);
    writer.write_header()?;
    let count = writer.write_rows(rows)?;
    writer.flush()?;
    Ok(count)
}

/// Writes rows as binary PCD v0.7 (`FIELDS x y z intensity`, float32).
pub fn write_pcd<W: Write>(writer: W, rows: &[XyziRow]) -> Result<(), OutputError> {
    let mut writer = BufWriter::new(writer);
    let n = rows.len();
    write!(
        writer,
        "# .PCD v0.7 - Point Cloud Data file format\n\
         VERSION 0.7\n\
         FIELDS x y z intensity\n\
         SIZE 4 4 4 4\n\
         TYPE F F F F\n\
         COUNT 1 1 1 1\n\
         WIDTH {n}\n\
         HEIGHT 1\n\
         VIEWPOINT 0 0 0 1 0 0 0\n\
         POINTS {n}\n\
         DATA binary\n"
    )?;
    write_f32_rows(&mut writer, rows, 0)?;
    writer.flush()?;
    Ok(())
}

/// Writes rows as KITTI `.bin` (4 x float32 per point).
pub fn write_kitti_bin<W: Write>(writer: W, rows: &[XyziRow]) -> Result<(), OutputError> {
    let mut writer = BufWriter::new(writer);
    write_f32_rows(&mut writer, rows, 0)?;
    writer.flush()?;
    Ok(())
}

/// Writes rows as nuScenes `.bin` (5 x float32 per point, last column 0).
pub fn write_nuscenes_bin<W: Write>(writer: W, rows: &[XyziRow]) -> Result<(), OutputError> {
    let mut writer = BufWriter::new(writer);
    write_f32_rows(&mut writer, rows, 1)?;
    writer.flush()?;
    Ok(())
}

fn write_f32_rows<W: Write>(writer: &mut W, rows: &[XyziRow], padding: usize) -> std::io::Result<()> {
    for row in rows {
        for v in row {
            writer.write_all(&v.to_le_bytes())?;
        }
        for _ in 0..padding {
            writer.write_all(&0f32.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Writes rows as CSV with an `x,y,z,i` header and six decimals.
pub fn write_points_csv<W: Write>(writer: W, rows: &[XyziRow]) -> Result<(), OutputError> {
    let mut writer = BufWriter::new(writer);
    writeln!(writer, "x,y,z,i")?;
    for [x, y, z, i] in rows {
        writeln!(writer, "{:.6},{:.6},{:.6},{:.6}", x, y, z, i)?;
    }
    writer.flush()?;
    Ok(())
}

/// Files written for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFrame {
    /// `<secs>.<nanos>` stem shared by every file
    pub stem: String,
    pub point_count: usize,
    pub files: Vec<PathBuf>,
}

fn create_in(dir: &Path, sub: &str, file_name: &str) -> Result<(File, PathBuf), OutputError> {
    let dir = dir.join(sub);
    fs::create_dir_all(&dir)?;
    let path = dir.join(file_name);
    Ok((File::create(&path)?, path))
}

/// Writes the selected point dumps of a frame under `out_dir`.
///
/// Layout: `pcd/<stem>.pcd`, `bin/<stem>.bin` (nuScenes), `bin_k/<stem>.bin`
/// (KITTI), `csv/<stem>.csv`. Returns `None` without writing anything when
/// the frame has no valid points.
pub fn export_frame(
    frame: &Frame,
    out_dir: &Path,
    formats: ExportFormats,
) -> Result<Option<ExportedFrame>, OutputError> {
    let rows = match &frame.point_cloud {
        Some(cloud) => xyzi_rows(cloud),
        None => return Ok(None),
    };
    if rows.is_empty() {
        return Ok(None);
    }

    let stem = timestamp_stem(frame.timestamp);
    let mut files = Vec::new();

    if formats.contains(ExportFormat::Pcd) {
        let (file, path) = create_in(out_dir, "pcd", &format!("{}.pcd", stem))?;
        write_pcd(file, &rows)?;
        files.push(path);
    }
    if formats.contains(ExportFormat::Bin) {
        let (file, path) = create_in(out_dir, "bin", &format!("{}.bin", stem))?;
        write_nuscenes_bin(file, &rows)?;
        files.push(path);
        let (file, path) = create_in(out_dir, "bin_k", &format!("{}.bin", stem))?;
        write_kitti_bin(file, &rows)?;
        files.push(path);
    }
    if formats.contains(ExportFormat::Csv) {
        let (file, path) = create_in(out_dir, "csv", &format!("{}.csv", stem))?;
        write_points_csv(file, &rows)?;
        files.push(path);
    }

    Ok(Some(ExportedFrame {
        stem,
        point_count: rows.len(),
        files,
    }))
}

/// Writes an IR image as binary PGM (P5).
///
/// `Mono16` pixels are written big-endian as PGM requires; `Mono32F` has no
/// PGM representation.
pub fn write_pgm<W: Write>(writer: W, image: &IrImage) -> Result<(), OutputError> {
    let max_value = match image.format {
        PixelFormat::Mono8 => 255,
        PixelFormat::Mono16 => 65535,
        PixelFormat::Mono32F => {
            return Err(OutputError::Unsupported(
                "PGM cannot hold Mono32F pixels".to_string(),
            ))
        }
    };

    let mut writer = BufWriter::new(writer);
    write!(
        writer,
        "P5\n{} {}\n{}\n",
        image.width, image.height, max_value
    )?;
    match image.format {
        PixelFormat::Mono16 => {
            for px in image.data.chunks_exact(2) {
                writer.write_all(&[px[1], px[0]])?;
            }
        }
        _ => writer.write_all(&image.data)?,
    }
    writer.flush()?;
    Ok(())
}

/// Writes a frame's IR image to `out_dir/ir/<stem>.pgm`, if it has one.
pub fn export_ir_image(frame: &Frame, out_dir: &Path) -> Result<Option<PathBuf>, OutputError> {
    let Some(image) = &frame.ir_image else {
        return Ok(None);
    };
    if image.format == PixelFormat::Mono32F {
        return Err(OutputError::Unsupported(
            "PGM cannot hold Mono32F pixels".to_string(),
        ));
    }
    let stem = timestamp_stem(frame.timestamp);
    let (file, path) = create_in(out_dir, "ir", &format!("{}.pgm", stem))?;
    write_pgm(file, image)?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PointLayout, Position};
    use std::str::FromStr;

    fn attributed(position: Position, intensity: u16) -> Point {
        Point {
            position,
            intensity: Some(intensity),
            return_index: Some(0),
        }
    }

    fn sample_frame() -> Frame {
        Frame {
            sequence_number: 3,
            timestamp: 1_700_000_000_000_000_042,
            point_cloud: Some(PointCloud {
                layout: PointLayout::XyzirI32,
                points: vec![
                    attributed(Position::Fixed([1000, 2000, -500]), 255),
                    attributed(Position::Fixed([0, 0, 0]), 10),
                    attributed(Position::Fixed([-250, 0, 0]), 1000),
                ],
            }),
            ir_image: None,
            time_meta: None,
        }
    }

    #[test]
    fn test_formats_parsing() {
        let f = ExportFormats::from_str("pcd, CSV").unwrap();
        assert!(f.contains(ExportFormat::Pcd));
        assert!(f.contains(ExportFormat::Csv));
        assert!(!f.contains(ExportFormat::Bin));
        assert_eq!(ExportFormats::from_str("").unwrap(), ExportFormats::all());
        assert!(ExportFormats::from_str("pcd,ply").is_err());
    }

    #[test]
    fn test_xyzi_rows_scale_and_filter() {
        let frame = sample_frame();
        let rows = xyzi_rows(frame.point_cloud.as_ref().unwrap());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], [1.0, 2.0, -0.5, 1.0]);
        // Intensity above 255 is clamped
        assert_eq!(rows[1], [-0.25, 0.0, 0.0, 1.0]);
        assert_eq!(normalize_intensity(None), 0.0);
    }

    #[test]
    fn test_timestamp_stem() {
        assert_eq!(timestamp_stem(1_500_000_042), "1.500000042");
        assert_eq!(timestamp_stem(42), "0.000000042");
    }

    #[test]
    fn test_timestamp_csv() {
        let mut output = Vec::new();
        {
            let mut writer = TimestampCsvWriter::new(&mut output);
            writer.write_header().unwrap();
            assert_eq!(writer.write_rows([(0, 100), (1, 250)]).unwrap(), 2);
            writer.flush().unwrap();
        }
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text, "sequence_number,timestamp_ns\n0,100\n1,250\n");
    }

    #[test]
    fn test_pcd_layout() {
        let rows = vec![[1.0f32, 2.0, 3.0, 0.5]];
        let mut output = Vec::new();
        write_pcd(&mut output, &rows).unwrap();

        let header_end = output
            .windows(12)
            .position(|w| w == b"DATA binary\n")
            .unwrap()
            + 12;
        let header = std::str::from_utf8(&output[..header_end]).unwrap();
        assert!(header.contains("POINTS 1\n"));
        assert!(header.contains("WIDTH 1\n"));
        assert_eq!(output.len() - header_end, 16);
        assert_eq!(&output[header_end..header_end + 4], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_bin_strides() {
        let rows = vec![[1.0f32, 2.0, 3.0, 0.5]; 3];
        let mut kitti = Vec::new();
        let mut nusc = Vec::new();
        write_kitti_bin(&mut kitti, &rows).unwrap();
        write_nuscenes_bin(&mut nusc, &rows).unwrap();
        assert_eq!(kitti.len(), 3 * 16);
        assert_eq!(nusc.len(), 3 * 20);
        assert_eq!(&nusc[16..20], &0f32.to_le_bytes());
    }

    #[test]
    fn test_points_csv() {
        let mut output = Vec::new();
        write_points_csv(&mut output, &[[1.0, -2.5, 0.125, 1.0]]).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text, "x,y,z,i\n1.000000,-2.500000,0.125000,1.000000\n");
    }

    #[test]
    fn test_pgm_mono16_is_big_endian() {
        let image = IrImage {
            width: 1,
            height: 1,
            format: PixelFormat::Mono16,
            data: 0x1234u16.to_le_bytes().to_vec(),
        };
        let mut output = Vec::new();
        write_pgm(&mut output, &image).unwrap();
        assert_eq!(output, b"P5\n1 1\n65535\n\x12\x34".to_vec());

        let float = IrImage {
            format: PixelFormat::Mono32F,
            data: vec![0; 4],
            ..image
        };
        assert!(matches!(
            write_pgm(Vec::new(), &float),
            Err(OutputError::Unsupported(_))
        ));
    }

    #[test]
    fn test_export_frame_writes_selected_formats() {
        let dir = tempfile::tempdir().unwrap();
        let formats = ExportFormats::from_str("bin,csv").unwrap();
        let exported = export_frame(&sample_frame(), dir.path(), formats)
            .unwrap()
            .unwrap();

        assert_eq!(exported.stem, "1700000000.000000042");
        assert_eq!(exported.point_count, 2);
        assert_eq!(exported.files.len(), 3);
        assert!(dir.path().join("bin_k/1700000000.000000042.bin").exists());
        assert!(dir.path().join("csv/1700000000.000000042.csv").exists());
        assert!(!dir.path().join("pcd").exists());
    }

    #[test]
    fn test_export_frame_without_points() {
        let dir = tempfile::tempdir().unwrap();
        let mut frame = sample_frame();
        frame.point_cloud = None;
        assert!(export_frame(&frame, dir.path(), ExportFormats::all())
            .unwrap()
            .is_none());
    }
}
