//! Python bindings for the `.pc5` container reader with numpy support.
//!
//! Point clouds are handed to Python as `(N, 4)` float32 XYZI arrays and IR
//! images as 2-D arrays in their native pixel type.

use numpy::{IntoPyArray, PyArray1, PyArray2};
use pc5_core::output::xyzi_rows;
use pc5_core::{Pc5Error, Pc5Reader, PixelFormat};
use pyo3::exceptions::{PyIOError, PyIndexError, PyKeyError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

fn to_py_err(err: Pc5Error) -> PyErr {
    match err {
        Pc5Error::Io(e) => PyIOError::new_err(e.to_string()),
        e @ Pc5Error::FrameNotFound(_) | e @ Pc5Error::NoFrameAtOrBefore(_) => {
            PyKeyError::new_err(e.to_string())
        }
        e @ Pc5Error::FrameIndexOutOfRange { .. } => PyIndexError::new_err(e.to_string()),
        e => PyValueError::new_err(e.to_string()),
    }
}

/// One decoded frame.
#[pyclass]
pub struct Frame {
    #[pyo3(get)]
    sequence_number: u64,
    /// Sensor clock timestamp in nanoseconds
    #[pyo3(get)]
    timestamp: u64,
    /// Host clock timestamp from the timing record, if present
    #[pyo3(get)]
    host_time_ns: Option<u64>,
    /// Flattened XYZI rows, 4 floats per point
    xyzi: Option<Vec<f32>>,
    ir: Option<pc5_core::IrImage>,
}

#[pymethods]
impl Frame {
    /// Returns the number of points (0 without a point cloud).
    fn __len__(&self) -> usize {
        self.xyzi.as_ref().map_or(0, |v| v.len() / 4)
    }

    fn __repr__(&self) -> String {
        format!(
            "Frame(sequence_number={}, timestamp={}, points={}, ir={})",
            self.sequence_number,
            self.timestamp,
            self.__len__(),
            self.ir
                .as_ref()
                .map_or("none".to_string(), |i| format!("{}x{}", i.width, i.height))
        )
    }

    /// Returns the points as an `(N, 4)` float32 array of x, y, z in metres
    /// and intensity in [0, 1], or None without a point cloud.
    #[getter]
    fn points<'py>(&self, py: Python<'py>) -> PyResult<Option<&'py PyArray2<f32>>> {
        match &self.xyzi {
            Some(flat) => {
                let n = flat.len() / 4;
                Ok(Some(flat.clone().into_pyarray(py).reshape([n, 4])?))
            }
            None => Ok(None),
        }
    }

    /// Returns the IR image as a 2-D array (uint8, uint16 or float32), or None.
    #[getter]
    fn ir_image(&self, py: Python<'_>) -> PyResult<Option<PyObject>> {
        let Some(image) = &self.ir else {
            return Ok(None);
        };
        let shape = [image.height as usize, image.width as usize];
        let array: PyObject = match image.format {
            PixelFormat::Mono8 => image.data.clone().into_pyarray(py).reshape(shape)?.into_py(py),
            PixelFormat::Mono16 => image
                .data
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect::<Vec<_>>()
                .into_pyarray(py)
                .reshape(shape)?
                .into_py(py),
            PixelFormat::Mono32F => image
                .data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect::<Vec<_>>()
                .into_pyarray(py)
                .reshape(shape)?
                .into_py(py),
        };
        Ok(Some(array))
    }
}

impl From<pc5_core::Frame> for Frame {
    fn from(frame: pc5_core::Frame) -> Self {
        let xyzi = frame
            .point_cloud
            .as_ref()
            .map(|cloud| xyzi_rows(cloud).into_iter().flatten().collect());
        Self {
            sequence_number: frame.sequence_number,
            timestamp: frame.timestamp,
            host_time_ns: frame.time_meta.map(|t| t.host_time_ns),
            xyzi,
            ir: frame.ir_image,
        }
    }
}

/// Random-access reader over a `.pc5` file.
///
/// The index is built on first use and shared by all later queries.
///
/// Example:
///     >>> import pc5
///     >>> reader = pc5.Reader("survey.pc5")
///     >>> frame = reader.frame_by_timestamp(1_700_000_000_000_000_000)
///     >>> xyzi = frame.points  # (N, 4) float32
#[pyclass]
pub struct Reader {
    inner: Pc5Reader,
}

#[pymethods]
impl Reader {
    #[new]
    fn new(path: &str) -> PyResult<Self> {
        let inner = Pc5Reader::open(path).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Returns the number of indexed frames.
    fn __len__(&self) -> usize {
        self.inner.frame_count()
    }

    fn __repr__(&self) -> String {
        format!(
            "Reader(path={:?}, frames={})",
            self.inner.path(),
            self.inner.frame_count()
        )
    }

    /// Builds (or returns the cached) index and summarises it.
    ///
    /// Returns:
    ///     dict: frames, records, complete, error, halt_offset, skipped
    fn build_index<'py>(&self, py: Python<'py>) -> PyResult<&'py PyDict> {
        let report = self.inner.build_index();
        let dict = PyDict::new(py);
        dict.set_item("frames", report.index().len())?;
        dict.set_item("records", report.records_scanned())?;
        dict.set_item("complete", report.is_complete())?;
        dict.set_item("error", report.error().map(|e| e.to_string()))?;
        dict.set_item("halt_offset", report.halt_offset())?;
        dict.set_item("skipped", report.skipped().len())?;
        Ok(dict)
    }

    /// Returns (sequence_numbers, timestamps) as uint64 arrays in frame order.
    fn timestamps<'py>(&self, py: Python<'py>) -> (&'py PyArray1<u64>, &'py PyArray1<u64>) {
        let (seqs, stamps): (Vec<u64>, Vec<u64>) = self.inner.timestamps().unzip();
        (seqs.into_pyarray(py), stamps.into_pyarray(py))
    }

    /// Returns the frame with this sequence number.
    fn frame(&self, sequence_number: u64) -> PyResult<Frame> {
        self.inner
            .get_frame(sequence_number)
            .map(Frame::from)
            .map_err(to_py_err)
    }

    /// Returns the frame at a 0-based position in index order.
    fn frame_at(&self, position: usize) -> PyResult<Frame> {
        self.inner
            .get_frame_at(position)
            .map(Frame::from)
            .map_err(to_py_err)
    }

    /// Returns the latest frame whose timestamp is <= `timestamp`.
    fn frame_by_timestamp(&self, timestamp: u64) -> PyResult<Frame> {
        self.inner
            .get_frame_by_timestamp(timestamp)
            .map(Frame::from)
            .map_err(to_py_err)
    }
}

/// Reads one frame by 0-based position.
///
/// Args:
///     path: Path to the .pc5 file
///     frame_number: Position of the frame in the index
#[pyfunction]
fn read_frame(path: &str, frame_number: usize) -> PyResult<Frame> {
    let reader = Pc5Reader::open(path).map_err(to_py_err)?;
    reader
        .get_frame_at(frame_number)
        .map(Frame::from)
        .map_err(to_py_err)
}

/// Reads all frame timestamps.
///
/// Returns:
///     tuple: (sequence_numbers, timestamps) as uint64 arrays
#[pyfunction]
fn read_timestamps<'py>(
    py: Python<'py>,
    path: &str,
) -> PyResult<(&'py PyArray1<u64>, &'py PyArray1<u64>)> {
    let reader = Pc5Reader::open(path).map_err(to_py_err)?;
    let (seqs, stamps): (Vec<u64>, Vec<u64>) = reader.timestamps().unzip();
    Ok((seqs.into_pyarray(py), stamps.into_pyarray(py)))
}

/// Indexes an in-memory container and returns every decodable frame.
///
/// Frames whose payloads fail to decode are left out.
#[pyfunction]
fn decode_bytes(data: &[u8]) -> Vec<Frame> {
    let reader = Pc5Reader::from_bytes(data.to_vec());
    reader
        .iter_frames()
        .filter_map(|frame| frame.ok())
        .map(Frame::from)
        .collect()
}

/// `.pc5` container reader module for Python.
#[pymodule]
fn _pc5(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(read_frame, m)?)?;
    m.add_function(wrap_pyfunction!(read_timestamps, m)?)?;
    m.add_function(wrap_pyfunction!(decode_bytes, m)?)?;
    m.add_class::<Reader>()?;
    m.add_class::<Frame>()?;
    Ok(())
}
