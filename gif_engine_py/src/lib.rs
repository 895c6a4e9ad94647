//! GIF Engine Python bindings
//!
//! Exposes the playback engine to Python with:
//! - `GifHandle` for playing animations from bytes or files
//! - Metadata probing without decoding pixels
//! - Parallel batch probing (releases the GIL)

use pyo3::exceptions::{PyIndexError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;
use std::sync::Arc;

use gif_engine::{EngineError, GifOptions, GifHandle, GifMetadata, SavedState};

fn to_py_err(err: EngineError) -> PyErr {
    match err {
        EngineError::IndexOutOfRange { .. } => PyIndexError::new_err(err.to_string()),
        _ => PyValueError::new_err(err.to_string()),
    }
}

/// Animation metadata
#[pyclass(name = "GifMetadata")]
#[derive(Clone)]
pub struct PyGifMetadata {
    inner: Arc<GifMetadata>,
}

#[pymethods]
impl PyGifMetadata {
    #[getter]
    fn width(&self) -> u32 {
        self.inner.width
    }

    #[getter]
    fn height(&self) -> u32 {
        self.inner.height
    }

    #[getter]
    fn frame_count(&self) -> usize {
        self.inner.frame_count()
    }

    #[getter]
    fn loop_count(&self) -> u16 {
        self.inner.loop_count
    }

    #[getter]
    fn duration(&self) -> u64 {
        self.inner.duration_ms()
    }

    #[getter]
    fn comment(&self) -> Option<String> {
        self.inner.comment.clone()
    }

    #[getter]
    fn frame_durations(&self) -> Vec<u32> {
        self.inner.frame_durations()
    }

    /// Input length in bytes, -1 when unknown
    #[getter]
    fn source_length(&self) -> i64 {
        self.inner.source_length.map_or(-1, |len| len as i64)
    }

    #[getter]
    fn allocation_byte_count(&self) -> u64 {
        self.inner.allocation_byte_count
    }

    #[getter]
    fn metadata_byte_count(&self) -> u64 {
        self.inner.metadata_byte_count
    }

    fn is_animated(&self) -> bool {
        self.inner.is_animated()
    }

    #[pyo3(signature = (pretty=false))]
    fn to_json(&self, pretty: bool) -> PyResult<String> {
        let json = if pretty {
            serde_json::to_string_pretty(&*self.inner)
        } else {
            serde_json::to_string(&*self.inner)
        };
        json.map_err(|e| PyValueError::new_err(e.to_string()))
    }

    fn __repr__(&self) -> String {
        self.inner.to_string()
    }
}

/// Playing GIF animation
#[pyclass(name = "GifHandle")]
pub struct PyGifHandle {
    inner: GifHandle,
}

fn options(sample_size: u32, opaque: bool) -> GifOptions {
    GifOptions::new().with_sample_size(sample_size).with_opaque(opaque)
}

#[pymethods]
impl PyGifHandle {
    #[new]
    #[pyo3(signature = (data, sample_size=1, opaque=false, autostart=true))]
    fn new(py: Python<'_>, data: &Bound<'_, PyBytes>, sample_size: u32, opaque: bool, autostart: bool) -> PyResult<Self> {
        let bytes = data.as_bytes().to_vec();
        let inner = py
            .allow_threads(|| {
                GifHandle::builder()
                    .options(options(sample_size, opaque))
                    .autostart(autostart)
                    .open(bytes)
            })
            .map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Open a GIF file (memory-mapped)
    #[staticmethod]
    #[pyo3(signature = (path, sample_size=1, opaque=false, autostart=true))]
    fn open(py: Python<'_>, path: &str, sample_size: u32, opaque: bool, autostart: bool) -> PyResult<Self> {
        let path = std::path::PathBuf::from(path);
        let inner = py
            .allow_threads(|| {
                GifHandle::builder()
                    .options(options(sample_size, opaque))
                    .autostart(autostart)
                    .open(path)
            })
            .map_err(to_py_err)?;
        Ok(Self { inner })
    }

    #[getter]
    fn width(&self) -> u32 {
        self.inner.width()
    }

    #[getter]
    fn height(&self) -> u32 {
        self.inner.height()
    }

    #[getter]
    fn frame_count(&self) -> usize {
        self.inner.frame_count()
    }

    #[getter]
    fn loop_count(&self) -> u16 {
        self.inner.loop_count()
    }

    #[getter]
    fn duration(&self) -> u64 {
        self.inner.duration_ms()
    }

    #[getter]
    fn comment(&self) -> Option<String> {
        self.inner.comment()
    }

    #[getter]
    fn source_length(&self) -> i64 {
        self.inner.source_byte_length().map_or(-1, |len| len as i64)
    }

    #[getter]
    fn allocation_byte_count(&self) -> u64 {
        self.inner.allocation_byte_count()
    }

    #[getter]
    fn metadata_byte_count(&self) -> u64 {
        self.inner.metadata_byte_count()
    }

    #[getter]
    fn frame_byte_count(&self) -> u64 {
        self.inner.frame_byte_count()
    }

    #[getter]
    fn error(&self) -> i32 {
        self.inner.error().code()
    }

    /// Index of the displayed frame, -1 before the first one
    #[getter]
    fn current_frame_index(&self) -> i64 {
        self.inner.current_frame_index().map_or(-1, |i| i as i64)
    }

    #[getter]
    fn current_loop(&self) -> u32 {
        self.inner.current_loop()
    }

    #[getter]
    fn current_position(&self) -> u64 {
        self.inner.position_ms()
    }

    #[getter]
    fn speed(&self) -> f32 {
        self.inner.speed()
    }

    #[getter]
    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    #[getter]
    fn is_recycled(&self) -> bool {
        self.inner.is_recycled()
    }

    #[getter]
    fn is_animation_completed(&self) -> bool {
        self.inner.is_animation_completed()
    }

    fn metadata(&self) -> Option<PyGifMetadata> {
        self.inner.metadata().map(|inner| PyGifMetadata { inner })
    }

    fn frame_duration(&self, index: usize) -> PyResult<u32> {
        self.inner.frame_duration(index).map_err(to_py_err)
    }

    fn start(&self) {
        self.inner.start();
    }

    fn stop(&self) {
        self.inner.stop();
    }

    fn reset(&self) {
        self.inner.reset();
    }

    fn recycle(&self, py: Python<'_>) {
        py.allow_threads(|| self.inner.recycle());
    }

    fn set_speed(&self, factor: f32) -> PyResult<()> {
        self.inner.set_speed(factor).map_err(to_py_err)
    }

    fn set_loop_count(&self, loop_count: u32) -> PyResult<()> {
        self.inner.set_loop_count(loop_count).map_err(to_py_err)
    }

    fn seek_to_time(&self, position_ms: u64) {
        self.inner.seek_to_time(position_ms);
    }

    fn seek_to_frame(&self, index: usize) -> PyResult<()> {
        self.inner.seek_to_frame(index).map_err(to_py_err)
    }

    /// Seek and return the resulting frame as RGBA bytes
    fn seek_to_frame_and_get<'py>(&self, py: Python<'py>, index: usize) -> PyResult<Bound<'py, PyBytes>> {
        let frame = py
            .allow_threads(|| self.inner.seek_to_frame_and_get(index))
            .map_err(to_py_err)?;
        Ok(PyBytes::new_bound(py, frame.as_raw()))
    }

    fn seek_to_position_and_get<'py>(&self, py: Python<'py>, position_ms: u64) -> Bound<'py, PyBytes> {
        let frame = py.allow_threads(|| self.inner.seek_to_position_and_get(position_ms));
        PyBytes::new_bound(py, frame.as_raw())
    }

    /// Current frame as RGBA bytes, row by row
    fn current_frame<'py>(&self, py: Python<'py>) -> Bound<'py, PyBytes> {
        PyBytes::new_bound(py, self.inner.current_frame().as_raw())
    }

    /// Pixel at (x, y) as packed ARGB
    fn get_pixel(&self, x: u32, y: u32) -> PyResult<u32> {
        let [r, g, b, a] = self.inner.pixel(x, y).map_err(to_py_err)?.0;
        Ok(u32::from_be_bytes([a, r, g, b]))
    }

    fn get_pixels(&self) -> Vec<u32> {
        self.inner.pixels()
    }

    fn saved_state<'py>(&self, py: Python<'py>) -> Option<Bound<'py, PyBytes>> {
        self.inner
            .saved_state()
            .map(|state| PyBytes::new_bound(py, state.as_bytes()))
    }

    fn restore_saved_state(&self, state: &Bound<'_, PyBytes>) -> PyResult<()> {
        let state = SavedState::from_bytes(state.as_bytes());
        self.inner.restore_saved_state(&state).map_err(to_py_err)
    }

    fn request_frame(&self) {
        self.inner.request_frame();
    }

    /// Block until queued control calls have run
    fn sync(&self, py: Python<'_>) {
        py.allow_threads(|| self.inner.sync());
    }

    fn __repr__(&self) -> String {
        self.inner.to_string()
    }
}

/// Read GIF metadata without decoding pixels
#[pyfunction]
fn probe(data: &Bound<'_, PyBytes>) -> PyResult<PyGifMetadata> {
    gif_engine::probe(data.as_bytes())
        .map(|metadata| PyGifMetadata { inner: Arc::new(metadata) })
        .map_err(to_py_err)
}

/// Probe many GIFs in parallel (releases the GIL)
#[pyfunction]
fn probe_batch(py: Python<'_>, images: Vec<Bound<'_, PyBytes>>) -> PyResult<Vec<PyGifMetadata>> {
    let bytes_list: Vec<Vec<u8>> = images.iter().map(|b| b.as_bytes().to_vec()).collect();

    let results = py.allow_threads(|| {
        let refs: Vec<&[u8]> = bytes_list.iter().map(|b| b.as_slice()).collect();
        gif_engine::probe_batch(&refs)
    });

    results
        .into_iter()
        .map(|result| {
            result
                .map(|metadata| PyGifMetadata { inner: Arc::new(metadata) })
                .map_err(to_py_err)
        })
        .collect()
}

#[pyfunction]
fn is_animated(data: &Bound<'_, PyBytes>) -> bool {
    gif_engine::is_animated(data.as_bytes())
}

/// Parse decoding options from JSON and return them as (sample_size, opaque)
#[pyfunction]
fn parse_options(json: &str) -> PyResult<(u16, bool)> {
    let options = GifOptions::from_json(json).map_err(to_py_err)?;
    Ok((options.sample_size, options.opaque))
}

/// Python module
#[pymodule]
fn gif_engine_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyGifHandle>()?;
    m.add_class::<PyGifMetadata>()?;

    m.add_function(wrap_pyfunction!(probe, m)?)?;
    m.add_function(wrap_pyfunction!(probe_batch, m)?)?;
    m.add_function(wrap_pyfunction!(is_animated, m)?)?;
    m.add_function(wrap_pyfunction!(parse_options, m)?)?;

    // Version info
    m.add("__version__", "0.1.0")?;
    m.add("__author__", "voraehita25-star")?;

    Ok(())
}
