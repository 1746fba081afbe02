//! Python bindings, built as the `_core` extension module.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use pyo3::exceptions::{PyConnectionError, PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::{IntoPyObject, IntoPyObjectExt};

use crate::dwm1001::{Dwm1001, StreamSummary};
use crate::errors::DriverError;
use crate::logging::{set_python_log_level_str, LogSink};
use crate::parse::{AbsolutePosition, Anchor, AnchorDistance, DistanceMeasurement, Mode, Point3};
use crate::shell::ShellTiming;
use crate::sim::SimulatedDevice;
use crate::transport::SerialSettings;

fn to_py_err(e: DriverError) -> PyErr {
    match e {
        DriverError::Connection { .. } => PyConnectionError::new_err(e.to_string()),
        DriverError::Parse(_) | DriverError::InvalidInput(_) => {
            PyValueError::new_err(e.to_string())
        }
        DriverError::NotConnected(_) => PyRuntimeError::new_err(e.to_string()),
        DriverError::Io(_) | DriverError::Serial(_) => PyIOError::new_err(e.to_string()),
    }
}

// ============================================================================
// Value Types
// ============================================================================

/// A point in metres, as reported by anchors and the location engine.
#[pyclass(name = "Point3", frozen, eq)]
#[derive(Clone, PartialEq)]
struct PyPoint3 {
    #[pyo3(get)]
    x: f64,
    #[pyo3(get)]
    y: f64,
    #[pyo3(get)]
    z: f64,
}

#[pymethods]
impl PyPoint3 {
    #[new]
    fn new(x: f64, y: f64, z: f64) -> Self {
        PyPoint3 { x, y, z }
    }

    fn __repr__(&self) -> String {
        format!("Point3(x={}, y={}, z={})", self.x, self.y, self.z)
    }

    fn to_tuple(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }
}

impl From<Point3> for PyPoint3 {
    fn from(p: Point3) -> Self {
        PyPoint3 {
            x: p.x,
            y: p.y,
            z: p.z,
        }
    }
}

/// Configured position of the module in integer millimetres.
#[pyclass(name = "Position", frozen, eq)]
#[derive(Clone, PartialEq, Eq)]
struct PyPosition {
    #[pyo3(get)]
    x: i32,
    #[pyo3(get)]
    y: i32,
    #[pyo3(get)]
    z: i32,
}

#[pymethods]
impl PyPosition {
    fn __repr__(&self) -> String {
        format!("Position(x={}mm, y={}mm, z={}mm)", self.x, self.y, self.z)
    }

    /// The same position in metres.
    fn to_metres(&self) -> (f64, f64, f64) {
        (
            f64::from(self.x) / 1000.0,
            f64::from(self.y) / 1000.0,
            f64::from(self.z) / 1000.0,
        )
    }
}

impl From<AbsolutePosition> for PyPosition {
    fn from(p: AbsolutePosition) -> Self {
        PyPosition {
            x: p.x,
            y: p.y,
            z: p.z,
        }
    }
}

/// An anchor from the `la` listing.
///
/// Attributes:
///     id: Anchor address as printed by the module.
///     seat: Slot the anchor occupies in the module's anchor table.
///     seen_count: How often the anchor was heard, if reported.
///     map_id: Map identifier, if reported.
///     position: Anchor position in metres, if reported.
#[pyclass(name = "Anchor", frozen)]
#[derive(Clone)]
struct PyAnchor {
    #[pyo3(get)]
    id: String,
    #[pyo3(get)]
    seat: u32,
    #[pyo3(get)]
    seen_count: Option<u32>,
    #[pyo3(get)]
    map_id: Option<String>,
    #[pyo3(get)]
    position: Option<PyPoint3>,
}

#[pymethods]
impl PyAnchor {
    fn __repr__(&self) -> String {
        format!("Anchor(id={:?}, seat={})", self.id, self.seat)
    }
}

impl From<Anchor> for PyAnchor {
    fn from(a: Anchor) -> Self {
        PyAnchor {
            id: a.id,
            seat: a.seat,
            seen_count: a.seen_count,
            map_id: a.map_id,
            position: a.position.map(PyPoint3::from),
        }
    }
}

#[pyclass(name = "AnchorDistance", frozen)]
#[derive(Clone)]
struct PyAnchorDistance {
    #[pyo3(get)]
    anchor_id: String,
    #[pyo3(get)]
    position: Option<PyPoint3>,
    #[pyo3(get)]
    distance: f64,
}

#[pymethods]
impl PyAnchorDistance {
    fn __repr__(&self) -> String {
        format!(
            "AnchorDistance(anchor_id={:?}, distance={})",
            self.anchor_id, self.distance
        )
    }
}

impl From<AnchorDistance> for PyAnchorDistance {
    fn from(d: AnchorDistance) -> Self {
        PyAnchorDistance {
            anchor_id: d.anchor_id,
            position: d.position.map(PyPoint3::from),
            distance: d.distance,
        }
    }
}

/// One `DIST` record: ranges to each anchor plus the optional position
/// estimate and its quality factor.
#[pyclass(name = "Measurement", frozen)]
#[derive(Clone)]
struct PyMeasurement {
    #[pyo3(get)]
    anchors: Vec<PyAnchorDistance>,
    #[pyo3(get)]
    position: Option<PyPoint3>,
    #[pyo3(get)]
    quality: Option<u8>,
}

#[pymethods]
impl PyMeasurement {
    fn __repr__(&self) -> String {
        format!(
            "Measurement(anchors={}, position={}, quality={:?})",
            self.anchors.len(),
            self.position
                .as_ref()
                .map_or_else(|| "None".to_string(), PyPoint3::__repr__),
            self.quality
        )
    }

    fn __len__(&self) -> usize {
        self.anchors.len()
    }
}

impl From<DistanceMeasurement> for PyMeasurement {
    fn from(m: DistanceMeasurement) -> Self {
        PyMeasurement {
            anchors: m.anchors.into_iter().map(PyAnchorDistance::from).collect(),
            position: m.position.map(PyPoint3::from),
            quality: m.quality,
        }
    }
}

fn summary_dict<'py>(py: Python<'py>, s: &StreamSummary) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("records", s.records)?;
    dict.set_item("skipped", s.skipped)?;
    dict.set_item("cancelled", s.cancelled)?;
    Ok(dict)
}

// ============================================================================
// Driver
// ============================================================================

/// DWM1001 UWB module driven through its UART shell.
///
/// Example:
///     >>> device = Dwm1001("/dev/ttyACM0")
///     >>> device.identity
///     {'mode': 'tag', 'network_id': '0x1234', 'address': '0xDECA...'}
///     >>> device.set_position(1.2, 0.0, 2.0)
///     >>> device.close()
#[pyclass(name = "Dwm1001", unsendable)]
struct PyDwm1001 {
    inner: Dwm1001,
}

impl PyDwm1001 {
    /// Run a streaming loop, handing each item to `callback`.
    ///
    /// The loop ends when the callback returns `False` or raises, when
    /// `max_records` is reached, or when a Python signal (Ctrl-C) is pending.
    /// Signals are checked on every poll, so a silent module can be interrupted.
    fn stream_with<'py, T, F>(
        &mut self,
        py: Python<'py>,
        callback: &Bound<'py, PyAny>,
        max_records: Option<usize>,
        run: F,
    ) -> PyResult<Bound<'py, PyDict>>
    where
        T: IntoPyObject<'py>,
        F: FnOnce(
            &mut Dwm1001,
            &mut dyn FnMut() -> bool,
            &mut dyn FnMut(T) -> ControlFlow<()>,
        ) -> crate::errors::Result<StreamSummary>,
    {
        let mut interrupt: Option<PyErr> = None;
        let mut cancelled = || match py.check_signals() {
            Ok(()) => false,
            Err(e) => {
                interrupt = Some(e);
                true
            }
        };
        let mut failure: Option<PyErr> = None;
        let mut seen = 0usize;
        let mut on_item = |item: T| -> ControlFlow<()> {
            seen += 1;
            let outcome = item
                .into_py_any(py)
                .and_then(|obj| callback.call1((obj,)))
                .and_then(|ret| Ok(ret.is_none() || ret.is_truthy()?));
            match outcome {
                Ok(true) if max_records.map_or(true, |max| seen < max) => ControlFlow::Continue(()),
                Ok(_) => ControlFlow::Break(()),
                Err(e) => {
                    failure = Some(e);
                    ControlFlow::Break(())
                }
            }
        };
        let summary = run(&mut self.inner, &mut cancelled, &mut on_item).map_err(to_py_err)?;
        if let Some(e) = failure.or(interrupt) {
            return Err(e);
        }
        summary_dict(py, &summary)
    }
}

#[pymethods]
impl PyDwm1001 {
    /// Open the serial port at `path` and wake the shell.
    ///
    /// Args:
    ///     path: Serial device, e.g. "/dev/ttyACM0".
    ///     timeout: Per-line read timeout for replies, in seconds.
    ///
    /// Raises:
    ///     ConnectionError: If the shell prompt never appears.
    ///     IOError: If the port cannot be opened.
    #[new]
    #[pyo3(signature = (path, timeout=None))]
    fn new(path: &str, timeout: Option<f64>) -> PyResult<Self> {
        let mut timing = ShellTiming::default();
        if let Some(secs) = timeout {
            timing.read_timeout = Duration::try_from_secs_f64(secs)
                .map_err(|e| PyValueError::new_err(e.to_string()))?;
        }
        Dwm1001::connect_serial_with(&SerialSettings::new(path), timing, Arc::new(LogSink))
            .map(|inner| PyDwm1001 { inner })
            .map_err(to_py_err)
    }

    /// Connect to an in-process simulated module. Useful for trying the API
    /// without hardware.
    #[staticmethod]
    fn simulated() -> PyResult<Self> {
        let sim = SimulatedDevice::new()
            .with_anchor("0xC584", Point3::new(0.0, 0.0, 2.0), 12)
            .with_anchor("0x4A91", Point3::new(5.0, 0.0, 2.0), 9);
        let mut inner = Dwm1001::new(Box::new(sim), ShellTiming::immediate(), Arc::new(LogSink));
        inner.open().map_err(to_py_err)?;
        Ok(PyDwm1001 { inner })
    }

    /// Re-run the wake-up handshake.
    fn open(&mut self) -> PyResult<()> {
        self.inner.open().map_err(to_py_err)
    }

    /// Leave the shell and release the port.
    fn close(&mut self) -> PyResult<()> {
        self.inner.close().map_err(to_py_err)
    }

    #[getter]
    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Cached identity as a dict, or None if it must be refreshed.
    #[getter]
    fn identity<'py>(&self, py: Python<'py>) -> PyResult<Option<Bound<'py, PyDict>>> {
        let Some(identity) = self.inner.identity() else {
            return Ok(None);
        };
        let dict = PyDict::new(py);
        dict.set_item("mode", identity.mode.to_string())?;
        dict.set_item("mode_token", &identity.mode_token)?;
        dict.set_item("network_id", &identity.network_id)?;
        dict.set_item("address", &identity.address)?;
        Ok(Some(dict))
    }

    fn refresh_identity<'py>(&mut self, py: Python<'py>) -> PyResult<Option<Bound<'py, PyDict>>> {
        self.inner.refresh_identity().map_err(to_py_err)?;
        self.identity(py)
    }

    /// Current mode name: tag, tag_listener, anchor, anchor_initiator.
    fn get_mode(&mut self) -> PyResult<String> {
        self.inner
            .get_mode()
            .map(|m| m.to_string())
            .map_err(to_py_err)
    }

    /// Switch mode. Blocks while the module restarts its shell.
    ///
    /// Args:
    ///     mode: "tag", "listener", "anchor" or "anchor_initiator".
    fn set_mode(&mut self, mode: &str) -> PyResult<()> {
        let mode: Mode = mode.parse().map_err(PyValueError::new_err)?;
        self.inner.set_mode(mode).map_err(to_py_err)
    }

    /// Set the PAN id from a hex string such as "0x1234".
    fn set_network_id(&mut self, network_id: &str) -> PyResult<()> {
        self.inner.set_network_id(network_id).map_err(to_py_err)
    }

    /// Set the configured position in metres. Returns the millimetre value
    /// actually sent.
    fn set_position(&mut self, x: f64, y: f64, z: f64) -> PyResult<PyPosition> {
        self.inner
            .set_position(x, y, z)
            .map(PyPosition::from)
            .map_err(to_py_err)
    }

    fn get_position(&mut self) -> PyResult<PyPosition> {
        self.inner
            .get_position()
            .map(PyPosition::from)
            .map_err(to_py_err)
    }

    fn get_anchor_list(&mut self) -> PyResult<Vec<PyAnchor>> {
        self.inner
            .get_anchor_list()
            .map(|anchors| anchors.into_iter().map(PyAnchor::from).collect())
            .map_err(to_py_err)
    }

    fn get_system_info(&mut self) -> PyResult<Vec<String>> {
        self.inner.get_system_info().map_err(to_py_err)
    }

    /// Send a raw shell command and return the reply lines.
    fn check_output(&mut self, command: &str) -> PyResult<Vec<String>> {
        self.inner.check_output(command).map_err(to_py_err)
    }

    fn flush(&mut self) -> PyResult<()> {
        self.inner.flush().map_err(to_py_err)
    }

    fn is_listen_mode(&mut self) -> PyResult<bool> {
        self.inner.is_listen_mode().map_err(to_py_err)
    }

    fn set_listen_mode(&mut self, enabled: bool) -> PyResult<()> {
        self.inner.set_listen_mode(enabled).map_err(to_py_err)
    }

    /// Call `callback(Point3)` for each streamed position.
    ///
    /// Returns a dict with `records`, `skipped` and `cancelled`.
    #[pyo3(signature = (callback, max_records=None))]
    fn stream_positions<'py>(
        &mut self,
        py: Python<'py>,
        callback: &Bound<'py, PyAny>,
        max_records: Option<usize>,
    ) -> PyResult<Bound<'py, PyDict>> {
        self.stream_with(py, callback, max_records, |dev, cancelled, sink| {
            dev.stream_positions_with(cancelled, |p| sink(PyPoint3::from(p)))
        })
    }

    /// Call `callback(Measurement)` for each streamed `DIST` record.
    #[pyo3(signature = (callback, max_records=None))]
    fn stream_measurements<'py>(
        &mut self,
        py: Python<'py>,
        callback: &Bound<'py, PyAny>,
        max_records: Option<usize>,
    ) -> PyResult<Bound<'py, PyDict>> {
        self.stream_with(py, callback, max_records, |dev, cancelled, sink| {
            dev.stream_measurements_with(cancelled, |m| sink(PyMeasurement::from(m)))
        })
    }

    fn __enter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    #[pyo3(signature = (_exc_type=None, _exc=None, _tb=None))]
    fn __exit__(
        &mut self,
        _exc_type: Option<&Bound<'_, PyAny>>,
        _exc: Option<&Bound<'_, PyAny>>,
        _tb: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<bool> {
        self.close()?;
        Ok(false)
    }

    fn __repr__(&self) -> String {
        match self.inner.identity() {
            Some(id) => format!("Dwm1001(mode={}, address={})", id.mode, id.address),
            None => format!("Dwm1001(state={:?})", self.inner.state()),
        }
    }
}

/// Route the driver's log records into Python's `logging` module.
///
/// Args:
///     level: Minimum level ("error", "warn", "info", "debug", "trace").
///         Defaults to DWM_LOG / RUST_LOG, then "info".
#[pyfunction]
#[pyo3(signature = (level=None))]
fn init_logging(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
    set_python_log_level_str(py, level)
}

#[pymodule]
#[pyo3(name = "_core")]
fn core_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyDwm1001>()?;
    m.add_class::<PyPoint3>()?;
    m.add_class::<PyPosition>()?;
    m.add_class::<PyAnchor>()?;
    m.add_class::<PyAnchorDistance>()?;
    m.add_class::<PyMeasurement>()?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;

    m.add("BAUD_RATE", crate::transport::BAUD_RATE)?;
    m.add(
        "MODES",
        vec!["tag", "tag_listener", "anchor", "anchor_initiator"],
    )?;

    Ok(())
}
