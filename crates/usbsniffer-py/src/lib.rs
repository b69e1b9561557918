use std::path::PathBuf;

use pyo3::exceptions::{PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyAny, PyBytes};
use pyo3::Bound;

use ::usbsniffer as us;
use us::{CaptureOptions, Speed};

#[pyclass]
struct Event {
    #[pyo3(get)]
    kind: String,
    #[pyo3(get)]
    pid: Option<String>,
    #[pyo3(get)]
    frame: Option<u16>,
    #[pyo3(get)]
    active: Option<bool>,
    #[pyo3(get)]
    device: Option<u8>,
    #[pyo3(get)]
    endpoint: Option<u8>,
    #[pyo3(get)]
    cycle_delta: u32,
    data: Vec<u8>,
}

#[pymethods]
impl Event {
    #[getter]
    fn data<'py>(&self, py: Python<'py>) -> Bound<'py, PyBytes> {
        PyBytes::new(py, &self.data)
    }

    fn __repr__(&self) -> String {
        match &self.pid {
            Some(pid) => format!("Event({}, {pid})", self.kind),
            None => format!("Event({})", self.kind),
        }
    }
}

impl From<us::Event> for Event {
    fn from(event: us::Event) -> Event {
        let mut result = Event {
            kind: String::new(),
            pid: event.pid().map(|pid| pid.name().into_owned()),
            frame: None,
            active: None,
            device: None,
            endpoint: None,
            cycle_delta: event.cycle_delta(),
            data: Vec::new(),
        };
        match event {
            us::Event::Sof { frame } => {
                result.kind = "sof".to_string();
                result.frame = Some(frame);
            }
            us::Event::Reset { active, .. } => {
                result.kind = "reset".to_string();
                result.active = Some(active);
            }
            us::Event::Token { device, endpoint, .. } => {
                result.kind = "token".to_string();
                result.device = Some(device);
                result.endpoint = Some(endpoint);
            }
            us::Event::Handshake { .. } => {
                result.kind = "handshake".to_string();
            }
            us::Event::Data { bytes, .. } => {
                result.kind = "data".to_string();
                result.data = bytes;
            }
        }
        result
    }
}

/// CRC5 over the low `bits` bits of `data`.
#[pyfunction]
#[pyo3(signature = (data, bits=11))]
fn crc5(data: u32, bits: u32) -> u8 {
    us::crc5(data, bits)
}

/// Move DATA control words in front of their payloads.
#[pyfunction]
fn reorder<'py>(py: Python<'py>, capture: &[u8]) -> PyResult<Bound<'py, PyBytes>> {
    let mut words = us::event::words_from_bytes(capture)
        .map_err(|err| PyValueError::new_err(err.to_string()))?;
    us::reorder_records(&mut words).map_err(|err| PyValueError::new_err(err.to_string()))?;
    Ok(PyBytes::new(py, &us::event::words_to_bytes(&words)))
}

/// Decode forward-ordered capture words into events.
#[pyfunction]
fn decode(capture: &[u8]) -> PyResult<Vec<Event>> {
    let words = us::event::words_from_bytes(capture)
        .map_err(|err| PyValueError::new_err(err.to_string()))?;
    let events = us::decode_events(&words).map_err(|err| PyValueError::new_err(err.to_string()))?;
    Ok(events.into_iter().map(Event::from).collect())
}

/// Write a trace from capture memory in the order the analyzer wrote it.
/// Returns the output path, or `None` if the capture was empty and nothing
/// was written.
#[pyfunction]
#[pyo3(signature = (path, capture, speed=None, include_sof=true))]
fn write_trace(
    path: PathBuf,
    capture: &[u8],
    speed: Option<&Bound<'_, PyAny>>,
    include_sof: bool,
) -> PyResult<Option<PathBuf>> {
    let speed = speed.map(parse_speed).transpose()?.unwrap_or_default();
    let config = CaptureOptions {
        speed: Some(speed),
        include_sof: Some(include_sof),
        output: Some(path),
    }
    .resolve()
    .map_err(|err| PyValueError::new_err(err.to_string()))?;

    let summary = us::session::write_capture(config, capture)
        .map_err(|err| PyRuntimeError::new_err(format!("{err:#}")))?;
    Ok(summary.output)
}

#[pymodule]
fn usbsniffer(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<Event>()?;
    m.add_function(wrap_pyfunction!(crc5, m)?)?;
    m.add_function(wrap_pyfunction!(reorder, m)?)?;
    m.add_function(wrap_pyfunction!(decode, m)?)?;
    m.add_function(wrap_pyfunction!(write_trace, m)?)?;
    Ok(())
}

fn parse_speed(speed: &Bound<'_, PyAny>) -> PyResult<Speed> {
    if let Ok(speed_str) = speed.extract::<&str>() {
        speed_str
            .parse()
            .map_err(|err: us::FormatError| PyValueError::new_err(err.to_string()))
    } else if let Ok(speed_val) = speed.extract::<u8>() {
        Ok(Speed::from(speed_val))
    } else {
        Err(PyTypeError::new_err(
            "speed must be a string like 'high' or a u8 value",
        ))
    }
}
