#[macro_use]
extern crate bitfield;

pub mod capture;
pub mod error;
pub mod event;
pub mod reorder;
pub mod ring;
pub mod session;
pub mod timing;
pub mod transport;
pub mod usb;
pub mod writer;

use anyhow::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub use crate::usb::{crc5, validate_packet};
pub use crate::{
    capture::CaptureOptions, capture::SessionConfig,
    error::DecodeError, error::FormatError, error::TransportError,
    event::CaptureWord, event::Event, event::decode_events,
    reorder::reorder_records,
    ring::RingRegion,
    session::CaptureSession, session::TraceSummary, session::write_capture,
    transport::MemoryImage, transport::MemoryTransport,
    usb::PID, usb::Speed,
    writer::LogWriter, writer::TraceFormat, writer::TraceWriter,
};
