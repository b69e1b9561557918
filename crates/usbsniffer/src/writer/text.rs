//! Human-readable traces (`.txt`).

use std::io::{self, Write};

use super::{LogWriter, Sink};
use crate::timing::LineTiming;
use crate::usb::{PID, Speed};

/// Payload bytes per hex dump row.
const BYTES_PER_ROW: usize = 16;

pub struct TextWriter<W: Write> {
    sink: Sink<W>,
    timing: LineTiming,
}

impl<W: Write> TextWriter<W> {
    pub fn new(sink: W) -> TextWriter<W> {
        TextWriter {
            sink: Sink::new(sink),
            timing: LineTiming::new(),
        }
    }

    pub fn into_inner(self) -> Option<W> {
        self.sink.into_inner()
    }
}

impl<W: Write> LogWriter for TextWriter<W> {
    fn add_sof(&mut self, frame: u16, _speed: Speed) -> io::Result<()> {
        self.timing.restart();
        writeln!(self.sink, "SOF - Frame {frame}")
    }

    fn add_reset(&mut self, active: bool, cycle_delta: u32, _speed: Speed) -> io::Result<()> {
        if self.timing.reset_transition(active, cycle_delta).is_some() {
            writeln!(self.sink, "USB RST = {}", u8::from(active))?;
        }
        Ok(())
    }

    fn add_token(&mut self, pid: PID, device: u8, endpoint: u8, _cycle_delta: u32)
        -> io::Result<()>
    {
        writeln!(self.sink, "{} Device {device} Endpoint {endpoint}", pid.name())
    }

    fn add_handshake(&mut self, pid: PID, _cycle_delta: u32) -> io::Result<()> {
        writeln!(self.sink, "  {}", pid.name())
    }

    /// `Length` counts every captured byte, including the two CRC16 bytes
    /// that end the payload. The dump shows them as well, and the footer
    /// repeats them as `CRC = xxyy`.
    fn add_data(&mut self, pid: PID, bytes: &[u8], _cycle_delta: u32) -> io::Result<()> {
        write!(self.sink, "  {} Length {}:", pid.name(), bytes.len())?;
        for (row, chunk) in bytes.chunks(BYTES_PER_ROW).enumerate() {
            if row > 0 {
                write!(self.sink, "\n   ")?;
            }
            for byte in chunk {
                write!(self.sink, " {byte:02x}")?;
            }
        }
        if let [.., crc_lo, crc_hi] = bytes {
            write!(self.sink, "  CRC = {crc_lo:02x}{crc_hi:02x}")?;
        }
        writeln!(self.sink)
    }

    fn close(&mut self) -> io::Result<()> {
        self.sink.close()
    }
}
