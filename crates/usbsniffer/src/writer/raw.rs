//! Length-prefixed packet traces (`.raw`).
//!
//! Each packet is written as a little-endian `u16` length followed by the
//! packet bytes, PID first. Resets and timing are not represented.

use std::io::{self, Write};

use super::{LogWriter, Sink};
use crate::usb::{PID, Speed, sof_packet, token_packet};

pub struct RawWriter<W: Write> {
    sink: Sink<W>,
}

impl<W: Write> RawWriter<W> {
    pub fn new(sink: W) -> RawWriter<W> {
        RawWriter {
            sink: Sink::new(sink),
        }
    }

    pub fn into_inner(self) -> Option<W> {
        self.sink.into_inner()
    }

    fn record(&mut self, pid: u8, body: &[u8]) -> io::Result<()> {
        let length = u16::try_from(body.len() + 1).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{}-byte packet is too long for a raw record", body.len() + 1),
            )
        })?;
        self.sink.write_all(&length.to_le_bytes())?;
        self.sink.write_all(&[pid])?;
        self.sink.write_all(body)
    }
}

impl<W: Write> LogWriter for RawWriter<W> {
    fn add_sof(&mut self, frame: u16, _speed: Speed) -> io::Result<()> {
        let packet = sof_packet(frame);
        self.record(packet[0], &packet[1..])
    }

    fn add_reset(&mut self, _active: bool, _cycle_delta: u32, _speed: Speed) -> io::Result<()> {
        Ok(())
    }

    fn add_token(&mut self, pid: PID, device: u8, endpoint: u8, _cycle_delta: u32)
        -> io::Result<()>
    {
        let packet = token_packet(pid, device, endpoint);
        self.record(packet[0], &packet[1..])
    }

    fn add_handshake(&mut self, pid: PID, _cycle_delta: u32) -> io::Result<()> {
        self.record(pid.into(), &[])
    }

    fn add_data(&mut self, pid: PID, bytes: &[u8], _cycle_delta: u32) -> io::Result<()> {
        self.record(pid.into(), bytes)
    }

    fn close(&mut self) -> io::Result<()> {
        self.sink.close()
    }
}
