//! PHY-level replay traces (`.usb`).
//!
//! The trace mimics what a ULPI analyzer records on the wire: a stream of
//! 4-byte frames, each carrying one received data byte, one RX command
//! (line state change), or a large time increment. Every frame header holds
//! a 4-bit time increment; increments above 4095 ticks are preceded by a
//! large-time frame carrying the rest.
//!
//! Frame layout: `[time[11:4], header, aux, payload]`.

use std::io::{self, Write};

use num_enum::{FromPrimitive, IntoPrimitive};

use super::{LogWriter, Sink};
use crate::timing::LineTiming;
use crate::usb::{PID, Speed, sof_packet, token_packet};

/// Largest increment a single frame can carry.
const NORMAL_INC_MAX: u32 = 0xFFF;

const LINESTATE_SE0: u8 = 0x0;
const LINESTATE_IDLE: u8 = 0x1;

#[derive(Copy, Clone, Debug, Default, FromPrimitive, IntoPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    #[default]
    None  = 0,
    Event = 1,
    Data  = 2,
    RxCmd = 3,
}

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct FrameHeader(u8);
    impl Debug;
    pub u8, time_inc, set_time_inc: 3, 0;
    pub u8, payload_len, set_payload_len: 5, 4;
    pub u8, from into PayloadType, payload_type, set_payload_type: 7, 6;
}

/// Receiver activity reported in an RX command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
enum RxEvent {
    Inactive = 0x0,
    Active   = 0x1,
}

/// One decoded replay frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReplayFrame {
    pub header: FrameHeader,
    pub bytes: [u8; 4],
}

impl ReplayFrame {
    pub fn from_bytes(bytes: [u8; 4]) -> ReplayFrame {
        ReplayFrame {
            header: FrameHeader(bytes[1]),
            bytes,
        }
    }

    pub fn payload_type(&self) -> PayloadType {
        self.header.payload_type()
    }

    /// Ticks this frame advances the trace clock by.
    pub fn ticks(&self) -> u32 {
        let low = u32::from(self.header.time_inc()) | (u32::from(self.bytes[0]) << 4);
        if self.payload_type() == PayloadType::None {
            low | (u32::from(self.bytes[3]) << 12) | (u32::from(self.bytes[2]) << 20)
        } else {
            low
        }
    }

    pub fn payload(&self) -> u8 {
        self.bytes[3]
    }
}

/// Split a replay trace into its frames. Trailing partial frames are ignored.
pub fn parse_frames(bytes: &[u8]) -> Vec<ReplayFrame> {
    bytes
        .chunks_exact(4)
        .map(|chunk| ReplayFrame::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub struct ReplayWriter<W: Write> {
    sink: Sink<W>,
    timing: LineTiming,
}

impl<W: Write> ReplayWriter<W> {
    pub fn new(sink: W) -> ReplayWriter<W> {
        ReplayWriter {
            sink: Sink::new(sink),
            timing: LineTiming::new(),
        }
    }

    pub fn into_inner(self) -> Option<W> {
        self.sink.into_inner()
    }

    fn frame(
        &mut self,
        payload_type: PayloadType,
        len: u8,
        ticks: u32,
        aux: u8,
        payload: u8,
    ) -> io::Result<()> {
        let mut header = FrameHeader(0);
        header.set_time_inc((ticks & 0xF) as u8);
        header.set_payload_len(len);
        header.set_payload_type(payload_type);
        self.sink.write_all(&[(ticks >> 4) as u8, header.0, aux, payload])
    }

    fn large_time(&mut self, ticks: u32) -> io::Result<()> {
        self.frame(PayloadType::None, 3, ticks, (ticks >> 20) as u8, (ticks >> 12) as u8)
    }

    fn rx_cmd(&mut self, ticks: u32, linestate: u8, event: RxEvent) -> io::Result<()> {
        if ticks > NORMAL_INC_MAX {
            self.large_time(ticks & !NORMAL_INC_MAX)?;
        }
        self.frame(PayloadType::RxCmd, 1, ticks, 0, linestate | ((event as u8) << 4))?;
        self.timing.advance(ticks);
        Ok(())
    }

    fn data_byte(&mut self, byte: u8) -> io::Result<()> {
        self.frame(PayloadType::Data, 1, 1, 0, byte)?;
        self.timing.advance(1);
        Ok(())
    }

    /// Emit a packet as line activity, its bytes, then a return to idle.
    fn packet<I>(&mut self, delay: u32, bytes: I) -> io::Result<()>
    where
        I: IntoIterator<Item = u8>,
    {
        self.rx_cmd(delay, LINESTATE_IDLE, RxEvent::Active)?;
        for byte in bytes {
            self.data_byte(byte)?;
        }
        self.rx_cmd(1, LINESTATE_IDLE, RxEvent::Inactive)
    }
}

impl<W: Write> LogWriter for ReplayWriter<W> {
    fn add_sof(&mut self, frame: u16, speed: Speed) -> io::Result<()> {
        let padding = self.timing.sof_padding(speed);
        self.packet(padding, sof_packet(frame))?;
        self.timing.restart();
        Ok(())
    }

    fn add_reset(&mut self, active: bool, cycle_delta: u32, _speed: Speed) -> io::Result<()> {
        if let Some(duration) = self.timing.reset_transition(active, cycle_delta) {
            let linestate = if active { LINESTATE_SE0 } else { LINESTATE_IDLE };
            self.rx_cmd(duration, linestate, RxEvent::Inactive)?;
            // The next frame is measured from the line state change.
            self.timing.restart();
        }
        Ok(())
    }

    fn add_token(&mut self, pid: PID, device: u8, endpoint: u8, cycle_delta: u32)
        -> io::Result<()>
    {
        self.packet(cycle_delta, token_packet(pid, device, endpoint))
    }

    fn add_handshake(&mut self, pid: PID, cycle_delta: u32) -> io::Result<()> {
        self.packet(cycle_delta, [u8::from(pid)])
    }

    fn add_data(&mut self, pid: PID, bytes: &[u8], cycle_delta: u32) -> io::Result<()> {
        self.packet(cycle_delta, std::iter::once(u8::from(pid)).chain(bytes.iter().copied()))
    }

    fn close(&mut self) -> io::Result<()> {
        self.sink.close()
    }
}
