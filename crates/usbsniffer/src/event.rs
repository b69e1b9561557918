//! Capture records and the bus events decoded from them.
//!
//! The analyzer stores one 32-bit control word per bus event. DATA records
//! are followed by `ceil(len / 4)` words of little-endian payload; every
//! other record is a single word.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::DecodeError;
use crate::usb::PID;

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct CaptureWord(u32);
    impl Debug;
    pub u16, sof_frame, set_sof_frame: 10, 0;
    pub bool, reset_state, set_reset_state: 11;
    pub u8, pid_nibble, set_pid_nibble: 3, 0;
    pub u16, token_data, set_token_data: 19, 4;
    pub u8, token_device, set_token_device: 10, 4;
    pub u8, token_endpoint, set_token_endpoint: 14, 11;
    pub u16, data_len, set_data_len: 19, 4;
    pub u8, cycle, set_cycle: 27, 20;
    pub u8, record_tag, set_record_tag: 31, 28;
}

#[derive(Copy, Clone, Debug, IntoPrimitive, TryFromPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Sof       = 1,
    Reset     = 2,
    Token     = 3,
    Handshake = 4,
    Data      = 5,
}

impl CaptureWord {
    fn with_type(record_type: RecordType) -> CaptureWord {
        let mut word = CaptureWord(0);
        word.set_record_tag(record_type.into());
        word
    }

    pub fn sof(frame: u16) -> CaptureWord {
        let mut word = CaptureWord::with_type(RecordType::Sof);
        word.set_sof_frame(frame & 0x7FF);
        word
    }

    pub fn reset(active: bool, cycle_delta: u32) -> CaptureWord {
        let mut word = CaptureWord::with_type(RecordType::Reset);
        word.set_reset_state(active);
        word.set_cycle_delta(cycle_delta);
        word
    }

    pub fn token(pid: PID, device: u8, endpoint: u8, cycle_delta: u32) -> CaptureWord {
        let mut word = CaptureWord::with_type(RecordType::Token);
        word.set_pid(pid);
        word.set_token_device(device & 0x7F);
        word.set_token_endpoint(endpoint & 0x0F);
        word.set_cycle_delta(cycle_delta);
        word
    }

    pub fn handshake(pid: PID, cycle_delta: u32) -> CaptureWord {
        let mut word = CaptureWord::with_type(RecordType::Handshake);
        word.set_pid(pid);
        word.set_cycle_delta(cycle_delta);
        word
    }

    pub fn data(pid: PID, length: u16, cycle_delta: u32) -> CaptureWord {
        let mut word = CaptureWord::with_type(RecordType::Data);
        word.set_pid(pid);
        word.set_data_len(length);
        word.set_cycle_delta(cycle_delta);
        word
    }

    /// The record type, or an error naming the word's position in the buffer.
    pub fn record_type(&self, index: usize) -> Result<RecordType, DecodeError> {
        let tag = self.record_tag();
        RecordType::try_from(tag).map_err(|_| DecodeError::UnknownType {
            word: self.0,
            tag,
            index,
        })
    }

    pub fn pid(&self) -> PID {
        PID::from_nibble(self.pid_nibble())
    }

    fn set_pid(&mut self, pid: PID) {
        self.set_pid_nibble(u8::from(pid) & 0x0F);
    }

    /// Ticks since the previous record. Only the top byte of the 16-bit
    /// delta is captured.
    pub fn cycle_delta(&self) -> u32 {
        u32::from(self.cycle()) << 8
    }

    fn set_cycle_delta(&mut self, ticks: u32) {
        self.set_cycle(((ticks >> 8) & 0xFF) as u8);
    }

    /// Number of payload words belonging to a DATA record.
    pub fn payload_words(&self) -> usize {
        usize::from(self.data_len()).div_ceil(4)
    }
}

/// A decoded bus event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Sof {
        frame: u16,
    },
    Reset {
        active: bool,
        cycle_delta: u32,
    },
    Token {
        pid: PID,
        device: u8,
        endpoint: u8,
        cycle_delta: u32,
    },
    Handshake {
        pid: PID,
        cycle_delta: u32,
    },
    Data {
        pid: PID,
        cycle_delta: u32,
        bytes: Vec<u8>,
    },
}

impl Event {
    pub fn pid(&self) -> Option<PID> {
        use Event::*;
        match self {
            Sof { .. } => Some(PID::SOF),
            Reset { .. } => None,
            Token { pid, .. } | Handshake { pid, .. } | Data { pid, .. } => Some(*pid),
        }
    }

    pub fn cycle_delta(&self) -> u32 {
        use Event::*;
        match self {
            Sof { .. } => 0,
            Reset { cycle_delta, .. }
            | Token { cycle_delta, .. }
            | Handshake { cycle_delta, .. }
            | Data { cycle_delta, .. } => *cycle_delta,
        }
    }

    /// Encode this event as capture words in forward (decodable) order.
    pub fn to_words(&self) -> Vec<u32> {
        use Event::*;
        match self {
            Sof { frame } => vec![CaptureWord::sof(*frame).0],
            Reset { active, cycle_delta } => vec![CaptureWord::reset(*active, *cycle_delta).0],
            Token { pid, device, endpoint, cycle_delta } => {
                vec![CaptureWord::token(*pid, *device, *endpoint, *cycle_delta).0]
            }
            Handshake { pid, cycle_delta } => vec![CaptureWord::handshake(*pid, *cycle_delta).0],
            Data { pid, cycle_delta, bytes } => {
                let length = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
                let mut words = vec![CaptureWord::data(*pid, length, *cycle_delta).0];
                words.extend(
                    bytes[..usize::from(length)]
                        .chunks(4)
                        .map(|chunk| {
                            let mut word = [0u8; 4];
                            word[..chunk.len()].copy_from_slice(chunk);
                            u32::from_le_bytes(word)
                        }),
                );
                words
            }
        }
    }

    /// Encode this event as the analyzer writes it to memory, with a DATA
    /// record's control word after its payload.
    pub fn to_capture_words(&self) -> Vec<u32> {
        let mut words = self.to_words();
        if matches!(self, Event::Data { .. }) {
            words.rotate_left(1);
        }
        words
    }
}

/// Iterator over the events in a buffer of forward-ordered capture words.
///
/// Iteration stops after the first error; the remainder of the buffer
/// cannot be trusted.
pub struct EventDecoder<'a> {
    words: &'a [u32],
    index: usize,
    failed: bool,
}

impl<'a> EventDecoder<'a> {
    pub fn new(words: &'a [u32]) -> EventDecoder<'a> {
        EventDecoder {
            words,
            index: 0,
            failed: false,
        }
    }

    fn decode_record(&mut self, index: usize, word: CaptureWord) -> Result<Event, DecodeError> {
        use RecordType::*;
        Ok(match word.record_type(index)? {
            Sof => Event::Sof {
                frame: word.sof_frame(),
            },
            Reset => Event::Reset {
                active: word.reset_state(),
                cycle_delta: word.cycle_delta(),
            },
            Token => Event::Token {
                pid: word.pid(),
                device: word.token_device(),
                endpoint: word.token_endpoint(),
                cycle_delta: word.cycle_delta(),
            },
            Handshake => Event::Handshake {
                pid: word.pid(),
                cycle_delta: word.cycle_delta(),
            },
            Data => {
                let length = word.data_len();
                let end = self.index + word.payload_words();
                let payload = self
                    .words
                    .get(self.index..end)
                    .ok_or(DecodeError::Truncated { index, length })?;
                self.index = end;
                Event::Data {
                    pid: word.pid(),
                    cycle_delta: word.cycle_delta(),
                    bytes: payload
                        .iter()
                        .flat_map(|word| word.to_le_bytes())
                        .take(usize::from(length))
                        .collect(),
                }
            }
        })
    }
}

impl Iterator for EventDecoder<'_> {
    type Item = Result<Event, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let index = self.index;
        let value = *self.words.get(index)?;
        self.index += 1;
        let result = self.decode_record(index, CaptureWord(value));
        self.failed = result.is_err();
        Some(result)
    }
}

/// Decode a whole buffer of forward-ordered capture words.
pub fn decode_events(words: &[u32]) -> Result<Vec<Event>, DecodeError> {
    EventDecoder::new(words).collect()
}

/// Split raw capture memory into little-endian words.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>, DecodeError> {
    if bytes.len() % 4 != 0 {
        return Err(DecodeError::PartialWord {
            length: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_positions() {
        let word = CaptureWord(0x5AB1_2343);
        assert_eq!(word.record_tag(), 5);
        assert_eq!(word.cycle(), 0xAB);
        assert_eq!(word.cycle_delta(), 0xAB00);
        assert_eq!(word.data_len(), 0x1234);
        assert_eq!(word.pid_nibble(), 0x3);
        assert_eq!(word.pid(), PID::DATA0);

        let word = CaptureWord(0x2000_0800 | 0x123);
        assert_eq!(word.record_type(0), Ok(RecordType::Reset));
        assert!(word.reset_state());
        assert_eq!(word.sof_frame(), 0x123);
    }

    #[test]
    fn test_token_fields() {
        let word = CaptureWord::token(PID::OUT, 2, 3, 0x1200);
        assert_eq!(word.record_tag(), 3);
        assert_eq!(word.token_data(), 2 | (3 << 7));
        assert_eq!(word.token_device(), 2);
        assert_eq!(word.token_endpoint(), 3);
        assert_eq!(word.pid(), PID::OUT);
        assert_eq!(word.cycle_delta(), 0x1200);
    }

    #[test]
    fn test_decode_simple_records() {
        let words = [
            CaptureWord::sof(1).0,
            CaptureWord::reset(true, 0x300).0,
            CaptureWord::token(PID::IN, 5, 1, 0x100).0,
            CaptureWord::handshake(PID::NAK, 0x200).0,
        ];
        let events = decode_events(&words).unwrap();
        assert_eq!(
            events,
            vec![
                Event::Sof { frame: 1 },
                Event::Reset { active: true, cycle_delta: 0x300 },
                Event::Token { pid: PID::IN, device: 5, endpoint: 1, cycle_delta: 0x100 },
                Event::Handshake { pid: PID::NAK, cycle_delta: 0x200 },
            ]
        );
    }

    #[test]
    fn test_decode_data_payload() {
        let words = [
            CaptureWord::data(PID::DATA1, 6, 0x400).0,
            0x4433_2211,
            0x0000_6655,
            CaptureWord::handshake(PID::ACK, 0).0,
        ];
        let events = decode_events(&words).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            Event::Data {
                pid: PID::DATA1,
                cycle_delta: 0x400,
                bytes: vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66],
            }
        );
        assert_eq!(events[1].pid(), Some(PID::ACK));
    }

    #[test]
    fn test_decode_empty_data() {
        let words = [CaptureWord::data(PID::DATA0, 0, 0).0];
        let events = decode_events(&words).unwrap();
        assert_eq!(
            events,
            vec![Event::Data { pid: PID::DATA0, cycle_delta: 0, bytes: vec![] }]
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        let words = [CaptureWord::sof(3).0, 0x7000_0000, CaptureWord::sof(4).0];
        let mut decoder = EventDecoder::new(&words);
        assert!(matches!(decoder.next(), Some(Ok(Event::Sof { frame: 3 }))));
        assert_eq!(
            decoder.next(),
            Some(Err(DecodeError::UnknownType { word: 0x7000_0000, tag: 7, index: 1 }))
        );
        assert_eq!(decoder.next(), None);
        assert!(decode_events(&[0]).is_err());
    }

    #[test]
    fn test_decode_truncated_data() {
        let words = [CaptureWord::data(PID::DATA0, 9, 0).0, 0, 0];
        assert_eq!(
            decode_events(&words),
            Err(DecodeError::Truncated { index: 0, length: 9 })
        );
    }

    #[test]
    fn test_encode_decode_events() {
        let events = vec![
            Event::Sof { frame: 0x7FF },
            Event::Token { pid: PID::SETUP, device: 0, endpoint: 0, cycle_delta: 0xFF00 },
            Event::Data { pid: PID::DATA0, cycle_delta: 0x100, bytes: vec![1, 2, 3, 4, 5] },
        ];
        let words: Vec<u32> = events.iter().flat_map(Event::to_words).collect();
        assert_eq!(words.len(), 5);
        assert_eq!(decode_events(&words).unwrap(), events);
    }

    #[test]
    fn test_capture_order() {
        let event = Event::Data { pid: PID::DATA0, cycle_delta: 0, bytes: vec![0xAA, 0xBB] };
        let words = event.to_capture_words();
        assert_eq!(words, vec![0x0000_BBAA, CaptureWord::data(PID::DATA0, 2, 0).0]);
    }

    #[test]
    fn test_words_from_bytes() {
        let words = words_from_bytes(&[0x01, 0x02, 0x03, 0x04, 0xAA, 0, 0, 0x10]).unwrap();
        assert_eq!(words, vec![0x0403_0201, 0x1000_00AA]);
        assert_eq!(words_to_bytes(&words), vec![0x01, 0x02, 0x03, 0x04, 0xAA, 0, 0, 0x10]);
        assert_eq!(
            words_from_bytes(&[0; 6]),
            Err(DecodeError::PartialWord { length: 6 })
        );
    }
}
