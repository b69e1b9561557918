//! Code describing the USB standard and its data types.

use std::borrow::Cow;
use std::str::FromStr;

use crc::{Crc, CRC_16_USB};
use num_enum::{IntoPrimitive, FromPrimitive};

use crate::error::FormatError;

/// Analyzer ticks in one high speed microframe (125us).
pub const TICKS_PER_HS_UFRAME: u32 = 7500;

/// Analyzer ticks in one full/low speed frame (1ms).
pub const TICKS_PER_FSLS_FRAME: u32 = 60000;

pub fn crc16(bytes: &[u8]) -> u16 {
    const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_USB);
    CRC16.checksum(bytes)
}

// We can't use the CRC_5_USB implementation, because we need to
// compute the CRC over 11 bits of data, rather than over an integer
// number of bytes.
//
// This is the reflected form of the USB generator: shifting the input
// out LSB first with the reversed tap (0x14) is the same register as
// bit-reversing the input, shifting MSB first with tap 0x05, and
// reversing the 5-bit result.

pub fn crc5(mut input: u32, num_bits: u32) -> u8 {
    let mut state: u32 = 0x1f;
    for _ in 0..num_bits {
        let cmp = input & 1 != state & 1;
        input >>= 1;
        state >>= 1;
        if cmp {
            state ^= 0x14;
        }
    }
    (state ^ 0x1f) as u8
}

/// Rebuild a full PID byte from its low nibble. The high nibble of a PID
/// is always the complement of the low one.
pub fn reconstruct_pid(nibble: u8) -> u8 {
    let nibble = nibble & 0x0F;
    nibble | (!(nibble << 4) & 0xF0)
}

#[derive(Copy, Clone, Debug, Default, FromPrimitive, IntoPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum Speed {
    #[default]
    High = 0,
    Full = 1,
    Low  = 2,
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Default, IntoPrimitive, FromPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum PID {
    RSVD  = 0xF0,
    OUT   = 0xE1,
    ACK   = 0xD2,
    DATA0 = 0xC3,
    PING  = 0xB4,
    SOF   = 0xA5,
    NYET  = 0x96,
    DATA2 = 0x87,
    SPLIT = 0x78,
    IN    = 0x69,
    NAK   = 0x5A,
    DATA1 = 0x4B,
    ERR   = 0x3C,
    SETUP = 0x2D,
    STALL = 0x1E,
    MDATA = 0x0F,
    #[default]
    Malformed = 0,
}

impl std::fmt::Display for PID {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<&u8> for PID {
    fn from(byte: &u8) -> PID {
        PID::from(*byte)
    }
}

impl PID {
    /// The PID carried by a capture record's 4-bit PID field.
    pub fn from_nibble(nibble: u8) -> PID {
        PID::from(reconstruct_pid(nibble))
    }

    /// Name used in human-readable traces.
    pub fn name(&self) -> Cow<'static, str> {
        use PID::*;
        match self {
            // ERR shares its encoding with the low speed PRE token.
            ERR => Cow::Borrowed("PRE/ERR"),
            RSVD | Malformed => Cow::Owned(format!("UNKNOWN {:02x}", u8::from(*self))),
            pid => Cow::Owned(pid.to_string()),
        }
    }
}

/// Bytes of a SOF packet for the given frame number, with its CRC5.
pub fn sof_packet(frame: u16) -> [u8; 3] {
    let frame = frame & 0x7FF;
    let crc = crc5(u32::from(frame), 11);
    [
        PID::SOF.into(),
        frame as u8,
        ((frame >> 8) as u8 & 0x07) | (crc << 3),
    ]
}

/// Bytes of a token packet addressed to `device`/`endpoint`, with its CRC5.
pub fn token_packet(pid: PID, device: u8, endpoint: u8) -> [u8; 3] {
    let device = device & 0x7F;
    let endpoint = endpoint & 0x0F;
    let fields = u32::from(device) | (u32::from(endpoint) << 7);
    let crc = crc5(fields, 11);
    [
        pid.into(),
        device | ((endpoint << 7) & 0x80),
        ((endpoint >> 1) & 0x07) | (crc << 3),
    ]
}

pub fn validate_packet(packet: &[u8]) -> Result<PID, Option<PID>> {
    use PID::*;

    match packet.first().map(PID::from) {
        // A zero-byte packet is always invalid, and has no PID.
        None => Err(None),

        // Otherwise, check validity according to PID.
        Some(pid) => {
            let len = packet.len();
            let valid = match pid {

                // SOF and tokens must be three bytes, with a valid CRC5.
                SOF | SETUP | IN | OUT | PING if len == 3 => {
                    let data = u32::from_le_bytes(
                        [packet[1], packet[2] & 0x07, 0, 0]);
                    let crc = packet[2] >> 3;
                    crc == crc5(data, 11)
                }

                // Data packets must be 3 to 1027 bytes, with a valid CRC16.
                DATA0 | DATA1 | DATA2 | MDATA if (3..=1027).contains(&len) => {
                    let data = &packet[1..(len - 2)];
                    let crc = u16::from_le_bytes([packet[len - 2], packet[len - 1]]);
                    crc == crc16(data)
                }

                // Handshake packets must be a single byte.
                ACK | NAK | NYET | STALL | ERR if len == 1 => true,

                // Anything else is invalid.
                _ => false
            };

            if valid {
                // Packet is valid.
                Ok(pid)
            } else {
                // Invalid, but has a (possibly wrong or malformed) PID byte.
                Err(Some(pid))
            }
        }
    }
}

impl Speed {
    /// How this speed setting should be displayed.
    pub fn description(&self) -> &'static str {
        use Speed::*;
        match self {
            High => "High (480Mbps)",
            Full => "Full (12Mbps)",
            Low => "Low (1.5Mbps)",
        }
    }

    pub fn is_high(&self) -> bool {
        *self == Speed::High
    }

    /// Analyzer ticks between consecutive SOF packets at this speed.
    pub fn ticks_per_frame(&self) -> u32 {
        if self.is_high() {
            TICKS_PER_HS_UFRAME
        } else {
            TICKS_PER_FSLS_FRAME
        }
    }
}

impl FromStr for Speed {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Speed, FormatError> {
        match s.to_ascii_lowercase().as_str() {
            "high" | "hs" => Ok(Speed::High),
            "full" | "fs" => Ok(Speed::Full),
            "low" | "ls" => Ok(Speed::Low),
            _ => Err(FormatError::UnknownSpeed(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Straight transcription of the MSB-first generator, used as a
    // reference for the reflected implementation above.
    fn crc5_msb_first(data: u16) -> u8 {
        let swap5 = |v: u32| (v as u8).reverse_bits() >> 3;
        let mut a = (u32::from((data as u8).reverse_bits()) << 8)
            | u32::from(((data >> 8) as u8 & 0x7).reverse_bits());
        let mut crc: u32 = 0x1f << 11;
        for _ in 0..11 {
            let mut next = (crc << 1) & 0xffff;
            if (a ^ crc) & (1 << 15) != 0 {
                next ^= 0x05 << 11;
            }
            crc = next;
            a = (a << 1) & 0xffff;
        }
        swap5((crc >> 11) ^ 0x1f)
    }

    #[test]
    fn test_pid_reconstruction() {
        let expected = [
            (0x0, PID::RSVD), (0x1, PID::OUT), (0x2, PID::ACK),
            (0x3, PID::DATA0), (0x4, PID::PING), (0x5, PID::SOF),
            (0x6, PID::NYET), (0x7, PID::DATA2), (0x8, PID::SPLIT),
            (0x9, PID::IN), (0xA, PID::NAK), (0xB, PID::DATA1),
            (0xC, PID::ERR), (0xD, PID::SETUP), (0xE, PID::STALL),
            (0xF, PID::MDATA),
        ];
        for (nibble, pid) in expected {
            assert_eq!(PID::from_nibble(nibble), pid);
            assert_eq!(reconstruct_pid(nibble), u8::from(pid));
        }
        assert_eq!(reconstruct_pid(0x1), 0xE1);
        assert_eq!(reconstruct_pid(0x5), 0xA5);
    }

    #[test]
    fn test_crc5_known_vectors() {
        // All-zero SOF frame.
        assert_eq!(crc5(0, 11), 0x02);
        // SOF a5 de 1e: frame 1758.
        assert_eq!(crc5(1758, 11), 0x03);
        // SETUP 2d 02 a8: device 2, endpoint 0.
        assert_eq!(crc5(0x002, 11), 0x15);
        // IN 69 82 18: device 2, endpoint 1.
        assert_eq!(crc5(0x082, 11), 0x03);
    }

    #[test]
    fn test_crc5_matches_msb_first_form() {
        for data in 0..0x800u16 {
            assert_eq!(crc5(u32::from(data), 11), crc5_msb_first(data), "input {data:#x}");
        }
    }

    #[test]
    fn test_sof_packet() {
        assert_eq!(sof_packet(1758), [0xa5, 0xde, 0x1e]);
        assert_eq!(validate_packet(&sof_packet(0)), Ok(PID::SOF));
        assert_eq!(validate_packet(&sof_packet(0x7FF)), Ok(PID::SOF));
    }

    #[test]
    fn test_token_packet() {
        assert_eq!(token_packet(PID::SETUP, 2, 0), [0x2d, 0x02, 0xa8]);
        assert_eq!(token_packet(PID::IN, 2, 1), [0x69, 0x82, 0x18]);
        assert_eq!(validate_packet(&token_packet(PID::OUT, 0x7F, 0xF)), Ok(PID::OUT));
    }

    #[test]
    fn test_pid_names() {
        assert_eq!(PID::OUT.name(), "OUT");
        assert_eq!(PID::ERR.name(), "PRE/ERR");
        assert_eq!(PID::RSVD.name(), "UNKNOWN f0");
    }

    #[test]
    fn test_parse_speed() {
        assert_eq!("HS".parse::<Speed>().unwrap(), Speed::High);
        assert_eq!("full".parse::<Speed>().unwrap(), Speed::Full);
        assert_eq!("ls".parse::<Speed>().unwrap(), Speed::Low);
        assert!("auto".parse::<Speed>().is_err());
        assert_eq!(Speed::Full.ticks_per_frame(), TICKS_PER_FSLS_FRAME);
        assert_eq!(Speed::High.ticks_per_frame(), TICKS_PER_HS_UFRAME);
    }

    #[test]
    fn test_speed_description() {
        assert_eq!(Speed::High.description(), "High (480Mbps)");
        assert_eq!(Speed::Low.description(), "Low (1.5Mbps)");
        assert_eq!("fs".parse::<Speed>().unwrap().description(), "Full (12Mbps)");
    }

    #[test]
    fn test_split_packets_rejected() {
        assert_eq!(validate_packet(&[0x78, 0x00, 0x00, 0x00]), Err(Some(PID::SPLIT)));
    }
}
