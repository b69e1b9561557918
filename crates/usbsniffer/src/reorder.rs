//! Repair of the analyzer's on-wire record ordering.
//!
//! The analyzer only learns a DATA packet's length once the packet has
//! ended, so it writes the payload words first and the control word after
//! them. Scanning backwards from the newest word, every control word can be
//! identified and moved in front of its payload, giving a buffer that
//! decodes front to back.

use log::debug;

use crate::error::DecodeError;
use crate::event::{CaptureWord, RecordType};

/// Move each DATA record's control word in front of its payload, in place.
///
/// On error the buffer contents are unspecified and must be discarded.
pub fn reorder_records(words: &mut [u32]) -> Result<(), DecodeError> {
    // Words at indices >= `cursor` are already in forward order.
    let mut cursor = words.len();
    let mut data_records = 0;

    while cursor > 0 {
        cursor -= 1;
        let value = words[cursor];
        let word = CaptureWord(value);

        if word.record_type(cursor)? != RecordType::Data {
            continue;
        }

        let payload = word.payload_words();
        let start = cursor
            .checked_sub(payload)
            .ok_or(DecodeError::Underflow {
                index: cursor,
                length: word.data_len(),
            })?;
        words.copy_within(start..cursor, start + 1);
        words[start] = value;
        cursor = start;
        data_records += 1;
    }

    debug!("Reordered {data_records} DATA records in {} words", words.len());
    Ok(())
}
