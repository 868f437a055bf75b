//! Table-driven conversion of brightness bytes into the three-tick-per-bit line code.
//!
//! Each data bit becomes a group of three ticks, most-significant bit first:
//! `110` for a logical one and `100` for a logical zero. A brightness byte therefore
//! expands to exactly 24 ticks, which pack into three bytes.
//!
//! ```
//! use led_strip_dma::waveform::{convert, WAVEFORM_TABLE};
//!
//! assert_eq!(WAVEFORM_TABLE[0x02], [0x92, 0x49, 0x34]);
//!
//! let mut out = [0u8; 6];
//! let written = convert(&mut out[..], &[0x02, 0xff]).unwrap();
//! assert_eq!(written, 6);
//! assert_eq!(out, [0x92, 0x49, 0x34, 0xdb, 0x6d, 0xb6]);
//! ```

use crate::{Error, Result};

/// Bytes of waveform produced per brightness byte.
pub const PATTERN_LEN: usize = 3;

const ONE_GROUP: u32 = 0b110;
const ZERO_GROUP: u32 = 0b100;

/// Pattern for every brightness value; entry `b` encodes brightness `b`.
pub const WAVEFORM_TABLE: [[u8; PATTERN_LEN]; 256] = generate_table();

/// Expand one brightness byte into its 24-tick pattern.
#[must_use]
pub const fn encode(value: u8) -> [u8; PATTERN_LEN] {
    let mut ticks: u32 = 0;
    let mut bit: u32 = 0;
    while bit < 8 {
        let group = if value & (0x80 >> bit) != 0 {
            ONE_GROUP
        } else {
            ZERO_GROUP
        };
        ticks = (ticks << 3) | group;
        bit += 1;
    }
    let [_, high, middle, low] = ticks.to_be_bytes();
    [high, middle, low]
}

/// Recover the brightness byte from a pattern.
///
/// Returns `None` if any three-tick group is neither `110` nor `100`.
#[must_use]
pub const fn decode(pattern: [u8; PATTERN_LEN]) -> Option<u8> {
    let ticks = u32::from_be_bytes([0, pattern[0], pattern[1], pattern[2]]);
    let mut value: u8 = 0;
    let mut bit: u32 = 0;
    while bit < 8 {
        let group = (ticks >> (21 - 3 * bit)) & 0b111;
        value <<= 1;
        if group == ONE_GROUP {
            value |= 1;
        } else if group != ZERO_GROUP {
            return None;
        }
        bit += 1;
    }
    Some(value)
}

const fn generate_table() -> [[u8; PATTERN_LEN]; 256] {
    let mut table = [[0u8; PATTERN_LEN]; 256];
    let mut index = 0;
    while index < 256 {
        table[index] = encode(index as u8);
        index += 1;
    }
    table
}

/// Destination for converted patterns.
///
/// Plain byte slices take the patterns as-is. Memory the DMA engine reads implements this with
/// ordered stores (see [`crate::dma::DmaRegion`]).
pub trait WaveformSink {
    /// Bytes available for patterns.
    fn capacity(&self) -> usize;

    /// Store one pattern at byte `offset` of the logical stream.
    fn write_pattern(&mut self, offset: usize, pattern: [u8; PATTERN_LEN]);
}

impl WaveformSink for [u8] {
    fn capacity(&self) -> usize {
        self.len()
    }

    fn write_pattern(&mut self, offset: usize, pattern: [u8; PATTERN_LEN]) {
        if let Some(slot) = self.get_mut(offset..offset + PATTERN_LEN) {
            slot.copy_from_slice(&pattern);
        }
    }
}

/// Bytes of waveform needed for `count` brightness values.
pub const fn waveform_len(count: usize) -> Result<usize> {
    match count.checked_mul(PATTERN_LEN) {
        Some(len) => Ok(len),
        None => Err(Error::invalid("brightness count overflows waveform length")),
    }
}

/// Copy the pattern of each brightness value into `out`, in input order.
///
/// Returns the number of bytes written, always `3 * brightness.len()`.
///
/// # Errors
///
/// [`Error::InvalidArgument`] if `out` cannot hold every pattern. Nothing is written in that case.
pub fn convert<S>(out: &mut S, brightness: &[u8]) -> Result<usize>
where
    S: WaveformSink + ?Sized,
{
    let len = waveform_len(brightness.len())?;
    if len > out.capacity() {
        return Err(Error::invalid("waveform buffer too small for brightness count"));
    }
    for (index, &value) in brightness.iter().enumerate() {
        out.write_pattern(index * PATTERN_LEN, WAVEFORM_TABLE[usize::from(value)]);
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_known_entries() {
        assert_eq!(WAVEFORM_TABLE[0x00], [0x92, 0x49, 0x24]);
        assert_eq!(WAVEFORM_TABLE[0x01], [0x92, 0x49, 0x26]);
        assert_eq!(WAVEFORM_TABLE[0x02], [0x92, 0x49, 0x34]);
        assert_eq!(WAVEFORM_TABLE[0x80], [0xd2, 0x49, 0x24]);
        assert_eq!(WAVEFORM_TABLE[0xff], [0xdb, 0x6d, 0xb6]);
    }

    #[test]
    fn every_pattern_decodes_to_its_index() {
        for value in 0..=u8::MAX {
            assert_eq!(decode(WAVEFORM_TABLE[usize::from(value)]), Some(value));
        }
    }

    #[test]
    fn every_group_starts_high_and_ends_low() {
        for pattern in &WAVEFORM_TABLE {
            let ticks = u32::from_be_bytes([0, pattern[0], pattern[1], pattern[2]]);
            for bit in 0..8_u32 {
                let group = (ticks >> (21 - 3 * bit)) & 0b111;
                assert_eq!(group & 0b100, 0b100);
                assert_eq!(group & 0b001, 0);
            }
        }
    }

    #[test]
    fn decode_rejects_malformed_groups() {
        assert_eq!(decode([0xff, 0xff, 0xff]), None);
        assert_eq!(decode([0x00, 0x00, 0x00]), None);
    }

    #[test]
    fn convert_writes_three_bytes_per_value_in_order() {
        let mut out = [0xAAu8; 10];
        let written = convert(&mut out[..], &[0x00, 0x02, 0xff]).unwrap();
        assert_eq!(written, 9);
        assert_eq!(
            out,
            [0x92, 0x49, 0x24, 0x92, 0x49, 0x34, 0xdb, 0x6d, 0xb6, 0xAA]
        );
    }

    #[test]
    fn convert_is_idempotent() {
        let input = [7u8, 42, 199, 0, 255];
        let mut first = [0u8; 15];
        let mut second = [0u8; 15];
        convert(&mut first[..], &input).unwrap();
        convert(&mut second[..], &input).unwrap();
        convert(&mut second[..], &input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn convert_rejects_short_output_without_writing() {
        let mut out = [0u8; 5];
        assert!(matches!(
            convert(&mut out[..], &[1, 2]),
            Err(Error::InvalidArgument { .. })
        ));
        assert_eq!(out, [0u8; 5]);
    }

    #[test]
    fn convert_of_nothing_writes_nothing() {
        let mut out = [0u8; 0];
        assert_eq!(convert(&mut out[..], &[]), Ok(0));
    }
}
