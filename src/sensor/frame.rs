//! XBee API frame checksum and API-0x92 "I/O Data Sample Rx" payload
//! parsing.

/// Frame start delimiter.
pub const DELIMITER: u8 = 0x7E;

/// Frames whose declared length exceeds this are rejected before reading
/// the body.
pub const MAX_FRAME_SIZE: u16 = 100;

/// `checksum = 0xFF − (sum of payload bytes mod 256)`.
pub fn checksum(payload: &[u8]) -> u8 {
    let sum: u32 = payload.iter().map(|&b| b as u32).sum();
    0xFFu8.wrapping_sub((sum % 256) as u8)
}

/// Bit index (within `analog_mask`) that denotes the temperature channel.
const TEMPERATURE_BIT: u8 = 1 << 1;

/// The parsed fields of an API-0x92 payload, once framing and checksum
/// have already been validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoSampleFrame {
    pub source_address: u64,
    pub network_address: u16,
    pub receive_options: u8,
    pub samples_number: u8,
    pub digital_mask: u16,
    pub analog_mask: u8,
    pub digital_samples: Option<u16>,
    pub analog_samples: Vec<u16>,
}

impl IoSampleFrame {
    /// The raw 10-bit temperature channel value, if analog channel bit 1 is
    /// present in `analog_mask`.
    pub fn temperature_raw(&self) -> Option<u16> {
        if self.analog_mask & TEMPERATURE_BIT == 0 {
            return None;
        }
        // Analog samples are packed LSB-first: channel 1's position among
        // the present samples is the count of lower channel bits set.
        let index = (self.analog_mask & (TEMPERATURE_BIT - 1)).count_ones() as usize;
        self.analog_samples.get(index).copied()
    }
}

/// Outcome of parsing a well-framed, checksum-valid payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadOutcome {
    /// `frame_type == 0x92`, every field parsed and consumed exactly.
    IoSample(IoSampleFrame),
    /// A recognised envelope but a frame type this crate does not decode;
    /// logged and otherwise discarded, not treated as malformed.
    UnsupportedFrameType(u8),
}

/// Parse the payload bytes (i.e. `buffer[3..3+length]`, the checksum byte
/// already stripped off). Returns `None` if the fields don't consume
/// exactly `payload.len()` bytes; the caller treats that as a malformed
/// frame and triggers a resync.
pub fn parse_payload(payload: &[u8]) -> Option<PayloadOutcome> {
    let mut cursor = Cursor { bytes: payload, pos: 0 };

    let frame_type = cursor.take_u8()?;
    if frame_type != 0x92 {
        return Some(PayloadOutcome::UnsupportedFrameType(frame_type));
    }

    let source_address = cursor.take_u64()?;
    let network_address = cursor.take_u16()?;
    let receive_options = cursor.take_u8()?;
    let samples_number = cursor.take_u8()?;
    let digital_mask = cursor.take_u16()?;
    let analog_mask = cursor.take_u8()?;

    let digital_samples = if digital_mask != 0 {
        Some(cursor.take_u16()?)
    } else {
        None
    };

    let analog_count = analog_mask.count_ones() as usize;
    let mut analog_samples = Vec::with_capacity(analog_count);
    for _ in 0..analog_count {
        analog_samples.push(cursor.take_u16()?);
    }

    if cursor.pos != payload.len() {
        return None;
    }

    Some(PayloadOutcome::IoSample(IoSampleFrame {
        source_address,
        network_address,
        receive_options,
        samples_number,
        digital_mask,
        analog_mask,
        digital_samples,
        analog_samples,
    }))
}

/// Convert a raw 10-bit temperature channel reading to whole degrees:
/// `voltage = v/1023*2.5; degrees = floor((voltage - 0.5) * 100)`.
/// `v == 1023` means "no sensor connected"; the caller logs that case as a
/// warning and does not store a value.
pub fn temperature_degrees(raw: u16) -> Option<i64> {
    if raw == 1023 {
        return None;
    }
    let voltage = raw as f64 / 1023.0 * 2.5;
    Some(((voltage - 0.5) * 100.0).floor() as i64)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take_u8(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn take_u16(&mut self) -> Option<u16> {
        let slice = self.bytes.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_be_bytes([slice[0], slice[1]]))
    }

    fn take_u64(&mut self) -> Option<u64> {
        let slice = self.bytes.get(self.pos..self.pos + 8)?;
        self.pos += 8;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(slice);
        Some(u64::from_be_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> Vec<u8> {
        let mut p = vec![0x92];
        p.extend_from_slice(&0x0013A20040AABBCCu64.to_be_bytes());
        p.extend_from_slice(&0x1234u16.to_be_bytes()); // network address
        p.push(0x01); // receive_options
        p.push(0x01); // samples_number
        p.extend_from_slice(&0x0000u16.to_be_bytes()); // digital_mask
        p.push(0x02); // analog_mask: bit1 (temperature) only
        p.extend_from_slice(&512u16.to_be_bytes()); // analog sample
        p
    }

    #[test]
    fn checksum_matches_the_subtract_from_ff_recipe() {
        let payload = sample_payload();
        let cs = checksum(&payload);
        let sum: u32 = payload.iter().map(|&b| b as u32).sum();
        assert_eq!(cs, (0xFFu32 - (sum % 256)) as u8);
    }

    #[test]
    fn checksum_recipe_round_trips() {
        // For any payload, payload bytes plus checksum always sum to 0xFF
        // modulo 256.
        for payload in [vec![], vec![1, 2, 3], vec![0xFF; 37], sample_payload()] {
            let cs = checksum(&payload);
            let sum: u32 = payload.iter().map(|&b| b as u32).sum::<u32>() + cs as u32;
            assert_eq!(sum % 256, 0xFF);
        }
    }

    #[test]
    fn parses_a_well_formed_io_sample_with_temperature() {
        let payload = sample_payload();
        match parse_payload(&payload) {
            Some(PayloadOutcome::IoSample(frame)) => {
                assert_eq!(frame.source_address, 0x0013A20040AABBCC);
                assert_eq!(frame.network_address, 0x1234);
                assert_eq!(frame.digital_mask, 0);
                assert_eq!(frame.digital_samples, None);
                assert_eq!(frame.analog_mask, 0x02);
                assert_eq!(frame.temperature_raw(), Some(512));
            }
            other => panic!("expected an IoSample, got {other:?}"),
        }
    }

    #[test]
    fn non_0x92_frame_type_is_reported_but_not_malformed() {
        let mut payload = sample_payload();
        payload[0] = 0x8B; // some other XBee frame type
        assert_eq!(
            parse_payload(&payload),
            Some(PayloadOutcome::UnsupportedFrameType(0x8B))
        );
    }

    #[test]
    fn digital_mask_set_without_room_for_digital_samples_is_malformed() {
        let mut payload = sample_payload();
        // Flip on a digital channel bit but don't grow the buffer to make
        // room for the 2-byte digital_samples field.
        payload[10] = 0x01; // digital_mask high byte region
        assert_eq!(parse_payload(&payload), None);
    }

    #[test]
    fn trailing_garbage_after_all_fields_is_malformed() {
        let mut payload = sample_payload();
        payload.push(0xAA);
        assert_eq!(parse_payload(&payload), None);
    }

    #[test]
    fn temperature_conversion_matches_the_voltage_formula() {
        // floor((512/1023*2.5 - 0.5) * 100)
        assert_eq!(temperature_degrees(512), Some(75));
        assert_eq!(temperature_degrees(0), Some(-50));
        assert_eq!(temperature_degrees(1023), None, "1023 means no sensor connected");
    }
}
