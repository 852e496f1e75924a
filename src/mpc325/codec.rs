// MPC-325 binary frame codec
//
// Requests: [opcode, fields...] with fixed-width little-endian fields; the
// quick move frame also ends in CR.
// Responses: fixed-width fields per command, always terminated by CR (0x0D).

use super::error::{Mpc325Error, Result};

/// Trailing byte every valid response carries
pub const END_MARKER: u8 = 0x0D;

/// Byte the device answers with when it refuses a device selection (ASCII `E`)
pub const SELECT_ERROR_SENTINEL: u8 = 69;

/// Command set
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Stop = 3,           // ASCII ETX
    GetPosition = 67,   // 'C'
    SelectDevice = 73,  // 'I'
    GetActive = 75,     // 'K'
    QuickMove = 77,     // 'M'
    Calibrate = 78,     // 'N'
    SpeedMove = 83,     // 'S'
    GetStatuses = 85,   // 'U'
}

/// A single fixed-width request field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    U8(u8),
    U32(u32),
}

/// Width of a response field on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U8,
    U32,
}

impl Width {
    fn size(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U32 => 4,
        }
    }
}

/// Fixed response layout for one command, end marker included
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseLayout(pub &'static [Width]);

impl ResponseLayout {
    /// Marker only: calibrate, moves, stop
    pub const ACK: Self = Self(&[Width::U8]);
    /// Count, four status flags, marker
    pub const STATUSES: Self = Self(&[Width::U8; 6]);
    /// Active device, two pad bytes, marker
    pub const ACTIVE_DEVICE: Self = Self(&[Width::U8; 4]);
    /// Result byte, marker
    pub const SELECT_DEVICE: Self = Self(&[Width::U8; 2]);
    /// Leading status byte, x/y/z microsteps, marker
    pub const POSITION: Self = Self(&[Width::U8, Width::U32, Width::U32, Width::U32, Width::U8]);

    /// Total response length in bytes
    pub fn byte_len(&self) -> usize {
        self.0.iter().map(|w| w.size()).sum()
    }
}

/// Build a request frame: opcode byte followed by little-endian fields
pub fn encode(opcode: Opcode, fields: &[Field]) -> Vec<u8> {
    let mut frame = vec![opcode as u8];
    frame.extend_from_slice(&encode_fields(fields));
    frame
}

/// Build a request frame that carries its own CR terminator (quick move)
pub fn encode_terminated(opcode: Opcode, fields: &[Field]) -> Vec<u8> {
    let mut frame = encode(opcode, fields);
    frame.push(END_MARKER);
    frame
}

/// Pack fields without an opcode, for payloads sent after a separate header
pub fn encode_fields(fields: &[Field]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(fields.len() * 4);
    for field in fields {
        match *field {
            Field::U8(v) => payload.push(v),
            Field::U32(v) => payload.extend_from_slice(&v.to_le_bytes()),
        }
    }
    payload
}

/// Unpack a response per its layout and check the end marker.
///
/// Returns the decoded fields without the marker. A wrong length or a bad
/// marker is a protocol fault; flushing the link is left to the caller.
pub fn decode_and_validate(layout: ResponseLayout, bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() != layout.byte_len() {
        return Err(Mpc325Error::Protocol {
            reason: format!("expected {} bytes, got {}", layout.byte_len(), bytes.len()),
        });
    }

    let mut fields = Vec::with_capacity(layout.0.len());
    let mut offset = 0;
    for &width in layout.0 {
        let value = match width {
            Width::U8 => bytes[offset] as u32,
            Width::U32 => u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]),
        };
        fields.push(value);
        offset += width.size();
    }

    match fields.pop() {
        Some(marker) if marker == END_MARKER as u32 => Ok(fields),
        Some(marker) => Err(Mpc325Error::Protocol {
            reason: format!("invalid end marker: expected 0x0D, got 0x{:02X}", marker),
        }),
        None => Err(Mpc325Error::Protocol {
            reason: "empty response layout".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_quick_move() {
        let frame = encode_terminated(
            Opcode::QuickMove,
            &[Field::U32(1600), Field::U32(0), Field::U32(400_000)],
        );
        assert_eq!(frame.len(), 14);
        assert_eq!(frame[0], 77);
        assert_eq!(&frame[1..5], &[0x40, 0x06, 0x00, 0x00]);
        assert_eq!(&frame[5..9], &[0, 0, 0, 0]);
        assert_eq!(&frame[9..13], &400_000u32.to_le_bytes());
        assert_eq!(frame[13], END_MARKER);
    }

    #[test]
    fn test_encode_single_byte_commands() {
        assert_eq!(encode(Opcode::Stop, &[]), vec![3]);
        assert_eq!(encode(Opcode::SelectDevice, &[Field::U8(2)]), vec![73, 2]);
    }

    #[test]
    fn test_layout_lengths() {
        assert_eq!(ResponseLayout::ACK.byte_len(), 1);
        assert_eq!(ResponseLayout::SELECT_DEVICE.byte_len(), 2);
        assert_eq!(ResponseLayout::ACTIVE_DEVICE.byte_len(), 4);
        assert_eq!(ResponseLayout::STATUSES.byte_len(), 6);
        assert_eq!(ResponseLayout::POSITION.byte_len(), 14);
    }

    #[test]
    fn test_decode_position() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&1600u32.to_le_bytes());
        bytes.extend_from_slice(&3200u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push(END_MARKER);

        let fields = decode_and_validate(ResponseLayout::POSITION, &bytes).unwrap();
        assert_eq!(fields, vec![0, 1600, 3200, 0]);
    }

    #[test]
    fn test_decode_rejects_bad_marker() {
        let err = decode_and_validate(ResponseLayout::STATUSES, &[2, 1, 1, 0, 0, 0x00]).unwrap_err();
        assert!(err.is_protocol_fault());
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        let err = decode_and_validate(ResponseLayout::ACTIVE_DEVICE, &[1, 0x0D]).unwrap_err();
        assert!(err.is_protocol_fault());
    }
}
