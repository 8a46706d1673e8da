//! Byte stuffing and checksums for VE.Bus frames.
//!
//! A frame on the wire is
//!
//! ```text
//! [id0, id1, frame type, frame nr, payload ..., checksum (1 or 2 bytes), 0xFF]
//! ```
//!
//! Every payload byte >= 0xFA is escaped as `0xFA, 0x70 | (byte & 0x0F)` so
//! that only the end-of-frame marker carries 0xFF.

pub const MK3_ID_0: u8 = 0x98;
pub const MK3_ID_1: u8 = 0xF7;
pub const MP_ID_0: u8 = 0x83;
pub const MP_ID_1: u8 = 0x83;
pub const SYNC_BYTE: u8 = 0x55;
pub const SYNC_FRAME: u8 = 0xFD;
pub const DATA_FRAME: u8 = 0xFE;
pub const END_OF_FRAME: u8 = 0xFF;
pub const ESCAPE: u8 = 0xFA;

/// Address + frame type + frame number, never stuffed.
pub const HEADER_LEN: usize = 4;
pub const SYNC_FRAME_LEN: usize = 10;

pub fn next_frame_nr(frame_nr: u8) -> u8 {
    frame_nr.wrapping_add(1) & 0x7F
}

pub fn stuff(buffer: &mut Vec<u8>) {
    if buffer.len() <= HEADER_LEN {
        return;
    }
    let payload = buffer.split_off(HEADER_LEN);
    for byte in payload {
        if byte >= ESCAPE {
            buffer.push(ESCAPE);
            buffer.push(0x70 | (byte & 0x0F));
        } else {
            buffer.push(byte);
        }
    }
}

/// Inverse of [`stuff`]. A trailing escape byte has no successor and is left as is.
pub fn destuff(buffer: &mut Vec<u8>) {
    let mut i = HEADER_LEN;
    while i < buffer.len() {
        if buffer[i] == ESCAPE && i != buffer.len() - 1 {
            buffer[i] = buffer[i + 1].wrapping_add(0x80);
            buffer.remove(i + 1);
        }
        i += 1;
    }
}

/// Destuffs a received frame up to its checksum.
///
/// The checksum is sent unstuffed, so an unescaped 0xFA checksum must not be
/// read as an escape. An escaped checksum is folded back into one byte, which
/// leaves every frame as `[.., checksum, 0xFF]`.
pub fn destuff_frame(buffer: &mut Vec<u8>) {
    let trailer = trailer_len(buffer);
    if trailer == 0 {
        destuff(buffer);
        return;
    }
    let tail = buffer.split_off(buffer.len() - trailer);
    destuff(buffer);
    match tail.as_slice() {
        [ESCAPE, cs, END_OF_FRAME] => {
            buffer.push(cs.wrapping_add(ESCAPE));
            buffer.push(END_OF_FRAME);
        }
        _ => buffer.extend_from_slice(&tail),
    }
}

// checksum bytes plus the end-of-frame marker, 0 without a complete trailer
fn trailer_len(raw: &[u8]) -> usize {
    let len = raw.len();
    if len < HEADER_LEN + 2 || raw[len - 1] != END_OF_FRAME {
        0
    } else if len >= HEADER_LEN + 3 && raw[len - 3] == ESCAPE && raw[len - 2] <= 0x05 {
        3
    } else {
        2
    }
}

/// Checksum over everything after the two address bytes.
pub fn checksum(buffer: &[u8]) -> u8 {
    buffer
        .iter()
        .skip(2)
        .fold(1u8, |cs, byte| cs.wrapping_sub(*byte))
}

pub fn append_checksum(buffer: &mut Vec<u8>) {
    if buffer.len() < 2 {
        return;
    }
    let cs = checksum(buffer);
    if cs >= 0xFB {
        buffer.push(ESCAPE);
        buffer.push(cs - ESCAPE);
    } else {
        buffer.push(cs);
    }
    buffer.push(END_OF_FRAME);
}

/// Checks a raw (still stuffed) frame including its trailing 0xFF.
///
/// An escaped checksum is `0xFA, 0x01..=0x05`, which never collides with a
/// stuffed payload byte (`0xFA, 0x7A..=0x7F`).
pub fn verify_checksum(raw: &[u8]) -> bool {
    let len = raw.len();
    match trailer_len(raw) {
        3 => checksum(&raw[..len - 3]) == raw[len - 2].wrapping_add(ESCAPE),
        2 => checksum(&raw[..len - 2]) == raw[len - 2],
        _ => false,
    }
}

/// Little endian u16 at `at`, `None` when the frame is too short.
pub fn le_u16(buffer: &[u8], at: usize) -> Option<u16> {
    match buffer.get(at..at + 2) {
        Some(bytes) => Some(u16::from_le_bytes([bytes[0], bytes[1]])),
        None => None,
    }
}
