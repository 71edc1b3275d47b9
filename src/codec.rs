//! Bit-level encoding and decoding of HPSDR frames.
//!
//! A Metis datagram holds an 8-byte header followed by two 512-byte frames. Each frame
//! starts with three sync bytes and a 5-byte control group (C0..C4), followed by rows
//! of samples. Received rows hold one 24-bit I/Q pair per receiver and 2 bytes of
//! microphone audio; transmitted rows hold 16-bit L/R audio and a 16-bit I/Q pair.

use num::complex::Complex32;

use crate::consts::{
    DATAGRAM_HEADER, DATAGRAM_SIZE, FRAME_HEADER, FRAME_SIZE, FRAMES_PER_DATAGRAM,
    ROW_COUNT, SYNC, TX_ROW_BYTES, TX_SAMPLES_PER_FRAME,
};

/// Full-scale magnitude of a 24-bit sample.
const FULL_SCALE_24: f32 = 8388608.0;
/// Full-scale magnitude of a 16-bit transmit sample.
const FULL_SCALE_16: f32 = 32767.0;
/// Divisor converting a squared AIN reading to watts.
const POWER_DIVISOR: f32 = 145000.0;
/// SWR reported when the measured powers give no meaningful ratio.
pub const SWR_INVALID: f64 = 99.9;

/// Extract the sequence number from a datagram header.
pub fn sequence(datagram: &[u8]) -> u32 {
    u32::from_be_bytes([datagram[4], datagram[5], datagram[6], datagram[7]])
}

/// Split a datagram into its two frames, or `None` if it is truncated.
pub fn frames(datagram: &[u8]) -> Option<[&[u8]; FRAMES_PER_DATAGRAM]> {
    if datagram.len() < DATAGRAM_SIZE {
        return None;
    }

    let body = &datagram[DATAGRAM_HEADER..];

    Some([&body[..FRAME_SIZE], &body[FRAME_SIZE..2 * FRAME_SIZE]])
}

/// Check the three sync bytes at the start of a frame.
pub fn has_sync(frame: &[u8]) -> bool {
    frame.len() >= 3 && frame[..3] == [SYNC; 3]
}

/// Tracks the datagram sequence number to detect lost datagrams.
#[derive(Copy, Clone, Debug, Default)]
pub struct SequenceTracker {
    cur: u32,
}

impl SequenceTracker {
    /// Create a tracker with the given last-seen sequence number.
    pub fn new(cur: u32) -> Self {
        SequenceTracker { cur: cur }
    }

    /// Last sequence number accepted.
    pub fn current(&self) -> u32 { self.cur }

    /// Record a received sequence number and return the number of datagrams counted
    /// as lost.
    ///
    /// A jump ahead counts the whole difference and resynchronizes. Duplicate or
    /// out-of-order numbers are ignored.
    pub fn update(&mut self, seq: u32) -> u32 {
        if seq == self.cur.wrapping_add(1) {
            self.cur = seq;
            0
        } else if seq > self.cur {
            let lost = seq - self.cur;
            self.cur = seq;
            lost
        } else {
            0
        }
    }
}

/// Status value carried in the control bytes of a received frame.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum StatusWord {
    /// ADC overload flag and firmware version.
    Overload { overload: bool, version: u8 },
    /// Two analog inputs, given as (AIN index, value) pairs.
    Analog([(usize, u16); 2]),
}

/// Parse the C0..C4 control group of a received frame.
pub fn parse_status(c: &[u8]) -> Option<StatusWord> {
    let word = |hi: u8, lo: u8| u16::from_be_bytes([hi, lo]);

    match c[0] & 0xf8 {
        0x00 => Some(StatusWord::Overload {
            overload: c[1] & 0x01 != 0,
            version: c[4],
        }),
        0x08 => Some(StatusWord::Analog([(5, word(c[1], c[2])), (1, word(c[3], c[4]))])),
        0x10 => Some(StatusWord::Analog([(2, word(c[1], c[2])), (3, word(c[3], c[4]))])),
        0x18 => Some(StatusWord::Analog([(4, word(c[1], c[2])), (6, word(c[3], c[4]))])),
        _ => None,
    }
}

/// Convert a forward or reverse power AIN reading to watts.
pub fn power(ain: u16) -> f32 {
    ain as f32 * ain as f32 / POWER_DIVISOR
}

/// Compute SWR from forward and reverse power, substituting `SWR_INVALID` when the
/// result is not a normal number.
pub fn swr(fwd: f32, rev: f32) -> f64 {
    let rho = (rev as f64 / fwd as f64).sqrt();
    let swr = (1.0 + rho) / (1.0 - rho);

    if swr.is_normal() { swr } else { SWR_INVALID }
}

/// Convert a big-endian 24-bit two's-complement sample to a float in [-1, 1).
pub fn unpack24(b: &[u8]) -> f32 {
    // Place the sample in the top of a word so the shift sign-extends it.
    let v = i32::from_be_bytes([b[0], b[1], b[2], 0]) >> 8;
    v as f32 / FULL_SCALE_24
}

/// Unpack the sample rows of a received frame into the given buffer.
///
/// Values are written receiver-interleaved, I then Q, one row at a time. If `muted`
/// is set, zeros are written instead.
pub fn unpack_frame<E: Extend<f32>>(frame: &[u8], receivers: usize, muted: bool,
                                    out: &mut E)
{
    let rows = ROW_COUNT[receivers - 1];
    let row_bytes = receivers * 6 + 2;
    let payload = &frame[FRAME_HEADER..FRAME_HEADER + rows * row_bytes];

    for row in payload.chunks(row_bytes) {
        // The last two bytes of each row are microphone audio.
        let iq = &row[..receivers * 6];

        out.extend(iq.chunks(3).map(|s| if muted { 0.0 } else { unpack24(s) }));
    }
}

/// Scale a float sample to a 16-bit big-endian word, clamping to full scale.
fn pack16(s: f32) -> [u8; 2] {
    ((s.max(-1.0).min(1.0) * FULL_SCALE_16) as i16).to_be_bytes()
}

/// Fill the sample rows of a transmit frame from the given samples and return whether
/// any transmitted sample is nonzero.
///
/// At most 63 samples are used; missing rows are zeroed. The hardware swaps I and Q,
/// so the real part is sent in the Q position. If `muted` is set, zeros are sent.
pub fn pack_frame(frame: &mut [u8], samples: &[Complex32], muted: bool) -> bool {
    let rows = frame[FRAME_HEADER..].chunks_mut(TX_ROW_BYTES).take(TX_SAMPLES_PER_FRAME);
    let mut active = false;

    for (i, row) in rows.enumerate() {
        // Left/right audio isn't carried.
        row[..4].copy_from_slice(&[0; 4]);

        let s = match samples.get(i) {
            Some(&s) if !muted => s,
            _ => Complex32::new(0.0, 0.0),
        };

        row[4..6].copy_from_slice(&pack16(s.im));
        row[6..8].copy_from_slice(&pack16(s.re));

        active |= row[4..8].iter().any(|&b| b != 0);
    }

    active
}
