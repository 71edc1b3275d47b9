//! Control register banks sent at the start of every transmit frame.
//!
//! Each frame carries the sync bytes and one register bank: C0 selects the bank (and
//! carries the MOX bit) and C1..C4 hold the bank's values. A Metis datagram holds two
//! frames, so a bank is normally sent paired with bank 0.

use crate::consts::{MAX_TUNED_RECEIVERS, SYNC};
use crate::error::{Error, Result};
use crate::settings::{PttMode, Settings};

/// Sample rate, receiver count and general control.
pub const BANK_GENERAL: u8 = 0;
/// Transmit NCO frequency.
pub const BANK_TX_FREQ: u8 = 2;
/// First receive NCO frequency; receiver `n` uses `BANK_RX_FREQ + 2n`.
pub const BANK_RX_FREQ: u8 = 4;
/// Drive level and Alex filter selection.
pub const BANK_DRIVE: u8 = 18;
/// Input attenuator.
pub const BANK_ATTEN: u8 = 20;
/// Undocumented bank, sent as zeros.
pub const BANK_RESERVED: u8 = 22;

/// Last bank visited by `BankCycler`.
const BANK_CYCLE_LAST: u8 = BANK_ATTEN;

/// Write sync bytes and the given register bank into the first 8 bytes of `out`.
///
/// On an unknown bank, the sync and C0 bytes have already been written when the error
/// is returned.
pub fn build(bank: u8, s: &Settings, out: &mut [u8]) -> Result<()> {
    out[..3].copy_from_slice(&[SYNC; 3]);
    out[3] = bank | mox_bit(s.ptt_mode());

    let c = match bank {
        BANK_GENERAL => general(s),
        BANK_TX_FREQ => s.tx_frequency().to_be_bytes(),
        b if b >= BANK_RX_FREQ && b < BANK_DRIVE && b % 2 == 0 => {
            s.rx_frequency((b - BANK_RX_FREQ) as usize / 2).to_be_bytes()
        },
        BANK_DRIVE => drive(s),
        BANK_ATTEN => [0, 0x17, 0, s.rx_atten()],
        BANK_RESERVED => [0; 4],
        b => return Err(Error::InvalidBank(b)),
    };

    out[4..8].copy_from_slice(&c);

    Ok(())
}

fn mox_bit(m: PttMode) -> u8 {
    if m == PttMode::On { 0x01 } else { 0x00 }
}

fn general(s: &Settings) -> [u8; 4] {
    let speed = s.clock_source() | s.sample_rate().index() as u8;

    let mut rx = s.alex_rx_antenna();

    if s.preamp() { rx |= 0x04; }
    if s.dither() { rx |= 0x08; }
    if s.random() { rx |= 0x10; }

    let mut c4 = ((s.receivers() - 1) << 3) as u8 & 0x38 | s.alex_tx_antenna();

    if s.duplex() { c4 |= 0x04; }

    // Common Mercury frequency.
    c4 |= 0x80;

    [speed, 0, rx, c4]
}

fn drive(s: &Settings) -> [u8; 4] {
    let level = if s.tx_muted() { 0 } else { s.tx_drive() };

    let hpf = match s.alex_rx_hpf() {
        0 => auto_rx_hpf(s.rx_frequency(0)),
        f => f,
    };

    let lpf = match s.alex_tx_lpf() {
        0 => auto_tx_lpf(s.tx_frequency()),
        f => f,
    };

    // Manual Alex filter control.
    [level, 0x40, hpf & 0x7f, lpf & 0x7f]
}

/// Select the Alex receive high-pass filter for the given frequency.
pub fn auto_rx_hpf(hz: u32) -> u8 {
    match hz {
        0..=1_499_999 => 0x20,
        1_500_000..=6_499_999 => 0x10,
        6_500_000..=9_499_999 => 0x08,
        9_500_000..=12_999_999 => 0x04,
        13_000_000..=19_999_999 => 0x01,
        20_000_000..=49_999_999 => 0x02,
        _ => 0x40,
    }
}

/// Select the Alex transmit low-pass filter for the given frequency.
pub fn auto_tx_lpf(hz: u32) -> u8 {
    match hz {
        0..=3_400_000 => 0x08,
        3_400_001..=4_900_000 => 0x04,
        4_900_001..=9_900_000 => 0x02,
        9_900_001..=14_900_000 => 0x01,
        14_900_001..=19_000_000 => 0x40,
        19_000_001..=30_000_000 => 0x20,
        _ => 0x10,
    }
}

/// Data banks sent, each paired with bank 0, to initialize the hardware before the
/// receive stream starts.
pub fn init_banks(receivers: usize) -> Vec<u8> {
    let mut banks = vec![BANK_TX_FREQ];

    for rx in 0..receivers.min(MAX_TUNED_RECEIVERS) {
        banks.push(BANK_RX_FREQ + 2 * rx as u8);
    }

    banks.push(BANK_DRIVE);
    banks
}

/// Cycles through the register banks carried by successive transmit frames.
#[derive(Copy, Clone, Debug, Default)]
pub struct BankCycler {
    bank: u8,
}

impl BankCycler {
    /// Advance to and return the next bank: 2, 4, ..., 20, 0, 2, ...
    pub fn next(&mut self) -> u8 {
        self.bank += 2;

        if self.bank > BANK_CYCLE_LAST {
            self.bank = BANK_GENERAL;
        }

        self.bank
    }
}
