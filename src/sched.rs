//! Decides which received datagrams trigger a transmit datagram.
//!
//! The hardware transmits at a fixed 48 kHz, 63 samples per frame, while receive frames
//! arrive at a rate set by the sample rate and the receiver count. For `n` receivers at
//! speed `s` (sample rate / 48 kHz), `ROW_COUNT[n - 1]` transmit frames are due for
//! every `63 * s` receive frames. With one or two receivers the ratio reduces to a small
//! cycle that can be tested directly; otherwise the fire positions are spread evenly
//! across the full cycle and stored in a table.

use crate::consts::{MAX_RECEIVERS, ROW_COUNT, TX_SAMPLES_PER_FRAME};
use crate::settings::SampleRate;

/// Number of supported sample rates.
const SPEEDS: usize = 4;
/// Smallest receiver count scheduled by table.
const TABLE_MIN_RECEIVERS: usize = 3;

/// Ordered positions within a cycle of receive frames at which a transmit frame fires.
#[derive(Clone, Debug)]
pub struct ScheduleTable {
    cycle: u32,
    fires: Vec<u32>,
}

impl ScheduleTable {
    /// Spread `fires` events as evenly as possible over `cycle` slots.
    ///
    /// Slot `i` fires when `(i * fires) mod cycle < fires`, which marks exactly `fires`
    /// slots with consecutive marks separated by either the floor or the ceiling of
    /// `cycle / fires`.
    pub fn generate(fires: usize, cycle: usize) -> Self {
        assert!(fires > 0 && fires <= cycle);

        ScheduleTable {
            cycle: cycle as u32,
            fires: (0..cycle)
                .filter(|&i| i * fires % cycle < fires)
                .map(|i| i as u32)
                .collect(),
        }
    }

    /// Length of the repeating cycle.
    pub fn cycle(&self) -> usize { self.cycle as usize }

    /// Number of fire events per cycle.
    pub fn len(&self) -> usize { self.fires.len() }

    /// Fire positions, ascending.
    pub fn positions(&self) -> &[u32] { &self.fires }

    /// Check if the given receive frame counter lands on a fire position.
    pub fn fires(&self, counter: u64) -> bool {
        let idx = (counter % self.cycle as u64) as u32;
        self.fires.binary_search(&idx).is_ok()
    }
}

/// Index of the table for the given receiver count and speed index.
fn selector(receivers: usize, speed_idx: usize) -> usize {
    (receivers - TABLE_MIN_RECEIVERS) * SPEEDS + speed_idx
}

/// Transmit frame scheduler for a fixed receiver count.
pub struct TxScheduler {
    receivers: usize,
    tables: Vec<ScheduleTable>,
}

impl TxScheduler {
    /// Create a scheduler for the given number of receivers, generating the schedule
    /// tables for every sample rate.
    pub fn new(receivers: usize) -> Self {
        assert!(receivers >= 1 && receivers <= MAX_RECEIVERS);

        let mut tables = Vec::with_capacity((MAX_RECEIVERS - 2) * SPEEDS);

        for n in TABLE_MIN_RECEIVERS..MAX_RECEIVERS + 1 {
            for speed_idx in 0..SPEEDS {
                tables.push(ScheduleTable::generate(
                    ROW_COUNT[n - 1], TX_SAMPLES_PER_FRAME << speed_idx));
            }
        }

        TxScheduler {
            receivers: receivers,
            tables: tables,
        }
    }

    pub fn receivers(&self) -> usize { self.receivers }

    /// Table used at the given sample rate, if the receiver count is scheduled by
    /// table.
    pub fn table(&self, rate: SampleRate) -> Option<&ScheduleTable> {
        if self.receivers < TABLE_MIN_RECEIVERS {
            return None;
        }

        self.tables.get(selector(self.receivers, rate.index()))
    }

    /// Check if a transmit frame is due after the receive frame with the given counter.
    pub fn should_fire(&self, counter: u64, rate: SampleRate) -> bool {
        match self.receivers {
            // One transmit frame every `speed` receive frames.
            1 => counter & (rate.speed() as u64 - 1) == 0,
            // 36 rows per frame: 4 transmit frames per 7 receive frames at 48 kHz.
            2 => match rate {
                SampleRate::Rate48k => counter % 7 & 1 == 0,
                SampleRate::Rate96k => counter % 7 & 3 == 0,
                SampleRate::Rate192k => counter % 7 == 0,
                SampleRate::Rate384k => counter % 14 == 0,
            },
            _ => match self.table(rate) {
                Some(t) => t.fires(counter),
                None => false,
            },
        }
    }
}
