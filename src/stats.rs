//! Streaming counters and hardware telemetry.
//!
//! Nothing in the streaming path returns errors. Anomalies are counted here instead,
//! and the counters can be read from any thread as a `Report`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

use chrono::Utc;

use crate::codec::{self, StatusWord};

/// Number of status updates between verbose telemetry logs.
const TELEMETRY_LOG_INTERVAL: u64 = 512;

/// Counters updated by the I/O and graph threads.
#[derive(Default)]
pub struct Stats {
    /// Received sub-frames dropped because no receive buffer was free.
    lost_rx_bufs: AtomicU64,
    /// Received datagrams.
    total_rx_bufs: AtomicU64,
    /// Transmit slots skipped because fewer than two frames were queued.
    lost_tx_bufs: AtomicU64,
    /// Transmit slots scheduled.
    total_tx_bufs: AtomicU64,
    /// Transmit samples dropped because no transmit buffer was free.
    tx_overruns: AtomicU64,
    /// Datagrams rejected for bad sync.
    corrupt_rx: AtomicU64,
    /// Datagrams missing from the received sequence.
    lost_ethernet_rx: AtomicU64,
    current_seq: AtomicU32,
    telemetry: Telemetry,
}

impl Stats {
    pub fn new() -> Self { Self::default() }

    pub fn inc_lost_rx(&self) { self.lost_rx_bufs.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_total_rx(&self) { self.total_rx_bufs.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_lost_tx(&self) { self.lost_tx_bufs.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_total_tx(&self) { self.total_tx_bufs.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_tx_overrun(&self) { self.tx_overruns.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_corrupt(&self) { self.corrupt_rx.fetch_add(1, Ordering::Relaxed); }

    /// Record datagrams lost in a sequence gap along with the latest sequence number.
    pub fn add_lost_ethernet(&self, lost: u32, seq: u32) {
        if lost > 0 {
            self.lost_ethernet_rx.fetch_add(lost as u64, Ordering::Relaxed);
        }

        self.current_seq.store(seq, Ordering::Relaxed);
    }

    pub fn lost_rx_bufs(&self) -> u64 { self.lost_rx_bufs.load(Ordering::Relaxed) }
    pub fn total_rx_bufs(&self) -> u64 { self.total_rx_bufs.load(Ordering::Relaxed) }
    pub fn lost_tx_bufs(&self) -> u64 { self.lost_tx_bufs.load(Ordering::Relaxed) }
    pub fn total_tx_bufs(&self) -> u64 { self.total_tx_bufs.load(Ordering::Relaxed) }
    pub fn tx_overruns(&self) -> u64 { self.tx_overruns.load(Ordering::Relaxed) }
    pub fn corrupt_rx(&self) -> u64 { self.corrupt_rx.load(Ordering::Relaxed) }
    pub fn lost_ethernet_rx(&self) -> u64 { self.lost_ethernet_rx.load(Ordering::Relaxed) }
    pub fn current_seq(&self) -> u32 { self.current_seq.load(Ordering::Relaxed) }

    pub fn telemetry(&self) -> &Telemetry { &self.telemetry }

    /// Take a snapshot of all counters.
    pub fn report(&self) -> Report {
        let t = &self.telemetry;

        Report {
            timestamp: Utc::now().to_rfc3339(),
            total_rx_bufs: self.total_rx_bufs(),
            lost_rx_bufs: self.lost_rx_bufs(),
            total_tx_bufs: self.total_tx_bufs(),
            lost_tx_bufs: self.lost_tx_bufs(),
            tx_overruns: self.tx_overruns(),
            corrupt_rx: self.corrupt_rx(),
            lost_ethernet_rx: self.lost_ethernet_rx(),
            current_seq: self.current_seq(),
            adc_overload: t.adc_overload(),
            firmware: t.firmware(),
            forward_power: t.forward_power(),
            reverse_power: t.reverse_power(),
            swr: t.swr(),
            ain: t.ain(),
        }
    }
}

/// Values reported by the hardware in the control bytes of received frames.
#[derive(Default)]
pub struct Telemetry {
    adc_overload: AtomicBool,
    firmware: AtomicU8,
    /// AIN1..AIN6.
    ain: [AtomicU16; 6],
    updates: AtomicU64,
}

impl Telemetry {
    /// Store a status word and return whether this update is due for verbose logging.
    pub fn apply(&self, w: StatusWord) -> bool {
        match w {
            StatusWord::Overload { overload, version } => {
                self.adc_overload.store(overload, Ordering::Relaxed);
                self.firmware.store(version, Ordering::Relaxed);
            },
            StatusWord::Analog(vals) => for &(n, v) in vals.iter() {
                self.ain[n - 1].store(v, Ordering::Relaxed);
            },
        }

        self.updates.fetch_add(1, Ordering::Relaxed) % TELEMETRY_LOG_INTERVAL == 0
    }

    pub fn adc_overload(&self) -> bool { self.adc_overload.load(Ordering::Relaxed) }
    pub fn firmware(&self) -> u8 { self.firmware.load(Ordering::Relaxed) }

    /// Analog input reading, numbered from 1.
    pub fn ain_value(&self, n: usize) -> u16 { self.ain[n - 1].load(Ordering::Relaxed) }

    pub fn ain(&self) -> [u16; 6] {
        let mut out = [0; 6];

        for (o, a) in out.iter_mut().zip(self.ain.iter()) {
            *o = a.load(Ordering::Relaxed);
        }

        out
    }

    /// Forward power (W), measured on AIN1.
    pub fn forward_power(&self) -> f32 { codec::power(self.ain_value(1)) }

    /// Reverse power (W), measured on AIN2.
    pub fn reverse_power(&self) -> f32 { codec::power(self.ain_value(2)) }

    pub fn swr(&self) -> f64 { codec::swr(self.forward_power(), self.reverse_power()) }

    /// Log the current readings. SWR is left out below 1 W forward power.
    pub fn log(&self) {
        let fwd = self.forward_power();

        let swr = if fwd as u32 != 0 {
            format!(" swr {:.2}:1", self.swr())
        } else {
            String::new()
        };

        info!("fwd {:.1}W rev {:.1}W{} adc overload {} firmware {}", fwd,
              self.reverse_power(), swr, self.adc_overload(), self.firmware());
    }
}

/// Point-in-time copy of the streaming counters.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    /// RFC 3339 time the snapshot was taken.
    pub timestamp: String,
    pub total_rx_bufs: u64,
    pub lost_rx_bufs: u64,
    pub total_tx_bufs: u64,
    pub lost_tx_bufs: u64,
    pub tx_overruns: u64,
    pub corrupt_rx: u64,
    pub lost_ethernet_rx: u64,
    pub current_seq: u32,
    pub adc_overload: bool,
    pub firmware: u8,
    pub forward_power: f32,
    pub reverse_power: f32,
    pub swr: f64,
    pub ain: [u16; 6],
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "rx {} ({} lost) tx {} ({} lost, {} overruns) corrupt {} \
                   ethernet lost {} seq {}",
               self.total_rx_bufs, self.lost_rx_bufs, self.total_tx_bufs,
               self.lost_tx_bufs, self.tx_overruns, self.corrupt_rx,
               self.lost_ethernet_rx, self.current_seq)
    }
}
