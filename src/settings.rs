//! Radio configuration state.
//!
//! `Config` holds construction-time values and can be loaded from JSON. It is turned
//! into a `Settings` block, which is shared between threads. Each tunable field is a
//! single atomic word, so setters never block and a reader sees either the old or the
//! new value of any one field.

use std::fmt;
use std::io::Read;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::consts::{MAX_RECEIVERS, MAX_TUNED_RECEIVERS, TX_SAMPLE_RATE};
use crate::error::{Error, Result};
use crate::transport::MacAddr;

/// Push-to-talk mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PttMode {
    /// Always receiving.
    Off,
    /// Keyed whenever the transmit stream carries a nonzero sample.
    Vox,
    /// Always keyed.
    On,
}

impl PttMode {
    fn from_bits(b: u8) -> Self {
        match b {
            1 => PttMode::Vox,
            2 => PttMode::On,
            _ => PttMode::Off,
        }
    }

    fn bits(self) -> u8 {
        match self {
            PttMode::Off => 0,
            PttMode::Vox => 1,
            PttMode::On => 2,
        }
    }
}

impl FromStr for PttMode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match &s.to_ascii_lowercase()[..] {
            "off" => Ok(PttMode::Off),
            "vox" => Ok(PttMode::Vox),
            "on" => Ok(PttMode::On),
            _ => Err(()),
        }
    }
}

/// Receive sample rate supported by the hardware.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SampleRate {
    Rate48k,
    Rate96k,
    Rate192k,
    Rate384k,
}

impl SampleRate {
    /// Map a rate in Hz to a supported rate.
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            48000 => Some(SampleRate::Rate48k),
            96000 => Some(SampleRate::Rate96k),
            192000 => Some(SampleRate::Rate192k),
            384000 => Some(SampleRate::Rate384k),
            _ => None,
        }
    }

    pub fn hz(self) -> u32 {
        TX_SAMPLE_RATE * self.speed() as u32
    }

    /// Multiple of the fixed 48 kHz transmit rate: 1, 2, 4, or 8.
    pub fn speed(self) -> usize {
        1 << self.index()
    }

    /// Dense index 0..4, which is also the rate code sent in register bank 0.
    pub fn index(self) -> usize {
        match self {
            SampleRate::Rate48k => 0,
            SampleRate::Rate96k => 1,
            SampleRate::Rate192k => 2,
            SampleRate::Rate384k => 3,
        }
    }

    fn from_index(i: u8) -> Self {
        match i {
            1 => SampleRate::Rate96k,
            2 => SampleRate::Rate192k,
            3 => SampleRate::Rate384k,
            _ => SampleRate::Rate48k,
        }
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.hz())
    }
}

/// Hardware selection by MAC address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MacTarget {
    /// Use the first device that answers discovery.
    Any,
    /// Wait for the device with this address.
    Exact(MacAddr),
}

impl MacTarget {
    /// Parse a target address. Anything other than a fully-qualified
    /// `HH:HH:HH:HH:HH:HH` string selects any device.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != 17 {
            return Ok(MacTarget::Any);
        }

        s.parse().map(MacTarget::Exact)
    }

    pub fn matches(&self, mac: &MacAddr) -> bool {
        match *self {
            MacTarget::Any => true,
            MacTarget::Exact(ref m) => m == mac,
        }
    }
}

/// Parse a clock source hex string, keeping only the source selection bits.
pub fn parse_clock_source(s: &str) -> Result<u8> {
    let t = s.trim();
    let t = t.trim_start_matches("0x").trim_start_matches("0X");

    u8::from_str_radix(t, 16)
        .map(|cs| cs & 0xfc)
        .map_err(|_| Error::InvalidClockSource(s.to_string()))
}

/// Construction-time configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network interface name or local IPv4 address used for discovery.
    pub interface: String,
    /// Target hardware MAC address, or `None` for any device.
    pub mac: Option<String>,
    /// Receiver NCO frequencies (Hz).
    pub rx_freqs: [u32; MAX_RECEIVERS],
    /// Transmitter NCO frequency (Hz).
    pub tx_freq: u32,
    /// Receive sample rate (Hz).
    pub sample_rate: u32,
    /// Number of active receivers.
    pub receivers: usize,
    /// Clock source selection as hex.
    pub clock_source: String,
    pub ptt_mode: PttMode,
    /// Zero the transmit drive and samples while PTT is off.
    pub ptt_off_mutes_tx: bool,
    /// Zero received samples while PTT is on.
    pub ptt_on_mutes_rx: bool,
    /// Transmit drive level (0..255).
    pub tx_drive: u8,
    pub preamp: bool,
    pub dither: bool,
    pub random: bool,
    /// Input attenuator (0..31 dB).
    pub rx_atten: u8,
    pub alex_rx_ant: u8,
    pub alex_tx_ant: u8,
    /// Receive high-pass filter selection, 0 for automatic.
    pub alex_rx_hpf: u8,
    /// Transmit low-pass filter selection, 0 for automatic.
    pub alex_tx_lpf: u8,
    pub duplex: bool,
    pub verbose: bool,
    /// How long to wait for the target hardware to answer discovery.
    pub discovery_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interface: "0.0.0.0".to_string(),
            mac: None,
            rx_freqs: [7_100_000; MAX_RECEIVERS],
            tx_freq: 7_100_000,
            sample_rate: 48000,
            receivers: 1,
            clock_source: "0xfc".to_string(),
            ptt_mode: PttMode::Off,
            ptt_off_mutes_tx: true,
            ptt_on_mutes_rx: true,
            tx_drive: 0,
            preamp: false,
            dither: false,
            random: false,
            rx_atten: 0,
            alex_rx_ant: 0,
            alex_tx_ant: 0,
            alex_rx_hpf: 0,
            alex_tx_lpf: 0,
            duplex: true,
            verbose: false,
            discovery_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Load a configuration from JSON, using defaults for missing fields.
    pub fn from_reader<R: Read>(r: R) -> Result<Self> {
        let cfg: Config = serde_json::from_reader(r)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the values that have no sensible fallback.
    pub fn validate(&self) -> Result<()> {
        if self.receivers < 1 || self.receivers > MAX_RECEIVERS {
            return Err(Error::InvalidReceivers(self.receivers));
        }

        if SampleRate::from_hz(self.sample_rate).is_none() {
            return Err(Error::InvalidSampleRate(self.sample_rate));
        }

        parse_clock_source(&self.clock_source)?;
        self.mac_target()?;

        Ok(())
    }

    pub fn mac_target(&self) -> Result<MacTarget> {
        match self.mac {
            Some(ref s) => MacTarget::parse(s),
            None => Ok(MacTarget::Any),
        }
    }
}

/// Shared runtime configuration.
pub struct Settings {
    receivers: usize,
    interface: String,
    target: MacTarget,
    rx_freqs: [AtomicU32; MAX_RECEIVERS],
    tx_freq: AtomicU32,
    sample_rate: AtomicU8,
    clock_source: AtomicU8,
    ptt_mode: AtomicU8,
    ptt_off_mutes_tx: AtomicBool,
    ptt_on_mutes_rx: AtomicBool,
    tx_drive: AtomicU8,
    preamp: AtomicBool,
    dither: AtomicBool,
    random: AtomicBool,
    rx_atten: AtomicU8,
    alex_rx_ant: AtomicU8,
    alex_tx_ant: AtomicU8,
    alex_rx_hpf: AtomicU8,
    alex_tx_lpf: AtomicU8,
    duplex: AtomicBool,
    verbose: AtomicBool,
}

impl Settings {
    /// Create settings from the given configuration.
    pub fn new(cfg: &Config) -> Result<Self> {
        cfg.validate()?;

        let rate = SampleRate::from_hz(cfg.sample_rate)
            .ok_or(Error::InvalidSampleRate(cfg.sample_rate))?;

        let f = &cfg.rx_freqs;

        Ok(Settings {
            receivers: cfg.receivers,
            interface: cfg.interface.clone(),
            target: cfg.mac_target()?,
            rx_freqs: [
                AtomicU32::new(f[0]), AtomicU32::new(f[1]),
                AtomicU32::new(f[2]), AtomicU32::new(f[3]),
                AtomicU32::new(f[4]), AtomicU32::new(f[5]),
                AtomicU32::new(f[6]), AtomicU32::new(f[7]),
            ],
            tx_freq: AtomicU32::new(cfg.tx_freq),
            sample_rate: AtomicU8::new(rate.index() as u8),
            clock_source: AtomicU8::new(parse_clock_source(&cfg.clock_source)?),
            ptt_mode: AtomicU8::new(cfg.ptt_mode.bits()),
            ptt_off_mutes_tx: AtomicBool::new(cfg.ptt_off_mutes_tx),
            ptt_on_mutes_rx: AtomicBool::new(cfg.ptt_on_mutes_rx),
            tx_drive: AtomicU8::new(cfg.tx_drive),
            preamp: AtomicBool::new(cfg.preamp),
            dither: AtomicBool::new(cfg.dither),
            random: AtomicBool::new(cfg.random),
            rx_atten: AtomicU8::new(cfg.rx_atten),
            alex_rx_ant: AtomicU8::new(cfg.alex_rx_ant),
            alex_tx_ant: AtomicU8::new(cfg.alex_tx_ant),
            alex_rx_hpf: AtomicU8::new(cfg.alex_rx_hpf),
            alex_tx_lpf: AtomicU8::new(cfg.alex_tx_lpf),
            duplex: AtomicBool::new(cfg.duplex),
            verbose: AtomicBool::new(cfg.verbose),
        })
    }

    /// Number of active receivers, fixed for the lifetime of the proxy.
    pub fn receivers(&self) -> usize { self.receivers }
    pub fn interface(&self) -> &str { &self.interface }
    pub fn target(&self) -> MacTarget { self.target }

    /// Receiver NCO frequency, or 0 for receivers past the last one.
    pub fn rx_frequency(&self, rx: usize) -> u32 {
        self.rx_freqs.get(rx).map_or(0, |f| f.load(Ordering::Relaxed))
    }

    pub fn tx_frequency(&self) -> u32 { self.tx_freq.load(Ordering::Relaxed) }

    pub fn sample_rate(&self) -> SampleRate {
        SampleRate::from_index(self.sample_rate.load(Ordering::Relaxed))
    }

    pub fn clock_source(&self) -> u8 { self.clock_source.load(Ordering::Relaxed) }

    pub fn ptt_mode(&self) -> PttMode {
        PttMode::from_bits(self.ptt_mode.load(Ordering::Relaxed))
    }

    pub fn ptt_off_mutes_tx(&self) -> bool { self.ptt_off_mutes_tx.load(Ordering::Relaxed) }
    pub fn ptt_on_mutes_rx(&self) -> bool { self.ptt_on_mutes_rx.load(Ordering::Relaxed) }
    pub fn tx_drive(&self) -> u8 { self.tx_drive.load(Ordering::Relaxed) }
    pub fn preamp(&self) -> bool { self.preamp.load(Ordering::Relaxed) }
    pub fn dither(&self) -> bool { self.dither.load(Ordering::Relaxed) }
    pub fn random(&self) -> bool { self.random.load(Ordering::Relaxed) }
    pub fn rx_atten(&self) -> u8 { self.rx_atten.load(Ordering::Relaxed) }
    pub fn alex_rx_antenna(&self) -> u8 { self.alex_rx_ant.load(Ordering::Relaxed) }
    pub fn alex_tx_antenna(&self) -> u8 { self.alex_tx_ant.load(Ordering::Relaxed) }
    pub fn alex_rx_hpf(&self) -> u8 { self.alex_rx_hpf.load(Ordering::Relaxed) }
    pub fn alex_tx_lpf(&self) -> u8 { self.alex_tx_lpf.load(Ordering::Relaxed) }
    pub fn duplex(&self) -> bool { self.duplex.load(Ordering::Relaxed) }
    pub fn verbose(&self) -> bool { self.verbose.load(Ordering::Relaxed) }

    /// Whether received samples should currently be zeroed.
    pub fn rx_muted(&self) -> bool {
        self.ptt_on_mutes_rx() && self.ptt_mode() == PttMode::On
    }

    /// Whether transmit drive and samples should currently be zeroed.
    pub fn tx_muted(&self) -> bool {
        self.ptt_off_mutes_tx() && self.ptt_mode() == PttMode::Off
    }

    /// Set a receiver NCO frequency. Out-of-range receivers are ignored.
    pub fn set_rx_frequency(&self, rx: usize, hz: u32) {
        if rx >= MAX_TUNED_RECEIVERS {
            debug!("receiver {} has no frequency register", rx);
        }

        if let Some(f) = self.rx_freqs.get(rx) {
            f.store(hz, Ordering::Relaxed);
        }
    }

    pub fn set_tx_frequency(&self, hz: u32) { self.tx_freq.store(hz, Ordering::Relaxed) }

    pub fn set_sample_rate(&self, rate: SampleRate) {
        self.sample_rate.store(rate.index() as u8, Ordering::Relaxed)
    }

    /// Set the clock source from a hex string.
    pub fn set_clock_source(&self, s: &str) -> Result<()> {
        let cs = parse_clock_source(s)?;
        self.clock_source.store(cs, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_ptt_mode(&self, m: PttMode) { self.ptt_mode.store(m.bits(), Ordering::Relaxed) }
    pub fn set_ptt_off_mutes_tx(&self, b: bool) { self.ptt_off_mutes_tx.store(b, Ordering::Relaxed) }
    pub fn set_ptt_on_mutes_rx(&self, b: bool) { self.ptt_on_mutes_rx.store(b, Ordering::Relaxed) }
    pub fn set_tx_drive(&self, d: u8) { self.tx_drive.store(d, Ordering::Relaxed) }
    pub fn set_preamp(&self, b: bool) { self.preamp.store(b, Ordering::Relaxed) }
    pub fn set_dither(&self, b: bool) { self.dither.store(b, Ordering::Relaxed) }
    pub fn set_random(&self, b: bool) { self.random.store(b, Ordering::Relaxed) }
    pub fn set_rx_atten(&self, db: u8) { self.rx_atten.store(db, Ordering::Relaxed) }
    pub fn set_alex_rx_antenna(&self, a: u8) { self.alex_rx_ant.store(a, Ordering::Relaxed) }
    pub fn set_alex_tx_antenna(&self, a: u8) { self.alex_tx_ant.store(a, Ordering::Relaxed) }
    pub fn set_alex_rx_hpf(&self, f: u8) { self.alex_rx_hpf.store(f, Ordering::Relaxed) }
    pub fn set_alex_tx_lpf(&self, f: u8) { self.alex_tx_lpf.store(f, Ordering::Relaxed) }
    pub fn set_duplex(&self, b: bool) { self.duplex.store(b, Ordering::Relaxed) }
    pub fn set_verbose(&self, b: bool) { self.verbose.store(b, Ordering::Relaxed) }
}
