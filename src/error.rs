//! Error types for the proxy.
//!
//! Only construction and control operations report errors. Anomalies on the
//! streaming paths (sequence gaps, corrupt frames, exhausted pools) are counted
//! in `Stats` instead.

/// The error type for proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A buffer pool could not be allocated.
    #[error("unable to allocate {0} pool buffers")]
    Alloc(usize),

    /// A buffer pool capacity was not a power of two of at least 2.
    #[error("pool capacity {0} is not a power of two")]
    Capacity(usize),

    /// A control register bank outside the even banks 0..22 was requested.
    #[error("invalid register bank {0}")]
    InvalidBank(u8),

    /// The receive sample rate is not one of 48/96/192/384 kHz.
    #[error("invalid sample rate {0}")]
    InvalidSampleRate(u32),

    /// The receiver count is outside 1..=8.
    #[error("invalid receiver count {0}")]
    InvalidReceivers(usize),

    /// The clock source was not a hex byte.
    #[error("invalid clock source {0:?}")]
    InvalidClockSource(String),

    /// A fully-qualified MAC address could not be parsed.
    #[error("invalid MAC address {0:?}")]
    InvalidMac(String),

    /// No matching hardware answered discovery in time.
    #[error("no matching device found")]
    DeviceNotFound,

    /// The transport layer reported a failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
