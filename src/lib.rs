//! Proxy between HPSDR Metis/Hermes hardware and a sample-processing graph.
//!
//! Received Protocol 1 datagrams are decoded into floating-point I/Q buffers, and
//! complex transmit samples are encoded into frames that are sent back to the
//! hardware paced by the receive stream.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

extern crate arrayvec;
extern crate chrono;
extern crate nix;
extern crate num;
extern crate serde;
extern crate serde_json;
extern crate thingbuf;
extern crate thiserror;

#[cfg(test)]
extern crate rand;

pub mod codec;
pub mod consts;
pub mod error;
pub mod metis;
pub mod proxy;
pub mod regs;
pub mod ring;
pub mod sched;
pub mod settings;
pub mod stats;
pub mod transport;

pub use error::{Error, Result};
pub use metis::Metis;
pub use proxy::{Controller, GraphPort, HardwarePort, HermesProxy, ProxyState};
pub use settings::{Config, PttMode, SampleRate, Settings};
pub use stats::Report;
pub use transport::{MacAddr, Transport};
