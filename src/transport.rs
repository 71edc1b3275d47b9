//! Interface to the Ethernet transport that carries frames to and from the hardware.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Hardware MAC address.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = Error;

    /// Parse a `HH:HH:HH:HH:HH:HH` address, in either case.
    fn from_str(s: &str) -> Result<Self> {
        let mut mac = [0; 6];
        let mut parts = s.split(':');

        for b in mac.iter_mut() {
            let part = parts.next().ok_or_else(|| Error::InvalidMac(s.to_string()))?;

            if part.len() != 2 {
                return Err(Error::InvalidMac(s.to_string()));
            }

            *b = u8::from_str_radix(part, 16)
                .map_err(|_| Error::InvalidMac(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(Error::InvalidMac(s.to_string()));
        }

        Ok(MacAddr(mac))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let m = &self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
               m[0], m[1], m[2], m[3], m[4], m[5])
    }
}

/// Sends and receives raw frames for the proxy.
///
/// Called from several threads at once, so implementations use interior mutability
/// where they keep state.
pub trait Transport: Send + Sync {
    /// Broadcast a discovery request on the given interface.
    fn discover(&self, interface: &str) -> Result<()>;

    /// Number of devices that have answered discovery.
    fn found(&self) -> usize;

    /// MAC address of the discovered device at the given index.
    fn mac_address(&self, device: usize) -> Option<MacAddr>;

    /// Turn the hardware receive stream on or off for the given device.
    fn set_receive_stream(&self, on: bool, device: usize) -> Result<()>;

    /// Write one 512-byte frame to the given hardware endpoint.
    fn write(&self, endpoint: u8, frame: &[u8]) -> Result<()>;

    /// Stop delivering received datagrams.
    fn stop_receive_thread(&self);
}
