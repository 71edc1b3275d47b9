//! UDP transport for Metis/Hermes hardware.
//!
//! All traffic goes through one socket bound to the chosen local interface. Discovery
//! broadcasts a request to port 1024 and collects replies; data frames are sent to the
//! selected device two at a time inside a sequenced datagram, and received datagrams
//! are handed to a caller-supplied handler on the receive thread.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::consts::{DATAGRAM_HEADER, DATAGRAM_SIZE, EP_RX, FRAME_SIZE};
use crate::error::{Error, Result};
use crate::transport::{MacAddr, Transport};

/// UDP port the hardware listens on.
pub const METIS_PORT: u16 = 1024;

/// First two bytes of every Metis packet.
const MAGIC: [u8; 2] = [0xef, 0xfe];
/// Packet type: data frames.
const TYPE_DATA: u8 = 0x01;
/// Packet type: discovery request, or reply from an idle device.
const TYPE_DISCOVER: u8 = 0x02;
/// Packet type: discovery reply from a device already streaming.
const TYPE_DISCOVER_BUSY: u8 = 0x03;
/// Packet type: stream start/stop.
const TYPE_CONTROL: u8 = 0x04;

/// Discovery request length.
const DISCOVER_LEN: usize = 63;
/// Stream control packet length.
const CONTROL_LEN: usize = 64;

/// How long each discovery round waits for replies.
const DISCOVER_WAIT: Duration = Duration::from_millis(200);
/// Socket read timeout, bounding how long `stop_receive_thread` takes to be honored.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A device that answered discovery.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Device {
    pub addr: SocketAddrV4,
    pub mac: MacAddr,
    pub firmware: u8,
    pub board: u8,
    /// Device reported it was already streaming to another host.
    pub busy: bool,
}

/// Build a discovery request.
pub fn discover_request() -> [u8; DISCOVER_LEN] {
    let mut buf = [0; DISCOVER_LEN];
    buf[..3].copy_from_slice(&[MAGIC[0], MAGIC[1], TYPE_DISCOVER]);
    buf
}

/// Parse a discovery reply from the given address.
pub fn parse_discover_reply(buf: &[u8], addr: SocketAddrV4) -> Option<Device> {
    if buf.len() < 11 || buf[..2] != MAGIC {
        return None;
    }

    let busy = match buf[2] {
        TYPE_DISCOVER => false,
        TYPE_DISCOVER_BUSY => true,
        _ => return None,
    };

    let mut mac = [0; 6];
    mac.copy_from_slice(&buf[3..9]);

    Some(Device {
        addr: addr,
        mac: MacAddr(mac),
        firmware: buf[9],
        board: buf[10],
        busy: busy,
    })
}

/// Build a stream start/stop packet.
pub fn control_packet(on: bool) -> [u8; CONTROL_LEN] {
    let mut buf = [0; CONTROL_LEN];
    buf[..4].copy_from_slice(&[MAGIC[0], MAGIC[1], TYPE_CONTROL, on as u8]);
    buf
}

/// Build a data datagram carrying two frames.
pub fn data_datagram(ep: u8, seq: u32, a: &[u8], b: &[u8]) -> [u8; DATAGRAM_SIZE] {
    let mut buf = [0; DATAGRAM_SIZE];

    buf[..4].copy_from_slice(&[MAGIC[0], MAGIC[1], TYPE_DATA, ep]);
    buf[4..8].copy_from_slice(&seq.to_be_bytes());
    buf[DATAGRAM_HEADER..DATAGRAM_HEADER + FRAME_SIZE].copy_from_slice(a);
    buf[DATAGRAM_HEADER + FRAME_SIZE..].copy_from_slice(b);

    buf
}

/// Check if a received packet is a full datagram of receive frames.
pub fn is_rx_datagram(buf: &[u8]) -> bool {
    buf.len() == DATAGRAM_SIZE && buf[..4] == [MAGIC[0], MAGIC[1], TYPE_DATA, EP_RX]
}

/// Look up the IPv4 address of an interface, given either its name or an address.
pub fn resolve_interface(name: &str) -> Result<Ipv4Addr> {
    if let Ok(ip) = name.parse() {
        return Ok(ip);
    }

    let addrs = nix::ifaddrs::getifaddrs().map_err(io::Error::from)?;

    let found = addrs
        .filter(|ifa| ifa.interface_name == name)
        .filter_map(|ifa| ifa.address)
        .filter_map(|a| a.as_sockaddr_in().map(|sin| *SocketAddrV4::from(*sin).ip()))
        .next();

    found.ok_or_else(|| Error::Transport(format!("no IPv4 address on interface {}", name)))
}

/// Outbound frame batching state.
struct Outbound {
    /// Device receiving data frames, set when its stream is controlled.
    dest: Option<SocketAddrV4>,
    seq: u32,
    /// First frame of the next datagram, if one is waiting for its pair.
    pending: Option<(u8, [u8; FRAME_SIZE])>,
}

/// Metis transport over a UDP socket.
pub struct Metis {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    devices: Mutex<Vec<Device>>,
    out: Mutex<Outbound>,
    receiving: AtomicBool,
}

impl Metis {
    pub fn new() -> Self {
        Metis {
            socket: Mutex::new(None),
            devices: Mutex::new(Vec::new()),
            out: Mutex::new(Outbound {
                dest: None,
                seq: 0,
                pending: None,
            }),
            receiving: AtomicBool::new(true),
        }
    }

    /// Socket bound by the last discovery.
    fn socket(&self) -> Result<Arc<UdpSocket>> {
        lock(&self.socket)?.clone()
            .ok_or_else(|| Error::Transport("transport not bound".to_string()))
    }

    /// Bind to the given interface, or reuse the existing socket.
    fn bind(&self, interface: &str) -> Result<Arc<UdpSocket>> {
        let mut sock = lock(&self.socket)?;

        if let Some(ref s) = *sock {
            return Ok(s.clone());
        }

        let ip = resolve_interface(interface)?;
        let s = UdpSocket::bind(SocketAddrV4::new(ip, 0))?;

        s.set_broadcast(true)?;
        s.set_read_timeout(Some(READ_TIMEOUT))?;

        info!("bound {} on {}", s.local_addr()?, interface);

        let s = Arc::new(s);
        *sock = Some(s.clone());

        Ok(s)
    }

    /// Receive datagrams and pass each full receive datagram to the handler until
    /// `stop_receive_thread` is called.
    pub fn run_receiver<F: FnMut(&[u8])>(&self, mut handler: F) -> Result<()> {
        let socket = self.socket()?;
        let mut buf = [0; 2048];

        while self.receiving.load(Ordering::Acquire) {
            let len = match socket.recv_from(&mut buf) {
                Ok((len, _)) => len,
                Err(ref e) if is_timeout(e) => continue,
                Err(e) => return Err(e.into()),
            };

            if is_rx_datagram(&buf[..len]) {
                handler(&buf[..len]);
            } else {
                debug!("ignoring {} byte packet", len);
            }
        }

        debug!("receive loop stopped");

        Ok(())
    }

    fn send_to(&self, buf: &[u8], dest: SocketAddrV4) -> Result<()> {
        let sent = self.socket()?.send_to(buf, dest)?;

        if sent != buf.len() {
            return Err(Error::Transport(format!("short send of {}/{} bytes", sent,
                                                buf.len())));
        }

        Ok(())
    }
}

impl Default for Metis {
    fn default() -> Self { Self::new() }
}

fn lock<T>(m: &Mutex<T>) -> Result<std::sync::MutexGuard<T>> {
    m.lock().map_err(|_| Error::Transport("transport lock poisoned".to_string()))
}

fn is_timeout(e: &io::Error) -> bool {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => true,
        _ => false,
    }
}

impl Transport for Metis {
    fn discover(&self, interface: &str) -> Result<()> {
        let socket = self.bind(interface)?;
        let bcast = SocketAddrV4::new(Ipv4Addr::BROADCAST, METIS_PORT);

        socket.send_to(&discover_request(), bcast)?;

        let deadline = Instant::now() + DISCOVER_WAIT;
        let mut buf = [0; 2048];

        while Instant::now() < deadline {
            let (len, src) = match socket.recv_from(&mut buf) {
                Ok(r) => r,
                Err(ref e) if is_timeout(e) => continue,
                Err(e) => return Err(e.into()),
            };

            let addr = match src {
                SocketAddr::V4(a) => a,
                SocketAddr::V6(_) => continue,
            };

            let dev = match parse_discover_reply(&buf[..len], addr) {
                Some(d) => d,
                None => continue,
            };

            let mut devices = lock(&self.devices)?;

            if devices.iter().any(|d| d.mac == dev.mac) {
                continue;
            }

            debug!("found device {} at {} (firmware {}, board {}{})", dev.mac, dev.addr,
                   dev.firmware, dev.board, if dev.busy { ", busy" } else { "" });

            devices.push(dev);
        }

        Ok(())
    }

    fn found(&self) -> usize {
        self.devices.lock().map(|d| d.len()).unwrap_or(0)
    }

    fn mac_address(&self, device: usize) -> Option<MacAddr> {
        self.devices.lock().ok()?.get(device).map(|d| d.mac)
    }

    fn set_receive_stream(&self, on: bool, device: usize) -> Result<()> {
        let addr = lock(&self.devices)?.get(device).map(|d| d.addr)
            .ok_or(Error::DeviceNotFound)?;

        {
            let mut out = lock(&self.out)?;
            out.dest = Some(addr);

            if on {
                out.seq = 0;
                out.pending = None;
            }
        }

        debug!("turning stream {} on {}", if on { "on" } else { "off" }, addr);

        self.send_to(&control_packet(on), addr)
    }

    fn write(&self, endpoint: u8, frame: &[u8]) -> Result<()> {
        if frame.len() != FRAME_SIZE {
            return Err(Error::Transport(format!("invalid frame size {}", frame.len())));
        }

        let mut out = lock(&self.out)?;

        let dest = match out.dest {
            Some(d) => d,
            None => return Err(Error::Transport("no device selected".to_string())),
        };

        let (ep, first) = match out.pending.take() {
            Some(p) => p,
            None => {
                let mut buf = [0; FRAME_SIZE];
                buf.copy_from_slice(frame);
                out.pending = Some((endpoint, buf));

                return Ok(());
            },
        };

        let datagram = data_datagram(ep, out.seq, &first, frame);
        out.seq = out.seq.wrapping_add(1);

        drop(out);

        self.send_to(&datagram, dest)
    }

    fn stop_receive_thread(&self) {
        self.receiving.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    use crate::consts::EP_TX;

    #[test]
    fn test_packets() {
        let d = discover_request();
        assert_eq!(&d[..3], &[0xef, 0xfe, 0x02]);
        assert!(d[3..].iter().all(|&b| b == 0));

        assert_eq!(&control_packet(true)[..4], &[0xef, 0xfe, 0x04, 0x01]);
        assert_eq!(&control_packet(false)[..4], &[0xef, 0xfe, 0x04, 0x00]);
        assert_eq!(control_packet(true).len(), 64);

        let a = [0x11; FRAME_SIZE];
        let b = [0x22; FRAME_SIZE];
        let d = data_datagram(EP_TX, 0x01020304, &a, &b);

        assert_eq!(&d[..8], &[0xef, 0xfe, 0x01, 0x02, 0x01, 0x02, 0x03, 0x04]);
        assert!(d[8..520].iter().all(|&x| x == 0x11));
        assert!(d[520..].iter().all(|&x| x == 0x22));
        assert!(!is_rx_datagram(&d));

        let mut d = d;
        d[3] = EP_RX;
        assert!(is_rx_datagram(&d));
        assert!(!is_rx_datagram(&d[..1000]));
    }

    #[test]
    fn test_discover_reply() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 20), 1024);
        let reply = [0xef, 0xfe, 0x03, 0x00, 0x1c, 0xc0, 0xa2, 0x22, 0x5e, 32, 1];

        let d = parse_discover_reply(&reply, addr).unwrap();
        assert_eq!(d.mac.to_string(), "00:1C:C0:A2:22:5E");
        assert_eq!(d.firmware, 32);
        assert_eq!(d.board, 1);
        assert!(d.busy);
        assert_eq!(d.addr, addr);

        assert!(!parse_discover_reply(&[0xef, 0xfe, 0x02, 0, 0, 0, 0, 0, 0, 0, 0], addr)
                    .unwrap().busy);
        assert!(parse_discover_reply(&reply[..10], addr).is_none());
        assert!(parse_discover_reply(&[0xef, 0xfe, 0x01, 0, 0, 0, 0, 0, 0, 0, 0], addr)
                    .is_none());
    }

    #[test]
    fn test_resolve_interface() {
        assert_eq!(resolve_interface("10.0.0.2").unwrap(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(resolve_interface("lo").unwrap(), Ipv4Addr::LOCALHOST);
        assert!(resolve_interface("nonexistent9").is_err());
    }

    /// Bind a socket standing in for the hardware on loopback.
    fn fake_device() -> (UdpSocket, SocketAddrV4) {
        let dev = UdpSocket::bind("127.0.0.1:0").unwrap();
        dev.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let addr = match dev.local_addr().unwrap() {
            SocketAddr::V4(a) => a,
            _ => unreachable!(),
        };

        (dev, addr)
    }

    #[test]
    fn test_write_batches_pairs() {
        let (dev, addr) = fake_device();

        let m = Metis::new();
        m.bind("127.0.0.1").unwrap();
        m.devices.lock().unwrap().push(Device {
            addr: addr,
            mac: MacAddr([1, 2, 3, 4, 5, 6]),
            firmware: 0,
            board: 0,
            busy: false,
        });

        assert_eq!(m.found(), 1);
        assert_eq!(m.mac_address(0), Some(MacAddr([1, 2, 3, 4, 5, 6])));
        assert!(m.set_receive_stream(true, 1).is_err());

        m.set_receive_stream(true, 0).unwrap();

        let mut buf = [0; 2048];
        let (len, _) = dev.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], &control_packet(true)[..]);

        for i in 0..4u8 {
            m.write(EP_TX, &[i; FRAME_SIZE]).unwrap();
        }

        for seq in 0..2u32 {
            let (len, _) = dev.recv_from(&mut buf).unwrap();
            assert_eq!(len, DATAGRAM_SIZE);
            assert_eq!(&buf[..4], &[0xef, 0xfe, 0x01, EP_TX]);
            assert_eq!(&buf[4..8], &seq.to_be_bytes());
            assert_eq!(buf[8], seq as u8 * 2);
            assert_eq!(buf[520], seq as u8 * 2 + 1);
        }

        assert!(m.write(EP_TX, &[0; 10]).is_err());
    }

    #[test]
    fn test_receive_loop() {
        let (dev, _) = fake_device();

        let m = Arc::new(Metis::new());
        m.bind("127.0.0.1").unwrap();
        let local = m.socket().unwrap().local_addr().unwrap();

        let recv = m.clone();
        let handle = thread::spawn(move || {
            let mut seqs = vec![];
            recv.run_receiver(|d| seqs.push(crate::codec::sequence(d))).unwrap();
            seqs
        });

        let mut d = data_datagram(EP_RX, 7, &[0; FRAME_SIZE], &[0; FRAME_SIZE]);
        dev.send_to(&d, local).unwrap();
        dev.send_to(&discover_request(), local).unwrap();
        d[4..8].copy_from_slice(&8u32.to_be_bytes());
        dev.send_to(&d, local).unwrap();

        thread::sleep(Duration::from_millis(300));
        m.stop_receive_thread();

        assert_eq!(handle.join().unwrap(), [7, 8]);
    }
}
