//! Bridge between the hardware transport and a sample-processing graph.
//!
//! A `HermesProxy` is opened against a transport and then split into three handles:
//!
//! * `HardwarePort`, driven by the transport's receive thread, decodes received
//!   datagrams into receive buffers and drains queued transmit frames on the schedule
//!   set by the receive cadence.
//! * `GraphPort`, driven by the processing graph, takes decoded receive buffers and
//!   encodes transmit samples into frames.
//! * `Controller` starts and stops streaming and exposes settings and counters.
//!
//! The receive and transmit rings each have exactly one producer and one consumer
//! split between the first two handles, so neither path ever blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arrayvec::ArrayVec;
use num::complex::Complex32;

use crate::codec::{self, SequenceTracker};
use crate::consts::{
    DATAGRAM_HEADER, EP_TX, FRAME_SIZE, ROW_COUNT, RX_BUF_COUNT, RX_BUF_FLOATS, TX_BUF_COUNT,
    TX_INITIAL_BURST, TX_SAMPLES_PER_FRAME,
};
use crate::error::{Error, Result};
use crate::regs::{self, BankCycler, BANK_GENERAL};
use crate::ring::{ring, Consumer, Producer, ReadSlot};
use crate::sched::TxScheduler;
use crate::settings::{Config, MacTarget, PttMode, Settings};
use crate::stats::{Report, Stats};
use crate::transport::Transport;

/// Decoded samples from one received frame, receiver-interleaved I/Q.
pub type RxBuf = ArrayVec<f32, RX_BUF_FLOATS>;
/// Encoded transmit frame.
pub type TxFrame = [u8; FRAME_SIZE];

/// Delay between discovery attempts.
const DISCOVERY_RETRY: Duration = Duration::from_millis(250);

/// Streaming state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProxyState {
    Stopped,
    Running,
}

/// State shared by all handles.
struct Shared<T> {
    settings: Arc<Settings>,
    transport: Arc<T>,
    stats: Stats,
    /// Index of the selected device in the transport's discovery list.
    device: usize,
    running: AtomicBool,
    /// Suppresses transmit draining.
    tx_stop: AtomicBool,
    /// Withholds transmit draining until the initial burst has been queued.
    hold_off: AtomicBool,
}

impl<T: Transport> Shared<T> {
    fn write(&self, frame: &[u8]) {
        if let Err(e) = self.transport.write(EP_TX, frame) {
            warn!("unable to write transmit frame: {}", e);
        }
    }
}

/// Proxy between a hardware transport and a processing graph.
pub struct HermesProxy<T> {
    shared: Arc<Shared<T>>,
    rx_prod: Producer<RxBuf>,
    rx_cons: Consumer<RxBuf>,
    tx_prod: Producer<TxFrame>,
    tx_cons: Consumer<TxFrame>,
}

impl<T: Transport> HermesProxy<T> {
    /// Allocate buffers, select the configured device, and initialize its registers.
    ///
    /// The receive stream is left off until `Controller::start`.
    pub fn open(cfg: &Config, transport: Arc<T>) -> Result<Self> {
        let settings = Arc::new(Settings::new(cfg)?);

        let (rx_prod, rx_cons) = ring(RX_BUF_COUNT, RxBuf::new)?;
        let (tx_prod, tx_cons) = ring(TX_BUF_COUNT, || [0; FRAME_SIZE])?;

        let timeout = Duration::from_millis(cfg.discovery_timeout_ms);
        let device = select_device(&*transport, settings.interface(),
                                   settings.target(), timeout)?;

        transport.set_receive_stream(false, device)?;
        init_registers(&*transport, &settings)?;

        info!("opened device {} with {} receivers at {} Hz", device,
              settings.receivers(), settings.sample_rate());

        Ok(HermesProxy {
            shared: Arc::new(Shared {
                settings: settings,
                transport: transport,
                stats: Stats::new(),
                device: device,
                running: AtomicBool::new(false),
                tx_stop: AtomicBool::new(true),
                hold_off: AtomicBool::new(true),
            }),
            rx_prod: rx_prod,
            rx_cons: rx_cons,
            tx_prod: tx_prod,
            tx_cons: tx_cons,
        })
    }

    /// Split into the per-thread handles.
    pub fn split(self) -> (HardwarePort<T>, GraphPort<T>, Controller<T>) {
        let hw = HardwarePort {
            shared: self.shared.clone(),
            rx: self.rx_prod,
            tx: self.tx_cons,
            seq: SequenceTracker::default(),
            sched: TxScheduler::new(self.shared.settings.receivers()),
            counter: 0,
        };

        let graph = GraphPort {
            shared: self.shared.clone(),
            rx: self.rx_cons,
            tx: self.tx_prod,
            banks: BankCycler::default(),
        };

        (hw, graph, Controller { shared: self.shared })
    }
}

/// Run discovery until a device matching the target answers or the timeout elapses.
fn select_device<T: Transport>(t: &T, interface: &str, target: MacTarget,
                               timeout: Duration)
    -> Result<usize>
{
    let start = Instant::now();

    loop {
        t.discover(interface)?;

        for dev in 0..t.found() {
            match t.mac_address(dev) {
                Some(mac) if target.matches(&mac) => {
                    info!("selected device {} ({})", dev, mac);
                    return Ok(dev);
                },
                Some(mac) => debug!("skipping device {} ({})", dev, mac),
                None => {},
            }
        }

        let elapsed = start.elapsed();

        if elapsed >= timeout {
            return Err(Error::DeviceNotFound);
        }

        debug!("no device matching {:?} on {}, retrying", target, interface);
        thread::sleep(DISCOVERY_RETRY.min(timeout - elapsed));
    }
}

/// Send every data register bank, each preceded by bank 0.
fn init_registers<T: Transport>(t: &T, s: &Settings) -> Result<()> {
    let mut frame = [0; FRAME_SIZE];

    for bank in regs::init_banks(s.receivers()) {
        regs::build(BANK_GENERAL, s, &mut frame)?;
        t.write(EP_TX, &frame)?;

        regs::build(bank, s, &mut frame)?;
        t.write(EP_TX, &frame)?;
    }

    Ok(())
}

/// Handle driven by the transport's receive thread.
pub struct HardwarePort<T> {
    shared: Arc<Shared<T>>,
    rx: Producer<RxBuf>,
    tx: Consumer<TxFrame>,
    seq: SequenceTracker,
    sched: TxScheduler,
    /// Received datagrams, used to pace transmission.
    counter: u64,
}

impl<T: Transport> HardwarePort<T> {
    /// Process one received datagram.
    ///
    /// Each of its two frames fills one receive buffer. A datagram with bad sync in
    /// either frame is dropped whole.
    pub fn receive_datagram(&mut self, datagram: &[u8]) {
        let stats = &self.shared.stats;

        if datagram.len() >= DATAGRAM_HEADER {
            let lost = self.seq.update(codec::sequence(datagram));
            stats.add_lost_ethernet(lost, self.seq.current());
        }

        stats.inc_total_rx();

        if self.sched.should_fire(self.counter, self.shared.settings.sample_rate()) {
            self.drain();
        }

        self.counter += 1;

        let frames = match codec::frames(datagram) {
            Some(f) if f.iter().all(|sub| codec::has_sync(sub)) => f,
            _ => {
                self.shared.stats.inc_corrupt();
                return;
            },
        };

        let settings = &self.shared.settings;
        let receivers = settings.receivers();
        let muted = settings.rx_muted();

        for frame in frames.iter() {
            self.update_status(&frame[3..8]);

            match self.rx.acquire() {
                Some(mut buf) => {
                    buf.clear();
                    codec::unpack_frame(frame, receivers, muted, &mut *buf);
                },
                None => self.shared.stats.inc_lost_rx(),
            }
        }
    }

    fn update_status(&self, c: &[u8]) {
        let w = match codec::parse_status(c) {
            Some(w) => w,
            None => return,
        };

        let t = self.shared.stats.telemetry();

        if t.apply(w) && self.shared.settings.verbose() {
            t.log();
        }
    }

    /// Send queued transmit frames to the hardware, if any are due.
    fn drain(&mut self) {
        let shared = &self.shared;

        if shared.tx_stop.load(Ordering::Acquire) {
            return;
        }

        shared.stats.inc_total_tx();

        let queued = self.tx.len();

        if shared.hold_off.load(Ordering::Acquire) {
            if queued < TX_INITIAL_BURST * 2 {
                return;
            }

            debug!("releasing initial burst, {} transmit frames queued", queued);

            for _ in 0..TX_INITIAL_BURST * 2 {
                if let Some(f) = self.tx.acquire() {
                    shared.write(&*f);
                }
            }

            shared.hold_off.store(false, Ordering::Release);

            return;
        }

        if queued < 2 {
            shared.stats.inc_lost_tx();
            return;
        }

        for _ in 0..2 {
            if let Some(f) = self.tx.acquire() {
                shared.write(&*f);
            }
        }
    }
}

/// Handle driven by the processing graph.
pub struct GraphPort<T> {
    shared: Arc<Shared<T>>,
    rx: Consumer<RxBuf>,
    tx: Producer<TxFrame>,
    banks: BankCycler,
}

impl<T: Transport> GraphPort<T> {
    /// Encode one frame of transmit samples and queue it.
    ///
    /// Returns the number of samples consumed: 63, or 0 if fewer were given or no
    /// transmit buffer was free.
    pub fn put_transmit_samples(&mut self, samples: &[Complex32]) -> usize {
        if samples.len() < TX_SAMPLES_PER_FRAME {
            return 0;
        }

        let settings = &self.shared.settings;

        let mut frame = match self.tx.acquire() {
            Some(f) => f,
            None => {
                self.shared.stats.inc_tx_overrun();
                return 0;
            },
        };

        let bank = self.banks.next();

        if let Err(e) = regs::build(bank, settings, &mut frame[..]) {
            error!("unable to build register bank: {}", e);
        }

        let active = codec::pack_frame(&mut frame[..], &samples[..TX_SAMPLES_PER_FRAME],
                                       settings.tx_muted());

        if active && settings.ptt_mode() == PttMode::Vox {
            frame[3] |= 0x01;
        }

        TX_SAMPLES_PER_FRAME
    }

    /// Take the oldest decoded receive buffer, releasing it when the returned slot is
    /// dropped.
    pub fn get_receive_samples(&mut self) -> Option<ReadSlot<RxBuf>> {
        self.rx.acquire()
    }

    /// Take the oldest decoded receive buffer and split it into one stream per
    /// receiver.
    ///
    /// Returns the number of samples written to each output, or 0 if no buffer was
    /// available or the outputs can't hold a full frame.
    pub fn read_streams(&mut self, outputs: &mut [&mut [Complex32]]) -> usize {
        let receivers = self.shared.settings.receivers();
        let rows = ROW_COUNT[receivers - 1];

        if outputs.len() < receivers || outputs[..receivers].iter().any(|o| o.len() < rows) {
            return 0;
        }

        let buf = match self.rx.acquire() {
            Some(b) => b,
            None => return 0,
        };

        let row_floats = receivers * 2;

        for (row, iq) in buf.chunks(row_floats).enumerate() {
            for (out, s) in outputs.iter_mut().zip(iq.chunks(2)) {
                out[row] = Complex32::new(s[0], s[1]);
            }
        }

        buf.len() / row_floats
    }

    /// Number of decoded receive buffers waiting.
    pub fn pending(&self) -> usize { self.rx.len() }

    pub fn settings(&self) -> &Settings { &self.shared.settings }
}

/// Handle for controlling the proxy.
pub struct Controller<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Controller<T> {
    /// Enable the receive stream and begin transmitting once the initial burst is
    /// queued.
    pub fn start(&self) -> Result<()> {
        let s = &self.shared;

        s.hold_off.store(true, Ordering::Release);
        s.tx_stop.store(false, Ordering::Release);

        s.transport.set_receive_stream(true, s.device)?;
        s.running.store(true, Ordering::Release);

        info!("streaming started");

        Ok(())
    }

    /// Disable the receive stream and stop draining transmit frames.
    ///
    /// A datagram already being decoded finishes normally.
    pub fn stop(&self) -> Result<()> {
        let s = &self.shared;
        let ret = s.transport.set_receive_stream(false, s.device);

        s.tx_stop.store(true, Ordering::Release);
        s.running.store(false, Ordering::Release);

        info!("streaming stopped");

        ret
    }

    pub fn state(&self) -> ProxyState {
        if self.shared.running.load(Ordering::Acquire) {
            ProxyState::Running
        } else {
            ProxyState::Stopped
        }
    }

    /// Runtime settings, which may be changed while streaming.
    pub fn settings(&self) -> &Arc<Settings> { &self.shared.settings }

    pub fn stats(&self) -> &Stats { &self.shared.stats }

    pub fn report(&self) -> Report { self.shared.stats.report() }

    /// Stop streaming, log the final counters, and stop the transport's receive
    /// thread.
    pub fn shutdown(&self) -> Result<()> {
        let ret = self.stop();

        info!("{}", self.report());
        self.shared.transport.stop_receive_thread();

        ret
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use crate::consts::{DATAGRAM_HEADER, DATAGRAM_SIZE, EP_RX, SYNC};
    use crate::settings::SampleRate;
    use crate::transport::MacAddr;

    const MAC_A: MacAddr = MacAddr([0x00, 0x1c, 0xc0, 0xa2, 0x13, 0xdd]);
    const MAC_B: MacAddr = MacAddr([0x00, 0x1c, 0xc0, 0xa2, 0x22, 0x5e]);

    #[derive(Default)]
    struct MockTransport {
        macs: Vec<MacAddr>,
        discovers: AtomicUsize,
        writes: Mutex<Vec<(u8, Vec<u8>)>>,
        streams: Mutex<Vec<(bool, usize)>>,
        stopped: AtomicBool,
    }

    impl MockTransport {
        fn new(macs: Vec<MacAddr>) -> Arc<Self> {
            Arc::new(MockTransport { macs: macs, ..Default::default() })
        }

        fn writes(&self) -> Vec<(u8, Vec<u8>)> {
            self.writes.lock().unwrap().clone()
        }

        fn write_count(&self) -> usize {
            self.writes.lock().unwrap().len()
        }
    }

    impl Transport for MockTransport {
        fn discover(&self, _: &str) -> Result<()> {
            self.discovers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn found(&self) -> usize { self.macs.len() }

        fn mac_address(&self, dev: usize) -> Option<MacAddr> {
            self.macs.get(dev).cloned()
        }

        fn set_receive_stream(&self, on: bool, dev: usize) -> Result<()> {
            self.streams.lock().unwrap().push((on, dev));
            Ok(())
        }

        fn write(&self, ep: u8, frame: &[u8]) -> Result<()> {
            assert_eq!(frame.len(), FRAME_SIZE);
            self.writes.lock().unwrap().push((ep, frame.to_vec()));
            Ok(())
        }

        fn stop_receive_thread(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    type Handles = (HardwarePort<MockTransport>, GraphPort<MockTransport>,
                    Controller<MockTransport>, Arc<MockTransport>);

    fn config(receivers: usize, rate: u32) -> Config {
        Config {
            receivers: receivers,
            sample_rate: rate,
            discovery_timeout_ms: 0,
            ..Config::default()
        }
    }

    fn open(cfg: Config) -> Handles {
        let t = MockTransport::new(vec![MAC_A]);
        let (hw, graph, ctl) = HermesProxy::open(&cfg, t.clone()).unwrap().split();
        (hw, graph, ctl, t)
    }

    /// Build a received datagram with every sample set to the given 24-bit word.
    fn datagram(seq: u32, receivers: usize, sample: [u8; 3]) -> Vec<u8> {
        let mut d = vec![0; DATAGRAM_SIZE];
        d[..4].copy_from_slice(&[0xef, 0xfe, 0x01, EP_RX]);
        d[4..8].copy_from_slice(&seq.to_be_bytes());

        for frame in d[DATAGRAM_HEADER..].chunks_mut(FRAME_SIZE) {
            frame[..3].copy_from_slice(&[SYNC; 3]);

            let row_bytes = receivers * 6 + 2;
            let rows = frame[8..].chunks_mut(row_bytes).take(ROW_COUNT[receivers - 1]);

            for row in rows {
                for s in row[..receivers * 6].chunks_mut(3) {
                    s.copy_from_slice(&sample);
                }
            }
        }

        d
    }

    /// Records log messages along with the thread that logged them.
    struct Capture(Mutex<Vec<(thread::ThreadId, String)>>);

    impl log::Log for Capture {
        fn enabled(&self, _: &log::Metadata) -> bool { true }

        fn log(&self, r: &log::Record) {
            self.0.lock().unwrap().push((thread::current().id(), r.args().to_string()));
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));

    /// Telemetry lines logged so far by the current thread.
    fn telemetry_logs() -> Vec<String> {
        let id = thread::current().id();

        CAPTURE.0.lock().unwrap().iter()
            .filter(|&&(t, ref m)| t == id && m.starts_with("fwd "))
            .map(|&(_, ref m)| m.clone())
            .collect()
    }

    fn samples(re: f32, im: f32) -> Vec<Complex32> {
        vec![Complex32::new(re, im); TX_SAMPLES_PER_FRAME]
    }

    #[test]
    fn test_open() {
        let (_, _, ctl, t) = open(config(3, 48000));

        assert_eq!(ctl.state(), ProxyState::Stopped);
        assert_eq!(*t.streams.lock().unwrap(), [(false, 0)]);

        let banks: Vec<u8> = t.writes().iter().map(|&(ep, ref f)| {
            assert_eq!(ep, EP_TX);
            assert!(codec::has_sync(f));
            f[3]
        }).collect();

        assert_eq!(banks, [0, 2, 0, 4, 0, 6, 0, 8, 0, 18]);
    }

    #[test]
    fn test_select_device() {
        let t = MockTransport::new(vec![MAC_A, MAC_B]);
        let mut cfg = config(1, 48000);
        cfg.mac = Some(MAC_B.to_string());

        let (_, _, ctl) = HermesProxy::open(&cfg, t.clone()).unwrap().split();
        ctl.start().unwrap();
        assert_eq!(*t.streams.lock().unwrap(), [(false, 1), (true, 1)]);

        cfg.mac = Some("00:00:00:00:00:01".to_string());
        match HermesProxy::open(&cfg, t.clone()) {
            Err(Error::DeviceNotFound) => {},
            _ => panic!("expected missing device"),
        }

        let t = MockTransport::new(vec![]);
        cfg.mac = None;
        cfg.discovery_timeout_ms = 300;

        match HermesProxy::open(&cfg, t.clone()) {
            Err(Error::DeviceNotFound) => {},
            _ => panic!("expected missing device"),
        }

        assert!(t.discovers.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_open_rejects_config() {
        let t = MockTransport::new(vec![MAC_A]);

        assert!(HermesProxy::open(&config(9, 48000), t.clone()).is_err());
        assert!(HermesProxy::open(&config(1, 44100), t.clone()).is_err());
        assert_eq!(t.write_count(), 0);
    }

    #[test]
    fn test_schedule_end_to_end() {
        let (mut hw, _, ctl, _) = open(config(3, 48000));
        ctl.start().unwrap();

        for seq in 1..64 {
            hw.receive_datagram(&datagram(seq, 3, [0; 3]));
        }

        assert_eq!(ctl.stats().total_rx_bufs(), 63);
        assert_eq!(ctl.stats().total_tx_bufs(), 25);
    }

    #[test]
    fn test_hold_off_burst() {
        let (mut hw, mut graph, ctl, t) = open(config(1, 48000));
        ctl.start().unwrap();

        let init = t.write_count();
        let s = samples(0.5, 0.5);

        for _ in 0..7 {
            assert_eq!(graph.put_transmit_samples(&s), 63);
        }

        // Held off: nothing sent and nothing counted as lost.
        hw.receive_datagram(&datagram(1, 1, [0; 3]));
        assert_eq!(t.write_count(), init);
        assert_eq!(ctl.stats().lost_tx_bufs(), 0);

        assert_eq!(graph.put_transmit_samples(&s), 63);
        hw.receive_datagram(&datagram(2, 1, [0; 3]));
        assert_eq!(t.write_count(), init + 8);

        // Steady state sends two frames per transmit slot.
        for _ in 0..3 {
            graph.put_transmit_samples(&s);
        }

        hw.receive_datagram(&datagram(3, 1, [0; 3]));
        assert_eq!(t.write_count(), init + 10);

        hw.receive_datagram(&datagram(4, 1, [0; 3]));
        assert_eq!(t.write_count(), init + 10);
        assert_eq!(ctl.stats().lost_tx_bufs(), 1);
        assert_eq!(ctl.stats().total_tx_bufs(), 4);

        // Bank cycle continues across frames.
        let banks: Vec<u8> = t.writes()[init..].iter().map(|&(_, ref f)| f[3] & !1).collect();
        assert_eq!(banks, [2, 4, 6, 8, 10, 12, 14, 16, 18, 20]);
    }

    #[test]
    fn test_burst_keeps_pairs() {
        let (mut hw, mut graph, ctl, t) = open(config(1, 48000));
        let s = samples(0.2, 0.2);

        for _ in 0..9 {
            graph.put_transmit_samples(&s);
        }

        ctl.start().unwrap();
        let init = t.write_count();

        hw.receive_datagram(&datagram(1, 1, [0; 3]));
        assert_eq!(t.write_count() - init, TX_INITIAL_BURST * 2);

        // One frame left over isn't enough for a datagram.
        hw.receive_datagram(&datagram(2, 1, [0; 3]));
        assert_eq!(t.write_count() - init, TX_INITIAL_BURST * 2);
        assert_eq!(ctl.stats().lost_tx_bufs(), 1);

        graph.put_transmit_samples(&s);
        hw.receive_datagram(&datagram(3, 1, [0; 3]));

        let sent = t.write_count() - init;
        assert_eq!(sent, TX_INITIAL_BURST * 2 + 2);
        assert_eq!(sent % 2, 0);
    }

    #[test]
    fn test_stopped_suppresses_drain() {
        let (mut hw, mut graph, ctl, t) = open(config(1, 48000));
        let init = t.write_count();

        for _ in 0..20 {
            graph.put_transmit_samples(&samples(0.1, 0.0));
        }

        hw.receive_datagram(&datagram(1, 1, [0; 3]));
        assert_eq!(t.write_count(), init);
        assert_eq!(ctl.stats().total_tx_bufs(), 0);

        ctl.start().unwrap();
        assert_eq!(ctl.state(), ProxyState::Running);
        hw.receive_datagram(&datagram(2, 1, [0; 3]));
        assert_eq!(t.write_count(), init + TX_INITIAL_BURST * 2);

        ctl.stop().unwrap();
        assert_eq!(ctl.state(), ProxyState::Stopped);

        for _ in 0..4 {
            graph.put_transmit_samples(&samples(0.1, 0.0));
        }

        hw.receive_datagram(&datagram(3, 1, [0; 3]));
        assert_eq!(t.write_count(), init + TX_INITIAL_BURST * 2);
        assert_eq!(*t.streams.lock().unwrap(), [(false, 0), (true, 0), (false, 0)]);
    }

    #[test]
    fn test_verbose_telemetry() {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(log::LevelFilter::Info);

        let (mut hw, _, ctl, _) = open(config(1, 48000));

        // The first status update is due, but verbose is off.
        hw.receive_datagram(&datagram(1, 1, [0; 3]));
        assert!(telemetry_logs().is_empty());

        ctl.settings().set_verbose(true);

        // Two status updates per datagram, so the next one due is in datagram 257.
        for seq in 2..257 {
            hw.receive_datagram(&datagram(seq, 1, [0; 3]));
        }

        assert!(telemetry_logs().is_empty());

        hw.receive_datagram(&datagram(257, 1, [0; 3]));
        assert_eq!(telemetry_logs(), ["fwd 0.0W rev 0.0W adc overload false firmware 0"]);

        // AIN1 = 1000 gives 6.9 W forward, enough to report SWR.
        for seq in 258..514 {
            let mut d = datagram(seq, 1, [0; 3]);

            for frame in d[DATAGRAM_HEADER..].chunks_mut(FRAME_SIZE) {
                frame[3..8].copy_from_slice(&[0x08, 0, 0, 0x03, 0xe8]);
            }

            hw.receive_datagram(&d);
        }

        assert_eq!(telemetry_logs()[1],
                   "fwd 6.9W rev 0.0W swr 1.00:1 adc overload false firmware 0");
        assert_eq!(telemetry_logs().len(), 2);
    }

    #[test]
    fn test_corrupt_datagram() {
        let (mut hw, mut graph, ctl, _) = open(config(1, 48000));

        let mut d = datagram(1, 1, [0x12, 0x34, 0x56]);
        d[DATAGRAM_HEADER + FRAME_SIZE + 2] = 0x00;
        hw.receive_datagram(&d);

        assert_eq!(ctl.stats().corrupt_rx(), 1);
        assert!(graph.get_receive_samples().is_none());

        let mut d = datagram(2, 1, [0x12, 0x34, 0x56]);
        d[DATAGRAM_HEADER] = 0x00;
        hw.receive_datagram(&d);

        assert_eq!(ctl.stats().corrupt_rx(), 2);
        assert!(graph.get_receive_samples().is_none());

        hw.receive_datagram(&datagram(3, 1, [0x12, 0x34, 0x56])[..100]);
        assert_eq!(ctl.stats().corrupt_rx(), 3);
        assert_eq!(ctl.stats().total_rx_bufs(), 3);
    }

    #[test]
    fn test_sequence_gap() {
        let (mut hw, _, ctl, _) = open(config(1, 48000));

        for seq in 1..7 {
            hw.receive_datagram(&datagram(seq, 1, [0; 3]));
        }

        assert_eq!(ctl.stats().lost_ethernet_rx(), 0);

        hw.receive_datagram(&datagram(9, 1, [0; 3]));
        assert_eq!(ctl.stats().lost_ethernet_rx(), 3);
        assert_eq!(ctl.stats().current_seq(), 9);

        hw.receive_datagram(&datagram(8, 1, [0; 3]));
        assert_eq!(ctl.stats().lost_ethernet_rx(), 3);
        assert_eq!(ctl.stats().current_seq(), 9);
    }

    #[test]
    fn test_receive_samples() {
        let (mut hw, mut graph, _, _) = open(config(2, 96000));

        hw.receive_datagram(&datagram(1, 2, [0x40, 0x00, 0x00]));
        assert_eq!(graph.pending(), 2);

        {
            let buf = graph.get_receive_samples().unwrap();
            assert_eq!(buf.len(), 36 * 2 * 2);
            assert!(buf.iter().all(|&f| f == 0.5));
        }

        let mut a = vec![Complex32::new(0.0, 0.0); 36];
        let mut b = vec![Complex32::new(0.0, 0.0); 36];

        assert_eq!(graph.read_streams(&mut [&mut a[..], &mut b[..]]), 36);
        assert!(a.iter().chain(b.iter()).all(|&s| s == Complex32::new(0.5, 0.5)));

        // Empty, then outputs too short.
        assert_eq!(graph.read_streams(&mut [&mut a[..], &mut b[..]]), 0);

        hw.receive_datagram(&datagram(2, 2, [0x40, 0x00, 0x00]));
        assert_eq!(graph.read_streams(&mut [&mut a[..10], &mut b[..]]), 0);
        assert_eq!(graph.read_streams(&mut [&mut a[..]]), 0);
        assert_eq!(graph.pending(), 2);
    }

    #[test]
    fn test_read_streams_deinterleave() {
        let (mut hw, mut graph, _, _) = open(config(3, 48000));

        let mut d = datagram(1, 3, [0; 3]);

        // First row: receiver n carries I = n/4, Q = -n/4.
        for rx in 0..3 {
            let base = DATAGRAM_HEADER + 8 + rx * 6;
            let v = (rx as i32) << 21;
            d[base..base + 3].copy_from_slice(&v.to_be_bytes()[1..]);
            d[base + 3..base + 6].copy_from_slice(&(-v).to_be_bytes()[1..]);
        }

        hw.receive_datagram(&d);

        let mut out = vec![vec![Complex32::new(9.0, 9.0); 25]; 3];
        let n = {
            let mut refs: Vec<&mut [Complex32]> = out.iter_mut().map(|v| &mut v[..]).collect();
            graph.read_streams(&mut refs)
        };

        assert_eq!(n, 25);

        for (rx, o) in out.iter().enumerate() {
            let v = rx as f32 / 4.0;
            assert_eq!(o[0], Complex32::new(v, -v));
            assert!(o[1..].iter().all(|&s| s == Complex32::new(0.0, 0.0)));
        }
    }

    #[test]
    fn test_rx_muting() {
        let (mut hw, mut graph, ctl, _) = open(config(1, 48000));

        ctl.settings().set_ptt_mode(PttMode::On);
        hw.receive_datagram(&datagram(1, 1, [0x40, 0x00, 0x00]));

        let buf = graph.get_receive_samples().unwrap();
        assert_eq!(buf.len(), 126);
        assert!(buf.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_rx_overflow() {
        let (mut hw, mut graph, ctl, _) = open(config(1, 48000));

        for seq in 1..65 {
            hw.receive_datagram(&datagram(seq, 1, [0; 3]));
        }

        assert_eq!(graph.pending(), RX_BUF_COUNT - 1);
        assert_eq!(ctl.stats().lost_rx_bufs(), 1);

        drop(graph.get_receive_samples());
        hw.receive_datagram(&datagram(65, 1, [0; 3]));
        assert_eq!(ctl.stats().lost_rx_bufs(), 2);
    }

    #[test]
    fn test_transmit_frame() {
        let (mut hw, mut graph, ctl, t) = open(config(1, 48000));
        let settings = ctl.settings().clone();

        ctl.start().unwrap();
        settings.set_ptt_mode(PttMode::Vox);

        assert_eq!(graph.put_transmit_samples(&samples(0.5, -0.25)[..62]), 0);

        let mut long = samples(0.5, -0.25);
        long.extend(samples(0.9, 0.9));
        assert_eq!(graph.put_transmit_samples(&long), 63);

        settings.set_ptt_mode(PttMode::Off);
        graph.put_transmit_samples(&samples(0.5, -0.25));

        for _ in 0..6 {
            graph.put_transmit_samples(&samples(0.0, 0.0));
        }

        let init = t.write_count();
        hw.receive_datagram(&datagram(1, 1, [0; 3]));

        let writes = t.writes();
        let sent = &writes[init..];
        assert_eq!(sent.len(), 8);

        // Vox keys the transmitter for a nonzero frame.
        let f = &sent[0].1;
        assert_eq!(f[3], 0x02 | 0x01);
        assert_eq!(&f[8..12], &[0, 0, 0, 0]);
        assert_eq!(i16::from_be_bytes([f[12], f[13]]), -8191);
        assert_eq!(i16::from_be_bytes([f[14], f[15]]), 16383);
        assert_eq!(&f[FRAME_SIZE - 8..FRAME_SIZE - 4], &[0, 0, 0, 0]);

        // PTT off mutes the samples and the drive level.
        let f = &sent[1].1;
        assert_eq!(f[3], 0x04);
        assert!(f[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tx_overrun() {
        let (_, mut graph, ctl, _) = open(config(1, 48000));
        let s = samples(0.1, 0.1);

        for _ in 0..TX_BUF_COUNT - 1 {
            assert_eq!(graph.put_transmit_samples(&s), 63);
        }

        assert_eq!(graph.put_transmit_samples(&s), 0);
        assert_eq!(ctl.stats().tx_overruns(), 1);
    }

    #[test]
    fn test_sample_rate_change() {
        let (mut hw, _, ctl, _) = open(config(1, 48000));
        ctl.start().unwrap();
        ctl.settings().set_sample_rate(SampleRate::Rate384k);

        for seq in 1..17 {
            hw.receive_datagram(&datagram(seq, 1, [0; 3]));
        }

        assert_eq!(ctl.stats().total_tx_bufs(), 2);
    }

    #[test]
    fn test_shutdown() {
        let (_, _, ctl, t) = open(config(1, 48000));

        ctl.start().unwrap();
        ctl.shutdown().unwrap();

        assert_eq!(ctl.state(), ProxyState::Stopped);
        assert!(t.stopped.load(Ordering::SeqCst));
    }
}
