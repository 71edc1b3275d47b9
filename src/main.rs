extern crate clap;
extern crate crossbeam;
extern crate env_logger;
extern crate hpsdr_proxy;
extern crate libc;
#[macro_use]
extern crate log;
extern crate num;
extern crate prctl;
extern crate serde_json;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::{Arg, App};
use num::complex::Complex32;

use hpsdr_proxy::consts::{ROW_COUNT, TX_SAMPLES_PER_FRAME};
use hpsdr_proxy::{Config, GraphPort, HermesProxy, Metis, PttMode, Transport};

/// Set by SIGINT.
static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

fn main() {
    let args = App::new("hpsdr-proxy")
        .arg(Arg::with_name("config")
             .short("c")
             .help("JSON configuration file")
             .value_name("FILE"))
        .arg(Arg::with_name("interface")
             .short("i")
             .help("network interface or local IPv4 address for discovery")
             .value_name("IFACE"))
        .arg(Arg::with_name("mac")
             .short("m")
             .help("hardware MAC address (default: first device found)")
             .value_name("MAC"))
        .arg(Arg::with_name("freq")
             .short("f")
             .help("comma-separated receiver frequencies (Hz)")
             .value_name("FREQS"))
        .arg(Arg::with_name("txfreq")
             .short("t")
             .help("transmit frequency (Hz)")
             .value_name("FREQ"))
        .arg(Arg::with_name("receivers")
             .short("n")
             .help("number of receivers (1-8)")
             .value_name("COUNT"))
        .arg(Arg::with_name("rate")
             .short("s")
             .help("receive sample rate: 48000, 96000, 192000, or 384000")
             .value_name("RATE"))
        .arg(Arg::with_name("drive")
             .short("d")
             .help("transmit drive level (0-255)")
             .value_name("LEVEL"))
        .arg(Arg::with_name("ptt")
             .short("p")
             .help("push-to-talk mode: off, vox, or on")
             .value_name("MODE"))
        .arg(Arg::with_name("write")
             .short("w")
             .help("write receiver samples to FILE (f32le, receiver-interleaved I/Q)")
             .value_name("FILE"))
        .arg(Arg::with_name("verbose")
             .short("v")
             .help("log hardware telemetry and debug messages"))
        .arg(Arg::with_name("json-stats")
             .long("json-stats")
             .help("print the final statistics as JSON"))
        .get_matches();

    let verbose = args.is_present("verbose");

    env_logger::Builder::from_env(env_logger::Env::default()
        .default_filter_or(if verbose { "debug" } else { "info" }))
        .init();

    let mut cfg = match args.value_of("config") {
        Some(path) => Config::from_reader(File::open(path)
            .expect("unable to open config file"))
            .expect("invalid config file"),
        None => Config::default(),
    };

    if let Some(s) = args.value_of("interface") {
        cfg.interface = s.to_string();
    }

    if let Some(s) = args.value_of("mac") {
        cfg.mac = Some(s.to_string());
    }

    if let Some(s) = args.value_of("freq") {
        for (f, s) in cfg.rx_freqs.iter_mut().zip(s.split(',')) {
            *f = s.trim().parse().expect("invalid receiver frequency");
        }
    }

    if let Some(s) = args.value_of("txfreq") {
        cfg.tx_freq = s.parse().expect("invalid transmit frequency");
    }

    if let Some(s) = args.value_of("receivers") {
        cfg.receivers = s.parse().expect("invalid receiver count");
    }

    if let Some(s) = args.value_of("rate") {
        cfg.sample_rate = s.parse().expect("invalid sample rate");
    }

    if let Some(s) = args.value_of("drive") {
        cfg.tx_drive = s.parse().expect("invalid drive level");
    }

    if let Some(s) = args.value_of("ptt") {
        cfg.ptt_mode = s.parse::<PttMode>().expect("invalid ptt mode");
    }

    cfg.verbose |= verbose;

    let capture = args.value_of("write")
        .map(|path| BufWriter::new(File::create(path).expect("unable to open sample file")));

    let metis = Arc::new(Metis::new());
    let proxy = HermesProxy::open(&cfg, metis.clone()).expect("unable to open hardware");
    let (mut hw, mut graph, ctl) = proxy.split();

    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as extern "C" fn(libc::c_int)
                     as libc::sighandler_t);
    }

    ctl.start().expect("unable to start streaming");

    let metis = &metis;

    crossbeam::scope(|scope| {
        scope.spawn(move |_| {
            prctl::set_name("receiver").unwrap();

            if let Err(e) = metis.run_receiver(|d| hw.receive_datagram(d)) {
                error!("receive loop failed: {}", e);
                STOP.store(true, Ordering::SeqCst);
            }
        });

        scope.spawn(move |_| {
            prctl::set_name("graph").unwrap();
            run_graph(&mut graph, capture);
        });

        while !STOP.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
        }

        if let Err(e) = ctl.shutdown() {
            warn!("unable to stop hardware stream: {}", e);
        }
    }).expect("thread panicked");

    if args.is_present("json-stats") {
        println!("{}", serde_json::to_string(&ctl.report()).expect("unable to encode stats"));
    }
}

/// Drain receive buffers, optionally writing them out, and keep the transmit side fed
/// with silence at the hardware's transmit rate.
fn run_graph<T: Transport, W: Write>(graph: &mut GraphPort<T>, mut capture: Option<W>) {
    let silence = [Complex32::new(0.0, 0.0); TX_SAMPLES_PER_FRAME];
    let receivers = graph.settings().receivers();
    let rows = ROW_COUNT[receivers - 1];

    // Transmit samples owed, scaled by the receive speed.
    let mut credit = 0;

    while !STOP.load(Ordering::Relaxed) {
        let buf = match graph.get_receive_samples() {
            Some(b) => b,
            None => {
                thread::sleep(Duration::from_millis(1));
                continue;
            },
        };

        if let Some(ref mut f) = capture {
            for s in buf.iter() {
                f.write_all(&s.to_le_bytes()).expect("unable to write samples");
            }
        }

        drop(buf);

        let due = TX_SAMPLES_PER_FRAME * graph.settings().sample_rate().speed();
        credit += rows;

        while credit >= due {
            if graph.put_transmit_samples(&silence) == 0 {
                break;
            }

            credit -= due;
        }

        credit = credit.min(due * 2);
    }

    if let Some(mut f) = capture {
        f.flush().expect("unable to flush samples");
    }
}
