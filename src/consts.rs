/// Size of one HPSDR USB-style frame (bytes).
pub const FRAME_SIZE: usize = 512;
/// Number of frames carried by each Metis datagram.
pub const FRAMES_PER_DATAGRAM: usize = 2;
/// Size of the Metis datagram header (bytes).
pub const DATAGRAM_HEADER: usize = 8;
/// Size of a full Metis data datagram (bytes).
pub const DATAGRAM_SIZE: usize = DATAGRAM_HEADER + FRAMES_PER_DATAGRAM * FRAME_SIZE;
/// Size of the sync + control header at the start of each frame (bytes).
pub const FRAME_HEADER: usize = 8;

/// Frame sync byte, repeated three times.
pub const SYNC: u8 = 0x7f;

/// Maximum receivers the protocol can describe.
pub const MAX_RECEIVERS: usize = 8;
/// Receivers with a defined NCO frequency register.
pub const MAX_TUNED_RECEIVERS: usize = 7;

/// Sample rows per received frame, indexed by receiver count minus one.
pub const ROW_COUNT: [usize; MAX_RECEIVERS] = [63, 36, 25, 19, 15, 13, 11, 10];

/// Complex samples carried by each transmit frame.
pub const TX_SAMPLES_PER_FRAME: usize = 63;
/// Bytes per transmit row: L/R audio then I/Q, 16 bits each.
pub const TX_ROW_BYTES: usize = 8;

/// Number of receive buffers to allocate.
pub const RX_BUF_COUNT: usize = 128;
/// Capacity of each receive buffer (floats).
pub const RX_BUF_FLOATS: usize = 256;
/// Number of transmit frame buffers to allocate.
pub const TX_BUF_COUNT: usize = 128;

/// Transmit datagrams withheld after start before the initial burst is released.
pub const TX_INITIAL_BURST: usize = 4;

/// Transmit sample rate, fixed by the hardware.
pub const TX_SAMPLE_RATE: u32 = 48000;

/// Metis endpoint receiving transmit frames.
pub const EP_TX: u8 = 0x02;
/// Metis endpoint carrying receive frames.
pub const EP_RX: u8 = 0x06;
