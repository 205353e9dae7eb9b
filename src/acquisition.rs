//! Acquisition manager and double-buffered frame store.
//!
//! Two array heads sit on the bus at fixed addresses. Reads are asynchronous:
//! [`IrArray::request_read`] arms a 16-byte transfer and returns immediately;
//! the bus driver delivers the payload later, on whatever context it runs
//! completions on, through the [`CaptureWriter`] it was handed.
//!
//! # Buffer ownership
//!
//! Each source owns two buffers. The *capture* buffer belongs to the
//! completion context while a transfer is in flight; the consumer never
//! touches it. The *stable* buffer is updated only by [`CaptureWriter::commit`]
//! as one full 16-byte copy immediately followed by setting the ready flag,
//! so a consumer that observes `ready == true` is guaranteed a complete,
//! self-consistent frame. Both the copy-in and the consumer's read-and-clear
//! run under the same mutex, the software stand-in for masking the
//! completion interrupt.
//!
//! # Latest-wins
//!
//! The store is a depth-1 queue: a frame completed while the previous one is
//! unread silently overwrites it. There is no backpressure and no queuing of
//! pending frames. This is the intended trade-off for a polled
//! producer/consumer pair with a single foreground reader.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::errors::{DriverError, Result};
use crate::frame::FRAME_LEN;

/// Number of array heads on the bus.
pub const SOURCE_COUNT: usize = 2;

/// Fixed 7-bit bus addresses, indexed by source.
const DEVICE_ADDRS: [u8; SOURCE_COUNT] = [0x30, 0x31];

// ============================================================================
// Source identity
// ============================================================================

/// One of the two array heads providing proximity frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceId {
    Primary,
    Secondary,
}

impl SourceId {
    /// Both sources, in index order.
    pub const ALL: [SourceId; SOURCE_COUNT] = [SourceId::Primary, SourceId::Secondary];

    /// Index into per-source arrays.
    pub fn index(self) -> usize {
        match self {
            SourceId::Primary => 0,
            SourceId::Secondary => 1,
        }
    }

    /// Fixed 7-bit bus address of this source's array head.
    pub fn device_addr(self) -> u8 {
        DEVICE_ADDRS[self.index()]
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Primary => write!(f, "primary"),
            SourceId::Secondary => write!(f, "secondary"),
        }
    }
}

// ============================================================================
// Bus transport abstraction
// ============================================================================

/// Reported state of a bus handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Ready,
    Busy,
}

/// Outcome of [`IrArray::request_read`].
///
/// `Busy` is a normal transient condition, not an error; the caller retries
/// on its own cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The transfer was armed; data will arrive through the completion path.
    Armed,
    /// The bus is mid-transfer; retry later.
    Busy,
}

/// External bus transport for one source.
///
/// Implementations wrap whatever actually moves bytes (an I2C master, a
/// loopback simulator in tests). `begin_read` must not block: it arms the
/// transfer and returns, delivering the payload later through the
/// [`CaptureWriter`] it was given. On failure after arming, call
/// [`CaptureWriter::abort`] so the source stays retryable.
pub trait BusMaster: Send {
    /// Current bus state; [`IrArray::request_read`] reports `Busy` without
    /// arming anything while this is not `Ready`.
    fn state(&self) -> BusState;

    /// Arm a non-blocking read of `len` bytes from `device_addr`.
    fn begin_read(&mut self, device_addr: u8, len: usize, capture: CaptureWriter) -> Result<()>;
}

// ============================================================================
// Per-source slot
// ============================================================================

/// Stable buffer plus its ready flag, mutated only under one lock.
struct Stable {
    buf: [u8; FRAME_LEN],
    ready: bool,
}

struct Slot {
    /// Completion-context side; the consumer never locks this.
    capture: Mutex<[u8; FRAME_LEN]>,
    stable: Mutex<Stable>,
    /// Consecutive failed transfers, cleared on the next successful commit.
    errors: AtomicU32,
}

impl Slot {
    fn new() -> Self {
        Slot {
            capture: Mutex::new([0u8; FRAME_LEN]),
            stable: Mutex::new(Stable {
                buf: [0u8; FRAME_LEN],
                ready: false,
            }),
            errors: AtomicU32::new(0),
        }
    }
}

// ============================================================================
// Completion handle
// ============================================================================

/// Write side of one in-flight transfer, handed to the bus driver by
/// [`IrArray::request_read`].
///
/// The driver fills the capture buffer (possibly in chunks, mirroring DMA)
/// and then either commits or aborts. Both consume the writer: one transfer,
/// one completion.
pub struct CaptureWriter {
    slot: Arc<Slot>,
    source: SourceId,
}

impl CaptureWriter {
    /// Copy received bytes into the capture buffer at `offset`.
    /// Writes past [`FRAME_LEN`] are clamped.
    pub fn fill(&self, offset: usize, bytes: &[u8]) {
        let mut capture = self.slot.capture.lock().unwrap();
        if offset >= FRAME_LEN {
            return;
        }
        let n = bytes.len().min(FRAME_LEN - offset);
        capture[offset..offset + n].copy_from_slice(&bytes[..n]);
    }

    /// Transfer finished: publish the captured frame.
    ///
    /// Copies capture into the stable buffer in one step, then sets the
    /// ready flag, so the consumer can never observe a half-updated frame.
    /// Also clears the consecutive-error counter.
    pub fn commit(self) {
        let capture = self.slot.capture.lock().unwrap();
        {
            let mut stable = self.slot.stable.lock().unwrap();
            stable.buf.copy_from_slice(&*capture);
            stable.ready = true;
        }
        self.slot.errors.store(0, Ordering::Relaxed);
        debug!("source {}: frame committed", self.source);
    }

    /// Transfer failed: discard any partial capture state.
    ///
    /// The ready flag is never set on this path, so no partial frame is
    /// exposed, and the source remains retryable with the next
    /// `request_read`. Consecutive failures are counted for the caller's
    /// escalation policy.
    pub fn abort(self) {
        let mut capture = self.slot.capture.lock().unwrap();
        capture.fill(0);
        let failures = self.slot.errors.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            "source {}: transfer failed ({} consecutive)",
            self.source, failures
        );
    }

    /// Convenience for drivers that receive the whole payload at once.
    pub fn complete_with(self, bytes: &[u8]) {
        self.fill(0, bytes);
        self.commit();
    }

    /// The source this writer belongs to.
    pub fn source(&self) -> SourceId {
        self.source
    }
}

// ============================================================================
// Acquisition manager
// ============================================================================

/// Owns per-source bus handles and frame stores, and issues reads.
///
/// # Example
/// ```ignore
/// let mut array = IrArray::with_ports(port_a, port_b);
/// loop {
///     for id in SourceId::ALL {
///         match array.request_read(id)? {
///             ReadStatus::Armed => {}
///             ReadStatus::Busy => {} // retry next cycle
///         }
///         if let Some(frame) = array.try_take(id) {
///             // process frame
///         }
///     }
/// }
/// ```
pub struct IrArray {
    ports: [Option<Box<dyn BusMaster>>; SOURCE_COUNT],
    slots: [Arc<Slot>; SOURCE_COUNT],
}

impl IrArray {
    /// Create a manager with no sources bound. All buffers are zeroed,
    /// ready flags cleared, failure counters zeroed.
    pub fn new() -> Self {
        IrArray {
            ports: [None, None],
            slots: [Arc::new(Slot::new()), Arc::new(Slot::new())],
        }
    }

    /// Create a manager with both sources bound.
    pub fn with_ports(
        primary: impl BusMaster + 'static,
        secondary: impl BusMaster + 'static,
    ) -> Self {
        let mut array = Self::new();
        array.bind(SourceId::Primary, primary);
        array.bind(SourceId::Secondary, secondary);
        array
    }

    /// Bind a source to its bus handle. Rebinding replaces the old handle
    /// and resets that source's buffers and flags.
    pub fn bind(&mut self, source: SourceId, port: impl BusMaster + 'static) {
        let i = source.index();
        self.ports[i] = Some(Box::new(port));
        self.slots[i] = Arc::new(Slot::new());
        debug!("source {source}: bound at addr {:#04x}", source.device_addr());
    }

    /// Issue a non-blocking 16-byte read from the source's array head.
    ///
    /// Returns `Ok(Armed)` when the transfer was started, `Ok(Busy)` when
    /// the bus is mid-transfer (retry later), and `Err(Unbound)` when the
    /// source has no handle. Nothing is copied synchronously.
    pub fn request_read(&mut self, source: SourceId) -> Result<ReadStatus> {
        let i = source.index();
        let port = self.ports[i]
            .as_mut()
            .ok_or(DriverError::Unbound(source))?;

        if port.state() != BusState::Ready {
            return Ok(ReadStatus::Busy);
        }

        let capture = CaptureWriter {
            slot: Arc::clone(&self.slots[i]),
            source,
        };
        port.begin_read(source.device_addr(), FRAME_LEN, capture)?;
        Ok(ReadStatus::Armed)
    }

    /// Poll for a completed frame: copy it out and clear the ready flag in
    /// one critical section. Returns `None` when no new frame has arrived;
    /// never blocks waiting for one.
    pub fn try_take(&self, source: SourceId) -> Option<[u8; FRAME_LEN]> {
        let mut stable = self.slots[source.index()].stable.lock().unwrap();
        if !stable.ready {
            return None;
        }
        stable.ready = false;
        Some(stable.buf)
    }

    /// Like [`try_take`](Self::try_take) but copies into a caller buffer,
    /// clamped to its capacity. Returns `true` when a frame was consumed.
    pub fn take_into(&self, source: SourceId, out: &mut [u8]) -> bool {
        let mut stable = self.slots[source.index()].stable.lock().unwrap();
        if !stable.ready {
            return false;
        }
        let n = out.len().min(FRAME_LEN);
        out[..n].copy_from_slice(&stable.buf[..n]);
        stable.ready = false;
        true
    }

    /// Peek at a source's ready flag without consuming the frame.
    pub fn is_ready(&self, source: SourceId) -> bool {
        self.slots[source.index()].stable.lock().unwrap().ready
    }

    /// Discard a pending frame without reading it.
    pub fn clear_ready(&self, source: SourceId) {
        self.slots[source.index()].stable.lock().unwrap().ready = false;
    }

    /// True only when every source's ready flag is independently true.
    ///
    /// Cross-source processing (peak detection across both heads) must wait
    /// for this; neither flag is ever assumed or forced.
    pub fn all_ready(&self) -> bool {
        SourceId::ALL.iter().all(|&id| self.is_ready(id))
    }

    /// Consecutive failed transfers on this source since the last good frame.
    pub fn consecutive_errors(&self, source: SourceId) -> u32 {
        self.slots[source.index()].errors.load(Ordering::Relaxed)
    }
}

impl Default for IrArray {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, SENSOR_COUNT};
    use std::sync::atomic::AtomicBool;
    use std::thread;

    /// Loopback bus that completes every read synchronously with the next
    /// queued payload, or aborts when told to fail.
    struct LoopbackBus {
        next: Vec<u8>,
        fail: bool,
        busy: bool,
    }

    impl LoopbackBus {
        fn with_payload(payload: &[u8]) -> Self {
            LoopbackBus {
                next: payload.to_vec(),
                fail: false,
                busy: false,
            }
        }
    }

    impl BusMaster for LoopbackBus {
        fn state(&self) -> BusState {
            if self.busy {
                BusState::Busy
            } else {
                BusState::Ready
            }
        }

        fn begin_read(&mut self, _addr: u8, _len: usize, capture: CaptureWriter) -> Result<()> {
            if self.fail {
                capture.abort();
            } else {
                capture.complete_with(&self.next);
            }
            Ok(())
        }
    }

    fn seq_frame(seq: u16) -> [u8; FRAME_LEN] {
        let mut bytes = [0u8; FRAME_LEN];
        Frame {
            vref: seq,
            sensors: [seq; SENSOR_COUNT],
        }
        .encode(&mut bytes);
        bytes
    }

    #[test]
    fn poll_before_completion_is_none() {
        let array = IrArray::new();
        assert!(array.try_take(SourceId::Primary).is_none());
        assert!(!array.is_ready(SourceId::Primary));
    }

    #[test]
    fn unbound_source_is_an_error() {
        let mut array = IrArray::new();
        assert!(matches!(
            array.request_read(SourceId::Primary),
            Err(DriverError::Unbound(SourceId::Primary))
        ));
    }

    #[test]
    fn busy_bus_reports_busy_without_arming() {
        let mut bus = LoopbackBus::with_payload(&seq_frame(1));
        bus.busy = true;
        let mut array = IrArray::new();
        array.bind(SourceId::Primary, bus);
        assert_eq!(
            array.request_read(SourceId::Primary).unwrap(),
            ReadStatus::Busy
        );
        assert!(!array.is_ready(SourceId::Primary));
    }

    #[test]
    fn armed_read_publishes_a_frame() {
        let payload = seq_frame(42);
        let mut array = IrArray::new();
        array.bind(SourceId::Primary, LoopbackBus::with_payload(&payload));

        assert_eq!(
            array.request_read(SourceId::Primary).unwrap(),
            ReadStatus::Armed
        );
        assert!(array.is_ready(SourceId::Primary));
        assert_eq!(array.try_take(SourceId::Primary), Some(payload));
        // Consumed: the next poll is empty.
        assert!(array.try_take(SourceId::Primary).is_none());
    }

    #[test]
    fn latest_wins_on_unread_overwrite() {
        let mut array = IrArray::new();
        array.bind(SourceId::Primary, LoopbackBus::with_payload(&seq_frame(1)));
        array.request_read(SourceId::Primary).unwrap();

        // Second completion lands before the first frame is read.
        let slot_frame = seq_frame(7);
        let slot = Arc::clone(&array.slots[SourceId::Primary.index()]);
        let writer = CaptureWriter {
            slot,
            source: SourceId::Primary,
        };
        writer.complete_with(&slot_frame);

        assert_eq!(array.try_take(SourceId::Primary), Some(slot_frame));
    }

    #[test]
    fn take_into_clamps_to_caller_capacity() {
        let mut array = IrArray::new();
        array.bind(SourceId::Primary, LoopbackBus::with_payload(&seq_frame(9)));
        array.request_read(SourceId::Primary).unwrap();

        let mut out = [0u8; 4];
        assert!(array.take_into(SourceId::Primary, &mut out));
        assert_eq!(&out[..], &seq_frame(9)[..4]);
        assert!(!array.is_ready(SourceId::Primary));
    }

    #[test]
    fn clear_ready_discards_without_reading() {
        let mut array = IrArray::new();
        array.bind(SourceId::Primary, LoopbackBus::with_payload(&seq_frame(3)));
        array.request_read(SourceId::Primary).unwrap();
        array.clear_ready(SourceId::Primary);
        assert!(array.try_take(SourceId::Primary).is_none());
    }

    #[test]
    fn all_ready_requires_both_flags() {
        let mut array = IrArray::new();
        array.bind(SourceId::Primary, LoopbackBus::with_payload(&seq_frame(1)));
        array.bind(SourceId::Secondary, LoopbackBus::with_payload(&seq_frame(2)));
        assert!(!array.all_ready());

        array.request_read(SourceId::Primary).unwrap();
        assert!(!array.all_ready());

        array.request_read(SourceId::Secondary).unwrap();
        assert!(array.all_ready());
    }

    #[test]
    fn abort_counts_failures_and_stays_retryable() {
        let mut bus = LoopbackBus::with_payload(&seq_frame(5));
        bus.fail = true;
        let mut array = IrArray::new();
        array.bind(SourceId::Primary, bus);

        for expected in 1..=3u32 {
            array.request_read(SourceId::Primary).unwrap();
            assert_eq!(array.consecutive_errors(SourceId::Primary), expected);
            assert!(!array.is_ready(SourceId::Primary));
        }

        // A clean transfer resets the counter and publishes.
        let writer = CaptureWriter {
            slot: Arc::clone(&array.slots[SourceId::Primary.index()]),
            source: SourceId::Primary,
        };
        writer.complete_with(&seq_frame(5));
        assert_eq!(array.consecutive_errors(SourceId::Primary), 0);
        assert_eq!(array.try_take(SourceId::Primary), Some(seq_frame(5)));
    }

    #[test]
    fn taken_frames_are_never_torn() {
        // A producer thread commits synthetic frames whose eight fields all
        // carry the same sequence number; the consumer polls concurrently.
        // Any mixture of two completions in one taken frame is a tear.
        let array = Arc::new(IrArray::new());
        let slot = Arc::clone(&array.slots[SourceId::Primary.index()]);
        let stop = Arc::new(AtomicBool::new(false));

        let producer = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut seq: u16 = 0;
                while !stop.load(Ordering::Relaxed) {
                    let writer = CaptureWriter {
                        slot: Arc::clone(&slot),
                        source: SourceId::Primary,
                    };
                    writer.complete_with(&seq_frame(seq));
                    seq = seq.wrapping_add(1);
                }
            })
        };

        let mut taken = 0usize;
        while taken < 2000 {
            if let Some(bytes) = array.try_take(SourceId::Primary) {
                let frame = Frame::decode(&bytes);
                assert!(
                    frame.sensors.iter().all(|&s| s == frame.vref),
                    "torn frame: {frame:?}"
                );
                taken += 1;
            }
        }

        stop.store(true, Ordering::Relaxed);
        producer.join().unwrap();
    }
}
