//! Windowed averaging, ambient compensation, and channel remapping.
//!
//! Raw readings carry a large ambient-light offset that varies with the
//! environment. The [`Aggregator`] keeps a short circular history per source,
//! averages it, takes the minimum of the per-sensor means as the ambient
//! baseline, and subtracts that baseline from every mean. The result is then
//! reordered from physical wiring order to the logical reporting order and
//! written back into the frame, reference field untouched.
//!
//! All of this runs on the foreground thread only; no locking is involved.

use log::trace;

use crate::acquisition::{SourceId, SOURCE_COUNT};
use crate::frame::{encode_sensors, Frame, FRAME_LEN, SENSOR_COUNT};

/// Maximum averaging window depth. The runtime depth is clamped to this.
pub const WINDOW_MAX: usize = 10;

/// Physical-to-logical channel map: logical position `i` reports physical
/// sensor `PERMUTATION[i]`. Fixed by the array head wiring.
pub const PERMUTATION: [usize; SENSOR_COUNT] = [0, 1, 3, 4, 2, 5, 6];

// ============================================================================
// Channel remapper
// ============================================================================

/// Reorder sensor values through `table` (logical `i` <- physical
/// `table[i]`). Goes through a scratch copy: the permutation is not a plain
/// swap, and a partial in-place overwrite would corrupt later reads.
pub fn remap_with(table: &[usize; SENSOR_COUNT], values: &mut [u16; SENSOR_COUNT]) {
    let scratch = *values;
    for (i, &phys) in table.iter().enumerate() {
        values[i] = scratch[phys];
    }
}

/// Reorder sensor values through the fixed wiring permutation.
pub fn remap(values: &mut [u16; SENSOR_COUNT]) {
    remap_with(&PERMUTATION, values);
}

/// Apply the fixed permutation to the sensor fields of a raw frame,
/// leaving the reference field untouched.
pub fn remap_frame(bytes: &mut [u8; FRAME_LEN]) {
    let mut sensors = Frame::decode(bytes).sensors;
    remap(&mut sensors);
    encode_sensors(&sensors, bytes);
}

// ============================================================================
// Sample window
// ============================================================================

/// Circular history of raw sensor readings for one source.
///
/// Sized for [`WINDOW_MAX`] slots but driven by the runtime depth: the write
/// index wraps mod depth and the fill count grows until it reaches depth,
/// after which every push transparently overwrites the oldest slot.
#[derive(Debug, Clone)]
struct SampleWindow {
    slots: [[u16; SENSOR_COUNT]; WINDOW_MAX],
    write: usize,
    filled: usize,
}

impl SampleWindow {
    fn new() -> Self {
        SampleWindow {
            slots: [[0u16; SENSOR_COUNT]; WINDOW_MAX],
            write: 0,
            filled: 0,
        }
    }

    fn push(&mut self, depth: usize, sample: [u16; SENSOR_COUNT]) {
        // A depth lowered between calls could leave the index out of range.
        self.write %= depth;
        self.slots[self.write] = sample;
        self.write = (self.write + 1) % depth;
        if self.filled < depth {
            self.filled += 1;
        }
    }

    fn is_full(&self, depth: usize) -> bool {
        self.filled >= depth
    }

    /// Per-sensor arithmetic mean over the `depth` most recent samples.
    /// u32 accumulator: worst case 10 x 65535 exceeds 16 bits.
    fn means(&self, depth: usize) -> [u16; SENSOR_COUNT] {
        let mut sums = [0u32; SENSOR_COUNT];
        for slot in &self.slots[..depth] {
            for (sum, &v) in sums.iter_mut().zip(slot) {
                *sum += u32::from(v);
            }
        }
        let mut means = [0u16; SENSOR_COUNT];
        for (m, sum) in means.iter_mut().zip(sums) {
            *m = (sum / depth as u32) as u16;
        }
        means
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Result of one [`Aggregator::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Window depth 0: processing disabled, frame untouched.
    Disabled,
    /// History still filling; frame untouched, no output yet.
    Filling,
    /// Window full: frame rewritten with the compensated, remapped values
    /// carried here (logical order).
    Compensated([u16; SENSOR_COUNT]),
}

/// Per-source windowed averaging and ambient-baseline compensation.
pub struct Aggregator {
    windows: [SampleWindow; SOURCE_COUNT],
}

impl Aggregator {
    pub fn new() -> Self {
        Aggregator {
            windows: [SampleWindow::new(), SampleWindow::new()],
        }
    }

    /// Feed one raw frame through the window and, once the window is full,
    /// rewrite its sensor fields with compensated values.
    ///
    /// `depth` is clamped to [`WINDOW_MAX`]; 0 is a no-op. While the window
    /// is still filling, the frame bytes are left exactly as received. The
    /// reference field (bytes 0..2) is never touched.
    pub fn process(
        &mut self,
        source: SourceId,
        frame: &mut [u8; FRAME_LEN],
        depth: usize,
    ) -> ProcessOutcome {
        let depth = depth.min(WINDOW_MAX);
        if depth == 0 {
            return ProcessOutcome::Disabled;
        }

        let raw = Frame::decode(frame).sensors;
        let window = &mut self.windows[source.index()];
        window.push(depth, raw);

        if !window.is_full(depth) {
            return ProcessOutcome::Filling;
        }

        let means = window.means(depth);
        let baseline = *means.iter().min().unwrap_or(&0);

        let mut compensated = [0u16; SENSOR_COUNT];
        for (c, &m) in compensated.iter_mut().zip(&means) {
            *c = m.saturating_sub(baseline);
        }
        remap(&mut compensated);
        encode_sensors(&compensated, frame);

        trace!("source {source}: baseline {baseline}, compensated {compensated:?}");
        ProcessOutcome::Compensated(compensated)
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Peak detection
// ============================================================================

/// Find the strongest sensor across both sources.
///
/// Returns the global index (0-6 primary, 7-13 secondary) and its value.
/// Ties go to the lower index. Callers must only combine vectors taken when
/// *both* sources had independently fresh frames.
pub fn peak_sensor(
    primary: &[u16; SENSOR_COUNT],
    secondary: &[u16; SENSOR_COUNT],
) -> (usize, u16) {
    let mut peak_idx = 0usize;
    let mut peak_val = 0u16;
    for (i, &v) in primary.iter().chain(secondary.iter()).enumerate() {
        if v > peak_val {
            peak_val = v;
            peak_idx = i;
        }
    }
    (peak_idx, peak_val)
}
