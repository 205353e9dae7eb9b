//! Acquisition driver for a dual-source IR proximity array.
//!
//! Two array heads sit on a shared bus at fixed addresses, each delivering
//! 16-byte frames: one reference reading plus seven proximity sensors. This
//! crate covers the path from an armed asynchronous read to a compensated,
//! logically-ordered sensor vector:
//!
//! 1. [`acquisition::IrArray`] arms non-blocking reads and publishes each
//!    completed frame through a per-source double buffer, latest-wins.
//! 2. The foreground loop polls with `try_take` and feeds frames to
//!    [`processing::Aggregator`], which averages a circular sample window,
//!    subtracts the ambient baseline (the minimum per-sensor mean), and
//!    remaps physical wiring order to the logical reporting order.
//! 3. [`diag::TextSink`] and [`indicator`] cover the presentation side.
//!
//! The bus transport itself is not implemented here; callers provide it
//! through the [`acquisition::BusMaster`] trait.

pub mod acquisition;
pub mod diag;
pub mod errors;
pub mod frame;
pub mod indicator;
pub mod logging;
pub mod processing;

pub use acquisition::{BusMaster, BusState, CaptureWriter, IrArray, ReadStatus, SourceId};
pub use diag::TextSink;
pub use errors::{DriverError, Result};
pub use frame::{to_voltage, Frame, FRAME_LEN, SENSOR_COUNT};
pub use indicator::{Indicator, LogIndicator, NullIndicator};
pub use processing::{peak_sensor, remap, Aggregator, ProcessOutcome, PERMUTATION, WINDOW_MAX};
