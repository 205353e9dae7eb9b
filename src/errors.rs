use std::io;
use thiserror::Error;

use crate::acquisition::SourceId;

/// Errors reported by the acquisition layer.
///
/// Transient conditions are deliberately *not* in this enum: a busy bus is
/// returned as [`crate::acquisition::ReadStatus::Busy`] for the caller to
/// retry, and an empty poll is `None` from `try_take`. Nothing here halts
/// the system; an affected source is simply skipped until its next
/// successful read.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("source {0:?} has no bound bus handle")]
    Unbound(SourceId),
    #[error("bus transfer failed on source {0:?}")]
    Transfer(SourceId),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;
