//! Log rotation capability.

use std::io;

/// A log sink that can be rotated on demand.
///
/// The orchestrator calls [`LogRotate::rotate`] on every registered sink when
/// the process receives a hang-up signal.
pub trait LogRotate: Send + Sync + 'static {
    /// Closes the current output, archives it and reopens a fresh one.
    fn rotate(&self) -> io::Result<()>;
}
