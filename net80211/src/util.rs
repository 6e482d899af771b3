//! Error type and debug logging shared by the receive path.

/// Debug line for silently dropped frames and state transitions.
///
/// Routed through the `log` facade with a fixed target so the platform
/// can filter 802.11 chatter independently of the rest of the system.
#[macro_export]
macro_rules! dprintln {
    ($fmt:expr) => (::log::debug!(target: "net80211", $fmt));
    ($fmt:expr, $($arg:tt)*) => (::log::debug!(target: "net80211", $fmt, $($arg)*));
}

pub use crate::dprintln;

/// Errors returned by collaborators and by the few fallible entry points.
///
/// Frame reception itself never fails: rejected frames are counted and
/// dropped. These are used where a caller has to be told "no".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KError {
    NotFound,
    AlreadyExists,
    Invalid,
    NoMemory,
    Busy,
    NotSupported,
    Timeout,
}

pub type KResult<T> = core::result::Result<T, KError>;

#[inline]
pub(crate) fn le16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

#[inline]
pub(crate) fn le32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}
