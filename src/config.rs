use crate::raw::{HEADER_SIZE, INTEGRITY_SIZE};

/// Polls of the device status before an operation gives up with `DeviceNotReady`.
pub const DEFAULT_READY_POLL_LIMIT: u32 = 100_000;

/// What to do once the last page of the device has been written.
#[derive(strum::Display, Debug, Eq, PartialEq, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FullPolicy {
    /// Refuse further appends with `Error::DeviceFull`.
    #[default]
    Stop,
    /// Continue at page 0, overwriting the oldest records.
    Wrap,
}

/// Where `initialize` places the write cursor.
#[derive(strum::Display, Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartMode {
    /// Start at page 0, offset 0, ignoring anything already on the device.
    Fresh,
    /// Scan the device and continue right after the last valid record.
    Resume,
}

/// Settings of a device image. Record size and the integrity byte are not stored on the medium,
/// so the same configuration has to be used every time the device is opened.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub payload_size: usize,
    pub integrity: bool,
    pub on_full: FullPolicy,
    pub ready_poll_limit: u32,
}

impl Config {
    pub const fn new(payload_size: usize) -> Self {
        Self {
            payload_size,
            integrity: false,
            on_full: FullPolicy::Stop,
            ready_poll_limit: DEFAULT_READY_POLL_LIMIT,
        }
    }

    /// Append a one byte checksum to every record.
    pub const fn with_integrity(mut self, enabled: bool) -> Self {
        self.integrity = enabled;
        self
    }

    pub const fn with_full_policy(mut self, policy: FullPolicy) -> Self {
        self.on_full = policy;
        self
    }

    pub const fn with_ready_poll_limit(mut self, polls: u32) -> Self {
        self.ready_poll_limit = polls;
        self
    }

    /// Header, payload and the optional integrity byte.
    pub const fn record_len(&self) -> usize {
        HEADER_SIZE + self.payload_size + if self.integrity { INTEGRITY_SIZE } else { 0 }
    }
}
