use thiserror::Error;

/// Errors that can occur during log operations. Marked as non-exhaustive to allow for future
/// additions without breaking the API. Apart from the configuration errors returned on
/// construction, every variant is recoverable by the caller, usually by calling
/// [`Datalog::initialize`](crate::Datalog::initialize) again.
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The partition offset has to be aligned to the erase size of the underlying flash
    #[error("invalid partition offset")]
    InvalidPartitionOffset,

    /// The partition has to hold at least one page and be a multiple of the erase size
    #[error("invalid partition size")]
    InvalidPartitionSize,

    /// The page size is zero or does not fit into a single erase unit
    #[error("invalid page size")]
    InvalidPageSize,

    /// Header, payload and integrity byte have to fit into 255 bytes and into a single page
    #[error("invalid record size")]
    InvalidRecordSize,

    /// Every payload has exactly the size configured for the device image
    #[error("payload size mismatch: expected {expected} bytes, got {actual}")]
    PayloadSizeMismatch { expected: usize, actual: usize },

    /// `append` or `flush` was called before a successful `initialize`
    #[error("not initialized")]
    NotInitialized,

    /// Every page holds records and wrapping around is disabled
    #[error("device full")]
    DeviceFull,

    /// The device did not report ready within the configured number of polls
    #[error("device not ready")]
    DeviceNotReady,

    /// The internal error value is returned from the provided storage backend
    #[error("internal flash error")]
    FlashError,

    /// Reported by the reader when a header looks valid but describes a record that cannot exist,
    /// i.e. it is shorter than a header or runs past the end of the page.
    #[error("corrupt header at page {page} offset {offset}")]
    CorruptHeader { page: u16, offset: usize },

    /// The integrity byte of a record does not match its header and payload
    #[error("integrity mismatch at page {page} offset {offset}")]
    IntegrityMismatch { page: u16, offset: usize },
}
