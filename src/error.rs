//! Unified error type for something-remote.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` for efficient on-target logging.

/// Top-level error type used across the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Storage
    /// A persistent record store failed.
    Storage(StorageError),

    // Links
    /// BLE or broker transport refused the operation.
    Link(LinkError),

    /// Output requested while the channel is not connected.
    NotConnected,

    // Motion sensor
    /// I²C transaction to the motion sensor failed.
    I2c,

    /// The motion sensor did not acknowledge its address.
    SensorAbsent,

    // Generic
    /// Buffer too small for the requested operation.
    BufferOverflow,

    /// A record failed to (de)serialise.
    Encoding,
}

/// Storage faults, ordered roughly by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Flash read/write/erase failed.
    Flash,
    /// The record region holds data the map cannot parse.
    Corrupt,
    /// Value does not fit in a record.
    TooLarge,
    /// Neither a tombstone nor an erase could be written; the record region
    /// can no longer be brought to a known state.
    Unrecoverable,
}

/// Transport-level failures reported by the BLE and broker links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// The outbound queue to the radio / co-processor is full.
    QueueFull,
    /// The link went away underneath the request.
    Closed,
}

// Convenience conversions

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::Storage(e)
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Error::Link(e)
    }
}

impl From<postcard::Error> for Error {
    fn from(_: postcard::Error) -> Self {
        Error::Encoding
    }
}
