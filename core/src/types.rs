//! Common types used throughout the driver core.

use thiserror::Error;

use crate::scsi::sense_key;

/// Result alias for driver operations
pub type Result<T> = std::result::Result<T, ScannerError>;

/// Errors that can occur while driving the scanner
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("short transfer: expected {expected} bytes, got {got}")]
    ShortTransfer { expected: usize, got: usize },

    #[error("status phase echoed command {got:#04x}, expected {expected:#04x}")]
    StatusMismatch { expected: u8, got: u8 },

    #[error("check condition: key {key:#04x} asc {asc:#04x} ascq {ascq:#04x}")]
    Sense {
        key: u8,
        asc: u8,
        ascq: u8,
        raw: [u8; 14],
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no film holder loaded")]
    NoFilmHolder,

    #[error("device busy")]
    DeviceBusy,

    #[error("operation cancelled")]
    Cancelled,

    #[error("scan buffer allocation failed")]
    OutOfMemory,

    #[error("scanner not found")]
    DeviceNotFound,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl ScannerError {
    /// True when the caller may retry the operation after a short delay.
    ///
    /// Covers an explicit busy status and any check condition whose sense
    /// key reports the unit as not ready.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScannerError::DeviceBusy => true,
            ScannerError::Sense { key, .. } => *key == sense_key::NOT_READY,
            _ => false,
        }
    }
}
