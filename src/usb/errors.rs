use std::io;
use nusb::transfer::TransferError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceOpenError {
    #[error("Failed to enumerate USB devices: {0}")]
    Enumeration(#[source] io::Error),

    #[error("No basestation found for {0}")]
    NotFound(String),

    #[error("Failed to open basestation: {0}")]
    Open(#[source] io::Error),

    #[error("Failed to claim interface {interface}: {source}")]
    Claim {
        interface: u8,
        #[source]
        source: io::Error,
    },
}

/// Reason a single bulk transfer did not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferFailure {
    #[error("Transfer timed out")]
    Timeout,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Transfer failed: {0}")]
    Failed(String),
}

impl From<TransferError> for TransferFailure {
    fn from(error: TransferError) -> Self {
        match error {
            TransferError::Disconnected => TransferFailure::Disconnected,
            other => TransferFailure::Failed(other.to_string()),
        }
    }
}
