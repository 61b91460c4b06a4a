//! Driver error types

use std::fmt;
use thiserror::Error;

/// Handshake step at which a stick failed to initialize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Opening the OS device handle
    Open,
    /// Selecting configuration 1
    SetConfiguration,
    /// Claiming one of the two HID interfaces
    ClaimInterface(u8),
    /// The two-byte vendor enable command
    VendorEnable,
    /// Writing calibration/query payload N (0-based)
    CalibrationWrite(usize),
    /// Reading the response to calibration/query payload N (0-based)
    CalibrationRead(usize),
    /// Draining the trailing unsolicited report
    Drain,
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "opening device"),
            Self::SetConfiguration => write!(f, "setting configuration"),
            Self::ClaimInterface(iface) => write!(f, "claiming interface {}", iface),
            Self::VendorEnable => write!(f, "sending vendor enable command"),
            Self::CalibrationWrite(n) => write!(f, "writing calibration command {}", n),
            Self::CalibrationRead(n) => write!(f, "reading calibration response {}", n),
            Self::Drain => write!(f, "draining trailing report"),
        }
    }
}

/// Low-level cause of a failed USB transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferFault {
    /// libusb reported an error (including timeouts)
    #[error(transparent)]
    Usb(#[from] rusb::Error),

    /// Fewer bytes moved than the protocol requires
    #[error("short transfer: expected {expected} bytes, got {actual}")]
    Short { expected: usize, actual: usize },

    /// The stick has already been released
    #[error("stick handle already released")]
    Released,
}

/// Errors raised by the driver core
///
/// Every variant is returned only after any resources acquired by the failing
/// operation have been rolled back.
#[derive(Debug, Error)]
pub enum Error {
    /// The platform USB layer could not be initialized
    #[error("USB subsystem unavailable: {0}")]
    Subsystem(#[source] rusb::Error),

    /// Listing the USB bus failed
    #[error("USB bus enumeration failed: {0}")]
    Enumeration(#[source] rusb::Error),

    /// No sensor stick at the requested catalog index
    #[error("no sensor stick at index {index} ({available} found)")]
    StickNotFound { index: usize, available: usize },

    /// A handshake step failed
    #[error("handshake failed while {step}: {source}")]
    Handshake {
        step: HandshakeStep,
        source: TransferFault,
    },

    /// A temperature read failed
    #[error("temperature read failed: {0}")]
    Transfer(#[source] TransferFault),
}

impl Error {
    pub(crate) fn handshake(step: HandshakeStep, fault: impl Into<TransferFault>) -> Self {
        Self::Handshake {
            step,
            source: fault.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
