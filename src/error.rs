//! Error types.

use std::io;

use thiserror::Error;

use crate::controller::DeviceIdentity;
use crate::lighting::LightingMode;

/// Errors raised while applying a lighting configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to list USB devices: {0}")]
    UsbEnumeration(#[source] rusb::Error),

    #[error("unable to read USB descriptor: {0}")]
    UsbDescriptor(#[source] rusb::Error),

    #[error("unable to open device: {0} (root permissions or a udev rule required)")]
    UsbOpen(#[source] rusb::Error),

    #[error("unable to claim or release interface {interface}: {source}")]
    UsbInterface {
        interface: u8,
        #[source]
        source: rusb::Error,
    },

    #[error("unable to write lighting payload: {0}")]
    UsbTransfer(#[source] rusb::Error),

    #[error("the given index {index} is invalid, it must name a listed device not bigger than {max}")]
    InvalidSelection { index: usize, max: usize },

    #[error("device selection prompt failed: {0}")]
    SelectionInput(#[from] io::Error),

    #[error("no matching device found for {identity}")]
    NoDeviceFound { identity: DeviceIdentity },

    #[error("lighting mode '{0}' is not supported yet")]
    UnsupportedMode(LightingMode),
}

impl Error {
    /// Whether the error should terminate the process with a failure status.
    ///
    /// A missing device or an effect without known encoding is not a program
    /// error, so those exit cleanly.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NoDeviceFound { .. } | Self::UnsupportedMode(_))
    }
}
