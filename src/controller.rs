//! RGB controller abstraction.

use std::fmt::{self, Display, Formatter};

use bytes::Bytes;

use crate::error::Error;
use crate::lighting::Lighting;

/// USB vendor and product ID pair.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self { vendor_id, product_id }
    }

    /// Check if a device descriptor belongs to this identity.
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl Display for DeviceIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Setup fields of the control transfer carrying a lighting payload.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct ControlSetup {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// USB RGB controller.
pub trait LightingController {
    /// Default USB identity of the controller.
    fn identity(&self) -> DeviceIdentity;

    /// Control transfer used to submit payloads.
    fn control_setup(&self) -> ControlSetup;

    /// Convert a lighting configuration to controller-specific bytes.
    fn lighting_bytes(&self, lighting: &Lighting) -> Result<Bytes, Error>;
}
