//! Process-scoped USB context

use crate::catalog::{DeviceCatalog, DeviceRef};
use crate::error::{Error, Result};
use crate::handshake;
use crate::stick::Stick;
use crate::transport::UsbBus;
use tracing::{debug, warn};

/// Owner of the USB subsystem
///
/// Every [`Stick`] borrows the context it was opened from, so the context
/// can only be closed once all sticks are gone.
pub struct DeviceContext<B: UsbBus = rusb::Context> {
    bus: B,
}

impl DeviceContext<rusb::Context> {
    /// Initialize libusb
    pub fn open() -> Result<Self> {
        let bus = rusb::Context::new().map_err(|e| {
            warn!("Failed to initialize libusb: {}", e);
            Error::Subsystem(e)
        })?;
        debug!("USB context opened");
        Ok(Self { bus })
    }
}

impl<B: UsbBus> DeviceContext<B> {
    /// Build a context over an arbitrary bus implementation
    pub fn with_bus(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn catalog(&self) -> DeviceCatalog<'_, B> {
        DeviceCatalog::new(&self.bus)
    }

    /// Open and initialize a device from a catalog snapshot
    pub fn handshake(&self, device: &DeviceRef<B::Device>) -> Result<Stick<'_, B::Handle>> {
        handshake::handshake(&self.bus, device)
    }

    /// Open and initialize the stick at catalog position `index`
    pub fn open_stick(&self, index: usize) -> Result<Stick<'_, B::Handle>> {
        let device = self.catalog().get(index)?;
        self.handshake(&device)
    }

    /// Tear down the USB subsystem
    pub fn close(self) {
        drop(self.bus);
        debug!("USB context closed");
    }
}
