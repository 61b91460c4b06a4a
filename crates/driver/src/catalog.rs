//! Sensor stick discovery
//!
//! Lists the USB bus and keeps only devices whose descriptor matches a known
//! TEMPer identity. Catalog indices are positions within one enumeration
//! snapshot and are not stable across re-enumeration.

use crate::error::{Error, Result};
use crate::transport::UsbBus;
use std::fmt;
use tracing::{debug, warn};

/// Supported sensor stick models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceIdentity {
    /// Microdia-based TEMPer (0c45:7401)
    Microdia7401,
    /// PCsensor TEMPer (3553:a001)
    PcSensorA001,
}

impl DeviceIdentity {
    pub const ALL: [DeviceIdentity; 2] = [Self::Microdia7401, Self::PcSensorA001];

    pub fn vendor_id(self) -> u16 {
        match self {
            Self::Microdia7401 => 0x0c45,
            Self::PcSensorA001 => 0x3553,
        }
    }

    pub fn product_id(self) -> u16 {
        match self {
            Self::Microdia7401 => 0x7401,
            Self::PcSensorA001 => 0xa001,
        }
    }

    /// Look up a (vendor, product) pair
    pub fn from_ids(vendor_id: u16, product_id: u16) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.vendor_id() == vendor_id && id.product_id() == product_id)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id(), self.product_id())
    }
}

/// A matching device from one enumeration snapshot
#[derive(Debug, Clone)]
pub struct DeviceRef<D> {
    index: usize,
    identity: DeviceIdentity,
    bus_number: u8,
    address: u8,
    device: D,
}

impl<D> DeviceRef<D> {
    /// Position among matching devices in this snapshot
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub(crate) fn device(&self) -> &D {
        &self.device
    }
}

/// View of the bus filtered to sensor sticks
pub struct DeviceCatalog<'ctx, B: UsbBus> {
    bus: &'ctx B,
}

impl<'ctx, B: UsbBus> DeviceCatalog<'ctx, B> {
    pub(crate) fn new(bus: &'ctx B) -> Self {
        Self { bus }
    }

    /// List matching devices in bus scan order
    ///
    /// Devices whose descriptor cannot be read are skipped.
    pub fn enumerate(&self) -> Result<Vec<DeviceRef<B::Device>>> {
        let devices = self.bus.devices().map_err(|e| {
            warn!("Failed to list USB devices: {}", e);
            Error::Enumeration(e)
        })?;
        let scanned = devices.len();

        let mut matches = Vec::new();
        for device in devices {
            let (bus_number, address) = self.bus.location(&device);

            let (vendor_id, product_id) = match self.bus.device_ids(&device) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(
                        bus = bus_number,
                        address, "Failed to read device descriptor, skipping: {}", e
                    );
                    continue;
                }
            };

            let Some(identity) = DeviceIdentity::from_ids(vendor_id, product_id) else {
                continue;
            };

            debug!(
                index = matches.len(),
                bus = bus_number,
                address,
                "Found sensor stick {}",
                identity
            );

            matches.push(DeviceRef {
                index: matches.len(),
                identity,
                bus_number,
                address,
                device,
            });
        }

        debug!("Enumerated {} sensor stick(s) among {} devices", matches.len(), scanned);
        Ok(matches)
    }

    /// Number of matching devices currently attached
    pub fn count(&self) -> Result<usize> {
        Ok(self.enumerate()?.len())
    }

    /// The device at catalog position `index` in a fresh snapshot
    pub fn get(&self, index: usize) -> Result<DeviceRef<B::Device>> {
        let mut matches = self.enumerate()?;
        let available = matches.len();
        if index >= available {
            return Err(Error::StickNotFound { index, available });
        }
        Ok(matches.swap_remove(index))
    }
}
