//! USB transport seam
//!
//! The driver core only needs a handful of libusb operations. They are
//! expressed as two traits so the handshake and rollback logic can run
//! against `rusb` in production and against a simulated bus in tests.

use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::Duration;

/// Operations performed on an opened device
///
/// Dropping the implementor closes the OS handle.
pub trait StickIo {
    fn detach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()>;

    fn attach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()>;

    fn set_active_configuration(&mut self, config: u8) -> rusb::Result<()>;

    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()>;

    fn release_interface(&mut self, iface: u8) -> rusb::Result<()>;

    /// Host-to-device control transfer, returns bytes written
    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    /// Blocking interrupt IN transfer, returns bytes read
    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;
}

/// A USB bus that can be listed and whose devices can be opened
pub trait UsbBus {
    type Device;
    type Handle: StickIo;

    /// Snapshot of attached devices in bus scan order
    fn devices(&self) -> rusb::Result<Vec<Self::Device>>;

    /// (vendor id, product id) from the device descriptor
    fn device_ids(&self, device: &Self::Device) -> rusb::Result<(u16, u16)>;

    /// (bus number, device address)
    fn location(&self, device: &Self::Device) -> (u8, u8);

    fn open(&self, device: &Self::Device) -> rusb::Result<Self::Handle>;
}

impl<T: UsbContext> StickIo for DeviceHandle<T> {
    fn detach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::detach_kernel_driver(self, iface)
    }

    fn attach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::attach_kernel_driver(self, iface)
    }

    fn set_active_configuration(&mut self, config: u8) -> rusb::Result<()> {
        DeviceHandle::set_active_configuration(self, config)
    }

    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, iface)
    }

    fn release_interface(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, iface)
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        DeviceHandle::write_control(self, request_type, request, value, index, buf, timeout)
    }

    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        DeviceHandle::read_interrupt(self, endpoint, buf, timeout)
    }
}

impl UsbBus for Context {
    type Device = Device<Context>;
    type Handle = DeviceHandle<Context>;

    fn devices(&self) -> rusb::Result<Vec<Self::Device>> {
        Ok(UsbContext::devices(self)?.iter().collect())
    }

    fn device_ids(&self, device: &Self::Device) -> rusb::Result<(u16, u16)> {
        let descriptor = device.device_descriptor()?;
        Ok((descriptor.vendor_id(), descriptor.product_id()))
    }

    fn location(&self, device: &Self::Device) -> (u8, u8) {
        (device.bus_number(), device.address())
    }

    fn open(&self, device: &Self::Device) -> rusb::Result<Self::Handle> {
        device.open()
    }
}
