//! Simulated USB bus for tests
//!
//! Models just enough libusb behaviour to exercise enumeration, the
//! handshake and its rollback without hardware: kernel driver binding,
//! interface claims, open handles, recorded control writes and scripted
//! interrupt reports. Failures can be injected at any step.
//!
//! # Example
//!
//! ```
//! use driver::DeviceContext;
//! use driver::test_utils::{SimulatedBus, SimulatedDevice};
//!
//! let stick = SimulatedDevice::microdia().with_temperature_counts(3200);
//! let context = DeviceContext::with_bus(SimulatedBus::new(vec![stick.clone()]));
//!
//! let mut handle = context.open_stick(0).unwrap();
//! assert_eq!(handle.read_temperature(0).unwrap(), 12.5);
//! handle.release();
//!
//! assert_eq!(stick.state().open_handles, 0);
//! ```

use crate::catalog::DeviceIdentity;
use crate::codec::REPORT_LEN;
use crate::transport::{StickIo, UsbBus};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Where to inject a failure
///
/// Control writes and interrupt reads are counted from 0 across the
/// device's whole life: the enable command is write 0, the calibration
/// commands are writes 1-3, and the first temperature read command is
/// write 4. Handshake reads are 0-3 (read 3 drains the trailing report).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Open,
    SetConfiguration,
    ClaimInterface(u8),
    ControlWrite(usize),
    ShortControlWrite(usize),
    InterruptRead(usize),
    ShortInterruptRead(usize),
}

impl FailPoint {
    /// Every injection point that makes the handshake fail
    pub fn handshake_failures() -> Vec<FailPoint> {
        let mut points = vec![
            FailPoint::Open,
            FailPoint::SetConfiguration,
            FailPoint::ClaimInterface(0),
            FailPoint::ClaimInterface(1),
        ];
        points.extend((0..4).map(FailPoint::ControlWrite));
        points.extend((0..4).map(FailPoint::ShortControlWrite));
        points.extend((0..4).map(FailPoint::InterruptRead));
        // A short drain read (read 3) is accepted
        points.extend((0..3).map(FailPoint::ShortInterruptRead));
        points
    }
}

/// A control transfer the simulated device received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlWrite {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
}

/// Observable state of a simulated device
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    /// Kernel driver bound per interface
    pub kernel_driver: [bool; 2],
    pub claimed: [bool; 2],
    pub configuration: Option<u8>,
    pub open_handles: usize,
    pub control_writes: Vec<ControlWrite>,
    pub interrupt_reads: usize,
    pub reattached: usize,
    pub released: usize,
    /// Reports returned before falling back to `default_report`
    pub reports: VecDeque<[u8; REPORT_LEN]>,
    pub default_report: [u8; REPORT_LEN],
    pub fail_at: Option<FailPoint>,
    pub detach_error: Option<rusb::Error>,
    /// Every transfer fails with `NoDevice`, as after unplugging
    pub disconnected: bool,
}

/// A device on the simulated bus
///
/// Clones share state, so a test can keep one to inspect after the bus
/// has been handed to a [`DeviceContext`](crate::DeviceContext).
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    vendor_id: u16,
    product_id: u16,
    bus_number: u8,
    address: u8,
    descriptor_error: Option<rusb::Error>,
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    /// A device with the given ids and kernel drivers bound to both interfaces
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        let state = DeviceState {
            kernel_driver: [true, true],
            ..DeviceState::default()
        };
        Self {
            vendor_id,
            product_id,
            bus_number: 1,
            address: 1,
            descriptor_error: None,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn from_identity(identity: DeviceIdentity) -> Self {
        Self::new(identity.vendor_id(), identity.product_id())
    }

    /// 0c45:7401
    pub fn microdia() -> Self {
        Self::from_identity(DeviceIdentity::Microdia7401)
    }

    /// 3553:a001
    pub fn pcsensor() -> Self {
        Self::from_identity(DeviceIdentity::PcSensorA001)
    }

    pub fn at(mut self, bus_number: u8, address: u8) -> Self {
        self.bus_number = bus_number;
        self.address = address;
        self
    }

    pub fn with_unreadable_descriptor(mut self) -> Self {
        self.descriptor_error = Some(rusb::Error::Io);
        self
    }

    pub fn without_kernel_driver(self) -> Self {
        self.lock().kernel_driver = [false, false];
        self
    }

    pub fn with_detach_error(self, error: rusb::Error) -> Self {
        self.lock().detach_error = Some(error);
        self
    }

    pub fn failing_at(self, point: FailPoint) -> Self {
        self.fail_at(Some(point));
        self
    }

    /// Report every read returns once the scripted queue is empty
    pub fn with_temperature_counts(self, counts: i16) -> Self {
        self.set_temperature_counts(counts);
        self
    }

    pub fn set_temperature_counts(&self, counts: i16) {
        let [hi, lo] = counts.to_be_bytes();
        self.lock().default_report = [0x80, 0x02, hi, lo, 0x00, 0x00, 0x00, 0x00];
    }

    pub fn queue_report(&self, report: [u8; REPORT_LEN]) {
        self.lock().reports.push_back(report);
    }

    pub fn fail_at(&self, point: Option<FailPoint>) {
        self.lock().fail_at = point;
    }

    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    /// Snapshot of the device state
    pub fn state(&self) -> DeviceState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Open handle on a [`SimulatedDevice`]
#[derive(Debug)]
pub struct SimulatedHandle {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedHandle {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SimulatedHandle {
    fn drop(&mut self) {
        let mut state = self.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
    }
}

impl StickIo for SimulatedHandle {
    fn detach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()> {
        let mut state = self.lock();
        if let Some(e) = state.detach_error {
            return Err(e);
        }
        let bound = &mut state.kernel_driver[usize::from(iface)];
        if !*bound {
            return Err(rusb::Error::NotFound);
        }
        *bound = false;
        Ok(())
    }

    fn attach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()> {
        let mut state = self.lock();
        let slot = usize::from(iface);
        if state.claimed[slot] || state.kernel_driver[slot] {
            return Err(rusb::Error::Busy);
        }
        state.kernel_driver[slot] = true;
        state.reattached += 1;
        Ok(())
    }

    fn set_active_configuration(&mut self, config: u8) -> rusb::Result<()> {
        let mut state = self.lock();
        if state.fail_at == Some(FailPoint::SetConfiguration) {
            return Err(rusb::Error::Busy);
        }
        state.configuration = Some(config);
        Ok(())
    }

    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()> {
        let mut state = self.lock();
        let slot = usize::from(iface);
        if state.fail_at == Some(FailPoint::ClaimInterface(iface)) || state.kernel_driver[slot] {
            return Err(rusb::Error::Busy);
        }
        state.claimed[slot] = true;
        Ok(())
    }

    fn release_interface(&mut self, iface: u8) -> rusb::Result<()> {
        let mut state = self.lock();
        let slot = usize::from(iface);
        if !state.claimed[slot] {
            return Err(rusb::Error::NotFound);
        }
        state.claimed[slot] = false;
        state.released += 1;
        Ok(())
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(rusb::Error::NoDevice);
        }
        let n = state.control_writes.len();
        state.control_writes.push(ControlWrite {
            request_type,
            request,
            value,
            index,
            data: buf.to_vec(),
        });

        match state.fail_at {
            Some(FailPoint::ControlWrite(at)) if at == n => Err(rusb::Error::Pipe),
            Some(FailPoint::ShortControlWrite(at)) if at == n => Ok(buf.len() - 1),
            _ => Ok(buf.len()),
        }
    }

    fn read_interrupt(
        &self,
        _endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(rusb::Error::NoDevice);
        }
        let n = state.interrupt_reads;
        state.interrupt_reads += 1;

        match state.fail_at {
            Some(FailPoint::InterruptRead(at)) if at == n => return Err(rusb::Error::Timeout),
            Some(FailPoint::ShortInterruptRead(at)) if at == n => {
                buf.fill(0);
                return Ok(buf.len() / 2);
            }
            _ => {}
        }

        let report = state.reports.pop_front().unwrap_or(state.default_report);
        let len = buf.len().min(REPORT_LEN);
        buf[..len].copy_from_slice(&report[..len]);
        Ok(len)
    }
}

/// A USB bus holding simulated devices in scan order
#[derive(Debug, Default)]
pub struct SimulatedBus {
    devices: Vec<SimulatedDevice>,
    list_error: Option<rusb::Error>,
}

impl SimulatedBus {
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            devices,
            list_error: None,
        }
    }

    /// A bus whose device listing always fails
    pub fn unlistable(error: rusb::Error) -> Self {
        Self {
            devices: Vec::new(),
            list_error: Some(error),
        }
    }
}

impl UsbBus for SimulatedBus {
    type Device = SimulatedDevice;
    type Handle = SimulatedHandle;

    fn devices(&self) -> rusb::Result<Vec<Self::Device>> {
        match self.list_error {
            Some(e) => Err(e),
            None => Ok(self.devices.clone()),
        }
    }

    fn device_ids(&self, device: &Self::Device) -> rusb::Result<(u16, u16)> {
        match device.descriptor_error {
            Some(e) => Err(e),
            None => Ok((device.vendor_id, device.product_id)),
        }
    }

    fn location(&self, device: &Self::Device) -> (u8, u8) {
        (device.bus_number, device.address)
    }

    fn open(&self, device: &Self::Device) -> rusb::Result<Self::Handle> {
        let mut state = device.lock();
        if state.fail_at == Some(FailPoint::Open) {
            return Err(rusb::Error::Access);
        }
        state.open_handles += 1;
        Ok(SimulatedHandle {
            state: Arc::clone(&device.state),
        })
    }
}
