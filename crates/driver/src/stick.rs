//! Opened sensor stick
//!
//! A `Stick` owns its device handle, its interface claims and the record of
//! which kernel drivers it detached. Releasing it, explicitly or on drop,
//! undoes exactly what was acquired.

use crate::catalog::DeviceIdentity;
use crate::codec::{
    self, INTERFACES, REPORT_INDEX, REPORT_LEN, REPORT_VALUE, REQUEST_SET_REPORT, REQUEST_TYPE,
    RESPONSE_ENDPOINT, TRANSFER_TIMEOUT, TemperatureSample,
};
use crate::error::{Error, Result, TransferFault};
use crate::transport::StickIo;
use std::marker::PhantomData;
use tracing::{debug, trace, warn};

/// Lifecycle of a stick through the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StickState {
    Enumerated,
    Opened,
    ConfiguredAndClaimed,
    VendorInitialized,
    Ready,
    Failed,
    Released,
}

/// An exclusively claimed sensor stick
///
/// The `'ctx` lifetime ties the stick to the [`DeviceContext`](crate::DeviceContext)
/// it was opened from, so the context cannot be closed while it exists.
pub struct Stick<'ctx, H: StickIo> {
    handle: Option<H>,
    index: usize,
    identity: DeviceIdentity,
    state: StickState,
    /// Interfaces currently claimed by us
    claimed: [bool; INTERFACES.len()],
    /// Interfaces whose kernel driver we detached and must reattach
    detached: [bool; INTERFACES.len()],
    _context: PhantomData<&'ctx ()>,
}

impl<'ctx, H: StickIo> Stick<'ctx, H> {
    /// Wrap a freshly opened handle; nothing is claimed yet
    pub(crate) fn adopt(handle: H, index: usize, identity: DeviceIdentity) -> Self {
        Self {
            handle: Some(handle),
            index,
            identity,
            state: StickState::Opened,
            claimed: [false; INTERFACES.len()],
            detached: [false; INTERFACES.len()],
            _context: PhantomData,
        }
    }

    /// Catalog position this stick was opened from
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub fn state(&self) -> StickState {
        self.state
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    /// Read the current temperature in degrees Celsius
    ///
    /// `calibration_offset` is added to the raw count before scaling. Any
    /// transfer error or short transfer fails the whole read.
    pub fn read_temperature(&mut self, calibration_offset: i32) -> Result<f32> {
        Ok(self.sample(calibration_offset)?.celsius)
    }

    /// Like [`read_temperature`](Self::read_temperature), keeping the offset
    pub fn sample(&mut self, calibration_offset: i32) -> Result<TemperatureSample> {
        let report = self
            .send_report(&codec::encode_read_command())
            .and_then(|()| self.read_report(true))
            .map_err(|fault| {
                warn!(stick = self.index, "Temperature read failed: {}", fault);
                Error::Transfer(fault)
            })?;

        let celsius = codec::decode(&report, calibration_offset);
        trace!(stick = self.index, ?report, celsius, "Read temperature");

        Ok(TemperatureSample {
            celsius,
            calibration_offset,
        })
    }

    /// Release interfaces, reattach kernel drivers and close the handle
    ///
    /// Runs the rollback at most once. Safe on a stick that never finished
    /// its handshake.
    pub fn release(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };

        for (slot, &iface) in INTERFACES.iter().enumerate().rev() {
            if !std::mem::take(&mut self.claimed[slot]) {
                continue;
            }
            if let Err(e) = handle.release_interface(iface) {
                warn!(stick = self.index, "Failed to release interface {}: {}", iface, e);
            }
        }

        for (slot, &iface) in INTERFACES.iter().enumerate() {
            if !std::mem::take(&mut self.detached[slot]) {
                continue;
            }
            match handle.attach_kernel_driver(iface) {
                Ok(()) => debug!(
                    stick = self.index,
                    "Reattached kernel driver to interface {}", iface
                ),
                Err(e) => warn!(
                    stick = self.index,
                    "Failed to reattach kernel driver to interface {}: {}", iface, e
                ),
            }
        }

        drop(handle);

        if self.state != StickState::Failed {
            self.state = StickState::Released;
        }
        debug!(stick = self.index, "Closed stick {}", self.identity);
    }

    pub(crate) fn set_state(&mut self, state: StickState) {
        self.state = state;
    }

    /// Roll back after a handshake failure
    pub(crate) fn fail(&mut self) {
        self.state = StickState::Failed;
        self.release();
    }

    pub(crate) fn handle_mut(&mut self) -> std::result::Result<&mut H, TransferFault> {
        self.handle.as_mut().ok_or(TransferFault::Released)
    }

    pub(crate) fn mark_detached(&mut self, slot: usize) {
        self.detached[slot] = true;
    }

    pub(crate) fn mark_claimed(&mut self, slot: usize) {
        self.claimed[slot] = true;
    }

    /// Send an 8-byte command report over the control pipe
    pub(crate) fn send_report(
        &self,
        payload: &[u8; REPORT_LEN],
    ) -> std::result::Result<(), TransferFault> {
        let handle = self.handle.as_ref().ok_or(TransferFault::Released)?;
        let written = handle.write_control(
            REQUEST_TYPE,
            REQUEST_SET_REPORT,
            REPORT_VALUE,
            REPORT_INDEX,
            payload,
            TRANSFER_TIMEOUT,
        )?;
        expect_len(REPORT_LEN, written)
    }

    /// Read one 8-byte report from the interrupt endpoint
    ///
    /// With `exact` unset the length is not checked.
    pub(crate) fn read_report(
        &self,
        exact: bool,
    ) -> std::result::Result<[u8; REPORT_LEN], TransferFault> {
        let handle = self.handle.as_ref().ok_or(TransferFault::Released)?;
        let mut buf = [0u8; REPORT_LEN];
        let read = handle.read_interrupt(RESPONSE_ENDPOINT, &mut buf, TRANSFER_TIMEOUT)?;
        if exact {
            expect_len(REPORT_LEN, read)?;
        }
        Ok(buf)
    }
}

impl<H: StickIo> Drop for Stick<'_, H> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<H: StickIo> std::fmt::Debug for Stick<'_, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stick")
            .field("index", &self.index)
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("claimed", &self.claimed)
            .field("detached", &self.detached)
            .finish()
    }
}

pub(crate) fn expect_len(expected: usize, actual: usize) -> std::result::Result<(), TransferFault> {
    if actual == expected {
        Ok(())
    } else {
        Err(TransferFault::Short { expected, actual })
    }
}
