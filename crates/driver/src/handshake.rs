//! Stick initialization handshake
//!
//! Drives an enumerated device through
//! `Opened -> ConfiguredAndClaimed -> VendorInitialized -> Ready`. The steps
//! must run in this exact order. Any failure after the handle is opened rolls
//! back everything acquired so far before the error is returned.

use crate::catalog::DeviceRef;
use crate::codec::{
    CALIBRATION_COMMANDS, CONFIGURATION, ENABLE_INDEX, ENABLE_PAYLOAD, ENABLE_VALUE, INTERFACES,
    REQUEST_SET_REPORT, REQUEST_TYPE, TRANSFER_TIMEOUT,
};
use crate::error::{Error, HandshakeStep, Result};
use crate::stick::{Stick, StickState, expect_len};
use crate::transport::{StickIo, UsbBus};
use tracing::{debug, info, warn};

/// Open `device` and bring it to `Ready`
pub(crate) fn handshake<'ctx, B: UsbBus>(
    bus: &'ctx B,
    device: &DeviceRef<B::Device>,
) -> Result<Stick<'ctx, B::Handle>> {
    let index = device.index();

    let handle = bus.open(device.device()).map_err(|e| {
        warn!(
            stick = index,
            bus = device.bus_number(),
            address = device.address(),
            "Failed to open stick: {}",
            e
        );
        Error::handshake(HandshakeStep::Open, e)
    })?;
    debug!(stick = index, "Opened {}", device.identity());

    let mut stick = Stick::adopt(handle, index, device.identity());

    match initialize(&mut stick) {
        Ok(()) => {
            stick.set_state(StickState::Ready);
            info!(
                stick = index,
                bus = device.bus_number(),
                address = device.address(),
                "Stick {} ready",
                device.identity()
            );
            Ok(stick)
        }
        Err(e) => {
            warn!(stick = index, "Handshake failed, rolling back: {}", e);
            stick.fail();
            Err(e)
        }
    }
}

fn initialize<H: StickIo>(stick: &mut Stick<'_, H>) -> Result<()> {
    detach_kernel_drivers(stick);
    configure_and_claim(stick)?;
    stick.set_state(StickState::ConfiguredAndClaimed);
    enable(stick)?;
    stick.set_state(StickState::VendorInitialized);
    calibrate(stick)
}

/// Detach kernel drivers from both interfaces, recording which were bound
///
/// Detach errors other than "no driver" are tolerated: the claim that
/// follows reports whether the interface is actually usable.
fn detach_kernel_drivers<H: StickIo>(stick: &mut Stick<'_, H>) {
    let index = stick.index();

    for (slot, &iface) in INTERFACES.iter().enumerate() {
        let result = match stick.handle_mut() {
            Ok(handle) => handle.detach_kernel_driver(iface),
            Err(_) => return,
        };

        match result {
            Ok(()) => {
                debug!(stick = index, "Detached kernel driver from interface {}", iface);
                stick.mark_detached(slot);
            }
            Err(rusb::Error::NotFound) => {
                debug!(stick = index, "No kernel driver active on interface {}", iface);
            }
            Err(e) => {
                warn!(
                    stick = index,
                    "Failed to detach kernel driver from interface {}: {}", iface, e
                );
            }
        }
    }
}

fn configure_and_claim<H: StickIo>(stick: &mut Stick<'_, H>) -> Result<()> {
    stick
        .handle_mut()
        .map_err(|f| Error::handshake(HandshakeStep::SetConfiguration, f))?
        .set_active_configuration(CONFIGURATION)
        .map_err(|e| Error::handshake(HandshakeStep::SetConfiguration, e))?;

    for (slot, &iface) in INTERFACES.iter().enumerate() {
        let step = HandshakeStep::ClaimInterface(iface);
        stick
            .handle_mut()
            .map_err(|f| Error::handshake(step, f))?
            .claim_interface(iface)
            .map_err(|e| Error::handshake(step, e))?;
        stick.mark_claimed(slot);
        debug!(stick = stick.index(), "Claimed interface {}", iface);
    }

    Ok(())
}

fn enable<H: StickIo>(stick: &mut Stick<'_, H>) -> Result<()> {
    let step = HandshakeStep::VendorEnable;
    let handle = stick.handle_mut().map_err(|f| Error::handshake(step, f))?;
    let written = handle
        .write_control(
            REQUEST_TYPE,
            REQUEST_SET_REPORT,
            ENABLE_VALUE,
            ENABLE_INDEX,
            &ENABLE_PAYLOAD,
            TRANSFER_TIMEOUT,
        )
        .map_err(|e| Error::handshake(step, e))?;
    expect_len(ENABLE_PAYLOAD.len(), written).map_err(|f| Error::handshake(step, f))
}

fn calibrate<H: StickIo>(stick: &mut Stick<'_, H>) -> Result<()> {
    for (n, command) in CALIBRATION_COMMANDS.iter().enumerate() {
        stick
            .send_report(command)
            .map_err(|f| Error::handshake(HandshakeStep::CalibrationWrite(n), f))?;
        let response = stick
            .read_report(true)
            .map_err(|f| Error::handshake(HandshakeStep::CalibrationRead(n), f))?;
        debug!(stick = stick.index(), ?response, "Calibration response {}", n);
    }

    // The stick emits one more report on its own; only the transfer matters
    stick
        .read_report(false)
        .map_err(|f| Error::handshake(HandshakeStep::Drain, f))?;

    Ok(())
}
