//! libusb backend via `rusb`.

use std::time::Duration;

use rusb::{Context, DeviceHandle, Direction, TransferType, UsbContext};

use super::{UsbBackend, UsbDeviceInfo, UsbWriter};
use crate::error::LcdError;
use crate::profile::{DeviceId, DeviceProfile, TransferKind};

/// Map a libusb error onto the pipeline's error kinds.
pub fn map_usb_error(context: &str, e: rusb::Error, timeout: Duration) -> LcdError {
    match e {
        rusb::Error::Busy | rusb::Error::Access => LcdError::DeviceBusy(format!("{context}: {e}")),
        rusb::Error::NoDevice | rusb::Error::NotFound => {
            LcdError::DeviceNotFound(format!("{context}: {e}"))
        }
        rusb::Error::Timeout => LcdError::Timeout(timeout),
        other => LcdError::LinkLost(format!("{context}: {other}")),
    }
}

const fn transfer_type(kind: TransferKind) -> TransferType {
    match kind {
        TransferKind::Interrupt => TransferType::Interrupt,
        TransferKind::Bulk => TransferType::Bulk,
    }
}

// ── RusbBackend ──────────────────────────────────────────────────

pub struct RusbBackend {
    context: Context,
}

impl RusbBackend {
    pub fn new() -> Result<Self, LcdError> {
        let context = Context::new()
            .map_err(|e| LcdError::Other(format!("libusb init failed: {e}")))?;
        Ok(Self { context })
    }

    fn find_device(&self, info: &UsbDeviceInfo) -> Result<rusb::Device<Context>, LcdError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| map_usb_error("enumerate", e, Duration::ZERO))?;
        devices
            .iter()
            .find(|d| d.bus_number() == info.bus && d.address() == info.address)
            .ok_or_else(|| {
                LcdError::DeviceNotFound(format!(
                    "{} at bus {} address {}",
                    info.id, info.bus, info.address
                ))
            })
    }

    /// OUT endpoint of `kind` on interface `interface`.
    fn out_endpoint(
        device: &rusb::Device<Context>,
        interface: u8,
        kind: TransferKind,
    ) -> Result<u8, LcdError> {
        let config = device
            .active_config_descriptor()
            .map_err(|e| map_usb_error("config descriptor", e, Duration::ZERO))?;
        config
            .interfaces()
            .flat_map(|i| i.descriptors())
            .filter(|d| d.interface_number() == interface)
            .flat_map(|d| d.endpoint_descriptors().collect::<Vec<_>>())
            .find(|ep| ep.direction() == Direction::Out && ep.transfer_type() == transfer_type(kind))
            .map(|ep| ep.address())
            .ok_or_else(|| {
                LcdError::DeviceNotFound(format!(
                    "no {kind:?} OUT endpoint on interface {interface}"
                ))
            })
    }
}

impl UsbBackend for RusbBackend {
    fn enumerate(&self) -> Result<Vec<UsbDeviceInfo>, LcdError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| map_usb_error("enumerate", e, Duration::ZERO))?;
        let mut out = Vec::new();
        for device in devices.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            out.push(UsbDeviceInfo {
                id: DeviceId::new(desc.vendor_id(), desc.product_id()),
                bus: device.bus_number(),
                address: device.address(),
            });
        }
        Ok(out)
    }

    fn open(
        &self,
        info: &UsbDeviceInfo,
        profile: &DeviceProfile,
        write_timeout: Duration,
    ) -> Result<Box<dyn UsbWriter>, LcdError> {
        let device = self.find_device(info)?;
        let endpoint = Self::out_endpoint(&device, profile.interface, profile.transfer)?;
        let handle = device
            .open()
            .map_err(|e| map_usb_error("open", e, write_timeout))?;

        // Not every platform can detach kernel drivers.
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            tracing::debug!("kernel driver auto-detach unavailable: {e}");
        }
        handle
            .claim_interface(profile.interface)
            .map_err(|e| map_usb_error("claim interface", e, write_timeout))?;

        tracing::debug!(
            "claimed interface {} of {}, OUT endpoint {:#04x}",
            profile.interface,
            info.id,
            endpoint
        );
        Ok(Box::new(RusbWriter {
            handle,
            interface: profile.interface,
            endpoint,
            transfer: profile.transfer,
            timeout: write_timeout,
        }))
    }
}

// ── RusbWriter ───────────────────────────────────────────────────

struct RusbWriter {
    handle: DeviceHandle<Context>,
    interface: u8,
    endpoint: u8,
    transfer: TransferKind,
    timeout: Duration,
}

impl UsbWriter for RusbWriter {
    fn write(&mut self, data: &[u8]) -> Result<usize, LcdError> {
        let result = match self.transfer {
            TransferKind::Interrupt => self.handle.write_interrupt(self.endpoint, data, self.timeout),
            TransferKind::Bulk => self.handle.write_bulk(self.endpoint, data, self.timeout),
        };
        result.map_err(|e| map_usb_error("write", e, self.timeout))
    }
}

impl Drop for RusbWriter {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
    }
}
