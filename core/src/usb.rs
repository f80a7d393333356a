//! USB access to the scanner via libusb/rusb.
//!
//! The FS4000US tunnels its command set through vendor control transfers on
//! the default pipe plus one bulk IN endpoint for scan data. This module
//! owns device discovery and the raw pipe; the SCSI framing on top of it
//! lives in [`crate::transport`].

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, UsbContext};
use tracing::debug;

use crate::types::{Result, ScannerError};

/// Canon vendor id
pub const VENDOR_ID: u16 = 0x04A9;
/// FS4000US product id
pub const PRODUCT_ID: u16 = 0x3042;
/// Bulk IN endpoint carrying scan data
pub const BULK_IN_ENDPOINT: u8 = 0x81;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);
const BULK_TIMEOUT: Duration = Duration::from_secs(30);

// bit 7: 0 = output, 1 = input; bits 6-5: 2 = vendor; bits 4-0: 0 = device
fn request_type(input: bool) -> u8 {
    if input { 0xC0 } else { 0x40 }
}

// The Windows usbscan driver loads this field itself; observed values are
// 0x0C for transfers shorter than two bytes and 0x04 otherwise.
fn request_code(len: usize) -> u8 {
    if len < 2 { 0x0C } else { 0x04 }
}

/// Raw transfer capability the transport layer is written against.
///
/// Implementations fill in `bmRequestType`, `bRequest` and `wIndex`; only
/// `wValue` and the payload vary per command.
pub trait UsbPipe {
    /// Vendor control transfer, device to host. Returns bytes received.
    fn control_in(&self, value: u16, buf: &mut [u8]) -> Result<usize>;

    /// Vendor control transfer, host to device. Returns bytes sent.
    fn control_out(&self, value: u16, buf: &[u8]) -> Result<usize>;

    /// Bulk read of scan data. Returns bytes received.
    fn bulk_in(&self, buf: &mut [u8]) -> Result<usize>;
}

/// Information about an attached scanner
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Stable name usable with [`UsbDevice::open_named`], `usb:BUS:ADDR`
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Product string from the device descriptor, when readable
    pub product: String,
}

/// List attached FS4000US scanners
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let context = Context::new()?;
    let mut found = Vec::new();

    for device in context.devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if desc.vendor_id() != VENDOR_ID || desc.product_id() != PRODUCT_ID {
            continue;
        }

        let product = device
            .open()
            .ok()
            .and_then(|h| h.read_product_string_ascii(&desc).ok())
            .unwrap_or_default();

        found.push(DeviceInfo {
            name: device_name(&device),
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            product,
        });
    }

    Ok(found)
}

fn device_name<C: UsbContext>(device: &Device<C>) -> String {
    format!("usb:{}:{}", device.bus_number(), device.address())
}

/// Open handle to one scanner, interface claimed for exclusive use
pub struct UsbDevice {
    handle: DeviceHandle<Context>,
    interface: u8,
}

impl UsbDevice {
    /// Open the first attached scanner
    pub fn open() -> Result<Self> {
        Self::open_named(None)
    }

    /// Open the scanner with the given `usb:BUS:ADDR` name, or the first
    /// one when no name is supplied
    pub fn open_named(name: Option<&str>) -> Result<Self> {
        let context = Context::new()?;

        for device in context.devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if desc.vendor_id() != VENDOR_ID || desc.product_id() != PRODUCT_ID {
                continue;
            }
            if let Some(want) = name {
                if device_name(&device) != want {
                    continue;
                }
            }
            return Self::claim(&device);
        }

        Err(ScannerError::DeviceNotFound)
    }

    fn claim(device: &Device<Context>) -> Result<Self> {
        let handle = device.open()?;
        let interface = 0;

        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            if handle.kernel_driver_active(interface).unwrap_or(false) {
                let _ = handle.detach_kernel_driver(interface);
            }
        }

        handle.claim_interface(interface)?;
        debug!(name = %device_name(device), "claimed scanner interface");

        Ok(Self { handle, interface })
    }
}

impl UsbPipe for UsbDevice {
    fn control_in(&self, value: u16, buf: &mut [u8]) -> Result<usize> {
        let got = self.handle.read_control(
            request_type(true),
            request_code(buf.len()),
            value,
            0,
            buf,
            CONTROL_TIMEOUT,
        )?;
        Ok(got)
    }

    fn control_out(&self, value: u16, buf: &[u8]) -> Result<usize> {
        let sent = self.handle.write_control(
            request_type(false),
            request_code(buf.len()),
            value,
            0,
            buf,
            CONTROL_TIMEOUT,
        )?;
        Ok(sent)
    }

    fn bulk_in(&self, buf: &mut [u8]) -> Result<usize> {
        let got = self.handle.read_bulk(BULK_IN_ENDPOINT, buf, BULK_TIMEOUT)?;
        Ok(got)
    }
}

impl Drop for UsbDevice {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
    }
}
