//! Driver core for the Canon FS4000US film scanner.
//!
//! The scanner tunnels a SCSI-like command set over vendor USB control
//! transfers plus one bulk IN pipe. This crate layers, bottom up: the raw
//! pipe ([`usb`]), command execution ([`transport`]), the wire codec
//! ([`scsi`]), the typed command set ([`command`]), the device session
//! ([`session`]), the scan orchestrator ([`scan`]) and the frontend-facing
//! adapter ([`adapter`]).

pub mod adapter;
pub mod command;
pub mod config;
pub mod scan;
pub mod scsi;
pub mod session;
pub mod transport;
pub mod types;
pub mod usb;

pub use adapter::{FrameParameters, OptionValue, ScannerBackend};
pub use command::Scanner;
pub use config::{ConfigError, ScanConfig};
pub use scan::{DeinterlaceReport, ScanBuffer, deinterlace, shift_for_lpi};
pub use session::{AbortFlag, ScanParams, ScanState, Session};
pub use types::{Result, ScannerError};
pub use usb::{DeviceInfo, PRODUCT_ID, UsbDevice, UsbPipe, VENDOR_ID, list_devices};
