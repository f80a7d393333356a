//! Boundary adapter: the surface a scanner-access frontend drives.
//!
//! Maps the conventional open / option / parameters / start / read /
//! cancel / close command set onto the session and the orchestrator. The
//! adapter owns nothing clever: it resolves the selected frame, relays a
//! scan and drains the frame buffer in caller-sized chunks.

use crate::session::{ScanState, Session};
use crate::types::{Result, ScannerError};
use crate::usb::{DeviceInfo, UsbDevice, UsbPipe};

/// Number of exposed options, reported by option 0
pub const OPT_NUM_OPTIONS: usize = 0;
/// Product string, read-only
pub const OPT_PRODUCT: usize = 1;
/// Selected frame on a negative strip holder, 1..=6
pub const OPT_FRAME_NEGATIVE: usize = 2;
/// Selected frame on a slide tray, 1..=4
pub const OPT_FRAME_SLIDE: usize = 3;
/// Total option count
pub const OPTION_COUNT: usize = 4;

/// Value of one option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Int(i32),
    Text(String),
}

/// Static description of one option
#[derive(Debug, Clone, Copy)]
pub struct OptionDescriptor {
    pub name: &'static str,
    pub title: &'static str,
    pub read_only: bool,
    /// Inclusive value range for integer options
    pub range: Option<(i32, i32)>,
}

const OPTIONS: [OptionDescriptor; OPTION_COUNT] = [
    OptionDescriptor {
        name: "num-options",
        title: "Number of options",
        read_only: true,
        range: None,
    },
    OptionDescriptor {
        name: "product",
        title: "Scanner product string",
        read_only: true,
        range: None,
    },
    OptionDescriptor {
        name: "frame-negative",
        title: "Frame on the negative strip holder",
        read_only: false,
        range: Some((1, 6)),
    },
    OptionDescriptor {
        name: "frame-slide",
        title: "Frame on the slide tray",
        read_only: false,
        range: Some((1, 4)),
    },
];

/// Frame geometry reported to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameParameters {
    /// Always three samples per pixel, R then G then B
    pub samples_per_pixel: u8,
    /// Bits per sample delivered: 8 or 16
    pub depth: u8,
    pub pixels_per_line: u32,
    pub lines: u32,
    pub bytes_per_line: u32,
}

/// One opened scanner as seen by the frontend
pub struct ScannerBackend<P: UsbPipe> {
    session: Session<P>,
    frame_negative: Option<u8>,
    frame_slide: Option<u8>,
    auto_exposure: bool,
    read_pos: usize,
}

impl ScannerBackend<UsbDevice> {
    /// List attached scanners
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        crate::usb::list_devices()
    }

    /// Open a scanner by `usb:BUS:ADDR` name, or the first one found
    pub fn open(name: Option<&str>) -> Result<Self> {
        let device = UsbDevice::open_named(name)?;
        Ok(Self::from_session(Session::open(device)?))
    }
}

impl<P: UsbPipe> ScannerBackend<P> {
    /// Wrap an already opened session
    pub fn from_session(session: Session<P>) -> Self {
        Self {
            session,
            frame_negative: None,
            frame_slide: None,
            auto_exposure: false,
            read_pos: 0,
        }
    }

    pub fn session(&self) -> &Session<P> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<P> {
        &mut self.session
    }

    pub fn options(&self) -> &'static [OptionDescriptor] {
        &OPTIONS
    }

    pub fn get_option(&self, index: usize) -> Result<OptionValue> {
        match index {
            OPT_NUM_OPTIONS => Ok(OptionValue::Int(OPTION_COUNT as i32)),
            OPT_PRODUCT => Ok(OptionValue::Text(self.session.product().to_string())),
            OPT_FRAME_NEGATIVE => Ok(OptionValue::Int(
                self.frame_negative.map_or(0, |frame| frame as i32),
            )),
            OPT_FRAME_SLIDE => Ok(OptionValue::Int(
                self.frame_slide.map_or(0, |frame| frame as i32),
            )),
            _ => Err(ScannerError::InvalidParameter(format!(
                "option {index} out of range"
            ))),
        }
    }

    /// Set an option. The two frame selectors are mutually exclusive:
    /// setting one clears the other.
    pub fn set_option(&mut self, index: usize, value: OptionValue) -> Result<()> {
        let descriptor = OPTIONS
            .get(index)
            .ok_or_else(|| ScannerError::InvalidParameter(format!("option {index} out of range")))?;
        if descriptor.read_only {
            return Err(ScannerError::InvalidParameter(format!(
                "option {} is read-only",
                descriptor.name
            )));
        }
        let OptionValue::Int(frame) = value else {
            return Err(ScannerError::InvalidParameter(format!(
                "option {} takes an integer",
                descriptor.name
            )));
        };
        let (min, max) = descriptor.range.unwrap_or((i32::MIN, i32::MAX));
        if !(min..=max).contains(&frame) {
            return Err(ScannerError::InvalidParameter(format!(
                "{} = {frame} outside {min}..={max}",
                descriptor.name
            )));
        }
        match index {
            OPT_FRAME_NEGATIVE => {
                self.frame_negative = Some(frame as u8);
                self.frame_slide = None;
            }
            OPT_FRAME_SLIDE => {
                self.frame_slide = Some(frame as u8);
                self.frame_negative = None;
            }
            _ => unreachable!("writable options handled above"),
        }
        Ok(())
    }

    /// Request the auto-exposure pre-pass on the next scan
    pub fn set_auto_exposure(&mut self, enabled: bool) {
        self.auto_exposure = enabled;
    }

    /// Geometry of the next (or current) frame
    pub fn get_parameters(&self) -> FrameParameters {
        let depth = if self.session.params().in_mode == 8 { 8 } else { 16 };
        match self.session.scan_buffer() {
            Some(buffer) => FrameParameters {
                samples_per_pixel: buffer.samples_per_pixel(),
                depth,
                pixels_per_line: (buffer.line_entries() / 3) as u32,
                lines: buffer.lines(),
                bytes_per_line: buffer.line_bytes(),
            },
            None => {
                // Estimate from the fixed scan window until the device
                // reports the real geometry.
                let pixels_per_line = 4000u32;
                let lines = 5904u32;
                FrameParameters {
                    samples_per_pixel: 3,
                    depth,
                    pixels_per_line,
                    lines,
                    bytes_per_line: pixels_per_line * 3 * (depth as u32 / 8),
                }
            }
        }
    }

    /// Acquire the selected frame. Blocks until the frame is in memory.
    pub fn start(&mut self) -> Result<()> {
        // an undrained or failed previous frame is implicitly acknowledged
        if matches!(
            self.session.state(),
            ScanState::Drained | ScanState::Cancelled
        ) {
            self.session.ack_scan();
        }
        let frame = match (self.frame_negative, self.frame_slide) {
            (Some(frame), _) => frame - 1,
            (None, Some(frame)) => frame - 1,
            (None, None) => 0,
        };
        self.read_pos = 0;
        self.session.scan_frame(frame, self.auto_exposure)
    }

    /// Drain the acquired frame. Returns 0 once every byte has been
    /// delivered, after which the buffer is released.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        let Some(buffer) = self.session.scan_buffer() else {
            return Err(ScannerError::Protocol("no acquired frame to read".into()));
        };
        // only the deinterlaced lines are delivered
        let valid = buffer.lines() as usize * buffer.line_bytes() as usize;
        if self.read_pos >= valid {
            self.session.ack_scan();
            self.read_pos = 0;
            return Ok(0);
        }
        let n = out.len().min(valid - self.read_pos);
        out[..n].copy_from_slice(&buffer.data()[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        Ok(n)
    }

    /// Cancel the scan in progress, or drop an undrained frame
    pub fn cancel(&mut self) {
        self.read_pos = 0;
        self.session.cancel();
    }

    /// Only blocking reads are supported
    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        if blocking {
            Ok(())
        } else {
            Err(ScannerError::InvalidParameter(
                "non-blocking reads are not supported".into(),
            ))
        }
    }

    /// Close the device, parking the mechanics first
    pub fn close(self) -> Result<()> {
        self.session.close()
    }
}
