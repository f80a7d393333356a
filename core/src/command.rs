//! Typed command set: one call per opcode.
//!
//! Every method builds the CDB, runs it through the transport and validates
//! the response block length. Transport errors pass through unchanged.

use tracing::warn;

use crate::scsi::{
    self, FilmStatus, InquiryData, LampInfo, ScanMode, WindowInfo, opcode, sense_key,
};
use crate::transport::{DataPhase, exec_scsi};
use crate::types::{Result, ScannerError};
use crate::usb::UsbPipe;

/// Front-panel LED codes for [`Scanner::control_led`]
pub mod led {
    pub const OFF: u8 = 0;
    pub const ON: u8 = 1;
    pub const BLINK: u8 = 2;
}

/// Carriage / holder axis codes for [`Scanner::move_position`]
pub mod axis {
    /// Scan carriage; position 0 is the home sensor
    pub const CARRIAGE: u8 = 0;
    /// Film holder
    pub const HOLDER: u8 = 1;
}

/// Highest frame code accepted by set-frame
pub const MAX_FRAME_CODE: u8 = 12;

/// Typed command interface over one USB pipe.
///
/// The pipe is owned: the scanner hardware supports exactly one host-side
/// user and the exclusive interface claim enforces it.
pub struct Scanner<P: UsbPipe> {
    pipe: P,
}

impl<P: UsbPipe> Scanner<P> {
    pub fn new(pipe: P) -> Self {
        Self { pipe }
    }

    pub fn pipe(&self) -> &P {
        &self.pipe
    }

    /// Device identification. A vendor/product mismatch is logged but not
    /// fatal: clone hardware answers the same command set.
    pub fn inquiry(&self) -> Result<InquiryData> {
        let cdb = [opcode::INQUIRY, 0, 0, 0, InquiryData::SIZE as u8, 0];
        let mut raw = [0u8; InquiryData::SIZE];
        exec_scsi(&self.pipe, &cdb, DataPhase::In(&mut raw))?;
        let inq = InquiryData::from_bytes(raw);
        if !inq.is_fs4000() {
            warn!(
                vendor = %inq.vendor_str(),
                product = %inq.product_str(),
                "device does not identify as an FS4000US"
            );
        }
        Ok(inq)
    }

    /// Ready probe. A not-ready check condition is reported as
    /// [`ScannerError::DeviceBusy`] so callers can poll.
    pub fn test_unit_ready(&self) -> Result<()> {
        let cdb = [opcode::TEST_UNIT_READY, 0, 0, 0, 0, 0];
        match exec_scsi(&self.pipe, &cdb, DataPhase::None) {
            Err(ScannerError::Sense { key, .. }) if key == sense_key::NOT_READY => {
                Err(ScannerError::DeviceBusy)
            }
            other => other,
        }
    }

    pub fn reserve_unit(&self) -> Result<()> {
        let cdb = [opcode::RESERVE_UNIT, 0, 0, 0, 0, 0];
        exec_scsi(&self.pipe, &cdb, DataPhase::None)
    }

    pub fn release_unit(&self) -> Result<()> {
        let cdb = [opcode::RELEASE_UNIT, 0, 0, 0, 0, 0];
        exec_scsi(&self.pipe, &cdb, DataPhase::None)
    }

    /// Vendor flavour of reserve-unit. Not part of the normal scan
    /// sequence; kept for parity with the device command set.
    pub fn reserve_unit_vendor(&self) -> Result<()> {
        let cdb = [opcode::RESERVE_VENDOR, 0, 0, 0, 0, 0];
        exec_scsi(&self.pipe, &cdb, DataPhase::None)
    }

    pub fn get_film_status(&self) -> Result<FilmStatus> {
        let mut raw = [0u8; FilmStatus::SIZE];
        let cdb = [
            opcode::GET_FILM_STATUS,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            FilmStatus::SIZE as u8,
            0,
        ];
        exec_scsi(&self.pipe, &cdb, DataPhase::In(&mut raw))?;
        FilmStatus::from_slice(&raw)
    }

    pub fn get_lamp(&self) -> Result<LampInfo> {
        let mut raw = [0u8; LampInfo::SIZE];
        let cdb = [
            opcode::GET_LAMP,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            LampInfo::SIZE as u8,
            0,
        ];
        exec_scsi(&self.pipe, &cdb, DataPhase::In(&mut raw))?;
        LampInfo::from_slice(&raw)
    }

    pub fn get_scan_mode(&self) -> Result<ScanMode> {
        let mut raw = [0u8; ScanMode::SIZE];
        let cdb = [
            opcode::GET_SCAN_MODE,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            ScanMode::SIZE as u8,
            0,
        ];
        exec_scsi(&self.pipe, &cdb, DataPhase::In(&mut raw))?;
        ScanMode::from_slice(&raw)
    }

    pub fn put_scan_mode(&self, mode: &ScanMode) -> Result<()> {
        let cdb = [
            opcode::PUT_SCAN_MODE,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            ScanMode::SIZE as u8,
            0,
        ];
        exec_scsi(&self.pipe, &cdb, DataPhase::Out(mode.as_bytes()))
    }

    pub fn get_window(&self) -> Result<WindowInfo> {
        let mut raw = [0u8; WindowInfo::SIZE];
        let len = (WindowInfo::SIZE as u32).to_be_bytes();
        let cdb = [
            opcode::GET_WINDOW,
            0,
            0,
            0,
            0,
            0,
            len[1],
            len[2],
            len[3],
            0,
        ];
        exec_scsi(&self.pipe, &cdb, DataPhase::In(&mut raw))?;
        WindowInfo::from_slice(&raw)
    }

    pub fn put_window(&self, window: &WindowInfo) -> Result<()> {
        let len = (WindowInfo::SIZE as u32).to_be_bytes();
        let cdb = [
            opcode::SET_WINDOW,
            0,
            0,
            0,
            0,
            0,
            len[1],
            len[2],
            len[3],
            0,
        ];
        exec_scsi(&self.pipe, &cdb, DataPhase::Out(window.as_bytes()))
    }

    /// Size of the data the device is about to stream: (lines, bytes per
    /// line). Must be issued between scan and the first bulk read.
    pub fn get_data_status(&self) -> Result<(u32, u32)> {
        let mut raw = [0u8; scsi::DATA_STATUS_LEN];
        let cdb = [
            opcode::GET_DATA_STATUS,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            scsi::DATA_STATUS_LEN as u8,
            0,
        ];
        exec_scsi(&self.pipe, &cdb, DataPhase::In(&mut raw))?;
        scsi::parse_data_status(&raw)
    }

    pub fn set_lamp(&self, visible: bool, infrared: bool) -> Result<()> {
        let cdb = [
            opcode::SET_LAMP,
            visible as u8,
            infrared as u8,
            0,
            0,
            0,
        ];
        exec_scsi(&self.pipe, &cdb, DataPhase::None)
    }

    /// Select the frame code: bit 0 selects a left-to-right scan, the
    /// remaining bits select the motion policy. Code 0 before other moves
    /// re-arms the home sensor.
    pub fn set_frame(&self, code: u8) -> Result<()> {
        if code > MAX_FRAME_CODE {
            return Err(ScannerError::InvalidParameter(format!(
                "frame code {code} out of range 0..={MAX_FRAME_CODE}"
            )));
        }
        let cdb = [opcode::SET_FRAME, 0, 0, code, 0, 0];
        exec_scsi(&self.pipe, &cdb, DataPhase::None)
    }

    /// Move the carriage (`axis::CARRIAGE`, position 0 homes it) or the
    /// film holder (`axis::HOLDER`).
    pub fn move_position(&self, axis: u8, mode: u8, position: u16) -> Result<()> {
        let cdb = [opcode::MOVE_POSITION, 0, 0, 0, 0, 0, 0, 0, 6, 0];
        let mut block = [0u8; 6];
        block[0..2].copy_from_slice(&(axis as u16).to_be_bytes());
        block[2..4].copy_from_slice(&(mode as u16).to_be_bytes());
        block[4..6].copy_from_slice(&position.to_be_bytes());
        exec_scsi(&self.pipe, &cdb, DataPhase::Out(&block))
    }

    /// Autofocus / auto-exposure sweep. `(1, 0, 0, 0, 500, 3500)` is the
    /// focus-only parameter set.
    pub fn execute_afae(
        &self,
        mode: u8,
        p1: u8,
        p2: u8,
        p3: u8,
        window_start: u16,
        window_end: u16,
    ) -> Result<()> {
        let cdb = [opcode::EXECUTE_AFAE, 0, 0, 0, 0, 0, 0, 0, 8, 0];
        let mut block = [0u8; 8];
        block[0] = mode;
        block[1] = p1;
        block[2] = p2;
        block[3] = p3;
        block[4..6].copy_from_slice(&window_start.to_be_bytes());
        block[6..8].copy_from_slice(&window_end.to_be_bytes());
        exec_scsi(&self.pipe, &cdb, DataPhase::Out(&block))
    }

    /// Start the programmed acquisition
    pub fn scan(&self) -> Result<()> {
        let cdb = [opcode::SCAN, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        exec_scsi(&self.pipe, &cdb, DataPhase::None)
    }

    /// Cancel the current device operation
    pub fn cancel(&self) -> Result<()> {
        let cdb = [opcode::CANCEL, 0, 0, 0, 0, 0];
        exec_scsi(&self.pipe, &cdb, DataPhase::None)
    }

    /// Bulk read of scan data into `buf`. The buffer length must be a
    /// 24-bit quantity; a short read from the device is a hard error.
    pub fn read(&self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() || buf.len() > 0xFF_FFFF {
            return Err(ScannerError::InvalidParameter(format!(
                "bulk read of {} bytes out of range",
                buf.len()
            )));
        }
        let len = (buf.len() as u32).to_be_bytes();
        let cdb = [opcode::READ, 0, 0, 0, 0, 0, len[1], len[2], len[3], 0];
        exec_scsi(&self.pipe, &cdb, DataPhase::In(buf))
    }

    pub fn control_led(&self, code: u8) -> Result<()> {
        let cdb = [opcode::CONTROL_LED, code, 0, 0, 0, 0];
        exec_scsi(&self.pipe, &cdb, DataPhase::None)
    }
}

// ============================================================================
// Front-end value encodings
// ============================================================================

/// Encode an analog offset for the CCD front-end: clamp to ±255, negatives
/// become `256 - value`.
pub fn encode_analog_offset(offset: i16) -> u16 {
    let clamped = offset.clamp(-255, 255);
    if clamped < 0 {
        (256 - clamped as i32) as u16
    } else {
        clamped as u16
    }
}

/// Inverse of [`encode_analog_offset`]
pub fn decode_analog_offset(raw: u16) -> i16 {
    if raw > 256 {
        (256 - raw as i32) as i16
    } else {
        raw as i16
    }
}

/// Sample-mod mode bits for the scan-mode block, by input bit depth. Mode 0
/// is rejected by the device in 8-bit input, hence the 0x03 there.
pub fn sample_mod_code(in_mode: u8) -> u8 {
    match in_mode {
        8 => 0x03,
        16 => 0x02,
        _ => 0x00,
    }
}
