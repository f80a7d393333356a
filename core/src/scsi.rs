//! SCSI opcodes and on-wire data blocks for the FS4000US.
//!
//! The scanner speaks a vendor-flavoured SCSI dialect: a handful of standard
//! opcodes plus a vendor range for lamp, frame and motion control. All
//! multi-byte integers on the wire are big-endian.
//!
//! Several blocks carry vendor-private bytes whose meaning is unknown, so
//! every block here is a thin wrapper over its raw byte image with accessors
//! at fixed offsets. Reading a block, mutating named fields and writing it
//! back leaves every unnamed byte exactly as the device reported it.

use crate::types::{Result, ScannerError};

// ============================================================================
// Opcodes
// ============================================================================

/// Command opcodes understood by the scanner
pub mod opcode {
    /// Test if the unit is ready (6)
    pub const TEST_UNIT_READY: u8 = 0x00;
    /// Request sense data from the previous command (6)
    pub const REQUEST_SENSE: u8 = 0x03;
    /// Return device identification (6)
    pub const INQUIRY: u8 = 0x12;
    /// Reserve the unit (6)
    pub const RESERVE_UNIT: u8 = 0x16;
    /// Release the unit (6)
    pub const RELEASE_UNIT: u8 = 0x17;
    /// Program the scan window (10)
    pub const SET_WINDOW: u8 = 0x24;
    /// Read back the scan window (10)
    pub const GET_WINDOW: u8 = 0x25;
    /// Read scan data over the bulk pipe (10)
    pub const READ: u8 = 0x28;
    /// Start the scan (10)
    pub const SCAN: u8 = 0x2A;
    /// Move the carriage or the film holder (10)
    pub const MOVE_POSITION: u8 = 0x2B;
    /// Cancel the current operation (6)
    pub const CANCEL: u8 = 0xC0;
    /// Command status block (vendor read, 4 bytes)
    pub const GET_STATUS: u8 = 0xC5;
    /// Read the scan-mode block (10)
    pub const GET_SCAN_MODE: u8 = 0xD5;
    /// Write the scan-mode block (10)
    pub const PUT_SCAN_MODE: u8 = 0xD6;
    /// Read the film-holder status block (10)
    pub const GET_FILM_STATUS: u8 = 0xD8;
    /// Read the pending-data size block (10)
    pub const GET_DATA_STATUS: u8 = 0xD9;
    /// Read the lamp block (10)
    pub const GET_LAMP: u8 = 0xDA;
    /// Run the autofocus / auto-exposure sweep (10)
    pub const EXECUTE_AFAE: u8 = 0xE0;
    /// Vendor variant of reserve-unit (6)
    pub const RESERVE_VENDOR: u8 = 0xE4;
    /// Set the front-panel LED state (6)
    pub const CONTROL_LED: u8 = 0xE6;
    /// Select frame code: direction and motion policy (6)
    pub const SET_FRAME: u8 = 0xE7;
    /// Switch the visible / infrared lamps (6)
    pub const SET_LAMP: u8 = 0xE8;
}

// ============================================================================
// Sense Key Codes
// ============================================================================

/// Sense key codes surfaced in check conditions
pub mod sense_key {
    /// No error
    pub const NO_SENSE: u8 = 0x00;
    /// Device not ready
    pub const NOT_READY: u8 = 0x02;
    /// Medium error
    pub const MEDIUM_ERROR: u8 = 0x03;
    /// Hardware error
    pub const HARDWARE_ERROR: u8 = 0x04;
    /// Illegal request
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    /// Unit attention (reset, parameters changed)
    pub const UNIT_ATTENTION: u8 = 0x06;
    /// Aborted command
    pub const ABORTED_COMMAND: u8 = 0x0B;
}

// ============================================================================
// Block lengths
// ============================================================================

/// Inquiry response length
pub const INQUIRY_LEN: usize = 36;
/// Vendor sense block length
pub const SENSE_LEN: usize = 14;
/// Film-holder status block length
pub const FILM_STATUS_LEN: usize = 0x28;
/// Lamp block length
pub const LAMP_INFO_LEN: usize = 0x0A;
/// Scan-mode block length
pub const SCAN_MODE_LEN: usize = 0x38;
/// Window block header length
pub const WINDOW_HEADER_LEN: usize = 8;
/// Window descriptor length
pub const WINDOW_DESC_LEN: usize = 46;
/// Complete window block length (header + one descriptor)
pub const WINDOW_LEN: usize = WINDOW_HEADER_LEN + WINDOW_DESC_LEN;
/// Pending-data size block length
pub const DATA_STATUS_LEN: usize = 12;

// ============================================================================
// Byte helpers
// ============================================================================

fn get_u16(raw: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([raw[off], raw[off + 1]])
}

fn put_u16(raw: &mut [u8], off: usize, value: u16) {
    raw[off..off + 2].copy_from_slice(&value.to_be_bytes());
}

fn get_u32(raw: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]])
}

fn put_u32(raw: &mut [u8], off: usize, value: u32) {
    raw[off..off + 4].copy_from_slice(&value.to_be_bytes());
}

fn check_len(name: &str, raw: &[u8], want: usize) -> Result<()> {
    if raw.len() != want {
        return Err(ScannerError::Protocol(format!(
            "{} block is {} bytes, expected {}",
            name,
            raw.len(),
            want
        )));
    }
    Ok(())
}

// ============================================================================
// Inquiry
// ============================================================================

/// Canonical vendor string reported by the scanner
pub const INQUIRY_VENDOR: &[u8] = b"CANON ";
/// Canonical product prefix reported by the scanner
pub const INQUIRY_PRODUCT: &[u8] = b"IX-40015G ";

/// INQUIRY response: 8 reserved bytes, vendor, product, revision
#[derive(Debug, Clone)]
pub struct InquiryData {
    raw: [u8; INQUIRY_LEN],
}

impl InquiryData {
    pub const SIZE: usize = INQUIRY_LEN;

    pub fn from_bytes(raw: [u8; INQUIRY_LEN]) -> Self {
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8; INQUIRY_LEN] {
        &self.raw
    }

    pub fn vendor(&self) -> &[u8] {
        &self.raw[8..16]
    }

    pub fn product(&self) -> &[u8] {
        &self.raw[16..32]
    }

    pub fn revision(&self) -> &[u8] {
        &self.raw[32..36]
    }

    /// Identification check against the canonical FS4000US strings
    pub fn is_fs4000(&self) -> bool {
        self.vendor().starts_with(INQUIRY_VENDOR) && self.product().starts_with(INQUIRY_PRODUCT)
    }

    /// Vendor string with trailing padding removed
    pub fn vendor_str(&self) -> String {
        String::from_utf8_lossy(self.vendor()).trim_end().to_string()
    }

    /// Product string with trailing padding removed
    pub fn product_str(&self) -> String {
        String::from_utf8_lossy(self.product()).trim_end().to_string()
    }

    /// Revision string with trailing padding removed
    pub fn revision_str(&self) -> String {
        String::from_utf8_lossy(self.revision()).trim_end().to_string()
    }
}

// ============================================================================
// Sense
// ============================================================================

/// Vendor sense block returned after a check condition
#[derive(Debug, Clone, Copy)]
pub struct SenseData {
    raw: [u8; SENSE_LEN],
}

impl SenseData {
    pub const SIZE: usize = SENSE_LEN;

    pub fn from_bytes(raw: [u8; SENSE_LEN]) -> Self {
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8; SENSE_LEN] {
        &self.raw
    }

    /// Sense key (low nibble of byte 2)
    pub fn key(&self) -> u8 {
        self.raw[2] & 0x0F
    }

    /// Additional sense code
    pub fn asc(&self) -> u8 {
        self.raw[12]
    }

    /// Additional sense code qualifier
    pub fn ascq(&self) -> u8 {
        self.raw[13]
    }

    /// Convert the block into the error it represents
    pub fn into_error(self) -> ScannerError {
        ScannerError::Sense {
            key: self.key(),
            asc: self.asc(),
            ascq: self.ascq(),
            raw: self.raw,
        }
    }
}

// ============================================================================
// Film-holder status
// ============================================================================

/// Holder type codes reported in the film-status block
pub mod holder_type {
    /// No holder inserted
    pub const NONE: u8 = 0;
    /// Negative strip holder, up to six frames
    pub const NEGATIVE: u8 = 1;
    /// Slide tray, up to four frames
    pub const SLIDE: u8 = 2;
}

/// Film-holder status block (0x28 bytes)
#[derive(Debug, Clone)]
pub struct FilmStatus {
    raw: [u8; FILM_STATUS_LEN],
}

impl FilmStatus {
    pub const SIZE: usize = FILM_STATUS_LEN;

    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        check_len("film-status", raw, FILM_STATUS_LEN)?;
        let mut block = Self {
            raw: [0; FILM_STATUS_LEN],
        };
        block.raw.copy_from_slice(raw);
        Ok(block)
    }

    pub fn as_bytes(&self) -> &[u8; FILM_STATUS_LEN] {
        &self.raw
    }

    pub fn holder_type(&self) -> u8 {
        self.raw[0]
    }

    pub fn frame_count(&self) -> u8 {
        self.raw[1]
    }

    pub fn holder_position(&self) -> u16 {
        get_u16(&self.raw, 2)
    }

    /// Last frame code written with set-frame (bits 7..3 of byte 4)
    pub fn last_set_frame(&self) -> u8 {
        self.raw[4] >> 3
    }

    pub fn focus_position(&self) -> u8 {
        self.raw[7]
    }

    pub fn start_pixel(&self) -> u16 {
        get_u16(&self.raw, 8)
    }

    pub fn limit_pixel(&self) -> u16 {
        get_u16(&self.raw, 10)
    }

    /// Per-channel focus sharpness sums from the last focus sweep
    pub fn diffs_sum(&self, channel: usize) -> u32 {
        assert!(channel < 3);
        get_u32(&self.raw, 12 + channel * 4)
    }

    pub fn speed_hint(&self) -> u8 {
        self.raw[24]
    }

    /// Best focus point per channel from the last focus sweep
    pub fn focus_best(&self, channel: usize) -> u8 {
        assert!(channel < 3);
        self.raw[25 + channel]
    }
}

// ============================================================================
// Lamp
// ============================================================================

/// Lamp block (0x0A bytes): on flags and cumulative on-time for both lamps
#[derive(Debug, Clone, Copy)]
pub struct LampInfo {
    raw: [u8; LAMP_INFO_LEN],
}

impl LampInfo {
    pub const SIZE: usize = LAMP_INFO_LEN;

    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        check_len("lamp", raw, LAMP_INFO_LEN)?;
        let mut block = Self {
            raw: [0; LAMP_INFO_LEN],
        };
        block.raw.copy_from_slice(raw);
        Ok(block)
    }

    pub fn as_bytes(&self) -> &[u8; LAMP_INFO_LEN] {
        &self.raw
    }

    pub fn visible_on(&self) -> bool {
        self.raw[0] != 0
    }

    /// Seconds the visible lamp has been on
    pub fn visible_seconds(&self) -> u32 {
        get_u32(&self.raw, 1)
    }

    pub fn infrared_on(&self) -> bool {
        self.raw[5] != 0
    }

    /// Seconds the infrared lamp has been on
    pub fn infrared_seconds(&self) -> u32 {
        get_u32(&self.raw, 6)
    }
}

// ============================================================================
// Scan mode
// ============================================================================

/// Sample-mods flag set when no margin columns are wanted
pub const SAMPLE_MODS_NO_MARGIN: u8 = 0x20;

/// Scan-mode block (0x38 bytes): speed, sample handling, analog front-end
/// programming and shutter widths. The vendor-opaque regions are carried
/// verbatim between get and put.
#[derive(Debug, Clone)]
pub struct ScanMode {
    raw: [u8; SCAN_MODE_LEN],
}

impl ScanMode {
    pub const SIZE: usize = SCAN_MODE_LEN;

    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        check_len("scan-mode", raw, SCAN_MODE_LEN)?;
        let mut block = Self {
            raw: [0; SCAN_MODE_LEN],
        };
        block.raw.copy_from_slice(raw);
        Ok(block)
    }

    pub fn as_bytes(&self) -> &[u8; SCAN_MODE_LEN] {
        &self.raw
    }

    pub fn length(&self) -> u8 {
        self.raw[0]
    }

    pub fn speed(&self) -> u8 {
        self.raw[15]
    }

    pub fn set_speed(&mut self, speed: u8) {
        self.raw[15] = speed;
    }

    pub fn sample_mods(&self) -> u8 {
        self.raw[20]
    }

    pub fn set_sample_mods(&mut self, mods: u8) {
        self.raw[20] = mods;
    }

    /// Analog gain for one channel
    pub fn a_gain(&self, channel: usize) -> u8 {
        assert!(channel < 3);
        self.raw[22 + channel]
    }

    pub fn set_a_gain(&mut self, channel: usize, gain: u8) {
        assert!(channel < 3);
        self.raw[22 + channel] = gain;
    }

    /// Analog offset for one channel, in the encoded front-end format
    pub fn a_offset(&self, channel: usize) -> u16 {
        assert!(channel < 3);
        get_u16(&self.raw, 25 + channel * 2)
    }

    pub fn set_a_offset(&mut self, channel: usize, offset: u16) {
        assert!(channel < 3);
        put_u16(&mut self.raw, 25 + channel * 2, offset);
    }

    /// CCD shutter pulse width for one channel
    pub fn shutter(&self, channel: usize) -> u16 {
        assert!(channel < 3);
        get_u16(&self.raw, 31 + channel * 2)
    }

    pub fn set_shutter(&mut self, channel: usize, width: u16) {
        assert!(channel < 3);
        put_u16(&mut self.raw, 31 + channel * 2, width);
    }

    pub fn image_mods(&self) -> u8 {
        self.raw[37]
    }

    pub fn set_image_mods(&mut self, mods: u8) {
        self.raw[37] = mods;
    }

    /// First-write preparation of the block read from the device: nine of
    /// the vendor-opaque bytes are zeroed and the mode bytes reset. The
    /// device rejects some stale values here after power-up.
    pub fn apply_init_defaults(&mut self, speed: u8) {
        self.raw[6..15].fill(0);
        self.set_speed(speed);
        self.set_sample_mods(0);
        self.raw[21] = 0;
        self.set_image_mods(0);
    }
}

// ============================================================================
// Window
// ============================================================================

/// Window block: 8-byte header plus one 46-byte descriptor selecting
/// resolution, origin and extent of the scan area
#[derive(Debug, Clone)]
pub struct WindowInfo {
    raw: [u8; WINDOW_LEN],
}

impl WindowInfo {
    pub const SIZE: usize = WINDOW_LEN;

    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        check_len("window", raw, WINDOW_LEN)?;
        let mut block = Self { raw: [0; WINDOW_LEN] };
        block.raw.copy_from_slice(raw);
        Ok(block)
    }

    pub fn as_bytes(&self) -> &[u8; WINDOW_LEN] {
        &self.raw
    }

    /// Descriptor length recorded in the header
    pub fn descriptor_len(&self) -> u16 {
        get_u16(&self.raw, 6)
    }

    pub fn set_descriptor_len(&mut self, len: u16) {
        put_u16(&mut self.raw, 6, len);
    }

    pub fn x_resolution(&self) -> u16 {
        get_u16(&self.raw, WINDOW_HEADER_LEN + 2)
    }

    pub fn set_x_resolution(&mut self, dpi: u16) {
        put_u16(&mut self.raw, WINDOW_HEADER_LEN + 2, dpi);
    }

    pub fn y_resolution(&self) -> u16 {
        get_u16(&self.raw, WINDOW_HEADER_LEN + 4)
    }

    pub fn set_y_resolution(&mut self, dpi: u16) {
        put_u16(&mut self.raw, WINDOW_HEADER_LEN + 4, dpi);
    }

    pub fn upper_left_x(&self) -> u32 {
        get_u32(&self.raw, WINDOW_HEADER_LEN + 6)
    }

    pub fn set_upper_left_x(&mut self, x: u32) {
        put_u32(&mut self.raw, WINDOW_HEADER_LEN + 6, x);
    }

    pub fn upper_left_y(&self) -> u32 {
        get_u32(&self.raw, WINDOW_HEADER_LEN + 10)
    }

    pub fn set_upper_left_y(&mut self, y: u32) {
        put_u32(&mut self.raw, WINDOW_HEADER_LEN + 10, y);
    }

    pub fn width(&self) -> u32 {
        get_u32(&self.raw, WINDOW_HEADER_LEN + 14)
    }

    pub fn set_width(&mut self, width: u32) {
        put_u32(&mut self.raw, WINDOW_HEADER_LEN + 14, width);
    }

    pub fn height(&self) -> u32 {
        get_u32(&self.raw, WINDOW_HEADER_LEN + 18)
    }

    pub fn set_height(&mut self, height: u32) {
        put_u32(&mut self.raw, WINDOW_HEADER_LEN + 18, height);
    }

    /// Bits-per-pixel code in the descriptor
    pub fn bits_per_pixel(&self) -> u8 {
        self.raw[WINDOW_HEADER_LEN + 26]
    }

    pub fn set_bits_per_pixel(&mut self, code: u8) {
        self.raw[WINDOW_HEADER_LEN + 26] = code;
    }
}

// ============================================================================
// Data status
// ============================================================================

/// Decode the pending-data size block into (lines, bytes per line)
pub fn parse_data_status(raw: &[u8]) -> Result<(u32, u32)> {
    check_len("data-status", raw, DATA_STATUS_LEN)?;
    Ok((get_u32(raw, 0), get_u32(raw, 4)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_lengths() {
        assert_eq!(FilmStatus::SIZE, 40);
        assert_eq!(LampInfo::SIZE, 10);
        assert_eq!(ScanMode::SIZE, 56);
        assert_eq!(WindowInfo::SIZE, 54);
        assert_eq!(InquiryData::SIZE, 36);
        assert_eq!(SenseData::SIZE, 14);
    }

    #[test]
    fn test_inquiry_identity() {
        let mut raw = [b' '; INQUIRY_LEN];
        raw[8..14].copy_from_slice(b"CANON ");
        raw[16..26].copy_from_slice(b"IX-40015G ");
        raw[32..36].copy_from_slice(b"1.02");
        let inq = InquiryData::from_bytes(raw);
        assert!(inq.is_fs4000());
        assert_eq!(inq.vendor_str(), "CANON");
        assert_eq!(inq.product_str(), "IX-40015G");
        assert_eq!(inq.revision_str(), "1.02");
    }

    #[test]
    fn test_inquiry_mismatch() {
        let raw = [b'X'; INQUIRY_LEN];
        assert!(!InquiryData::from_bytes(raw).is_fs4000());
    }

    #[test]
    fn test_sense_fields() {
        let mut raw = [0u8; SENSE_LEN];
        raw[2] = 0xF6; // high nibble must be masked off
        raw[12] = 0x29;
        raw[13] = 0x01;
        let sense = SenseData::from_bytes(raw);
        assert_eq!(sense.key(), sense_key::UNIT_ATTENTION);
        assert_eq!(sense.asc(), 0x29);
        assert_eq!(sense.ascq(), 0x01);
        match sense.into_error() {
            ScannerError::Sense { key, asc, ascq, raw } => {
                assert_eq!(key, 0x06);
                assert_eq!(asc, 0x29);
                assert_eq!(ascq, 0x01);
                assert_eq!(raw[2], 0xF6);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_film_status_fields() {
        let mut raw = [0u8; FILM_STATUS_LEN];
        raw[0] = holder_type::NEGATIVE;
        raw[1] = 6;
        raw[2..4].copy_from_slice(&600u16.to_be_bytes());
        raw[4] = 0b0000_1000; // frame code 1 in bits 7..3
        raw[7] = 120;
        raw[8..10].copy_from_slice(&40u16.to_be_bytes());
        raw[10..12].copy_from_slice(&4000u16.to_be_bytes());
        raw[12..16].copy_from_slice(&123456u32.to_be_bytes());
        raw[24] = 2;
        raw[25] = 100;
        let status = FilmStatus::from_slice(&raw).unwrap();
        assert_eq!(status.holder_type(), 1);
        assert_eq!(status.frame_count(), 6);
        assert_eq!(status.holder_position(), 600);
        assert_eq!(status.last_set_frame(), 1);
        assert_eq!(status.focus_position(), 120);
        assert_eq!(status.start_pixel(), 40);
        assert_eq!(status.limit_pixel(), 4000);
        assert_eq!(status.diffs_sum(0), 123456);
        assert_eq!(status.speed_hint(), 2);
        assert_eq!(status.focus_best(0), 100);
    }

    #[test]
    fn test_film_status_length_check() {
        assert!(FilmStatus::from_slice(&[0u8; 39]).is_err());
    }

    #[test]
    fn test_lamp_fields() {
        let mut raw = [0u8; LAMP_INFO_LEN];
        raw[0] = 1;
        raw[1..5].copy_from_slice(&3600u32.to_be_bytes());
        raw[6..10].copy_from_slice(&17u32.to_be_bytes());
        let lamp = LampInfo::from_slice(&raw).unwrap();
        assert!(lamp.visible_on());
        assert_eq!(lamp.visible_seconds(), 3600);
        assert!(!lamp.infrared_on());
        assert_eq!(lamp.infrared_seconds(), 17);
    }

    #[test]
    fn test_scan_mode_roundtrip_preserves_reserved() {
        // Fill the whole block with a marker, mutate the named fields and
        // confirm only the named offsets changed.
        let raw: Vec<u8> = (0..SCAN_MODE_LEN as u8).map(|b| b.wrapping_add(0x40)).collect();
        let mut mode = ScanMode::from_slice(&raw).unwrap();
        mode.set_speed(4);
        mode.set_sample_mods(0x23);
        mode.set_a_gain(1, 36);
        mode.set_a_offset(2, 0x0105);
        mode.set_shutter(0, 890);
        mode.set_image_mods(7);

        let out = mode.as_bytes();
        assert_eq!(out[15], 4);
        assert_eq!(out[20], 0x23);
        assert_eq!(out[23], 36);
        assert_eq!(&out[29..31], &0x0105u16.to_be_bytes());
        assert_eq!(&out[31..33], &890u16.to_be_bytes());
        assert_eq!(out[37], 7);
        // everything else untouched
        for (i, b) in out.iter().enumerate() {
            match i {
                15 | 20 | 23 | 29 | 30 | 31 | 32 | 37 => {}
                _ => assert_eq!(*b, (i as u8).wrapping_add(0x40), "byte {i} changed"),
            }
        }
    }

    #[test]
    fn test_scan_mode_init_defaults() {
        let raw: Vec<u8> = (0..SCAN_MODE_LEN as u8).collect();
        let mut mode = ScanMode::from_slice(&raw).unwrap();
        mode.apply_init_defaults(2);
        let out = mode.as_bytes();
        // first two vendor bytes kept, next nine zeroed
        assert_eq!(out[4], 4);
        assert_eq!(out[5], 5);
        assert!(out[6..15].iter().all(|b| *b == 0));
        assert_eq!(out[15], 2);
        assert_eq!(out[20], 0);
        assert_eq!(out[21], 0);
        assert_eq!(out[37], 0);
        // analog programming untouched
        assert_eq!(out[22], 22);
    }

    #[test]
    fn test_window_roundtrip_preserves_reserved() {
        let raw: Vec<u8> = (0..WINDOW_LEN as u8).map(|b| b.wrapping_mul(3)).collect();
        let mut window = WindowInfo::from_slice(&raw).unwrap();
        window.set_x_resolution(4000);
        window.set_y_resolution(4000);
        window.set_upper_left_x(0);
        window.set_upper_left_y(0);
        window.set_width(4000);
        window.set_height(5904);
        window.set_bits_per_pixel(14);

        let out = window.as_bytes();
        assert_eq!(window.x_resolution(), 4000);
        assert_eq!(window.y_resolution(), 4000);
        assert_eq!(window.width(), 4000);
        assert_eq!(window.height(), 5904);
        assert_eq!(window.bits_per_pixel(), 14);
        // header bytes before the descriptor length untouched
        for i in 0..6 {
            assert_eq!(out[i], (i as u8).wrapping_mul(3));
        }
        // reserved descriptor tail untouched
        for i in WINDOW_HEADER_LEN + 27..WINDOW_LEN {
            assert_eq!(out[i], (i as u8).wrapping_mul(3), "byte {i} changed");
        }
    }

    #[test]
    fn test_data_status_parse() {
        let mut raw = [0u8; DATA_STATUS_LEN];
        raw[0..4].copy_from_slice(&5920u32.to_be_bytes());
        raw[4..8].copy_from_slice(&24000u32.to_be_bytes());
        assert_eq!(parse_data_status(&raw).unwrap(), (5920, 24000));
        assert!(parse_data_status(&raw[..8]).is_err());
    }
}
