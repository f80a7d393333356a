//! Device session: lifecycle, parameters and scan state.
//!
//! A session owns the command handle (and through it the USB interface
//! claim), the last device state blocks, the tunable scan parameters and
//! the per-column calibration table. All operations are strictly
//! serialised on the calling thread; the only thing another context may
//! touch is the abort flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::command::{Scanner, axis, encode_analog_offset};
use crate::scan::ScanBuffer;
use crate::scsi::{FilmStatus, LampInfo, ScanMode, WindowInfo};
use crate::types::{Result, ScannerError};
use crate::usb::UsbPipe;

/// Calibration table length: one entry per sample column at full resolution
pub const CAL_TABLE_LEN: usize = 12_120;

/// Interval between lamp and ready polls
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Ready polls before open gives up on a wedged device
const READY_POLL_LIMIT: u32 = 120;

/// Per-column calibration: additive offset then 2.14 fixed-point multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalEntry {
    pub offset: i32,
    pub mult: i32,
}

impl Default for CalEntry {
    fn default() -> Self {
        // identity: offset 0, multiplier 1.0 in 2.14 fixed point
        Self {
            offset: 0,
            mult: 16384,
        }
    }
}

/// Scan lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// No acquisition in progress
    Idle,
    /// A scan has been requested; device setup under way
    Armed,
    /// Bulk data is streaming
    Reading,
    /// Frame acquired; buffer waiting for the caller to drain it
    Drained,
    /// Aborted by the caller or by an error; release path has run
    Cancelled,
}

/// Tunable per-session scan parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanParams {
    /// Analog gain per channel (AD9814 front-end)
    pub a_gain: [u8; 3],
    /// Analog offset per channel, -255..=255
    pub a_offset: [i16; 3],
    /// CCD shutter pulse width per channel, 0..=max_shutter
    pub shutter: [u16; 3],
    /// Post-scan multiplicative gain per channel, 8.8 fixed point
    pub boost: [u16; 3],
    /// Scan speed, 1 (slowest) ..= 4
    pub speed: u8,
    /// Input sample depth: 8, 14 or 16 bits
    pub in_mode: u8,
    /// Last frame code written with set-frame
    pub frame: u8,
    /// Upper bound for shutter widths
    pub max_shutter: u16,
    /// Speed used for the auto-exposure pre-pass
    pub auto_exp: u8,
    /// Sample columns at line start exempt from calibration
    pub margin: u32,
    /// Zero all shutters, used while tuning the analog front-end
    pub disable_shutters: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            a_gain: [47, 36, 36],
            a_offset: [-25, -8, -5],
            shutter: [750, 352, 235],
            boost: [256, 256, 256],
            speed: 2,
            in_mode: 14,
            frame: 0,
            max_shutter: 890,
            auto_exp: 2,
            margin: 120,
            disable_shutters: false,
        }
    }
}

impl ScanParams {
    pub fn validate(&self) -> Result<()> {
        for (i, offset) in self.a_offset.iter().enumerate() {
            if !(-255..=255).contains(offset) {
                return Err(ScannerError::InvalidParameter(format!(
                    "analog offset {offset} for channel {i} out of range"
                )));
            }
        }
        for (i, shutter) in self.shutter.iter().enumerate() {
            if *shutter > self.max_shutter {
                return Err(ScannerError::InvalidParameter(format!(
                    "shutter {shutter} for channel {i} above limit {}",
                    self.max_shutter
                )));
            }
        }
        for (i, boost) in self.boost.iter().enumerate() {
            if *boost == 0 {
                return Err(ScannerError::InvalidParameter(format!(
                    "boost for channel {i} must be at least 1"
                )));
            }
        }
        if !(1..=4).contains(&self.speed) {
            return Err(ScannerError::InvalidParameter(format!(
                "speed {} out of range 1..=4",
                self.speed
            )));
        }
        if !matches!(self.in_mode, 8 | 14 | 16) {
            return Err(ScannerError::InvalidParameter(format!(
                "input mode {} not one of 8, 14, 16",
                self.in_mode
            )));
        }
        if self.frame > crate::command::MAX_FRAME_CODE {
            return Err(ScannerError::InvalidParameter(format!(
                "frame code {} out of range",
                self.frame
            )));
        }
        if self.margin as usize > CAL_TABLE_LEN {
            return Err(ScannerError::InvalidParameter(format!(
                "margin {} beyond calibration table",
                self.margin
            )));
        }
        Ok(())
    }
}

/// Abort capability: settable from a signal-like context, polled by the
/// orchestrator at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress/warning callback; invoked only from the session's own thread
pub type FeedbackFn = Box<dyn FnMut(&str) + Send>;

/// One open scanner
pub struct Session<P: UsbPipe> {
    pub(crate) scanner: Scanner<P>,
    pub(crate) params: ScanParams,
    pub(crate) cal: Vec<CalEntry>,
    pub(crate) film: FilmStatus,
    pub(crate) lamp: LampInfo,
    pub(crate) scan_mode: ScanMode,
    pub(crate) window: WindowInfo,
    pub(crate) state: ScanState,
    pub(crate) buffer: Option<ScanBuffer>,
    product: String,
    feedback: Option<FeedbackFn>,
    abort: AbortFlag,
}

impl<P: UsbPipe> Session<P> {
    /// Open a session with default parameters
    pub fn open(pipe: P) -> Result<Self> {
        Self::open_with_params(pipe, ScanParams::default())
    }

    /// Open a session: identity check, device drain, ready wait, state
    /// block fetch, and a write-back of scan mode and window to confirm
    /// the device accepts programming.
    pub fn open_with_params(pipe: P, params: ScanParams) -> Result<Self> {
        params.validate()?;
        let scanner = Scanner::new(pipe);

        let inq = scanner.inquiry()?;
        info!(product = %inq.product_str(), revision = %inq.revision_str(), "opening scanner");
        let product = inq.product_str();

        // Drop whatever a previous host left pending before talking.
        scanner.cancel()?;

        let mut polls = 0;
        loop {
            match scanner.test_unit_ready() {
                Ok(()) => break,
                Err(ScannerError::DeviceBusy) => {
                    polls += 1;
                    if polls >= READY_POLL_LIMIT {
                        return Err(ScannerError::DeviceBusy);
                    }
                    debug!(polls, "waiting for unit ready");
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(err),
            }
        }

        let film = scanner.get_film_status()?;
        let lamp = scanner.get_lamp()?;

        let mut scan_mode = scanner.get_scan_mode()?;
        scan_mode.apply_init_defaults(params.speed);
        scanner.put_scan_mode(&scan_mode)?;

        let window = scanner.get_window()?;
        scanner.put_window(&window)?;

        Ok(Self {
            scanner,
            params,
            cal: vec![CalEntry::default(); CAL_TABLE_LEN],
            film,
            lamp,
            scan_mode,
            window,
            state: ScanState::Idle,
            buffer: None,
            product,
            feedback: None,
            abort: AbortFlag::new(),
        })
    }

    /// Product string reported by the device at open
    pub fn product(&self) -> &str {
        &self.product
    }

    /// Borrow the underlying USB pipe
    pub fn scanner_pipe(&self) -> &P {
        self.scanner.pipe()
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn params(&self) -> &ScanParams {
        &self.params
    }

    /// Replace the parameter record after validating it
    pub fn set_params(&mut self, params: ScanParams) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    /// Select the input sample depth
    pub fn set_in_mode(&mut self, in_mode: u8) -> Result<()> {
        if !matches!(in_mode, 8 | 14 | 16) {
            return Err(ScannerError::InvalidParameter(format!(
                "input mode {in_mode} not one of 8, 14, 16"
            )));
        }
        self.params.in_mode = in_mode;
        Ok(())
    }

    pub fn film_status(&self) -> &FilmStatus {
        &self.film
    }

    pub fn lamp_info(&self) -> &LampInfo {
        &self.lamp
    }

    pub fn set_feedback(&mut self, feedback: FeedbackFn) {
        self.feedback = Some(feedback);
    }

    /// Handle other contexts can use to request cancellation
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    pub(crate) fn feedback(&mut self, message: &str) {
        info!("{message}");
        if let Some(cb) = self.feedback.as_mut() {
            cb(message);
        }
    }

    pub(crate) fn check_abort(&self) -> bool {
        self.abort.is_raised()
    }

    pub(crate) fn ensure_not_aborted(&self) -> Result<()> {
        if self.check_abort() {
            Err(ScannerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Refresh the cached film-holder block
    pub fn refresh_film_status(&mut self) -> Result<&FilmStatus> {
        self.film = self.scanner.get_film_status()?;
        Ok(&self.film)
    }

    /// Cumulative visible-lamp on-time, or None when the lamp is off
    pub fn lamp_test(&mut self) -> Result<Option<u32>> {
        self.lamp = self.scanner.get_lamp()?;
        if self.lamp.visible_on() {
            Ok(Some(self.lamp.visible_seconds()))
        } else {
            Ok(None)
        }
    }

    /// Switch the visible lamp on and wait until it has accumulated at
    /// least `min_secs` of on-time. Polls every 500 ms, honouring the
    /// abort flag.
    pub fn lamp_on(&mut self, min_secs: u32) -> Result<()> {
        loop {
            self.scanner.set_lamp(true, false)?;
            self.lamp = self.scanner.get_lamp()?;
            let warmed = self.lamp.visible_seconds();
            if warmed >= min_secs {
                return Ok(());
            }
            self.feedback(&format!("Waiting for lamp ({})", min_secs - warmed));
            self.ensure_not_aborted()?;
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Switch both lamps off, optionally letting the unit settle
    pub fn lamp_off(&mut self, settle_secs: u32) -> Result<()> {
        self.scanner.set_lamp(false, false)?;
        if settle_secs > 0 {
            thread::sleep(Duration::from_secs(settle_secs as u64));
        }
        Ok(())
    }

    /// Write a frame code and remember it
    pub fn set_frame(&mut self, code: u8) -> Result<()> {
        self.scanner.set_frame(code)?;
        self.params.frame = code;
        Ok(())
    }

    /// Park both axes: re-arm the home sensor, home the carriage, home
    /// the holder.
    pub fn home(&mut self) -> Result<()> {
        self.set_frame(0)?;
        self.scanner.move_position(axis::CARRIAGE, 0, 0)?;
        self.scanner.move_position(axis::HOLDER, 0, 0)?;
        Ok(())
    }

    /// Reset the calibration table to identity
    pub fn reset_calibration(&mut self) {
        self.cal.fill(CalEntry::default());
    }

    /// Per-column calibration table
    pub fn calibration(&self) -> &[CalEntry] {
        &self.cal
    }

    pub fn calibration_mut(&mut self) -> &mut [CalEntry] {
        &mut self.cal
    }

    /// Frame buffer from the last completed scan
    pub fn scan_buffer(&self) -> Option<&ScanBuffer> {
        self.buffer.as_ref()
    }

    /// Acknowledge a drained or cancelled scan, releasing the buffer
    pub fn ack_scan(&mut self) {
        self.buffer = None;
        self.state = ScanState::Idle;
    }

    /// Cancel whatever is in progress. From idle this is a no-op; while a
    /// scan is being set up or read it raises the abort flag for the
    /// orchestrator to honour at its next suspension point; after a scan
    /// it drops the undrained buffer.
    pub fn cancel(&mut self) {
        match self.state {
            ScanState::Idle => {}
            ScanState::Armed | ScanState::Reading => self.abort.raise(),
            ScanState::Drained | ScanState::Cancelled => self.ack_scan(),
        }
    }

    /// Write the current analog parameters and the given speed into the
    /// cached scan-mode block and program the device with it.
    pub(crate) fn program_scan_mode(&mut self, speed: u8) -> Result<()> {
        let mods = {
            let mut mods = crate::command::sample_mod_code(self.params.in_mode);
            if self.params.margin == 0 {
                mods |= crate::scsi::SAMPLE_MODS_NO_MARGIN;
            }
            mods
        };
        self.scan_mode = self.scanner.get_scan_mode()?;
        self.scan_mode.set_speed(speed);
        self.scan_mode.set_sample_mods(mods);
        for channel in 0..3 {
            self.scan_mode.set_a_gain(channel, self.params.a_gain[channel]);
            self.scan_mode
                .set_a_offset(channel, encode_analog_offset(self.params.a_offset[channel]));
            let width = if self.params.disable_shutters {
                0
            } else {
                self.params.shutter[channel]
            };
            self.scan_mode.set_shutter(channel, width);
        }
        self.scanner.put_scan_mode(&self.scan_mode)
    }

    /// Program the scan window, preserving the vendor bytes of the block
    /// read at open.
    pub(crate) fn program_window(
        &mut self,
        x_res: u16,
        y_res: u16,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.window.set_x_resolution(x_res);
        self.window.set_y_resolution(y_res);
        self.window.set_upper_left_x(x);
        self.window.set_upper_left_y(y);
        self.window.set_width(width);
        self.window.set_height(height);
        self.window.set_bits_per_pixel(self.params.in_mode);
        self.scanner.put_window(&self.window)
    }

    /// Shut the session down: lamp off, axes parked, LED off. The USB
    /// interface is released when the pipe drops.
    pub fn close(mut self) -> Result<()> {
        if self.state != ScanState::Idle {
            warn!("closing session with a scan outstanding");
        }
        let lamp = self.lamp_off(0);
        let home = self.home();
        let led = self.scanner.control_led(crate::command::led::OFF);
        lamp.and(home).and(led)
    }
}
