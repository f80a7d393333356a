//! Scan orchestration: frame acquisition, exposure, bulk reads and
//! deinterlacing.
//!
//! A frame goes through film-holder checks, lamp warm-up, carriage homing,
//! a focus sweep, an optional auto-exposure pre-pass, scan-mode and window
//! programming, the streamed bulk read and an in-place deinterlace. The
//! carriage is homed, the LED switched off and the unit released on every
//! exit, successful or not.

use tracing::debug;

use crate::command::{axis, led};
use crate::scsi::holder_type;
use crate::session::{CalEntry, ScanParams, ScanState, Session};
use crate::types::{Result, ScannerError};
use crate::usb::UsbPipe;

/// Frame code for a right-to-left scan
pub const FRAME_R2L: u8 = 0;
/// Frame code for a left-to-right scan
pub const FRAME_L2R: u8 = 1;

/// Carriage offsets for the six frames of a negative strip holder
const NEGATIVE_FRAME_OFFSETS: [u16; 6] = [600, 1080, 1558, 2038, 2516, 2996];
/// Carriage offsets for the four frames of a slide tray
const SLIDE_FRAME_OFFSETS: [u16; 4] = [552, 1330, 2110, 2883];

/// The focus pass sits this far short of the frame offset
const FOCUS_BACKOFF: u16 = 236;
/// Holder move mode used for frame positioning
const HOLDER_MOVE_MODE: u8 = 4;
/// Pixel window of the focus sweep
const FOCUS_WINDOW: (u16, u16) = (500, 3500);
/// Focus runs at the fastest speed: exposure does not matter there
const FOCUS_SPEED: u8 = 4;

/// Minimum cumulative lamp on-time before scanning
const LAMP_WARMUP_SECS: u32 = 15;

/// Native scan resolution in both axes
const SCAN_RESOLUTION: u16 = 4000;
/// Scan window extent in pixels
const SCAN_WIDTH: u32 = 4000;
const SCAN_HEIGHT: u32 = 5904;
/// Vertical resolution of the auto-exposure pre-pass
const PREPASS_Y_RESOLUTION: u16 = 500;

/// Largest single bulk transfer the device accepts
pub(crate) const MAX_BULK_CHUNK: usize = 65536;

// Auto-exposure calibration constants. The pre-pass brings the brightest
// material (99th percentile per channel) to 95% of full scale; gain the
// shutters cannot deliver is folded into the post-scan boost.
const EXPOSURE_PERCENTILE: u64 = 99;
const EXPOSURE_TARGET_NUM: u64 = 95;
const EXPOSURE_TARGET_DEN: u64 = 100;
const EXPOSURE_BOOST_LIMIT: u64 = 4096;
const EXPOSURE_HIST_BINS: usize = 1024;

/// CCD line shift for a given readout density
pub fn shift_for_lpi(lpi: u16) -> u8 {
    match lpi {
        500 => 1,
        1000 => 2,
        2000 => 4,
        4000 => 8,
        // 160 lpi needs no alignment; unknown densities are treated the
        // same rather than guessing a shift
        _ => 0,
    }
}

// ============================================================================
// Scan buffer
// ============================================================================

/// Raw frame data plus the geometry needed to interpret it
pub struct ScanBuffer {
    lines: u32,
    line_bytes: u32,
    bits_per_sample: u8,
    samples_per_pixel: u8,
    lines_per_inch: u16,
    left_to_right: bool,
    shift: u8,
    min: u16,
    max: u16,
    average: u16,
    data: Vec<u8>,
}

impl ScanBuffer {
    /// Allocate a zeroed buffer of exactly `lines * line_bytes` bytes.
    /// 14-bit input is normalised to 16 bits during deinterlace, so the
    /// recorded depth is already 16 for it.
    pub fn allocate(
        lines: u32,
        line_bytes: u32,
        in_mode: u8,
        lines_per_inch: u16,
        left_to_right: bool,
    ) -> Result<Self> {
        let size = lines as usize * line_bytes as usize;
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| ScannerError::OutOfMemory)?;
        data.resize(size, 0);

        Ok(Self {
            lines,
            line_bytes,
            bits_per_sample: if in_mode == 14 { 16 } else { in_mode },
            samples_per_pixel: 3,
            lines_per_inch,
            left_to_right,
            shift: shift_for_lpi(lines_per_inch),
            min: 0,
            max: 0,
            average: 0,
            data,
        })
    }

    pub fn lines(&self) -> u32 {
        self.lines
    }

    pub fn line_bytes(&self) -> u32 {
        self.line_bytes
    }

    pub fn bits_per_sample(&self) -> u8 {
        self.bits_per_sample
    }

    pub fn samples_per_pixel(&self) -> u8 {
        self.samples_per_pixel
    }

    pub fn lines_per_inch(&self) -> u16 {
        self.lines_per_inch
    }

    pub fn left_to_right(&self) -> bool {
        self.left_to_right
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    /// Smallest sample value observed during deinterlace
    pub fn sample_min(&self) -> u16 {
        self.min
    }

    /// Largest sample value observed during deinterlace
    pub fn sample_max(&self) -> u16 {
        self.max
    }

    /// Mean sample value observed during deinterlace
    pub fn sample_average(&self) -> u16 {
        self.average
    }

    /// Samples per line, counting all three channels
    pub fn line_entries(&self) -> usize {
        self.line_bytes as usize / self.bytes_per_sample()
    }

    fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize + 7) >> 3
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

// ============================================================================
// Deinterlace
// ============================================================================

/// Outcome of a deinterlace pass: sample correction accounting
#[derive(Debug, Clone, Copy, Default)]
pub struct DeinterlaceReport {
    pub underflows: u32,
    pub overflows: u32,
    pub worst_underflow: i32,
    /// Sample column of the worst underflow
    pub worst_column: usize,
    /// Channel (0 red, 1 green, 2 blue) of the worst underflow
    pub worst_channel: usize,
    pub worst_line: u32,
}

impl DeinterlaceReport {
    pub fn channel_name(&self) -> &'static str {
        match self.worst_channel {
            0 => "red",
            1 => "green",
            2 => "blue",
            _ => "?",
        }
    }

    /// Pixel index of the worst underflow, relative to the margin
    pub fn worst_pixel(&self, margin: u32) -> usize {
        self.worst_column.saturating_sub(margin as usize) / 3
    }
}

/// Align the three colour channels in place and optionally run the
/// per-column calibration over the samples.
///
/// The CCD reads the channels on lines offset by the lpi-dependent shift:
/// green trails by `shift` lines and the leading channel (red when
/// scanning left-to-right, blue otherwise) by `2 * shift`. Alignment
/// rewrites each sample `shift * line_entries` samples earlier, and the
/// image loses `2 * shift` lines.
pub fn deinterlace(
    buf: &mut ScanBuffer,
    params: &ScanParams,
    cal: &[CalEntry],
    apply_cal: bool,
) -> DeinterlaceReport {
    let line_ents = buf.line_entries();
    let shift = buf.shift as usize;
    let shift2 = shift * 2;

    let mut off = [0isize; 3];
    off[1] = -((shift * line_ents) as isize);
    if buf.left_to_right {
        off[0] = -((shift2 * line_ents) as isize);
    } else {
        off[2] = -((shift2 * line_ents) as isize);
    }
    buf.lines = buf.lines.saturating_sub(shift2 as u32);

    debug!(
        line_ents,
        shift,
        red = off[0],
        green = off[1],
        blue = off[2],
        "deinterlace offsets"
    );

    let mut report = DeinterlaceReport::default();
    let mut min = u16::MAX;
    let mut max = 0u16;
    let mut sum = 0u64;
    let mut samples = 0u64;

    let mut col = 0usize;
    let mut line = 0u32;
    let mut channel = 0usize;

    if buf.bits_per_sample > 8 {
        let limit = 0xFFFF_i64;
        let normalise = params.in_mode == 14;
        let margin = params.margin as usize;
        let total = buf.data.len() / 2;

        for idx in 0..total {
            let raw = u16::from_le_bytes([buf.data[2 * idx], buf.data[2 * idx + 1]]);
            let mut sample = raw as i64;
            if normalise {
                sample <<= 2;
            }
            min = min.min(sample as u16);
            max = max.max(sample as u16);
            sum += sample as u64;
            samples += 1;

            if apply_cal && col >= margin {
                if let Some(entry) = cal.get(col) {
                    sample += entry.offset as i64;
                    if sample < 0 {
                        if (sample as i32) < report.worst_underflow {
                            report.worst_underflow = sample as i32;
                            report.worst_column = col;
                            report.worst_channel = channel;
                            report.worst_line = line;
                        }
                        sample = 0;
                        report.underflows += 1;
                    } else {
                        sample = (sample * entry.mult as i64 + 8192) >> 14;
                        let boost = params.boost[channel] as i64;
                        if boost > 256 {
                            sample = (sample * boost) >> 8;
                        }
                        if sample > limit {
                            sample = limit;
                            report.overflows += 1;
                        }
                    }
                }
            }

            let dst = idx as isize + off[channel];
            if dst >= 0 {
                let d = dst as usize;
                buf.data[2 * d..2 * d + 2].copy_from_slice(&(sample as u16).to_le_bytes());
            }

            col += 1;
            if col == line_ents {
                col = 0;
                line += 1;
            }
            channel += 1;
            if channel == 3 {
                channel = 0;
            }
        }
    } else {
        // 8-bit data: alignment and statistics only
        let total = buf.data.len();
        for idx in 0..total {
            let sample = buf.data[idx];
            min = min.min(sample as u16);
            max = max.max(sample as u16);
            sum += sample as u64;
            samples += 1;

            let dst = idx as isize + off[channel];
            if dst >= 0 {
                buf.data[dst as usize] = sample;
            }

            col += 1;
            if col == line_ents {
                col = 0;
                line += 1;
            }
            channel += 1;
            if channel == 3 {
                channel = 0;
            }
        }
    }

    buf.min = min;
    buf.max = max;
    buf.average = if samples > 0 { (sum / samples) as u16 } else { 0 };

    report
}

// ============================================================================
// Bulk read chunking
// ============================================================================

/// Size of the next bulk read: at most 64 KiB, always a whole number of
/// lines, and never more than is left.
pub(crate) fn bulk_chunk_len(remaining: usize, line_bytes: usize) -> usize {
    let capped = MAX_BULK_CHUNK.min(remaining);
    (capped / line_bytes) * line_bytes
}

// ============================================================================
// Exposure calibration
// ============================================================================

/// Shutter, boost and speed derived from the pre-pass histogram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExposureSettings {
    pub shutter: [u16; 3],
    pub boost: [u16; 3],
    pub speed: u8,
}

/// Derive per-channel exposure from a pre-pass buffer.
///
/// For each channel the 99th-percentile sample is mapped to 95% of full
/// scale. When the shutter alone cannot deliver the wanted gain the scan
/// speed steps down (each step roughly doubling the light gathered) and
/// any remainder becomes post-scan boost.
pub(crate) fn calibrate_exposure(buf: &ScanBuffer, params: &ScanParams) -> ExposureSettings {
    let full_scale: u64 = if buf.bits_per_sample > 8 { 0xFFFF } else { 0xFF };
    let target = full_scale * EXPOSURE_TARGET_NUM / EXPOSURE_TARGET_DEN;
    let bin_width = ((full_scale as usize + 1) / EXPOSURE_HIST_BINS).max(1);

    let mut hist = [[0u64; EXPOSURE_HIST_BINS]; 3];
    let mut counts = [0u64; 3];

    if buf.bits_per_sample > 8 {
        let normalise = params.in_mode == 14;
        for (idx, word) in buf.data.chunks_exact(2).enumerate() {
            let mut sample = u16::from_le_bytes([word[0], word[1]]) as usize;
            if normalise {
                sample <<= 2;
            }
            let channel = idx % 3;
            hist[channel][(sample / bin_width).min(EXPOSURE_HIST_BINS - 1)] += 1;
            counts[channel] += 1;
        }
    } else {
        for (idx, byte) in buf.data.iter().enumerate() {
            let channel = idx % 3;
            hist[channel][(*byte as usize / bin_width).min(EXPOSURE_HIST_BINS - 1)] += 1;
            counts[channel] += 1;
        }
    }

    // 8.8 fixed-point gain still wanted per channel
    let mut gain_fp = [256u64; 3];
    for channel in 0..3 {
        let p99 = percentile(&hist[channel], counts[channel], bin_width).max(1);
        gain_fp[channel] = (target * 256) / p99;
    }

    // Slow down before boosting: longer exposure is noise-free gain.
    let mut speed = params.speed.max(1);
    let shutters_fit = |gain: &[u64; 3], p: &ScanParams| {
        (0..3).all(|c| (p.shutter[c] as u64 * gain[c]) >> 8 <= p.max_shutter as u64)
    };
    while speed > 1 && !shutters_fit(&gain_fp, params) {
        speed -= 1;
        for gain in &mut gain_fp {
            *gain = (*gain).div_ceil(2);
        }
    }

    let mut shutter = [0u16; 3];
    let mut boost = [0u16; 3];
    for channel in 0..3 {
        let want = (params.shutter[channel] as u64 * gain_fp[channel] + 128) >> 8;
        let achieved = want.min(params.max_shutter as u64).max(1);
        shutter[channel] = achieved as u16;
        boost[channel] = if want > achieved {
            ((want * 256) / achieved).min(EXPOSURE_BOOST_LIMIT) as u16
        } else {
            params.boost[channel].max(256)
        };
    }

    ExposureSettings {
        shutter,
        boost,
        speed,
    }
}

/// Upper edge of the histogram bin holding the wanted percentile
fn percentile(hist: &[u64], count: u64, bin_width: usize) -> u64 {
    if count == 0 {
        return 0;
    }
    let threshold = count * EXPOSURE_PERCENTILE / 100;
    let mut seen = 0u64;
    for (bin, population) in hist.iter().enumerate() {
        seen += population;
        if seen >= threshold {
            return ((bin + 1) * bin_width - 1) as u64;
        }
    }
    (hist.len() * bin_width - 1) as u64
}

// ============================================================================
// Frame acquisition
// ============================================================================

impl<P: UsbPipe> Session<P> {
    /// Acquire one frame. The unit is reserved for the duration and the
    /// release path (frame 0, carriage home, LED off, release) runs on
    /// every exit. On success the frame is available from
    /// [`Session::scan_buffer`] until acknowledged or cancelled.
    pub fn scan_frame(&mut self, frame: u8, auto_exposure: bool) -> Result<()> {
        if self.state != ScanState::Idle {
            return Err(ScannerError::Protocol(
                "a scan is already in progress".into(),
            ));
        }
        self.abort_flag().clear();
        self.state = ScanState::Armed;
        self.feedback(&format!("Scan frame {}", frame + 1));

        if let Err(err) = self.scanner.reserve_unit() {
            self.state = ScanState::Idle;
            return Err(err);
        }

        let result = self.acquire_frame(frame, auto_exposure);
        if result.is_err() && self.check_abort() {
            // drop the device-side operation before releasing
            let _ = self.scanner.cancel();
        }
        let released = self.run_release_path();

        match (result, released) {
            (Ok(()), Ok(())) => {
                self.state = ScanState::Drained;
                self.feedback("Done");
                Ok(())
            }
            (Ok(()), Err(err)) => {
                self.buffer = None;
                self.state = ScanState::Cancelled;
                Err(err)
            }
            (Err(err), _) => {
                self.buffer = None;
                self.state = ScanState::Cancelled;
                if self.check_abort() {
                    Err(ScannerError::Cancelled)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// The fixed exit sequence. Every step is attempted even when an
    /// earlier one fails; the first failure is reported.
    fn run_release_path(&mut self) -> Result<()> {
        let frame = self.set_frame(FRAME_R2L);
        let home = self.scanner.move_position(axis::CARRIAGE, 0, 0);
        let led = self.scanner.control_led(led::OFF);
        let release = self.scanner.release_unit();
        frame.and(home).and(led).and(release)
    }

    fn acquire_frame(&mut self, frame: u8, auto_exposure: bool) -> Result<()> {
        self.scanner.control_led(led::BLINK)?;
        self.scanner.test_unit_ready()?;
        self.film = self.scanner.get_film_status()?;

        let offset = match self.film.holder_type() {
            holder_type::NEGATIVE => {
                NEGATIVE_FRAME_OFFSETS
                    .get(frame as usize)
                    .copied()
                    .ok_or_else(|| {
                        ScannerError::Protocol(format!(
                            "frame {frame} out of range for a negative holder"
                        ))
                    })?
            }
            holder_type::SLIDE => SLIDE_FRAME_OFFSETS
                .get(frame as usize)
                .copied()
                .ok_or_else(|| {
                    ScannerError::Protocol(format!("frame {frame} out of range for a slide tray"))
                })?,
            _ => {
                self.feedback("No film holder");
                self.scanner.set_lamp(false, false)?;
                return Err(ScannerError::NoFilmHolder);
            }
        };

        self.lamp_on(LAMP_WARMUP_SECS)?;
        self.ensure_not_aborted()?;

        self.set_frame(FRAME_R2L)?; // re-arms the home sensor
        self.scanner.move_position(axis::CARRIAGE, 0, 0)?;
        self.scanner
            .move_position(axis::HOLDER, HOLDER_MOVE_MODE, offset - FOCUS_BACKOFF)?;
        self.ensure_not_aborted()?;

        self.feedback("Focussing");
        self.program_scan_mode(FOCUS_SPEED)?;
        self.scanner
            .execute_afae(1, 0, 0, 0, FOCUS_WINDOW.0, FOCUS_WINDOW.1)?;
        self.ensure_not_aborted()?;
        self.scanner
            .move_position(axis::HOLDER, HOLDER_MOVE_MODE, offset)?;

        let mut frame_code = FRAME_R2L;
        if auto_exposure {
            self.exposure_prepass()?;
            frame_code = FRAME_L2R;
        }
        self.set_frame(frame_code)?;

        self.feedback(&format!(
            "Frame {}, speed = {}, red = {}, green = {}, blue = {}",
            frame + 1,
            self.params.speed,
            self.params.shutter[0],
            self.params.shutter[1],
            self.params.shutter[2]
        ));
        self.program_scan_mode(self.params.speed)?;
        self.program_window(
            SCAN_RESOLUTION,
            SCAN_RESOLUTION,
            0,
            0,
            SCAN_WIDTH,
            SCAN_HEIGHT,
        )?;
        self.ensure_not_aborted()?;

        self.feedback("Reading");
        self.scanner.scan()?;
        let (lines, line_bytes) = self.scanner.get_data_status()?;
        let mut buffer = ScanBuffer::allocate(
            lines,
            line_bytes,
            self.params.in_mode,
            SCAN_RESOLUTION,
            frame_code & 0x01 != 0,
        )?;
        self.read_scan_data(&mut buffer)?;

        let report = deinterlace(&mut buffer, &self.params, &self.cal, true);
        if report.underflows > 0 {
            self.feedback(&format!(
                "Underflows = {} (worst = {} at {} {} on line {})",
                report.underflows,
                report.worst_underflow,
                report.worst_pixel(self.params.margin),
                report.channel_name(),
                report.worst_line
            ));
        }
        if report.overflows > 0 {
            self.feedback(&format!("Overflows = {}", report.overflows));
        }

        self.buffer = Some(buffer);
        Ok(())
    }

    /// Low-resolution pass feeding the exposure calculator. Leaves the
    /// updated shutter/boost/speed in the session parameters.
    fn exposure_prepass(&mut self) -> Result<()> {
        self.feedback("Measuring exposure");
        self.program_scan_mode(self.params.auto_exp)?;
        self.program_window(
            SCAN_RESOLUTION,
            PREPASS_Y_RESOLUTION,
            0,
            0,
            SCAN_WIDTH,
            SCAN_HEIGHT,
        )?;
        self.scanner.scan()?;
        let (lines, line_bytes) = self.scanner.get_data_status()?;
        let mut buffer = ScanBuffer::allocate(
            lines,
            line_bytes,
            self.params.in_mode,
            PREPASS_Y_RESOLUTION,
            false,
        )?;
        self.read_scan_data(&mut buffer)?;
        self.state = ScanState::Armed;

        let exposure = calibrate_exposure(&buffer, &self.params);
        self.feedback(&format!(
            "Exposure: speed = {}, red = {}, green = {}, blue = {}",
            exposure.speed, exposure.shutter[0], exposure.shutter[1], exposure.shutter[2]
        ));
        self.params.shutter = exposure.shutter;
        self.params.boost = exposure.boost;
        self.params.speed = exposure.speed;
        Ok(())
    }

    /// Stream the scan into the buffer in line-aligned chunks, checking
    /// the abort flag between transfers.
    fn read_scan_data(&mut self, buffer: &mut ScanBuffer) -> Result<()> {
        self.state = ScanState::Reading;
        let line_bytes = buffer.line_bytes() as usize;
        if line_bytes == 0 || line_bytes > MAX_BULK_CHUNK {
            return Err(ScannerError::Protocol(format!(
                "line stride of {line_bytes} bytes unusable for bulk reads"
            )));
        }

        let total = buffer.data().len();
        let mut done = 0usize;
        while done < total {
            self.ensure_not_aborted()?;
            let chunk = bulk_chunk_len(total - done, line_bytes);
            debug!(done, total, chunk, "bulk read");
            self.scanner.read(&mut buffer.data_mut()[done..done + chunk])?;
            done += chunk;
        }
        Ok(())
    }
}
