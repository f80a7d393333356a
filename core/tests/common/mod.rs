//! Test doubles standing in for the scanner.
//!
//! `SimPipe` replays a strict byte-for-byte script and panics on any
//! deviation; `CannedPipe` behaves like an attached device, answering
//! block reads from canned state and logging every transfer for sequence
//! assertions.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;

use filmscan_core::types::Result;
use filmscan_core::usb::UsbPipe;

// ============================================================================
// Strict scripted pipe
// ============================================================================

#[derive(Debug)]
pub enum Step {
    ControlIn { value: u16, reply: Vec<u8> },
    ControlOut { value: u16, expect: Vec<u8> },
    BulkIn { reply: Vec<u8> },
}

pub struct SimPipe {
    script: RefCell<VecDeque<Step>>,
}

impl SimPipe {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: RefCell::new(script.into()),
        }
    }

    /// Panics unless every scripted transfer was consumed
    pub fn assert_finished(&self) {
        let script = self.script.borrow();
        assert!(
            script.is_empty(),
            "{} scripted transfers left over",
            script.len()
        );
    }
}

impl UsbPipe for SimPipe {
    fn control_in(&self, value: u16, buf: &mut [u8]) -> Result<usize> {
        match self.script.borrow_mut().pop_front() {
            Some(Step::ControlIn { value: want, reply }) => {
                assert_eq!(value, want, "control-in wValue");
                let n = reply.len().min(buf.len());
                buf[..n].copy_from_slice(&reply[..n]);
                Ok(n)
            }
            other => panic!("unexpected control-in wValue {value:#06x}; script had {other:?}"),
        }
    }

    fn control_out(&self, value: u16, buf: &[u8]) -> Result<usize> {
        match self.script.borrow_mut().pop_front() {
            Some(Step::ControlOut { value: want, expect }) => {
                assert_eq!(value, want, "control-out wValue");
                assert_eq!(buf, expect.as_slice(), "control-out payload");
                Ok(buf.len())
            }
            other => panic!("unexpected control-out wValue {value:#06x}; script had {other:?}"),
        }
    }

    fn bulk_in(&self, buf: &mut [u8]) -> Result<usize> {
        match self.script.borrow_mut().pop_front() {
            Some(Step::BulkIn { reply }) => {
                let n = reply.len().min(buf.len());
                buf[..n].copy_from_slice(&reply[..n]);
                Ok(n)
            }
            other => panic!("unexpected bulk-in; script had {other:?}"),
        }
    }
}

/// Status phase answering with a clean echo of `op`
pub fn ok_status(op: u8) -> Step {
    Step::ControlIn {
        value: 0xC500,
        reply: vec![op, 0, 0, 0],
    }
}

// ============================================================================
// Canned device
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Out { value: u16, payload: Vec<u8> },
    In { value: u16, len: usize },
    Bulk { len: usize },
}

struct CannedState {
    last_op: u8,
    bulk_remaining: usize,
    log: Vec<LogEntry>,
}

/// A well-behaved scanner with configurable holder, lamp and geometry
pub struct CannedPipe {
    pub inquiry: [u8; 36],
    pub film: [u8; 40],
    pub lamp: [u8; 10],
    pub scan_mode: [u8; 56],
    pub window: [u8; 54],
    pub data_status: [u8; 12],
    /// When set, the status phase of this opcode reports pending sense
    /// (unit attention)
    pub sense_on: Option<u8>,
    state: RefCell<CannedState>,
}

impl CannedPipe {
    /// Negative holder, warm lamp, 20 lines of 120 bytes
    pub fn new() -> Self {
        Self {
            inquiry: inquiry_block(),
            film: film_status_block(1, 6),
            lamp: lamp_block(true, 3600),
            scan_mode: scan_mode_block(),
            window: window_block(),
            data_status: data_status_block(20, 120),
            sense_on: None,
            state: RefCell::new(CannedState {
                last_op: 0,
                bulk_remaining: 0,
                log: Vec::new(),
            }),
        }
    }

    /// Every control-out command transfer, in order: (wValue, payload)
    pub fn outs(&self) -> Vec<(u16, Vec<u8>)> {
        self.state
            .borrow()
            .log
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Out { value, payload } => Some((*value, payload.clone())),
                _ => None,
            })
            .collect()
    }

    /// Control-out payloads for one opcode, in order
    pub fn outs_for(&self, op: u8) -> Vec<Vec<u8>> {
        self.outs()
            .into_iter()
            .filter(|(value, _)| (value >> 8) as u8 == op)
            .map(|(_, payload)| payload)
            .collect()
    }

    pub fn log_len(&self) -> usize {
        self.state.borrow().log.len()
    }
}

impl UsbPipe for CannedPipe {
    fn control_in(&self, value: u16, buf: &mut [u8]) -> Result<usize> {
        let op = (value >> 8) as u8;
        let mut state = self.state.borrow_mut();
        state.log.push(LogEntry::In {
            value,
            len: buf.len(),
        });

        let reply: Vec<u8> = match op {
            0xC5 => {
                let flagged = self.sense_on == Some(state.last_op);
                vec![state.last_op, if flagged { 0x02 } else { 0 }, 0, 0]
            }
            0x03 => {
                let mut sense = vec![0u8; 14];
                sense[2] = 0x06; // unit attention
                sense
            }
            0x12 => self.inquiry.to_vec(),
            0x25 => self.window.to_vec(),
            0xD5 => self.scan_mode.to_vec(),
            0xD8 => self.film.to_vec(),
            0xD9 => self.data_status.to_vec(),
            0xDA => self.lamp.to_vec(),
            _ => vec![0; buf.len()],
        };
        if op != 0xC5 && op != 0x03 {
            state.last_op = op;
        }

        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn control_out(&self, value: u16, buf: &[u8]) -> Result<usize> {
        let op = (value >> 8) as u8;
        let mut state = self.state.borrow_mut();
        state.log.push(LogEntry::Out {
            value,
            payload: buf.to_vec(),
        });
        state.last_op = op;
        if op == 0x28 && buf.len() == 3 {
            state.bulk_remaining =
                ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | buf[2] as usize;
        }
        Ok(buf.len())
    }

    fn bulk_in(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        let n = buf.len().min(state.bulk_remaining);
        buf[..n].fill(0);
        state.bulk_remaining -= n;
        state.log.push(LogEntry::Bulk { len: n });
        Ok(n)
    }
}

// ============================================================================
// Block builders
// ============================================================================

pub fn inquiry_block() -> [u8; 36] {
    let mut raw = [b' '; 36];
    raw[..8].fill(0);
    raw[8..14].copy_from_slice(b"CANON ");
    raw[16..26].copy_from_slice(b"IX-40015G ");
    raw[32..36].copy_from_slice(b"1.02");
    raw
}

pub fn film_status_block(holder: u8, frames: u8) -> [u8; 40] {
    let mut raw = [0u8; 40];
    raw[0] = holder;
    raw[1] = frames;
    raw
}

pub fn lamp_block(on: bool, secs: u32) -> [u8; 10] {
    let mut raw = [0u8; 10];
    raw[0] = on as u8;
    raw[1..5].copy_from_slice(&secs.to_be_bytes());
    raw
}

pub fn scan_mode_block() -> [u8; 56] {
    let mut raw = [0u8; 56];
    raw[0] = 0x25;
    raw[4] = 0x20;
    raw[5] = 0x20;
    raw
}

pub fn window_block() -> [u8; 54] {
    let mut raw = [0u8; 54];
    raw[6..8].copy_from_slice(&46u16.to_be_bytes());
    raw
}

pub fn data_status_block(lines: u32, line_bytes: u32) -> [u8; 12] {
    let mut raw = [0u8; 12];
    raw[0..4].copy_from_slice(&lines.to_be_bytes());
    raw[4..8].copy_from_slice(&line_bytes.to_be_bytes());
    raw
}

pub fn sense_block(key: u8) -> Vec<u8> {
    let mut raw = vec![0u8; 14];
    raw[2] = key;
    raw
}
