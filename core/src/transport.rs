//! SCSI command execution over the vendor USB pipe.
//!
//! One command is a control transfer carrying the opcode in `wValue`, an
//! optional data phase, a 4-byte status read and, when the status block
//! flags it, a 14-byte sense read. The CDB itself never crosses the wire:
//! only its opcode (and for a few opcodes one parameter byte) is encoded in
//! `wValue`, and commands without a data phase send a short synthetic
//! payload the device expects instead.

use tracing::{debug, warn};

use crate::scsi::{SenseData, opcode};
use crate::types::{Result, ScannerError};
use crate::usb::UsbPipe;

/// `wValue` of the 4-byte status read that ends every command
pub const STATUS_WVALUE: u16 = (opcode::GET_STATUS as u16) << 8;
/// `wValue` of the 14-byte sense read issued after a flagged status
pub const SENSE_WVALUE: u16 = (opcode::REQUEST_SENSE as u16) << 8;

/// Data phase of one command
pub enum DataPhase<'a> {
    /// No payload; the transport substitutes the per-opcode dummy buffer
    None,
    /// Host receives a block
    In(&'a mut [u8]),
    /// Host sends a block
    Out(&'a [u8]),
}

/// Execute one command: command phase, optional data phase, status phase
/// and conditional sense phase.
pub fn exec_scsi<P: UsbPipe>(pipe: &P, cdb: &[u8], data: DataPhase<'_>) -> Result<()> {
    let op = cdb[0];
    let value = command_wvalue(cdb);
    debug!("scsi command {op:#04x}, wValue {value:#06x}");

    if op == opcode::READ {
        // The read opcode never carries its payload over the control pipe:
        // the 3-byte requested length goes out as the command transfer and
        // the data arrives on the bulk endpoint.
        pipe.control_out(value, &cdb[6..9])?;
        if let DataPhase::In(buf) = data {
            let got = pipe.bulk_in(buf)?;
            if got != buf.len() {
                return Err(ScannerError::ShortTransfer {
                    expected: buf.len(),
                    got,
                });
            }
        }
    } else {
        match data {
            DataPhase::In(buf) if !buf.is_empty() => {
                let got = pipe.control_in(value, buf)?;
                if got != buf.len() {
                    return Err(ScannerError::ShortTransfer {
                        expected: buf.len(),
                        got,
                    });
                }
            }
            DataPhase::Out(buf) if !buf.is_empty() => {
                pipe.control_out(value, buf)?;
            }
            _ => {
                let mut scratch = [0u8; 1];
                pipe.control_out(value, dummy_payload(cdb, &mut scratch))?;
            }
        }
    }

    let mut status = [0u8; 4];
    let got = pipe.control_in(STATUS_WVALUE, &mut status)?;
    if got != status.len() {
        return Err(ScannerError::ShortTransfer {
            expected: status.len(),
            got,
        });
    }

    if !echo_acceptable(op, status[0]) {
        warn!(
            "status phase echoed {:#04x} for command {op:#04x}",
            status[0]
        );
    }

    if status[1] & 0xFF != 0 {
        let mut raw = [0u8; SenseData::SIZE];
        let got = pipe.control_in(SENSE_WVALUE, &mut raw)?;
        if got != raw.len() {
            return Err(ScannerError::ShortTransfer {
                expected: raw.len(),
                got,
            });
        }
        let sense = SenseData::from_bytes(raw);
        debug!(
            key = sense.key(),
            asc = sense.asc(),
            ascq = sense.ascq(),
            "check condition"
        );
        return Err(sense.into_error());
    }

    Ok(())
}

/// `wValue` for the command transfer: opcode in the high byte, plus one
/// CDB parameter byte for inquiry and get-scan-mode.
pub(crate) fn command_wvalue(cdb: &[u8]) -> u16 {
    let mut value = (cdb[0] as u16) << 8;
    if cdb.len() > 2 && (cdb[0] == opcode::INQUIRY || cdb[0] == opcode::GET_SCAN_MODE) {
        value |= cdb[2] as u16;
    }
    value
}

/// Synthetic payload sent for commands without a data phase. A few opcodes
/// smuggle their CDB parameter bytes through here; the rest send one byte.
pub(crate) fn dummy_payload<'a>(cdb: &'a [u8], scratch: &'a mut [u8; 1]) -> &'a [u8] {
    match cdb[0] {
        opcode::TEST_UNIT_READY | opcode::RESERVE_VENDOR => {
            scratch[0] = 0x01;
            &scratch[..]
        }
        opcode::CONTROL_LED => &cdb[1..6],
        opcode::SET_FRAME => &cdb[2..4],
        opcode::SET_LAMP => &cdb[1..2],
        _ => {
            scratch[0] = 0x00;
            &scratch[..]
        }
    }
}

// Reserve and release echo zero on this hardware; anything else echoing a
// foreign opcode is logged upstream.
fn echo_acceptable(op: u8, echo: u8) -> bool {
    echo == op || (echo == 0 && (op == opcode::RESERVE_UNIT || op == opcode::RELEASE_UNIT))
}
