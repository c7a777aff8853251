//! Communication scanner: per-line discipline automaton
//!
//! Each line is sequenced by a 16-state primary control field (PCF)
//! automaton re-evaluated on a short polling interval. Transmit states move
//! host bytes one at a time through the line control block into the frame
//! buffer; the turnaround state hands the accumulated buffer to the PIU
//! engine; receive states feed the engine's response back one byte per
//! cycle. Every transition that needs host attention raises the level-2
//! interrupt bit in the register bank and waits for the acknowledgement.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};

use crate::error::{LineError, RegisterError};
use crate::libsdlc::{self, hex_dump, FrameFormat, PendingFrame, SdlcFramer, FLAG};
use crate::libsna::{PiuEngine, SessionTable};
use crate::registers::{
    Direction, RegisterBank, INT_L2, REG_ICW_LCD_PCF, REG_ICW_SCF_PDF, REG_INTERRUPT,
};
use crate::terminal::TerminalLink;

/// Primary control field: the line-discipline state code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanState {
    /// No-op; waits for an external command
    Idle = 0x0,
    /// Set mode: raise data-terminal-ready
    SetMode = 0x1,
    /// Monitor data-set-ready
    MonitorDsr = 0x2,
    /// Monitor ring-indicate or data-set-ready
    MonitorRing = 0x3,
    /// Monitor for an opening flag, DSR errors blocked
    MonitorFlagBlock = 0x4,
    /// Monitor for an opening flag, DSR errors allowed
    MonitorFlag = 0x5,
    /// Receive with data interrupts suppressed
    ReceiveInhibited = 0x6,
    /// Receive with data interrupts allowed
    Receive = 0x7,
    /// Transmit initial: raise request-to-send
    TransmitInitial = 0x8,
    /// Transmit normal
    Transmit = 0x9,
    /// Transmit normal with re-sync (byte-synchronous lines only)
    TransmitSync = 0xA,
    /// Transmit turnaround: drop request-to-send, process the frame
    TransmitTurnaround = 0xC,
    /// Transmit turnaround keeping request-to-send
    TransmitTurnaroundKeep = 0xD,
    /// Line disabled
    Disabled = 0xF,
}

impl ScanState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x0 => Some(ScanState::Idle),
            0x1 => Some(ScanState::SetMode),
            0x2 => Some(ScanState::MonitorDsr),
            0x3 => Some(ScanState::MonitorRing),
            0x4 => Some(ScanState::MonitorFlagBlock),
            0x5 => Some(ScanState::MonitorFlag),
            0x6 => Some(ScanState::ReceiveInhibited),
            0x7 => Some(ScanState::Receive),
            0x8 => Some(ScanState::TransmitInitial),
            0x9 => Some(ScanState::Transmit),
            0xA => Some(ScanState::TransmitSync),
            0xC => Some(ScanState::TransmitTurnaround),
            0xD => Some(ScanState::TransmitTurnaroundKeep),
            0xF => Some(ScanState::Disabled),
            _ => None,
        }
    }
}

/// Line code definer: which framer the line runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    /// SDLC, 8-bit characters
    Sdlc8Bit,
    /// Byte-synchronous EBCDIC (not serviced by this crate)
    BscEbcdic,
}

impl LineType {
    pub fn code(self) -> u8 {
        match self {
            LineType::Sdlc8Bit => 0x9,
            LineType::BscEbcdic => 0xC,
        }
    }
}

/// Line turnaround direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMode {
    Reset,
    Receive,
    Transmit,
}

// Control flag bits within the LCB.
pub const SCF_SERVICE_REQUEST: u8 = 0x40;
pub const SCF_DCD: u8 = 0x08;
pub const SCF_FLAG_DETECTED: u8 = 0x04;
pub const SCF_SYNC_DETECTED: u8 = 0x02;

/// Per-line control state, shared between the scanner and the channel
/// bridge under the line table lock.
#[derive(Debug)]
pub struct LineControlBlock {
    pub state: ScanState,
    pub state_new: ScanState,
    pub state_prev: ScanState,
    pub line_type: LineType,
    pub flags: u8,
    pub pending_byte: u8,
    /// Parallel data field occupancy: true while `pending_byte` holds an
    /// unconsumed byte
    pub pdf_full: bool,
    pub mode: LineMode,
}

impl LineControlBlock {
    pub fn new(line_type: LineType) -> Self {
        LineControlBlock {
            state: ScanState::Idle,
            state_new: ScanState::Idle,
            state_prev: ScanState::Idle,
            line_type,
            flags: 0,
            pending_byte: 0,
            pdf_full: false,
            mode: LineMode::Reset,
        }
    }

    /// Reset to idle on link reset; the block itself is never destroyed.
    pub fn reset(&mut self) {
        self.state = ScanState::Idle;
        self.state_new = ScanState::Idle;
        self.state_prev = ScanState::Idle;
        self.flags = 0;
        self.pending_byte = 0;
        self.pdf_full = false;
        self.mode = LineMode::Reset;
    }
}

/// The line-control word table and its lock.
#[derive(Debug)]
pub struct LineTable {
    lcbs: Mutex<Vec<LineControlBlock>>,
}

impl LineTable {
    pub fn new(line_count: usize, line_type: LineType) -> Self {
        LineTable {
            lcbs: Mutex::new((0..line_count).map(|_| LineControlBlock::new(line_type)).collect()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<LineControlBlock>> {
        match self.lcbs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run `f` against one line's control block under the table lock.
    pub fn with_line<R>(&self, line: usize, f: impl FnOnce(&mut LineControlBlock) -> R) -> Option<R> {
        let mut lcbs = self.lock();
        lcbs.get_mut(line).map(f)
    }

    /// Command a line into a new discipline state (the host side's way of
    /// driving the automaton).
    pub fn command(&self, line: usize, state: ScanState) {
        self.with_line(line, |lcb| {
            lcb.state_new = state;
        });
    }
}

/// The scanner for one line: owns the frame buffers, the framer, the PIU
/// engine and the terminal link; shares the LCB table, register bank and
/// session table with the rest of the machine.
pub struct LineScanner<T: TerminalLink> {
    line: usize,
    lines: Arc<LineTable>,
    bank: Arc<RegisterBank>,
    sessions: Arc<Mutex<SessionTable>>,
    terminal: T,
    framer: SdlcFramer,
    engine: PiuEngine,
    /// Host -> engine bytes accumulated during transmit states
    req_buf: Vec<u8>,
    /// Engine -> host bytes drained during receive states
    rsp_buf: Vec<u8>,
    rsp_pos: usize,
    rsp_filled: bool,
    /// Responses awaiting the poll that releases them
    queue: Vec<PendingFrame>,
    ack_timeout: Duration,
}

impl<T: TerminalLink> LineScanner<T> {
    pub fn new(
        line: usize,
        lines: Arc<LineTable>,
        bank: Arc<RegisterBank>,
        sessions: Arc<Mutex<SessionTable>>,
        terminal: T,
        ack_timeout: Duration,
    ) -> Self {
        LineScanner {
            line,
            lines,
            bank,
            sessions,
            terminal,
            framer: SdlcFramer::new(),
            engine: PiuEngine::new(),
            req_buf: Vec::new(),
            rsp_buf: Vec::new(),
            rsp_pos: 0,
            rsp_filled: false,
            queue: Vec::new(),
            ack_timeout,
        }
    }

    /// Number of responses waiting for a poll.
    pub fn queued_responses(&self) -> usize {
        self.queue.len()
    }

    /// One scan cycle: service terminal events, then advance the PCF
    /// automaton by one step.
    pub fn cycle(&mut self) -> Result<(), LineError> {
        self.terminal.pump();
        self.apply_attach_changes();

        let lines = Arc::clone(&self.lines);
        let mut want_interrupt = false;
        {
            let mut lcbs = lines.lock();
            let Some(lcb) = lcbs.get_mut(self.line) else {
                return Ok(());
            };

            // Carrier is always present on a leased line.
            lcb.flags |= SCF_DCD;

            // Pick up an externally commanded state.
            if lcb.state != lcb.state_new {
                if lcb.state_new == ScanState::Idle {
                    lcb.mode = LineMode::Reset;
                }
                lcb.state_prev = lcb.state;
                lcb.state = lcb.state_new;
            }
            let first_entry = lcb.state_prev != lcb.state;

            match lcb.state {
                ScanState::Idle => {
                    // Reset the check condition bits.
                    lcb.flags &= SCF_SERVICE_REQUEST | SCF_DCD | SCF_SYNC_DETECTED;
                }

                ScanState::SetMode | ScanState::MonitorDsr | ScanState::MonitorRing => {
                    if first_entry {
                        lcb.flags |= SCF_SERVICE_REQUEST;
                        lcb.state_new = ScanState::Idle;
                        want_interrupt = true;
                    }
                }

                ScanState::MonitorFlagBlock | ScanState::MonitorFlag => {
                    self.rsp_pos = 0;
                    if lcb.mode == LineMode::Receive && lcb.line_type == LineType::Sdlc8Bit {
                        lcb.flags &= !SCF_FLAG_DETECTED;
                        if self.rsp_filled && self.rsp_buf.first() == Some(&FLAG) {
                            lcb.flags |= SCF_FLAG_DETECTED;
                            lcb.state_new = ScanState::ReceiveInhibited;
                            want_interrupt = true;
                        }
                    }
                }

                ScanState::ReceiveInhibited => {
                    if !self.interrupt_pending()?
                        && lcb.line_type == LineType::Sdlc8Bit
                        && self.rsp_filled
                    {
                        if let Some(&byte) = self.rsp_buf.get(self.rsp_pos) {
                            self.rsp_pos += 1;
                            lcb.pending_byte = byte;
                            // The opening flag itself is not data.
                            if byte != FLAG {
                                lcb.flags |= SCF_SERVICE_REQUEST;
                                lcb.flags &= !SCF_FLAG_DETECTED;
                                lcb.pdf_full = true;
                                lcb.state_new = ScanState::Receive;
                                want_interrupt = true;
                            }
                        }
                    }
                }

                ScanState::Receive => {
                    if !self.interrupt_pending()?
                        && lcb.line_type == LineType::Sdlc8Bit
                        && !lcb.pdf_full
                        && self.rsp_filled
                    {
                        if let Some(&byte) = self.rsp_buf.get(self.rsp_pos) {
                            self.rsp_pos += 1;
                            lcb.pending_byte = byte;
                            lcb.pdf_full = true;
                            lcb.flags |= SCF_SERVICE_REQUEST;
                            if self.rsp_pos >= self.rsp_buf.len() {
                                // Closing flag delivered: the response is
                                // complete and the line turns around.
                                self.rsp_filled = false;
                                lcb.mode = LineMode::Transmit;
                                lcb.flags |= SCF_FLAG_DETECTED;
                                lcb.state_new = ScanState::ReceiveInhibited;
                            }
                            want_interrupt = true;
                        }
                    }
                }

                ScanState::TransmitInitial => {
                    if !self.interrupt_pending()? && lcb.line_type == LineType::Sdlc8Bit {
                        // Request-to-send is up; no interrupt for this one.
                        lcb.flags &= !SCF_FLAG_DETECTED;
                        lcb.state_new = ScanState::Transmit;
                    }
                }

                ScanState::Transmit => {
                    if !self.interrupt_pending()?
                        && lcb.line_type == LineType::Sdlc8Bit
                        && lcb.pdf_full
                    {
                        self.req_buf.push(lcb.pending_byte);
                        // Ask the host side for the next byte.
                        lcb.pdf_full = false;
                        lcb.flags |= SCF_SERVICE_REQUEST;
                        want_interrupt = true;
                    }
                }

                ScanState::TransmitSync => {
                    // Byte-synchronous lines only; nothing for SDLC.
                }

                ScanState::TransmitTurnaround => {
                    if first_entry && lcb.line_type == LineType::Sdlc8Bit {
                        let produced = self.turnaround();
                        lcb.mode = if produced { LineMode::Receive } else { LineMode::Transmit };
                        lcb.flags |= SCF_SERVICE_REQUEST;
                        lcb.state_new = ScanState::MonitorFlag;
                        want_interrupt = true;
                    }
                }

                ScanState::TransmitTurnaroundKeep => {
                    if first_entry {
                        lcb.state_new = ScanState::MonitorFlag;
                    }
                }

                ScanState::Disabled => {
                    lcb.flags |= SCF_SERVICE_REQUEST;
                    lcb.state_new = ScanState::Idle;
                    want_interrupt = true;
                }
            }

            lcb.state_prev = lcb.state;
            if lcb.state != lcb.state_new {
                lcb.state = lcb.state_new;
            }
            Self::mirror_icw(&self.bank, lcb)?;
        }

        if want_interrupt {
            self.request_interrupt()?;
        }
        Ok(())
    }

    /// Hand the accumulated transmit buffer to the PIU engine and stage
    /// whatever it answers. Returns true when response bytes are ready.
    fn turnaround(&mut self) -> bool {
        let request = std::mem::take(&mut self.req_buf);
        if request.is_empty() {
            return false;
        }
        debug!("line {}: BLU request, {} bytes\n{}", self.line, request.len(), hex_dump(&request));

        let sessions = Arc::clone(&self.sessions);
        let mut sessions = match sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let response = self.process_blu(&request, &mut sessions);
        if response.is_empty() {
            return false;
        }
        debug!("line {}: BLU response, {} bytes\n{}", self.line, response.len(), hex_dump(&response));
        self.rsp_buf = response;
        self.rsp_pos = 0;
        self.rsp_filled = true;
        true
    }

    /// Decode the request buffer into frames, run each through the engine,
    /// and flush the response batch when a poll releases it.
    fn process_blu(&mut self, bytes: &[u8], sessions: &mut SessionTable) -> Vec<u8> {
        let frames = match self.framer.decode_all(bytes) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("line {}: {e}; frame dropped, reject scheduled", self.line);
                self.queue.push(self.framer.nak_frame(libsdlc::ADDR_DEFAULT_STATION));
                return Vec::new();
            }
        };

        let mut saw_poll = false;
        for frame in &frames {
            if frame.poll() {
                saw_poll = true;
            }
            // Link-level receive accounting happens before the engine sees
            // the frame; an out-of-sequence I-frame is rejected whole.
            if let FrameFormat::Information { ns, .. } = frame.format() {
                if let Some(station) = sessions.station_for_address(frame.address) {
                    if let Err(e) = station.seq.accept_ns(ns) {
                        warn!("line {}: {e}; frame dropped, reject scheduled", self.line);
                        let address = station.address;
                        self.queue.push(self.framer.nak_frame(address));
                        continue;
                    }
                }
            }
            let queued = !self.queue.is_empty();
            match self.engine.process_frame(frame, sessions, &mut self.terminal, queued) {
                Ok(mut responses) => self.queue.append(&mut responses),
                Err(e) => warn!("line {}: PIU dropped: {e}", self.line),
            }
        }

        if saw_poll && !self.queue.is_empty() {
            self.flush_responses(sessions)
        } else {
            Vec::new()
        }
    }

    /// Stamp the queued batch with current sequence state and serialize it.
    fn flush_responses(&mut self, sessions: &mut SessionTable) -> Vec<u8> {
        let batch = std::mem::take(&mut self.queue);
        let last = batch.len().saturating_sub(1);
        let mut wire = Vec::new();
        for (i, frame) in batch.iter().enumerate() {
            match sessions.station_for_address(frame.address) {
                Some(station) => {
                    wire.extend(self.framer.stamp_frame(&mut station.seq, frame, i == last));
                }
                None => warn!(
                    "line {}: response for unknown station {:02X} discarded",
                    self.line, frame.address
                ),
            }
        }
        wire
    }

    /// Fold terminal attach/detach events into the session table.
    fn apply_attach_changes(&mut self) {
        while let Some((station, lu, attached)) = self.terminal.next_attach_change() {
            let sessions = Arc::clone(&self.sessions);
            let mut sessions = match sessions.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(st) = sessions.station_mut(station) {
                if attached {
                    st.lu_attached(lu);
                } else {
                    st.lu_detached(lu);
                }
            }
        }
    }

    fn interrupt_pending(&self) -> Result<bool, RegisterError> {
        self.bank.test_bits(Direction::Input, REG_INTERRUPT, INT_L2)
    }

    /// Raise the level-2 interrupt, waiting out an unacknowledged previous
    /// one first so the raise/acknowledge handshake never overruns.
    fn request_interrupt(&self) -> Result<(), LineError> {
        if self.interrupt_pending()? {
            self.bank
                .await_clear(Direction::Input, REG_INTERRUPT, INT_L2, self.ack_timeout)?;
        }
        self.bank.raise(Direction::Input, REG_INTERRUPT, INT_L2)?;
        Ok(())
    }

    /// Mirror the line's control block into the interface control words so
    /// the host side can observe it.
    fn mirror_icw(bank: &RegisterBank, lcb: &LineControlBlock) -> Result<(), RegisterError> {
        bank.write(
            Direction::Input,
            REG_ICW_SCF_PDF,
            (u32::from(lcb.flags) << 8) | u32::from(lcb.pending_byte),
        )?;
        bank.write(
            Direction::Input,
            REG_ICW_LCD_PCF,
            (u32::from(lcb.line_type.code()) << 12) | (u32::from(lcb.state.code()) << 8),
        )?;
        Ok(())
    }
}
