//! Line controller
//!
//! Wires one line together: the scanner thread driving the PCF automaton
//! and the bridge thread moving bytes between the upstream endpoint and the
//! line control block. The two meet only through the LCB table and the
//! register bank's interrupt handshake, the same way the rest of the
//! machine communicates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info};
use once_cell::sync::Lazy;

use crate::channel::LineEndpoint;
use crate::config::Config;
use crate::error::{Cc3705Error, LineError};
use crate::libsdlc::FLAG;
use crate::libsna::SessionTable;
use crate::registers::{Direction, RegisterBank, INT_L2, REG_INTERRUPT};
use crate::scanner::{LineMode, LineScanner, LineTable, LineType, ScanState};
use crate::terminal::{ChannelTerminalLink, TerminalEvent};

/// Byte written upstream when an exchange produced no response, so the
/// peer's read loop keeps moving. Decoders treat it as modem clocking.
const SYNC_BYTE: u8 = 0x00;

/// Poll interval for the bridge's PDF handshake loops.
const BRIDGE_POLL: Duration = Duration::from_micros(200);

/// Process-wide IML timestamp, fixed when the first line comes up.
static IML_TIME: Lazy<chrono::DateTime<chrono::Local>> = Lazy::new(chrono::Local::now);

/// A running controller: thread handles plus the channels the (external)
/// terminal side uses to reach the core.
pub struct ControllerHandle {
    /// Terminal-side events into the core
    pub terminal_events: Sender<TerminalEvent>,
    /// Reassembled 3270 payloads out of the core, tagged (station, lu)
    pub terminal_output: Receiver<(usize, usize, Vec<u8>)>,
    /// Shared session state, kept across line outages
    pub sessions: Arc<Mutex<SessionTable>>,
    /// The line-control word table
    pub lines: Arc<LineTable>,
    /// The register bank
    pub bank: Arc<RegisterBank>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl ControllerHandle {
    /// Stop the line threads and wait for them.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Bring up line 0: IML the session table, connect the upstream endpoint,
/// and start the scanner and bridge threads.
pub fn start(config: &Config) -> Result<ControllerHandle, Cc3705Error> {
    config.validate()?;

    let bank = Arc::new(RegisterBank::new());
    let lines = Arc::new(LineTable::new(config.line_count, LineType::Sdlc8Bit));
    let sessions = Arc::new(Mutex::new(SessionTable::new(
        &config.station_addresses,
        config.lus_per_station,
    )));
    {
        let mut table = match sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.iml();
        info!(
            "IML at {}: {} station(s), {} LU slots each",
            IML_TIME.format("%Y-%m-%d %H:%M:%S"),
            table.station_count(),
            config.lus_per_station
        );
    }

    let (event_tx, event_rx) = mpsc::channel();
    let (output_tx, output_rx) = mpsc::channel();
    let terminal = ChannelTerminalLink::new(
        event_rx,
        output_tx,
        config.station_addresses.len(),
        config.lus_per_station,
    );

    let mut endpoint = LineEndpoint::new(config.line_host.clone(), config.line_port);
    if endpoint.connect().is_err() {
        endpoint.reconnect().map_err(Cc3705Error::Line)?;
    }

    let running = Arc::new(AtomicBool::new(true));

    let mut scanner = LineScanner::new(
        0,
        Arc::clone(&lines),
        Arc::clone(&bank),
        Arc::clone(&sessions),
        terminal,
        config.ack_timeout(),
    );
    let scan_interval = config.scan_interval();
    let scanner_running = Arc::clone(&running);
    let scanner_thread = thread::Builder::new()
        .name("scanner-0".to_string())
        .spawn(move || {
            info!("scanner thread started");
            while scanner_running.load(Ordering::Relaxed) {
                if let Err(e) = scanner.cycle() {
                    error!("scanner stopped: {e}");
                    break;
                }
                thread::sleep(scan_interval);
            }
        })
        .map_err(|e| Cc3705Error::Line(LineError::Io(e)))?;

    let bridge = ChannelBridge {
        line: 0,
        lines: Arc::clone(&lines),
        bank: Arc::clone(&bank),
        endpoint,
        running: Arc::clone(&running),
        exchange_timeout: config.ack_timeout(),
    };
    let bridge_thread = thread::Builder::new()
        .name("bridge-0".to_string())
        .spawn(move || bridge.run())
        .map_err(|e| Cc3705Error::Line(LineError::Io(e)))?;

    Ok(ControllerHandle {
        terminal_events: event_tx,
        terminal_output: output_rx,
        sessions,
        lines,
        bank,
        running,
        threads: vec![scanner_thread, bridge_thread],
    })
}

/// One step of the bridge's PDF handshake while collecting a response.
enum CollectStep {
    Byte(u8),
    Done,
    Wait,
}

/// Moves bytes between the upstream endpoint and the scanner: host bytes go
/// in through the transmit states one at a time, the turnaround is
/// commanded, and the engine's response is collected back out of the
/// receive states.
struct ChannelBridge {
    line: usize,
    lines: Arc<LineTable>,
    bank: Arc<RegisterBank>,
    endpoint: LineEndpoint,
    running: Arc<AtomicBool>,
    exchange_timeout: Duration,
}

impl ChannelBridge {
    fn run(mut self) {
        info!("bridge thread started");
        let mut buf = [0u8; 16384];
        while self.running.load(Ordering::Relaxed) {
            match self.endpoint.read_some(&mut buf) {
                Ok(0) => {
                    self.ack_interrupt();
                }
                Ok(n) => {
                    if let Err(e) = self.exchange(&buf[..n]) {
                        error!("line exchange failed: {e}");
                        self.lines.command(self.line, ScanState::Idle);
                        if matches!(e, LineError::Disconnected { .. }) {
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("line lost: {e}");
                    break;
                }
            }
        }
        info!("bridge thread stopped");
    }

    /// Acknowledge a pending scanner interrupt.
    fn ack_interrupt(&self) {
        let _ = self.bank.clear_bits(Direction::Input, REG_INTERRUPT, INT_L2);
    }

    /// One full half-duplex exchange: transmit the received bytes into the
    /// scanner, turn the line around, and send the response (or a sync
    /// byte) back upstream.
    fn exchange(&mut self, bytes: &[u8]) -> Result<(), LineError> {
        self.lines.command(self.line, ScanState::TransmitInitial);
        for &byte in bytes {
            self.feed_byte(byte)?;
        }
        // The last byte must land in the frame buffer before the line can
        // turn around.
        self.await_pdf_empty()?;
        self.lines.command(self.line, ScanState::TransmitTurnaround);

        let response = self.collect_response()?;
        if response.is_empty() {
            self.endpoint.write_all(&[SYNC_BYTE])?;
        } else {
            // The monitor state absorbed the opening flag; regenerate it.
            let mut wire = Vec::with_capacity(response.len() + 1);
            wire.push(FLAG);
            wire.extend_from_slice(&response);
            self.endpoint.write_all(&wire)?;
        }
        self.lines.command(self.line, ScanState::Idle);
        Ok(())
    }

    /// Hand one byte to the scanner through the parallel data field.
    fn feed_byte(&mut self, byte: u8) -> Result<(), LineError> {
        let deadline = Instant::now() + self.exchange_timeout;
        loop {
            let fed = self
                .lines
                .with_line(self.line, |lcb| {
                    if lcb.pdf_full {
                        false
                    } else {
                        lcb.pending_byte = byte;
                        lcb.pdf_full = true;
                        true
                    }
                })
                .unwrap_or(false);
            self.ack_interrupt();
            if fed {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LineError::Stalled { waited: self.exchange_timeout });
            }
            thread::sleep(BRIDGE_POLL);
        }
    }

    /// Wait until the scanner has consumed the byte in the parallel data
    /// field.
    fn await_pdf_empty(&mut self) -> Result<(), LineError> {
        let deadline = Instant::now() + self.exchange_timeout;
        loop {
            let empty = self
                .lines
                .with_line(self.line, |lcb| !lcb.pdf_full)
                .unwrap_or(true);
            self.ack_interrupt();
            if empty {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LineError::Stalled { waited: self.exchange_timeout });
            }
            thread::sleep(BRIDGE_POLL);
        }
    }

    /// Collect the response bytes the scanner delivers through the PDF
    /// until the line turns back around.
    fn collect_response(&mut self) -> Result<Vec<u8>, LineError> {
        let mut response = Vec::new();
        let deadline = Instant::now() + self.exchange_timeout;
        loop {
            let step = self
                .lines
                .with_line(self.line, |lcb| {
                    let receiving = matches!(
                        lcb.state,
                        ScanState::MonitorFlagBlock
                            | ScanState::MonitorFlag
                            | ScanState::ReceiveInhibited
                            | ScanState::Receive
                    );
                    if receiving && lcb.pdf_full {
                        lcb.pdf_full = false;
                        CollectStep::Byte(lcb.pending_byte)
                    } else if receiving && lcb.mode == LineMode::Transmit && !lcb.pdf_full {
                        CollectStep::Done
                    } else {
                        CollectStep::Wait
                    }
                })
                .unwrap_or(CollectStep::Done);
            self.ack_interrupt();
            match step {
                CollectStep::Byte(byte) => response.push(byte),
                CollectStep::Done => return Ok(response),
                CollectStep::Wait => {
                    if Instant::now() >= deadline {
                        return Err(LineError::Stalled { waited: self.exchange_timeout });
                    }
                    thread::sleep(BRIDGE_POLL);
                }
            }
        }
    }
}
