//! Terminal-side collaborator seam
//!
//! The terminal side of the controller (telnet negotiation, EBCDIC
//! translation, 3270 datastream handling and connection acceptance) lives
//! outside this crate. The engine only needs three things from it: completed
//! input records per LU, a sink for reassembled 3270 output, and
//! attach/detach notifications, which the scanner folds into the session
//! table.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};

/// What the PIU engine needs from the terminal side. LUs are addressed by
/// station number and slot index within that station.
pub trait TerminalLink: Send {
    /// True when the LU has a completed input record waiting.
    fn has_pending_output(&self, station: usize, lu: usize) -> bool;

    /// Take the next completed input record for the LU.
    fn take_pending_output(&mut self, station: usize, lu: usize) -> Option<Vec<u8>>;

    /// Hand a reassembled 3270 payload (with its end-of-record marker) to
    /// the terminal side.
    fn forward3270(&mut self, station: usize, lu: usize, data: &[u8]);

    /// Service the link's event feed. Links without one do nothing.
    fn pump(&mut self) {}

    /// Next attach/detach change to fold into the session table.
    fn next_attach_change(&mut self) -> Option<(usize, usize, bool)> {
        None
    }
}

/// Terminal-side events delivered to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalEvent {
    /// A terminal connected to the LU.
    Attached { station: usize, lu: usize },
    /// The terminal on the LU went away.
    Detached { station: usize, lu: usize },
    /// Bytes arrived from the terminal; `end_of_record` marks the record
    /// boundary.
    Data { station: usize, lu: usize, bytes: Vec<u8>, end_of_record: bool },
}

/// Channel-backed [`TerminalLink`] implementation.
///
/// The terminal side pushes [`TerminalEvent`]s in; per-LU buffers assemble
/// bytes into records at the end-of-record boundary. Outbound 3270 payloads
/// go back over a plain byte channel tagged with the station and LU.
pub struct ChannelTerminalLink {
    events: Receiver<TerminalEvent>,
    outbound: Sender<(usize, usize, Vec<u8>)>,
    assembly: Vec<Vec<Vec<u8>>>,
    records: Vec<Vec<VecDeque<Vec<u8>>>>,
    attach_changes: VecDeque<(usize, usize, bool)>,
}

impl ChannelTerminalLink {
    pub fn new(
        events: Receiver<TerminalEvent>,
        outbound: Sender<(usize, usize, Vec<u8>)>,
        stations: usize,
        lus_per_station: usize,
    ) -> Self {
        ChannelTerminalLink {
            events,
            outbound,
            assembly: vec![vec![Vec::new(); lus_per_station]; stations],
            records: vec![vec![VecDeque::new(); lus_per_station]; stations],
            attach_changes: VecDeque::new(),
        }
    }

    fn in_range(&self, station: usize, lu: usize) -> bool {
        self.assembly.get(station).is_some_and(|s| lu < s.len())
    }
}

impl TerminalLink for ChannelTerminalLink {
    fn has_pending_output(&self, station: usize, lu: usize) -> bool {
        self.records
            .get(station)
            .and_then(|s| s.get(lu))
            .is_some_and(|q| !q.is_empty())
    }

    fn take_pending_output(&mut self, station: usize, lu: usize) -> Option<Vec<u8>> {
        self.records.get_mut(station)?.get_mut(lu)?.pop_front()
    }

    fn forward3270(&mut self, station: usize, lu: usize, data: &[u8]) {
        // A dropped receiver means the terminal side is gone; the session
        // lifecycle handles that through the detach event.
        let _ = self.outbound.send((station, lu, data.to_vec()));
    }

    /// Drain the event channel into the per-LU record buffers. Attach and
    /// detach events are queued for the scanner to apply to the session
    /// table.
    fn pump(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(TerminalEvent::Data { station, lu, bytes, end_of_record }) => {
                    if !self.in_range(station, lu) {
                        continue;
                    }
                    let buf = &mut self.assembly[station][lu];
                    buf.extend_from_slice(&bytes);
                    if end_of_record {
                        let record = std::mem::take(buf);
                        self.records[station][lu].push_back(record);
                    }
                }
                Ok(TerminalEvent::Attached { station, lu }) => {
                    if self.in_range(station, lu) {
                        self.assembly[station][lu].clear();
                        self.records[station][lu].clear();
                        self.attach_changes.push_back((station, lu, true));
                    }
                }
                Ok(TerminalEvent::Detached { station, lu }) => {
                    if self.in_range(station, lu) {
                        self.attach_changes.push_back((station, lu, false));
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn next_attach_change(&mut self) -> Option<(usize, usize, bool)> {
        self.attach_changes.pop_front()
    }
}
