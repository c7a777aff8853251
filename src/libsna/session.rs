//! Per-station, per-LU session state
//!
//! One `Station` exists for each secondary SDLC address attached to a line;
//! each station owns a fixed-capacity table of `LuSession` slots. Entries
//! are allocated once at IML and never freed; connect/disconnect and
//! session-control traffic reset and reuse the slots.

use log::debug;

use crate::libsdlc::LinkSequence;

/// Default number of stations on a line.
pub const MAX_STATIONS: usize = 2;
/// Default number of LU slots per station.
pub const MAX_LUS: usize = 4;

/// LU address fields start at 2; slot k answers to DAF k + 2.
pub const LU_ADDR_BASE: u8 = 2;

// `readylu` lifecycle stages. The stage steps down toward ACTIVE as the
// round-robin scan emits the lifecycle PIU each stage owes.
pub const READY_INACTIVE: u8 = 0;
pub const READY_ACTIVE: u8 = 1;
pub const READY_POWER_ON_PENDING: u8 = 2;
pub const READY_POWER_OFF_PENDING: u8 = 3;
pub const READY_UNBIND_PENDING: u8 = 4;

/// Pending chain/segmentation context for one LU.
///
/// The RH of the first (or only) segment is saved for building the eventual
/// response, and a response built while segments are still arriving waits
/// here until the last segment releases it.
#[derive(Debug, Clone, Default)]
pub struct ChainContext {
    pub saved_rh0: u8,
    pub saved_rh1: u8,
    /// Segments received so far, awaiting the last one
    pub assembly: Vec<u8>,
    pub pending_response: Option<Vec<u8>>,
}

/// One logical-unit slot.
#[derive(Debug, Clone, Default)]
pub struct LuSession {
    /// Lifecycle stage (see the READY_* constants)
    pub readylu: u8,
    /// ACTLU completed
    pub actlu: bool,
    /// BIND accepted and outstanding
    pub bindflag: bool,
    /// A definite response is outstanding for a data PIU we sent
    pub dri: bool,
    /// Mid-chain indicator
    pub chaining: bool,
    /// Destination address the host assigned to this LU
    pub daf_addr: u8,
    /// Per-LU PIU sequence counter (mod 65536)
    pub lu_lu_seqn: u16,
    /// Terminal-side connection present
    pub attached: bool,
    /// Saved RH / deferred response for an in-flight chain
    pub chain: ChainContext,
}

impl LuSession {
    /// Clear the transient per-connection fields when a terminal attaches.
    fn reset_for_attach(&mut self) {
        self.daf_addr = 0;
        self.bindflag = false;
        self.dri = false;
        self.chaining = false;
        self.chain = ChainContext::default();
    }

    /// Stamp the next PIU sequence number into a TH sequence field.
    pub fn next_sequence(&mut self) -> u16 {
        self.lu_lu_seqn = self.lu_lu_seqn.wrapping_add(1);
        self.lu_lu_seqn
    }
}

/// One secondary station: link sequence state plus its LU table.
#[derive(Debug)]
pub struct Station {
    /// Station number on the line (index into the arena)
    pub number: usize,
    /// Secondary station address on the line
    pub address: u8,
    /// Link-level mod-8 sequence counters
    pub seq: LinkSequence,
    /// Own PU network address, learned from ACTPU
    pub pu_addr: u8,
    /// SSCP network address, learned from ACTLU
    pub sscp_addr: u8,
    /// Round-robin scan cursor for the RR poll
    pub last_lu: usize,
    lus: Vec<LuSession>,
}

impl Station {
    pub fn new(number: usize, address: u8, lu_count: usize) -> Self {
        Station {
            number,
            address,
            seq: LinkSequence::default(),
            pu_addr: 0,
            sscp_addr: 0,
            last_lu: 0,
            lus: vec![LuSession::default(); lu_count],
        }
    }

    pub fn lu_count(&self) -> usize {
        self.lus.len()
    }

    pub fn lu(&self, index: usize) -> Option<&LuSession> {
        self.lus.get(index)
    }

    pub fn lu_mut(&mut self, index: usize) -> Option<&mut LuSession> {
        self.lus.get_mut(index)
    }

    /// Resolve a TH destination address to an LU slot.
    pub fn lu_index_for_daf(&self, daf: u8) -> Option<usize> {
        let index = daf.checked_sub(LU_ADDR_BASE)? as usize;
        (index < self.lus.len()).then_some(index)
    }

    /// Mutable access to the LU slot a TH destination address names.
    pub fn lu_for_daf_mut(&mut self, daf: u8) -> Option<&mut LuSession> {
        let index = self.lu_index_for_daf(daf)?;
        self.lus.get_mut(index)
    }

    /// Reset everything for an initial machine load.
    pub fn iml(&mut self) {
        self.seq.reset();
        self.pu_addr = 0;
        self.sscp_addr = 0;
        self.last_lu = 0;
        for lu in &mut self.lus {
            *lu = LuSession::default();
        }
    }

    /// A terminal-side connection appeared on LU `index`.
    ///
    /// The slot's per-connection state resets. If the host already
    /// activated the LU, a power-on NOTIFY is now owed; otherwise the slot
    /// is simply ready for activation.
    pub fn lu_attached(&mut self, index: usize) {
        if let Some(lu) = self.lus.get_mut(index) {
            lu.reset_for_attach();
            lu.attached = true;
            lu.readylu = if lu.actlu { READY_POWER_ON_PENDING } else { READY_ACTIVE };
            debug!("LU {index:02X} attached, readylu={}", lu.readylu);
        }
    }

    /// The terminal-side connection on LU `index` went away.
    ///
    /// An activated LU owes the host a power-off NOTIFY, preceded by a
    /// TERMSELF when a BIND is still outstanding; an inactive LU just goes
    /// back to the free pool.
    pub fn lu_detached(&mut self, index: usize) {
        if let Some(lu) = self.lus.get_mut(index) {
            lu.attached = false;
            if lu.actlu {
                lu.readylu = if lu.bindflag { READY_UNBIND_PENDING } else { READY_POWER_OFF_PENDING };
            } else {
                lu.readylu = READY_INACTIVE;
            }
            debug!("LU {index:02X} detached, readylu={}", lu.readylu);
        }
    }
}

/// The arena of stations on one line.
#[derive(Debug)]
pub struct SessionTable {
    stations: Vec<Station>,
}

impl SessionTable {
    /// Build the arena for the given station addresses. Slots are never
    /// added or removed afterwards.
    pub fn new(addresses: &[u8], lus_per_station: usize) -> Self {
        SessionTable {
            stations: addresses
                .iter()
                .enumerate()
                .map(|(number, &addr)| Station::new(number, addr, lus_per_station))
                .collect(),
        }
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn station(&self, index: usize) -> Option<&Station> {
        self.stations.get(index)
    }

    pub fn station_mut(&mut self, index: usize) -> Option<&mut Station> {
        self.stations.get_mut(index)
    }

    /// Resolve a frame address byte to a station index. The broadcast
    /// address maps to the default station.
    pub fn station_index_for_address(&self, address: u8) -> Option<usize> {
        let address = if address == crate::libsdlc::ADDR_BROADCAST {
            crate::libsdlc::ADDR_DEFAULT_STATION
        } else {
            address
        };
        let index = (address & 0x0F).checked_sub(1)? as usize;
        (index < self.stations.len()).then_some(index)
    }

    /// Mutable access to the station a frame address byte names.
    pub fn station_for_address(&mut self, address: u8) -> Option<&mut Station> {
        let index = self.station_index_for_address(address)?;
        self.stations.get_mut(index)
    }

    /// Initial machine load: reset every station and LU slot.
    pub fn iml(&mut self) {
        for station in &mut self.stations {
            station.iml();
        }
    }
}
