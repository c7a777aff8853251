//! SNA FID2 PIU Engine
//!
//! Interprets the TH/RH/RU of frames arriving on the line, drives the
//! session table through the PU/LU activation lifecycle, reassembles
//! segmented and chained 3270 data for the terminal side, and builds the
//! response PIUs the host expects. Responses come back as unstamped pending
//! frames; the framer inserts sequence numbers when the poll releases them.

use log::{debug, warn};

use super::codes::*;
use super::piu::{build_piu, Piu, Segment, SessionCommand};
use super::session::{
    SessionTable, Station, LU_ADDR_BASE, READY_ACTIVE, READY_POWER_OFF_PENDING,
    READY_POWER_ON_PENDING, READY_UNBIND_PENDING,
};
use crate::error::SessionError;
use crate::libsdlc::{self, FrameFormat, PendingFrame, SdlcFrame};
use crate::terminal::TerminalLink;

/// The FID2 processor for one line.
#[derive(Debug, Default)]
pub struct PiuEngine;

impl PiuEngine {
    pub fn new() -> Self {
        PiuEngine
    }

    /// Process one inbound frame against the session table.
    ///
    /// `response_queued` tells the engine whether earlier responses are
    /// still waiting for the poll; an RR then polls for that batch rather
    /// than new work.
    pub fn process_frame(
        &mut self,
        frame: &SdlcFrame,
        sessions: &mut SessionTable,
        terminal: &mut dyn TerminalLink,
        response_queued: bool,
    ) -> Result<Vec<PendingFrame>, SessionError> {
        let station = sessions
            .station_for_address(frame.address)
            .ok_or(SessionError::UnknownStation { address: frame.address })?;

        match frame.format() {
            FrameFormat::Unnumbered { command, poll } => {
                Ok(Self::process_unnumbered(station, command, poll))
            }
            FrameFormat::Supervisory { function, .. } => {
                Ok(Self::process_supervisory(station, function, terminal, response_queued))
            }
            FrameFormat::Information { .. } => {
                self.process_iframe(station, &frame.payload, terminal)
            }
        }
    }

    /// SNRM resets the link sequence state; SNRM/DISC answer UA and XID
    /// answers the station identification block. Without the Poll bit the
    /// command is absorbed silently.
    fn process_unnumbered(station: &mut Station, command: u8, poll: bool) -> Vec<PendingFrame> {
        let address = station.address;
        match command {
            libsdlc::SNRM => {
                debug!("station {address:02X}: SNRM, sequence counters reset");
                station.seq.reset();
                if poll {
                    vec![PendingFrame::unnumbered(address, libsdlc::UA, Vec::new())]
                } else {
                    Vec::new()
                }
            }
            libsdlc::DISC => {
                debug!("station {address:02X}: DISC");
                if poll {
                    vec![PendingFrame::unnumbered(address, libsdlc::UA, Vec::new())]
                } else {
                    Vec::new()
                }
            }
            libsdlc::XID => {
                debug!("station {address:02X}: XID");
                if poll {
                    vec![PendingFrame::unnumbered(address, libsdlc::XID, libsdlc::XID_ID_BLOCK.to_vec())]
                } else {
                    Vec::new()
                }
            }
            other => {
                warn!("station {address:02X}: unnumbered command {other:02X} ignored");
                Vec::new()
            }
        }
    }

    /// RR polls for work: the first LU past the scan cursor with pending
    /// terminal input gets a data PIU, an LU owing a lifecycle transition
    /// gets its NOTIFY/TERMSELF, and an idle station answers a bare RR.
    /// RNR is echoed as simple backpressure.
    fn process_supervisory(
        station: &mut Station,
        function: u8,
        terminal: &mut dyn TerminalLink,
        response_queued: bool,
    ) -> Vec<PendingFrame> {
        let address = station.address;
        match function {
            libsdlc::RR => {
                if response_queued {
                    // The queued batch goes out on this poll; nothing new.
                    return Vec::new();
                }
                let count = station.lu_count();
                for k in station.last_lu..count {
                    let (attached, readylu, actlu) = match station.lu(k) {
                        Some(lu) => (lu.attached, lu.readylu, lu.actlu),
                        None => continue,
                    };
                    if attached && readylu == READY_ACTIVE && actlu {
                        if let Some(data) = terminal.take_pending_output(station.number, k) {
                            if let Some(frame) = Self::build_lu_data(station, k, data) {
                                station.last_lu = (k + 1) % count;
                                return vec![frame];
                            }
                        }
                    } else if (attached && readylu == READY_POWER_ON_PENDING)
                        || readylu > READY_POWER_ON_PENDING
                    {
                        if let Some(frame) = Self::build_lifecycle(station, k) {
                            station.last_lu = (k + 1) % count;
                            return vec![frame];
                        }
                    }
                }
                station.last_lu = 0;
                vec![PendingFrame::supervisory(address, libsdlc::RR)]
            }
            libsdlc::RNR => vec![PendingFrame::supervisory(address, libsdlc::RNR)],
            other => {
                warn!("station {address:02X}: supervisory function {other:02X} ignored");
                Vec::new()
            }
        }
    }

    /// Build a data PIU carrying LU `k`'s pending terminal input toward the
    /// host. The LU now awaits a definite response.
    fn build_lu_data(station: &mut Station, k: usize, data: Vec<u8>) -> Option<PendingFrame> {
        let address = station.address;
        let oaf = LU_ADDR_BASE + k as u8;
        let lu = station.lu_mut(k)?;
        let seq = lu.next_sequence();
        let th = [TH0_DATA_OUT, 0x00, lu.daf_addr, oaf, (seq >> 8) as u8, seq as u8];
        let rh = [RH0_CHAIN_MASK, RH1_DRI, RH2_CHANGE_DIRECTION];
        lu.dri = true;
        debug!("station {address:02X} LU {k:02X}: data PIU, seq={seq}, {} bytes", data.len());
        Some(PendingFrame::information(address, build_piu(th, rh, &data)))
    }

    /// Build the lifecycle PIU LU `k` owes: TERMSELF when an unbind is
    /// pending, otherwise a power-on/power-off NOTIFY. The ready stage
    /// steps down toward active afterwards.
    fn build_lifecycle(station: &mut Station, k: usize) -> Option<PendingFrame> {
        let address = station.address;
        let oaf = LU_ADDR_BASE + k as u8;
        let lu = station.lu_mut(k)?;
        let seq = lu.next_sequence();
        let mut th = [TH0_DATA_OUT, 0x00, lu.daf_addr, oaf, (seq >> 8) as u8, seq as u8];
        let rh = [RH0_FORMATTED | RH0_CHAIN_MASK, 0x00, RH2_CHANGE_DIRECTION];
        let ru: Vec<u8> = match lu.readylu {
            READY_UNBIND_PENDING => {
                // The BIND is still live; terminate the session toward the
                // SSCP before the power-off NOTIFY goes out.
                th[TH_DAF] = 0x00;
                lu.bindflag = false;
                TERMSELF_REQ.to_vec()
            }
            READY_POWER_OFF_PENDING => {
                let mut ru = NOTIFY_REQ.to_vec();
                ru[NOTIFY_POWER_OFFSET] = NOTIFY_POWER_OFF;
                ru
            }
            _ => {
                let mut ru = NOTIFY_REQ.to_vec();
                ru[NOTIFY_POWER_OFFSET] = NOTIFY_POWER_ON;
                ru
            }
        };
        debug!("station {address:02X} LU {k:02X}: lifecycle PIU, readylu={}", lu.readylu);
        if lu.readylu > READY_ACTIVE {
            lu.readylu -= 1;
        }
        Some(PendingFrame::information(address, build_piu(th, rh, &ru)))
    }

    fn process_iframe(
        &mut self,
        station: &mut Station,
        payload: &[u8],
        terminal: &mut dyn TerminalLink,
    ) -> Result<Vec<PendingFrame>, SessionError> {
        let piu = Piu::parse(payload)?;
        if piu.is_expedited() {
            let rh = piu.rh()?;
            if rh[0] & RH0_SENSE != 0 {
                return Self::process_sense(station, &piu);
            }
            return Self::process_command(station, &piu);
        }
        self.process_data(station, &piu, terminal)
    }

    /// A sense report names this station; record the address the host used
    /// for us and log the sense bytes.
    fn process_sense(station: &mut Station, piu: &Piu<'_>) -> Result<Vec<PendingFrame>, SessionError> {
        station.pu_addr = piu.daf();
        let ru = piu.ru()?;
        let shown = &ru[..ru.len().min(4)];
        warn!("station {:02X}: sense data {:02X?}", station.address, shown);
        Ok(Vec::new())
    }

    /// Session-control command dispatch. Every response mirrors the
    /// request's TH with DAF/OAF swapped and echoes the RH marked as a
    /// response; BIND is the only command that can go negative here.
    fn process_command(station: &mut Station, piu: &Piu<'_>) -> Result<Vec<PendingFrame>, SessionError> {
        let ru = piu.ru()?;
        let &opcode = ru.first().ok_or(SessionError::EmptyRu)?;
        let daf = piu.daf();
        let oaf = piu.oaf();
        let address = station.address;
        let th = Self::response_th(piu, false);
        let mut rh = Self::response_rh(piu.rh()?);

        let ru_out: Vec<u8> = match SessionCommand::from_opcode(opcode) {
            Some(SessionCommand::ActPu) => {
                // The DAF the host picked for us is our PU network address.
                station.pu_addr = daf;
                ACTPU_RSP.to_vec()
            }
            Some(SessionCommand::DactPu) => DACTPU_RSP.to_vec(),
            Some(SessionCommand::ActLu) => {
                station.sscp_addr = oaf;
                let lu = station
                    .lu_for_daf_mut(daf)
                    .ok_or(SessionError::BadLuAddress { daf })?;
                lu.daf_addr = oaf;
                lu.bindflag = false;
                lu.actlu = true;
                let mut out = ACTLU_RSP.to_vec();
                out[ACTLU_POWER_OFFSET] =
                    if lu.attached { NOTIFY_POWER_ON } else { NOTIFY_POWER_OFF };
                out
            }
            Some(SessionCommand::Bind) => {
                let lu = station
                    .lu_for_daf_mut(daf)
                    .ok_or(SessionError::BadLuAddress { daf })?;
                lu.daf_addr = oaf;
                lu.lu_lu_seqn = 0;
                lu.bindflag = true;
                let acceptable = ru.get(2) == Some(&BIND_PROFILE_FM3)
                    && ru.get(BIND_ROWS_OFFSET).is_some_and(|&rows| rows >= BIND_MIN_ROWS)
                    && ru.get(BIND_COLS_OFFSET).is_some_and(|&cols| cols >= BIND_MIN_COLS);
                if !acceptable {
                    rh[1] |= RH1_NEGATIVE;
                    lu.bindflag = false;
                }
                BIND_RSP.to_vec()
            }
            Some(SessionCommand::Sdt) => {
                let lu = station
                    .lu_for_daf_mut(daf)
                    .ok_or(SessionError::BadLuAddress { daf })?;
                lu.daf_addr = oaf;
                lu.lu_lu_seqn = 0;
                SDT_RSP.to_vec()
            }
            Some(SessionCommand::Clear) => {
                let lu = station
                    .lu_for_daf_mut(daf)
                    .ok_or(SessionError::BadLuAddress { daf })?;
                lu.daf_addr = oaf;
                lu.lu_lu_seqn = 0;
                CLEAR_RSP.to_vec()
            }
            Some(SessionCommand::Signal) => {
                let lu = station
                    .lu_for_daf_mut(daf)
                    .ok_or(SessionError::BadLuAddress { daf })?;
                lu.daf_addr = oaf;
                SIGNAL_RSP.to_vec()
            }
            Some(SessionCommand::Qec) => {
                let lu = station
                    .lu_for_daf_mut(daf)
                    .ok_or(SessionError::BadLuAddress { daf })?;
                lu.daf_addr = oaf;
                QEC_RSP.to_vec()
            }
            Some(SessionCommand::Qc) => {
                let lu = station
                    .lu_for_daf_mut(daf)
                    .ok_or(SessionError::BadLuAddress { daf })?;
                lu.daf_addr = oaf;
                QC_RSP.to_vec()
            }
            Some(SessionCommand::DactLu) => {
                let lu = station
                    .lu_for_daf_mut(daf)
                    .ok_or(SessionError::BadLuAddress { daf })?;
                lu.daf_addr = oaf;
                lu.lu_lu_seqn = 0;
                lu.actlu = false;
                DACTLU_RSP.to_vec()
            }
            Some(SessionCommand::Unbind) => {
                let lu = station
                    .lu_for_daf_mut(daf)
                    .ok_or(SessionError::BadLuAddress { daf })?;
                lu.bindflag = false;
                lu.daf_addr = oaf;
                lu.lu_lu_seqn = 0;
                UNBIND_RSP.to_vec()
            }
            None => {
                warn!("station {address:02X}: unknown session command {opcode:02X}");
                rh[1] |= RH1_NEGATIVE;
                vec![opcode]
            }
        };
        debug!("station {address:02X}: command {opcode:02X} answered");
        Ok(vec![PendingFrame::information(address, build_piu(th, rh, &ru_out))])
    }

    /// Normal-flow 3270 data: classify the segment, fold chaining on top,
    /// reassemble toward the terminal side, and produce the response the
    /// exchange calls for.
    fn process_data(
        &mut self,
        station: &mut Station,
        piu: &Piu<'_>,
        terminal: &mut dyn TerminalLink,
    ) -> Result<Vec<PendingFrame>, SessionError> {
        let daf = piu.daf();
        let index = station
            .lu_index_for_daf(daf)
            .ok_or(SessionError::BadLuAddress { daf })?;
        let address = station.address;
        let mut seg = piu.segment();

        // An ONLY data PIU marked response while we await one IS the
        // outstanding definite response; absorb it.
        if seg == Segment::Only {
            let rh = piu.rh()?;
            let awaiting = station.lu(index).is_some_and(|lu| lu.dri);
            if awaiting && rh[0] & RH0_RESPONSE != 0 && rh[1] & RH1_DRI != 0 {
                if let Some(lu) = station.lu_mut(index) {
                    lu.dri = false;
                }
                debug!("station {address:02X} LU {index:02X}: definite response received");
                return Ok(Vec::new());
            }
        }

        // Chaining overrides the TH segment classification: the chain bits
        // in the RH say where this PIU sits, and the per-LU flag carries
        // in-chain state across middles.
        let mut chained = false;
        if seg == Segment::Only {
            let rh = piu.rh()?;
            if rh[0] & RH0_CHAIN_MASK != RH0_CHAIN_MASK {
                chained = true;
                let in_chain = station.lu(index).is_some_and(|lu| lu.chaining);
                if rh[0] & RH0_BEGIN_CHAIN != 0 {
                    seg = Segment::First;
                    if let Some(lu) = station.lu_mut(index) {
                        lu.chaining = true;
                    }
                } else if rh[0] & RH0_END_CHAIN != 0 {
                    seg = Segment::Last;
                    if let Some(lu) = station.lu_mut(index) {
                        lu.chaining = false;
                    }
                } else if in_chain {
                    seg = Segment::Middle;
                }
            }
        }

        // Data starts past TH+RH for only/first segments; middle/last
        // segments carry no RH unless chaining added one.
        let data: &[u8] = match seg {
            Segment::Only | Segment::First => piu.ru()?,
            Segment::Middle | Segment::Last => {
                if chained {
                    piu.ru()?
                } else {
                    piu.after_th()
                }
            }
        };

        // The first (or only) RH is the template for the eventual response.
        if matches!(seg, Segment::Only | Segment::First) {
            let rh = piu.rh()?;
            if let Some(lu) = station.lu_mut(index) {
                lu.chain.saved_rh0 = rh[0];
                lu.chain.saved_rh1 = rh[1];
            }
        }

        // Reassemble; a completed record gets the end-of-record marker and
        // goes to the terminal side.
        let attached = station.lu(index).is_some_and(|lu| lu.attached);
        match seg {
            Segment::Only => {
                let mut record = data.to_vec();
                record.push(IAC);
                record.push(EOR_MARK);
                if attached {
                    terminal.forward3270(station.number, index, &record);
                }
            }
            Segment::First | Segment::Middle => {
                if let Some(lu) = station.lu_mut(index) {
                    lu.chain.assembly.extend_from_slice(data);
                }
            }
            Segment::Last => {
                let mut record = station
                    .lu_mut(index)
                    .map(|lu| std::mem::take(&mut lu.chain.assembly))
                    .unwrap_or_default();
                record.extend_from_slice(data);
                record.push(IAC);
                record.push(EOR_MARK);
                if attached {
                    terminal.forward3270(station.number, index, &record);
                }
            }
        }

        // Response bookkeeping. An only segment answers at once when a
        // definite response was requested; a chain answers on its last
        // element with the RH saved from the first; a segmented exchange
        // builds the response at the first segment and defers it until the
        // last segment releases it.
        match (chained, seg) {
            (true, Segment::Last) => {
                let rh = piu.rh()?;
                if rh[1] & RH1_DRI == 0 {
                    return Ok(Vec::new());
                }
                let (saved_rh0, saved_rh1) = station
                    .lu(index)
                    .map(|lu| (lu.chain.saved_rh0, lu.chain.saved_rh1))
                    .unwrap_or_default();
                Ok(vec![Self::data_response(address, piu, saved_rh0, saved_rh1)])
            }
            (_, Segment::Only) => {
                let rh = piu.rh()?;
                if rh[1] & RH1_DRI == 0 {
                    return Ok(Vec::new());
                }
                Ok(vec![Self::data_response(address, piu, rh[0], rh[1])])
            }
            (true, Segment::First) | (_, Segment::Middle) => Ok(Vec::new()),
            (false, Segment::First) => {
                let rh = piu.rh()?;
                let response = Self::data_response(address, piu, rh[0], rh[1]);
                if let Some(lu) = station.lu_mut(index) {
                    lu.chain.pending_response = Some(response.payload);
                }
                Ok(Vec::new())
            }
            (false, Segment::Last) => {
                match station.lu_mut(index).and_then(|lu| lu.chain.pending_response.take()) {
                    Some(payload) => Ok(vec![PendingFrame::information(address, payload)]),
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    /// Positive response to a data PIU: the request TH with the addresses
    /// swapped and the segment field forced to "only", the saved RH marked
    /// as a response, and an empty RU.
    fn data_response(address: u8, piu: &Piu<'_>, saved_rh0: u8, saved_rh1: u8) -> PendingFrame {
        let th = Self::response_th(piu, true);
        let rh = [
            (saved_rh0 | RH0_RESPONSE | RH0_CHAIN_MASK) & !RH0_SENSE,
            saved_rh1 & !RH1_NEGATIVE,
            0x00,
        ];
        PendingFrame::information(address, build_piu(th, rh, &[]))
    }

    /// Response TH: the request's, with DAF and OAF swapped. Data
    /// responses also mark themselves an only segment.
    fn response_th(piu: &Piu<'_>, force_only: bool) -> [u8; TH_LEN] {
        let th = piu.th();
        let th0 = if force_only { th[0] | TH0_SEG_ONLY } else { th[0] };
        [th0, th[1], th[3], th[2], th[4], th[5]]
    }

    /// Response RH: the request's, flagged as a positive response with the
    /// sense indicator cleared.
    fn response_rh(rh: [u8; RH_LEN]) -> [u8; RH_LEN] {
        [
            (rh[0] | RH0_RESPONSE | RH0_CHAIN_MASK) & !RH0_SENSE,
            rh[1] & !RH1_NEGATIVE,
            0x00,
        ]
    }
}
