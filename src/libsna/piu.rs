//! FID2 PIU parsing
//!
//! A PIU is the TH + RH + RU triplet carried as an I-frame payload. Middle
//! and last segments carry only a TH (plus an RH when the exchange uses
//! chaining), so the RH accessors are fallible rather than assumed.

use super::codes::*;
use crate::error::SessionError;

/// Segment position of a normal-flow data PIU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Only,
    First,
    Middle,
    Last,
}

/// Read-only view over a received PIU.
#[derive(Debug, Clone, Copy)]
pub struct Piu<'a> {
    buf: &'a [u8],
}

impl<'a> Piu<'a> {
    /// Wrap an I-frame payload. Every PIU carries at least a full TH.
    pub fn parse(buf: &'a [u8]) -> Result<Self, SessionError> {
        if buf.len() < TH_LEN {
            return Err(SessionError::ShortPiu { len: buf.len() });
        }
        Ok(Piu { buf })
    }

    pub fn th0(&self) -> u8 {
        self.buf[TH_0]
    }

    pub fn daf(&self) -> u8 {
        self.buf[TH_DAF]
    }

    pub fn oaf(&self) -> u8 {
        self.buf[TH_OAF]
    }

    /// TH sequence count, big-endian.
    pub fn sequence(&self) -> u16 {
        (u16::from(self.buf[TH_SCF0]) << 8) | u16::from(self.buf[TH_SCF1])
    }

    /// The raw TH bytes.
    pub fn th(&self) -> [u8; TH_LEN] {
        let mut th = [0u8; TH_LEN];
        th.copy_from_slice(&self.buf[..TH_LEN]);
        th
    }

    /// The RH bytes, when the PIU carries one.
    pub fn rh(&self) -> Result<[u8; RH_LEN], SessionError> {
        if self.buf.len() < TH_LEN + RH_LEN {
            return Err(SessionError::ShortPiu { len: self.buf.len() });
        }
        let mut rh = [0u8; RH_LEN];
        rh.copy_from_slice(&self.buf[TH_LEN..TH_LEN + RH_LEN]);
        Ok(rh)
    }

    /// Everything after the TH.
    pub fn after_th(&self) -> &'a [u8] {
        &self.buf[TH_LEN..]
    }

    /// The RU: everything after TH + RH.
    pub fn ru(&self) -> Result<&'a [u8], SessionError> {
        if self.buf.len() < TH_LEN + RH_LEN {
            return Err(SessionError::ShortPiu { len: self.buf.len() });
        }
        Ok(&self.buf[TH_LEN + RH_LEN..])
    }

    /// Expedited flow carries SNA commands and sense reports; normal flow
    /// carries 3270 data.
    pub fn is_expedited(&self) -> bool {
        self.th0() & TH0_EXPEDITED != 0
    }

    /// Segment position from the TH segmenting field.
    pub fn segment(&self) -> Segment {
        match self.th0() & TH0_SEG_MASK {
            TH0_SEG_ONLY => Segment::Only,
            TH0_SEG_FIRST => Segment::First,
            TH0_SEG_LAST => Segment::Last,
            _ => Segment::Middle,
        }
    }
}

/// Assemble a PIU from its three parts.
pub fn build_piu(th: [u8; TH_LEN], rh: [u8; RH_LEN], ru: &[u8]) -> Vec<u8> {
    let mut piu = Vec::with_capacity(TH_LEN + RH_LEN + ru.len());
    piu.extend_from_slice(&th);
    piu.extend_from_slice(&rh);
    piu.extend_from_slice(ru);
    piu
}

/// Session-control command decoded once from the RU opcode byte.
///
/// Decoding up front keeps each command's session-state effects in a single
/// match arm instead of a ladder of opcode comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    ActPu,
    ActLu,
    Bind,
    Sdt,
    Clear,
    Signal,
    Qec,
    Qc,
    DactPu,
    DactLu,
    Unbind,
}

impl SessionCommand {
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            RU_ACTPU => Some(SessionCommand::ActPu),
            RU_ACTLU => Some(SessionCommand::ActLu),
            RU_BIND => Some(SessionCommand::Bind),
            RU_SDT => Some(SessionCommand::Sdt),
            RU_CLEAR => Some(SessionCommand::Clear),
            RU_SIGNAL => Some(SessionCommand::Signal),
            RU_QEC => Some(SessionCommand::Qec),
            RU_QC => Some(SessionCommand::Qc),
            RU_DACTPU => Some(SessionCommand::DactPu),
            RU_DACTLU => Some(SessionCommand::DactLu),
            RU_UNBIND => Some(SessionCommand::Unbind),
            _ => None,
        }
    }

    pub fn opcode(self) -> u8 {
        match self {
            SessionCommand::ActPu => RU_ACTPU,
            SessionCommand::ActLu => RU_ACTLU,
            SessionCommand::Bind => RU_BIND,
            SessionCommand::Sdt => RU_SDT,
            SessionCommand::Clear => RU_CLEAR,
            SessionCommand::Signal => RU_SIGNAL,
            SessionCommand::Qec => RU_QEC,
            SessionCommand::Qc => RU_QC,
            SessionCommand::DactPu => RU_DACTPU,
            SessionCommand::DactLu => RU_DACTLU,
            SessionCommand::Unbind => RU_UNBIND,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_piu() -> Vec<u8> {
        // TH: FID2, resv, DAF=3, OAF=0, seq=0x0102; RH: req, DRI, CD; RU: SDT
        vec![0x2D, 0x00, 0x03, 0x00, 0x01, 0x02, 0x6B, 0x80, 0x20, 0xA0]
    }

    #[test]
    fn piu_field_access() {
        let bytes = sample_piu();
        let piu = Piu::parse(&bytes).unwrap();
        assert_eq!(piu.daf(), 0x03);
        assert_eq!(piu.oaf(), 0x00);
        assert_eq!(piu.sequence(), 0x0102);
        assert!(piu.is_expedited());
        assert_eq!(piu.rh().unwrap(), [0x6B, 0x80, 0x20]);
        assert_eq!(piu.ru().unwrap(), &[0xA0]);
    }

    #[test]
    fn short_piu_is_rejected() {
        assert!(matches!(
            Piu::parse(&[0x2E, 0x00, 0x03]),
            Err(SessionError::ShortPiu { len: 3 })
        ));
    }

    #[test]
    fn segment_classification_from_th() {
        for (th0, seg) in [
            (0x2E, Segment::Only),
            (0x2A, Segment::First),
            (0x26, Segment::Last),
            (0x22, Segment::Middle),
        ] {
            let bytes = vec![th0, 0, 3, 0, 0, 1];
            assert_eq!(Piu::parse(&bytes).unwrap().segment(), seg, "th0={th0:#04X}");
        }
    }

    #[test]
    fn session_command_round_trip() {
        for op in [0x11, 0x0D, 0x31, 0xA0, 0xA1, 0xC9, 0x80, 0x81, 0x12, 0x0E, 0x32] {
            let cmd = SessionCommand::from_opcode(op).unwrap();
            assert_eq!(cmd.opcode(), op);
        }
        assert_eq!(SessionCommand::from_opcode(0x55), None);
    }
}
