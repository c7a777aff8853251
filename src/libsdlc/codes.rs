//! SDLC Link-Level Constants and Codes
//!
//! This module contains the SDLC frame delimiters, control-byte formats and
//! command/response codes used on the leased line between the host channel
//! side and the attached cluster stations.
//!
//! SDLC frame layout (BLU):
//!
//! ```text
//!         |   FCntl   |
//! +-------+-------+-----------+-------//-------+-------+-------+-------+
//! | BFlag | FAddr |Nr|PF|Ns|Ft| ...  I-frame ..| Hfcs  | Lfcs  | EFlag |
//! +-------+-------+-----------+-------//-------+-------+-------+-------+
//! ```

/// Frame delimiter flag byte
pub const FLAG: u8 = 0x7E;

/// Broadcast station address; resolves to the default station
pub const ADDR_BROADCAST: u8 = 0xFF;
/// Default secondary station address used for broadcast traffic
pub const ADDR_DEFAULT_STATION: u8 = 0xC1;

/// Modem clocking bytes that may precede a frame and are skipped
pub const CLOCKING_NUL: u8 = 0x00;
pub const CLOCKING_ALT: u8 = 0xAA;

/// Control byte: Poll bit (primary -> secondary)
pub const CPOLL: u8 = 0x10;
/// Control byte: Final bit (secondary -> primary); same bit position
pub const CFINAL: u8 = 0x10;

/// Control byte format selector masks
pub const FMT_UNNUMBERED: u8 = 0x03;  // bits 0-1 = 11
pub const FMT_SUPERVISORY: u8 = 0x01; // bits 0-1 = 01
pub const FMT_IFRAME: u8 = 0x00;      // bit 0 = 0 (00 and 10 both I-frames)

/// Unnumbered command/response codes (control byte with P/F bit masked off)
pub const SNRM: u8 = 0x83;            // Set Normal Response Mode
pub const DISC: u8 = 0x43;            // Disconnect
pub const UA: u8 = 0x63;              // Unnumbered Acknowledgement
pub const DM: u8 = 0x0F;              // Disconnected Mode
pub const FRMR: u8 = 0x87;            // Frame Reject
pub const TEST: u8 = 0xE3;            // Test
pub const XID: u8 = 0xCF;             // Exchange Identification

/// Supervisory command/response codes (control byte low nibble)
pub const RR: u8 = 0x01;              // Receive Ready
pub const RNR: u8 = 0x05;             // Receive Not Ready
pub const REJ: u8 = 0x09;             // Reject

/// Mask that strips the P/F bit from an unnumbered control byte
pub const UNNUM_CMD_MASK: u8 = 0xEF;

/// Minimum bytes between the flags: address, control, FCS high, FCS low
pub const MIN_SPAN: usize = 4;

/// XID response body: fixed format, PU type 2, IDBLK 017, IDNUM 00017
pub const XID_ID_BLOCK: [u8; 6] = [0x02, 0x00, 0x01, 0x70, 0x00, 0x17];

/// Modulus for the link-level send/receive sequence counters
pub const SEQ_MODULUS: u8 = 8;

/// Extract the receive sequence number N(r) from an I- or S-format control byte.
pub fn ctrl_nr(ctrl: u8) -> u8 {
    (ctrl >> 5) & 0x07
}

/// Extract the send sequence number N(s) from an I-format control byte.
pub fn ctrl_ns(ctrl: u8) -> u8 {
    (ctrl >> 1) & 0x07
}

/// True when the Poll/Final bit is set.
pub fn ctrl_pf(ctrl: u8) -> bool {
    ctrl & CPOLL != 0
}
