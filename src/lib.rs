/// SDLC LINK LAYER: frame delimiting, CRC-16, sequence discipline
/// Complete secondary-station framing for the leased line
pub mod libsdlc;

/// SNA FID2 LAYER: PIU interpretation and session control
/// Drives the per-station, per-LU session lifecycle
pub mod libsna;

/// Shared control/status register bank and interrupt handshake
pub mod registers;

/// Line-discipline automaton (PCF) and line control blocks
pub mod scanner;

/// Per-line thread orchestration
pub mod controller;

/// Upstream line transport with bounded reconnect
pub mod channel;

/// Terminal-side collaborator seam
pub mod terminal;

/// Controller configuration
pub mod config;

/// Structured error types
pub mod error;
