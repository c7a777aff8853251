//! Controller end-to-end tests
//!
//! Brings the whole machine up over a real socket: scanner thread, bridge
//! thread, register handshake and session table, with this test playing the
//! host end of the leased line.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::time::{Duration, Instant};

use cc3705r::config::Config;
use cc3705r::controller;
use cc3705r::libsdlc::crc::{crc16, fcs_bytes};
use cc3705r::libsdlc::{SdlcFramer, CFINAL, CPOLL, FLAG, UA};
use cc3705r::terminal::TerminalEvent;

fn encode_one(address: u8, control: u8, payload: &[u8]) -> Vec<u8> {
    let mut wire = vec![FLAG, address, control];
    wire.extend_from_slice(payload);
    let (hi, lo) = fcs_bytes(crc16(&wire[1..]));
    wire.push(hi);
    wire.push(lo);
    wire.push(FLAG);
    wire
}

fn test_config(port: u16) -> Config {
    let mut config = Config::default();
    config.line_host = "127.0.0.1".to_string();
    config.line_port = port;
    config.scan_interval_us = 100;
    config.ack_timeout_ms = 2000;
    config
}

#[test]
fn snrm_round_trip_over_the_wire() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = controller::start(&test_config(port)).expect("controller startup");
    let (mut host, _) = listener.accept().unwrap();
    host.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    host.set_nodelay(true).unwrap();

    host.write_all(&encode_one(0xC1, 0x83 | CPOLL, &[])).unwrap();

    // Accumulate until a complete frame decodes.
    let framer = SdlcFramer::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    let frames = loop {
        assert!(Instant::now() < deadline, "no response from the controller");
        match host.read(&mut chunk) {
            Ok(0) => panic!("controller closed the line"),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if let Ok(frames) = framer.decode_all(&buf) {
                    if !frames.is_empty() {
                        break frames;
                    }
                }
            }
            Err(_) => continue, // read timeout, keep waiting
        }
    };

    assert_eq!(frames[0].address, 0xC1);
    assert_eq!(frames[0].control, UA | CFINAL);

    handle.shutdown();
}

#[test]
fn terminal_attach_reaches_the_session_table() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = controller::start(&test_config(port)).expect("controller startup");
    let (_host, _) = listener.accept().unwrap();

    handle
        .terminal_events
        .send(TerminalEvent::Attached { station: 0, lu: 1 })
        .unwrap();

    // The scanner folds the event in on one of its next cycles.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        {
            let sessions = handle.sessions.lock().unwrap();
            if sessions.station(0).unwrap().lu(1).unwrap().attached {
                break;
            }
        }
        assert!(Instant::now() < deadline, "attach event never reached the session table");
        std::thread::sleep(Duration::from_millis(10));
    }

    handle.shutdown();
}
