//! Main entry point for cc3705r
//!
//! Parses the command line, loads the configuration, and brings up the
//! controller. The process runs until terminated; there is no orderly
//! shutdown beyond that, matching the machine being emulated.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::info;

use cc3705r::config::Config;
use cc3705r::controller;

fn print_usage() {
    eprintln!("Usage: cc3705r [options]");
    eprintln!("  -d                 enable trace output");
    eprintln!("  -cchn <hostname>   hostname of the host running the upstream line");
    eprintln!("  -ccip <address>    ip address of the host running the upstream line");
    eprintln!("  --port <port>      TCP port of the upstream line");
    eprintln!("  --config <path>    configuration file to load");
}

fn main() -> Result<()> {
    // Log panics before crashing; a dying line thread should leave a trail.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("program panicked: {panic_info}");
    }));

    let args: Vec<String> = std::env::args().collect();
    let mut trace = false;
    let mut line_host: Option<String> = None;
    let mut line_port: Option<u16> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-d" => {
                trace = true;
                i += 1;
            }
            "-cchn" | "-ccip" => {
                if i + 1 < args.len() {
                    line_host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    print_usage();
                    bail!("{} requires a value", args[i]);
                }
            }
            "--port" => {
                if i + 1 < args.len() {
                    line_port = Some(
                        args[i + 1]
                            .parse()
                            .with_context(|| format!("invalid port '{}'", args[i + 1]))?,
                    );
                    i += 2;
                } else {
                    print_usage();
                    bail!("--port requires a value");
                }
            }
            "--config" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    print_usage();
                    bail!("--config requires a value");
                }
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                print_usage();
                bail!("invalid argument {other}");
            }
        }
    }

    let mut config = match config_path {
        Some(path) => Config::load(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::load_or_default(),
    };
    if let Some(host) = line_host {
        config.line_host = host;
    }
    if let Some(port) = line_port {
        config.line_port = port;
    }
    config.trace = config.trace || trace;

    let mut builder = env_logger::Builder::from_default_env();
    if config.trace {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    println!(
        "cc3705r starting at {} - upstream line {}:{}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        config.line_host,
        config.line_port
    );

    let handle = controller::start(&config).context("controller startup failed")?;
    info!("controller running; terminals connect through the terminal-side service");

    // The handle keeps the channels to the terminal-side service alive for
    // the life of the process.
    let _handle = handle;
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}
