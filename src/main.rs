use std::ops::ControlFlow;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use serde::Serialize;

use dwm1001::{
    init_rust_logging, Dwm1001, LogSink, Mode, Point3, SerialSettings, ShellTiming,
    SimulatedDevice,
};

#[derive(Parser, Debug)]
#[command(name = "dwm1001-cli", about = "Configure and read a DWM1001 over its UART shell")]
struct Args {
    /// Serial device (e.g., /dev/ttyACM0)
    #[arg(short, long, required_unless_present = "simulate")]
    port: Option<String>,
    /// Talk to an in-process simulated module instead of a serial port
    #[arg(long)]
    simulate: bool,
    /// Per-line read timeout for command replies, in milliseconds
    #[arg(long, default_value_t = 100)]
    timeout_ms: u64,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show mode, network id, address and configured position
    Info,
    /// List the anchors the module knows about
    Anchors,
    /// Read the configured position (millimetres)
    Position,
    /// Set the configured position (metres)
    SetPosition {
        #[arg(allow_negative_numbers = true)]
        x: f64,
        #[arg(allow_negative_numbers = true)]
        y: f64,
        #[arg(allow_negative_numbers = true)]
        z: f64,
    },
    /// Set the PAN id (hex, e.g. 0x1234)
    SetNetworkId { id: String },
    /// Switch mode: tag, listener, anchor or anchor_initiator
    SetMode { mode: Mode },
    /// Show or change whether the module streams measurements
    Listen { state: Option<Toggle> },
    /// Print streamed records until Ctrl-C
    Stream {
        /// Emit full DIST records instead of positions
        #[arg(long)]
        measurements: bool,
        /// Stop after this many records
        #[arg(long)]
        count: Option<usize>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

fn main() {
    init_rust_logging();
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let mut device = connect(&args)?;

    match &args.command {
        Command::Info => {
            let identity = device
                .identity()
                .cloned()
                .context("module reported no identity")?;
            let position = device.cached_position();
            if args.json {
                print_json(&serde_json::json!({ "identity": identity, "position": position }))?;
            } else {
                println!("mode:       {} ({})", identity.mode, identity.mode_token);
                println!("network id: {}", identity.network_id);
                println!("address:    {}", identity.address);
                match position {
                    Some(p) => println!("position:   {p}"),
                    None => println!("position:   unknown"),
                }
            }
        }
        Command::Anchors => {
            let anchors = device.get_anchor_list().context("reading anchor list")?;
            if args.json {
                print_json(&anchors)?;
            } else if anchors.is_empty() {
                println!("no anchors");
            } else {
                for a in &anchors {
                    let pos = a.position.map_or_else(|| "-".to_string(), |p| p.to_string());
                    println!("[{}] {} seen={:?} pos={}", a.seat, a.id, a.seen_count, pos);
                }
            }
        }
        Command::Position => {
            let position = device.get_position()?;
            if args.json {
                print_json(&position)?;
            } else {
                println!("{position}");
            }
        }
        Command::SetPosition { x, y, z } => {
            let sent = device.set_position(*x, *y, *z)?;
            println!("position set to {sent}");
        }
        Command::SetNetworkId { id } => {
            device.set_network_id(id)?;
            let identity = device.refresh_identity()?;
            println!("network id is now {}", identity.network_id);
        }
        Command::SetMode { mode } => {
            device.set_mode(*mode)?;
            println!("mode is now {}", device.get_mode()?);
        }
        Command::Listen { state } => {
            if let Some(state) = state {
                device.set_listen_mode(matches!(state, Toggle::On))?;
            }
            println!("listen mode: {}", device.is_listen_mode()?);
        }
        Command::Stream {
            measurements,
            count,
        } => stream(&mut device, *measurements, *count, args.json)?,
    }

    device.close().context("closing session")?;
    Ok(())
}

fn connect(args: &Args) -> Result<Dwm1001> {
    let read_timeout = Duration::from_millis(args.timeout_ms);
    if args.simulate {
        let mut timing = ShellTiming::immediate();
        timing.stream_poll = Duration::from_millis(200);
        let mut device = Dwm1001::new(Box::new(demo_device()), timing, Arc::new(LogSink));
        device.open().context("simulated handshake")?;
        return Ok(device);
    }

    let Some(path) = args.port.as_deref() else {
        anyhow::bail!("--port is required without --simulate");
    };
    let timing = ShellTiming {
        read_timeout,
        ..ShellTiming::default()
    };
    info!("Connecting to {path}");
    Dwm1001::connect_serial_with(&SerialSettings::new(path), timing, Arc::new(LogSink))
        .with_context(|| format!("connecting to DWM1001 on {path}"))
}

/// Two anchors and a short burst of tag output.
fn demo_device() -> SimulatedDevice {
    let sim = SimulatedDevice::new()
        .with_anchor("C584", Point3::new(0.0, 0.0, 2.0), 12)
        .with_anchor("4A91", Point3::new(5.0, 0.0, 2.0), 9);
    for i in 0..10 {
        let x = 1.0 + f64::from(i) * 0.1;
        sim.push_stream_line(&format!(
            "DIST,2,AN0,C584,0.00,0.00,2.00,{:.2},AN1,4A91,5.00,0.00,2.00,{:.2},POS,{x:.2},1.50,0.00,80",
            (x * x + 1.5f64.powi(2) + 4.0).sqrt(),
            ((5.0 - x).powi(2) + 1.5f64.powi(2) + 4.0).sqrt(),
        ));
    }
    sim
}

fn stream(
    device: &mut Dwm1001,
    measurements: bool,
    count: Option<usize>,
    json: bool,
) -> Result<()> {
    let stop = install_ctrlc_handler()?;
    device.set_listen_mode(true)?;

    let mut emitted = 0usize;
    let mut emit = |line: String| {
        println!("{line}");
        emitted += 1;
        match count {
            Some(max) if emitted >= max => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    };

    let summary = if measurements {
        device.stream_measurements(&stop, |m| emit(render(&m, json)))?
    } else {
        device.stream_positions(&stop, |p| emit(render(&p, json)))?
    };
    info!(
        "Stream ended: {} record(s), {} skipped line(s)",
        summary.records, summary.skipped
    );

    device.set_listen_mode(false)?;
    Ok(())
}

fn render<T: Serialize + std::fmt::Debug>(value: &T, json: bool) -> String {
    if json {
        serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    } else {
        format!("{value:?}")
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn install_ctrlc_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_signal = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_for_signal.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler failed")?;
    Ok(stop)
}
