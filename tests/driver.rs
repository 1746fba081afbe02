use std::io::Write;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dwm1001::{
    AbsolutePosition, ConnectionState, DriverError, Dwm1001, MemorySink, Mode, Point3,
    ShellTiming, SimulatedDevice,
};
use log::Level;

fn connect(sim: &SimulatedDevice) -> (Dwm1001, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let mut device = Dwm1001::new(
        Box::new(sim.clone()),
        ShellTiming::immediate(),
        sink.clone(),
    );
    device.open().expect("handshake");
    (device, sink)
}

#[test]
fn handshake_succeeds_on_third_attempt() {
    // Four ignored wakes burn two attempts; the fifth CR opens the shell and
    // the sixth gets the prompt.
    let sim = SimulatedDevice::new().ignore_wakes(4);
    let (device, sink) = connect(&sim);

    assert!(device.is_connected());
    assert_eq!(device.state(), ConnectionState::Connected);
    let retries: Vec<_> = sink
        .at_level(Level::Warn)
        .into_iter()
        .filter(|e| e.message.starts_with("handshake attempt failed"))
        .collect();
    assert_eq!(retries.len(), 2);
    assert_eq!(retries[1].field("attempt"), Some("2"));
}

#[test]
fn handshake_exhaustion_reports_connection_failure() {
    let sim = SimulatedDevice::new().ignore_wakes(6);
    let sink = Arc::new(MemorySink::new());
    let mut device = Dwm1001::new(
        Box::new(sim.clone()),
        ShellTiming::immediate(),
        sink.clone(),
    );

    match device.open() {
        Err(DriverError::Connection { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected connection failure, got {other:?}"),
    }
    assert!(!device.is_connected());
    assert_eq!(device.state(), ConnectionState::Closed);
    assert_eq!(sink.at_level(Level::Error).len(), 1);
    // Exactly two carriage returns per attempt, nothing else.
    assert_eq!(sim.commands(), vec![String::new(); 6]);
}

#[test]
fn open_caches_identity() {
    let sim = SimulatedDevice::new();
    let (device, _sink) = connect(&sim);

    let identity = device.identity().expect("identity after open");
    assert_eq!(identity.mode, Mode::Tag);
    assert_eq!(identity.mode_token, "tn");
    assert_eq!(identity.network_id, "0x1234");
    assert_eq!(identity.address, "0xDECA3C2A9A4B8E45");
    assert_eq!(&sim.commands()[2..], ["si", "apg"]);
}

#[test]
fn position_round_trips_in_millimetres() {
    let sim = SimulatedDevice::new();
    let (mut device, _sink) = connect(&sim);

    let sent = device.set_position(1.2345, 0.0, 2.0).unwrap();
    assert_eq!(sent, AbsolutePosition::new(1234, 0, 2000));
    assert_eq!(sim.commands().last().unwrap(), "aps 1234 0 2000");
    assert_eq!(device.get_position().unwrap(), sent);
    assert_eq!(device.cached_position(), Some(sent));

    let negative = device.set_position(-0.5, 3.0, 0.0).unwrap();
    assert_eq!(negative, AbsolutePosition::new(-500, 3000, 0));
    assert!(matches!(
        device.set_position(f64::NAN, 0.0, 0.0),
        Err(DriverError::InvalidInput(_))
    ));
    assert!(matches!(
        device.set_position(0.0, 0.0, 3_000_000.0),
        Err(DriverError::InvalidInput(_))
    ));
    assert_eq!(device.cached_position(), None);
}

#[test]
fn anchor_list_is_parsed_in_seat_order() {
    let sim = SimulatedDevice::new()
        .with_anchor("C584", Point3::new(0.0, 0.0, 2.0), 12)
        .with_anchor("4A91", Point3::new(5.0, 0.5, 2.0), 9);
    let (mut device, _sink) = connect(&sim);

    let anchors = device.get_anchor_list().unwrap();
    assert_eq!(anchors.len(), 2);
    assert_eq!(anchors[0].id, "000000000000C584");
    assert_eq!(anchors[0].seat, 0);
    assert_eq!(anchors[0].seen_count, Some(12));
    assert_eq!(anchors[0].position, Some(Point3::new(0.0, 0.0, 2.0)));
    assert_eq!(anchors[1].seat, 1);
    assert_eq!(anchors[1].position, Some(Point3::new(5.0, 0.5, 2.0)));
}

#[test]
fn anchor_list_ignores_a_stale_reply_on_the_link() {
    let sim = SimulatedDevice::new().with_anchor("C584", Point3::new(0.0, 0.0, 2.0), 12);
    let (mut device, _sink) = connect(&sim);
    // An `si` reply nobody read is still waiting when `la` is issued.
    sim.clone().write_all(b"si\r").unwrap();

    let anchors = device.get_anchor_list().unwrap();
    assert_eq!(anchors.len(), 1);
    assert_eq!(anchors[0].id, "000000000000C584");
    assert_eq!(sim.commands().last().unwrap(), "la");
}

#[test]
fn empty_anchor_list_is_not_an_error() {
    let sim = SimulatedDevice::new();
    let (mut device, _sink) = connect(&sim);
    assert!(device.get_anchor_list().unwrap().is_empty());
}

#[test]
fn mode_switch_runs_a_fresh_handshake() {
    let sim = SimulatedDevice::new();
    let (mut device, _sink) = connect(&sim);

    device.set_mode(Mode::Anchor).unwrap();
    assert!(device.is_connected());
    assert_eq!(sim.mode(), Mode::Anchor);
    assert_eq!(device.identity().unwrap().mode, Mode::Anchor);
    assert_eq!(device.get_mode().unwrap(), Mode::Anchor);

    let commands = sim.commands();
    let switch = commands.iter().position(|c| c == "nma").unwrap();
    assert_eq!(commands[switch + 1], "");
    assert_eq!(commands[switch + 2], "");
    assert_eq!(commands[switch + 3], "si");
}

#[test]
fn listener_mode_uses_nmp() {
    let sim = SimulatedDevice::new();
    let (mut device, _sink) = connect(&sim);
    device.set_mode(Mode::TagListener).unwrap();
    assert!(sim.commands().contains(&"nmp".to_string()));
    assert_eq!(device.identity().unwrap().mode, Mode::TagListener);
}

#[test]
fn network_id_is_sent_as_hex() {
    let sim = SimulatedDevice::new();
    let (mut device, _sink) = connect(&sim);

    device.set_network_id("0x0BAD").unwrap();
    assert_eq!(sim.commands().last().unwrap(), "nis 0x0BAD");
    assert_eq!(sim.network_id(), 0x0BAD);
    assert!(device.identity().is_none());
    assert_eq!(device.refresh_identity().unwrap().network_id, "0x0BAD");

    assert!(matches!(
        device.set_network_id("zz"),
        Err(DriverError::InvalidInput(_))
    ));
}

#[test]
fn close_sends_quit_and_releases_the_port() {
    let sim = SimulatedDevice::new();
    let (mut device, sink) = connect(&sim);

    device.close().unwrap();
    assert!(!device.is_connected());
    assert!(!sim.is_shell_active());
    assert_eq!(sim.commands().last().unwrap(), "quit");
    assert!(sink.at_level(Level::Warn).is_empty());
    // Closing twice is harmless.
    device.close().unwrap();
}

#[test]
fn close_releases_the_port_even_when_quit_fails() {
    let sim = SimulatedDevice::new();
    let (mut device, _sink) = connect(&sim);
    sim.unplug();

    assert!(matches!(device.close(), Err(DriverError::Io(_))));
    assert_eq!(device.state(), ConnectionState::Closed);
    assert!(!device.is_connected());

    let writes = sim.write_calls().len();
    device.close().unwrap();
    assert_eq!(sim.write_calls().len(), writes);
}

#[test]
fn missing_farewell_is_a_warning_only() {
    let sim = SimulatedDevice::new().without_farewell();
    let (mut device, sink) = connect(&sim);

    device.close().unwrap();
    assert_eq!(device.state(), ConnectionState::Closed);
    let warnings = sink.at_level(Level::Warn);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].field("response").unwrap().contains("quit"));
}

#[test]
fn dropping_a_connected_driver_closes_it() {
    let sim = SimulatedDevice::new();
    {
        let (_device, _sink) = connect(&sim);
    }
    assert_eq!(sim.commands().last().unwrap(), "quit");
}

#[test]
fn commands_before_open_fail_fast() {
    let sim = SimulatedDevice::new();
    let mut device = Dwm1001::new(
        Box::new(sim.clone()),
        ShellTiming::immediate(),
        Arc::new(MemorySink::new()),
    );
    assert!(matches!(
        device.get_anchor_list(),
        Err(DriverError::NotConnected(_))
    ));
    assert!(matches!(
        device.set_position(0.0, 0.0, 0.0),
        Err(DriverError::NotConnected(_))
    ));
    assert!(sim.write_calls().is_empty());
}

#[test]
fn unplugged_device_surfaces_io_errors() {
    let sim = SimulatedDevice::new();
    let (mut device, _sink) = connect(&sim);
    sim.unplug();
    assert!(matches!(device.get_position(), Err(DriverError::Io(_))));
}

#[test]
fn stream_positions_skips_noise_until_sink_breaks() {
    let sim = SimulatedDevice::new();
    let (mut device, _sink) = connect(&sim);
    sim.push_stream_line("[012345.678 INF] tag: ready");
    sim.push_stream_line("DIST,1,AN0,150E,0.00,0.00,0.00,1.85,POS,1.10,2.20,0.00,55");
    sim.push_stream_line("POS,3.0,4.0,0.5,80");
    sim.start_streaming();

    let stop = AtomicBool::new(false);
    let mut seen = Vec::new();
    let summary = device
        .stream_positions(&stop, |p| {
            seen.push(p);
            if seen.len() == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();

    assert_eq!(
        seen,
        vec![Point3::new(1.10, 2.20, 0.0), Point3::new(3.0, 4.0, 0.5)]
    );
    assert_eq!(summary.records, 2);
    assert_eq!(summary.skipped, 1);
    assert!(!summary.cancelled);
}

#[test]
fn stream_stops_when_flag_is_raised() {
    let sim = SimulatedDevice::new();
    let (mut device, _sink) = connect(&sim);
    for _ in 0..5 {
        sim.push_stream_line("POS,1.0,1.0,0.0,90");
    }
    sim.start_streaming();

    let stop = AtomicBool::new(false);
    let mut count = 0;
    let summary = device
        .stream_positions(&stop, |_| {
            count += 1;
            if count == 3 {
                stop.store(true, Ordering::SeqCst);
            }
            ControlFlow::Continue(())
        })
        .unwrap();

    assert_eq!(summary.records, 3);
    assert!(summary.cancelled);
    // The session survives cancellation.
    assert!(device.is_connected());
}

#[test]
fn stream_measurements_yields_dist_records() {
    let sim = SimulatedDevice::new();
    let (mut device, sink) = connect(&sim);
    sim.push_stream_line("POS,1.0,1.0,0.0,90");
    sim.push_stream_line("DIST,1,AN0,150E");
    sim.push_stream_line("DIST,2,AN0,150E,0.00,0.00,0.00,1.85,AN1,DD34,2.24,0.00,0.00,1.79");
    sim.start_streaming();

    let stop = AtomicBool::new(false);
    let mut records = Vec::new();
    let summary = device
        .stream_measurements(&stop, |m| {
            records.push(m);
            ControlFlow::Break(())
        })
        .unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(records.len(), 1);
    let ids: Vec<_> = records[0].anchors.iter().map(|a| a.anchor_id.as_str()).collect();
    assert_eq!(ids, ["150E", "DD34"]);
    assert_eq!(records[0].position, None);
    assert!(sink
        .at_level(Level::Debug)
        .iter()
        .any(|e| e.message == "skipping malformed record"));
}

#[test]
fn stream_ends_on_transport_failure() {
    let sim = SimulatedDevice::new();
    let (mut device, _sink) = connect(&sim);
    sim.start_streaming();
    sim.unplug();

    let stop = AtomicBool::new(false);
    let result = device.stream_positions(&stop, |_| ControlFlow::Continue(()));
    assert!(matches!(result, Err(DriverError::Io(_))));
}
