use ibm4_core::prelude::*;
use ibm4_core::protocol::locator::Locator;
use ibm4_core::protocol::mock::{MockTransport, TransportCall};
use ibm4_core::protocol::sim::SimulatedDevice;
use ibm4_core::protocol::SerialSettings;
use pretty_assertions::assert_eq;
use std::cell::RefCell;

fn quiet_config() -> SessionConfig {
    SessionConfig {
        identify_on_open: false,
        ..SessionConfig::default()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn test_dc_write_then_average() {
    init_tracing();
    let mock = MockTransport::new("/dev/ttyACM0")
        .with_responses(["Average0:10\r\n...\n3 2.500\n"]);
    let log = mock.log();
    let mut session = Session::with_transport(mock, quiet_config()).unwrap();

    session.set_mode(ReadMode::Dc).unwrap();
    session.write_voltage(Channel::A0, 1.5).unwrap();
    let value = session.read_average(Channel::A2, 10).unwrap();

    assert_eq!(value, 2.5);
    let writes = log.writes();
    assert!(writes.contains(&"Write0:1.50\r\n".to_string()));
    assert_eq!(writes.last().map(String::as_str), Some("Average0:10\r\n"));
}

#[test]
fn test_single_token_round_trip() {
    let mock = MockTransport::new("sim0").with_responses(["Average0:10\r\n1.234\r\n"]);
    let mut session = Session::with_transport(mock, quiet_config()).unwrap();
    assert_eq!(session.read_average(Channel::A2, 10).unwrap(), 1.234);
}

#[test]
fn test_stale_write_echo_is_discarded_before_read() {
    let mock = MockTransport::new("sim0").echoing().with_responses(["1.234\r\n"]);
    let log = mock.log();
    let mut session = Session::with_transport(mock, quiet_config()).unwrap();
    log.clear();

    session.write_voltage(Channel::A0, 1.5).unwrap();
    assert_eq!(session.read_average(Channel::A2, 10).unwrap(), 1.234);

    assert_eq!(
        log.calls(),
        vec![
            TransportCall::Write(b"Write0:1.50\r\n".to_vec()),
            TransportCall::ResetInputBuffer,
            TransportCall::Write(b"Average0:10\r\n".to_vec()),
            TransportCall::ReadUntil,
            TransportCall::ResetInputBuffer,
        ]
    );
}

#[test]
fn test_write_failure_leaves_session_open() {
    // Open writes Mode0, Write0, Write1 and PWM9, then the link stalls
    let mock = MockTransport::new("sim0").failing_writes_after(4);
    let mut session = Session::with_transport(mock, quiet_config()).unwrap();

    assert!(matches!(
        session.read_average(Channel::A2, 10),
        Err(ProtocolError::WriteTimeout)
    ));
    assert_eq!(session.state(), SessionState::Open);
    assert!(session.comms_status());

    assert!(matches!(
        session.write_voltage(Channel::A0, 1.0),
        Err(ProtocolError::WriteTimeout)
    ));
    assert_eq!(session.state(), SessionState::Open);
    assert!(session.comms_status());
}

#[test]
fn test_failed_zeroing_on_open_releases_transport() {
    // Mode0 goes through, Write0:0.00 fails
    let mock = MockTransport::new("sim0").failing_writes_after(1);
    let log = mock.log();

    let result = Session::with_transport(mock, quiet_config());
    assert!(matches!(result, Err(ProtocolError::WriteTimeout)));
    assert_eq!(log.calls().last(), Some(&TransportCall::Close));
}

#[test]
fn test_invalid_arguments_send_nothing() {
    let mock = MockTransport::new("sim0");
    let log = mock.log();
    let mut session = Session::with_transport(mock, quiet_config()).unwrap();
    log.clear();

    assert!(matches!(
        session.read_single(Channel::A0),
        Err(ProtocolError::InvalidChannel(_))
    ));
    assert!(matches!(
        session.write_voltage(Channel::A1, 3.3),
        Err(ProtocolError::OutOfRange { .. })
    ));
    assert!(matches!(
        session.write_voltage(Channel::A1, -0.01),
        Err(ProtocolError::OutOfRange { .. })
    ));
    assert!(matches!(
        session.diff_read_average(Channel::A3, Channel::A3, 10),
        Err(ProtocolError::InvalidChannel(_))
    ));
    assert!(log.calls().is_empty());
}

#[test]
fn test_every_read_is_paired_with_one_reset() {
    let mock = MockTransport::new("sim0").with_responses([
        "Read0:1\r\n0.5\r\n",
        "Read1:5\r\n1 2 3 4 5\r\n",
        "Diff_Read0:1:1\r\n-0.25\r\n",
    ]);
    let log = mock.log();
    let mut session = Session::with_transport(mock, quiet_config()).unwrap();
    log.clear();

    session.read_single(Channel::A2).unwrap();
    let multi = session.read_multiple(Channel::A3, 5).unwrap();
    let diff = session.diff_read_single(Channel::A2, Channel::A3).unwrap();

    assert_eq!(multi.mean, 3.0);
    assert_eq!(multi.half_range, 2.0);
    assert_eq!(diff, -0.25);

    let calls = log.calls();
    assert_eq!(calls.len(), 9);
    for triple in calls.chunks(3) {
        assert!(matches!(triple[0], TransportCall::Write(_)));
        assert_eq!(triple[1], TransportCall::ReadUntil);
        assert_eq!(triple[2], TransportCall::ResetInputBuffer);
    }
}

#[test]
fn test_close_twice_zeroes_once() {
    let mock = MockTransport::new("sim0");
    let log = mock.log();
    let mut session = Session::with_transport(mock, quiet_config()).unwrap();
    log.clear();

    session.close();
    session.close();
    drop(session);

    assert_eq!(
        log.calls(),
        vec![
            TransportCall::Write(b"Write0:0.00\r\n".to_vec()),
            TransportCall::Write(b"Write1:0.00\r\n".to_vec()),
            TransportCall::Write(b"PWM9:0\r\n".to_vec()),
            TransportCall::Close,
        ]
    );
}

#[test]
fn test_drop_zeroes_outputs() {
    let mock = MockTransport::new("sim0");
    let log = mock.log();
    {
        let mut session = Session::with_transport(mock, quiet_config()).unwrap();
        session.write_voltage(Channel::A0, 2.0).unwrap();
    }
    let writes = log.writes();
    assert_eq!(
        &writes[writes.len() - 3..],
        &["Write0:0.00\r\n", "Write1:0.00\r\n", "PWM9:0\r\n"]
    );
    assert_eq!(log.calls().last(), Some(&TransportCall::Close));
}

#[test]
fn test_locator_stops_at_first_match() {
    let opened = RefCell::new(Vec::new());
    let opener = |name: &str, _: &SerialSettings| {
        opened.borrow_mut().push(name.to_string());
        Ok::<_, ProtocolError>(SimulatedDevice::new(name))
    };
    let mut locator = Locator::with_opener(opener, SerialSettings::default());
    let candidates = vec!["/dev/ttyACM0".to_string(), "/dev/ttyACM1".to_string()];

    assert_eq!(locator.find_first_in(&candidates).unwrap(), "/dev/ttyACM0");
    assert_eq!(*opened.borrow(), vec!["/dev/ttyACM0".to_string()]);
}

#[test]
fn test_simulated_bench() {
    init_tracing();
    let device = SimulatedDevice::new("sim0").noise(0.0);
    let mut session = Session::with_transport(device, SessionConfig::default()).unwrap();
    assert_eq!(session.signature(), Some("ISBY-UCC-RevA.1"));

    session.write_voltage(Channel::A0, 1.2).unwrap();
    session.write_voltage(Channel::A1, 0.4).unwrap();

    let all = session.read_all_channels(5).unwrap();
    assert_eq!(all, [1.2, 0.4, 0.6, 0.0, 0.0]);

    let diff = session.diff_read_average(Channel::A2, Channel::A3, 5).unwrap();
    assert!((diff - 0.8).abs() < 1e-9);

    let counts = session.read_multiple_binary(Channel::A2, 4).unwrap();
    assert_eq!(counts.samples.len(), 4);
    assert_eq!(counts.half_range, 0.0);

    session.set_mode(ReadMode::Ac).unwrap();
    assert_eq!(session.mode(), Some(ReadMode::Ac));
}

#[test]
fn test_simulated_sweep() {
    let device = SimulatedDevice::new("sim0");
    let mut session = Session::with_transport(device, SessionConfig::default()).unwrap();
    let sweep = LinearSweep::new(Channel::A0, 0.5, 2.5, 5, 4).settle(std::time::Duration::ZERO);

    let points = sweep.run(&mut session).unwrap();
    assert_eq!(points.len(), 4);
    assert!((points[0].set_voltage - 0.5).abs() < 1e-9);
    for point in &points {
        assert!((point.readings[0] - point.set_voltage).abs() < 0.01);
    }
}
