mod common;

use balance_core::protocol::{MAX_LINE_LEN, Request};
use balance_core::telemetry::TelemetryEventKind;
use balance_core::{BalanceConfig, PidGains, PulseCounter};

use common::{ImuControl, at, send, supervisor};

#[test]
fn malformed_lines_change_nothing() {
    let (left, right) = (PulseCounter::new(), PulseCounter::new());
    let imu = ImuControl::new(1.0);
    let mut robot = supervisor(BalanceConfig::DEFAULT, &imu, &left, &right);
    robot.tick(at(0));
    send(&mut robot, r#"{"command":"turn_left"}"#, at(1));

    let gains = robot.controller().gains();
    let depth = robot.scheduler().len();
    let integral = robot.controller().integral();

    let lines = [
        "not json",
        "   ",
        r#"{"command":"fly"}"#,
        r#"{"command":"move_forward","parameters":{"speed":3}}"#,
        r#"{"command":"set_gains","parameters":{"kp":"high"}}"#,
        r#"{"command":"move_forward","priority":100}"#,
        r#"{"parameters":{"speed":0.5}}"#,
        r#"{"command":"set_target","parameters":{"angle":80}}"#,
        r#"{"command":"reset"} trailing"#,
    ];
    for line in lines {
        let responses = send(&mut robot, line, at(2));
        assert_eq!(responses.len(), 1, "{line}");
        assert!(
            responses[0].starts_with(r#"{"success":false,"message":""#),
            "{line} -> {}",
            responses[0]
        );
    }

    assert_eq!(robot.controller().gains(), gains);
    assert_eq!(robot.scheduler().len(), depth);
    assert!((robot.controller().integral() - integral).abs() < f32::EPSILON);
    assert!(robot.controller().setpoint().is_neutral());

    let rejected = robot
        .telemetry()
        .oldest_first()
        .filter(|record| record.event == TelemetryEventKind::RequestRejected)
        .count();
    assert_eq!(rejected, lines.len());
}

#[test]
fn overlong_line_yields_single_error() {
    let (left, right) = (PulseCounter::new(), PulseCounter::new());
    let imu = ImuControl::new(0.0);
    let mut robot = supervisor(BalanceConfig::DEFAULT, &imu, &left, &right);

    let long = "x".repeat(MAX_LINE_LEN + 40);
    let responses = send(&mut robot, &long, at(0));
    assert_eq!(responses.len(), 1);
    assert!(responses[0].contains("line too long"));

    let responses = send(&mut robot, r#"{"command":"status"}"#, at(0));
    assert_eq!(responses.len(), 1);
    assert!(responses[0].starts_with(r#"{"success":true"#));
}

#[test]
fn crlf_terminated_lines_answer_once() {
    let (left, right) = (PulseCounter::new(), PulseCounter::new());
    let imu = ImuControl::new(0.0);
    let mut robot = supervisor(BalanceConfig::DEFAULT, &imu, &left, &right);

    let responses = send(&mut robot, "{\"command\":\"status\"}\r", at(0));
    assert_eq!(responses.len(), 1);
}

#[test]
fn status_carries_live_data() {
    let (left, right) = (PulseCounter::new(), PulseCounter::new());
    let imu = ImuControl::new(2.0);
    let mut robot = supervisor(BalanceConfig::DEFAULT, &imu, &left, &right);
    robot.tick(at(0));
    send(
        &mut robot,
        r#"{"command":"set_gains","parameters":{"kp":35,"kd":1.5}}"#,
        at(1),
    );

    let responses = send(&mut robot, r#"{"command":"status"}"#, at(1));
    let status = &responses[0];
    assert!(status.contains(r#""data":{"angle":2.000"#), "{status}");
    assert!(status.contains(r#""kp":35.000,"ki":0.500,"kd":1.500"#), "{status}");
    assert!(status.contains(r#""balanced":true"#), "{status}");
    assert_eq!(robot.controller().gains(), PidGains::new(35.0, 0.5, 1.5));
}

#[test]
fn every_error_has_a_reason() {
    let lines = [
        "",
        "{}",
        r#"{"command":1}"#,
        r#"{"command":"stop","priority":7.5}"#,
        r#"{"command":"stop","parameters":5}"#,
        r#"{"command":"turn_left","parameters":{"angle":0}}"#,
    ];
    for line in lines {
        let error = Request::parse(line).unwrap_err();
        assert!(!error.to_string().is_empty(), "{line}");
    }
}
