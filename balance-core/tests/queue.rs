mod common;

use balance_core::protocol::CommandKind;
use balance_core::telemetry::TelemetryEventKind;
use balance_core::{BalanceConfig, PulseCounter};

use common::{ImuControl, at, send, supervisor, turn_wheel};

#[test]
fn queue_full_is_rejected_and_existing_entries_kept() {
    let (left, right) = (PulseCounter::new(), PulseCounter::new());
    let imu = ImuControl::new(0.0);
    let config = BalanceConfig {
        queue_capacity: 4,
        ..BalanceConfig::DEFAULT
    };
    let mut robot = supervisor(config, &imu, &left, &right);

    let kinds = ["turn_left", "turn_right", "turn_around", "turn_left"];
    for kind in kinds {
        let line = format!(r#"{{"command":"{kind}"}}"#);
        let responses = send(&mut robot, &line, at(0));
        assert!(responses[0].starts_with(r#"{"success":true"#), "{kind}");
    }

    let responses = send(&mut robot, r#"{"command":"turn_right"}"#, at(0));
    assert!(responses[0].starts_with(r#"{"success":false,"message":"queue full"#));

    let queued: Vec<CommandKind> = robot.scheduler().iter().map(|c| c.kind).collect();
    assert_eq!(
        queued,
        [
            CommandKind::TurnLeft,
            CommandKind::TurnRight,
            CommandKind::TurnAround,
            CommandKind::TurnLeft,
        ]
    );
}

#[test]
fn commands_run_in_fifo_order_and_complete() {
    let (left, right) = (PulseCounter::new(), PulseCounter::new());
    let imu = ImuControl::new(0.0);
    let mut robot = supervisor(BalanceConfig::DEFAULT, &imu, &left, &right);

    send(&mut robot, r#"{"command":"turn_left","parameters":{"angle":10}}"#, at(0));
    send(
        &mut robot,
        r#"{"command":"move_forward","parameters":{"duration":0.5}}"#,
        at(0),
    );

    robot.tick(at(0));
    assert_eq!(robot.scheduler().active().map(|c| c.kind), Some(CommandKind::TurnLeft));
    assert!(robot.controller().setpoint().rotation < 0.0);

    // Counterclockwise spin: right wheel forward, left wheel back.
    let geometry = BalanceConfig::DEFAULT.geometry;
    let mut edges = 0;
    while geometry.heading_change_deg(-edges, edges) > -10.0 {
        edges += 1;
    }
    turn_wheel(&left, -edges);
    turn_wheel(&right, edges);

    robot.tick(at(10));
    assert_eq!(
        robot.scheduler().active().map(|c| c.kind),
        Some(CommandKind::MoveForward)
    );
    let setpoint = robot.controller().setpoint();
    assert!(setpoint.rotation.abs() < f32::EPSILON);
    assert!(setpoint.velocity > 0.0);

    robot.tick(at(500));
    assert!(robot.scheduler().active().is_some());
    robot.tick(at(510));
    assert!(robot.scheduler().is_idle());
    assert!(robot.controller().setpoint().is_neutral());

    let lifecycle: Vec<TelemetryEventKind> = robot
        .telemetry()
        .oldest_first()
        .map(|record| record.event)
        .filter(|event| {
            matches!(
                event,
                TelemetryEventKind::CommandStarted(_) | TelemetryEventKind::CommandCompleted(_)
            )
        })
        .collect();
    assert_eq!(
        lifecycle,
        [
            TelemetryEventKind::CommandStarted(CommandKind::TurnLeft),
            TelemetryEventKind::CommandCompleted(CommandKind::TurnLeft),
            TelemetryEventKind::CommandStarted(CommandKind::MoveForward),
            TelemetryEventKind::CommandCompleted(CommandKind::MoveForward),
        ]
    );
}

#[test]
fn square_expands_into_eight_phases() {
    let (left, right) = (PulseCounter::new(), PulseCounter::new());
    let imu = ImuControl::new(0.0);
    let mut robot = supervisor(BalanceConfig::DEFAULT, &imu, &left, &right);

    let responses = send(
        &mut robot,
        r#"{"command":"square","parameters":{"side":1.5,"speed":0.25}}"#,
        at(0),
    );
    assert!(responses[0].contains("8 phases"), "{}", responses[0]);
    assert_eq!(robot.scheduler().len(), 8);
    assert!(robot.scheduler().iter().all(|c| c.kind == CommandKind::Square));
}

#[test]
fn stop_preempts_running_pattern() {
    let (left, right) = (PulseCounter::new(), PulseCounter::new());
    let imu = ImuControl::new(0.0);
    let mut robot = supervisor(BalanceConfig::DEFAULT, &imu, &left, &right);

    send(&mut robot, r#"{"command":"circle"}"#, at(0));
    robot.tick(at(0));
    assert!(!robot.controller().setpoint().is_neutral());

    let responses = send(&mut robot, r#"{"command":"stop","priority":100}"#, at(5));
    assert!(responses[0].contains("1 dropped"), "{}", responses[0]);
    assert!(robot.scheduler().is_idle());
    assert!(robot.controller().setpoint().is_neutral());
}
