mod common;

use balance_core::config::WheelSide;
use balance_core::encoder::WheelEncoder;
use balance_core::{EdgeBinding, MicrosInstant, PulseCounter};

use common::turn_wheel;

#[test]
fn forward_then_reverse_returns_to_origin() {
    for edges in [1, 3, 4, 97, 1_320] {
        let counter = PulseCounter::new();
        turn_wheel(&counter, edges);
        assert_eq!(counter.snapshot(), edges);
        turn_wheel(&counter, -edges);
        assert_eq!(counter.snapshot(), 0);
    }
}

#[test]
fn reverse_rotation_counts_down() {
    let counter = PulseCounter::new();
    turn_wheel(&counter, -250);
    assert_eq!(counter.snapshot(), -250);
}

#[test]
fn bindings_keep_wheels_independent() {
    let (left, right) = (PulseCounter::new(), PulseCounter::new());
    let left_edges = EdgeBinding::new(WheelSide::Left, &left);
    let right_edges = EdgeBinding::new(WheelSide::Right, &right);
    left_edges.prime(false, false);
    right_edges.prime(false, false);

    for (a, b) in [(true, false), (true, true), (false, true), (false, false)] {
        left_edges.on_edge(a, b);
    }
    right_edges.on_edge(false, true);

    assert_eq!(left.snapshot(), 4);
    assert_eq!(right.snapshot(), -1);
}

#[test]
fn encoder_velocity_tracks_edges_per_second() {
    let counter = PulseCounter::new();
    let mut encoder = WheelEncoder::new(&counter);

    assert_eq!(encoder.velocity(MicrosInstant::from_millis(0)), 0.0);
    turn_wheel(&counter, 132);
    let velocity = encoder.velocity(MicrosInstant::from_millis(10));
    assert!((velocity - 13_200.0).abs() < 1e-2, "velocity was {velocity}");
    assert_eq!(encoder.position(), 132);
}
