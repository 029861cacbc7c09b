//! Expansion of high level movements into ordered phases.

use core::time::Duration;

use heapless::Vec;

use super::{Completion, MotionPhase};
use crate::protocol::TurnDirection;

/// Most phases a single request may expand into.
pub const MAX_PATTERN_PHASES: usize = 8;

pub type PhasePlan = Vec<MotionPhase, MAX_PATTERN_PHASES>;

/// Corner turn of a square, clockwise.
pub const SQUARE_CORNER_DEG: f32 = 90.0;

/// Fraction of the rotation setpoint used while driving an arc.
pub const CIRCLE_ROTATION_RATIO: f32 = 0.5;

/// Four sides of `side` driven forward, each followed by a 90° clockwise corner.
#[must_use]
pub fn square(velocity: f32, rotation: f32, side: Duration) -> PhasePlan {
    let mut plan = PhasePlan::new();
    for _ in 0..4 {
        // Eight phases fill the plan exactly.
        let _ = plan.push(MotionPhase::drive(velocity, side));
        let _ = plan.push(MotionPhase::spin_by(rotation, SQUARE_CORNER_DEG));
    }
    plan
}

/// One arc driven until the heading has changed by a full turn.
#[must_use]
pub fn circle(velocity: f32, rotation: f32, direction: TurnDirection) -> PhasePlan {
    let mut plan = PhasePlan::new();
    let _ = plan.push(MotionPhase {
        velocity: Some(velocity),
        rotation: Some(rotation * CIRCLE_ROTATION_RATIO * direction.sign()),
        completion: Completion::Heading(360.0),
    });
    plan
}

/// In-place rotation by `angle_deg` in `direction`.
#[must_use]
pub fn turn(rotation: f32, angle_deg: f32, direction: TurnDirection) -> MotionPhase {
    MotionPhase::spin_by(rotation * direction.sign(), angle_deg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_alternates_sides_and_corners() {
        let plan = square(48.0, 32.0, Duration::from_secs(2));
        assert_eq!(plan.len(), 8);
        for pair in plan.chunks(2) {
            assert_eq!(pair[0], MotionPhase::drive(48.0, Duration::from_secs(2)));
            assert_eq!(pair[1].rotation, Some(32.0));
            assert_eq!(pair[1].velocity, None);
            assert_eq!(pair[1].completion, Completion::Heading(90.0));
        }
    }

    #[test]
    fn circle_direction_sets_rotation_sign() {
        let right = circle(40.0, 80.0, TurnDirection::Right);
        let left = circle(40.0, 80.0, TurnDirection::Left);

        assert_eq!(right[0].rotation, Some(40.0));
        assert_eq!(left[0].rotation, Some(-40.0));
        assert_eq!(left[0].velocity, Some(40.0));
        assert_eq!(left[0].completion, Completion::Heading(360.0));
    }

    #[test]
    fn turn_is_signed_by_direction() {
        let phase = turn(30.0, 45.0, TurnDirection::Left);
        assert_eq!(phase.rotation, Some(-30.0));
        assert_eq!(phase.completion, Completion::Heading(45.0));
    }
}
