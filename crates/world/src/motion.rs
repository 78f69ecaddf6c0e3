//! Local motion model.
//!
//! Advances the locally-controlled entity by one tick from the set of held
//! directions. The model is frame-based: there is no delta time, one call is
//! one tick.

use crate::LocalEntity;

/// Default top speed per axis, before the entity's speed multiplier.
pub const DEFAULT_MAX_SPEED: f64 = 6.0;

/// Default per-tick velocity increment while a direction is held.
pub const DEFAULT_VELOCITY_STEP: f64 = 0.85;

/// Default per-tick multiplier applied to an axis with no direction held.
pub const DEFAULT_DAMPING: f64 = 0.85;

/// One of the four axis-aligned movement directions. `Up` is +y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Self::Left, Self::Right, Self::Up, Self::Down];

    fn bit(self) -> u8 {
        match self {
            Self::Left => 0b0001,
            Self::Right => 0b0010,
            Self::Up => 0b0100,
            Self::Down => 0b1000,
        }
    }
}

/// The set of directions currently held by the input collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeldDirections(u8);

impl HeldDirections {
    pub const NONE: HeldDirections = HeldDirections(0);

    pub fn with(mut self, direction: Direction) -> Self {
        self.insert(direction);
        self
    }

    pub fn insert(&mut self, direction: Direction) {
        self.0 |= direction.bit();
    }

    pub fn remove(&mut self, direction: Direction) {
        self.0 &= !direction.bit();
    }

    pub fn contains(self, direction: Direction) -> bool {
        self.0 & direction.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Direction> for HeldDirections {
    fn from_iter<I: IntoIterator<Item = Direction>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

/// Acceleration/decay parameters for the local entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionModel {
    max_speed: f64,
    velocity_step: f64,
    damping: f64,
}

impl Default for MotionModel {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SPEED, DEFAULT_VELOCITY_STEP, DEFAULT_DAMPING)
    }
}

impl MotionModel {
    /// Create a motion model.
    ///
    /// # Panics
    /// If `damping` is not strictly between 0 and 1, or if `max_speed` or
    /// `velocity_step` is not positive.
    pub fn new(max_speed: f64, velocity_step: f64, damping: f64) -> Self {
        assert!(max_speed > 0.0, "max_speed must be positive");
        assert!(velocity_step > 0.0, "velocity_step must be positive");
        assert!(
            damping > 0.0 && damping < 1.0,
            "damping must be strictly between 0 and 1, got {damping}"
        );

        Self {
            max_speed,
            velocity_step,
            damping,
        }
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn velocity_step(&self) -> f64 {
        self.velocity_step
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }

    /// Advance `entity` by one tick.
    ///
    /// Held directions accelerate their axis until the capped speed has been
    /// reached. Both the step and the cap scale with the entity's
    /// `speed_multiplier`. An axis with neither of its directions held decays
    /// toward zero. Position then integrates velocity once.
    pub fn step(&self, entity: &mut LocalEntity, held: HeldDirections) {
        let cap = self.max_speed * entity.speed_multiplier;
        let increment = self.velocity_step * entity.speed_multiplier;
        let velocity = &mut entity.velocity;

        if held.contains(Direction::Left) && velocity[0] > -cap {
            velocity[0] -= increment;
        }
        if held.contains(Direction::Right) && velocity[0] < cap {
            velocity[0] += increment;
        }
        if held.contains(Direction::Up) && velocity[1] < cap {
            velocity[1] += increment;
        }
        if held.contains(Direction::Down) && velocity[1] > -cap {
            velocity[1] -= increment;
        }

        if !held.contains(Direction::Left) && !held.contains(Direction::Right) {
            velocity[0] *= self.damping;
        }
        if !held.contains(Direction::Up) && !held.contains(Direction::Down) {
            velocity[1] *= self.damping;
        }

        entity.is_moving = !held.is_empty();

        entity.position[0] += entity.velocity[0];
        entity.position[1] += entity.velocity[1];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> LocalEntity {
        LocalEntity::new("me".to_string(), [0.0, 0.0])
    }

    #[test]
    fn test_held_directions_set_ops() {
        let mut held: HeldDirections = [Direction::Left, Direction::Up].into_iter().collect();
        assert!(held.contains(Direction::Left));
        assert!(held.contains(Direction::Up));
        assert!(!held.contains(Direction::Down));

        held.remove(Direction::Left);
        assert!(!held.contains(Direction::Left));
        assert!(!held.is_empty());

        held.remove(Direction::Up);
        assert!(held.is_empty());
    }

    #[test]
    fn test_right_accelerates_and_integrates() {
        let model = MotionModel::new(6.0, 1.0, 0.5);
        let mut e = entity();
        let held = HeldDirections::NONE.with(Direction::Right);

        model.step(&mut e, held);
        assert_eq!(e.velocity, [1.0, 0.0]);
        assert_eq!(e.position, [1.0, 0.0]);

        model.step(&mut e, held);
        assert_eq!(e.velocity, [2.0, 0.0]);
        assert_eq!(e.position, [3.0, 0.0]);
        assert!(e.is_moving);
    }

    #[test]
    fn test_up_is_positive_y() {
        let model = MotionModel::new(6.0, 1.0, 0.5);
        let mut e = entity();

        model.step(&mut e, HeldDirections::NONE.with(Direction::Up));
        assert_eq!(e.velocity[1], 1.0);

        let mut e = entity();
        model.step(&mut e, HeldDirections::NONE.with(Direction::Down));
        assert_eq!(e.velocity[1], -1.0);
    }

    #[test]
    fn test_acceleration_stops_at_cap() {
        let model = MotionModel::new(3.0, 1.0, 0.5);
        let mut e = entity();
        let held = HeldDirections::NONE.with(Direction::Left);

        for _ in 0..10 {
            model.step(&mut e, held);
        }
        assert_eq!(e.velocity[0], -3.0);
    }

    #[test]
    fn test_speed_multiplier_scales_step_and_cap() {
        let model = MotionModel::new(3.0, 1.0, 0.5);
        let mut e = entity();
        e.speed_multiplier = 2.0;
        let held = HeldDirections::NONE.with(Direction::Right);

        model.step(&mut e, held);
        assert_eq!(e.velocity[0], 2.0);

        for _ in 0..10 {
            model.step(&mut e, held);
        }
        assert_eq!(e.velocity[0], 6.0);
    }

    #[test]
    fn test_unheld_axis_decays_but_never_reaches_zero() {
        let model = MotionModel::new(6.0, 1.0, 0.5);
        let mut e = entity();
        e.velocity = [4.0, -4.0];

        model.step(&mut e, HeldDirections::NONE);
        assert_eq!(e.velocity, [2.0, -2.0]);
        assert!(!e.is_moving);

        for _ in 0..40 {
            model.step(&mut e, HeldDirections::NONE);
        }
        assert!(e.velocity[0] > 0.0);
        assert!(e.is_stopped(1e-6));
    }

    #[test]
    fn test_held_axis_does_not_decay_other_axis_does() {
        let model = MotionModel::new(6.0, 1.0, 0.5);
        let mut e = entity();
        e.velocity = [2.0, 2.0];

        model.step(&mut e, HeldDirections::NONE.with(Direction::Right));
        assert_eq!(e.velocity, [3.0, 1.0]);
    }

    #[test]
    fn test_default_step_with_doubled_multiplier() {
        let model = MotionModel::default();
        let mut e = entity();
        e.speed_multiplier = 2.0;

        model.step(&mut e, HeldDirections::NONE.with(Direction::Right));
        assert!((e.velocity[0] - 2.0 * DEFAULT_VELOCITY_STEP).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "damping must be strictly between 0 and 1")]
    fn test_damping_of_one_rejected() {
        MotionModel::new(6.0, 1.0, 1.0);
    }
}
