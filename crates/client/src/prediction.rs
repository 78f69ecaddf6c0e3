//! Local prediction controller.
//!
//! Advances the local entity once per tick from the held directions, then
//! produces the `move` report for that tick. Runs independently of snapshot
//! arrival.

use lattice_wire::MoveProto;
use lattice_world::{EntityRegistry, HeldDirections, LocalEntity, MotionModel};

/// Input collaborator's view for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputState {
    pub held: HeldDirections,
    /// False while input must be suppressed (window unfocused, text entry
    /// focused). Held directions are then ignored.
    pub accept_input: bool,
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            held: HeldDirections::NONE,
            accept_input: true,
        }
    }
}

impl InputState {
    pub fn holding(held: HeldDirections) -> Self {
        Self {
            held,
            accept_input: true,
        }
    }

    /// Directions that actually apply this tick.
    pub fn effective(&self) -> HeldDirections {
        if self.accept_input {
            self.held
        } else {
            HeldDirections::NONE
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPredictor {
    model: MotionModel,
    stop_epsilon: f64,
}

impl LocalPredictor {
    pub fn new(model: MotionModel, stop_epsilon: f64) -> Self {
        Self {
            model,
            stop_epsilon,
        }
    }

    pub fn model(&self) -> &MotionModel {
        &self.model
    }

    /// Advance the local entity one tick. Returns the outbound report, or
    /// `None` if no local entity exists yet.
    pub fn tick(&self, registry: &mut EntityRegistry, input: &InputState) -> Option<MoveProto> {
        let local = registry.local_mut()?;
        self.model.step(local, input.effective());
        Some(MoveProto::from(&*local))
    }

    pub fn is_stopped(&self, local: &LocalEntity) -> bool {
        local.is_stopped(self.stop_epsilon)
    }
}
