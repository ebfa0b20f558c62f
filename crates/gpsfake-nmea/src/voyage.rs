//! Voyage plans: cyclic schedules of course and speed over elapsed time.

use crate::navigation::NavigationModel;
use crate::position::Position;
use gpsfake_common::config::SimulatorConfig;

/// Course and speed to hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bearing {
    /// Course over ground (degrees true).
    pub course: f64,
    /// Speed over ground (knots).
    pub speed: f64,
}

/// How long a leg lasts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LegLength {
    /// Seconds of plan time.
    Finite(f64),
    /// Sail this leg for the rest of the voyage.
    Forever,
}

/// One leg of a voyage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leg {
    /// Duration of the leg.
    pub length: LegLength,
    /// Course and speed held on the leg.
    pub bearing: Bearing,
}

/// An ordered, repeating sequence of legs.
///
/// Elapsed time is taken modulo the summed length of the finite legs, so
/// the voyage repeats forever. A [`LegLength::Forever`] leg ends the lookup
/// as soon as the scan reaches it, whatever the elapsed time; it only makes
/// sense as the sole or last leg.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VoyagePlan {
    legs: Vec<Leg>,
    total_length: f64,
    start: Position,
}

impl VoyagePlan {
    /// Create an empty plan that (re)starts at the given coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            legs: Vec::new(),
            total_length: 0.0,
            start: Position::new(latitude, longitude),
        }
    }

    /// Build a plan from simulator configuration.
    pub fn from_config(config: &SimulatorConfig) -> Self {
        let mut plan = Self::new(config.latitude, config.longitude);
        for leg in &config.legs {
            plan.add_leg(leg.length, leg.course, leg.speed);
        }
        plan
    }

    /// Append a leg. A negative `length` means "forever".
    pub fn add_leg(&mut self, length: f64, course: f64, speed: f64) {
        let length = if length < 0.0 {
            LegLength::Forever
        } else {
            self.total_length += length;
            LegLength::Finite(length)
        };
        self.legs.push(Leg {
            length,
            bearing: Bearing { course, speed },
        });
    }

    /// Builder form of [`add_leg`](Self::add_leg).
    pub fn leg(mut self, length: f64, course: f64, speed: f64) -> Self {
        self.add_leg(length, course, speed);
        self
    }

    /// Sum of all finite leg lengths: the period of the plan.
    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    /// Legs in sailing order.
    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    /// Where the voyage starts (and restarts on every lap).
    pub fn start(&self) -> Position {
        self.start
    }

    /// Reduce elapsed time into one lap of the plan.
    fn lap_time(&self, elapsed: f64) -> f64 {
        if self.total_length > 0.0 {
            elapsed.rem_euclid(self.total_length)
        } else {
            elapsed
        }
    }

    /// Course and speed at `elapsed` seconds into the voyage.
    ///
    /// Returns `None` only when the plan has no legs.
    pub fn course_at(&self, elapsed: f64) -> Option<Bearing> {
        let when = self.lap_time(elapsed);
        let mut accumulated = 0.0;
        for leg in &self.legs {
            match leg.length {
                LegLength::Forever => return Some(leg.bearing),
                LegLength::Finite(length) => {
                    accumulated += length;
                    if when < accumulated {
                        return Some(leg.bearing);
                    }
                }
            }
        }
        self.legs.last().map(|leg| leg.bearing)
    }

    /// Like [`course_at`](Self::course_at), but puts `model` back at the
    /// start position whenever the voyage begins a new lap.
    pub fn steer(&self, elapsed: f64, model: &mut NavigationModel) -> Option<Bearing> {
        if self.lap_time(elapsed) == 0.0 {
            model.set_position(self.start.latitude(), self.start.longitude());
        }
        self.course_at(elapsed)
    }
}
