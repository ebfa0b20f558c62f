//! Dead-reckoning navigation model.
//!
//! Produces one RMC sentence per simulated second from a position, heading
//! and speed, optionally steered by a [`VoyagePlan`]. The step uses a
//! spherical earth and a fixed floating-point evaluation order so that
//! generated fixes are reproducible bit for bit.

use crate::position::Position;
use crate::sentence;
use crate::voyage::VoyagePlan;
use std::f64::consts::PI;
use std::thread;
use std::time::Duration;
use tracing::trace;

/// Mean earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per nautical mile.
pub const KM_PER_NAUTICAL_MILE: f64 = 1.852;

/// Real-time interval between sentences of a 1 Hz receiver.
pub const DEFAULT_PACING: Duration = Duration::from_secs(1);

/// Simulated receiver state.
#[derive(Debug, Clone)]
pub struct NavigationModel {
    position: Position,
    /// Degrees true.
    heading: f64,
    /// Knots.
    speed: f64,
    /// Simulated clock, epoch seconds.
    clock: f64,
    /// Clock value the plan's elapsed time is measured from.
    start_clock: f64,
    plan: Option<VoyagePlan>,
    pacing: Duration,
}

impl NavigationModel {
    /// Create a model at `latitude`/`longitude` heading north at one knot.
    pub fn new(clock: f64, latitude: f64, longitude: f64) -> Self {
        Self {
            position: Position::new(latitude, longitude),
            heading: 0.0,
            speed: 1.0,
            clock,
            start_clock: clock,
            plan: None,
            pacing: DEFAULT_PACING,
        }
    }

    /// Set the initial course (degrees true).
    pub fn with_course(mut self, heading: f64) -> Self {
        self.heading = heading;
        self
    }

    /// Set the initial speed (knots).
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Set the real-time delay applied by [`feed`](Self::feed).
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Steer the model with a voyage plan, starting now.
    ///
    /// The plan is consulted immediately at elapsed time zero, which moves
    /// the model to the plan's start position and picks up the first leg.
    pub fn with_plan(mut self, plan: VoyagePlan) -> Self {
        self.start_clock = self.clock;
        self.plan = Some(plan);
        self.follow_plan();
        self
    }

    /// Move the model without simulating travel.
    pub fn set_position(&mut self, latitude: f64, longitude: f64) {
        self.position = Position::new(latitude, longitude);
    }

    /// Current position.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Current heading (degrees true).
    pub fn heading(&self) -> f64 {
        self.heading
    }

    /// Current speed (knots).
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Simulated clock (epoch seconds).
    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Seconds since the plan (or the model) started.
    pub fn elapsed(&self) -> f64 {
        self.clock - self.start_clock
    }

    /// Voyage plan steering the model, if any.
    pub fn plan(&self) -> Option<&VoyagePlan> {
        self.plan.as_ref()
    }

    fn follow_plan(&mut self) {
        let Some(plan) = self.plan.take() else {
            return;
        };
        if let Some(bearing) = plan.steer(self.elapsed(), self) {
            self.heading = bearing.course;
            self.speed = bearing.speed;
        }
        self.plan = Some(plan);
    }

    /// Advance the simulation by `dt` seconds.
    ///
    /// The clock moves first, then the plan (if any) sets heading and speed
    /// for the new elapsed time, then one dead-reckoning step is applied.
    pub fn advance(&mut self, dt: f64) {
        self.clock += dt;
        self.follow_plan();

        let radius_nm = EARTH_RADIUS_KM / KM_PER_NAUTICAL_MILE;
        let distance = self.speed * (dt / 3600.0) / radius_nm;
        let bearing = self.heading.to_radians();
        let lat1 = self.position.latitude().to_radians();
        let lon1 = self.position.longitude().to_radians();

        let lat2 = (lat1.sin() * distance.cos() + lat1.cos() * distance.sin() * bearing.cos()).asin();
        let lon2 = lon1
            + (bearing.sin() * distance.sin() * lat1.cos())
                .atan2(distance.cos() - lat1.sin() * lat2.sin());
        let lon2 = (lon2 + 3.0 * PI).rem_euclid(2.0 * PI) - PI;

        self.set_position(lat2.to_degrees(), lon2.to_degrees());
        trace!(
            clock = self.clock,
            lat = self.position.latitude(),
            lon = self.position.longitude(),
            "Dead-reckoning step"
        );
    }

    /// RMC sentence for the current state.
    pub fn generate_sentence(&self) -> String {
        sentence::rmc(self.clock, &self.position, self.speed, self.heading)
    }

    /// Wait one pacing interval, advance one simulated second, and return
    /// the resulting sentence.
    pub fn feed(&mut self) -> String {
        if !self.pacing.is_zero() {
            thread::sleep(self.pacing);
        }
        self.advance(1.0);
        self.generate_sentence()
    }
}
