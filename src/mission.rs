// Mission Sequencing - Phase timeline and the phase state machine
// The current phase is always derived from time_days, never stored

use serde::Serialize;
use std::f64::consts::PI;
use std::fmt;

use crate::config::SimulationConfig;
use crate::error::TimelineError;
use crate::physics_engine::{state_at, BodyState, OrbitalElements, Vector3, TWO_PI};
use crate::transfer::{TransferSolver, TransferTrajectory};

// =============================================================================
// MISSION PHASES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionPhase {
    PreLaunch,
    TransferToMars,
    MarsOrbitStay,
    TransferToEarth,
    EarthOrbitStay,
}

impl MissionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionPhase::PreLaunch => "pre_launch",
            MissionPhase::TransferToMars => "transfer_to_mars",
            MissionPhase::MarsOrbitStay => "mars_orbit_stay",
            MissionPhase::TransferToEarth => "transfer_to_earth",
            MissionPhase::EarthOrbitStay => "earth_orbit_stay",
        }
    }

    /// Position in the fixed phase order
    pub fn index(&self) -> usize {
        match self {
            MissionPhase::PreLaunch => 0,
            MissionPhase::TransferToMars => 1,
            MissionPhase::MarsOrbitStay => 2,
            MissionPhase::TransferToEarth => 3,
            MissionPhase::EarthOrbitStay => 4,
        }
    }
}

impl fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// MISSION TIMELINE
// =============================================================================

/// One phase's slot on the timeline, `[start_day, end_day)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseWindow {
    pub phase: MissionPhase,
    pub start_day: f64,
    pub end_day: f64,
    pub duration_days: f64,
}

/// Where a given `time_days` falls on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhasePosition {
    pub time_days: f64,
    pub window: PhaseWindow,
    pub phase_local_time: f64,
    pub phase_progress: f64,
}

impl PhasePosition {
    pub fn phase(&self) -> MissionPhase {
        self.window.phase
    }
}

/// Fixed phase sequence. Built once at startup and never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionTimeline {
    windows: Vec<PhaseWindow>,
    horizon_end: f64,
}

impl MissionTimeline {
    pub fn new(durations: &[(MissionPhase, f64)]) -> Result<Self, TimelineError> {
        if durations.is_empty() {
            return Err(TimelineError::Empty);
        }

        let mut windows = Vec::with_capacity(durations.len());
        let mut cursor = 0.0;
        for &(phase, duration) in durations {
            if !duration.is_finite() || duration < 0.0 {
                return Err(TimelineError::InvalidDuration {
                    phase: phase.as_str(),
                    duration,
                });
            }
            let end_day = cursor + duration;
            windows.push(PhaseWindow {
                phase,
                start_day: cursor,
                end_day,
                duration_days: duration,
            });
            cursor = end_day;
        }

        Ok(Self {
            windows,
            horizon_end: cursor,
        })
    }

    /// Earth -> Mars -> Earth with both legs sized by the transfer solver.
    pub fn round_trip(
        solver: &dyn TransferSolver,
        origin: &OrbitalElements,
        destination: &OrbitalElements,
        config: &SimulationConfig,
    ) -> Result<Self, TimelineError> {
        let outbound_days = solver
            .estimate_transfer_days(origin.semi_major_axis, destination.semi_major_axis);
        let return_days = solver
            .estimate_transfer_days(destination.semi_major_axis, origin.semi_major_axis);

        Self::new(&[
            (MissionPhase::PreLaunch, config.pre_launch_days),
            (MissionPhase::TransferToMars, outbound_days),
            (MissionPhase::MarsOrbitStay, config.mars_stay_days),
            (MissionPhase::TransferToEarth, return_days),
            (MissionPhase::EarthOrbitStay, config.earth_stay_days),
        ])
    }

    /// Sum of all phase durations; upper clamp for `time_days`
    pub fn horizon_end(&self) -> f64 {
        self.horizon_end
    }

    pub fn windows(&self) -> &[PhaseWindow] {
        &self.windows
    }

    pub fn window(&self, phase: MissionPhase) -> Option<&PhaseWindow> {
        self.windows.iter().find(|w| w.phase == phase)
    }

    /// Resolve `time_days` to its phase. Linear scan; there are only a handful of phases.
    ///
    /// Times past the horizon resolve to the terminal phase with progress 1.0.
    pub fn phase_for(&self, time_days: f64) -> PhasePosition {
        let t = if time_days.is_nan() {
            0.0
        } else {
            time_days.clamp(0.0, self.horizon_end)
        };

        for window in &self.windows {
            if t < window.end_day {
                let local = t - window.start_day;
                return PhasePosition {
                    time_days: t,
                    window: *window,
                    phase_local_time: local,
                    phase_progress: local / window.duration_days,
                };
            }
        }

        let terminal = self.windows[self.windows.len() - 1];
        PhasePosition {
            time_days: t,
            window: terminal,
            phase_local_time: terminal.duration_days,
            phase_progress: 1.0,
        }
    }
}

// =============================================================================
// LAUNCH WINDOW
// =============================================================================

/// Heliocentric ecliptic longitude, (-π, π]
fn ecliptic_longitude(position: &Vector3) -> f64 {
    position.y.atan2(position.x)
}

/// Wrap into [-π, π)
fn wrap_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(TWO_PI) - PI
}

/// First launch day at or after `earliest_day` (days after J2000) from which a
/// half-orbit transfer of `transfer_days` arrives where the destination is.
///
/// The arrival point of a Hohmann leg lies opposite the departure point, so the
/// window opens when the destination's longitude at arrival equals the origin's
/// longitude at launch plus π. Scans in 1-day steps over two synodic periods,
/// then bisects. Returns `earliest_day` when no window exists (equal periods).
pub fn next_launch_window(
    origin: &OrbitalElements,
    destination: &OrbitalElements,
    transfer_days: f64,
    earliest_day: f64,
) -> f64 {
    let misalignment = |launch: f64| {
        let departure = state_at(origin, launch).position;
        let arrival = state_at(destination, launch + transfer_days).position;
        wrap_angle(ecliptic_longitude(&arrival) - ecliptic_longitude(&departure) - PI)
    };

    let relative_motion = (origin.mean_motion() - destination.mean_motion()).abs();
    if relative_motion <= 0.0 || !relative_motion.is_finite() {
        return earliest_day;
    }
    let synodic_days = TWO_PI / relative_motion;
    let steps = (2.0 * synodic_days).ceil().min(1.0e5) as usize;

    let mut low = earliest_day;
    let mut low_value = misalignment(low);
    for _ in 0..steps {
        if low_value == 0.0 {
            return low;
        }
        let high = low + 1.0;
        let high_value = misalignment(high);
        // A sign change across the ±π wrap is not a root
        if low_value.signum() != high_value.signum() && (low_value - high_value).abs() < PI {
            let (mut a, mut b, mut a_value) = (low, high, low_value);
            for _ in 0..60 {
                let mid = 0.5 * (a + b);
                let mid_value = misalignment(mid);
                if mid_value.signum() == a_value.signum() {
                    a = mid;
                    a_value = mid_value;
                } else {
                    b = mid;
                }
            }
            return 0.5 * (a + b);
        }
        low = high;
        low_value = high_value;
    }

    log::warn!("no launch window within {steps} days of day {earliest_day:.1}; flying unphased");
    earliest_day
}

/// A round trip placed in time: the timeline plus planet elements re-epoched so
/// mission day 0 sits `pre_launch_days` before the outbound launch window.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionPlan {
    pub timeline: MissionTimeline,
    pub origin: OrbitalElements,
    pub destination: OrbitalElements,
    /// Mission day 0 in days after J2000
    pub epoch_days: f64,
}

impl MissionPlan {
    pub fn round_trip(
        solver: &dyn TransferSolver,
        origin: &OrbitalElements,
        destination: &OrbitalElements,
        config: &SimulationConfig,
    ) -> Result<Self, TimelineError> {
        let timeline = MissionTimeline::round_trip(solver, origin, destination, config)?;
        let (launch_day, transfer_days) = timeline
            .window(MissionPhase::TransferToMars)
            .map(|w| (w.start_day, w.duration_days))
            .unwrap_or((0.0, 0.0));

        let launch = next_launch_window(origin, destination, transfer_days, launch_day);
        let epoch_days = launch - launch_day;
        log::info!(
            "launch window at J2000+{launch:.2} d; mission day 0 is J2000+{epoch_days:.2} d"
        );

        Ok(Self {
            timeline,
            origin: origin.at_epoch(epoch_days),
            destination: destination.at_epoch(epoch_days),
            epoch_days,
        })
    }
}

// =============================================================================
// PHASE STATE MACHINE
// =============================================================================

/// Everything the renderer needs for one instant of the mission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedState {
    pub time_days: f64,
    pub phase: MissionPhase,
    pub phase_local_time: f64,
    pub progress: f64,
    pub mission_progress: f64,
    pub earth: BodyState,
    pub mars: BodyState,
    pub spacecraft: BodyState,
    pub earth_mars_distance: f64, // AU
}

pub struct MissionPhaseStateMachine {
    timeline: MissionTimeline,
    origin: OrbitalElements,
    destination: OrbitalElements,
    solver: Box<dyn TransferSolver>,
    parking_offset_au: f64,
    // Trajectory captured on entry to the active transfer phase
    active_leg: Option<(MissionPhase, TransferTrajectory)>,
}

impl MissionPhaseStateMachine {
    pub fn new(
        timeline: MissionTimeline,
        origin: OrbitalElements,
        destination: OrbitalElements,
        solver: Box<dyn TransferSolver>,
        parking_offset_au: f64,
    ) -> Self {
        Self {
            timeline,
            origin,
            destination,
            solver,
            parking_offset_au,
            active_leg: None,
        }
    }

    pub fn timeline(&self) -> &MissionTimeline {
        &self.timeline
    }

    pub fn active_leg(&self) -> Option<&TransferTrajectory> {
        self.active_leg.as_ref().map(|(_, leg)| leg)
    }

    /// Drop the captured trajectory so the next transfer entry solves it afresh.
    pub fn reset(&mut self) {
        self.active_leg = None;
    }

    pub fn derive(&mut self, time_days: f64) -> DerivedState {
        let position = self.timeline.phase_for(time_days);
        let phase = position.phase();
        let horizon = self.timeline.horizon_end();
        let time_days = position.time_days;

        // Planets keep orbiting whatever the spacecraft is doing
        let earth = state_at(&self.origin, time_days);
        let mars = state_at(&self.destination, time_days);

        let spacecraft = match phase {
            MissionPhase::PreLaunch | MissionPhase::EarthOrbitStay => {
                self.active_leg = None;
                self.parked_at(&earth)
            }
            MissionPhase::MarsOrbitStay => {
                self.active_leg = None;
                self.parked_at(&mars)
            }
            MissionPhase::TransferToMars | MissionPhase::TransferToEarth => {
                let leg = self.leg_for(&position.window);
                leg.sample(position.phase_progress)
            }
        };

        DerivedState {
            time_days,
            phase,
            phase_local_time: position.phase_local_time,
            progress: position.phase_progress.clamp(0.0, 1.0),
            mission_progress: if horizon > 0.0 {
                (time_days / horizon).clamp(0.0, 1.0)
            } else {
                1.0
            },
            earth,
            mars,
            spacecraft,
            earth_mars_distance: mars.position.distance_to(&earth.position),
        }
    }

    fn parked_at(&self, body: &BodyState) -> BodyState {
        let offset = body
            .position
            .unit()
            .map_or(Vector3::default(), |u| u * self.parking_offset_au);
        BodyState::new(body.position + offset, body.velocity, body.true_anomaly)
    }

    fn leg_for(&mut self, window: &PhaseWindow) -> TransferTrajectory {
        if let Some((phase, leg)) = self.active_leg {
            if phase == window.phase {
                return leg;
            }
        }

        let (from, to) = match window.phase {
            MissionPhase::TransferToEarth => (&self.destination, &self.origin),
            _ => (&self.origin, &self.destination),
        };
        // Leg runs between the two parking points so phase boundaries join up
        let departure = self.parked_at(&state_at(from, window.start_day));
        let arrival = self.parked_at(&state_at(to, window.end_day));
        let leg = self
            .solver
            .solve(&departure, arrival.radius(), window.duration_days)
            .anchored_to(&arrival.position);

        log::debug!(
            "{} leg solved: a={:.4} AU, e={:.4}, {:.1} days, closing {:.4} AU",
            window.phase,
            leg.semi_major_axis,
            leg.eccentricity,
            leg.transfer_days,
            leg.arrival_offset().magnitude()
        );
        self.active_leg = Some((window.phase, leg));
        leg
    }
}
