// Transfer Solver - Hohmann-style transfer ellipses between two heliocentric radii
// Closed-form approximation: tangent departure, 180° arc, no Lambert targeting

use std::f64::consts::PI;

use crate::physics_engine::{true_to_eccentric_anomaly, BodyState, Vector3, MU_SUN};

// =============================================================================
// SOLVER CONTRACT
// =============================================================================

/// A transfer model the mission can be flown with.
///
/// The Hohmann approximation is the only implementation; a Lambert-based model
/// can replace it without touching the phase machine.
pub trait TransferSolver: Send + Sync {
    /// Time of flight (days) between circular-equivalent radii, used to size the timeline.
    fn estimate_transfer_days(&self, departure_radius: f64, arrival_radius: f64) -> f64;

    /// Build the transfer leaving `departure` and reaching `arrival_radius` after `transfer_days`.
    fn solve(
        &self,
        departure: &BodyState,
        arrival_radius: f64,
        transfer_days: f64,
    ) -> TransferTrajectory;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HohmannSolver;

impl TransferSolver for HohmannSolver {
    /// Half the period of the transfer ellipse: π√(a_t³/μ)
    fn estimate_transfer_days(&self, departure_radius: f64, arrival_radius: f64) -> f64 {
        let a_t = 0.5 * (departure_radius + arrival_radius);
        PI * (a_t.powi(3) / MU_SUN).sqrt()
    }

    fn solve(
        &self,
        departure: &BodyState,
        arrival_radius: f64,
        transfer_days: f64,
    ) -> TransferTrajectory {
        let departure_radius = departure.radius();
        let a_t = 0.5 * (departure_radius + arrival_radius);
        let e_t = (arrival_radius - departure_radius).abs() / (arrival_radius + departure_radius);

        // Outbound legs leave from perihelion, inbound legs from aphelion
        let outbound = arrival_radius >= departure_radius;
        let radial = departure
            .position
            .unit()
            .unwrap_or(Vector3::new(1.0, 0.0, 0.0));
        let periapsis_direction = if outbound { radial } else { -radial };

        // Fly in the departure body's orbital plane, prograde
        let normal = departure
            .position
            .cross(&departure.velocity)
            .unit()
            .unwrap_or(Vector3::new(0.0, 0.0, 1.0));
        let prograde_direction = normal.cross(&periapsis_direction);

        let (departure_true_anomaly, arrival_true_anomaly) =
            if outbound { (0.0, PI) } else { (PI, 2.0 * PI) };

        TransferTrajectory {
            semi_major_axis: a_t,
            eccentricity: e_t,
            departure_true_anomaly,
            arrival_true_anomaly,
            transfer_days,
            departure_radius,
            arrival_radius,
            periapsis_direction,
            prograde_direction,
            arrival_offset: Vector3::default(),
        }
    }
}

// =============================================================================
// TRANSFER TRAJECTORY
// =============================================================================

/// One leg of the mission. Immutable once solved; resampled, never mutated.
///
/// The conic alone reaches the arrival *radius*. `anchored_to` adds a closing
/// offset, grown linearly over the leg, so the last sample sits on the arrival
/// body; with a phased launch that offset is a small fraction of an AU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferTrajectory {
    pub semi_major_axis: f64,        // AU
    pub eccentricity: f64,
    pub departure_true_anomaly: f64, // radians
    pub arrival_true_anomaly: f64,   // radians
    pub transfer_days: f64,
    pub departure_radius: f64,       // AU
    pub arrival_radius: f64,         // AU
    periapsis_direction: Vector3,
    prograde_direction: Vector3,
    arrival_offset: Vector3,
}

impl TransferTrajectory {
    /// Semi-latus rectum a(1 - e²)
    pub fn semi_latus_rectum(&self) -> f64 {
        self.semi_major_axis * (1.0 - self.eccentricity * self.eccentricity)
    }

    /// Conic radius at a true anomaly on this ellipse
    pub fn radius_at_true_anomaly(&self, true_anomaly: f64) -> f64 {
        self.semi_latus_rectum() / (1.0 + self.eccentricity * true_anomaly.cos())
    }

    /// True anomaly reached at `fraction` of the leg. Linear across the 180° arc;
    /// fraction is clamped to [0, 1] since fast-forwarding can overshoot slightly.
    pub fn true_anomaly_at(&self, fraction: f64) -> f64 {
        let f = clamp_fraction(fraction);
        self.departure_true_anomaly + f * (self.arrival_true_anomaly - self.departure_true_anomaly)
    }

    /// Close the leg onto `arrival` (the target body's position at arrival).
    pub fn anchored_to(mut self, arrival: &Vector3) -> Self {
        self.arrival_offset = *arrival - self.conic_position_at(1.0);
        self
    }

    /// Gap between the bare conic's end point and the anchored arrival (AU)
    pub fn arrival_offset(&self) -> Vector3 {
        self.arrival_offset
    }

    pub fn position_at(&self, fraction: f64) -> Vector3 {
        self.conic_position_at(fraction) + self.arrival_offset * clamp_fraction(fraction)
    }

    /// Keplerian velocity on the transfer ellipse plus the closing drift (AU/day)
    pub fn velocity_at(&self, fraction: f64) -> Vector3 {
        let drift = if self.transfer_days > 0.0 {
            self.arrival_offset * (1.0 / self.transfer_days)
        } else {
            Vector3::default()
        };
        self.conic_velocity_at(fraction) + drift
    }

    pub fn sample(&self, fraction: f64) -> BodyState {
        BodyState::new(
            self.position_at(fraction),
            self.velocity_at(fraction),
            self.true_anomaly_at(fraction),
        )
    }

    fn conic_position_at(&self, fraction: f64) -> Vector3 {
        let nu = self.true_anomaly_at(fraction);
        let a = self.semi_major_axis;
        let e = self.eccentricity;
        let eccentric_anomaly = true_to_eccentric_anomaly(nu, e);
        let (sin_e, cos_e) = eccentric_anomaly.sin_cos();

        let x = a * (cos_e - e);
        let y = a * (1.0 - e * e).sqrt() * sin_e;
        self.to_heliocentric(x, y)
    }

    fn conic_velocity_at(&self, fraction: f64) -> Vector3 {
        let nu = self.true_anomaly_at(fraction);
        let (sin_nu, cos_nu) = nu.sin_cos();
        let speed_scale = (MU_SUN / self.semi_latus_rectum()).sqrt();
        self.to_heliocentric(
            -speed_scale * sin_nu,
            speed_scale * (self.eccentricity + cos_nu),
        )
    }

    fn to_heliocentric(&self, x: f64, y: f64) -> Vector3 {
        self.periapsis_direction * x + self.prograde_direction * y
    }
}

fn clamp_fraction(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics_engine::{state_at, EARTH, MARS};

    fn earth_to_mars() -> (BodyState, TransferTrajectory) {
        let departure = state_at(&EARTH, 20.0);
        let arrival_radius = state_at(&MARS, 20.0 + 259.0).radius();
        let leg = HohmannSolver.solve(&departure, arrival_radius, 259.0);
        (departure, leg)
    }

    #[test]
    fn test_earth_mars_duration_estimate() {
        let days = HohmannSolver.estimate_transfer_days(EARTH.semi_major_axis, MARS.semi_major_axis);
        assert!((258.0..260.0).contains(&days), "tof_days = {days}");
    }

    #[test]
    fn test_duration_estimate_is_direction_independent() {
        let out = HohmannSolver.estimate_transfer_days(1.0, 1.524);
        let back = HohmannSolver.estimate_transfer_days(1.524, 1.0);
        assert!((out - back).abs() < 1e-9);
    }

    #[test]
    fn test_transfer_ellipse_shape() {
        let (departure, leg) = earth_to_mars();
        let expected_a = 0.5 * (departure.radius() + leg.arrival_radius);
        assert!((leg.semi_major_axis - expected_a).abs() < 1e-12);
        assert!(leg.eccentricity > 0.15 && leg.eccentricity < 0.30);
        assert_eq!(leg.departure_true_anomaly, 0.0);
        assert_eq!(leg.arrival_true_anomaly, PI);
    }

    #[test]
    fn test_leg_starts_at_departure_body() {
        let (departure, leg) = earth_to_mars();
        assert!(leg.position_at(0.0).distance_to(&departure.position) < 1e-9);
    }

    #[test]
    fn test_leg_ends_opposite_at_arrival_radius() {
        let (departure, leg) = earth_to_mars();
        let end = leg.position_at(1.0);
        assert!((end.magnitude() - leg.arrival_radius).abs() < 1e-9);
        let alignment = end.unit().unwrap().dot(&departure.position.unit().unwrap());
        assert!((alignment + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_samples_lie_on_the_ellipse() {
        let (_, leg) = earth_to_mars();
        for step in 0..=20 {
            let fraction = step as f64 / 20.0;
            let nu = leg.true_anomaly_at(fraction);
            let r = leg.position_at(fraction).magnitude();
            assert!((r - leg.radius_at_true_anomaly(nu)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_fraction_is_clamped() {
        let (_, leg) = earth_to_mars();
        assert_eq!(leg.position_at(-0.2), leg.position_at(0.0));
        assert_eq!(leg.position_at(1.3), leg.position_at(1.0));
        assert_eq!(leg.position_at(f64::NAN), leg.position_at(0.0));
    }

    #[test]
    fn test_departure_burn_is_tangential_and_prograde() {
        let (departure, leg) = earth_to_mars();
        let v = leg.velocity_at(0.0);
        assert!(v.unit().unwrap().dot(&departure.position.unit().unwrap()).abs() < 1e-9);
        assert!(v.dot(&departure.velocity) > 0.0);
        // Perihelion of the transfer is faster than Earth's own orbit
        assert!(v.magnitude() > departure.velocity.magnitude());
    }

    #[test]
    fn test_speed_follows_vis_viva_along_leg() {
        let (_, leg) = earth_to_mars();
        for step in 0..=10 {
            let sample = leg.sample(step as f64 / 10.0);
            let r = sample.position.magnitude();
            let expected = MU_SUN * (2.0 / r - 1.0 / leg.semi_major_axis);
            let speed_sq = sample.velocity.dot(&sample.velocity);
            assert!(((speed_sq - expected) / expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_inbound_leg_departs_from_aphelion() {
        let departure = state_at(&MARS, 733.0);
        let arrival_radius = state_at(&EARTH, 992.0).radius();
        let leg = HohmannSolver.solve(&departure, arrival_radius, 259.0);

        assert_eq!(leg.departure_true_anomaly, PI);
        assert!(leg.position_at(0.0).distance_to(&departure.position) < 1e-9);
        assert!((leg.position_at(1.0).magnitude() - arrival_radius).abs() < 1e-9);
        assert!(leg.velocity_at(0.0).dot(&departure.velocity) > 0.0);
    }

    #[test]
    fn test_equal_radii_collapse_to_circular_coast() {
        let departure = state_at(&EARTH, 0.0);
        let leg = HohmannSolver.solve(&departure, departure.radius(), 180.0);
        assert!(leg.eccentricity.abs() < 1e-15);
        for step in 0..=8 {
            let r = leg.position_at(step as f64 / 8.0).magnitude();
            assert!((r - departure.radius()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_anchored_leg_ends_on_the_target() {
        let departure = state_at(&EARTH, 20.0);
        let arrival = state_at(&MARS, 279.0);
        let bare = HohmannSolver.solve(&departure, arrival.radius(), 259.0);
        let leg = bare.anchored_to(&arrival.position);

        assert!(leg.position_at(1.0).distance_to(&arrival.position) < 1e-12);
        assert_eq!(leg.position_at(0.0), bare.position_at(0.0));
        assert_eq!(leg.semi_major_axis, bare.semi_major_axis);

        // Halfway the closing offset is half applied
        let half = leg.position_at(0.5) - bare.position_at(0.5);
        let expected = leg.arrival_offset() * 0.5;
        assert!(half.distance_to(&expected) < 1e-12);
    }

    #[test]
    fn test_anchored_velocity_adds_closing_drift() {
        let departure = state_at(&EARTH, 20.0);
        let arrival = state_at(&MARS, 279.0);
        let bare = HohmannSolver.solve(&departure, arrival.radius(), 259.0);
        let leg = bare.anchored_to(&arrival.position);

        let drift = leg.velocity_at(0.3) - bare.velocity_at(0.3);
        let expected = leg.arrival_offset() * (1.0 / 259.0);
        assert!(drift.distance_to(&expected) < 1e-12);
    }

    #[test]
    fn test_unanchored_leg_has_no_offset() {
        let (_, leg) = earth_to_mars();
        assert_eq!(leg.arrival_offset(), Vector3::default());
    }
}
