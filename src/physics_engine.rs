// Physics Engine - Keplerian Ephemeris
// Two-body propagation of planets on fixed elliptical orbits (heliocentric ecliptic frame)

use serde::Serialize;
use std::f64::consts::PI;
use std::ops::{Add, Mul, Neg, Sub};

use crate::error::ElementsError;

// =============================================================================
// PHYSICAL CONSTANTS (AU / day units)
// =============================================================================

/// Gaussian gravitational constant k (AU^1.5 / day)
pub const GAUSSIAN_GRAVITATIONAL_CONSTANT: f64 = 0.017_202_098_95;

/// Sun's gravitational parameter μ = k² (AU³/day²)
pub const MU_SUN: f64 = GAUSSIAN_GRAVITATIONAL_CONSTANT * GAUSSIAN_GRAVITATIONAL_CONSTANT;

pub const TWO_PI: f64 = 2.0 * PI;

/// Newton-Raphson stops once the eccentric anomaly correction drops below this (rad)
pub const KEPLER_TOLERANCE: f64 = 1e-9;

/// Hard bound on Newton-Raphson iterations; the last estimate is returned when hit
pub const KEPLER_MAX_ITERATIONS: usize = 30;

const DEG: f64 = PI / 180.0;

// =============================================================================
// 3D VECTOR MATHEMATICS
// =============================================================================

/// Heliocentric ecliptic vector (AU or AU/day depending on use).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector along `self`; `None` for a (near) zero vector.
    pub fn unit(&self) -> Option<Self> {
        let mag = self.magnitude();
        (mag > 1e-15).then(|| *self * (1.0 / mag))
    }

    pub fn dot(&self, other: &Vector3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn distance_to(&self, other: &Vector3) -> f64 {
        (*self - *other).magnitude()
    }

    /// Wire representation `[x, y, z]`
    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;

    fn mul(self, k: f64) -> Vector3 {
        Vector3::new(self.x * k, self.y * k, self.z * k)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;

    fn neg(self) -> Vector3 {
        self * -1.0
    }
}

// =============================================================================
// BODY STATE (Position + Velocity)
// =============================================================================

/// Heliocentric state of a body at one instant. Recomputed on every query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub position: Vector3, // AU
    pub velocity: Vector3, // AU/day
    pub true_anomaly: f64, // radians
}

impl BodyState {
    pub fn new(position: Vector3, velocity: Vector3, true_anomaly: f64) -> Self {
        Self {
            position,
            velocity,
            true_anomaly,
        }
    }

    /// Heliocentric distance (AU)
    pub fn radius(&self) -> f64 {
        self.position.magnitude()
    }
}

// =============================================================================
// KEPLERIAN ORBITAL ELEMENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrbitalElements {
    pub name: &'static str,
    /// Semi-major axis (AU)
    pub semi_major_axis: f64,
    /// Eccentricity (0-1 for elliptical)
    pub eccentricity: f64,
    /// Inclination to the ecliptic (radians)
    pub inclination: f64,
    /// Longitude of ascending node (radians)
    pub longitude_ascending_node: f64,
    /// Argument of perihelion (radians)
    pub argument_perihelion: f64,
    /// Mean anomaly at mission day 0 (radians)
    pub mean_anomaly: f64,
    /// Sidereal period (days)
    pub period_days: f64,
}

/// Earth, J2000 mean elements. The ecliptic is Earth's orbital plane, so i = Ω = 0.
pub const EARTH: OrbitalElements = OrbitalElements {
    name: "earth",
    semi_major_axis: 1.000_002_61,
    eccentricity: 0.016_711_23,
    inclination: 0.0,
    longitude_ascending_node: 0.0,
    argument_perihelion: 102.937_681_93 * DEG,
    mean_anomaly: (100.464_571_66 - 102.937_681_93) * DEG,
    period_days: 365.256_363,
};

/// Mars, J2000 mean elements (ω = ϖ - Ω, M0 = L - ϖ)
pub const MARS: OrbitalElements = OrbitalElements {
    name: "mars",
    semi_major_axis: 1.523_710_34,
    eccentricity: 0.093_394_10,
    inclination: 1.849_691_42 * DEG,
    longitude_ascending_node: 49.559_538_91 * DEG,
    argument_perihelion: (-23.943_629_59 - 49.559_538_91) * DEG,
    mean_anomaly: (-4.553_432_05 + 23.943_629_59) * DEG,
    period_days: 686.979_59,
};

impl OrbitalElements {
    /// Reject element sets the propagator cannot handle (open orbits, zero periods, NaNs)
    pub fn validate(&self) -> Result<(), ElementsError> {
        let fields = [
            ("semi_major_axis", self.semi_major_axis),
            ("eccentricity", self.eccentricity),
            ("inclination", self.inclination),
            ("longitude_ascending_node", self.longitude_ascending_node),
            ("argument_perihelion", self.argument_perihelion),
            ("mean_anomaly", self.mean_anomaly),
            ("period_days", self.period_days),
        ];
        if let Some(&(field, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ElementsError::NonFinite {
                body: self.name,
                field,
            });
        }
        if self.semi_major_axis <= 0.0 {
            return Err(ElementsError::SemiMajorAxis {
                body: self.name,
                value: self.semi_major_axis,
            });
        }
        if !(0.0..1.0).contains(&self.eccentricity) {
            return Err(ElementsError::Eccentricity {
                body: self.name,
                value: self.eccentricity,
            });
        }
        if self.period_days <= 0.0 {
            return Err(ElementsError::Period {
                body: self.name,
                value: self.period_days,
            });
        }
        Ok(())
    }

    /// Mean motion n = 2π / T (rad/day)
    pub fn mean_motion(&self) -> f64 {
        TWO_PI / self.period_days
    }

    /// Same orbit with the mean anomaly advanced `days`, so that day 0 of the
    /// returned set is `days` after day 0 of this one.
    pub fn at_epoch(&self, days: f64) -> Self {
        Self {
            mean_anomaly: (self.mean_anomaly + self.mean_motion() * days).rem_euclid(TWO_PI),
            ..*self
        }
    }
}

// =============================================================================
// KEPLER'S EQUATION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeplerSolution {
    pub eccentric_anomaly: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Solve Kepler's equation M = E - e*sin(E) using Newton-Raphson.
///
/// Seeded with E0 = M. Never fails: when the iteration cap is hit the latest
/// estimate is returned with `converged = false`.
pub fn solve_kepler_equation(mean_anomaly: f64, eccentricity: f64) -> KeplerSolution {
    let mut e_anom = mean_anomaly; // Initial guess

    for iteration in 1..=KEPLER_MAX_ITERATIONS {
        let f = e_anom - eccentricity * e_anom.sin() - mean_anomaly;
        let f_prime = 1.0 - eccentricity * e_anom.cos();
        let delta = f / f_prime;
        e_anom -= delta;

        if delta.abs() < KEPLER_TOLERANCE {
            return KeplerSolution {
                eccentric_anomaly: e_anom,
                iterations: iteration,
                converged: true,
            };
        }
    }

    KeplerSolution {
        eccentric_anomaly: e_anom,
        iterations: KEPLER_MAX_ITERATIONS,
        converged: false,
    }
}

/// ν from E
pub fn eccentric_to_true_anomaly(eccentric_anomaly: f64, eccentricity: f64) -> f64 {
    let half = eccentric_anomaly / 2.0;
    2.0 * ((1.0 + eccentricity).sqrt() * half.sin()).atan2((1.0 - eccentricity).sqrt() * half.cos())
}

/// E from ν
pub fn true_to_eccentric_anomaly(true_anomaly: f64, eccentricity: f64) -> f64 {
    let half = true_anomaly / 2.0;
    2.0 * ((1.0 - eccentricity).sqrt() * half.sin()).atan2((1.0 + eccentricity).sqrt() * half.cos())
}

// =============================================================================
// PERIFOCAL -> HELIOCENTRIC ROTATION
// =============================================================================

/// Rotation from the orbital plane (x towards perihelion) into the ecliptic frame.
#[derive(Debug, Clone, Copy)]
pub struct PerifocalFrame {
    r11: f64,
    r12: f64,
    r21: f64,
    r22: f64,
    r31: f64,
    r32: f64,
}

impl PerifocalFrame {
    pub fn new(inclination: f64, longitude_ascending_node: f64, argument_perihelion: f64) -> Self {
        let (sin_omega, cos_omega) = longitude_ascending_node.sin_cos();
        let (sin_w, cos_w) = argument_perihelion.sin_cos();
        let (sin_i, cos_i) = inclination.sin_cos();

        Self {
            r11: cos_omega * cos_w - sin_omega * sin_w * cos_i,
            r12: -cos_omega * sin_w - sin_omega * cos_w * cos_i,
            r21: sin_omega * cos_w + cos_omega * sin_w * cos_i,
            r22: -sin_omega * sin_w + cos_omega * cos_w * cos_i,
            r31: sin_w * sin_i,
            r32: cos_w * sin_i,
        }
    }

    pub fn rotate(&self, x: f64, y: f64) -> Vector3 {
        Vector3::new(
            self.r11 * x + self.r12 * y,
            self.r21 * x + self.r22 * y,
            self.r31 * x + self.r32 * y,
        )
    }
}

// =============================================================================
// EPHEMERIS
// =============================================================================

/// Heliocentric state of a body `time_days` after mission day 0.
///
/// Pure function of its inputs: scrubbing back to the same day yields a
/// bit-identical state. Velocity is the analytic time derivative of the
/// position, so it is exact at every epoch including day 0.
pub fn state_at(elements: &OrbitalElements, time_days: f64) -> BodyState {
    let a = elements.semi_major_axis;
    let e = elements.eccentricity;
    let n = elements.mean_motion();

    let mean_anomaly = (elements.mean_anomaly + n * time_days).rem_euclid(TWO_PI);
    let kepler = solve_kepler_equation(mean_anomaly, e);
    if !kepler.converged {
        log::debug!(
            "kepler solve for {} stopped after {} iterations at M={:.6} (using best estimate)",
            elements.name,
            kepler.iterations,
            mean_anomaly
        );
    }

    let eccentric_anomaly = kepler.eccentric_anomaly;
    let (sin_e, cos_e) = eccentric_anomaly.sin_cos();
    let b = a * (1.0 - e * e).sqrt();

    // Position in orbital plane (perifocal frame)
    let x_orb = a * (cos_e - e);
    let y_orb = b * sin_e;

    // dE/dt follows from differentiating Kepler's equation
    let e_dot = n / (1.0 - e * cos_e);
    let vx_orb = -a * sin_e * e_dot;
    let vy_orb = b * cos_e * e_dot;

    let frame = PerifocalFrame::new(
        elements.inclination,
        elements.longitude_ascending_node,
        elements.argument_perihelion,
    );

    BodyState {
        position: frame.rotate(x_orb, y_orb),
        velocity: frame.rotate(vx_orb, vy_orb),
        true_anomaly: eccentric_to_true_anomaly(eccentric_anomaly, e),
    }
}

/// One full orbit sampled at `samples` evenly spaced epochs, closed by
/// repeating the first point. Used by renderers to draw the orbit line.
pub fn orbit_polyline(elements: &OrbitalElements, samples: usize) -> Vec<[f64; 3]> {
    if samples == 0 {
        return Vec::new();
    }
    let step = elements.period_days / samples as f64;
    (0..=samples)
        .map(|k| state_at(elements, k as f64 * step).position.to_array())
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
