// Configuration - runtime settings from the environment (optionally a .env file)

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Broadcast ticks per wall-clock second
    pub tick_hz: f64,
    /// Initial simulated days per wall-clock second
    pub default_speed: f64,
    /// Upper clamp for `set_speed`
    pub max_speed: f64,
    pub pre_launch_days: f64,
    /// Wait at Mars; chosen so the return window suits the simplified transfer model
    pub mars_stay_days: f64,
    pub earth_stay_days: f64,
    /// Radial distance of the parked spacecraft from its host planet (AU)
    pub parking_offset_au: f64,
    /// Points per orbit polyline sent in the init message
    pub orbit_samples: usize,
    /// Outbound messages a subscriber may lag behind before it is dropped
    pub subscriber_buffer: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_hz: 20.0,
            default_speed: 10.0,
            max_speed: 200.0,
            pre_launch_days: 20.0,
            mars_stay_days: 454.0,
            earth_stay_days: 30.0,
            parking_offset_au: 0.01,
            orbit_samples: 360,
            subscriber_buffer: 64,
        }
    }
}

impl SimulationConfig {
    /// Load from process environment after applying `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenv::dotenv() {
            log::debug!("loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            tick_hz: read(&lookup, "MISSION_TICK_HZ", defaults.tick_hz)?,
            default_speed: read(&lookup, "MISSION_DEFAULT_SPEED", defaults.default_speed)?,
            max_speed: read(&lookup, "MISSION_MAX_SPEED", defaults.max_speed)?,
            pre_launch_days: read(&lookup, "MISSION_PRE_LAUNCH_DAYS", defaults.pre_launch_days)?,
            mars_stay_days: read(&lookup, "MISSION_MARS_STAY_DAYS", defaults.mars_stay_days)?,
            earth_stay_days: read(&lookup, "MISSION_EARTH_STAY_DAYS", defaults.earth_stay_days)?,
            parking_offset_au: read(
                &lookup,
                "MISSION_PARKING_OFFSET_AU",
                defaults.parking_offset_au,
            )?,
            orbit_samples: read(&lookup, "MISSION_ORBIT_SAMPLES", defaults.orbit_samples)?,
            subscriber_buffer: read(
                &lookup,
                "MISSION_SUBSCRIBER_BUFFER",
                defaults.subscriber_buffer,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            "MISSION_TICK_HZ",
            self.tick_hz,
            self.tick_hz > 0.0 && self.tick_hz <= 1000.0,
            "must be in (0, 1000]",
        )?;
        ensure(
            "MISSION_MAX_SPEED",
            self.max_speed,
            self.max_speed.is_finite() && self.max_speed > 0.0,
            "must be positive",
        )?;
        ensure(
            "MISSION_DEFAULT_SPEED",
            self.default_speed,
            (0.0..=self.max_speed).contains(&self.default_speed),
            "must be within [0, MISSION_MAX_SPEED]",
        )?;
        for (key, days) in [
            ("MISSION_PRE_LAUNCH_DAYS", self.pre_launch_days),
            ("MISSION_MARS_STAY_DAYS", self.mars_stay_days),
            ("MISSION_EARTH_STAY_DAYS", self.earth_stay_days),
        ] {
            ensure(key, days, days.is_finite() && days >= 0.0, "must be non-negative")?;
        }
        ensure(
            "MISSION_PARKING_OFFSET_AU",
            self.parking_offset_au,
            self.parking_offset_au.is_finite() && self.parking_offset_au >= 0.0,
            "must be non-negative",
        )?;
        ensure(
            "MISSION_ORBIT_SAMPLES",
            self.orbit_samples as f64,
            self.orbit_samples >= 3,
            "must be at least 3",
        )?;
        ensure(
            "MISSION_SUBSCRIBER_BUFFER",
            self.subscriber_buffer as f64,
            self.subscriber_buffer >= 1,
            "must be at least 1",
        )
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz)
    }
}

fn read<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Parse {
            key,
            value: raw.clone(),
        }),
    }
}

fn ensure(key: &'static str, value: f64, ok: bool, reason: &'static str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { key, value, reason })
    }
}
