// Simulation Clock - mission time under operator control
// stopped -> running <-> paused -> stopped

use serde::Serialize;

use crate::error::CommandError;

/// Process-wide simulation state shared by every connected viewer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulationState {
    pub time_days: f64,
    pub time_speed: f64, // simulated days per wall-clock second
    pub is_running: bool,
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockStatus {
    Stopped,
    Running,
    Paused,
}

/// Raised when listeners should discard accumulated visual state (trails).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    Reset,
}

#[derive(Debug, Clone)]
pub struct SimulationClock {
    state: SimulationState,
    horizon_end: f64,
    max_speed: f64,
}

impl SimulationClock {
    pub fn new(horizon_end: f64, default_speed: f64, max_speed: f64) -> Self {
        Self {
            state: SimulationState {
                time_days: 0.0,
                time_speed: default_speed.clamp(0.0, max_speed),
                is_running: false,
                paused: false,
            },
            horizon_end,
            max_speed,
        }
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn time_days(&self) -> f64 {
        self.state.time_days
    }

    pub fn horizon_end(&self) -> f64 {
        self.horizon_end
    }

    pub fn status(&self) -> ClockStatus {
        match (self.state.is_running, self.state.paused) {
            (false, _) => ClockStatus::Stopped,
            (true, false) => ClockStatus::Running,
            (true, true) => ClockStatus::Paused,
        }
    }

    /// Run (or resume) the clock. A finished timeline starts over from day 0.
    pub fn start(&mut self) -> Option<ClockEvent> {
        let restart = self.state.time_days >= self.horizon_end;
        if restart {
            self.state.time_days = 0.0;
        }
        self.state.is_running = true;
        self.state.paused = false;
        restart.then_some(ClockEvent::Reset)
    }

    /// Toggle pause. Has no effect while stopped.
    pub fn pause(&mut self) {
        if self.state.is_running {
            self.state.paused = !self.state.paused;
        }
    }

    pub fn stop(&mut self) -> ClockEvent {
        self.state.time_days = 0.0;
        self.state.is_running = false;
        self.state.paused = false;
        ClockEvent::Reset
    }

    /// Store a new speed clamped to `[0, max_speed]`; returns the applied value.
    /// Zero freezes time without entering the paused state.
    pub fn set_speed(&mut self, speed: f64) -> Result<f64, CommandError> {
        if speed.is_nan() {
            return Err(CommandError::InvalidParameter {
                command: "set_speed",
                parameter: "speed",
            });
        }
        self.state.time_speed = speed.clamp(0.0, self.max_speed);
        Ok(self.state.time_speed)
    }

    /// Scrub to `time` clamped to `[0, horizon_end]`; running/paused are untouched.
    pub fn set_time(&mut self, time: f64) -> Result<f64, CommandError> {
        if time.is_nan() {
            return Err(CommandError::InvalidParameter {
                command: "set_time",
                parameter: "time",
            });
        }
        self.state.time_days = time.clamp(0.0, self.horizon_end);
        Ok(self.state.time_days)
    }

    /// Advance by `elapsed_seconds` of wall-clock time. Returns the simulated days advanced.
    pub fn tick(&mut self, elapsed_seconds: f64) -> f64 {
        let running = self.status() == ClockStatus::Running;
        if !running || elapsed_seconds.is_nan() || elapsed_seconds <= 0.0 {
            return 0.0;
        }
        let before = self.state.time_days;
        let advanced = before + elapsed_seconds * self.state.time_speed;
        self.state.time_days = advanced.min(self.horizon_end);
        self.state.time_days - before
    }
}
