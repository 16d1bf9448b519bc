// Protocol - commands in, snapshots and events out
// JSON shapes exchanged with renderers and operator UIs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::SimulationState;
use crate::error::CommandError;
use crate::mission::{DerivedState, MissionPhase, PhaseWindow};
use crate::physics_engine::OrbitalElements;

// =============================================================================
// INBOUND COMMANDS
// =============================================================================

/// Operator command, decoded once at the boundary and matched exhaustively after.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Start,
    Pause,
    Stop,
    SetSpeed { speed: f64 },
    SetTime { time: f64 },
    GetState,
}

impl Command {
    pub const NAMES: [&'static str; 6] =
        ["start", "pause", "stop", "set_speed", "set_time", "get_state"];

    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Stop => "stop",
            Command::SetSpeed { .. } => "set_speed",
            Command::SetTime { .. } => "set_time",
            Command::GetState => "get_state",
        }
    }
}

/// Decode one inbound message. On failure the command name (when readable) is
/// returned alongside the error so the reply can echo it.
pub fn decode_command(raw: &str) -> Result<Command, (CommandError, Option<String>)> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| (CommandError::Malformed(e.to_string()), None))?;

    let name = match value.get("command") {
        Some(Value::String(name)) => name.clone(),
        Some(_) => {
            return Err((
                CommandError::Malformed("'command' must be a string".to_string()),
                None,
            ))
        }
        None => {
            return Err((
                CommandError::Malformed("missing 'command' field".to_string()),
                None,
            ))
        }
    };

    if !Command::NAMES.contains(&name.as_str()) {
        return Err((CommandError::Unknown(name.clone()), Some(name)));
    }

    serde_json::from_value(value)
        .map_err(|e| (CommandError::Malformed(e.to_string()), Some(name)))
}

// =============================================================================
// REPLIES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ack {
        command: &'static str,
    },
    Error {
        message: String,
        command: Option<String>,
    },
    Snapshot(Snapshot),
}

impl Reply {
    pub fn ack(command: &Command) -> Self {
        Reply::Ack {
            command: command.name(),
        }
    }

    pub fn error(error: &CommandError, command: Option<String>) -> Self {
        Reply::Error {
            message: error.to_string(),
            command,
        }
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulationStatus {
    pub is_running: bool,
    pub paused: bool,
    pub time_speed: f64,
}

/// One broadcast unit of authoritative state. Built fresh every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub time_days: f64,
    pub phase: MissionPhase,
    pub earth_position: [f64; 3],      // AU
    pub mars_position: [f64; 3],       // AU
    pub spacecraft_position: [f64; 3], // AU
    pub earth_velocity: [f64; 3],      // AU/day
    pub mars_velocity: [f64; 3],       // AU/day
    pub spacecraft_velocity: [f64; 3], // AU/day
    pub progress: f64,
    pub mission_progress: f64,
    pub earth_mars_distance: f64, // AU
    pub timeline_horizon_end: f64,
    pub simulation: SimulationStatus,
}

impl Snapshot {
    pub fn new(derived: &DerivedState, state: &SimulationState, horizon_end: f64) -> Self {
        Self {
            time_days: derived.time_days,
            phase: derived.phase,
            earth_position: derived.earth.position.to_array(),
            mars_position: derived.mars.position.to_array(),
            spacecraft_position: derived.spacecraft.position.to_array(),
            earth_velocity: derived.earth.velocity.to_array(),
            mars_velocity: derived.mars.velocity.to_array(),
            spacecraft_velocity: derived.spacecraft.velocity.to_array(),
            progress: derived.progress,
            mission_progress: derived.mission_progress,
            earth_mars_distance: derived.earth_mars_distance,
            timeline_horizon_end: horizon_end,
            simulation: SimulationStatus {
                is_running: state.is_running,
                paused: state.paused,
                time_speed: state.time_speed,
            },
        }
    }
}

// =============================================================================
// OUTBOUND MESSAGES
// =============================================================================

/// Static mission description sent to every new subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionInfo {
    pub phases: Vec<PhaseWindow>,
    pub outbound_transfer_days: f64,
    pub return_transfer_days: f64,
    pub timeline_horizon_end: f64,
    /// Earth and Mars elements at mission day 0
    pub bodies: [OrbitalElements; 2],
    /// Mission day 0 in days after J2000, placed so launch meets a transfer window
    pub mission_epoch_days: f64,
    pub mission_epoch: Option<DateTime<Utc>>,
    pub tick_hz: f64,
    pub max_speed: f64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitMessage {
    pub mission_info: MissionInfo,
    pub earth_orbit: Vec<[f64; 3]>,
    pub mars_orbit: Vec<[f64; 3]>,
    pub current_snapshot: Snapshot,
    pub simulation_state: SimulationState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Init(InitMessage),
    Update(Snapshot),
    /// Renderers reset trails when the phase changes
    PhaseChange {
        from: MissionPhase,
        to: MissionPhase,
        time_days: f64,
    },
    /// Sent on stop and on restart from the end of the timeline
    Reset {
        time_days: f64,
    },
    Presence {
        subscribers: usize,
    },
    Shutdown,
}
