// State Manager - Authoritative mission state and the realtime broadcast loop
// One task owns the simulation; viewers talk to it through a SimulationHandle

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::clock::{ClockEvent, SimulationClock};
use crate::config::SimulationConfig;
use crate::error::{CommandError, ServerError};
use crate::mission::{MissionPhase, MissionPhaseStateMachine, MissionPlan};
use crate::physics_engine::{orbit_polyline, EARTH, MARS};
use crate::protocol::{
    decode_command, Command, InitMessage, MissionInfo, Reply, ServerMessage, Snapshot,
};
use crate::transfer::HohmannSolver;

const COMMAND_QUEUE: usize = 32;

/// J2000.0 as a Unix timestamp (2000-01-01T12:00:00Z, TT offset ignored)
const J2000_UNIX_SECONDS: i64 = 946_728_000;

fn j2000_plus(days: f64) -> Option<DateTime<Utc>> {
    let seconds = (days * 86_400.0).round() as i64;
    Utc.timestamp_opt(J2000_UNIX_SECONDS.saturating_add(seconds), 0).single()
}

// =============================================================================
// MISSION SIMULATION
// =============================================================================

/// Clock plus phase machine. Everything else is derived from `time_days`.
pub struct MissionSimulation {
    clock: SimulationClock,
    machine: MissionPhaseStateMachine,
    info: MissionInfo,
    earth_orbit: Vec<[f64; 3]>,
    mars_orbit: Vec<[f64; 3]>,
}

impl MissionSimulation {
    pub fn new(config: &SimulationConfig) -> Result<Self, ServerError> {
        config.validate()?;
        EARTH.validate()?;
        MARS.validate()?;

        let solver = HohmannSolver;
        let MissionPlan {
            timeline,
            origin,
            destination,
            epoch_days,
        } = MissionPlan::round_trip(&solver, &EARTH, &MARS, config)?;
        let transfer_days = |phase| {
            timeline
                .window(phase)
                .map(|w| w.duration_days)
                .unwrap_or_default()
        };

        let info = MissionInfo {
            phases: timeline.windows().to_vec(),
            outbound_transfer_days: transfer_days(MissionPhase::TransferToMars),
            return_transfer_days: transfer_days(MissionPhase::TransferToEarth),
            timeline_horizon_end: timeline.horizon_end(),
            bodies: [origin, destination],
            mission_epoch_days: epoch_days,
            mission_epoch: j2000_plus(epoch_days),
            tick_hz: config.tick_hz,
            max_speed: config.max_speed,
            started_at: Utc::now(),
        };
        log::info!(
            "mission timeline: {:.1} days (transfer legs {:.1} / {:.1} days)",
            info.timeline_horizon_end,
            info.outbound_transfer_days,
            info.return_transfer_days
        );

        let clock = SimulationClock::new(
            timeline.horizon_end(),
            config.default_speed,
            config.max_speed,
        );
        let machine = MissionPhaseStateMachine::new(
            timeline,
            origin,
            destination,
            Box::new(solver),
            config.parking_offset_au,
        );

        Ok(Self {
            clock,
            machine,
            info,
            earth_orbit: orbit_polyline(&origin, config.orbit_samples),
            mars_orbit: orbit_polyline(&destination, config.orbit_samples),
        })
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn machine(&self) -> &MissionPhaseStateMachine {
        &self.machine
    }

    /// Apply an operator command. Returns a reset event when trails must be cleared.
    pub fn apply(&mut self, command: Command) -> Result<Option<ClockEvent>, CommandError> {
        let event = match command {
            Command::Start => self.clock.start(),
            Command::Pause => {
                self.clock.pause();
                None
            }
            Command::Stop => Some(self.clock.stop()),
            Command::SetSpeed { speed } => {
                let applied = self.clock.set_speed(speed)?;
                log::info!("time speed set to {applied} days/s");
                None
            }
            Command::SetTime { time } => {
                let applied = self.clock.set_time(time)?;
                log::info!("scrubbed to day {applied:.2}");
                None
            }
            Command::GetState => None,
        };

        if event.is_some() {
            self.machine.reset();
        }
        Ok(event)
    }

    /// Advance by a wall-clock delta and return the new authoritative snapshot.
    pub fn tick(&mut self, elapsed_seconds: f64) -> Snapshot {
        self.clock.tick(elapsed_seconds);
        self.snapshot()
    }

    pub fn snapshot(&mut self) -> Snapshot {
        let derived = self.machine.derive(self.clock.time_days());
        Snapshot::new(&derived, &self.clock.state(), self.clock.horizon_end())
    }

    pub fn init_message(&mut self) -> InitMessage {
        InitMessage {
            mission_info: self.info.clone(),
            earth_orbit: self.earth_orbit.clone(),
            mars_orbit: self.mars_orbit.clone(),
            current_snapshot: self.snapshot(),
            simulation_state: self.clock.state(),
        }
    }
}

// =============================================================================
// SUBSCRIBERS
// =============================================================================

/// Outbound stream of one viewer. `init` always arrives first.
pub struct Subscription {
    pub id: u64,
    receiver: mpsc::Receiver<ServerMessage>,
}

impl Subscription {
    /// Next message, or `None` once the loop has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.receiver.recv().await
    }
}

/// What the loop does when a subscriber's buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backpressure {
    /// Drop the subscriber; its stream ends
    #[default]
    Disconnect,
    /// Keep the subscriber and skip messages until it drains its buffer.
    /// Snapshots are complete, so the next one delivered replaces the skipped ones.
    SkipStale,
}

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<ServerMessage>,
    policy: Backpressure,
    skipped: u64,
}

struct SubscriberHub {
    subscribers: Vec<Subscriber>,
    next_id: u64,
    buffer: usize,
}

impl SubscriberHub {
    fn new(buffer: usize) -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 0,
            buffer: buffer.max(1),
        }
    }

    fn register(&mut self, init: InitMessage, policy: Backpressure) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id;
        self.next_id += 1;

        // Fresh channel with capacity >= 1, cannot be full
        let _ = sender.try_send(ServerMessage::Init(init));
        self.subscribers.push(Subscriber {
            id,
            sender,
            policy,
            skipped: 0,
        });
        log::info!(
            "subscriber {id} connected ({policy:?}, {} total)",
            self.subscribers.len()
        );

        self.publish(ServerMessage::Presence {
            subscribers: self.subscribers.len(),
        });
        Subscription { id, receiver }
    }

    /// Deliver to everyone; subscribers that dropped out trigger a presence update.
    fn publish(&mut self, message: ServerMessage) {
        let mut dropped = self.fan_out(&message);
        while dropped > 0 {
            dropped = self.fan_out(&ServerMessage::Presence {
                subscribers: self.subscribers.len(),
            });
        }
    }

    fn fan_out(&mut self, message: &ServerMessage) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain_mut(|subscriber| {
            let id = subscriber.id;
            match subscriber.sender.try_send(message.clone()) {
                Ok(()) => {
                    if subscriber.skipped > 0 {
                        log::info!(
                            "subscriber {id} caught up after skipping {} messages",
                            subscriber.skipped
                        );
                        subscriber.skipped = 0;
                    }
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => match subscriber.policy {
                    Backpressure::Disconnect => {
                        log::warn!("subscriber {id} fell behind, dropping it");
                        false
                    }
                    Backpressure::SkipStale => {
                        if subscriber.skipped == 0 {
                            log::warn!("subscriber {id} fell behind, skipping messages");
                        }
                        subscriber.skipped += 1;
                        true
                    }
                },
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::info!("subscriber {id} disconnected");
                    false
                }
            }
        });
        before - self.subscribers.len()
    }

    fn len(&self) -> usize {
        self.subscribers.len()
    }
}

// =============================================================================
// HANDLE
// =============================================================================

enum Inbound {
    Command {
        command: Command,
        reply: oneshot::Sender<Reply>,
    },
    Subscribe {
        policy: Backpressure,
        reply: oneshot::Sender<Subscription>,
    },
    Shutdown,
}

/// Cheap to clone; every connection gets its own copy.
#[derive(Clone)]
pub struct SimulationHandle {
    inbound: mpsc::Sender<Inbound>,
    latest: Arc<RwLock<Snapshot>>,
}

impl SimulationHandle {
    /// Decode and execute one raw JSON command. Bad payloads become error replies.
    pub async fn submit(&self, raw: &str) -> Result<Reply, ServerError> {
        match decode_command(raw) {
            Ok(command) => self.execute(command).await,
            Err((error, command)) => {
                log::warn!("rejected command: {error}");
                Ok(Reply::error(&error, command))
            }
        }
    }

    pub async fn execute(&self, command: Command) -> Result<Reply, ServerError> {
        let (reply, response) = oneshot::channel();
        self.inbound
            .send(Inbound::Command { command, reply })
            .await
            .map_err(|_| ServerError::LoopClosed)?;
        response.await.map_err(|_| ServerError::LoopClosed)
    }

    /// Subscribe with the default policy: dropped if it falls behind.
    pub async fn subscribe(&self) -> Result<Subscription, ServerError> {
        self.subscribe_with(Backpressure::Disconnect).await
    }

    pub async fn subscribe_with(&self, policy: Backpressure) -> Result<Subscription, ServerError> {
        let (reply, response) = oneshot::channel();
        self.inbound
            .send(Inbound::Subscribe { policy, reply })
            .await
            .map_err(|_| ServerError::LoopClosed)?;
        response.await.map_err(|_| ServerError::LoopClosed)
    }

    /// Most recently broadcast snapshot, readable without queueing behind the loop.
    pub fn latest_snapshot(&self) -> Snapshot {
        self.latest.read().clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.inbound.send(Inbound::Shutdown).await;
    }
}

// =============================================================================
// BROADCAST LOOP
// =============================================================================

struct BroadcastLoop {
    simulation: MissionSimulation,
    hub: SubscriberHub,
    latest: Arc<RwLock<Snapshot>>,
    // Only used to detect phase_change; never drives the phase itself
    announced_phase: MissionPhase,
}

impl BroadcastLoop {
    fn broadcast(&mut self, snapshot: Snapshot) {
        if snapshot.phase != self.announced_phase {
            log::info!(
                "phase {} -> {} at day {:.2}",
                self.announced_phase,
                snapshot.phase,
                snapshot.time_days
            );
            self.hub.publish(ServerMessage::PhaseChange {
                from: self.announced_phase,
                to: snapshot.phase,
                time_days: snapshot.time_days,
            });
            self.announced_phase = snapshot.phase;
        }
        *self.latest.write() = snapshot.clone();
        self.hub.publish(ServerMessage::Update(snapshot));
    }

    fn tick(&mut self, elapsed_seconds: f64) {
        let snapshot = self.simulation.tick(elapsed_seconds);
        self.broadcast(snapshot);
    }

    fn handle_command(&mut self, command: Command) -> Reply {
        match self.simulation.apply(command) {
            Ok(event) => {
                if let Some(ClockEvent::Reset) = event {
                    self.hub.publish(ServerMessage::Reset {
                        time_days: self.simulation.clock().time_days(),
                    });
                }
                let snapshot = self.simulation.snapshot();
                match command {
                    Command::GetState => Reply::Snapshot(snapshot),
                    _ => {
                        self.broadcast(snapshot);
                        Reply::ack(&command)
                    }
                }
            }
            Err(error) => {
                log::warn!("{} rejected: {error}", command.name());
                Reply::error(&error, Some(command.name().to_string()))
            }
        }
    }

    fn subscribe(&mut self, policy: Backpressure) -> Subscription {
        let init = self.simulation.init_message();
        self.hub.register(init, policy)
    }
}

/// Spawn the loop task. It exits on `shutdown()` or when every handle is dropped.
pub fn start_simulation_loop(
    mut simulation: MissionSimulation,
    config: &SimulationConfig,
) -> (SimulationHandle, JoinHandle<()>) {
    let (inbound, mut inbound_rx) = mpsc::channel(COMMAND_QUEUE);
    let initial = simulation.snapshot();
    let latest = Arc::new(RwLock::new(initial.clone()));
    let handle = SimulationHandle {
        inbound,
        latest: latest.clone(),
    };

    let period = config.tick_period();
    let mut state = BroadcastLoop {
        simulation,
        hub: SubscriberHub::new(config.subscriber_buffer),
        latest,
        announced_phase: initial.phase,
    };

    let task = tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Real elapsed time, so a late tick does not slow the mission down
                    let now = Instant::now();
                    let elapsed = now.duration_since(last_tick).as_secs_f64();
                    last_tick = now;
                    state.tick(elapsed);
                }
                inbound = inbound_rx.recv() => match inbound {
                    Some(Inbound::Command { command, reply }) => {
                        let _ = reply.send(state.handle_command(command));
                    }
                    Some(Inbound::Subscribe { policy, reply }) => {
                        let _ = reply.send(state.subscribe(policy));
                    }
                    Some(Inbound::Shutdown) | None => break,
                },
            }
        }
        state.hub.publish(ServerMessage::Shutdown);
        log::info!(
            "simulation loop stopped ({} subscribers notified)",
            state.hub.len()
        );
    });

    (handle, task)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockStatus;
    use crate::physics_engine::{state_at, Vector3};
    use std::time::Duration;
    use tokio::time::timeout;

    const TICK: f64 = 0.05;

    fn simulation() -> MissionSimulation {
        MissionSimulation::new(&SimulationConfig::default()).unwrap()
    }

    fn fast_config(subscriber_buffer: usize) -> SimulationConfig {
        SimulationConfig {
            tick_hz: 100.0,
            subscriber_buffer,
            ..SimulationConfig::default()
        }
    }

    async fn next(subscription: &mut Subscription) -> ServerMessage {
        timeout(Duration::from_secs(2), subscription.recv())
            .await
            .expect("message within timeout")
            .expect("subscription open")
    }

    #[test]
    fn test_new_simulation_is_stopped_at_day_zero() {
        let mut sim = simulation();
        let snapshot = sim.snapshot();
        assert_eq!(snapshot.time_days, 0.0);
        assert_eq!(snapshot.phase, MissionPhase::PreLaunch);
        assert!(!snapshot.simulation.is_running);
        assert_eq!(snapshot.simulation.time_speed, 10.0);
        assert_eq!(snapshot.mission_progress, 0.0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SimulationConfig {
            tick_hz: 0.0,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            MissionSimulation::new(&config),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn test_start_and_tick_advances_time() {
        let mut sim = simulation();
        sim.apply(Command::Start).unwrap();
        let snapshot = sim.tick(1.0);
        assert_eq!(snapshot.time_days, 10.0);
        assert!(snapshot.simulation.is_running);
    }

    #[test]
    fn test_pause_freezes_every_position() {
        let mut sim = simulation();
        sim.apply(Command::Start).unwrap();
        sim.apply(Command::SetSpeed { speed: 50.0 }).unwrap();
        for _ in 0..20 {
            sim.tick(TICK);
        }

        sim.apply(Command::Pause).unwrap();
        let frozen = sim.snapshot();
        for _ in 0..20 {
            let snapshot = sim.tick(TICK);
            assert_eq!(snapshot, frozen);
        }

        sim.apply(Command::Pause).unwrap();
        assert_eq!(sim.clock().status(), ClockStatus::Running);
        let resumed = sim.tick(TICK);
        assert!((resumed.time_days - (frozen.time_days + TICK * 50.0)).abs() < 1e-9);
    }

    #[test]
    fn test_stop_then_start_replays_identically() {
        let mut sim = simulation();
        let run = |sim: &mut MissionSimulation| -> Vec<Snapshot> {
            sim.apply(Command::Start).unwrap();
            sim.apply(Command::SetSpeed { speed: 200.0 }).unwrap();
            (0..40).map(|_| sim.tick(TICK)).collect()
        };

        let first = run(&mut sim);
        assert!(first.iter().any(|s| s.phase == MissionPhase::TransferToMars));

        assert_eq!(sim.apply(Command::Stop), Ok(Some(ClockEvent::Reset)));
        assert!(sim.machine().active_leg().is_none());
        assert_eq!(sim.snapshot().time_days, 0.0);

        let second = run(&mut sim);
        assert_eq!(first, second);
    }

    #[test]
    fn test_scrub_into_transfer_while_stopped() {
        let mut sim = simulation();
        sim.apply(Command::SetTime { time: 30.0 }).unwrap();
        let snapshot = sim.snapshot();

        let outbound = sim
            .machine()
            .timeline()
            .window(MissionPhase::TransferToMars)
            .unwrap()
            .duration_days;
        assert_eq!(snapshot.phase, MissionPhase::TransferToMars);
        assert!((snapshot.progress - 10.0 / outbound).abs() < 1e-12);
        assert!(!snapshot.simulation.is_running);
        assert_ne!(snapshot.spacecraft_position, snapshot.earth_position);
    }

    #[test]
    fn test_scrub_backwards_lands_in_earlier_phase() {
        let mut sim = simulation();
        sim.apply(Command::SetTime { time: 500.0 }).unwrap();
        assert_eq!(sim.snapshot().phase, MissionPhase::MarsOrbitStay);
        sim.apply(Command::SetTime { time: 100.0 }).unwrap();
        assert_eq!(sim.snapshot().phase, MissionPhase::TransferToMars);
    }

    #[test]
    fn test_start_at_end_of_timeline_restarts() {
        let mut sim = simulation();
        sim.apply(Command::SetTime { time: 1e6 }).unwrap();
        let end = sim.snapshot();
        assert_eq!(end.phase, MissionPhase::EarthOrbitStay);
        assert_eq!(end.progress, 1.0);

        assert_eq!(sim.apply(Command::Start), Ok(Some(ClockEvent::Reset)));
        assert_eq!(sim.snapshot().time_days, 0.0);
    }

    #[test]
    fn test_rejected_command_changes_nothing() {
        let mut sim = simulation();
        let before = sim.snapshot();
        assert!(sim.apply(Command::SetSpeed { speed: f64::NAN }).is_err());
        assert!(sim.apply(Command::SetTime { time: f64::NAN }).is_err());
        assert_eq!(sim.snapshot(), before);
    }

    #[test]
    fn test_init_message_describes_the_mission() {
        let mut sim = simulation();
        let init = sim.init_message();
        let info = &init.mission_info;

        assert_eq!(info.phases.len(), 5);
        assert_eq!(info.bodies[0].name, "earth");
        assert_eq!(info.bodies[1].name, "mars");
        assert!((258.0..260.0).contains(&info.outbound_transfer_days));
        assert_eq!(init.earth_orbit.len(), 361);
        assert_eq!(init.mars_orbit.len(), 361);
        assert_eq!(init.current_snapshot.time_days, 0.0);
        assert_eq!(init.simulation_state, sim.clock().state());
    }

    #[test]
    fn test_mission_is_placed_at_a_launch_window() {
        let mut sim = simulation();
        let info = sim.init_message().mission_info;
        assert!(info.mission_epoch_days > 0.0);
        let epoch = info.mission_epoch.expect("epoch within chrono range");
        assert_eq!(epoch.format("%Y").to_string(), "2001");

        // Bodies are sent with their re-epoched mean anomalies
        let earth = state_at(&EARTH, info.mission_epoch_days).position;
        let [x, y, z] = sim.snapshot().earth_position;
        assert!(earth.distance_to(&Vector3::new(x, y, z)) < 1e-9);
        assert_ne!(info.bodies[0].mean_anomaly, EARTH.mean_anomaly);
    }

    #[tokio::test]
    async fn test_subscriber_receives_init_first() {
        let (handle, task) = start_simulation_loop(simulation(), &fast_config(64));
        let mut viewer = handle.subscribe().await.unwrap();

        assert!(matches!(next(&mut viewer).await, ServerMessage::Init(_)));
        assert_eq!(
            next(&mut viewer).await,
            ServerMessage::Presence { subscribers: 1 }
        );
        assert!(matches!(next(&mut viewer).await, ServerMessage::Update(_)));

        handle.shutdown().await;
        task.await.unwrap();
        let mut last = None;
        while let Some(message) = viewer.recv().await {
            last = Some(message);
        }
        assert_eq!(last, Some(ServerMessage::Shutdown));
    }

    #[tokio::test]
    async fn test_commands_are_acknowledged() {
        let (handle, task) = start_simulation_loop(simulation(), &fast_config(64));

        let reply = handle.submit(r#"{"command":"start"}"#).await.unwrap();
        assert_eq!(reply, Reply::Ack { command: "start" });
        assert!(handle.latest_snapshot().simulation.is_running);

        let reply = handle
            .submit(r#"{"command":"set_speed","speed":999}"#)
            .await
            .unwrap();
        assert_eq!(reply, Reply::Ack { command: "set_speed" });

        match handle.submit(r#"{"command":"get_state"}"#).await.unwrap() {
            Reply::Snapshot(snapshot) => assert_eq!(snapshot.simulation.time_speed, 200.0),
            other => panic!("expected snapshot, got {other:?}"),
        }

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_commands_get_error_replies() {
        let (handle, task) = start_simulation_loop(simulation(), &fast_config(64));

        let reply = handle.submit(r#"{"command":"warp"}"#).await.unwrap();
        assert!(matches!(reply, Reply::Error { command: Some(ref c), .. } if c == "warp"));

        let reply = handle.submit("{{{").await.unwrap();
        assert!(matches!(reply, Reply::Error { command: None, .. }));

        let reply = handle
            .execute(Command::SetTime { time: f64::NAN })
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Error { command: Some(ref c), .. } if c == "set_time"));

        // The loop keeps serving after rejections
        let reply = handle.submit(r#"{"command":"pause"}"#).await.unwrap();
        assert_eq!(reply, Reply::Ack { command: "pause" });

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_broadcasts_reset() {
        let (handle, task) = start_simulation_loop(simulation(), &fast_config(64));
        let mut viewer = handle.subscribe().await.unwrap();

        handle.submit(r#"{"command":"start"}"#).await.unwrap();
        handle.submit(r#"{"command":"stop"}"#).await.unwrap();

        let mut saw_reset = false;
        for _ in 0..50 {
            if let ServerMessage::Reset { time_days } = next(&mut viewer).await {
                assert_eq!(time_days, 0.0);
                saw_reset = true;
                break;
            }
        }
        assert!(saw_reset);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_phase_change_is_announced_on_scrub() {
        let (handle, task) = start_simulation_loop(simulation(), &fast_config(64));
        let mut viewer = handle.subscribe().await.unwrap();

        handle
            .execute(Command::SetTime { time: 25.0 })
            .await
            .unwrap();

        let mut change = None;
        for _ in 0..50 {
            if let ServerMessage::PhaseChange { from, to, .. } = next(&mut viewer).await {
                change = Some((from, to));
                break;
            }
        }
        assert_eq!(
            change,
            Some((MissionPhase::PreLaunch, MissionPhase::TransferToMars))
        );

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_and_closed_subscribers_are_dropped() {
        let (handle, task) = start_simulation_loop(simulation(), &fast_config(8));

        let _stalled = handle.subscribe().await.unwrap();
        let closed = handle.subscribe().await.unwrap();
        let mut viewer = handle.subscribe().await.unwrap();
        drop(closed);

        // Keep draining until only this viewer is left
        let mut remaining = None;
        for _ in 0..500 {
            if let ServerMessage::Presence { subscribers } = next(&mut viewer).await {
                remaining = Some(subscribers);
                if subscribers == 1 {
                    break;
                }
            }
        }
        assert_eq!(remaining, Some(1));

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_skip_stale_subscriber_survives_a_stall() {
        let (handle, task) = start_simulation_loop(simulation(), &fast_config(4));
        let mut viewer = handle
            .subscribe_with(Backpressure::SkipStale)
            .await
            .unwrap();

        // ~20 ticks against a buffer of 4
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(matches!(next(&mut viewer).await, ServerMessage::Init(_)));
        let mut updates = 0;
        while updates < 20 {
            if let ServerMessage::Update(_) = next(&mut viewer).await {
                updates += 1;
            }
        }

        let reply = handle.submit(r#"{"command":"pause"}"#).await.unwrap();
        assert_eq!(reply, Reply::Ack { command: "pause" });

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_exits_when_handles_are_dropped() {
        let (handle, task) = start_simulation_loop(simulation(), &fast_config(8));
        drop(handle);
        timeout(Duration::from_secs(2), task)
            .await
            .expect("loop exits")
            .unwrap();
    }
}
