//! Command multiplexer: the robot's 20 Hz velocity heartbeat.
//!
//! The navigation server only keeps moving while it keeps hearing a target
//! velocity; every `Se2TargetVelocity` expires one second after it is
//! stamped. [`CommandMultiplexer`] owns the single client-streaming
//! `SubscribeRobotCommand` call and re-sends the current [`CommandSetpoint`]
//! on every tick. HTTP handlers only ever overwrite the setpoint; they never
//! touch the stream.
//!
//! | Operation | Effect |
//! |---|---|
//! | [`start`](CommandMultiplexer::start) | open the call and arm the ticker (idempotent) |
//! | [`stop`](CommandMultiplexer::stop) | half-close the call, drop the session, zero the setpoint |
//! | [`set_velocity`](CommandMultiplexer::set_velocity) | replace the setpoint; seen by the next tick |

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ponyka_proto::Timestamp;
use ponyka_proto::geometry_msgs::{Se2Velocity, Vector2};
use ponyka_proto::robot_msgs::{
    ControlCmd, NavCommand, RobotCommand, RobotCommandTimeStamped, Se2TargetVelocity,
};
use ponyka_proto::std_msgs::{Header, Time};
use ponyka_types::{BridgeError, CommandSetpoint, Direction, TaskCommand, Vec2};
use tokio::sync::{oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::transport::{CommandConnector, CommandSink};

pub const DEFAULT_COMMAND_PERIOD: Duration = Duration::from_millis(50);

/// Frame of every streamed velocity command.
pub const NAV_FRAME_ID: &str = "base_link";
/// Frame of one-shot task commands.
pub const TASK_FRAME_ID: &str = "robot_command";

fn header(frame_id: &str, now: DateTime<Utc>) -> Header {
    Header {
        stamp: Some(Time {
            sec: now.timestamp() as i32,
            nanosec: now.timestamp_subsec_nanos(),
        }),
        frame_id: frame_id.to_string(),
    }
}

/// Velocity command for `setpoint`, stamped `now` and valid for one second.
pub fn build_command(setpoint: &CommandSetpoint, now: DateTime<Utc>) -> RobotCommandTimeStamped {
    RobotCommandTimeStamped {
        header: Some(header(NAV_FRAME_ID, now)),
        command: Some(RobotCommand {
            nav: Some(NavCommand {
                se2_target_velocity: Some(Se2TargetVelocity {
                    vel: Some(Se2Velocity {
                        linear: Some(Vector2 {
                            x: setpoint.linear.x,
                            y: setpoint.linear.y,
                        }),
                        angular: setpoint.angular,
                    }),
                    end_time: Some(Timestamp {
                        seconds: now.timestamp() + 1,
                        nanos: 0,
                    }),
                }),
            }),
            cmd: None,
        }),
    }
}

/// Task command wrapping `task`, with its numeric arguments zero-padded.
pub fn build_task_command(task: TaskCommand, now: DateTime<Utc>) -> RobotCommandTimeStamped {
    let task = task.padded();
    RobotCommandTimeStamped {
        header: Some(header(TASK_FRAME_ID, now)),
        command: Some(RobotCommand {
            nav: None,
            cmd: Some(ControlCmd {
                cmd_mode: task.cmd_mode,
                arg: task.arg,
                arg_n: task.arg_n,
                arg_f: task.arg_f,
            }),
        }),
    }
}

// ---------------------------------------------------------------------------
// Multiplexer
// ---------------------------------------------------------------------------

struct CommandSession {
    generation: u64,
    shutdown: oneshot::Sender<()>,
}

struct Slot {
    generation: u64,
    session: Option<CommandSession>,
}

struct Inner {
    connector: Arc<dyn CommandConnector>,
    endpoint: String,
    period: Duration,
    setpoint: watch::Sender<CommandSetpoint>,
    slot: Mutex<Slot>,
}

/// Owns the outbound command stream and the setpoint it re-asserts.
///
/// Cheap to clone; clones drive the same stream.
#[derive(Clone)]
pub struct CommandMultiplexer {
    inner: Arc<Inner>,
}

impl CommandMultiplexer {
    pub fn new(connector: Arc<dyn CommandConnector>, endpoint: impl Into<String>) -> Self {
        Self::with_period(connector, endpoint, DEFAULT_COMMAND_PERIOD)
    }

    pub fn with_period(
        connector: Arc<dyn CommandConnector>,
        endpoint: impl Into<String>,
        period: Duration,
    ) -> Self {
        let (setpoint, _) = watch::channel(CommandSetpoint::ZERO);
        Self {
            inner: Arc::new(Inner {
                connector,
                endpoint: endpoint.into(),
                period,
                setpoint,
                slot: Mutex::new(Slot {
                    generation: 0,
                    session: None,
                }),
            }),
        }
    }

    /// Open the command stream and start ticking. A no-op while a session
    /// is already live.
    ///
    /// # Errors
    ///
    /// Whatever the connector reports when the call cannot be opened; the
    /// setpoint is zeroed in that case.
    pub fn start(&self) -> Result<(), BridgeError> {
        let mut slot = self.inner.lock();
        if slot.session.is_some() {
            debug!("command stream already running");
            return Ok(());
        }

        let sink = match self.inner.connector.open(&self.inner.endpoint) {
            Ok(sink) => sink,
            Err(e) => {
                self.inner.setpoint.send_replace(CommandSetpoint::ZERO);
                error!(endpoint = %self.inner.endpoint, error = %e, "could not open command stream");
                return Err(e);
            }
        };

        slot.generation += 1;
        let generation = slot.generation;
        let first_tick = Instant::now() + self.inner.period;
        let (shutdown, shutdown_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(&self.inner).run_ticker(generation, first_tick, sink, shutdown_rx));
        slot.session = Some(CommandSession { generation, shutdown });

        info!(
            endpoint = %self.inner.endpoint,
            period_ms = self.inner.period.as_millis() as u64,
            "command stream started"
        );
        Ok(())
    }

    /// Half-close the command stream and zero the setpoint. Safe to call at
    /// any time.
    pub fn stop(&self) {
        if self.inner.stop_session(None) {
            info!(endpoint = %self.inner.endpoint, "command stream stopped");
        }
    }

    pub fn set_velocity(&self, linear: Vec2, angular: f64) {
        self.set_setpoint(CommandSetpoint::new(linear, angular));
    }

    pub fn set_setpoint(&self, setpoint: CommandSetpoint) {
        self.inner.setpoint.send_replace(setpoint);
        debug!(
            linear_x = setpoint.linear.x,
            linear_y = setpoint.linear.y,
            angular = setpoint.angular,
            "setpoint updated"
        );
    }

    /// Teleop helper: `speed_percent` in `0..=100` along `direction`.
    pub fn set_direction(&self, direction: Direction, speed_percent: f64) -> CommandSetpoint {
        let setpoint = direction.to_setpoint(speed_percent);
        self.set_setpoint(setpoint);
        setpoint
    }

    pub fn setpoint(&self) -> CommandSetpoint {
        *self.inner.setpoint.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().session.is_some()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tear down the session. With `Some(generation)` only that session is
    /// affected; a newer one is left alone.
    ///
    /// The setpoint is zeroed while the slot is still held.
    fn stop_session(&self, generation: Option<u64>) -> bool {
        let session = {
            let mut slot = self.lock();
            let current = slot.session.as_ref().map(|s| s.generation);
            if generation.is_some() && generation != current {
                return false;
            }
            self.setpoint.send_replace(CommandSetpoint::ZERO);
            slot.session.take()
        };

        match session {
            Some(session) => {
                // the ticker may already be gone after a failed write
                let _ = session.shutdown.send(());
                true
            }
            None => false,
        }
    }

    async fn run_ticker(
        self: Arc<Self>,
        generation: u64,
        first_tick: Instant,
        mut sink: Box<dyn CommandSink>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut ticks = time::interval_at(first_tick, self.period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    sink.close();
                    debug!(generation, "command stream half-closed");
                    return;
                }
                _ = ticks.tick() => {
                    let setpoint = *self.setpoint.borrow();
                    if let Err(e) = sink.write(build_command(&setpoint, Utc::now())) {
                        error!(endpoint = %self.endpoint, error = %e, "command write failed; stopping stream");
                        sink.close();
                        self.stop_session(Some(generation));
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        writes: Mutex<Vec<RobotCommandTimeStamped>>,
        written_at: Mutex<Vec<Instant>>,
        closes: AtomicUsize,
        opens: AtomicUsize,
    }

    struct FakeSink {
        recorder: Arc<Recorder>,
        fail_after: Option<usize>,
    }

    impl CommandSink for FakeSink {
        fn write(&mut self, command: RobotCommandTimeStamped) -> Result<(), BridgeError> {
            let mut writes = self.recorder.writes.lock().unwrap();
            if self.fail_after.is_some_and(|n| writes.len() >= n) {
                return Err(BridgeError::CommandWrite("stream closed by server".into()));
            }
            writes.push(command);
            self.recorder.written_at.lock().unwrap().push(Instant::now());
            Ok(())
        }

        fn close(self: Box<Self>) {
            self.recorder.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeConnector {
        recorder: Arc<Recorder>,
        refuse: bool,
        fail_after: Option<usize>,
    }

    impl CommandConnector for FakeConnector {
        fn open(&self, _endpoint: &str) -> Result<Box<dyn CommandSink>, BridgeError> {
            self.recorder.opens.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(BridgeError::Connection("invalid endpoint".into()));
            }
            Ok(Box::new(FakeSink {
                recorder: Arc::clone(&self.recorder),
                fail_after: self.fail_after,
            }))
        }
    }

    fn multiplexer(refuse: bool, fail_after: Option<usize>) -> (Arc<Recorder>, CommandMultiplexer) {
        let recorder = Arc::new(Recorder::default());
        let connector = Arc::new(FakeConnector {
            recorder: Arc::clone(&recorder),
            refuse,
            fail_after,
        });
        (recorder, CommandMultiplexer::new(connector, "robot:50056"))
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn tick() {
        time::advance(DEFAULT_COMMAND_PERIOD).await;
        settle().await;
    }

    fn velocity(cmd: &RobotCommandTimeStamped) -> Se2Velocity {
        cmd.command
            .as_ref()
            .and_then(|c| c.nav.as_ref())
            .and_then(|n| n.se2_target_velocity.as_ref())
            .and_then(|t| t.vel)
            .expect("nav velocity present")
    }

    fn last_write(recorder: &Recorder) -> RobotCommandTimeStamped {
        recorder.writes.lock().unwrap().last().cloned().expect("at least one write")
    }

    #[test]
    fn build_command_stamps_header_and_expiry() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:00:00.250Z")
            .unwrap()
            .with_timezone(&Utc);
        let cmd = build_command(&CommandSetpoint::new(Vec2 { x: 0.5, y: 0.0 }, 0.0), now);

        let header = cmd.header.as_ref().unwrap();
        let stamp = header.stamp.unwrap();
        assert_eq!(header.frame_id, "base_link");
        assert_eq!(stamp.sec as i64, now.timestamp());
        assert_eq!(stamp.nanosec, 250_000_000);

        let target = cmd.command.as_ref().unwrap().nav.as_ref().unwrap();
        let end = target.se2_target_velocity.as_ref().unwrap().end_time.as_ref().unwrap();
        assert_eq!(end.seconds, now.timestamp() + 1);
        assert_eq!(end.nanos, 0);
    }

    #[test]
    fn task_command_uses_its_own_frame() {
        let task = TaskCommand {
            cmd_mode: 3,
            arg: "home".into(),
            arg_n: vec![1],
            arg_f: vec![],
        };
        let cmd = build_task_command(task, Utc::now());
        assert_eq!(cmd.header.as_ref().unwrap().frame_id, "robot_command");

        let command = cmd.command.unwrap();
        assert!(command.nav.is_none());
        let control = command.cmd.unwrap();
        assert_eq!(control.cmd_mode, 3);
        assert_eq!(control.arg, "home");
        assert_eq!(control.arg_n, vec![1, 0, 0]);
        assert_eq!(control.arg_f, vec![0.0, 0.0, 0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn set_velocity_is_sent_on_next_tick() {
        let (recorder, mux) = multiplexer(false, None);
        mux.start().unwrap();
        mux.set_velocity(Vec2 { x: 0.5, y: 0.0 }, 0.0);

        tick().await;

        let vel = velocity(&last_write(&recorder));
        assert_eq!(vel.linear, Some(Vector2 { x: 0.5, y: 0.0 }));
        assert_eq!(vel.angular, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_every_period() {
        let (recorder, mux) = multiplexer(false, None);
        mux.start().unwrap();

        settle().await;
        assert!(recorder.writes.lock().unwrap().is_empty());

        for _ in 0..4 {
            tick().await;
        }
        assert_eq!(recorder.writes.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_one_period_after_start() {
        let (recorder, mux) = multiplexer(false, None);
        let started = Instant::now();
        mux.start().unwrap();
        mux.set_velocity(Vec2 { x: 0.5, y: 0.0 }, 0.0);

        // the ticker task is not polled before the clock moves
        for _ in 0..3 {
            tick().await;
        }

        let offsets: Vec<u128> = recorder
            .written_at
            .lock()
            .unwrap()
            .iter()
            .map(|at| at.duration_since(started).as_millis())
            .collect();
        assert_eq!(offsets, vec![50, 100, 150]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_zeroes_before_a_new_session_can_start() {
        let (recorder, mux) = multiplexer(false, None);
        mux.start().unwrap();
        mux.set_velocity(Vec2 { x: 0.7, y: 0.0 }, 0.0);
        tick().await;

        mux.stop();
        mux.start().unwrap();
        mux.set_velocity(Vec2 { x: 0.2, y: 0.0 }, 0.1);
        settle().await;
        assert_eq!(mux.setpoint(), CommandSetpoint::new(Vec2 { x: 0.2, y: 0.0 }, 0.1));

        tick().await;
        let vel = velocity(&last_write(&recorder));
        assert_eq!(vel.linear, Some(Vector2 { x: 0.2, y: 0.0 }));
        assert_eq!(vel.angular, 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_between_ticks_is_not_lost() {
        let (recorder, mux) = multiplexer(false, None);
        mux.start().unwrap();
        tick().await;

        mux.set_direction(Direction::Forward, 40.0);
        mux.set_direction(Direction::RotateLeft, 20.0);
        tick().await;

        let vel = velocity(&last_write(&recorder));
        assert_eq!(vel.linear, Some(Vector2 { x: 0.0, y: 0.0 }));
        assert!((vel.angular - 0.2).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_keeps_one_session() {
        let (recorder, mux) = multiplexer(false, None);
        mux.start().unwrap();
        mux.start().unwrap();
        tick().await;

        assert_eq!(recorder.opens.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.writes.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_half_closes_and_zeroes() {
        let (recorder, mux) = multiplexer(false, None);
        mux.start().unwrap();
        mux.set_velocity(Vec2 { x: 0.3, y: 0.1 }, 0.2);
        tick().await;

        mux.stop();
        settle().await;
        assert!(!mux.is_active());
        assert!(mux.setpoint().is_zero());
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);

        let writes_before = recorder.writes.lock().unwrap().len();
        tick().await;
        tick().await;
        assert_eq!(recorder.writes.lock().unwrap().len(), writes_before);

        // stopping again is harmless
        mux.stop();
        settle().await;
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_sends_zero_velocity() {
        let (recorder, mux) = multiplexer(false, None);
        mux.start().unwrap();
        mux.set_velocity(Vec2 { x: 1.0, y: 0.0 }, 0.0);
        tick().await;
        mux.stop();

        mux.start().unwrap();
        tick().await;
        let vel = velocity(&last_write(&recorder));
        assert_eq!(vel.linear, Some(Vector2 { x: 0.0, y: 0.0 }));
        assert_eq!(vel.angular, 0.0);
        assert_eq!(recorder.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_stops_the_session() {
        let (recorder, mux) = multiplexer(false, Some(2));
        mux.start().unwrap();
        mux.set_velocity(Vec2 { x: 0.4, y: 0.0 }, 0.0);

        tick().await;
        tick().await;
        assert!(mux.is_active());

        tick().await;
        assert!(!mux.is_active());
        assert!(mux.setpoint().is_zero());
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.writes.lock().unwrap().len(), 2);

        // a fresh start opens a new call
        mux.start().unwrap();
        assert_eq!(recorder.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_is_reported_and_zeroes() {
        let (_recorder, mux) = multiplexer(true, None);
        mux.set_velocity(Vec2 { x: 0.4, y: 0.0 }, 0.0);

        assert!(matches!(mux.start(), Err(BridgeError::Connection(_))));
        assert!(!mux.is_active());
        assert!(mux.setpoint().is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn set_velocity_does_not_start_the_stream() {
        let (recorder, mux) = multiplexer(false, None);
        mux.set_velocity(Vec2 { x: 0.4, y: 0.0 }, 0.0);
        tick().await;

        assert!(!mux.is_active());
        assert_eq!(recorder.opens.load(Ordering::SeqCst), 0);
        assert_eq!(mux.setpoint(), CommandSetpoint::new(Vec2 { x: 0.4, y: 0.0 }, 0.0));
    }
}
