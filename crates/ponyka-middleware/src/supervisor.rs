//! Stream supervisor: one self-healing subscription per state feed.
//!
//! A [`StreamSupervisor`] owns the lifecycle of a single server-streaming
//! `PublishState` call:
//!
//! ```text
//! Idle ──start──▶ Connecting ──first envelope──▶ Streaming
//!                     ▲                               │
//!                     │ reconnect delay               │ error / end
//!                     └──────── Reconnecting ◀────────┘
//! ```
//!
//! Every transition goes through [`StreamSession`], a synchronous state
//! machine fed with explicit [`Instant`]s. The async driver only opens
//! calls, pulls envelopes and sleeps; each event it reports carries the
//! generation it was started under, and the session ignores events from a
//! superseded generation. That keeps at most one live call per feed.
//!
//! Decoded values are fanned out through the [`SubscriberRegistry`] at most
//! once per broadcast interval, and logged at most once per log interval.
//! The two windows are independent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use ponyka_proto::type_url;
use ponyka_types::{BridgeError, DecodeError, DecodedState, PushMessage};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::decoder::{self, DecodeFn, PayloadDecoder};
use crate::registry::SubscriberRegistry;
use crate::transport::{Envelope, FeedConnector};

pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

// ---------------------------------------------------------------------------
// Feed description
// ---------------------------------------------------------------------------

/// Static description of one state feed.
#[derive(Debug, Clone)]
pub struct FeedDescriptor {
    /// Short name used in log records (`robot-state`, `opstate`).
    pub name: String,
    /// `host:port` of the `PublishState` server.
    pub endpoint: String,
    /// The only `Any` type URL this feed broadcasts.
    pub expected_type: String,
    pub decode: DecodeFn,
    /// `type` field of every push frame this feed produces.
    pub broadcast_tag: String,
    pub broadcast_interval: Duration,
    pub log_interval: Duration,
    pub reconnect_delay: Duration,
}

impl FeedDescriptor {
    /// Describe a feed whose decoder is looked up in `decoders`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] when no decoder is registered for
    /// `expected_type`.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        expected_type: impl Into<String>,
        broadcast_tag: impl Into<String>,
        decoders: &PayloadDecoder,
    ) -> Result<Self, BridgeError> {
        let expected_type = expected_type.into();
        let decode = decoders.lookup(&expected_type).ok_or_else(|| {
            BridgeError::Config(format!("no decoder registered for {expected_type}"))
        })?;
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            expected_type,
            decode,
            broadcast_tag: broadcast_tag.into(),
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            log_interval: DEFAULT_LOG_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        })
    }

    /// The robot pose feed.
    pub fn robot_state(endpoint: impl Into<String>) -> Self {
        Self::preset(
            "robot-state",
            endpoint.into(),
            type_url::ROBOT_STATE,
            decoder::decode_robot_state,
            "robotstate-update",
        )
    }

    /// The dual-arm operation state feed.
    pub fn operation_state(endpoint: impl Into<String>) -> Self {
        Self::preset(
            "opstate",
            endpoint.into(),
            type_url::OPERATION_STATE,
            decoder::decode_operation_state,
            "opstate-update",
        )
    }

    fn preset(name: &str, endpoint: String, expected_type: &str, decode: DecodeFn, tag: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint,
            expected_type: expected_type.to_string(),
            decode,
            broadcast_tag: tag.to_string(),
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            log_interval: DEFAULT_LOG_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval = interval;
        self
    }

    pub fn with_log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

// ---------------------------------------------------------------------------
// Session state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
}

/// What a feed should do with a decoded envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dispatch {
    pub state: DecodedState,
    /// Passed the broadcast throttle window.
    pub broadcast: bool,
    /// Passed the diagnostic log throttle window.
    pub log: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeOutcome {
    /// Reported by a connection that has since been superseded.
    Stale,
    /// Type URL differs from the feed's expected type; silently dropped.
    Ignored,
    /// Expected type but the payload would not decode.
    Rejected(DecodeError),
    Accepted(Dispatch),
}

/// Per-feed session state. Pure: every time-dependent decision takes `now`
/// from the caller.
#[derive(Debug, Clone)]
pub struct StreamSession {
    state: SessionState,
    generation: u64,
    last_broadcast: Option<Instant>,
    last_log: Option<Instant>,
    latest: Option<DecodedState>,
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            last_broadcast: None,
            last_log: None,
            latest: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Most recent successfully decoded value, throttled or not.
    pub fn latest(&self) -> Option<DecodedState> {
        self.latest
    }

    /// Leave `Idle`. Returns the generation the new connection runs under,
    /// or `None` when a session is already live or pending a retry.
    pub fn begin_connect(&mut self) -> Option<u64> {
        if self.state != SessionState::Idle {
            return None;
        }
        self.state = SessionState::Connecting;
        self.generation += 1;
        Some(self.generation)
    }

    /// Classify one envelope received on connection `generation` at `now`.
    pub fn on_envelope(
        &mut self,
        generation: u64,
        now: Instant,
        envelope: &Envelope,
        feed: &FeedDescriptor,
    ) -> EnvelopeOutcome {
        if generation != self.generation || self.state == SessionState::Idle {
            return EnvelopeOutcome::Stale;
        }
        self.state = SessionState::Streaming;

        if envelope.type_url != feed.expected_type {
            return EnvelopeOutcome::Ignored;
        }
        let state = match (feed.decode)(&envelope.value) {
            Ok(state) => state,
            Err(e) => return EnvelopeOutcome::Rejected(e),
        };
        self.latest = Some(state);

        let broadcast = pass_gate(&mut self.last_broadcast, now, feed.broadcast_interval);
        let log = pass_gate(&mut self.last_log, now, feed.log_interval);
        EnvelopeOutcome::Accepted(Dispatch { state, broadcast, log })
    }

    /// Connection `generation` failed or ended. Returns the generation the
    /// retry must present, or `None` if the report is stale.
    pub fn on_disconnect(&mut self, generation: u64) -> Option<u64> {
        let live = matches!(self.state, SessionState::Connecting | SessionState::Streaming);
        if generation != self.generation || !live {
            return None;
        }
        self.state = SessionState::Reconnecting;
        self.generation += 1;
        Some(self.generation)
    }

    /// The reconnect delay for `generation` elapsed. Returns whether a new
    /// connection should be opened.
    pub fn begin_retry(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != SessionState::Reconnecting {
            return false;
        }
        self.state = SessionState::Connecting;
        true
    }

    /// Back to `Idle`; everything outstanding becomes stale.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.generation += 1;
        self.last_broadcast = None;
        self.last_log = None;
    }
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

fn pass_gate(last: &mut Option<Instant>, now: Instant, interval: Duration) -> bool {
    match *last {
        Some(prev) if now.saturating_duration_since(prev) < interval => false,
        _ => {
            *last = Some(now);
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Async driver
// ---------------------------------------------------------------------------

struct Slot {
    session: StreamSession,
    connection: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

struct Inner {
    feed: FeedDescriptor,
    connector: Arc<dyn FeedConnector>,
    registry: Arc<SubscriberRegistry>,
    slot: Mutex<Slot>,
}

/// Keeps one state feed connected and fans its decoded values out.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct StreamSupervisor {
    inner: Arc<Inner>,
}

impl StreamSupervisor {
    pub fn new(
        feed: FeedDescriptor,
        connector: Arc<dyn FeedConnector>,
        registry: Arc<SubscriberRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                feed,
                connector,
                registry,
                slot: Mutex::new(Slot {
                    session: StreamSession::new(),
                    connection: None,
                    retry: None,
                }),
            }),
        }
    }

    pub fn feed(&self) -> &FeedDescriptor {
        &self.inner.feed
    }

    /// Open the feed. A no-op unless the supervisor is `Idle`.
    pub fn start(&self) {
        let mut slot = self.inner.lock();
        let Some(generation) = slot.session.begin_connect() else {
            debug!(feed = %self.inner.feed.name, "start ignored; feed already active");
            return;
        };
        info!(
            feed = %self.inner.feed.name,
            endpoint = %self.inner.feed.endpoint,
            generation,
            "starting state feed"
        );
        slot.connection = Some(tokio::spawn(Arc::clone(&self.inner).run_connection(generation)));
    }

    /// Drop the live call and any pending retry and return to `Idle`.
    pub fn stop(&self) {
        let mut slot = self.inner.lock();
        if let Some(handle) = slot.connection.take() {
            handle.abort();
        }
        if let Some(handle) = slot.retry.take() {
            handle.abort();
        }
        if slot.session.state() != SessionState::Idle {
            info!(feed = %self.inner.feed.name, "state feed stopped");
        }
        slot.session.reset();
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().session.state()
    }

    pub fn latest(&self) -> Option<DecodedState> {
        self.inner.lock().session.latest()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_connection(self: Arc<Self>, generation: u64) {
        let reason = match self.connector.open(&self.feed.endpoint).await {
            Ok(mut stream) => loop {
                match stream.next().await {
                    Some(Ok(envelope)) => {
                        if !self.on_envelope(generation, &envelope) {
                            return;
                        }
                    }
                    Some(Err(e)) => break e,
                    None => break BridgeError::StreamEnded,
                }
            },
            Err(e) => e,
        };
        self.on_disconnect(generation, reason);
    }

    /// Returns `false` once this connection has been superseded.
    fn on_envelope(&self, generation: u64, envelope: &Envelope) -> bool {
        let outcome = self
            .lock()
            .session
            .on_envelope(generation, Instant::now(), envelope, &self.feed);

        match outcome {
            EnvelopeOutcome::Stale => return false,
            EnvelopeOutcome::Ignored => {
                debug!(feed = %self.feed.name, type_url = %envelope.type_url, "unexpected payload type dropped");
            }
            EnvelopeOutcome::Rejected(e) => {
                warn!(feed = %self.feed.name, error = %e, "undecodable payload dropped");
            }
            EnvelopeOutcome::Accepted(dispatch) => {
                if dispatch.broadcast {
                    let message = PushMessage::new(self.feed.broadcast_tag.clone(), dispatch.state);
                    let delivered = self.registry.broadcast(&message);
                    debug!(feed = %self.feed.name, delivered, "state broadcast");
                }
                if dispatch.log {
                    info!(feed = %self.feed.name, state = %dispatch.state, "feed state");
                }
            }
        }
        true
    }

    fn on_disconnect(self: &Arc<Self>, generation: u64, reason: BridgeError) {
        let mut slot = self.lock();
        let Some(next) = slot.session.on_disconnect(generation) else {
            return;
        };
        let delay = self.feed.reconnect_delay;
        let retry_in_ms = delay.as_millis() as u64;
        match reason {
            BridgeError::StreamEnded => {
                info!(feed = %self.feed.name, retry_in_ms, "state feed ended");
            }
            e if e.is_disconnect() => {
                warn!(feed = %self.feed.name, error = %e, retry_in_ms, "state feed lost");
            }
            e => {
                error!(feed = %self.feed.name, error = %e, retry_in_ms, "state feed failed");
            }
        }

        slot.connection = None;
        let inner = Arc::clone(self);
        slot.retry = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            inner.retry(next);
        }));
    }

    fn retry(self: &Arc<Self>, generation: u64) {
        let mut slot = self.lock();
        if !slot.session.begin_retry(generation) {
            return;
        }
        slot.retry = None;
        info!(feed = %self.feed.name, endpoint = %self.feed.endpoint, generation, "reconnecting state feed");
        slot.connection = Some(tokio::spawn(Arc::clone(self).run_connection(generation)));
    }
}
