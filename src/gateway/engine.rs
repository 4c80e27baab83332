//! Session engine
//!
//! Drives one logical gateway session across any number of connections:
//!
//! ```text
//! Connecting -> Handshaking -> Ready
//!                  ^             |  connection lost / heartbeat missed
//!                  |             v
//!            Reconnecting <- Resuming
//! ```
//!
//! Every connection starts with HELLO. The engine answers with RESUME when
//! it holds a session ID and a sequence number, and with IDENTIFY otherwise.
//! Close codes are classified by [`crate::config::CloseCodePolicy`]: fatal
//! codes end the engine, the rest lead to another attempt, paced by
//! [`ReconnectPolicy`] when attempts keep failing.
//!
//! The engine is the only writer of [`Session`]. Snapshots go out on a
//! watch channel and transitions on a broadcast channel.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dispatcher::{OutboundHandle, Priority, Scope};
use super::heartbeat::{HeartbeatFailure, HeartbeatHandle, HeartbeatSettings};
use super::intents::Intents;
use super::protocol::{
    Codec, Envelope, HelloPayload, IdentifyPayload, PresenceUpdate, ReadyPayload, ResumePayload,
};
use super::reconnect::ReconnectPolicy;
use super::router::EventRouter;
use super::session::{
    LifecycleEvent, ResumeToken, SequenceCheck, Session, SessionSnapshot, SessionState,
};
use super::transport::{Connection, Connector, Disconnect, Frame, FrameStream};
use crate::config::{CloseAction, Config};
use crate::error::{Error, Result};

/// Everything the engine is wired to
pub struct EngineParts {
    pub config: Arc<Config>,
    pub token: SecretString,
    pub intents: Intents,
    /// Base gateway URL, query string included
    pub gateway_url: String,
    /// Presence sent with IDENTIFY
    pub presence: Option<PresenceUpdate>,
    pub connector: Arc<dyn Connector>,
    pub codec: Arc<dyn Codec>,
    pub outbound: OutboundHandle,
    pub router: EventRouter,
    pub lifecycle: broadcast::Sender<LifecycleEvent>,
    pub snapshot: watch::Sender<SessionSnapshot>,
    pub shutdown: watch::Receiver<bool>,
}

/// How a connection (or an attempt at one) ended
#[derive(Debug)]
enum Outcome {
    /// Stop was requested
    Shutdown,
    /// The remote rejected credentials or capabilities
    Fatal(String),
    /// Never reached a ready session on this connection
    Failed(String),
    /// The connection went away
    Lost {
        action: CloseAction,
        reason: String,
        /// Whether this connection reached a ready session
        ready: bool,
        /// Minimum wait before the next attempt
        pause: Option<Duration>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitHello,
    AwaitReady,
    Ready,
}

/// Per-connection state
struct Link {
    generation: u64,
    resume: Option<ResumeToken>,
    phase: Phase,
    interval: Option<Duration>,
    heartbeat: Option<HeartbeatHandle>,
}

enum Wake {
    Shutdown,
    HeartbeatMissed(HeartbeatFailure),
    HandshakeTimeout,
    Frame(std::result::Result<Frame, Disconnect>),
}

/// The session engine task
pub struct SessionEngine {
    config: Arc<Config>,
    token: SecretString,
    intents: Intents,
    gateway_url: String,
    presence: Option<PresenceUpdate>,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn Codec>,
    outbound: OutboundHandle,
    router: EventRouter,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    shutdown: watch::Receiver<bool>,
    sequence: watch::Sender<Option<u64>>,
    session: Session,
    state: SessionState,
    generation: u64,
}

impl SessionEngine {
    pub fn new(parts: EngineParts) -> Self {
        let (sequence, _) = watch::channel(None);
        SessionEngine {
            config: parts.config,
            token: parts.token,
            intents: parts.intents,
            gateway_url: parts.gateway_url,
            presence: parts.presence,
            connector: parts.connector,
            codec: parts.codec,
            outbound: parts.outbound,
            router: parts.router,
            lifecycle: parts.lifecycle,
            snapshot: parts.snapshot,
            shutdown: parts.shutdown,
            sequence,
            session: Session::new(),
            state: SessionState::Connecting,
            generation: 0,
        }
    }

    /// Run until stopped or a fatal condition. Returns `Ok` after a requested
    /// stop and the fatal error otherwise.
    pub async fn run(mut self) -> Result<()> {
        let mut policy = ReconnectPolicy::new(&self.config.reconnect);
        let mut resume = false;
        let mut delay: Option<Duration> = None;

        info!(url = %self.gateway_url, intents = %self.intents, "Starting gateway session");
        self.set_state(SessionState::Connecting);

        let result = loop {
            if let Some(delay) = delay.take() {
                debug!(?delay, "Waiting before the next attempt");
                let stopped = tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    _ = shutdown_requested(&mut self.shutdown) => true,
                };
                if stopped {
                    break Ok(());
                }
            }
            if *self.shutdown.borrow() {
                break Ok(());
            }

            let token = if resume { self.session.resume_token() } else { None };
            let url = match (&token, self.session.resume_url()) {
                (Some(_), Some(resume_url)) => self.resume_url(resume_url),
                _ => self.gateway_url.clone(),
            };

            let outcome = match self.connector.connect(&url).await {
                Ok(connection) => self.drive(connection, token).await,
                Err(e) => {
                    warn!(url = %url, error = %e, "Connection attempt failed");
                    Outcome::Failed(e.to_string())
                }
            };

            let reason = match outcome {
                Outcome::Shutdown => break Ok(()),
                Outcome::Fatal(reason) => break Err(Error::FatalConfig(reason)),
                Outcome::Failed(reason) => {
                    match policy.failed() {
                        Some(backoff) => delay = Some(backoff),
                        None => break Err(exhausted(policy.failures(), &reason)),
                    }
                    reason
                }
                Outcome::Lost {
                    action,
                    reason,
                    ready,
                    pause,
                } => {
                    if ready {
                        policy.succeeded();
                    } else {
                        match policy.failed() {
                            Some(backoff) => delay = Some(backoff),
                            None => break Err(exhausted(policy.failures(), &reason)),
                        }
                    }
                    if let Some(pause) = pause {
                        delay = Some(delay.map_or(pause, |backoff| backoff.max(pause)));
                    }

                    resume = action == CloseAction::Resume && self.session.resume_token().is_some();
                    if !resume {
                        self.reset_session();
                    }
                    reason
                }
            };

            info!(resume, reason = %reason, "Gateway connection lost, reconnecting");
            self.set_state(if resume {
                SessionState::Resuming
            } else {
                SessionState::Reconnecting
            });
            self.emit(LifecycleEvent::Reconnecting {
                attempt: policy.failures() + 1,
                resume,
                reason,
            });
        };

        self.finish(&result);
        result
    }

    /// Run one connection from HELLO until it ends
    async fn drive(&mut self, connection: Connection, resume: Option<ResumeToken>) -> Outcome {
        self.generation += 1;
        let generation = self.generation;
        let Connection { sink, mut stream } = connection;

        self.outbound.attach(generation, sink);
        if resume.is_none() {
            self.set_state(SessionState::Handshaking);
        }
        debug!(generation, resume = resume.is_some(), "Connection open");

        let mut link = Link {
            generation,
            resume,
            phase: Phase::AwaitHello,
            interval: None,
            heartbeat: None,
        };
        let outcome = self.read_loop(stream.as_mut(), &mut link).await;
        drop(link.heartbeat.take());

        // Closing with 1000 would end the session on the remote side
        let keep_session = match &outcome {
            Outcome::Failed(_) => true,
            Outcome::Lost { action, .. } => *action == CloseAction::Resume,
            Outcome::Shutdown | Outcome::Fatal(_) => false,
        } && self.session.resume_token().is_some();
        let (code, reason) = if keep_session {
            (self.config.gateway.resume_close_code, "reconnecting")
        } else {
            (1000, "closing")
        };
        self.outbound.close(generation, code, reason).await;

        outcome
    }

    async fn read_loop(&mut self, stream: &mut dyn FrameStream, link: &mut Link) -> Outcome {
        let handshake_deadline = Instant::now() + self.config.gateway.handshake_timeout;

        loop {
            let waiting = link.phase != Phase::Ready;
            let wake = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => Wake::Shutdown,
                failure = heartbeat_failed(&mut link.heartbeat) => Wake::HeartbeatMissed(failure),
                _ = tokio::time::sleep_until(handshake_deadline), if waiting => Wake::HandshakeTimeout,
                frame = stream.receive() => Wake::Frame(frame),
            };

            let outcome = match wake {
                Wake::Shutdown => Some(Outcome::Shutdown),
                Wake::HeartbeatMissed(failure) => {
                    warn!(missed_after = ?failure.missed_after, "Zombie connection, reconnecting");
                    Some(Outcome::Lost {
                        action: CloseAction::Resume,
                        reason: "heartbeat not acknowledged".to_string(),
                        ready: true,
                        pause: None,
                    })
                }
                Wake::HandshakeTimeout => {
                    warn!(timeout = ?self.config.gateway.handshake_timeout, "Handshake timed out");
                    Some(Outcome::Failed("handshake timed out".to_string()))
                }
                Wake::Frame(Err(disconnect)) => Some(self.on_disconnect(disconnect, link)),
                Wake::Frame(Ok(frame)) => match self.codec.decode(&frame) {
                    Ok(envelope) => self.on_envelope(envelope, link),
                    Err(e) => {
                        warn!(error = %e, "Dropping undecodable frame");
                        None
                    }
                },
            };
            if let Some(outcome) = outcome {
                return outcome;
            }
        }
    }

    fn on_disconnect(&self, disconnect: Disconnect, link: &Link) -> Outcome {
        let action = self.config.protocol.close_codes.classify(disconnect.code);
        info!(code = ?disconnect.code, reason = %disconnect.reason, ?action, "Gateway connection closed");

        match action {
            CloseAction::Fatal => Outcome::Fatal(format!("gateway {}", disconnect)),
            action => Outcome::Lost {
                action,
                reason: disconnect.to_string(),
                ready: link.phase == Phase::Ready,
                pause: None,
            },
        }
    }

    fn on_envelope(&mut self, envelope: Envelope, link: &mut Link) -> Option<Outcome> {
        let config = self.config.clone();
        let ops = &config.protocol.opcodes;

        match envelope.opcode {
            op if op == ops.dispatch => self.on_dispatch(envelope, link),
            op if op == ops.hello => self.on_hello(&envelope, link),
            op if op == ops.heartbeat_ack => {
                if let Some(heartbeat) = &link.heartbeat {
                    heartbeat.ack();
                }
                self.session.record_ack();
                self.publish();
                None
            }
            op if op == ops.heartbeat => {
                match &link.heartbeat {
                    Some(heartbeat) => heartbeat.beat_now(),
                    None => {
                        let beat = Envelope::new(ops.heartbeat, serde_json::json!(self.session.sequence()));
                        if let Err(e) = self.send_control(beat, link.generation) {
                            warn!(error = %e, "Could not answer heartbeat request");
                        }
                    }
                }
                None
            }
            op if op == ops.reconnect => {
                info!("Gateway asked for a reconnect");
                Some(Outcome::Lost {
                    action: CloseAction::Resume,
                    reason: "reconnect requested".to_string(),
                    ready: link.phase == Phase::Ready,
                    pause: None,
                })
            }
            op if op == ops.invalid_session => {
                let resumable = envelope.payload.as_bool().unwrap_or(false);
                warn!(resumable, "Session invalidated");
                Some(Outcome::Lost {
                    action: if resumable {
                        CloseAction::Resume
                    } else {
                        CloseAction::Reidentify
                    },
                    reason: "session invalidated".to_string(),
                    ready: link.phase == Phase::Ready,
                    pause: (!resumable).then_some(config.reconnect.invalid_session_delay),
                })
            }
            op => {
                debug!(opcode = op, "Ignoring envelope with unhandled opcode");
                None
            }
        }
    }

    fn on_hello(&mut self, envelope: &Envelope, link: &mut Link) -> Option<Outcome> {
        if link.phase != Phase::AwaitHello {
            debug!("Ignoring repeated HELLO");
            return None;
        }

        let hello: HelloPayload = match envelope.parse_payload() {
            Ok(hello) => hello,
            Err(e) => return Some(Outcome::Failed(e.to_string())),
        };
        if hello.heartbeat_interval == 0 {
            return Some(Outcome::Failed("HELLO carried a zero heartbeat interval".to_string()));
        }
        let interval = Duration::from_millis(hello.heartbeat_interval);
        link.interval = Some(interval);

        let config = self.config.clone();
        let ops = &config.protocol.opcodes;
        let command = match &link.resume {
            Some(token) => {
                debug!(session_id = %token.session_id, seq = token.sequence, "Resuming session");
                Envelope::with_payload(
                    ops.resume,
                    &ResumePayload {
                        token: self.token.expose_secret().to_string(),
                        session_id: token.session_id.clone(),
                        seq: token.sequence,
                    },
                )
            }
            None => {
                self.reset_session();
                debug!("Identifying");
                Envelope::with_payload(
                    ops.identify,
                    &IdentifyPayload {
                        token: self.token.expose_secret().to_string(),
                        intents: self.intents.bits(),
                        properties: config.protocol.properties.clone(),
                        presence: self.presence.clone(),
                    },
                )
            }
        };

        let sent = command.and_then(|command| self.send_control(command, link.generation));
        if let Err(e) = sent {
            return Some(Outcome::Failed(e.to_string()));
        }

        self.session.set_heartbeat_interval(interval);
        link.phase = Phase::AwaitReady;
        self.publish();
        None
    }

    fn on_dispatch(&mut self, envelope: Envelope, link: &mut Link) -> Option<Outcome> {
        if let Some(seq) = envelope.sequence {
            if let SequenceCheck::Replayed { last } = self.session.observe_sequence(seq) {
                debug!(seq, last, "Dropping replayed dispatch");
                return None;
            }
            self.sequence.send_replace(Some(seq));
        }

        let envelope = Arc::new(envelope);
        let config = self.config.clone();
        let events = &config.protocol.events;

        if envelope.is_event(&events.ready) {
            let ready: ReadyPayload = match envelope.parse_payload() {
                Ok(ready) => ready,
                Err(e) => return Some(Outcome::Failed(e.to_string())),
            };
            let session_id = ready.session_id.clone();
            self.session.establish(ready);
            self.enter_ready(link);
            info!(session_id = %session_id, "Session ready");
            self.emit(LifecycleEvent::Connected { session_id });
        } else if envelope.is_event(&events.resumed) {
            self.enter_ready(link);
            let session_id = self.session.session_id().unwrap_or_default().to_string();
            info!(session_id = %session_id, "Session resumed");
            self.emit(LifecycleEvent::Resumed { session_id });
        }

        if !self.router.route(envelope) {
            debug!("Event router is gone, dropping dispatch");
        }
        None
    }

    fn enter_ready(&mut self, link: &mut Link) {
        link.phase = Phase::Ready;
        link.resume = None;
        self.outbound.release(link.generation);

        if link.heartbeat.is_none() {
            if let Some(interval) = link.interval {
                let settings = HeartbeatSettings {
                    interval,
                    first_tick_jitter: self.config.heartbeat.first_tick_jitter,
                    opcode: self.config.protocol.opcodes.heartbeat,
                    generation: link.generation,
                };
                link.heartbeat = Some(HeartbeatHandle::spawn(
                    settings,
                    self.outbound.clone(),
                    self.sequence.subscribe(),
                ));
            }
        }

        self.set_state(SessionState::Ready);
    }

    fn send_control(&self, envelope: Envelope, generation: u64) -> Result<()> {
        self.outbound
            .enqueue(envelope, Priority::High, Scope::Connection(generation))
    }

    /// Forget the session; the next handshake identifies from scratch
    fn reset_session(&mut self) {
        let interval = self.session.snapshot(self.state).heartbeat_interval;
        self.session = Session::new();
        if let Some(interval) = interval {
            self.session.set_heartbeat_interval(interval);
        }
        self.sequence.send_replace(None);
    }

    /// Add the version and encoding query to a resume URL
    fn resume_url(&self, base: &str) -> String {
        let gateway = &self.config.gateway;
        gateway_url_with_query(base, gateway.version, &gateway.encoding).unwrap_or_else(|e| {
            warn!(url = %base, error = %e, "Unusable resume URL, using the gateway URL");
            self.gateway_url.clone()
        })
    }

    fn finish(&mut self, result: &Result<()>) {
        let (fatal, reason) = match result {
            Ok(()) => (false, "stopped".to_string()),
            Err(e) => (true, e.to_string()),
        };
        if fatal {
            warn!(reason = %reason, "Gateway session closed");
        } else {
            info!("Gateway session closed");
        }

        self.outbound.shutdown();
        self.set_state(SessionState::Closed);
        self.emit(LifecycleEvent::Closed { fatal, reason });
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Session state changed");
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.session.snapshot(self.state));
    }

    fn emit(&self, event: LifecycleEvent) {
        // Nobody listening is fine
        let _ = self.lifecycle.send(event);
    }
}

/// Append `v` and `encoding` query parameters unless already present
pub fn gateway_url_with_query(base: &str, version: u8, encoding: &str) -> Result<String> {
    let mut url = url::Url::parse(base).map_err(|e| Error::Config(format!("Invalid gateway URL '{}': {}", base, e)))?;

    let present: Vec<String> = url.query_pairs().map(|(key, _)| key.into_owned()).collect();
    {
        let mut query = url.query_pairs_mut();
        if !present.iter().any(|key| key == "v") {
            query.append_pair("v", &version.to_string());
        }
        if !present.iter().any(|key| key == "encoding") {
            query.append_pair("encoding", encoding);
        }
    }
    Ok(url.to_string())
}

fn exhausted(failures: u32, reason: &str) -> Error {
    Error::Connection(format!(
        "Giving up after {} failed attempts, last error: {}",
        failures, reason
    ))
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a stop request
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn heartbeat_failed(heartbeat: &mut Option<HeartbeatHandle>) -> HeartbeatFailure {
    match heartbeat {
        Some(heartbeat) => heartbeat.failed().await,
        None => std::future::pending().await,
    }
}
