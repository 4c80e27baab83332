//! Outbound command dispatcher
//!
//! Owns the sending half of the current connection and serializes every
//! outbound command through one task, so sends never interleave and never
//! block the read loop.
//!
//! Commands sit in one of two FIFO tiers. `High` (identify, resume,
//! heartbeat) always drains first and may spend the reserved part of the
//! rate budget. `Low` (presence and other application commands) is held
//! back until the session is ready on the current connection.
//!
//! Each command is scoped either to one connection generation or to the
//! session. Connection-scoped commands left over from a previous
//! connection are discarded instead of being replayed on the next one.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::protocol::{Codec, Envelope, PresenceUpdate};
use super::rate_limit::RateBudget;
use super::transport::FrameSink;
use crate::config::RateLimitConfig;
use crate::error::{Error, Result};

/// Send priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Session control: identify, resume, heartbeat
    High,
    /// Application commands; waits for a ready session
    Low,
}

/// Lifetime of a queued command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only valid on the connection with this generation
    Connection(u64),
    /// Valid on any connection of the session
    Session,
}

#[derive(Debug)]
struct Outbound {
    envelope: Envelope,
    scope: Scope,
}

#[derive(Default)]
struct Pending {
    high: VecDeque<Outbound>,
    low: VecDeque<Outbound>,
}

impl Pending {
    fn len(&self) -> usize {
        self.high.len() + self.low.len()
    }
}

enum Control {
    Attach {
        generation: u64,
        sink: Box<dyn FrameSink>,
    },
    Release {
        generation: u64,
    },
    Close {
        generation: u64,
        code: u16,
        reason: String,
        done: oneshot::Sender<()>,
    },
    Shutdown,
}

struct Shared {
    pending: Mutex<Pending>,
    wake: Notify,
    max_pending: usize,
}

/// Cloneable handle used to queue commands and steer the dispatcher
#[derive(Clone)]
pub struct OutboundHandle {
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Control>,
}

impl OutboundHandle {
    /// Queue a command. Never waits: a command that cannot be sent yet is
    /// deferred, and only a full tier is refused with `Error::RateLimited`.
    pub fn enqueue(&self, envelope: Envelope, priority: Priority, scope: Scope) -> Result<()> {
        if self.control.is_closed() {
            return Err(Error::Closed("Outbound dispatcher has stopped".to_string()));
        }

        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .map_err(|_| Error::Internal("Outbound queue poisoned".to_string()))?;
            // Each tier has its own cap, so a backlog of held-back low
            // priority commands never blocks identify, resume or heartbeat
            let tier = match priority {
                Priority::High => &mut pending.high,
                Priority::Low => &mut pending.low,
            };
            if tier.len() >= self.shared.max_pending {
                return Err(Error::RateLimited(format!(
                    "{} {:?} priority commands already pending",
                    tier.len(),
                    priority
                )));
            }
            tier.push_back(Outbound { envelope, scope });
        }

        self.shared.wake.notify_one();
        Ok(())
    }

    /// Queue a presence update for the session
    pub fn update_presence(&self, opcode: u8, presence: &PresenceUpdate) -> Result<()> {
        let envelope = Envelope::with_payload(opcode, presence)?;
        self.enqueue(envelope, Priority::Low, Scope::Session)
    }

    /// Number of commands waiting to be sent
    pub fn pending(&self) -> usize {
        self.shared.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Hand the dispatcher the sending half of a new connection
    pub fn attach(&self, generation: u64, sink: Box<dyn FrameSink>) {
        let _ = self.control.send(Control::Attach { generation, sink });
    }

    /// Let low priority commands flow on this connection
    pub fn release(&self, generation: u64) {
        let _ = self.control.send(Control::Release { generation });
    }

    /// Close the connection with this generation and wait until the close
    /// frame has been handed to the transport
    pub async fn close(&self, generation: u64, code: u16, reason: impl Into<String>) {
        let (done, rx) = oneshot::channel();
        let sent = self.control.send(Control::Close {
            generation,
            code,
            reason: reason.into(),
            done,
        });
        if sent.is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop the dispatcher, discarding anything still queued
    pub fn shutdown(&self) {
        let _ = self.control.send(Control::Shutdown);
    }
}

enum Wait {
    Idle,
    Until(Instant),
}

/// The dispatcher task
pub struct OutboundDispatcher {
    shared: Arc<Shared>,
    control: mpsc::UnboundedReceiver<Control>,
    codec: Arc<dyn Codec>,
    budget: RateBudget,
    priority_reserve: u32,
    sink: Option<Box<dyn FrameSink>>,
    generation: u64,
    released: bool,
}

impl OutboundDispatcher {
    /// Spawn the dispatcher and return a handle to it
    pub fn spawn(codec: Arc<dyn Codec>, limits: &RateLimitConfig) -> (OutboundHandle, JoinHandle<()>) {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::default()),
            wake: Notify::new(),
            max_pending: limits.max_pending,
        });
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let dispatcher = OutboundDispatcher {
            shared: shared.clone(),
            control: control_rx,
            codec,
            budget: RateBudget::new(limits.capacity, limits.window),
            priority_reserve: limits.priority_reserve,
            sink: None,
            generation: 0,
            released: false,
        };
        let task = tokio::spawn(dispatcher.run());

        (
            OutboundHandle {
                shared,
                control: control_tx,
            },
            task,
        )
    }

    async fn run(mut self) {
        loop {
            let wait = self.flush().await;
            let deadline = match wait {
                Wait::Until(at) => Some(at),
                Wait::Idle => None,
            };

            tokio::select! {
                biased;
                control = self.control.recv() => match control {
                    Some(control) => {
                        if !self.apply(control).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = self.shared.wake.notified() => {}
                _ = sleep_until(deadline) => {}
            }
        }

        if let Ok(mut pending) = self.shared.pending.lock() {
            let dropped = pending.len();
            *pending = Pending::default();
            if dropped > 0 {
                debug!(dropped, "Discarded queued outbound commands on shutdown");
            }
        }
        debug!("Outbound dispatcher stopped");
    }

    /// Returns false when the dispatcher should stop
    async fn apply(&mut self, control: Control) -> bool {
        match control {
            Control::Attach { generation, sink } => {
                if let Some(mut old) = self.sink.take() {
                    let _ = old.close(1000, "replaced").await;
                }
                self.sink = Some(sink);
                self.generation = generation;
                self.released = false;
                self.budget.reset();
                debug!(generation, "Outbound dispatcher attached");
            }
            Control::Release { generation } => {
                if generation == self.generation {
                    self.released = true;
                }
            }
            Control::Close {
                generation,
                code,
                reason,
                done,
            } => {
                if generation == self.generation {
                    if let Some(mut sink) = self.sink.take() {
                        if let Err(e) = sink.close(code, &reason).await {
                            debug!(error = %e, "Close frame not delivered");
                        }
                    }
                    self.released = false;
                }
                let _ = done.send(());
            }
            Control::Shutdown => {
                if let Some(mut sink) = self.sink.take() {
                    let _ = sink.close(1000, "shutdown").await;
                }
                return false;
            }
        }
        true
    }

    /// Send as much as the connection, the gate and the budget allow
    async fn flush(&mut self) -> Wait {
        loop {
            if self.sink.is_none() {
                return Wait::Idle;
            }

            let Some(priority) = self.next_tier() else {
                return Wait::Idle;
            };
            let reserve = match priority {
                Priority::High => 0,
                Priority::Low => self.priority_reserve,
            };
            if let Err(at) = self.budget.try_acquire(reserve) {
                trace!(?priority, "Rate budget exhausted, deferring");
                return Wait::Until(at);
            }

            let Some(command) = self.pop(priority) else {
                continue;
            };
            let frame = match self.codec.encode(&command.envelope) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(opcode = command.envelope.opcode, error = %e, "Dropping unencodable command");
                    continue;
                }
            };

            let Some(sink) = self.sink.as_mut() else {
                return Wait::Idle;
            };
            if let Err(e) = sink.send(frame).await {
                warn!(opcode = command.envelope.opcode, error = %e, "Outbound send failed");
                self.sink = None;
                self.released = false;
                if command.scope == Scope::Session {
                    self.requeue(priority, command);
                }
                return Wait::Idle;
            }
            trace!(opcode = command.envelope.opcode, ?priority, "Sent command");
        }
    }

    /// Drop stale commands and pick the tier that may send next
    fn next_tier(&self) -> Option<Priority> {
        let mut pending = self.shared.pending.lock().ok()?;
        let generation = self.generation;
        let stale = |command: &Outbound| matches!(command.scope, Scope::Connection(g) if g != generation);

        let before = pending.len();
        pending.high.retain(|command| !stale(command));
        pending.low.retain(|command| !stale(command));
        let dropped = before - pending.len();
        if dropped > 0 {
            debug!(dropped, generation, "Dropped commands for a previous connection");
        }

        if !pending.high.is_empty() {
            Some(Priority::High)
        } else if self.released && !pending.low.is_empty() {
            Some(Priority::Low)
        } else {
            None
        }
    }

    fn pop(&self, priority: Priority) -> Option<Outbound> {
        let mut pending = self.shared.pending.lock().ok()?;
        match priority {
            Priority::High => pending.high.pop_front(),
            Priority::Low => pending.low.pop_front(),
        }
    }

    fn requeue(&self, priority: Priority, command: Outbound) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            match priority {
                Priority::High => pending.high.push_front(command),
                Priority::Low => pending.low.push_front(command),
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::protocol::JsonCodec;
    use crate::gateway::transport::{Connector, MemoryConnector, MemoryPeer, PeerEvent};
    use serde_json::json;
    use std::time::Duration;

    fn limits(capacity: u32, reserve: u32, max_pending: usize) -> RateLimitConfig {
        RateLimitConfig {
            capacity,
            window: Duration::from_secs(60),
            priority_reserve: reserve,
            max_pending,
        }
    }

    async fn attached(config: &RateLimitConfig, generation: u64) -> (OutboundHandle, MemoryPeer) {
        let (connector, mut gateway) = MemoryConnector::pair();
        let (handle, _task) = OutboundDispatcher::spawn(Arc::new(JsonCodec), config);
        let connection = connector.connect("memory://gateway").await.unwrap();
        let peer = gateway.accept().await.unwrap();
        handle.attach(generation, connection.sink);
        (handle, peer)
    }

    fn command(op: u8, marker: u64) -> Envelope {
        Envelope::new(op, json!(marker))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_in_fifo_order() {
        let (handle, mut peer) = attached(&limits(10, 0, 16), 1).await;

        for marker in 0..3 {
            handle.enqueue(command(1, marker), Priority::High, Scope::Connection(1)).unwrap();
        }
        for marker in 0..3 {
            let envelope = peer.recv_envelope().await.unwrap();
            assert_eq!(envelope.payload, json!(marker));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_priority_waits_for_release() {
        let (handle, mut peer) = attached(&limits(10, 0, 16), 1).await;

        handle.enqueue(command(3, 100), Priority::Low, Scope::Session).unwrap();
        handle.enqueue(command(2, 1), Priority::High, Scope::Connection(1)).unwrap();

        let first = peer.recv_envelope().await.unwrap();
        assert_eq!(first.opcode, 2);

        // Presence only goes out once the session is ready
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.pending(), 1);

        handle.release(1);
        let second = peer.recv_envelope().await.unwrap();
        assert_eq!(second.opcode, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_defers_until_next_window() {
        let (handle, mut peer) = attached(&limits(2, 0, 16), 1).await;
        let start = Instant::now();

        for marker in 0..3 {
            handle.enqueue(command(1, marker), Priority::High, Scope::Session).unwrap();
        }

        for marker in 0..2 {
            assert_eq!(peer.recv_envelope().await.unwrap().payload, json!(marker));
        }
        assert!(start.elapsed() < Duration::from_secs(60));

        let third = peer.recv_envelope().await.unwrap();
        assert_eq!(third.payload, json!(2));
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_keeps_room_for_control() {
        let (handle, mut peer) = attached(&limits(3, 2, 16), 1).await;
        handle.release(1);

        handle.enqueue(command(3, 0), Priority::Low, Scope::Session).unwrap();
        handle.enqueue(command(3, 1), Priority::Low, Scope::Session).unwrap();
        assert_eq!(peer.recv_envelope().await.unwrap().payload, json!(0));

        // The second presence would eat into the reserve
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.enqueue(command(1, 7), Priority::High, Scope::Connection(1)).unwrap();
        let heartbeat = peer.recv_envelope().await.unwrap();
        assert_eq!(heartbeat.opcode, 1);
        assert_eq!(handle.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_is_rate_limited() {
        let (handle, _task) = OutboundDispatcher::spawn(Arc::new(JsonCodec), &limits(10, 0, 2));

        // No connection attached, so everything stays queued
        handle.enqueue(command(3, 0), Priority::Low, Scope::Session).unwrap();
        handle.enqueue(command(3, 1), Priority::Low, Scope::Session).unwrap();
        assert!(matches!(
            handle.enqueue(command(3, 2), Priority::Low, Scope::Session),
            Err(Error::RateLimited(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_low_tier_does_not_block_control() {
        let (handle, mut peer) = attached(&limits(10, 0, 2), 1).await;

        // Held back until release, so the low tier stays full
        handle.enqueue(command(3, 0), Priority::Low, Scope::Session).unwrap();
        handle.enqueue(command(3, 1), Priority::Low, Scope::Session).unwrap();
        assert!(handle.enqueue(command(3, 2), Priority::Low, Scope::Session).is_err());

        handle.enqueue(command(2, 9), Priority::High, Scope::Connection(1)).unwrap();
        let identify = peer.recv_envelope().await.unwrap();
        assert_eq!(identify.opcode, 2);
        assert_eq!(identify.payload, json!(9));
        assert_eq!(handle.pending(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_connection_commands_are_dropped() {
        let (connector, mut gateway) = MemoryConnector::pair();
        let (handle, _task) = OutboundDispatcher::spawn(Arc::new(JsonCodec), &limits(10, 0, 16));

        handle.enqueue(command(1, 0), Priority::High, Scope::Connection(1)).unwrap();
        handle.enqueue(command(3, 1), Priority::Low, Scope::Session).unwrap();

        let connection = connector.connect("memory://gateway").await.unwrap();
        let mut peer = gateway.accept().await.unwrap();
        handle.attach(2, connection.sink);
        handle.release(2);

        let only = peer.recv_envelope().await.unwrap();
        assert_eq!(only.opcode, 3);
        assert_eq!(handle.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_and_shutdown() {
        let (handle, mut peer) = attached(&limits(10, 0, 16), 4).await;

        handle.close(4, 4000, "resuming").await;
        assert_eq!(
            peer.recv().await,
            Some(PeerEvent::Closed {
                code: 4000,
                reason: "resuming".to_string()
            })
        );

        handle.enqueue(command(3, 0), Priority::Low, Scope::Session).unwrap();
        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.pending(), 0);
        assert!(matches!(
            handle.enqueue(command(3, 1), Priority::Low, Scope::Session),
            Err(Error::Closed(_))
        ));
    }
}
