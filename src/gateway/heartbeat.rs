//! Heartbeat monitor
//!
//! One monitor runs per ready connection. It beats every `interval` (the
//! first beat lands at a random point in `[interval * (1 - jitter), interval]`),
//! carries the latest observed sequence number, and treats a tick that
//! arrives while the previous beat is still unacknowledged as a zombie
//! connection. That failure is reported once and the monitor stops.

use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::dispatcher::{OutboundHandle, Priority, Scope};
use super::protocol::Envelope;

/// Reported when a beat went unacknowledged for a whole interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatFailure {
    /// Time the unacknowledged beat was queued
    pub missed_after: Duration,
}

/// Heartbeat parameters for one connection
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    pub first_tick_jitter: f64,
    pub opcode: u8,
    pub generation: u64,
}

enum Signal {
    Ack,
    BeatNow,
}

/// Handle to a running monitor; dropping it stops the monitor
pub struct HeartbeatHandle {
    signals: mpsc::UnboundedSender<Signal>,
    failure: oneshot::Receiver<HeartbeatFailure>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Start a monitor for one connection
    pub fn spawn(
        settings: HeartbeatSettings,
        outbound: OutboundHandle,
        sequence: watch::Receiver<Option<u64>>,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = oneshot::channel();

        let monitor = Monitor {
            settings,
            outbound,
            sequence,
            signals: signals_rx,
        };
        let task = tokio::spawn(monitor.run(failure_tx));

        HeartbeatHandle {
            signals: signals_tx,
            failure: failure_rx,
            task,
        }
    }

    /// The remote acknowledged the last beat
    pub fn ack(&self) {
        let _ = self.signals.send(Signal::Ack);
    }

    /// The remote asked for a beat right away
    pub fn beat_now(&self) {
        let _ = self.signals.send(Signal::BeatNow);
    }

    /// Resolves once the monitor detects a missed acknowledgement.
    /// Never resolves if the monitor stops for any other reason.
    pub async fn failed(&mut self) -> HeartbeatFailure {
        match (&mut self.failure).await {
            Ok(failure) => failure,
            Err(_) => std::future::pending().await,
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Delay before the first beat
pub fn first_tick_delay(interval: Duration, jitter: f64) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    let factor = 1.0 - rand::rng().random_range(0.0..=jitter);
    interval.mul_f64(factor)
}

struct Monitor {
    settings: HeartbeatSettings,
    outbound: OutboundHandle,
    sequence: watch::Receiver<Option<u64>>,
    signals: mpsc::UnboundedReceiver<Signal>,
}

impl Monitor {
    async fn run(mut self, failure: oneshot::Sender<HeartbeatFailure>) {
        let interval = self.settings.interval;
        let mut next_tick = Instant::now() + first_tick_delay(interval, self.settings.first_tick_jitter);
        let mut awaiting_ack: Option<Instant> = None;

        debug!(interval_ms = interval.as_millis() as u64, "Heartbeat monitor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_tick) => {
                    if let Some(sent_at) = awaiting_ack {
                        let missed_after = sent_at.elapsed();
                        warn!(?missed_after, "Heartbeat was not acknowledged");
                        let _ = failure.send(HeartbeatFailure { missed_after });
                        return;
                    }
                    if self.beat() {
                        awaiting_ack = Some(Instant::now());
                    }
                    next_tick += interval;
                }
                signal = self.signals.recv() => match signal {
                    Some(Signal::Ack) => {
                        if let Some(sent_at) = awaiting_ack.take() {
                            debug!(latency_ms = sent_at.elapsed().as_millis() as u64, "Heartbeat acknowledged");
                        }
                    }
                    Some(Signal::BeatNow) => {
                        if self.beat() {
                            awaiting_ack.get_or_insert_with(Instant::now);
                        }
                    }
                    None => return,
                },
            }
        }
    }

    /// Returns whether the heartbeat was queued; only a queued beat awaits an ack
    fn beat(&self) -> bool {
        let sequence = *self.sequence.borrow();
        let envelope = Envelope::new(self.settings.opcode, serde_json::json!(sequence));
        match self.outbound.enqueue(
            envelope,
            Priority::High,
            Scope::Connection(self.settings.generation),
        ) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Could not queue heartbeat");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::gateway::dispatcher::OutboundDispatcher;
    use crate::gateway::protocol::JsonCodec;
    use crate::gateway::transport::{Connector, MemoryConnector, MemoryPeer};
    use serde_json::json;
    use std::sync::Arc;

    const INTERVAL: Duration = Duration::from_millis(1000);

    async fn setup(sequence: Option<u64>) -> (HeartbeatHandle, MemoryPeer, watch::Sender<Option<u64>>) {
        let (connector, mut gateway) = MemoryConnector::pair();
        let (outbound, _task) = OutboundDispatcher::spawn(Arc::new(JsonCodec), &RateLimitConfig::default());
        let connection = connector.connect("memory://gateway").await.unwrap();
        let peer = gateway.accept().await.unwrap();
        outbound.attach(1, connection.sink);

        let (sequence_tx, sequence_rx) = watch::channel(sequence);
        let settings = HeartbeatSettings {
            interval: INTERVAL,
            first_tick_jitter: 0.0,
            opcode: 1,
            generation: 1,
        };
        (HeartbeatHandle::spawn(settings, outbound, sequence_rx), peer, sequence_tx)
    }

    #[test]
    fn test_first_tick_delay_bounds() {
        for _ in 0..100 {
            let delay = first_tick_delay(INTERVAL, 0.1);
            assert!(delay >= Duration::from_millis(900));
            assert!(delay <= INTERVAL);
        }
        assert_eq!(first_tick_delay(INTERVAL, 0.0), INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_beats_carry_latest_sequence() {
        let (heartbeat, mut peer, sequence) = setup(None).await;

        let first = peer.recv_envelope().await.unwrap();
        assert_eq!(first.opcode, 1);
        assert_eq!(first.payload, json!(null));
        heartbeat.ack();

        sequence.send_replace(Some(42));
        let second = peer.recv_envelope().await.unwrap();
        assert_eq!(second.payload, json!(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_beats_keep_going() {
        let (heartbeat, mut peer, _sequence) = setup(Some(1)).await;

        for _ in 0..5 {
            peer.recv_envelope().await.unwrap();
            heartbeat.ack();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_ack_fails_once() {
        let (mut heartbeat, mut peer, _sequence) = setup(Some(1)).await;
        let start = Instant::now();

        peer.recv_envelope().await.unwrap();
        let failure = heartbeat.failed().await;
        assert_eq!(failure.missed_after, INTERVAL);
        assert_eq!(start.elapsed(), INTERVAL * 2);

        // No second beat is sent on top of the unacknowledged one
        let extra = tokio::time::timeout(INTERVAL * 3, peer.recv_envelope()).await;
        assert!(extra.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_beat_now_sends_immediately() {
        let (heartbeat, mut peer, _sequence) = setup(Some(9)).await;
        let start = Instant::now();

        heartbeat.beat_now();
        let beat = peer.recv_envelope().await.unwrap();
        assert_eq!(beat.payload, json!(9));
        assert!(start.elapsed() < INTERVAL);
    }
}
