//! Event router
//!
//! Dispatch envelopes are queued by the read loop and handed to handlers by
//! a single routing task. Handlers run concurrently, but every handler for
//! envelope N has been started (polled once) before any handler for
//! envelope N+1 is. A handler that fails or panics is logged and does not
//! affect other handlers or the session.
//!
//! Message events are also checked for prefixed commands.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::protocol::Envelope;
use crate::commands::{parser, CommandContext, CommandRegistry, Context, EventContext, Invocation};
use crate::config::{CommandConfig, EventNames};
use crate::error::Result;
use crate::models::Message;

/// Which events carry commands and how commands are recognised
#[derive(Debug, Clone, Default)]
pub struct RouterSettings {
    pub events: EventNames,
    pub commands: CommandConfig,
}

/// Queue side of the router; cheap to call from the read loop
pub struct EventRouter {
    queue: mpsc::UnboundedSender<Arc<Envelope>>,
}

impl EventRouter {
    /// Spawn the routing task. It stops when the router is dropped (after
    /// draining the queue) or as soon as `shutdown` turns true.
    pub fn spawn(
        registry: Arc<CommandRegistry>,
        context: Context,
        settings: RouterSettings,
        shutdown: watch::Receiver<bool>,
    ) -> (EventRouter, JoinHandle<()>) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let task = RoutingTask {
            registry,
            context,
            settings,
            shutdown,
            queue: queue_rx,
        };
        (EventRouter { queue: queue_tx }, tokio::spawn(task.run()))
    }

    /// Queue an envelope for its handlers. Returns false once routing stopped.
    pub fn route(&self, envelope: Arc<Envelope>) -> bool {
        self.queue.send(envelope).is_ok()
    }
}

struct RoutingTask {
    registry: Arc<CommandRegistry>,
    context: Context,
    settings: RouterSettings,
    shutdown: watch::Receiver<bool>,
    queue: mpsc::UnboundedReceiver<Arc<Envelope>>,
}

impl RoutingTask {
    async fn run(mut self) {
        while let Some(envelope) = self.queue.recv().await {
            if *self.shutdown.borrow() {
                debug!("Shutdown requested, no further dispatch");
                break;
            }
            self.dispatch(envelope).await;
        }
        debug!("Event router stopped");
    }

    async fn dispatch(&self, envelope: Arc<Envelope>) {
        let Some(name) = envelope.event_name.clone() else {
            return;
        };
        let mut started = Vec::new();

        for callback in self.registry.events(&name) {
            let ctx = EventContext {
                envelope: envelope.clone(),
                context: self.context.clone(),
            };
            started.push(launch(name.clone(), callback(ctx)));
        }

        if envelope.is_event(&self.settings.events.message) && self.registry.has_commands() {
            if let Some((invocation, message)) = self.command_for(&envelope) {
                let callbacks = self.registry.commands(&invocation.name);
                if callbacks.is_empty() {
                    debug!(command = %invocation.name, "Unknown command");
                }
                for callback in callbacks {
                    let ctx = CommandContext {
                        invocation: invocation.clone(),
                        message: message.clone(),
                        context: self.context.clone(),
                    };
                    started.push(launch(
                        format!("{}{}", self.settings.commands.prefix, invocation.name),
                        callback(ctx),
                    ));
                }
            }
        }

        for signal in started {
            let _ = signal.await;
        }
    }

    fn command_for(&self, envelope: &Envelope) -> Option<(Invocation, Message)> {
        let content = envelope
            .payload
            .get(&self.settings.events.content_field)
            .and_then(|value| value.as_str())?;
        let invocation = parser::parse(content, &self.settings.commands.prefix)?;

        let message: Message = match envelope.parse_payload() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Command message could not be decoded");
                return None;
            }
        };
        if self.settings.commands.ignore_bots && message.is_from_bot() {
            return None;
        }
        Some((invocation, message))
    }
}

/// Run a handler on its own task. The returned receiver fires once the
/// handler has been polled for the first time.
fn launch(label: String, handler: BoxFuture<'static, Result<()>>) -> oneshot::Receiver<()> {
    let (started_tx, started_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut handler = AssertUnwindSafe(handler).catch_unwind();
        let mut started = Some(started_tx);

        let outcome = std::future::poll_fn(|cx| {
            let poll = handler.poll_unpin(cx);
            if let Some(started) = started.take() {
                let _ = started.send(());
            }
            poll
        })
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(handler = %label, error = %e, "Handler failed"),
            Err(panic) => error!(handler = %label, "Handler panicked: {}", panic_message(&*panic)),
        }
    });

    started_rx
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{command_callback, event_callback, CommandMeta};
    use crate::error::Error;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn spawn_router(registry: CommandRegistry, shutdown: watch::Receiver<bool>) -> (EventRouter, JoinHandle<()>) {
        let registry = Arc::new(registry);
        let context = Context::detached(registry.clone(), "!");
        EventRouter::spawn(registry, context, RouterSettings::default(), shutdown)
    }

    fn recording_event(log: &Log, tag: &'static str) -> crate::commands::EventCallback {
        let log = log.clone();
        event_callback(move |ctx| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{}:{}", tag, ctx.sequence().unwrap_or(0)));
                Ok(())
            }
        })
    }

    fn message(seq: u64, content: &str, bot: bool) -> Arc<Envelope> {
        Arc::new(Envelope::dispatch(
            0,
            "MESSAGE_CREATE",
            seq,
            json!({
                "id": format!("m{}", seq),
                "channel_id": "42",
                "author": {"id": "7", "username": "someone", "bot": bot},
                "content": content
            }),
        ))
    }

    #[tokio::test]
    async fn test_events_reach_handlers_case_insensitively() {
        let log: Log = Arc::default();
        let mut registry = CommandRegistry::new();
        registry.register_event("guild_create", recording_event(&log, "a")).unwrap();
        registry.register_event("GUILD_CREATE", recording_event(&log, "b")).unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (router, task) = spawn_router(registry, shutdown_rx);
        router.route(Arc::new(Envelope::dispatch(0, "GUILD_CREATE", 3, json!({}))));
        drop(router);
        task.await.unwrap();
        tokio::task::yield_now().await;

        let mut seen = log.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a:3", "b:3"]);
    }

    #[tokio::test]
    async fn test_commands_are_parsed_from_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = CommandRegistry::new();
        registry
            .register_command(
                "echo",
                CommandMeta::new("Repeats your message back to you"),
                command_callback(move |ctx| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send((ctx.args().to_vec(), ctx.raw_args().to_string(), ctx.message.id.clone()));
                        Ok(())
                    }
                }),
            )
            .unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (router, _task) = spawn_router(registry, shutdown_rx);
        router.route(message(1, "hello there", false));
        router.route(message(2, "!ECHO hi \"big world\"", false));

        let (args, raw, id) = rx.recv().await.unwrap();
        assert_eq!(args, vec!["hi", "big world"]);
        assert_eq!(raw, "hi \"big world\"");
        assert_eq!(id, "m2");
    }

    #[tokio::test]
    async fn test_ping_runs_only_the_ping_command() {
        let log: Log = Arc::default();
        let mut registry = CommandRegistry::new();
        registry.register_event("guild_create", recording_event(&log, "guild_create")).unwrap();
        for name in ["ping", "echo"] {
            let recorded = log.clone();
            registry
                .register_command(
                    name,
                    CommandMeta::default(),
                    command_callback(move |ctx| {
                        let recorded = recorded.clone();
                        async move {
                            recorded.lock().unwrap().push(format!(
                                "{}:{:?}:{:?}",
                                ctx.name(),
                                ctx.args(),
                                ctx.raw_args()
                            ));
                            Ok(())
                        }
                    }),
                )
                .unwrap();
        }

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (router, task) = spawn_router(registry, shutdown_rx);
        router.route(message(1, "!ping", false));
        drop(router);
        task.await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(*log.lock().unwrap(), vec![r#"ping:[]:"""#.to_string()]);
    }

    #[tokio::test]
    async fn test_bot_messages_do_not_run_commands() {
        let log: Log = Arc::default();
        let recorded = log.clone();
        let mut registry = CommandRegistry::new();
        registry
            .register_command(
                "ping",
                CommandMeta::default(),
                command_callback(move |ctx| {
                    let recorded = recorded.clone();
                    async move {
                        recorded.lock().unwrap().push(ctx.message.id.clone());
                        Ok(())
                    }
                }),
            )
            .unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (router, task) = spawn_router(registry, shutdown_rx);
        router.route(message(1, "!ping", true));
        router.route(message(2, "!ping", false));
        drop(router);
        task.await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(*log.lock().unwrap(), vec!["m2"]);
    }

    #[tokio::test]
    async fn test_failing_handlers_are_isolated() {
        let log: Log = Arc::default();
        let mut registry = CommandRegistry::new();
        registry
            .register_event("ready", event_callback(|_ctx| async { Err(Error::handler("boom")) }))
            .unwrap();
        registry
            .register_event(
                "ready",
                event_callback(|ctx| async move {
                    if ctx.sequence().is_some() {
                        panic!("handler bug");
                    }
                    Ok(())
                }),
            )
            .unwrap();
        registry.register_event("ready", recording_event(&log, "ok")).unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (router, task) = spawn_router(registry, shutdown_rx);
        router.route(Arc::new(Envelope::dispatch(0, "READY", 1, json!({}))));
        router.route(Arc::new(Envelope::dispatch(0, "READY", 2, json!({}))));
        drop(router);
        task.await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(*log.lock().unwrap(), vec!["ok:1", "ok:2"]);
    }

    #[tokio::test]
    async fn test_no_dispatch_after_shutdown() {
        let log: Log = Arc::default();
        let mut registry = CommandRegistry::new();
        registry.register_event("ready", recording_event(&log, "r")).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send_replace(true);
        let (router, task) = spawn_router(registry, shutdown_rx);
        router.route(Arc::new(Envelope::dispatch(0, "READY", 1, json!({}))));
        task.await.unwrap();

        assert!(log.lock().unwrap().is_empty());
        assert!(!router.route(Arc::new(Envelope::dispatch(0, "READY", 2, json!({})))));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*boxed), "static");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_handlers_start_in_envelope_order(handlers in 1usize..4, envelopes in 1u64..40) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();

            let started = runtime.block_on(async move {
                let order: Arc<Mutex<Vec<u64>>> = Arc::default();
                let mut registry = CommandRegistry::new();
                for _ in 0..handlers {
                    let order = order.clone();
                    registry
                        .register_event(
                            "tick",
                            event_callback(move |ctx| {
                                let order = order.clone();
                                async move {
                                    order.lock().unwrap().push(ctx.sequence().unwrap_or(0));
                                    tokio::task::yield_now().await;
                                    Ok(())
                                }
                            }),
                        )
                        .unwrap();
                }

                let (_shutdown_tx, shutdown_rx) = watch::channel(false);
                let (router, task) = spawn_router(registry, shutdown_rx);
                for seq in 1..=envelopes {
                    router.route(Arc::new(Envelope::dispatch(0, "TICK", seq, json!({}))));
                }
                drop(router);
                task.await.unwrap();

                let order = order.lock().unwrap().clone();
                order
            });

            prop_assert_eq!(started.len(), handlers * envelopes as usize);
            prop_assert!(started.windows(2).all(|pair| pair[0] <= pair[1]));
        }
    }
}
