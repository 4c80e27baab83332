//! Client - the application-facing entry point
//!
//! Register handlers on a [`Client`], then [`Client::start`] it to get a
//! [`GatewayHandle`] for the running session.
//!
//! ```no_run
//! use discordwave::{Client, CommandMeta, Config, Credentials, Intents};
//!
//! # async fn run() -> discordwave::Result<()> {
//! let mut client = Client::new(Config::from_env()?);
//! client.command("ping", CommandMeta::new("Check the bot is alive"), |ctx| async move {
//!     ctx.reply("Pong!").await?;
//!     Ok(())
//! });
//!
//! let intents = Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT;
//! let mut handle = client.start(Credentials::new("token"), intents).await?;
//! handle.wait().await
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::commands::{command_callback, event_callback, CommandContext, CommandMeta, CommandRegistry, Context, EventContext};
use crate::config::{validate_config, Config};
use crate::error::{Error, Result};
use crate::gateway::dispatcher::{OutboundDispatcher, OutboundHandle};
use crate::gateway::engine::{gateway_url_with_query, EngineParts, SessionEngine};
use crate::gateway::protocol::{Codec, JsonCodec, PresenceUpdate};
use crate::gateway::router::{EventRouter, RouterSettings};
use crate::gateway::session::{LifecycleEvent, SessionSnapshot, SessionState};
use crate::gateway::transport::{Connector, WsConnector};
use crate::gateway::Intents;
use crate::rest::RestClient;

/// Bot credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    token: SecretString,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Credentials {
            token: SecretString::from(token.into()),
        }
    }

    /// Take the token from the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config
            .token
            .clone()
            .map(|token| Credentials { token })
            .ok_or_else(|| Error::Config("No bot token configured (set DISCORD_TOKEN)".to_string()))
    }
}

/// Gateway client builder
pub struct Client {
    config: Config,
    registry: CommandRegistry,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn Codec>,
    presence: Option<PresenceUpdate>,
}

impl Client {
    /// Create a client using the WebSocket transport and JSON codec
    pub fn new(config: Config) -> Self {
        let registry = CommandRegistry::with_case_insensitive(config.commands.case_insensitive);
        let connector = WsConnector::new(config.gateway.handshake_timeout);
        Client {
            config,
            registry,
            connector: Arc::new(connector),
            codec: Arc::new(JsonCodec),
            presence: None,
        }
    }

    /// Replace the transport
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Replace the codec
    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Presence to announce when identifying
    pub fn with_presence(mut self, presence: PresenceUpdate) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Register an event handler, e.g. for `"ready"` or `"message_create"`
    pub fn on_event<F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if let Err(e) = self.registry.register_event(name, event_callback(handler)) {
            warn!(event = %name, error = %e, "Event handler not registered");
        }
        self
    }

    /// Register a prefixed command
    pub fn command<F, Fut>(&mut self, name: &str, meta: CommandMeta, handler: F) -> &mut Self
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if let Err(e) = self.registry.register_command(name, meta, command_callback(handler)) {
            warn!(command = %name, error = %e, "Command not registered");
        }
        self
    }

    /// Connect with the intents from `gateway.intents` in the configuration
    pub async fn start_configured(self, credentials: Credentials) -> Result<GatewayHandle> {
        let intents = self.config.gateway.intents;
        self.start(credentials, intents).await
    }

    /// Connect and run the session in the background
    pub async fn start(self, credentials: Credentials, intents: Intents) -> Result<GatewayHandle> {
        let validation = validate_config(&self.config);
        for warning in &validation.warnings {
            warn!("Config: {}", warning);
        }
        if !validation.valid {
            let errors: Vec<String> = validation.errors.iter().map(|e| e.to_string()).collect();
            return Err(Error::Config(errors.join("; ")));
        }
        if intents.is_empty() {
            warn!("Starting with no intents; the gateway will deliver almost no events");
        }

        let config = Arc::new(self.config);
        let rest = RestClient::new(&credentials.token, &config.rest)?;

        let base_url = match &config.gateway.url {
            Some(url) => url.clone(),
            None => rest.gateway_url().await?,
        };
        let gateway_url = gateway_url_with_query(&base_url, config.gateway.version, &config.gateway.encoding)?;

        let (outbound, _dispatcher) = OutboundDispatcher::spawn(self.codec.clone(), &config.rate_limit);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (lifecycle_tx, _) = broadcast::channel(64);

        let registry = Arc::new(self.registry);
        let presence_opcode = config.protocol.opcodes.presence_update;
        let context = Context::new(
            registry.clone(),
            config.commands.prefix.clone(),
            Some(rest),
            Some((outbound.clone(), presence_opcode)),
            snapshot_rx.clone(),
        );
        let settings = RouterSettings {
            events: config.protocol.events.clone(),
            commands: config.commands.clone(),
        };
        let (router, _router_task) = EventRouter::spawn(registry, context, settings, shutdown_rx.clone());

        let engine = SessionEngine::new(EngineParts {
            config: config.clone(),
            token: credentials.token,
            intents,
            gateway_url,
            presence: self.presence,
            connector: self.connector,
            codec: self.codec,
            outbound: outbound.clone(),
            router,
            lifecycle: lifecycle_tx.clone(),
            snapshot: snapshot_tx,
            shutdown: shutdown_rx,
        });
        let task = tokio::spawn(engine.run());
        info!("Gateway client started");

        Ok(GatewayHandle {
            shutdown: shutdown_tx,
            lifecycle: lifecycle_tx,
            snapshot: snapshot_rx,
            outbound,
            presence_opcode,
            task: Some(task),
        })
    }
}

/// Handle to a running session
pub struct GatewayHandle {
    shutdown: watch::Sender<bool>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    outbound: OutboundHandle,
    presence_opcode: u8,
    /// Dropping the handle drops the shutdown sender, which stops the engine
    task: Option<JoinHandle<Result<()>>>,
}

impl GatewayHandle {
    /// Subscribe to lifecycle events from now on
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    pub fn session(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch session snapshots
    pub fn watch_session(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Queue a presence update; sent once the session is ready
    pub fn update_presence(&self, presence: &PresenceUpdate) -> Result<()> {
        self.outbound.update_presence(self.presence_opcode, presence)
    }

    /// Stop the session and wait for the engine to finish. Queued outbound
    /// commands are discarded and no handler starts after this is called.
    pub async fn stop(mut self) -> Result<()> {
        self.shutdown.send_replace(true);
        self.wait().await
    }

    /// Wait until the engine stops, either after [`GatewayHandle::stop`] or on
    /// its own (fatal close, retries exhausted). Cancel safe.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        result.map_err(|e| Error::Internal(format!("Gateway task failed: {}", e)))?
    }

    /// Whether the engine has stopped
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}
