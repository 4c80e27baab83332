//! What handlers receive

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;

use super::parser::Invocation;
use super::registry::CommandRegistry;
use crate::error::{Error, Result};
use crate::gateway::dispatcher::OutboundHandle;
use crate::gateway::protocol::{Envelope, PresenceUpdate};
use crate::gateway::session::SessionSnapshot;
use crate::models::{Message, User};
use crate::rest::RestClient;

/// Shared access to the running client from inside handlers
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    registry: Arc<CommandRegistry>,
    prefix: String,
    rest: Option<RestClient>,
    outbound: Option<(OutboundHandle, u8)>,
    session: watch::Receiver<SessionSnapshot>,
}

impl Context {
    pub(crate) fn new(
        registry: Arc<CommandRegistry>,
        prefix: impl Into<String>,
        rest: Option<RestClient>,
        outbound: Option<(OutboundHandle, u8)>,
        session: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Context {
            inner: Arc::new(ContextInner {
                registry,
                prefix: prefix.into(),
                rest,
                outbound,
                session,
            }),
        }
    }

    /// A context with no gateway or REST access
    pub fn detached(registry: Arc<CommandRegistry>, prefix: impl Into<String>) -> Self {
        let (_, session) = watch::channel(SessionSnapshot::default());
        Self::new(registry, prefix, None, None, session)
    }

    /// The REST client
    pub fn rest(&self) -> Result<&RestClient> {
        self.inner
            .rest
            .as_ref()
            .ok_or_else(|| Error::Config("No REST client configured".to_string()))
    }

    /// Current session state
    pub fn session(&self) -> SessionSnapshot {
        self.inner.session.borrow().clone()
    }

    /// The account the session is logged in as, once READY arrived
    pub fn current_user(&self) -> Option<User> {
        self.inner.session.borrow().user.clone()
    }

    /// Queue a presence update; it is sent once the session is ready
    pub fn update_presence(&self, presence: &PresenceUpdate) -> Result<()> {
        match &self.inner.outbound {
            Some((outbound, opcode)) => outbound.update_presence(*opcode, presence),
            None => Err(Error::Closed("Not connected to a gateway".to_string())),
        }
    }

    /// Post a message to a channel
    pub async fn send_message(&self, channel_id: &str, content: &str) -> Result<Message> {
        self.rest()?.send_message(channel_id, content, None).await
    }

    /// Command prefix
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// Registered commands
    pub fn registry(&self) -> &CommandRegistry {
        &self.inner.registry
    }

    /// One `{prefix}{name} - {description}` line per command
    pub fn help_lines(&self) -> Vec<String> {
        self.inner.registry.help_lines(&self.inner.prefix)
    }
}

/// Passed to event handlers
#[derive(Clone)]
pub struct EventContext {
    /// The dispatch envelope, shared between all handlers of the event
    pub envelope: Arc<Envelope>,
    pub context: Context,
}

impl EventContext {
    /// Event name as sent by the gateway
    pub fn name(&self) -> &str {
        self.envelope.event_name.as_deref().unwrap_or_default()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.envelope.sequence
    }

    /// Raw payload
    pub fn data(&self) -> &serde_json::Value {
        &self.envelope.payload
    }

    /// Decode the payload
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        self.envelope.parse_payload()
    }
}

/// Passed to command handlers
#[derive(Clone)]
pub struct CommandContext {
    pub invocation: Invocation,
    /// The message that invoked the command
    pub message: Message,
    pub context: Context,
}

impl CommandContext {
    pub fn name(&self) -> &str {
        &self.invocation.name
    }

    pub fn args(&self) -> &[String] {
        &self.invocation.args
    }

    /// Arguments as typed, quotes included
    pub fn raw_args(&self) -> &str {
        &self.invocation.raw_args
    }

    pub fn author(&self) -> Option<&User> {
        self.message.author.as_ref()
    }

    /// Reply to the invoking message in its channel
    pub async fn reply(&self, content: &str) -> Result<Message> {
        self.context
            .rest()?
            .send_message(&self.message.channel_id, content, Some(&self.message.id))
            .await
    }
}
