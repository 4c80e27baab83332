//! Command registry - event and command handlers by key

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::context::{CommandContext, EventContext};
use crate::error::{Error, Result};

/// Async event handler
pub type EventCallback = Arc<dyn Fn(EventContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Async command handler
pub type CommandCallback = Arc<dyn Fn(CommandContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// What a registration reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// A gateway event name
    Event,
    /// A prefixed command name
    Command,
}

/// Help text for a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandMeta {
    pub description: String,
    /// Extra names the command answers to
    pub aliases: Vec<String>,
}

impl CommandMeta {
    pub fn new(description: impl Into<String>) -> Self {
        CommandMeta {
            description: description.into(),
            aliases: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

/// Handler callback of either kind
#[derive(Clone)]
pub enum Callback {
    Event(EventCallback),
    Command(CommandCallback),
}

impl Callback {
    fn kind(&self) -> HandlerKind {
        match self {
            Callback::Event(_) => HandlerKind::Event,
            Callback::Command(_) => HandlerKind::Command,
        }
    }
}

/// One registered handler
#[derive(Clone)]
pub struct Registration {
    pub kind: HandlerKind,
    /// Name as registered
    pub key: String,
    pub callback: Callback,
    pub meta: Option<CommandMeta>,
}

/// Wrap an async closure as an event callback
pub fn event_callback<F, Fut>(handler: F) -> EventCallback
where
    F: Fn(EventContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(handler(ctx)))
}

/// Wrap an async closure as a command callback
pub fn command_callback<F, Fut>(handler: F) -> CommandCallback
where
    F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(handler(ctx)))
}

/// Registry of handlers. Built before the client starts and read-only afterwards.
///
/// Event names always match case-insensitively; command names do when the
/// registry is case-insensitive (the default). Several handlers may share a
/// key and run in registration order.
pub struct CommandRegistry {
    entries: HashMap<(HandlerKind, String), Vec<Registration>>,
    /// Primary command names in registration order, for help output
    commands: Vec<String>,
    case_insensitive: bool,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Create an empty, case-insensitive registry
    pub fn new() -> Self {
        CommandRegistry {
            entries: HashMap::new(),
            commands: Vec::new(),
            case_insensitive: true,
        }
    }

    /// Create an empty registry with the given command case handling
    pub fn with_case_insensitive(case_insensitive: bool) -> Self {
        CommandRegistry {
            case_insensitive,
            ..Self::new()
        }
    }

    fn normalize(&self, kind: HandlerKind, key: &str) -> String {
        match kind {
            HandlerKind::Command if !self.case_insensitive => key.to_string(),
            _ => key.to_lowercase(),
        }
    }

    /// Add a registration
    pub fn register(&mut self, registration: Registration) -> Result<()> {
        if registration.key.trim().is_empty() {
            return Err(Error::Config("Handler key must not be empty".to_string()));
        }
        if registration.callback.kind() != registration.kind {
            return Err(Error::Config(format!(
                "Callback for '{}' does not match its handler kind",
                registration.key
            )));
        }

        let mut keys = vec![registration.key.clone()];
        if registration.kind == HandlerKind::Command {
            if let Some(meta) = &registration.meta {
                keys.extend(meta.aliases.iter().cloned());
            }
            let normalized = self.normalize(HandlerKind::Command, &registration.key);
            if !self
                .commands
                .iter()
                .any(|name| self.normalize(HandlerKind::Command, name) == normalized)
            {
                self.commands.push(registration.key.clone());
            }
        }

        for key in keys {
            let normalized = self.normalize(registration.kind, &key);
            self.entries
                .entry((registration.kind, normalized))
                .or_default()
                .push(registration.clone());
        }
        Ok(())
    }

    /// Register an event handler
    pub fn register_event(&mut self, name: &str, callback: EventCallback) -> Result<()> {
        self.register(Registration {
            kind: HandlerKind::Event,
            key: name.to_string(),
            callback: Callback::Event(callback),
            meta: None,
        })
    }

    /// Register a command handler
    pub fn register_command(&mut self, name: &str, meta: CommandMeta, callback: CommandCallback) -> Result<()> {
        self.register(Registration {
            kind: HandlerKind::Command,
            key: name.to_string(),
            callback: Callback::Command(callback),
            meta: Some(meta),
        })
    }

    /// All registrations for a key, in registration order
    pub fn resolve(&self, kind: HandlerKind, key: &str) -> &[Registration] {
        self.entries
            .get(&(kind, self.normalize(kind, key)))
            .map(|registrations| registrations.as_slice())
            .unwrap_or(&[])
    }

    /// Event callbacks for an event name
    pub fn events(&self, name: &str) -> Vec<EventCallback> {
        self.resolve(HandlerKind::Event, name)
            .iter()
            .filter_map(|registration| match &registration.callback {
                Callback::Event(callback) => Some(callback.clone()),
                Callback::Command(_) => None,
            })
            .collect()
    }

    /// Command callbacks for a command name or alias
    pub fn commands(&self, name: &str) -> Vec<CommandCallback> {
        self.resolve(HandlerKind::Command, name)
            .iter()
            .filter_map(|registration| match &registration.callback {
                Callback::Command(callback) => Some(callback.clone()),
                Callback::Event(_) => None,
            })
            .collect()
    }

    /// Whether any command is registered
    pub fn has_commands(&self) -> bool {
        !self.commands.is_empty()
    }

    /// Primary command names in registration order
    pub fn command_names(&self) -> Vec<&str> {
        self.commands.iter().map(|s| s.as_str()).collect()
    }

    /// One `{prefix}{name} - {description}` line per command
    pub fn help_lines(&self, prefix: &str) -> Vec<String> {
        self.commands
            .iter()
            .map(|name| {
                let description = self
                    .resolve(HandlerKind::Command, name)
                    .iter()
                    .filter_map(|registration| registration.meta.as_ref())
                    .map(|meta| meta.description.as_str())
                    .find(|description| !description.is_empty())
                    .unwrap_or("");
                if description.is_empty() {
                    format!("{}{}", prefix, name)
                } else {
                    format!("{}{} - {}", prefix, name, description)
                }
            })
            .collect()
    }

    /// Number of registrations, aliases not counted twice
    pub fn count(&self) -> usize {
        self.entries
            .iter()
            .map(|((kind, key), registrations)| {
                registrations
                    .iter()
                    .filter(|registration| self.normalize(*kind, &registration.key) == *key)
                    .count()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::context::Context;
    use crate::gateway::protocol::Envelope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_event() -> EventCallback {
        event_callback(|_ctx| async { Ok(()) })
    }

    fn noop_command() -> CommandCallback {
        command_callback(|_ctx| async { Ok(()) })
    }

    #[test]
    fn test_event_names_ignore_case() {
        let mut registry = CommandRegistry::new();
        registry.register_event("message_create", noop_event()).unwrap();

        assert_eq!(registry.events("MESSAGE_CREATE").len(), 1);
        assert_eq!(registry.events("Message_Create").len(), 1);
        assert!(registry.events("ready").is_empty());
    }

    #[test]
    fn test_handlers_keep_registration_order() {
        let mut registry = CommandRegistry::new();
        registry.register_event("ready", noop_event()).unwrap();
        registry.register_event("READY", noop_event()).unwrap();

        let registrations = registry.resolve(HandlerKind::Event, "ready");
        assert_eq!(registrations.len(), 2);
        assert_eq!(registrations[0].key, "ready");
        assert_eq!(registrations[1].key, "READY");
    }

    #[test]
    fn test_case_sensitive_commands() {
        let mut registry = CommandRegistry::with_case_insensitive(false);
        registry.register_command("Ping", CommandMeta::default(), noop_command()).unwrap();

        assert_eq!(registry.commands("Ping").len(), 1);
        assert!(registry.commands("ping").is_empty());
    }

    #[test]
    fn test_aliases_and_help() {
        let mut registry = CommandRegistry::new();
        registry
            .register_command("ping", CommandMeta::default(), noop_command())
            .unwrap();
        registry
            .register_command(
                "userinfo",
                CommandMeta::new("Shows information about a user").alias("whois"),
                noop_command(),
            )
            .unwrap();

        assert_eq!(registry.commands("whois").len(), 1);
        assert_eq!(registry.command_names(), vec!["ping", "userinfo"]);
        assert_eq!(registry.count(), 2);
        assert_eq!(
            registry.help_lines("!"),
            vec![
                "!ping".to_string(),
                "!userinfo - Shows information about a user".to_string()
            ]
        );
    }

    #[test]
    fn test_rejects_mismatched_registration() {
        let mut registry = CommandRegistry::new();
        let result = registry.register(Registration {
            kind: HandlerKind::Command,
            key: "ping".to_string(),
            callback: Callback::Event(noop_event()),
            meta: None,
        });
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(matches!(
            registry.register_event("  ", noop_event()),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_callbacks_are_invocable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut registry = CommandRegistry::new();
        registry
            .register_event(
                "ready",
                event_callback(move |_ctx| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();

        let registry = Arc::new(registry);
        let ctx = EventContext {
            envelope: Arc::new(Envelope::dispatch(0, "READY", 1, serde_json::json!({}))),
            context: Context::detached(Arc::new(CommandRegistry::new()), "!"),
        };
        for callback in registry.events("READY") {
            callback(ctx.clone()).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
