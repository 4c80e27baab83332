//! Commands - handler registration and prefix command parsing
//!
//! Handlers are registered by key before the client starts:
//!
//! - event handlers by gateway event name (`"message_create"`, `"ready"`)
//! - command handlers by name, invoked by messages such as `!ping`

pub mod context;
pub mod parser;
pub mod registry;

pub use context::{CommandContext, Context, EventContext};
pub use parser::{parse, tokenize, Invocation};
pub use registry::{
    command_callback, event_callback, Callback, CommandCallback, CommandMeta, CommandRegistry,
    EventCallback, HandlerKind, Registration,
};
