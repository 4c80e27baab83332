//! DiscordWave demo bot
//!
//! Connects with the configured token and answers a handful of commands.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

use discordwave::config::{load_config, load_config_from_path, LogConfig};
use discordwave::{
    Activity, Client, CommandMeta, Config, Credentials, Intents, LifecycleEvent, Message, PresenceUpdate, Result,
    VERSION,
};

#[derive(Parser)]
#[command(
    name = "discordwave-bot",
    author = "DiscordWave Contributors",
    version = VERSION,
    about = "DiscordWave - example gateway bot",
    long_about = None
)]
struct Cli {
    /// Bot token
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Configuration file (TOML or JSON5)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Command prefix
    #[arg(long)]
    prefix: Option<String>,

    /// Intents as a number or comma-separated names (defaults to `gateway.intents`)
    #[arg(long)]
    intents: Option<Intents>,

    /// Log format: pretty or json
    #[arg(long)]
    log_format: Option<String>,
}

fn init_logging(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log.level));

    if log.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path)?,
        None => load_config()?,
    };
    if let Some(prefix) = cli.prefix {
        config.commands.prefix = prefix;
    }
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    init_logging(&config.log);

    info!("Starting DiscordWave bot v{}", VERSION);

    let credentials = match cli.token {
        Some(token) => Credentials::new(token),
        None => Credentials::from_config(&config)?,
    };

    let client = build_client(config);
    let mut handle = match cli.intents {
        Some(intents) => client.start(credentials, intents).await?,
        None => client.start_configured(credentials).await?,
    };

    let mut lifecycle = handle.lifecycle();
    tokio::spawn(async move {
        while let Ok(event) = lifecycle.recv().await {
            match event {
                LifecycleEvent::Connected { session_id } => info!(%session_id, "Connected"),
                LifecycleEvent::Resumed { session_id } => info!(%session_id, "Resumed"),
                LifecycleEvent::Reconnecting { attempt, resume, reason } => {
                    warn!(attempt, resume, %reason, "Reconnecting")
                }
                LifecycleEvent::Closed { fatal, reason } => {
                    if fatal {
                        error!(%reason, "Gateway closed");
                    }
                    break;
                }
            }
        }
    });

    tokio::select! {
        result = handle.wait() => result,
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
            handle.stop().await
        }
    }
}

fn build_client(config: Config) -> Client {
    let mut client = Client::new(config).with_presence(PresenceUpdate::online(Activity::playing("!help")));

    client.on_event("ready", |ctx| async move {
        if let Some(user) = ctx.context.current_user() {
            info!("Bot is running as {} ({})", user.username, user.id);
        }
        Ok(())
    });

    client.on_event("message_create", |ctx| async move {
        let message: Message = ctx.parse()?;
        let Some(author) = &message.author else {
            return Ok(());
        };
        let own_id = ctx.context.current_user().map(|user| user.id);
        if own_id.as_deref() == Some(author.id.as_str()) {
            return Ok(());
        }

        info!("Message from {}: {}", author.username, message.content);
        if message.content.to_lowercase().contains("hello bot") {
            ctx.context
                .rest()?
                .send_message(
                    &message.channel_id,
                    "Hello there! Try using my commands with the ! prefix.",
                    Some(&message.id),
                )
                .await?;
        }
        Ok(())
    });

    client.command("ping", CommandMeta::new("Simple ping command to check if the bot is responsive"), |ctx| async move {
        ctx.reply("Pong! 🏓").await?;
        Ok(())
    });

    client.command("echo", CommandMeta::new("Repeats your message back to you"), |ctx| async move {
        if ctx.raw_args().is_empty() {
            ctx.reply("You didn't provide anything for me to echo!").await?;
        } else {
            ctx.reply(&format!("Echo: {}", ctx.raw_args())).await?;
        }
        Ok(())
    });

    client.command("help", CommandMeta::new("Shows the list of available commands"), |ctx| async move {
        let commands = ctx.context.help_lines().join("\n");
        ctx.reply(&format!("**Available Commands:**\n{}", commands)).await?;
        Ok(())
    });

    client.command(
        "userinfo",
        CommandMeta::new("Shows information about a user").alias("whois"),
        |ctx| async move {
            let Some(user) = ctx.author() else {
                return Ok(());
            };
            let response = format!("**User Information**\nUsername: {}\nID: {}\n", user.username, user.id);
            ctx.reply(&response).await?;
            Ok(())
        },
    );

    client
}
