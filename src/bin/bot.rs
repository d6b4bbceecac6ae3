//! Leaderboards Discord Gateway entry point
//!
//! Configuration can come from:
//! - config.yaml (or the file named by CONFIG_FILE)
//! - Environment variables
//!
//! The first command line argument, when given, overrides the database path.

use anyhow::Result;
use dotenvy::dotenv;
use log::{error, info, warn};
use serenity::async_trait;
use serenity::model::application::interaction::{Interaction, InteractionResponseType};
use serenity::model::channel::{Message, Reaction, ReactionType};
use serenity::model::gateway::Ready;
use serenity::model::id::GuildId;
use serenity::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use leaderboards::commands::{register_guild_commands, CommandHandler};
use leaderboards::config::Config;
use leaderboards::database::Database;
use leaderboards::dispatcher::Dispatcher;
use leaderboards::message_components::MessageComponentHandler;
use leaderboards::workflow::WorkflowManager;

/// Handler for the bot's Discord events
struct Handler {
    command_handler: Arc<CommandHandler>,
    component_handler: Arc<MessageComponentHandler>,
    dev_guild_id: Option<GuildId>,
    startup_guilds: Vec<u64>,
    commands_registered: AtomicBool,
}

impl Handler {
    fn new(
        command_handler: CommandHandler,
        component_handler: MessageComponentHandler,
        dev_guild_id: Option<GuildId>,
        startup_guilds: Vec<u64>,
    ) -> Self {
        Handler {
            command_handler: Arc::new(command_handler),
            component_handler: Arc::new(component_handler),
            dev_guild_id,
            startup_guilds,
            commands_registered: AtomicBool::new(false),
        }
    }

    async fn handle_reaction(&self, reaction: &Reaction, delta: i64) {
        // Unicode emoji have no id and are not tracked
        let (Some(guild_id), ReactionType::Custom { id, .. }) = (reaction.guild_id, &reaction.emoji) else {
            return;
        };

        if let Err(e) = self
            .command_handler
            .dispatcher()
            .on_reaction(guild_id.0, id.0, delta)
            .await
        {
            error!("Failed to record reaction in guild {guild_id}: {e}");
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        // Ignore messages from bots, including ourselves
        if msg.author.bot {
            return;
        }

        if let Err(e) = self.command_handler.handle_message(&ctx, &msg).await {
            error!("Error handling message {}: {e}", msg.id);
        }
    }

    async fn reaction_add(&self, _ctx: Context, add_reaction: Reaction) {
        self.handle_reaction(&add_reaction, 1).await;
    }

    async fn reaction_remove(&self, _ctx: Context, removed_reaction: Reaction) {
        self.handle_reaction(&removed_reaction, -1).await;
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected and ready!", ready.user.name);
        info!("Connected to {} guilds", ready.guilds.len());

        if let Some(shard) = ready.shard {
            info!("Shard: {}/{}", shard[0] + 1, shard[1]);
        }

        // Ready fires again on every reconnect
        if self.commands_registered.swap(true, Ordering::SeqCst) {
            info!("Skipping command registration (reconnect)");
            return;
        }

        if let Some(guild_id) = self.dev_guild_id {
            info!("Development mode: Registering commands for guild {guild_id}");
            if let Err(e) = register_guild_commands(&ctx, guild_id).await {
                error!("Failed to register guild slash commands: {e}");
            }
            return;
        }

        // Guilds seen for the first time register on their first message
        info!("Registering commands for {} known guilds", self.startup_guilds.len());
        for guild_id in &self.startup_guilds {
            if let Err(e) = register_guild_commands(&ctx, GuildId(*guild_id)).await {
                warn!("Failed to register commands for guild {guild_id}: {e}");
            }
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::ApplicationCommand(command) => {
                if let Err(e) = self.command_handler.handle_slash_command(&ctx, &command).await {
                    error!("Error handling slash command '{}': {}", command.data.name, e);

                    let error_message =
                        "Sorry, I encountered an error processing your command. Please try again.";

                    #[allow(clippy::redundant_pattern_matching)]
                    if let Err(_) = command
                        .edit_original_interaction_response(&ctx.http, |response| {
                            response.content(error_message)
                        })
                        .await
                    {
                        let _ = command
                            .create_interaction_response(&ctx.http, |response| {
                                response
                                    .kind(InteractionResponseType::ChannelMessageWithSource)
                                    .interaction_response_data(|message| {
                                        message.content(error_message).ephemeral(true)
                                    })
                            })
                            .await;
                    }
                }
            }
            Interaction::MessageComponent(component) => {
                if let Err(e) = self
                    .component_handler
                    .handle_component_interaction(&ctx, &component)
                    .await
                {
                    error!(
                        "Error handling component interaction '{}': {}",
                        component.data.custom_id, e
                    );

                    let _ = component
                        .create_interaction_response(&ctx.http, |response| {
                            response
                                .kind(InteractionResponseType::ChannelMessageWithSource)
                                .interaction_response_data(|message| {
                                    message
                                        .content("Sorry, I encountered an error processing your interaction. Please try again.")
                                        .ephemeral(true)
                                })
                        })
                        .await;
                }
            }
            Interaction::Ping(_) => {
                info!("Ping interaction received");
            }
            _ => {}
        }
    }
}

/// Run the bot with retry logic
async fn run_bot(config: &Config, command_handler: CommandHandler, startup_guilds: Vec<u64>) -> Result<()> {
    let max_retries = 5;
    let mut retry_count = 0;

    loop {
        info!("Starting bot (attempt {}/{})", retry_count + 1, max_retries);

        match run_bot_inner(config, command_handler.clone(), startup_guilds.clone()).await {
            Ok(()) => {
                info!("Bot exited normally");
                break;
            }
            Err(e) => {
                retry_count += 1;
                if retry_count >= max_retries {
                    error!("Bot failed after {} retries: {}", max_retries, e);
                    return Err(e);
                }

                let delay = Duration::from_secs(5 * retry_count as u64);
                warn!("Bot failed: {}. Retrying in {:?}...", e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }

    Ok(())
}

/// Inner bot run function (single attempt)
async fn run_bot_inner(config: &Config, command_handler: CommandHandler, startup_guilds: Vec<u64>) -> Result<()> {
    let component_handler = MessageComponentHandler::new(command_handler.clone());

    let dev_guild_id = config
        .discord_guild_id
        .as_ref()
        .and_then(|id| id.parse::<u64>().ok())
        .map(GuildId);

    let handler = Handler::new(command_handler, component_handler, dev_guild_id, startup_guilds);

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await
        .map_err(|e| {
            error!("Failed to create Discord client: {e}");
            anyhow::anyhow!("Client creation failed: {}", e)
        })?;

    info!("Connecting to Discord gateway...");

    client.start().await.map_err(|e| {
        error!("Gateway connection failed: {e}");
        anyhow::anyhow!("Gateway connection failed: {}", e)
    })?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let mut config = Config::auto_load()?;
    if let Some(path) = std::env::args().nth(1) {
        config.database_path = Some(path);
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Starting Leaderboards bot ({:?})...", config.environment);

    let database_path = config.database_path().to_string();
    if let Some(parent) = Path::new(&database_path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let database = Database::new(&database_path).await?;

    let startup_guilds = database.guild_ids().await?;
    info!("{} guilds already configured", startup_guilds.len());

    let dispatcher = Dispatcher::new(database, config.max_metrics_per_guild, startup_guilds.clone());
    let workflows = WorkflowManager::new(
        Duration::from_secs(config.prompt_timeout_secs),
        Duration::from_secs(config.selection_timeout_secs),
    );
    let command_handler = CommandHandler::new(dispatcher, workflows, config.bot_color());

    tokio::select! {
        result = run_bot(&config, command_handler, startup_guilds) => {
            if let Err(e) = &result {
                error!("Bot failed: {}", e);
            }
            result
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
            Ok(())
        }
    }
}
