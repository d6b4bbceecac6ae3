use crate::commands::register_guild_commands;
use crate::dispatcher::{
    parse_after, parse_prefix_command, snowflake_from_datetime, Dispatcher, EmoteDirectory,
    HistoricalMessage, MessageHistory, PrefixCommand,
};
use crate::error::{StatError, StatResult};
use crate::leaderboard::{
    describe_metric, render_board, render_emote_rows, resolve_request, tracked_metrics_text,
    KnownEmote, LeaderboardRequest, ScopeNames, UserDirectory, LEADERBOARD_SIZE,
};
use crate::message_components::{leaderboard_picker_options, present_update, LEADERBOARD_PICK_ID};
use crate::metrics::{CounterColumn, GuildConfig};
use crate::scope::{EventLocation, ScopeFilter};
use crate::workflow::{GuildSnapshot, Input, WorkflowManager};
use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use log::{debug, error, info, warn};
use serenity::async_trait;
use serenity::http::Http;
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::application::interaction::InteractionResponseType;
use serenity::model::channel::{Channel, ChannelType, GuildChannel, Message, MessageFlags, ReactionType};
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use serenity::model::permissions::Permissions;
use serenity::prelude::Context;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a channel's parent category stays cached
const CATEGORY_CACHE_TTL: Duration = Duration::from_secs(300);

const GENERIC_FAILURE: &str = "Sorry, I encountered an error processing your command. Please try again.";

/// Routes slash commands and chat messages to the stat engine
#[derive(Clone)]
pub struct CommandHandler {
    dispatcher: Dispatcher,
    workflows: WorkflowManager,
    bot_color: u32,
    channel_categories: Arc<DashMap<u64, (Option<u64>, Instant)>>,
    anchors: Arc<DashMap<String, ApplicationCommandInteraction>>,
}

impl CommandHandler {
    pub fn new(dispatcher: Dispatcher, workflows: WorkflowManager, bot_color: u32) -> Self {
        CommandHandler {
            dispatcher,
            workflows,
            bot_color,
            channel_categories: Arc::new(DashMap::new()),
            anchors: Arc::new(DashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn workflows(&self) -> &WorkflowManager {
        &self.workflows
    }

    pub fn bot_color(&self) -> u32 {
        self.bot_color
    }

    /// The `/config` interaction a dialog renders into
    pub fn anchor(&self, session_id: &str) -> Option<ApplicationCommandInteraction> {
        self.anchors.get(session_id).map(|a| a.clone())
    }

    pub fn drop_anchor(&self, session_id: &str) {
        self.anchors.remove(session_id);
    }

    /// End a dialog that can no longer be shown, as if it had timed out
    pub fn close_session(&self, session_id: &str, generation: u64) {
        self.workflows.apply(session_id, Input::Timeout { generation });
        self.drop_anchor(session_id);
    }

    // Message Handling

    pub async fn handle_message(&self, ctx: &Context, msg: &Message) -> Result<()> {
        let Some(guild_id) = msg.guild_id else {
            return Ok(());
        };

        if let Some(session_id) = self.workflows.text_session(msg.channel_id.0, msg.author.id.0) {
            return self.handle_prompt_reply(ctx, msg, &session_id).await;
        }

        let location = self.location(&ctx.http, guild_id, msg.channel_id).await;
        let emotes = GuildEmotes {
            http: ctx.http.clone(),
        };
        let report = self
            .dispatcher
            .on_message(&location, msg.author.id.0, &msg.content, &emotes)
            .await?;
        debug!(
            "Message from {} in guild {guild_id} counted in {} stat(s) with {} emote(s)",
            msg.author.id,
            report.columns.len(),
            report.emotes.len()
        );

        if self.dispatcher.mark_synced(guild_id.0) {
            if let Err(e) = register_guild_commands(ctx, guild_id).await {
                error!("Failed to register commands for new guild {guild_id}: {e}");
            }
        }

        let config = self.dispatcher.database().guild_config(guild_id.0).await?;
        if let Some(command) = parse_prefix_command(&config.command_prefix, &msg.content) {
            self.handle_prefix_command(ctx, msg, &location, &config, command).await?;
        }

        Ok(())
    }

    async fn handle_prompt_reply(&self, ctx: &Context, msg: &Message, session_id: &str) -> Result<()> {
        let update = self.workflows.apply(session_id, Input::Text(msg.content.clone()));

        if let Err(e) = ctx.http.delete_message(msg.channel_id.0, msg.id.0).await {
            debug!("Could not remove prompt reply {}: {e}", msg.id);
        }

        match update {
            Some(update) => present_update(self, ctx.http.clone(), update).await,
            None => Ok(()),
        }
    }

    async fn handle_prefix_command(
        &self,
        ctx: &Context,
        msg: &Message,
        location: &EventLocation,
        config: &GuildConfig,
        command: PrefixCommand,
    ) -> Result<()> {
        info!("Prefix command {command:?} from {} in guild {}", msg.author.id, config.id);

        let (title, body) = match command {
            PrefixCommand::Leaderboard(requested) => match resolve_request(requested, config) {
                LeaderboardRequest::Show(column) => self.leaderboard_text(&ctx.http, config, column, false).await?,
                LeaderboardRequest::Pick(columns) => (
                    "Leaderboards:".to_string(),
                    columns
                        .iter()
                        .map(|c| format!("`{}leaderboard {c}`\n", config.command_prefix))
                        .collect(),
                ),
                LeaderboardRequest::Invalid(number) => (String::new(), invalid_leaderboard_text(number)),
                LeaderboardRequest::NoMetrics => (String::new(), tracked_metrics_text(&[], &ScopeNames::default())),
            },
            PrefixCommand::Stats => {
                let names = self.scope_names(&ctx.http, config.id).await;
                ("Tracked stats:".to_string(), tracked_metrics_text(&config.metrics, &names))
            }
            PrefixCommand::Emojis { show_all } => self.emote_text(&ctx.http, config.id, show_all).await?,
            PrefixCommand::Roll(sides) => {
                let roll = match Dispatcher::roll_die(sides) {
                    Ok(roll) => roll,
                    Err(e) => {
                        msg.channel_id.say(&ctx.http, e.to_string()).await?;
                        return Ok(());
                    }
                };
                let hits = self
                    .dispatcher
                    .record_roll(location, msg.author.id.0, sides, roll)
                    .await?;
                if !hits.is_empty() {
                    react_celebrate(&ctx.http, msg.channel_id, msg.id).await;
                }
                (format!("{} rolls d{sides}", msg.author.name), format!("```🎲 {roll}```"))
            }
        };

        let color = self.bot_color;
        msg.channel_id
            .send_message(&ctx.http, |m| {
                m.embed(|e| {
                    if !title.is_empty() {
                        e.title(&title);
                    }
                    e.description(&body).color(color)
                })
            })
            .await?;
        Ok(())
    }

    // Slash Commands

    pub async fn handle_slash_command(&self, ctx: &Context, command: &ApplicationCommandInteraction) -> Result<()> {
        let Some(guild_id) = command.guild_id else {
            return self.reply(ctx, command, None, "This command only works in a server.", true).await;
        };

        info!(
            "Slash command /{} from {} in guild {guild_id}",
            command.data.name, command.user.id
        );

        let counts_as_message = match command.data.name.as_str() {
            "d" => self.handle_dice(ctx, command, guild_id).await?,
            "leaderboard" => self.handle_leaderboard(ctx, command, guild_id).await?,
            "stats" => self.handle_stats(ctx, command, guild_id).await?,
            "emojis" => self.handle_emojis(ctx, command, guild_id).await?,
            "config" => self.handle_config(ctx, command, guild_id).await?,
            "countchannelhistory" => self.handle_history(ctx, command, guild_id, ScopeFilter::ChannelOnly).await?,
            "countcategoryhistory" => self.handle_history(ctx, command, guild_id, ScopeFilter::CategoryOnly).await?,
            "countguildhistory" => self.handle_history(ctx, command, guild_id, ScopeFilter::GuildOnly).await?,
            "getguildid" => self.reply_id(ctx, command, Some(guild_id.0)).await?,
            "getcategoryid" => {
                let category = self.channel_category(&ctx.http, command.channel_id).await;
                self.reply_id(ctx, command, category).await?
            }
            "getchannelid" => self.reply_id(ctx, command, Some(command.channel_id.0)).await?,
            "getuserid" => self.reply_id(ctx, command, Some(command.user.id.0)).await?,
            other => {
                warn!("Unknown slash command: {other}");
                self.reply(ctx, command, None, "Unknown command.", true).await?;
                false
            }
        };

        if counts_as_message {
            let location = self.location(&ctx.http, guild_id, command.channel_id).await;
            self.dispatcher
                .on_command_as_message(&location, command.user.id.0)
                .await?;
        }
        Ok(())
    }

    async fn handle_dice(&self, ctx: &Context, command: &ApplicationCommandInteraction, guild_id: GuildId) -> Result<bool> {
        if self.slowmode_blocked(ctx, command).await? {
            return Ok(false);
        }

        let sides = int_option(command, "sides")
            .and_then(|s| u64::try_from(s).ok())
            .unwrap_or(0);
        let roll = match Dispatcher::roll_die(sides) {
            Ok(roll) => roll,
            Err(_) => {
                self.reply(ctx, command, None, "A die needs at least one side.", true).await?;
                return Ok(false);
            }
        };

        let color = self.bot_color;
        let author = format!("{} rolls d{sides}", command.user.name);
        let icon = command.user.face();
        command
            .create_interaction_response(&ctx.http, |response| {
                response
                    .kind(InteractionResponseType::ChannelMessageWithSource)
                    .interaction_response_data(|message| {
                        message.embed(|e| {
                            e.author(|a| a.name(&author).icon_url(&icon))
                                .description(format!("```🎲 {roll}```"))
                                .color(color)
                        })
                    })
            })
            .await?;

        let location = self.location(&ctx.http, guild_id, command.channel_id).await;
        let hits = self
            .dispatcher
            .record_roll(&location, command.user.id.0, sides, roll)
            .await?;
        if !hits.is_empty() {
            match command.get_interaction_response(&ctx.http).await {
                Ok(response) => react_celebrate(&ctx.http, response.channel_id, response.id).await,
                Err(e) => warn!("Could not load roll response to react to: {e}"),
            }
        }
        Ok(true)
    }

    async fn handle_leaderboard(&self, ctx: &Context, command: &ApplicationCommandInteraction, guild_id: GuildId) -> Result<bool> {
        if self.slowmode_blocked(ctx, command).await? {
            return Ok(false);
        }

        let config = self.dispatcher.database().get_or_create_guild(guild_id.0).await?;

        match resolve_request(int_option(command, "leaderboard_id"), &config) {
            LeaderboardRequest::Show(column) => {
                let (title, body) = self.leaderboard_text(&ctx.http, &config, column, false).await?;
                self.reply(ctx, command, Some(&title), &body, false).await?;
            }
            LeaderboardRequest::Pick(columns) => {
                let names = self.scope_names(&ctx.http, guild_id.0).await;
                let options = leaderboard_picker_options(&config, &columns, &names);
                let color = self.bot_color;
                command
                    .create_interaction_response(&ctx.http, |response| {
                        response
                            .kind(InteractionResponseType::ChannelMessageWithSource)
                            .interaction_response_data(|message| {
                                message
                                    .embed(|e| e.title("Select Leaderboard:").color(color))
                                    .components(|c| {
                                        c.create_action_row(|row| {
                                            row.create_select_menu(|menu| {
                                                menu.custom_id(LEADERBOARD_PICK_ID)
                                                    .placeholder("Select a leaderboard")
                                                    .options(|opts| {
                                                        for (value, label) in &options {
                                                            opts.create_option(|o| o.label(label).value(value));
                                                        }
                                                        opts
                                                    })
                                            })
                                        })
                                    })
                            })
                    })
                    .await?;
            }
            LeaderboardRequest::Invalid(number) => {
                self.reply(ctx, command, None, &invalid_leaderboard_text(number), true).await?;
                return Ok(false);
            }
            LeaderboardRequest::NoMetrics => {
                self.reply(ctx, command, None, &tracked_metrics_text(&[], &ScopeNames::default()), false).await?;
            }
        }
        Ok(true)
    }

    async fn handle_stats(&self, ctx: &Context, command: &ApplicationCommandInteraction, guild_id: GuildId) -> Result<bool> {
        if self.slowmode_blocked(ctx, command).await? {
            return Ok(false);
        }

        let config = self.dispatcher.database().get_or_create_guild(guild_id.0).await?;
        let names = self.scope_names(&ctx.http, guild_id.0).await;
        let text = tracked_metrics_text(&config.metrics, &names);
        self.reply(ctx, command, Some("Tracked stats:"), &text, false).await?;
        Ok(true)
    }

    async fn handle_emojis(&self, ctx: &Context, command: &ApplicationCommandInteraction, guild_id: GuildId) -> Result<bool> {
        let show_all = command
            .data
            .options
            .iter()
            .find(|o| o.name == "show_all")
            .and_then(|o| o.value.as_ref())
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let (title, body) = self.emote_text(&ctx.http, guild_id.0, show_all).await?;
        self.reply(ctx, command, Some(&title), &body, false).await?;
        Ok(true)
    }

    async fn handle_config(&self, ctx: &Context, command: &ApplicationCommandInteraction, guild_id: GuildId) -> Result<bool> {
        let config = self.dispatcher.database().get_or_create_guild(guild_id.0).await?;

        let (permissions, roles) = match &command.member {
            Some(member) => (member.permissions, member.roles.iter().map(|r| r.0).collect::<Vec<_>>()),
            None => (None, Vec::new()),
        };
        if !can_configure(permissions, &roles, &config.config_roles) {
            self.reply(ctx, command, None, "You do not have permission to change the bot configuration.", true)
                .await?;
            return Ok(false);
        }

        command
            .create_interaction_response(&ctx.http, |response| {
                response
                    .kind(InteractionResponseType::DeferredChannelMessageWithSource)
                    .interaction_response_data(|message| message.ephemeral(true))
            })
            .await?;

        let snapshot = self.guild_snapshot(&ctx.http, &config).await?;
        let update = self
            .workflows
            .start(guild_id.0, command.channel_id.0, command.user.id.0, snapshot);
        self.anchors.insert(update.session_id.clone(), command.clone());

        present_update(self, ctx.http.clone(), update).await?;
        Ok(false)
    }

    async fn handle_history(
        &self,
        ctx: &Context,
        command: &ApplicationCommandInteraction,
        guild_id: GuildId,
        filter: ScopeFilter,
    ) -> Result<bool> {
        let after = match string_option(command, "after").map(|raw| parse_after(&raw)).transpose() {
            Ok(after) => after.map(snowflake_from_datetime),
            Err(e) => {
                self.reply(ctx, command, None, &e.to_string(), true).await?;
                return Ok(false);
            }
        };

        let location = self.location(&ctx.http, guild_id, command.channel_id).await;
        let channels = guild_channels(&ctx.http, guild_id.0).await?;
        let targets: Vec<u64> = match filter {
            ScopeFilter::ChannelOnly => vec![command.channel_id.0],
            ScopeFilter::CategoryOnly => {
                let Some(category) = location.category_id else {
                    self.reply(
                        ctx,
                        command,
                        None,
                        "This channel is not part of any category. Cannot count category message history.",
                        true,
                    )
                    .await?;
                    return Ok(false);
                };
                text_channels(&channels)
                    .filter(|c| c.parent_id.map(|p| p.0) == Some(category))
                    .map(|c| c.id.0)
                    .collect()
            }
            ScopeFilter::GuildOnly => text_channels(&channels).map(|c| c.id.0).collect(),
        };

        command
            .create_interaction_response(&ctx.http, |response| {
                response
                    .kind(InteractionResponseType::DeferredChannelMessageWithSource)
                    .interaction_response_data(|message| message.ephemeral(true))
            })
            .await?;

        let history = ChannelHistory {
            http: ctx.http.clone(),
        };
        let report = match self
            .dispatcher
            .count_history(filter, &location, &targets, after, &history)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!("History count failed in guild {guild_id}: {e}");
                command
                    .edit_original_interaction_response(&ctx.http, |r| r.content(GENERIC_FAILURE))
                    .await?;
                return Ok(false);
            }
        };

        let level = match filter {
            ScopeFilter::ChannelOnly => "channel",
            ScopeFilter::CategoryOnly => "category",
            ScopeFilter::GuildOnly => "guild",
        };
        let text = if report.columns.is_empty() {
            format!("Messages in this {level} are not tracked. Try /config to start tracking.")
        } else {
            format!(
                "Successfully counted {level} history: {} messages from {} users.",
                report.messages, report.users
            )
        };

        command
            .edit_original_interaction_response(&ctx.http, |r| r.content(text))
            .await?;
        Ok(false)
    }

    /// Replies with the remaining cooldown when the channel's slowmode still covers the user.
    ///
    /// Commands that count as messages would otherwise let members skip slowmode.
    async fn slowmode_blocked(&self, ctx: &Context, command: &ApplicationCommandInteraction) -> Result<bool> {
        let delay = match ctx.http.get_channel(command.channel_id.0).await {
            Ok(Channel::Guild(channel)) => channel.rate_limit_per_user.unwrap_or(0),
            Ok(_) => 0,
            Err(e) => {
                warn!("Could not read slowmode for channel {}: {e}", command.channel_id);
                0
            }
        };
        if delay == 0 {
            return Ok(false);
        }

        let now = Utc::now();
        let cutoff = snowflake_from_datetime(now - chrono::Duration::seconds(delay as i64));
        let recent = match command
            .channel_id
            .messages(&ctx.http, |query| query.after(MessageId(cutoff)).limit(100))
            .await
        {
            Ok(recent) => recent,
            Err(e) => {
                warn!("Could not read recent messages in {}: {e}", command.channel_id);
                return Ok(false);
            }
        };

        let last_sent = recent
            .iter()
            .filter(|m| sent_by(m, command.user.id))
            .map(|m| m.timestamp.unix_timestamp())
            .max();
        let Some(remaining) = slowmode_remaining(delay, now.timestamp(), last_sent) else {
            return Ok(false);
        };

        debug!("Slowmode blocks /{} for {} ({remaining}s left)", command.data.name, command.user.id);
        let text = format!("Must wait for slowmode cooldown. Remaining time: {}", format_cooldown(remaining));
        self.reply(ctx, command, None, &text, true).await?;
        Ok(true)
    }

    async fn reply_id(&self, ctx: &Context, command: &ApplicationCommandInteraction, id: Option<u64>) -> Result<bool> {
        let text = id.map(|id| id.to_string()).unwrap_or_else(|| "None".to_string());
        self.reply(ctx, command, None, &text, true).await?;
        Ok(false)
    }

    async fn reply(
        &self,
        ctx: &Context,
        command: &ApplicationCommandInteraction,
        title: Option<&str>,
        description: &str,
        ephemeral: bool,
    ) -> Result<()> {
        let color = self.bot_color;
        command
            .create_interaction_response(&ctx.http, |response| {
                response
                    .kind(InteractionResponseType::ChannelMessageWithSource)
                    .interaction_response_data(|message| {
                        message
                            .embed(|e| {
                                if let Some(title) = title {
                                    e.title(title);
                                }
                                e.description(description).color(color)
                            })
                            .ephemeral(ephemeral)
                    })
            })
            .await?;
        Ok(())
    }

    // Leaderboard Text

    /// Title and ranked body for one stat's leaderboard
    pub async fn leaderboard_text(
        &self,
        http: &Arc<Http>,
        config: &GuildConfig,
        column: CounterColumn,
        show_all: bool,
    ) -> Result<(String, String)> {
        let names = self.scope_names(http, config.id).await;
        let title = match config.metric(column) {
            Some(metric) => format!("Leaderboard {column}: {}", describe_metric(metric, &names)),
            None => format!("Leaderboard {column}"),
        };

        let limit = if show_all { None } else { Some(LEADERBOARD_SIZE) };
        let rows = self
            .dispatcher
            .database()
            .top_users(config.id, column, limit)
            .await?;
        if rows.is_empty() {
            return Ok((title, "No one has been counted yet.".to_string()));
        }

        let accounts = AccountNames { http: http.clone() };
        Ok((title, render_board(&rows, &accounts).await))
    }

    async fn emote_text(&self, http: &Arc<Http>, guild_id: u64, show_all: bool) -> Result<(String, String)> {
        let limit = if show_all { None } else { Some(LEADERBOARD_SIZE) };
        let rows = self.dispatcher.database().top_emotes(guild_id, limit).await?;

        let emojis = join_all(rows.iter().map(|(emote_id, _)| http.get_emoji(guild_id, *emote_id))).await;
        let known: HashMap<u64, KnownEmote> = rows
            .iter()
            .zip(emojis)
            .filter_map(|((emote_id, _), emoji)| {
                emoji.ok().map(|e| {
                    (
                        *emote_id,
                        KnownEmote {
                            name: e.name,
                            animated: e.animated,
                        },
                    )
                })
            })
            .collect();

        let body = if rows.is_empty() {
            "No server emojis have been used yet.".to_string()
        } else {
            render_emote_rows(&rows, &known)
        };
        Ok(("Emoji Leaderboard".to_string(), body))
    }

    // Guild Lookups

    async fn location(&self, http: &Arc<Http>, guild_id: GuildId, channel_id: ChannelId) -> EventLocation {
        EventLocation {
            guild_id: guild_id.0,
            category_id: self.channel_category(http, channel_id).await,
            channel_id: channel_id.0,
        }
    }

    async fn channel_category(&self, http: &Arc<Http>, channel_id: ChannelId) -> Option<u64> {
        if let Some(cached) = self.channel_categories.get(&channel_id.0) {
            let (category, fetched_at) = *cached;
            if fetched_at.elapsed() < CATEGORY_CACHE_TTL {
                return category;
            }
        }

        let category = match http.get_channel(channel_id.0).await {
            Ok(Channel::Guild(channel)) => channel.parent_id.map(|p| p.0),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to look up channel {channel_id}: {e}");
                return None;
            }
        };
        self.channel_categories.insert(channel_id.0, (category, Instant::now()));
        category
    }

    async fn scope_names(&self, http: &Arc<Http>, guild_id: u64) -> ScopeNames {
        match guild_channels(http, guild_id).await {
            Ok(channels) => scope_names(&channels),
            Err(e) => {
                warn!("Failed to load channels for guild {guild_id}: {e}");
                ScopeNames::default()
            }
        }
    }

    async fn guild_snapshot(&self, http: &Arc<Http>, config: &GuildConfig) -> Result<GuildSnapshot> {
        let channels = guild_channels(http, config.id).await?;
        let names = scope_names(&channels);

        let mut sorted: Vec<&GuildChannel> = channels.iter().collect();
        sorted.sort_by_key(|c| c.position);
        let categories = sorted
            .iter()
            .filter(|c| c.kind == ChannelType::Category)
            .map(|c| (c.id.0, c.name.clone()))
            .collect();
        let text_channels = sorted
            .iter()
            .filter(|c| c.kind == ChannelType::Text)
            .map(|c| (c.id.0, c.name.clone()))
            .collect();

        let mut roles = http.get_guild_roles(config.id).await?;
        roles.retain(|r| r.id.0 != config.id);
        roles.sort_by_key(|r| std::cmp::Reverse(r.position));

        let mut metrics: Vec<_> = config
            .metrics
            .iter()
            .map(|m| (m.column, describe_metric(m, &names)))
            .collect();
        metrics.sort_by_key(|(column, _)| *column);

        Ok(GuildSnapshot {
            categories,
            text_channels,
            roles: roles.into_iter().map(|r| (r.id.0, r.name)).collect(),
            config_roles: config.config_roles.iter().copied().collect(),
            metrics,
        })
    }
}

/// Server managers always may configure the bot; others need a permitted role
pub fn can_configure(permissions: Option<Permissions>, member_roles: &[u64], config_roles: &BTreeSet<u64>) -> bool {
    let manager = permissions
        .map(|p| p.contains(Permissions::ADMINISTRATOR) || p.contains(Permissions::MANAGE_GUILD))
        .unwrap_or(false);
    manager || member_roles.iter().any(|r| config_roles.contains(r))
}

/// A message the user posted, or a visible reply to one of their commands
fn sent_by(message: &Message, user_id: UserId) -> bool {
    let ephemeral = message
        .flags
        .map(|f| f.contains(MessageFlags::EPHEMERAL))
        .unwrap_or(false);
    let their_command = message.interaction.as_ref().map(|i| i.user.id) == Some(user_id);
    message.author.id == user_id || (their_command && !ephemeral)
}

/// Seconds of slowmode left, given the user's latest post in the window
fn slowmode_remaining(delay_secs: u64, now: i64, last_sent: Option<i64>) -> Option<u64> {
    let elapsed = (now - last_sent?).max(0);
    let remaining = delay_secs as i64 - elapsed;
    (remaining > 0).then_some(remaining as u64)
}

fn format_cooldown(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

fn invalid_leaderboard_text(number: i64) -> String {
    format!("Invalid leaderboard id '{number}'. Use /stats to see the tracked stats.")
}

fn int_option(command: &ApplicationCommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_ref())
        .and_then(|v| v.as_i64())
}

fn string_option(command: &ApplicationCommandInteraction, name: &str) -> Option<String> {
    command
        .data
        .options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_ref())
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

async fn guild_channels(http: &Arc<Http>, guild_id: u64) -> Result<Vec<GuildChannel>> {
    Ok(http.get_channels(guild_id).await?)
}

fn text_channels(channels: &[GuildChannel]) -> impl Iterator<Item = &GuildChannel> {
    channels.iter().filter(|c| c.kind == ChannelType::Text)
}

fn scope_names(channels: &[GuildChannel]) -> ScopeNames {
    let mut names = ScopeNames::default();
    for channel in channels {
        match channel.kind {
            ChannelType::Category => {
                names.categories.insert(channel.id.0, channel.name.clone());
            }
            _ => {
                names.channels.insert(channel.id.0, channel.name.clone());
            }
        }
    }
    names
}

async fn react_celebrate(http: &Arc<Http>, channel_id: ChannelId, message_id: MessageId) {
    let party = ReactionType::Unicode("🎉".to_string());
    if let Err(e) = http.create_reaction(channel_id.0, message_id.0, &party).await {
        warn!("Failed to react to roll: {e}");
    }
}

/// Emote lookups against the guild's emoji list
struct GuildEmotes {
    http: Arc<Http>,
}

#[async_trait]
impl EmoteDirectory for GuildEmotes {
    async fn emote_exists(&self, guild_id: u64, emote_id: u64) -> bool {
        self.http.get_emoji(guild_id, emote_id).await.is_ok()
    }
}

/// User lookups by account, so former members keep their names
struct AccountNames {
    http: Arc<Http>,
}

#[async_trait]
impl UserDirectory for AccountNames {
    async fn user_name(&self, user_id: u64) -> Option<String> {
        match self.http.get_user(user_id).await {
            Ok(user) => Some(user.name),
            Err(e) => {
                debug!("User {user_id} no longer resolvable: {e}");
                None
            }
        }
    }
}

/// Channel history over the REST API
struct ChannelHistory {
    http: Arc<Http>,
}

#[async_trait]
impl MessageHistory for ChannelHistory {
    async fn messages_after(&self, channel_id: u64, after: u64, limit: u8) -> StatResult<Vec<HistoricalMessage>> {
        let messages = ChannelId(channel_id)
            .messages(&self.http, |query| query.after(MessageId(after)).limit(limit as u64))
            .await
            .map_err(|e| StatError::Platform(e.to_string()))?;

        Ok(messages
            .into_iter()
            .map(|m| HistoricalMessage {
                id: m.id.0,
                author_id: m.author.id.0,
                author_is_bot: m.author.bot,
            })
            .collect())
    }
}
