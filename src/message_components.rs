//! # Feature: Message Components
//!
//! Renders configuration dialogs as select menus, paging buttons and text
//! prompts, and routes component clicks back into the workflow engine.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: Dialogs render from workflow state; leaderboard picker
//! - 1.0.0: Numbered button menus

use crate::command_handler::CommandHandler;
use crate::dispatcher::Applied;
use crate::error::StatError;
use crate::leaderboard::{describe_metric, ScopeNames};
use crate::metrics::{CounterColumn, GuildConfig};
use crate::workflow::{Input, Outcome, PageDirection, Selection, State, TextPrompt, Transition, Update};
use anyhow::Result;
use log::{debug, error, warn};
use serenity::http::Http;
use serenity::model::application::component::ButtonStyle;
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::application::interaction::message_component::MessageComponentInteraction;
use serenity::model::application::interaction::InteractionResponseType;
use serenity::prelude::Context;
use std::sync::Arc;

pub const LEADERBOARD_PICK_ID: &str = "lb:pick";

const WORKFLOW_PREFIX: &str = "wf";

// Select option labels are capped by Discord
const MAX_LABEL_LEN: usize = 100;

/// What a component's custom id refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentAction {
    WorkflowSelect(String),
    WorkflowPage(String, PageDirection),
    LeaderboardPick,
}

pub fn workflow_custom_id(session_id: &str, action: &str) -> String {
    format!("{WORKFLOW_PREFIX}:{session_id}:{action}")
}

pub fn parse_custom_id(custom_id: &str) -> Option<ComponentAction> {
    if custom_id == LEADERBOARD_PICK_ID {
        return Some(ComponentAction::LeaderboardPick);
    }

    let mut parts = custom_id.splitn(3, ':');
    if parts.next()? != WORKFLOW_PREFIX {
        return None;
    }
    let session_id = parts.next().filter(|s| !s.is_empty())?.to_string();

    match parts.next()? {
        "select" => Some(ComponentAction::WorkflowSelect(session_id)),
        "next" => Some(ComponentAction::WorkflowPage(session_id, PageDirection::Forward)),
        "prev" => Some(ComponentAction::WorkflowPage(session_id, PageDirection::Back)),
        _ => None,
    }
}

/// Everything needed to draw one dialog state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub title: String,
    pub description: String,
    /// Select menu entries as (absolute index, label)
    pub options: Vec<(usize, String)>,
    pub previous: bool,
    pub next: bool,
}

impl View {
    fn closed(title: &str, description: String) -> Self {
        View {
            title: title.to_string(),
            description,
            options: Vec::new(),
            previous: false,
            next: false,
        }
    }

    fn has_paging(&self) -> bool {
        self.previous || self.next
    }
}

pub fn selection_view(selection: &Selection) -> View {
    let options: Vec<(usize, String)> = selection
        .page()
        .map(|(i, label)| (i, truncate_label(label)))
        .collect();

    let description = selection
        .page()
        .map(|(i, label)| format!("**{}.** {label}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    View {
        title: selection.title.clone(),
        description,
        options,
        previous: selection.has_previous_page(),
        next: selection.has_next_page(),
    }
}

pub fn text_view(prompt: &TextPrompt) -> View {
    let mut description = String::new();
    if let Some(rejected) = &prompt.rejected {
        description.push_str(&format!("Try again, invalid input: {rejected}\n\n"));
    }
    description.push_str(&prompt.help);
    description.push_str("\nReply with a message in this channel.");

    View::closed(&prompt.description, description)
}

fn truncate_label(label: &str) -> String {
    if label.chars().count() <= MAX_LABEL_LEN {
        return label.to_string();
    }
    let mut short: String = label.chars().take(MAX_LABEL_LEN - 3).collect();
    short.push_str("...");
    short
}

/// Select options for picking between leaderboards, as (value, label)
pub fn leaderboard_picker_options(
    config: &GuildConfig,
    columns: &[CounterColumn],
    names: &ScopeNames,
) -> Vec<(String, String)> {
    columns
        .iter()
        .filter_map(|column| {
            let metric = config.metric(*column)?;
            let label = format!("{column}. {}", describe_metric(metric, names));
            Some((column.to_string(), truncate_label(&label)))
        })
        .collect()
}

/// Operator-facing text for a finished dialog
pub fn applied_text(applied: &Applied) -> String {
    match applied {
        Applied::MetricAdded(column) => format!("Now tracking stat {column}."),
        Applied::MetricDeleted(column) => {
            format!("Deleted stat {column}. Stats after it have moved down one place.")
        }
        Applied::DefaultSet(column) => format!("Default leaderboard set to stat {column}."),
        Applied::RolePermitted { role_id, newly_added: true } => {
            format!("Successfully enabled <@&{role_id}> to alter bot settings.")
        }
        Applied::RolePermitted { role_id, newly_added: false } => {
            format!("The role <@&{role_id}> can already alter bot settings!")
        }
        Applied::RoleRevoked(role_id) => {
            format!("Successfully removed <@&{role_id}>'s permission to alter bot settings.")
        }
    }
}

fn failure_text(error: &StatError) -> String {
    match error {
        StatError::MaxMetricsExceeded { .. } => {
            format!("Error: {error}. Delete an existing stat to add another.")
        }
        StatError::NotFound(_) => {
            "Error: that no longer exists. The configuration changed since this menu was opened.".to_string()
        }
        _ => "Sorry, I couldn't save that change. Please try again.".to_string(),
    }
}

async fn outcome_text(handler: &CommandHandler, guild_id: u64, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Commit(action) => match handler.dispatcher().apply_action(guild_id, action).await {
            Ok(applied) => applied_text(&applied),
            Err(e) => {
                error!("Failed to apply {action:?} for guild {guild_id}: {e}");
                failure_text(&e)
            }
        },
        Outcome::Message(message) => message.clone(),
        Outcome::Cancelled => StatError::TimeoutExpired.to_string(),
    }
}

async fn draw(
    anchor: &ApplicationCommandInteraction,
    http: &Arc<Http>,
    session_id: &str,
    view: &View,
    color: u32,
) -> serenity::Result<()> {
    anchor
        .edit_original_interaction_response(http, |response| {
            response
                .embed(|e| e.title(&view.title).description(&view.description).color(color))
                .components(|c| {
                    if !view.options.is_empty() {
                        c.create_action_row(|row| {
                            row.create_select_menu(|menu| {
                                menu.custom_id(workflow_custom_id(session_id, "select"))
                                    .placeholder("Select an option")
                                    .options(|opts| {
                                        for (index, label) in &view.options {
                                            opts.create_option(|o| o.label(label).value(index));
                                        }
                                        opts
                                    })
                            })
                        });
                    }
                    if view.has_paging() {
                        c.create_action_row(|row| {
                            row.create_button(|b| {
                                b.custom_id(workflow_custom_id(session_id, "prev"))
                                    .label("Previous")
                                    .style(ButtonStyle::Secondary)
                                    .disabled(!view.previous)
                            })
                            .create_button(|b| {
                                b.custom_id(workflow_custom_id(session_id, "next"))
                                    .label("Next")
                                    .style(ButtonStyle::Secondary)
                                    .disabled(!view.next)
                            })
                        });
                    }
                    c
                })
        })
        .await?;
    Ok(())
}

/// Show a dialog's new state in its `/config` response.
///
/// Terminal states are applied and the dialog is closed. A text prompt that
/// cannot be shown is swapped for a retry selection. Every fresh state gets
/// its own timeout.
pub async fn present_update(handler: &CommandHandler, http: Arc<Http>, update: Update) -> Result<()> {
    if update.transition == Transition::Ignored {
        return Ok(());
    }
    let Some(anchor) = handler.anchor(&update.session_id) else {
        debug!("No response to render session {} into", update.session_id);
        return Ok(());
    };
    let color = handler.bot_color();

    let mut update = update;
    let mut retried = false;
    loop {
        let view = match &update.state {
            State::AwaitingSelection(selection) => selection_view(selection),
            State::AwaitingText(prompt) => text_view(prompt),
            State::Terminal(outcome) => {
                handler.drop_anchor(&update.session_id);
                let text = outcome_text(handler, update.guild_id, outcome).await;
                View::closed("Configuration", text)
            }
        };

        match draw(&anchor, &http, &update.session_id, &view, color).await {
            Ok(()) => break,
            Err(e) if matches!(update.state, State::AwaitingText(_)) && !retried => {
                warn!("Could not show prompt for session {}: {e}", update.session_id);
                retried = true;
                match handler.workflows().apply(&update.session_id, Input::PromptFailed) {
                    Some(next) => update = next,
                    None => return Ok(()),
                }
            }
            Err(e) => {
                // Nothing was drawn to click or time out, so the dialog ends here
                handler.close_session(&update.session_id, update.generation);
                return Err(e.into());
            }
        }
    }

    if update.transition == Transition::Repaged || update.state.is_terminal() {
        return Ok(());
    }

    let expire_handler = handler.clone();
    handler.workflows().arm_timeout(&update, move |expired| async move {
        expire_handler.drop_anchor(&expired.session_id);
        let view = View::closed("Configuration", StatError::TimeoutExpired.to_string());
        if let Err(e) = draw(&anchor, &http, &expired.session_id, &view, color).await {
            debug!("Could not close timed out session {}: {e}", expired.session_id);
        }
    });
    Ok(())
}

/// Handles clicks on select menus and buttons
#[derive(Clone)]
pub struct MessageComponentHandler {
    command_handler: CommandHandler,
}

impl MessageComponentHandler {
    pub fn new(command_handler: CommandHandler) -> Self {
        MessageComponentHandler { command_handler }
    }

    pub async fn handle_component_interaction(
        &self,
        ctx: &Context,
        component: &MessageComponentInteraction,
    ) -> Result<()> {
        let Some(action) = parse_custom_id(&component.data.custom_id) else {
            warn!("Unknown component id: {}", component.data.custom_id);
            return Ok(());
        };

        match action {
            ComponentAction::WorkflowSelect(session_id) => {
                let index = component
                    .data
                    .values
                    .first()
                    .and_then(|v| v.parse::<usize>().ok());
                match index {
                    Some(index) => self.drive(ctx, component, &session_id, Input::Select(index)).await,
                    None => Ok(()),
                }
            }
            ComponentAction::WorkflowPage(session_id, direction) => {
                self.drive(ctx, component, &session_id, Input::Page(direction)).await
            }
            ComponentAction::LeaderboardPick => self.show_picked_leaderboard(ctx, component).await,
        }
    }

    async fn drive(
        &self,
        ctx: &Context,
        component: &MessageComponentInteraction,
        session_id: &str,
        input: Input,
    ) -> Result<()> {
        let workflows = self.command_handler.workflows();

        match workflows.session_user(session_id) {
            Some(owner) if owner == component.user.id.0 => {}
            Some(_) => {
                return self
                    .respond_ephemeral(ctx, component, "Only the person who opened this menu can use it.")
                    .await;
            }
            None => {
                return self
                    .respond_ephemeral(ctx, component, "This menu has expired. Run /config again.")
                    .await;
            }
        }

        component
            .create_interaction_response(&ctx.http, |response| {
                response.kind(InteractionResponseType::DeferredUpdateMessage)
            })
            .await?;

        if let Some(update) = workflows.apply(session_id, input) {
            present_update(&self.command_handler, ctx.http.clone(), update).await?;
        }
        Ok(())
    }

    async fn show_picked_leaderboard(&self, ctx: &Context, component: &MessageComponentInteraction) -> Result<()> {
        let Some(guild_id) = component.guild_id else {
            return Ok(());
        };
        let column = component
            .data
            .values
            .first()
            .and_then(|v| v.parse::<usize>().ok())
            .and_then(CounterColumn::new);
        let Some(column) = column else {
            return Ok(());
        };

        let config = self
            .command_handler
            .dispatcher()
            .database()
            .get_or_create_guild(guild_id.0)
            .await?;
        if config.metric(column).is_none() {
            return self
                .respond_ephemeral(ctx, component, "That stat is no longer tracked.")
                .await;
        }

        let (title, body) = self
            .command_handler
            .leaderboard_text(&ctx.http, &config, column, false)
            .await?;
        let color = self.command_handler.bot_color();

        component
            .create_interaction_response(&ctx.http, |response| {
                response
                    .kind(InteractionResponseType::UpdateMessage)
                    .interaction_response_data(|message| {
                        message
                            .embed(|e| e.title(&title).description(&body).color(color))
                            .components(|c| c)
                    })
            })
            .await?;
        Ok(())
    }

    async fn respond_ephemeral(&self, ctx: &Context, component: &MessageComponentInteraction, text: &str) -> Result<()> {
        component
            .create_interaction_response(&ctx.http, |response| {
                response
                    .kind(InteractionResponseType::ChannelMessageWithSource)
                    .interaction_response_data(|message| message.content(text).ephemeral(true))
            })
            .await?;
        Ok(())
    }
}
