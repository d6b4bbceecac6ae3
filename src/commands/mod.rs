//! Slash command definitions and registration

pub mod slash;

use anyhow::Result;
use log::info;
use serenity::builder::CreateApplicationCommand;
use serenity::model::id::GuildId;
use serenity::prelude::Context;

pub use crate::command_handler::CommandHandler;

/// Every slash command the bot offers
pub fn create_all_commands() -> Vec<CreateApplicationCommand> {
    let mut commands = slash::stats::create_commands();
    commands.extend(slash::admin::create_commands());
    commands.extend(slash::utility::create_commands());
    commands
}

/// Register commands for one guild (instant, used for dev guilds and newly seen guilds)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    let commands = create_all_commands();
    let count = commands.len();

    guild_id
        .set_application_commands(&ctx.http, |builder| builder.set_application_commands(commands))
        .await?;

    info!("Registered {count} commands for guild {guild_id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names_are_unique() {
        let commands = create_all_commands();
        let mut names: Vec<String> = commands
            .iter()
            .filter_map(|c| c.0.get("name").and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        let total = names.len();
        names.sort();
        names.dedup();

        assert_eq!(total, 12);
        assert_eq!(names.len(), total);
        assert!(names.contains(&"config".to_string()));
        assert!(names.contains(&"countguildhistory".to_string()));
    }
}
