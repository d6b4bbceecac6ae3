//! Admin slash commands: /config, /countchannelhistory, /countcategoryhistory, /countguildhistory

use serenity::builder::CreateApplicationCommand;
use serenity::model::application::command::CommandOptionType;
use serenity::model::permissions::Permissions;

/// Creates admin commands
pub fn create_commands() -> Vec<CreateApplicationCommand> {
    vec![
        create_config_command(),
        create_history_command("countchannelhistory", "Count the number of historical messages in the current channel"),
        create_history_command("countcategoryhistory", "Count the number of historical messages in the current category"),
        create_history_command("countguildhistory", "Count the number of historical messages in the guild"),
    ]
}

/// Creates the config command (admin) - opens the configuration menu
fn create_config_command() -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name("config")
        .description("Configure the bot")
        .dm_permission(false)
        .to_owned()
}

/// Creates a history backfill command (admin)
fn create_history_command(name: &str, description: &str) -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name(name)
        .description(description)
        .dm_permission(false)
        .default_member_permissions(Permissions::MANAGE_GUILD)
        .create_option(|option| {
            option
                .name("after")
                .description("Count history for messages sent after this datetime. UTC datetime in format: YYYY-mm-dd hh:MM")
                .kind(CommandOptionType::String)
                .required(false)
        })
        .to_owned()
}
