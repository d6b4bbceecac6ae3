//! Utility slash commands: /getguildid, /getcategoryid, /getchannelid, /getuserid

use serenity::builder::CreateApplicationCommand;
use serenity::model::permissions::Permissions;

/// Creates utility commands
pub fn create_commands() -> Vec<CreateApplicationCommand> {
    vec![
        create_id_command("getguildid", "Get the current guild's ID"),
        create_id_command("getcategoryid", "Get the current category's ID"),
        create_id_command("getchannelid", "Get the current channel's ID"),
        create_id_command("getuserid", "Get your user ID"),
    ]
}

fn create_id_command(name: &str, description: &str) -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name(name)
        .description(description)
        .dm_permission(false)
        .default_member_permissions(Permissions::MANAGE_GUILD)
        .to_owned()
}
