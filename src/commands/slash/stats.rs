//! Member slash commands: /d, /leaderboard, /stats, /emojis

use serenity::builder::CreateApplicationCommand;
use serenity::model::application::command::CommandOptionType;

/// Creates stat and leaderboard commands
pub fn create_commands() -> Vec<CreateApplicationCommand> {
    vec![
        create_dice_command(),
        create_leaderboard_command(),
        create_stats_command(),
        create_emojis_command(),
    ]
}

/// Creates the d command
fn create_dice_command() -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name("d")
        .description("Roll a die with the given number of sides")
        .dm_permission(false)
        .create_option(|option| {
            option
                .name("sides")
                .description("Number of sides on the die")
                .kind(CommandOptionType::Integer)
                .required(true)
        })
        .to_owned()
}

/// Creates the leaderboard command
fn create_leaderboard_command() -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name("leaderboard")
        .description("View a leaderboard")
        .dm_permission(false)
        .create_option(|option| {
            option
                .name("leaderboard_id")
                .description("Id of the leaderboard you wish to view")
                .kind(CommandOptionType::Integer)
                .required(false)
        })
        .to_owned()
}

/// Creates the stats command
fn create_stats_command() -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name("stats")
        .description("Display the currently tracked stats")
        .dm_permission(false)
        .to_owned()
}

/// Creates the emojis command
fn create_emojis_command() -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name("emojis")
        .description("View a leaderboard of the most popular server emojis")
        .dm_permission(false)
        .create_option(|option| {
            option
                .name("show_all")
                .description("View all emojis")
                .kind(CommandOptionType::Boolean)
                .required(false)
        })
        .to_owned()
}
