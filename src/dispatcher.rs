//! # Feature: Event Dispatch
//!
//! Turns inbound chat events (messages, reactions, dice rolls, history
//! backfills, finished configuration dialogs) into metric store updates.
//! Platform lookups go through [`EmoteDirectory`] and [`MessageHistory`] so
//! the dispatcher runs without a gateway connection.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Prefix text commands
//! - 1.1.0: Emote usage tracking
//! - 1.0.0: Message and dice counting, history backfill

use crate::database::{CounterUpdate, Database};
use crate::error::{StatError, StatResult};
use crate::metrics::CounterColumn;
use crate::scope::{matching_columns, EventLocation, Observation, ScopeFilter};
use crate::workflow::Action;
use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::DashSet;
use log::{debug, info};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serenity::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Messages requested per history page
pub const HISTORY_PAGE_SIZE: u8 = 100;

/// Format of the `after` option on history commands (UTC)
pub const AFTER_FORMAT: &str = "%Y-%m-%d %H:%M";

const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

static CUSTOM_EMOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<a?:\w+:(\d+)>").expect("Invalid regex"));

/// Confirms that an emote id belongs to a guild before it is counted
#[async_trait]
pub trait EmoteDirectory: Send + Sync {
    async fn emote_exists(&self, guild_id: u64, emote_id: u64) -> bool;
}

/// A message seen while walking channel history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalMessage {
    pub id: u64,
    pub author_id: u64,
    pub author_is_bot: bool,
}

/// Pages through a channel's past messages
#[async_trait]
pub trait MessageHistory: Send + Sync {
    /// Up to `limit` messages in `channel_id` with ids greater than `after`, in any order
    async fn messages_after(
        &self,
        channel_id: u64,
        after: u64,
        limit: u8,
    ) -> StatResult<Vec<HistoricalMessage>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageReport {
    pub columns: Vec<CounterColumn>,
    pub emotes: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryReport {
    /// Columns that were overwritten. Empty when nothing is tracked at the requested level.
    pub columns: Vec<CounterColumn>,
    pub users: usize,
    pub messages: u64,
}

/// Result of applying a finished configuration dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    MetricAdded(CounterColumn),
    MetricDeleted(CounterColumn),
    DefaultSet(CounterColumn),
    RolePermitted { role_id: u64, newly_added: bool },
    RoleRevoked(u64),
}

/// Text commands recognised after a guild's command prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixCommand {
    Leaderboard(Option<i64>),
    Stats,
    Emojis { show_all: bool },
    Roll(u64),
}

#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    max_metrics: usize,
    synced_guilds: Arc<DashSet<u64>>,
}

impl Dispatcher {
    /// `synced_guilds` are guilds whose commands were registered at startup
    pub fn new(db: Database, max_metrics: usize, synced_guilds: impl IntoIterator<Item = u64>) -> Self {
        let synced = DashSet::new();
        for guild_id in synced_guilds {
            synced.insert(guild_id);
        }

        Dispatcher {
            db,
            max_metrics,
            synced_guilds: Arc::new(synced),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn max_metrics(&self) -> usize {
        self.max_metrics
    }

    /// Count a chat message and any custom emotes it uses
    pub async fn on_message(
        &self,
        location: &EventLocation,
        author_id: u64,
        content: &str,
        emotes: &dyn EmoteDirectory,
    ) -> StatResult<MessageReport> {
        let columns = self.count_message(location, author_id).await?;

        let mut counted = Vec::new();
        for emote_id in extract_emote_ids(content) {
            if emotes.emote_exists(location.guild_id, emote_id).await {
                self.db.increment_emote(location.guild_id, emote_id, 1).await?;
                counted.push(emote_id);
            } else {
                debug!("Skipping emote {emote_id} not found in guild {}", location.guild_id);
            }
        }

        Ok(MessageReport {
            columns,
            emotes: counted,
        })
    }

    /// Commands that stand in for chatting are counted like a message
    pub async fn on_command_as_message(
        &self,
        location: &EventLocation,
        user_id: u64,
    ) -> StatResult<Vec<CounterColumn>> {
        self.count_message(location, user_id).await
    }

    /// Reaction added (`delta = 1`) or removed (`delta = -1`)
    pub async fn on_reaction(&self, guild_id: u64, emote_id: u64, delta: i64) -> StatResult<()> {
        self.db.increment_emote(guild_id, emote_id, delta).await
    }

    /// Uniform roll in `1..=sides`
    pub fn roll_die(sides: u64) -> StatResult<u64> {
        if sides == 0 {
            return Err(StatError::InvalidInput("a die needs at least one side".to_string()));
        }
        Ok(rand::rng().random_range(1..=sides))
    }

    /// Increment every dice metric that the roll hits. Returns the matched columns.
    pub async fn record_roll(
        &self,
        location: &EventLocation,
        user_id: u64,
        sides: u64,
        result: u64,
    ) -> StatResult<Vec<CounterColumn>> {
        let config = self.db.get_or_create_guild(location.guild_id).await?;
        let columns = matching_columns(
            location,
            &config.metrics,
            Observation::DiceRoll { sides, result },
            None,
        );

        for column in &columns {
            self.db
                .increment_or_set(location.guild_id, user_id, *column, CounterUpdate::Increment)
                .await?;
        }
        Ok(columns)
    }

    /// Recount messages at exactly one scope level and overwrite the matching counters.
    ///
    /// Walks every channel in `channels` from the `after` snowflake onward,
    /// ignoring bot authors. Running it twice over the same window gives the
    /// same counters.
    pub async fn count_history(
        &self,
        filter: ScopeFilter,
        location: &EventLocation,
        channels: &[u64],
        after: Option<u64>,
        history: &dyn MessageHistory,
    ) -> StatResult<HistoryReport> {
        let config = self.db.get_or_create_guild(location.guild_id).await?;
        let columns = matching_columns(location, &config.metrics, Observation::Message, Some(filter));
        if columns.is_empty() {
            return Ok(HistoryReport::default());
        }

        let mut per_user: HashMap<u64, i64> = HashMap::new();
        let mut messages = 0u64;

        for channel_id in channels {
            let mut cursor = after.unwrap_or(0);
            loop {
                let page = history.messages_after(*channel_id, cursor, HISTORY_PAGE_SIZE).await?;
                let Some(newest) = page.iter().map(|m| m.id).max() else {
                    break;
                };
                cursor = newest;

                for message in page.iter().filter(|m| !m.author_is_bot) {
                    *per_user.entry(message.author_id).or_insert(0) += 1;
                    messages += 1;
                }

                if page.len() < HISTORY_PAGE_SIZE as usize {
                    break;
                }
            }
        }

        for (user_id, count) in &per_user {
            for column in &columns {
                self.db
                    .increment_or_set(location.guild_id, *user_id, *column, CounterUpdate::Set(*count))
                    .await?;
            }
        }

        info!(
            "Counted {messages} historical messages from {} users across {} channels in guild {}",
            per_user.len(),
            channels.len(),
            location.guild_id
        );

        Ok(HistoryReport {
            columns,
            users: per_user.len(),
            messages,
        })
    }

    /// Persist the change a configuration dialog settled on
    pub async fn apply_action(&self, guild_id: u64, action: &Action) -> StatResult<Applied> {
        match action {
            Action::AddMetric { kind, scope } => {
                let column = self
                    .db
                    .append_metric(guild_id, *kind, *scope, self.max_metrics)
                    .await?;
                Ok(Applied::MetricAdded(column))
            }
            Action::DeleteMetric(column) => {
                self.db.delete_metric(guild_id, *column).await?;
                Ok(Applied::MetricDeleted(*column))
            }
            Action::SetDefault(column) => {
                self.db.set_default_metric(guild_id, Some(*column)).await?;
                Ok(Applied::DefaultSet(*column))
            }
            Action::AddConfigRole(role_id) => {
                let newly_added = self.db.add_config_role(guild_id, *role_id).await?;
                Ok(Applied::RolePermitted {
                    role_id: *role_id,
                    newly_added,
                })
            }
            Action::RemoveConfigRole(role_id) => {
                self.db.remove_config_role(guild_id, *role_id).await?;
                Ok(Applied::RoleRevoked(*role_id))
            }
        }
    }

    /// True the first time a guild is seen, meaning its commands still need registering
    pub fn mark_synced(&self, guild_id: u64) -> bool {
        self.synced_guilds.insert(guild_id)
    }

    async fn count_message(&self, location: &EventLocation, user_id: u64) -> StatResult<Vec<CounterColumn>> {
        let config = self.db.get_or_create_guild(location.guild_id).await?;
        let columns = matching_columns(location, &config.metrics, Observation::Message, None);

        for column in &columns {
            self.db
                .increment_or_set(location.guild_id, user_id, *column, CounterUpdate::Increment)
                .await?;
        }
        Ok(columns)
    }
}

/// Unique custom emote ids in a message, in order of first use
pub fn extract_emote_ids(content: &str) -> Vec<u64> {
    let mut seen = HashSet::new();
    CUSTOM_EMOTE
        .captures_iter(content)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Smallest snowflake at or after `time`
pub fn snowflake_from_datetime(time: DateTime<Utc>) -> u64 {
    let ms = (time.timestamp_millis() - DISCORD_EPOCH_MS).max(0) as u64;
    ms << 22
}

/// Parse a `YYYY-mm-dd hh:MM` UTC cutoff
pub fn parse_after(raw: &str) -> StatResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), AFTER_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            StatError::InvalidInput(
                "Invalid 'after' datetime given. Please verify format is YYYY-mm-dd hh:MM".to_string(),
            )
        })
}

pub fn parse_prefix_command(prefix: &str, content: &str) -> Option<PrefixCommand> {
    let rest = content.trim().strip_prefix(prefix)?;
    let mut words = rest.split_whitespace();
    let name = words.next()?.to_lowercase();
    let arg = words.next();

    match name.as_str() {
        "leaderboard" | "lb" => Some(PrefixCommand::Leaderboard(arg.and_then(|a| a.parse().ok()))),
        "stats" => Some(PrefixCommand::Stats),
        "emojis" => Some(PrefixCommand::Emojis {
            show_all: arg.is_some_and(|a| a.eq_ignore_ascii_case("all")),
        }),
        "d" | "roll" => arg.and_then(|a| a.parse().ok()).map(PrefixCommand::Roll),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricKind, Scope};
    use chrono::TimeZone;

    struct KnownEmotes(HashSet<u64>);

    #[async_trait]
    impl EmoteDirectory for KnownEmotes {
        async fn emote_exists(&self, _guild_id: u64, emote_id: u64) -> bool {
            self.0.contains(&emote_id)
        }
    }

    struct FakeHistory(HashMap<u64, Vec<HistoricalMessage>>);

    #[async_trait]
    impl MessageHistory for FakeHistory {
        async fn messages_after(
            &self,
            channel_id: u64,
            after: u64,
            limit: u8,
        ) -> StatResult<Vec<HistoricalMessage>> {
            let mut page: Vec<HistoricalMessage> = self
                .0
                .get(&channel_id)
                .map(|msgs| msgs.iter().filter(|m| m.id > after).cloned().collect())
                .unwrap_or_default();
            page.sort_by_key(|m| m.id);
            page.truncate(limit as usize);
            page.reverse();
            Ok(page)
        }
    }

    fn message(id: u64, author_id: u64) -> HistoricalMessage {
        HistoricalMessage {
            id,
            author_id,
            author_is_bot: false,
        }
    }

    fn location(category_id: Option<u64>, channel_id: u64) -> EventLocation {
        EventLocation {
            guild_id: 1,
            category_id,
            channel_id,
        }
    }

    async fn dispatcher() -> Dispatcher {
        let db = Database::new(":memory:").await.unwrap();
        Dispatcher::new(db, 3, Vec::new())
    }

    #[test]
    fn test_extract_emote_ids_dedupes() {
        let ids = extract_emote_ids("<:pog:11> hi <:pog:11> <a:dance:12> <:bad:> :plain:");
        assert_eq!(ids, vec![11, 12]);
        assert!(extract_emote_ids("no emotes here").is_empty());
    }

    #[test]
    fn test_parse_after() {
        let parsed = parse_after("2023-04-05 06:07").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 0).unwrap());
        assert!(matches!(parse_after("yesterday"), Err(StatError::InvalidInput(_))));
        assert!(parse_after("2023-04-05").is_err());
    }

    #[test]
    fn test_snowflake_from_datetime() {
        let epoch = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(snowflake_from_datetime(epoch), 0);
        assert_eq!(
            snowflake_from_datetime(epoch + chrono::Duration::seconds(1)),
            1000 << 22
        );
        let before = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(snowflake_from_datetime(before), 0);
    }

    #[test]
    fn test_parse_prefix_command() {
        assert_eq!(parse_prefix_command("!", "!leaderboard 2"), Some(PrefixCommand::Leaderboard(Some(2))));
        assert_eq!(parse_prefix_command("!", "!LB"), Some(PrefixCommand::Leaderboard(None)));
        assert_eq!(parse_prefix_command("!", "!stats"), Some(PrefixCommand::Stats));
        assert_eq!(
            parse_prefix_command("!", "!emojis all"),
            Some(PrefixCommand::Emojis { show_all: true })
        );
        assert_eq!(parse_prefix_command("!", "!d 20"), Some(PrefixCommand::Roll(20)));
        assert_eq!(parse_prefix_command("!", "!d"), None);
        assert_eq!(parse_prefix_command("!", "leaderboard"), None);
        assert_eq!(parse_prefix_command("?", "?stats"), Some(PrefixCommand::Stats));
        assert_eq!(parse_prefix_command("!", "!unknown"), None);
    }

    #[test]
    fn test_roll_die_range() {
        for _ in 0..200 {
            let roll = Dispatcher::roll_die(6).unwrap();
            assert!((1..=6).contains(&roll));
        }
        assert_eq!(Dispatcher::roll_die(1).unwrap(), 1);
        assert!(Dispatcher::roll_die(0).is_err());
    }

    #[tokio::test]
    async fn test_mark_synced() {
        let db = Database::new(":memory:").await.unwrap();
        let dispatcher = Dispatcher::new(db, 3, vec![5]);
        assert!(!dispatcher.mark_synced(5));
        assert!(dispatcher.mark_synced(6));
        assert!(!dispatcher.mark_synced(6));
    }

    #[tokio::test]
    async fn test_duplicate_emote_counted_once() {
        let dispatcher = dispatcher().await;
        let emotes = KnownEmotes([11].into_iter().collect());

        let report = dispatcher
            .on_message(&location(None, 5), 10, "<:pog:11> <:pog:11> <:fake:99>", &emotes)
            .await
            .unwrap();
        assert_eq!(report.emotes, vec![11]);
        assert!(report.columns.is_empty());

        let top = dispatcher.database().top_emotes(1, None).await.unwrap();
        assert_eq!(top, vec![(11, 1)]);
    }

    #[tokio::test]
    async fn test_reactions_adjust_emote_counts() {
        let dispatcher = dispatcher().await;
        dispatcher.on_reaction(1, 11, 1).await.unwrap();
        dispatcher.on_reaction(1, 11, 1).await.unwrap();
        dispatcher.on_reaction(1, 11, -1).await.unwrap();
        dispatcher.on_reaction(1, 12, -1).await.unwrap();

        let top = dispatcher.database().top_emotes(1, None).await.unwrap();
        assert_eq!(top, vec![(11, 1), (12, -1)]);
    }

    #[tokio::test]
    async fn test_count_history_pages_and_skips_bots() {
        let dispatcher = dispatcher().await;
        dispatcher
            .apply_action(1, &Action::AddMetric { kind: MetricKind::MessageCount, scope: Scope::Channel(42) })
            .await
            .unwrap();

        let mut msgs: Vec<HistoricalMessage> = (1..=250).map(|id| message(id, 10 + id % 2)).collect();
        msgs.push(HistoricalMessage {
            id: 300,
            author_id: 99,
            author_is_bot: true,
        });
        let history = FakeHistory([(42, msgs)].into_iter().collect());

        let loc = location(None, 42);
        let report = dispatcher
            .count_history(ScopeFilter::ChannelOnly, &loc, &[42], None, &history)
            .await
            .unwrap();
        assert_eq!(report.messages, 250);
        assert_eq!(report.users, 2);

        let again = dispatcher
            .count_history(ScopeFilter::ChannelOnly, &loc, &[42], None, &history)
            .await
            .unwrap();
        assert_eq!(again, report);

        let col = CounterColumn::new(1).unwrap();
        let top = dispatcher.database().top_users(1, col, None).await.unwrap();
        assert_eq!(top.len(), 2);
        assert!(top.iter().all(|(_, count)| *count == 125));

        let windowed = dispatcher
            .count_history(ScopeFilter::ChannelOnly, &loc, &[42], Some(200), &history)
            .await
            .unwrap();
        assert_eq!(windowed.messages, 50);
    }

    #[tokio::test]
    async fn test_count_history_untracked_level_is_empty() {
        let dispatcher = dispatcher().await;
        dispatcher
            .apply_action(1, &Action::AddMetric { kind: MetricKind::MessageCount, scope: Scope::Guild })
            .await
            .unwrap();

        let history = FakeHistory([(42, vec![message(1, 10)])].into_iter().collect());
        let report = dispatcher
            .count_history(ScopeFilter::ChannelOnly, &location(None, 42), &[42], None, &history)
            .await
            .unwrap();
        assert_eq!(report, HistoryReport::default());
    }

    #[tokio::test]
    async fn test_apply_action_respects_max() {
        let dispatcher = dispatcher().await;
        let add = Action::AddMetric {
            kind: MetricKind::MessageCount,
            scope: Scope::Guild,
        };
        for expected in 1..=3 {
            let applied = dispatcher.apply_action(1, &add).await.unwrap();
            assert_eq!(applied, Applied::MetricAdded(CounterColumn::new(expected).unwrap()));
        }
        assert!(matches!(
            dispatcher.apply_action(1, &add).await,
            Err(StatError::MaxMetricsExceeded { max: 3 })
        ));

        let permitted = dispatcher.apply_action(1, &Action::AddConfigRole(7)).await.unwrap();
        assert_eq!(permitted, Applied::RolePermitted { role_id: 7, newly_added: true });
        let again = dispatcher.apply_action(1, &Action::AddConfigRole(7)).await.unwrap();
        assert_eq!(again, Applied::RolePermitted { role_id: 7, newly_added: false });
        assert!(matches!(
            dispatcher.apply_action(1, &Action::RemoveConfigRole(8)).await,
            Err(StatError::NotFound(_))
        ));
    }
}
