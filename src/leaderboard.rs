//! # Feature: Leaderboards
//!
//! Turns stored counters into ranked, human-readable boards and decides which
//! board a `/leaderboard` request refers to.

use crate::metrics::{CounterColumn, GuildConfig, MetricDef, MetricKind, Scope};
use futures::future::join_all;
use serenity::async_trait;
use std::collections::HashMap;

/// Rows shown by a leaderboard unless "show all" is requested
pub const LEADERBOARD_SIZE: usize = 10;

/// Display names for the categories and channels metrics can be scoped to
#[derive(Debug, Clone, Default)]
pub struct ScopeNames {
    pub categories: HashMap<u64, String>,
    pub channels: HashMap<u64, String>,
}

/// Human description of a metric, e.g. "6's rolled by d6 in Channel 'dice'"
pub fn describe_metric(metric: &MetricDef, names: &ScopeNames) -> String {
    let what = match metric.kind {
        MetricKind::MessageCount => "Total messages".to_string(),
        MetricKind::DiceRoll { sides, target } => format!("{target}'s rolled by d{sides}"),
    };

    let lookup = |map: &HashMap<u64, String>, id: u64| map.get(&id).cloned().unwrap_or_default();
    let where_ = match metric.scope {
        Scope::Guild => "server-wide".to_string(),
        Scope::Category(id) => format!("in Category '{}'", lookup(&names.categories, id)),
        Scope::Channel(id) => format!("in Channel '{}'", lookup(&names.channels, id)),
    };

    format!("{what} {where_}")
}

/// Numbered list of tracked metrics for `/stats`
pub fn tracked_metrics_text(metrics: &[MetricDef], names: &ScopeNames) -> String {
    if metrics.is_empty() {
        return "There are no stats currently being tracked. Try /config to start tracking.".to_string();
    }

    let mut ordered: Vec<&MetricDef> = metrics.iter().collect();
    ordered.sort_by_key(|m| m.column);

    ordered
        .iter()
        .map(|m| format!("\n\t**{}.** *{}*", m.column, describe_metric(m, names)))
        .collect()
}

/// What a leaderboard request resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderboardRequest {
    Show(CounterColumn),
    /// No explicit or default board; the user must choose
    Pick(Vec<CounterColumn>),
    Invalid(i64),
    NoMetrics,
}

/// Resolve an optional board number against the guild's metrics.
///
/// Explicit number, then the default pointer, then the only metric, then a picker.
pub fn resolve_request(requested: Option<i64>, config: &GuildConfig) -> LeaderboardRequest {
    if let Some(number) = requested {
        return usize::try_from(number)
            .ok()
            .and_then(CounterColumn::new)
            .filter(|c| config.metric(*c).is_some())
            .map(LeaderboardRequest::Show)
            .unwrap_or(LeaderboardRequest::Invalid(number));
    }

    if let Some(default) = config.default_metric.filter(|c| config.metric(*c).is_some()) {
        return LeaderboardRequest::Show(default);
    }

    match config.metrics.len() {
        0 => LeaderboardRequest::NoMetrics,
        1 => LeaderboardRequest::Show(config.metrics[0].column),
        _ => {
            let mut columns: Vec<CounterColumn> = config.metrics.iter().map(|m| m.column).collect();
            columns.sort();
            LeaderboardRequest::Pick(columns)
        }
    }
}

/// Ranked lines, "**1.** name - 3". Users that can no longer be resolved show as DELETED.
pub fn render_rows(rows: &[(u64, i64)], user_names: &HashMap<u64, String>) -> String {
    rows.iter()
        .enumerate()
        .map(|(i, (user_id, value))| {
            let name = user_names.get(user_id).map(String::as_str).unwrap_or("DELETED");
            format!("**{}.** {} - {}\n", i + 1, name, value)
        })
        .collect()
}

/// Resolves display names for ranked users
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `None` once the account itself is gone. Leaving the guild does not count.
    async fn user_name(&self, user_id: u64) -> Option<String>;
}

/// Ranked board text with every listed user looked up concurrently
pub async fn render_board(rows: &[(u64, i64)], users: &dyn UserDirectory) -> String {
    let names = join_all(rows.iter().map(|(user_id, _)| users.user_name(*user_id))).await;
    let user_names: HashMap<u64, String> = rows
        .iter()
        .zip(names)
        .filter_map(|((user_id, _), name)| name.map(|n| (*user_id, n)))
        .collect();
    render_rows(rows, &user_names)
}

/// A guild emote that still exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownEmote {
    pub name: String,
    pub animated: bool,
}

impl KnownEmote {
    /// Inline markup, `<a:name:id>` for animated emotes
    pub fn markup(&self, emote_id: u64) -> String {
        let prefix = if self.animated { "a" } else { "" };
        format!("<{prefix}:{}:{emote_id}>", self.name)
    }
}

/// Ranked emote lines, rendering still-existing emotes inline
pub fn render_emote_rows(rows: &[(u64, i64)], emotes: &HashMap<u64, KnownEmote>) -> String {
    rows.iter()
        .enumerate()
        .map(|(i, (emote_id, count))| match emotes.get(emote_id) {
            Some(emote) => format!(
                "**{}.** {} {} - {count}\n",
                i + 1,
                emote.markup(*emote_id),
                emote.name
            ),
            None => format!("**{}.** DELETED - {count}\n", i + 1),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn col(n: usize) -> CounterColumn {
        CounterColumn::new(n).unwrap()
    }

    fn config(metrics: Vec<MetricDef>, default_metric: Option<CounterColumn>) -> GuildConfig {
        GuildConfig {
            id: 1,
            command_prefix: "!".to_string(),
            config_roles: BTreeSet::new(),
            default_metric,
            metrics,
        }
    }

    fn messages(n: usize) -> MetricDef {
        MetricDef::new(MetricKind::MessageCount, Scope::Guild, col(n))
    }

    #[test]
    fn test_describe_metric() {
        let mut names = ScopeNames::default();
        names.channels.insert(42, "dice".to_string());
        names.categories.insert(77, "games".to_string());

        assert_eq!(describe_metric(&messages(1), &names), "Total messages server-wide");
        assert_eq!(
            describe_metric(
                &MetricDef::new(MetricKind::DiceRoll { sides: 6, target: 6 }, Scope::Channel(42), col(1)),
                &names
            ),
            "6's rolled by d6 in Channel 'dice'"
        );
        assert_eq!(
            describe_metric(&MetricDef::new(MetricKind::MessageCount, Scope::Category(77), col(1)), &names),
            "Total messages in Category 'games'"
        );
    }

    #[test]
    fn test_tracked_metrics_text() {
        let names = ScopeNames::default();
        assert!(tracked_metrics_text(&[], &names).contains("no stats"));

        let text = tracked_metrics_text(&[messages(2), messages(1)], &names);
        let first = text.find("**1.**").unwrap();
        let second = text.find("**2.**").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_resolve_request_order() {
        let two = config(vec![messages(1), messages(2)], Some(col(2)));
        assert_eq!(resolve_request(Some(1), &two), LeaderboardRequest::Show(col(1)));
        assert_eq!(resolve_request(Some(3), &two), LeaderboardRequest::Invalid(3));
        assert_eq!(resolve_request(Some(-1), &two), LeaderboardRequest::Invalid(-1));
        assert_eq!(resolve_request(None, &two), LeaderboardRequest::Show(col(2)));

        let no_default = config(vec![messages(1), messages(2)], None);
        assert_eq!(
            resolve_request(None, &no_default),
            LeaderboardRequest::Pick(vec![col(1), col(2)])
        );

        let single = config(vec![messages(1)], None);
        assert_eq!(resolve_request(None, &single), LeaderboardRequest::Show(col(1)));

        assert_eq!(resolve_request(None, &config(vec![], None)), LeaderboardRequest::NoMetrics);
    }

    #[test]
    fn test_render_rows() {
        let mut names = HashMap::new();
        names.insert(10, "alice".to_string());

        let text = render_rows(&[(10, 5), (11, 3)], &names);
        assert_eq!(text, "**1.** alice - 5\n**2.** DELETED - 3\n");
        assert_eq!(render_rows(&[], &names), "");
    }

    struct Accounts(HashMap<u64, String>);

    #[async_trait]
    impl UserDirectory for Accounts {
        async fn user_name(&self, user_id: u64) -> Option<String> {
            self.0.get(&user_id).cloned()
        }
    }

    #[tokio::test]
    async fn test_render_board_keeps_former_members() {
        // 11 left the guild but still has an account; 12 deleted theirs
        let mut accounts = HashMap::new();
        accounts.insert(10, "alice".to_string());
        accounts.insert(11, "bob".to_string());

        let text = render_board(&[(10, 7), (11, 4), (12, 1)], &Accounts(accounts)).await;
        assert_eq!(text, "**1.** alice - 7\n**2.** bob - 4\n**3.** DELETED - 1\n");
    }

    #[test]
    fn test_render_emote_rows() {
        let mut emotes = HashMap::new();
        emotes.insert(
            99,
            KnownEmote {
                name: "pog".to_string(),
                animated: false,
            },
        );
        emotes.insert(
            97,
            KnownEmote {
                name: "dance".to_string(),
                animated: true,
            },
        );

        let text = render_emote_rows(&[(99, 4), (97, 2), (98, 1)], &emotes);
        assert_eq!(
            text,
            "**1.** <:pog:99> pog - 4\n**2.** <a:dance:97> dance - 2\n**3.** DELETED - 1\n"
        );
    }
}
