//! Decides which tracked metrics an incoming event applies to.

use crate::metrics::{CounterColumn, MetricDef, MetricKind, Scope};

/// Where an event happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLocation {
    pub guild_id: u64,
    pub category_id: Option<u64>,
    pub channel_id: u64,
}

/// What was observed at that location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Message,
    DiceRoll { sides: u64, result: u64 },
}

/// Restricts matching to exactly one scope level (used by history counting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFilter {
    GuildOnly,
    CategoryOnly,
    ChannelOnly,
}

fn kind_matches(kind: MetricKind, observation: Observation) -> bool {
    match (kind, observation) {
        (MetricKind::MessageCount, Observation::Message) => true,
        (MetricKind::DiceRoll { sides, target }, Observation::DiceRoll { sides: rolled_sides, result }) => {
            sides == rolled_sides && target == result
        }
        (MetricKind::MessageCount, Observation::DiceRoll { .. }) => false,
        (MetricKind::DiceRoll { .. }, Observation::Message) => false,
    }
}

fn scope_matches(scope: Scope, location: &EventLocation, filter: Option<ScopeFilter>) -> bool {
    match scope {
        Scope::Guild => !matches!(
            filter,
            Some(ScopeFilter::CategoryOnly) | Some(ScopeFilter::ChannelOnly)
        ),
        Scope::Category(id) => {
            location.category_id == Some(id)
                && !matches!(filter, Some(ScopeFilter::GuildOnly) | Some(ScopeFilter::ChannelOnly))
        }
        Scope::Channel(id) => {
            location.channel_id == id
                && !matches!(filter, Some(ScopeFilter::GuildOnly) | Some(ScopeFilter::CategoryOnly))
        }
    }
}

/// Whether `metric` should be updated for `observation` at `location`
pub fn matches(
    location: &EventLocation,
    metric: &MetricDef,
    observation: Observation,
    filter: Option<ScopeFilter>,
) -> bool {
    kind_matches(metric.kind, observation) && scope_matches(metric.scope, location, filter)
}

/// Columns of every matching metric. Empty means the event is untracked here.
pub fn matching_columns(
    location: &EventLocation,
    metrics: &[MetricDef],
    observation: Observation,
    filter: Option<ScopeFilter>,
) -> Vec<CounterColumn> {
    metrics
        .iter()
        .filter(|m| matches(location, m, observation, filter))
        .map(|m| m.column)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(n: usize) -> CounterColumn {
        CounterColumn::new(n).unwrap()
    }

    fn location(category_id: Option<u64>, channel_id: u64) -> EventLocation {
        EventLocation {
            guild_id: 1,
            category_id,
            channel_id,
        }
    }

    #[test]
    fn test_category_scope_respects_filter() {
        let metric = MetricDef::new(MetricKind::MessageCount, Scope::Category(77), col(1));
        let loc = location(Some(77), 500);

        assert!(matches(&loc, &metric, Observation::Message, None));
        assert!(matches(&loc, &metric, Observation::Message, Some(ScopeFilter::CategoryOnly)));
        assert!(!matches(&loc, &metric, Observation::Message, Some(ScopeFilter::ChannelOnly)));
        assert!(!matches(&loc, &metric, Observation::Message, Some(ScopeFilter::GuildOnly)));
        assert!(!matches(&location(Some(78), 500), &metric, Observation::Message, None));
        assert!(!matches(&location(None, 500), &metric, Observation::Message, None));
    }

    #[test]
    fn test_guild_scope_filters() {
        let metric = MetricDef::new(MetricKind::MessageCount, Scope::Guild, col(1));
        let loc = location(None, 5);

        assert!(matches(&loc, &metric, Observation::Message, None));
        assert!(matches(&loc, &metric, Observation::Message, Some(ScopeFilter::GuildOnly)));
        assert!(!matches(&loc, &metric, Observation::Message, Some(ScopeFilter::CategoryOnly)));
        assert!(!matches(&loc, &metric, Observation::Message, Some(ScopeFilter::ChannelOnly)));
    }

    #[test]
    fn test_channel_scope() {
        let metric = MetricDef::new(MetricKind::MessageCount, Scope::Channel(42), col(1));

        assert!(matches(&location(Some(3), 42), &metric, Observation::Message, None));
        assert!(matches(&location(Some(3), 42), &metric, Observation::Message, Some(ScopeFilter::ChannelOnly)));
        assert!(!matches(&location(Some(3), 42), &metric, Observation::Message, Some(ScopeFilter::CategoryOnly)));
        assert!(!matches(&location(Some(3), 43), &metric, Observation::Message, None));
    }

    #[test]
    fn test_dice_requires_exact_sides_and_target() {
        let metric = MetricDef::new(MetricKind::DiceRoll { sides: 6, target: 6 }, Scope::Guild, col(1));
        let loc = location(None, 1);

        assert!(matches(&loc, &metric, Observation::DiceRoll { sides: 6, result: 6 }, None));
        assert!(!matches(&loc, &metric, Observation::DiceRoll { sides: 6, result: 5 }, None));
        assert!(!matches(&loc, &metric, Observation::DiceRoll { sides: 20, result: 6 }, None));
        assert!(!matches(&loc, &metric, Observation::Message, None));
    }

    #[test]
    fn test_multiple_matches_returned() {
        let metrics = vec![
            MetricDef::new(MetricKind::MessageCount, Scope::Guild, col(1)),
            MetricDef::new(MetricKind::DiceRoll { sides: 20, target: 1 }, Scope::Guild, col(2)),
            MetricDef::new(MetricKind::MessageCount, Scope::Channel(42), col(3)),
        ];

        let cols = matching_columns(&location(None, 42), &metrics, Observation::Message, None);
        assert_eq!(cols, vec![col(1), col(3)]);

        let none = matching_columns(&location(None, 42), &metrics, Observation::Message, Some(ScopeFilter::CategoryOnly));
        assert!(none.is_empty());
    }
}
