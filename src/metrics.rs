//! # Feature: Metric Definitions
//!
//! Operator-defined stats tracked per guild, their scopes, and the dense
//! counter columns that hold each user's values.
//!
//! The persisted form is the JSON document stored in `guilds.stat_mapping`:
//! `{"Mapping": [{"Type", "Level", "LevelID"?, "DiceType"?, "Target"?, "StatCol"}]}`.

use crate::error::{StatError, StatResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Physical width of the per-user counter table (`stat1..stat10`)
pub const COUNTER_SLOTS: usize = 10;

/// Default number of stats a guild may track
pub const DEFAULT_MAX_METRICS: usize = 3;

/// Largest die accepted by the configuration workflow
pub const MAX_DIE_SIDES: u64 = 10_000_000_000;

const COLUMN_NAMES: [&str; COUNTER_SLOTS] = [
    "stat1", "stat2", "stat3", "stat4", "stat5", "stat6", "stat7", "stat8", "stat9", "stat10",
];

/// A validated 1-based counter column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CounterColumn(u8);

impl CounterColumn {
    /// Returns `None` outside `1..=COUNTER_SLOTS`
    pub fn new(index: usize) -> Option<Self> {
        if (1..=COUNTER_SLOTS).contains(&index) {
            Some(CounterColumn(index as u8))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// SQL column name for this slot
    pub fn name(self) -> &'static str {
        COLUMN_NAMES[self.index() - 1]
    }

    /// Parse the persisted `"stat<N>"` form
    pub fn parse(stat_col: &str) -> Option<Self> {
        stat_col
            .strip_prefix("stat")
            .and_then(|n| n.parse::<usize>().ok())
            .and_then(Self::new)
    }

    /// The column directly above this one, if any
    pub fn next(self) -> Option<Self> {
        Self::new(self.index() + 1)
    }
}

impl fmt::Display for CounterColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a metric counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    MessageCount,
    DiceRoll { sides: u64, target: u64 },
}

impl MetricKind {
    /// Build a dice metric, enforcing `sides >= 1` and `1 <= target <= sides`
    pub fn dice(sides: u64, target: u64) -> StatResult<Self> {
        if sides == 0 {
            return Err(StatError::InvalidInput(format!("{sides}")));
        }
        if target == 0 || target > sides {
            return Err(StatError::InvalidInput(format!("{target}")));
        }
        Ok(MetricKind::DiceRoll { sides, target })
    }
}

/// Where a metric applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Guild,
    Category(u64),
    Channel(u64),
}

/// One tracked stat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MappingEntry", into = "MappingEntry")]
pub struct MetricDef {
    pub kind: MetricKind,
    pub scope: Scope,
    pub column: CounterColumn,
}

impl MetricDef {
    pub fn new(kind: MetricKind, scope: Scope, column: CounterColumn) -> Self {
        MetricDef { kind, scope, column }
    }
}

/// Raw JSON shape of a mapping entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MappingEntry {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Level")]
    level: String,
    #[serde(rename = "LevelID", default, skip_serializing_if = "Option::is_none")]
    level_id: Option<u64>,
    #[serde(rename = "DiceType", default, skip_serializing_if = "Option::is_none")]
    dice_type: Option<u64>,
    #[serde(rename = "Target", default, skip_serializing_if = "Option::is_none")]
    target: Option<u64>,
    #[serde(rename = "StatCol")]
    stat_col: String,
}

impl TryFrom<MappingEntry> for MetricDef {
    type Error = String;

    fn try_from(entry: MappingEntry) -> Result<Self, Self::Error> {
        let kind = match entry.kind.as_str() {
            "total_messages" => MetricKind::MessageCount,
            "Dice" => {
                let sides = entry.dice_type.ok_or("Dice stat missing DiceType")?;
                let target = entry.target.ok_or("Dice stat missing Target")?;
                MetricKind::dice(sides, target).map_err(|e| e.to_string())?
            }
            other => return Err(format!("Unknown stat type: {other}")),
        };

        let scope = match entry.level.as_str() {
            "Guild" => Scope::Guild,
            "Category" => Scope::Category(entry.level_id.ok_or("Category stat missing LevelID")?),
            "Channel" => Scope::Channel(entry.level_id.ok_or("Channel stat missing LevelID")?),
            other => return Err(format!("Unknown stat level: {other}")),
        };

        let column = CounterColumn::parse(&entry.stat_col)
            .ok_or_else(|| format!("Invalid StatCol: {}", entry.stat_col))?;

        Ok(MetricDef { kind, scope, column })
    }
}

impl From<MetricDef> for MappingEntry {
    fn from(def: MetricDef) -> Self {
        let (kind, dice_type, target) = match def.kind {
            MetricKind::MessageCount => ("total_messages", None, None),
            MetricKind::DiceRoll { sides, target } => ("Dice", Some(sides), Some(target)),
        };
        let (level, level_id) = match def.scope {
            Scope::Guild => ("Guild", None),
            Scope::Category(id) => ("Category", Some(id)),
            Scope::Channel(id) => ("Channel", Some(id)),
        };
        MappingEntry {
            kind: kind.to_string(),
            level: level.to_string(),
            level_id,
            dice_type,
            target,
            stat_col: def.column.name().to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MappingDocument {
    #[serde(rename = "Mapping")]
    metrics: Vec<MetricDef>,
}

/// Parse the persisted stat mapping
pub fn decode_mapping(json: &str) -> StatResult<Vec<MetricDef>> {
    let document: MappingDocument = serde_json::from_str(json)?;
    Ok(document.metrics)
}

/// Serialize metrics into the persisted stat mapping
pub fn encode_mapping(metrics: &[MetricDef]) -> StatResult<String> {
    let document = MappingDocument {
        metrics: metrics.to_vec(),
    };
    Ok(serde_json::to_string(&document)?)
}

/// True when columns are exactly `{1..len}` with no gaps or duplicates
pub fn is_dense(metrics: &[MetricDef]) -> bool {
    let columns: BTreeSet<usize> = metrics.iter().map(|m| m.column.index()).collect();
    columns.len() == metrics.len() && columns.into_iter().eq(1..=metrics.len())
}

/// Per-guild bot configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildConfig {
    pub id: u64,
    pub command_prefix: String,
    pub config_roles: BTreeSet<u64>,
    pub default_metric: Option<CounterColumn>,
    pub metrics: Vec<MetricDef>,
}

impl GuildConfig {
    pub fn metric(&self, column: CounterColumn) -> Option<&MetricDef> {
        self.metrics.iter().find(|m| m.column == column)
    }
}

/// Parse the comma-separated `config_roles` column
pub fn parse_role_list(raw: &str) -> BTreeSet<u64> {
    raw.split(',')
        .filter_map(|v| v.trim().parse::<u64>().ok())
        .collect()
}

pub fn format_role_list(roles: &BTreeSet<u64>) -> String {
    roles
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// One user's counters within a guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCounters {
    pub user_id: u64,
    pub counters: [i64; COUNTER_SLOTS],
}

impl UserCounters {
    pub fn get(&self, column: CounterColumn) -> i64 {
        self.counters[column.index() - 1]
    }
}
