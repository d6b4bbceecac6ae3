use crate::error::{StatError, StatResult};
use crate::metrics::{
    decode_mapping, encode_mapping, format_role_list, parse_role_list, CounterColumn, GuildConfig,
    MetricDef, MetricKind, Scope, UserCounters, COUNTER_SLOTS,
};
use log::{error, info};
use sqlite::{Connection, State};
use std::sync::Arc;
use tokio::sync::Mutex;

/// How a counter should change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUpdate {
    Increment,
    Set(i64),
}

#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

impl Database {
    pub async fn new(database_path: &str) -> StatResult<Self> {
        let connection = sqlite::open(database_path)?;
        let db = Database {
            connection: Arc::new(Mutex::new(connection)),
        };

        db.init_tables().await?;
        info!("Database initialized at: {database_path}");
        Ok(db)
    }

    async fn init_tables(&self) -> StatResult<()> {
        let conn = self.connection.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS guilds (
                id INTEGER NOT NULL PRIMARY KEY,
                command_prefix TEXT NOT NULL DEFAULT '!',
                config_roles TEXT DEFAULT NULL,
                default_leaderboard INTEGER DEFAULT NULL,
                stat_mapping TEXT NOT NULL DEFAULT '{\"Mapping\":[]}',
                created_date DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_date DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS guilds_users (
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                stat1 INTEGER NOT NULL DEFAULT 0,
                stat2 INTEGER NOT NULL DEFAULT 0,
                stat3 INTEGER NOT NULL DEFAULT 0,
                stat4 INTEGER NOT NULL DEFAULT 0,
                stat5 INTEGER NOT NULL DEFAULT 0,
                stat6 INTEGER NOT NULL DEFAULT 0,
                stat7 INTEGER NOT NULL DEFAULT 0,
                stat8 INTEGER NOT NULL DEFAULT 0,
                stat9 INTEGER NOT NULL DEFAULT 0,
                stat10 INTEGER NOT NULL DEFAULT 0,
                created_date DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_date DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (guild_id) REFERENCES guilds(id),
                PRIMARY KEY (guild_id, user_id)
            )",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS guilds_emotes (
                guild_id INTEGER NOT NULL,
                emote_id INTEGER NOT NULL,
                emote_count INTEGER NOT NULL DEFAULT 0,
                created_date DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_date DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (guild_id) REFERENCES guilds(id),
                PRIMARY KEY (guild_id, emote_id)
            )",
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_emote_guild
             ON guilds_emotes(guild_id, emote_count)",
        )?;

        // Storage-maintained last-updated timestamps
        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS update_guilds_updated_date AFTER UPDATE ON guilds
             BEGIN
                 UPDATE guilds SET updated_date = CURRENT_TIMESTAMP WHERE id = old.id;
             END",
        )?;

        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS update_guilds_users_updated_date AFTER UPDATE ON guilds_users
             BEGIN
                 UPDATE guilds_users SET updated_date = CURRENT_TIMESTAMP
                 WHERE guild_id = old.guild_id AND user_id = old.user_id;
             END",
        )?;

        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS update_guilds_emotes_updated_date AFTER UPDATE ON guilds_emotes
             BEGIN
                 UPDATE guilds_emotes SET updated_date = CURRENT_TIMESTAMP
                 WHERE guild_id = old.guild_id AND emote_id = old.emote_id;
             END",
        )?;

        Ok(())
    }

    // Guild Methods

    /// Load a guild's configuration, inserting a default row for unseen guilds
    pub async fn get_or_create_guild(&self, guild_id: u64) -> StatResult<GuildConfig> {
        let conn = self.connection.lock().await;
        {
            let mut statement =
                conn.prepare("INSERT INTO guilds (id) VALUES (?) ON CONFLICT(id) DO NOTHING")?;
            statement.bind((1, guild_id as i64))?;
            statement.next()?;
        }

        read_guild(&conn, guild_id)?.ok_or_else(|| {
            StatError::NotFound(format!("guild {guild_id} missing after initialization"))
        })
    }

    pub async fn guild_config(&self, guild_id: u64) -> StatResult<GuildConfig> {
        let conn = self.connection.lock().await;
        read_guild(&conn, guild_id)?.ok_or_else(|| StatError::NotFound(format!("guild {guild_id}")))
    }

    /// Every guild with a stored configuration
    pub async fn guild_ids(&self) -> StatResult<Vec<u64>> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("SELECT id FROM guilds ORDER BY id")?;

        let mut ids = Vec::new();
        while let Ok(State::Row) = statement.next() {
            ids.push(statement.read::<i64, _>(0)? as u64);
        }
        Ok(ids)
    }

    // Metric Definition Methods

    /// Append a metric at the next dense column
    pub async fn append_metric(
        &self,
        guild_id: u64,
        kind: MetricKind,
        scope: Scope,
        max_metrics: usize,
    ) -> StatResult<CounterColumn> {
        let conn = self.connection.lock().await;

        let column = in_transaction(&conn, |conn| {
            let mut config = ensure_guild(conn, guild_id)?;
            let max = max_metrics.min(COUNTER_SLOTS);
            if config.metrics.len() >= max {
                return Err(StatError::MaxMetricsExceeded { max });
            }

            let column = CounterColumn::new(config.metrics.len() + 1)
                .ok_or(StatError::MaxMetricsExceeded { max })?;
            config.metrics.push(MetricDef::new(kind, scope, column));

            write_mapping(conn, guild_id, &config.metrics)?;
            zero_column(conn, guild_id, column)?;
            Ok(column)
        })?;

        info!("Guild {guild_id} now tracks stat {column}: {kind:?} {scope:?}");
        Ok(column)
    }

    /// Remove a metric and close the gap it leaves.
    ///
    /// Renumbers the remaining definitions, shifts every user's counters down,
    /// zeroes the freed highest column and adjusts the default pointer, all in
    /// one transaction.
    pub async fn delete_metric(&self, guild_id: u64, column: CounterColumn) -> StatResult<()> {
        let conn = self.connection.lock().await;

        in_transaction(&conn, |conn| {
            let mut config = read_guild(conn, guild_id)?
                .ok_or_else(|| StatError::NotFound(format!("guild {guild_id}")))?;

            let position = config
                .metrics
                .iter()
                .position(|m| m.column == column)
                .ok_or_else(|| StatError::NotFound(format!("stat {column} in guild {guild_id}")))?;

            let count = config.metrics.len();
            config.metrics.remove(position);
            for metric in config.metrics.iter_mut() {
                if metric.column > column {
                    metric.column = CounterColumn::new(metric.column.index() - 1)
                        .ok_or_else(|| StatError::NotFound(format!("stat below {}", metric.column)))?;
                }
            }

            let new_default = shifted_default(config.default_metric, column);

            write_mapping(conn, guild_id, &config.metrics)?;
            write_default(conn, guild_id, new_default)?;

            for index in column.index()..count {
                let (Some(target), Some(source)) =
                    (CounterColumn::new(index), CounterColumn::new(index + 1))
                else {
                    continue;
                };
                let sql = format!(
                    "UPDATE guilds_users SET {} = {} WHERE guild_id = ?",
                    target.name(),
                    source.name()
                );
                let mut statement = conn.prepare(sql)?;
                statement.bind((1, guild_id as i64))?;
                statement.next()?;
            }

            if let Some(highest) = CounterColumn::new(count) {
                zero_column(conn, guild_id, highest)?;
            }

            Ok(())
        })?;

        info!("Deleted stat {column} for guild {guild_id} and realigned counters");
        Ok(())
    }

    /// Point the default leaderboard at an existing metric, or clear it
    pub async fn set_default_metric(
        &self,
        guild_id: u64,
        column: Option<CounterColumn>,
    ) -> StatResult<()> {
        let conn = self.connection.lock().await;
        let config = ensure_guild(&conn, guild_id)?;

        if let Some(column) = column {
            if config.metric(column).is_none() {
                return Err(StatError::NotFound(format!("stat {column} in guild {guild_id}")));
            }
        }

        write_default(&conn, guild_id, column)?;
        info!("Default leaderboard for guild {guild_id} set to {column:?}");
        Ok(())
    }

    // Config Role Methods

    /// Returns false when the role was already permitted
    pub async fn add_config_role(&self, guild_id: u64, role_id: u64) -> StatResult<bool> {
        let conn = self.connection.lock().await;
        let mut config = ensure_guild(&conn, guild_id)?;

        if !config.config_roles.insert(role_id) {
            return Ok(false);
        }
        write_roles(&conn, guild_id, &config.config_roles)?;
        Ok(true)
    }

    pub async fn remove_config_role(&self, guild_id: u64, role_id: u64) -> StatResult<()> {
        let conn = self.connection.lock().await;
        let mut config = ensure_guild(&conn, guild_id)?;

        if !config.config_roles.remove(&role_id) {
            return Err(StatError::NotFound(format!("config role {role_id}")));
        }
        write_roles(&conn, guild_id, &config.config_roles)
    }

    // Counter Methods

    /// Upsert a user's counter row and increment or overwrite one column.
    ///
    /// A single `INSERT ... ON CONFLICT DO UPDATE` statement, so concurrent
    /// increments of the same key never lose updates.
    pub async fn increment_or_set(
        &self,
        guild_id: u64,
        user_id: u64,
        column: CounterColumn,
        update: CounterUpdate,
    ) -> StatResult<()> {
        let conn = self.connection.lock().await;
        let name = column.name();

        let (sql, value) = match update {
            CounterUpdate::Increment => (
                format!(
                    "INSERT INTO guilds_users (guild_id, user_id, {name}) VALUES (?, ?, ?)
                     ON CONFLICT(guild_id, user_id) DO UPDATE SET {name} = {name} + 1"
                ),
                1,
            ),
            CounterUpdate::Set(value) => (
                format!(
                    "INSERT INTO guilds_users (guild_id, user_id, {name}) VALUES (?, ?, ?)
                     ON CONFLICT(guild_id, user_id) DO UPDATE SET {name} = excluded.{name}"
                ),
                value,
            ),
        };

        let mut statement = conn.prepare(sql)?;
        statement.bind((1, guild_id as i64))?;
        statement.bind((2, user_id as i64))?;
        statement.bind((3, value))?;
        statement.next()?;
        Ok(())
    }

    pub async fn user_counters(&self, guild_id: u64, user_id: u64) -> StatResult<Option<UserCounters>> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "SELECT stat1, stat2, stat3, stat4, stat5, stat6, stat7, stat8, stat9, stat10
             FROM guilds_users WHERE guild_id = ? AND user_id = ?",
        )?;
        statement.bind((1, guild_id as i64))?;
        statement.bind((2, user_id as i64))?;

        if let Ok(State::Row) = statement.next() {
            let mut counters = [0i64; COUNTER_SLOTS];
            for (i, counter) in counters.iter_mut().enumerate() {
                *counter = statement.read::<i64, _>(i)?;
            }
            Ok(Some(UserCounters { user_id, counters }))
        } else {
            Ok(None)
        }
    }

    // Leaderboard Methods

    /// Users ranked by one counter, highest first. `None` returns every row.
    pub async fn top_users(
        &self,
        guild_id: u64,
        column: CounterColumn,
        limit: Option<usize>,
    ) -> StatResult<Vec<(u64, i64)>> {
        let conn = self.connection.lock().await;
        let name = column.name();
        let mut statement = conn.prepare(format!(
            "SELECT user_id, {name} FROM guilds_users
             WHERE guild_id = ?
             ORDER BY {name} DESC, rowid ASC
             LIMIT ?"
        ))?;
        statement.bind((1, guild_id as i64))?;
        statement.bind((2, sql_limit(limit)))?;

        let mut rows = Vec::new();
        while let Ok(State::Row) = statement.next() {
            rows.push((
                statement.read::<i64, _>(0)? as u64,
                statement.read::<i64, _>(1)?,
            ));
        }
        Ok(rows)
    }

    // Emote Methods

    /// Adjust an emote's usage count by `delta`.
    ///
    /// A removal with no earlier add (possible after a bulk backfill) leaves
    /// the count negative.
    pub async fn increment_emote(&self, guild_id: u64, emote_id: u64, delta: i64) -> StatResult<()> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "INSERT INTO guilds_emotes (guild_id, emote_id, emote_count) VALUES (?, ?, ?)
             ON CONFLICT(guild_id, emote_id) DO UPDATE SET emote_count = emote_count + excluded.emote_count",
        )?;
        statement.bind((1, guild_id as i64))?;
        statement.bind((2, emote_id as i64))?;
        statement.bind((3, delta))?;
        statement.next()?;
        Ok(())
    }

    pub async fn top_emotes(&self, guild_id: u64, limit: Option<usize>) -> StatResult<Vec<(u64, i64)>> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "SELECT emote_id, emote_count FROM guilds_emotes
             WHERE guild_id = ?
             ORDER BY emote_count DESC, rowid ASC
             LIMIT ?",
        )?;
        statement.bind((1, guild_id as i64))?;
        statement.bind((2, sql_limit(limit)))?;

        let mut rows = Vec::new();
        while let Ok(State::Row) = statement.next() {
            rows.push((
                statement.read::<i64, _>(0)? as u64,
                statement.read::<i64, _>(1)?,
            ));
        }
        Ok(rows)
    }
}

/// Default pointer after deleting `deleted`, computed from the pre-delete value
pub fn shifted_default(
    current: Option<CounterColumn>,
    deleted: CounterColumn,
) -> Option<CounterColumn> {
    match current {
        Some(default) if default == deleted => None,
        Some(default) if default > deleted => CounterColumn::new(default.index() - 1),
        other => other,
    }
}

// SQLite treats a negative LIMIT as unbounded
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(-1)
}

fn in_transaction<T>(
    conn: &Connection,
    work: impl FnOnce(&Connection) -> StatResult<T>,
) -> StatResult<T> {
    conn.execute("BEGIN IMMEDIATE")?;

    let result = work(conn).and_then(|value| {
        conn.execute("COMMIT")?;
        Ok(value)
    });

    if result.is_err() {
        if let Err(e) = conn.execute("ROLLBACK") {
            error!("Failed to roll back transaction: {e}");
        }
    }
    result
}

fn read_guild(conn: &Connection, guild_id: u64) -> StatResult<Option<GuildConfig>> {
    let mut statement = conn.prepare(
        "SELECT command_prefix, config_roles, default_leaderboard, stat_mapping
         FROM guilds WHERE id = ?",
    )?;
    statement.bind((1, guild_id as i64))?;

    if let Ok(State::Row) = statement.next() {
        let command_prefix = statement.read::<String, _>(0)?;
        let config_roles = statement
            .read::<Option<String>, _>(1)?
            .map(|raw| parse_role_list(&raw))
            .unwrap_or_default();
        let default_metric = statement
            .read::<Option<i64>, _>(2)?
            .and_then(|n| usize::try_from(n).ok())
            .and_then(CounterColumn::new);
        let metrics = decode_mapping(&statement.read::<String, _>(3)?)?;

        Ok(Some(GuildConfig {
            id: guild_id,
            command_prefix,
            config_roles,
            default_metric,
            metrics,
        }))
    } else {
        Ok(None)
    }
}

fn ensure_guild(conn: &Connection, guild_id: u64) -> StatResult<GuildConfig> {
    {
        let mut statement =
            conn.prepare("INSERT INTO guilds (id) VALUES (?) ON CONFLICT(id) DO NOTHING")?;
        statement.bind((1, guild_id as i64))?;
        statement.next()?;
    }
    read_guild(conn, guild_id)?.ok_or_else(|| StatError::NotFound(format!("guild {guild_id}")))
}

fn write_mapping(conn: &Connection, guild_id: u64, metrics: &[MetricDef]) -> StatResult<()> {
    let mapping = encode_mapping(metrics)?;
    let mut statement = conn.prepare("UPDATE guilds SET stat_mapping = ? WHERE id = ?")?;
    statement.bind((1, mapping.as_str()))?;
    statement.bind((2, guild_id as i64))?;
    statement.next()?;
    Ok(())
}

fn write_default(conn: &Connection, guild_id: u64, column: Option<CounterColumn>) -> StatResult<()> {
    let mut statement = match column {
        Some(column) => {
            let mut statement =
                conn.prepare("UPDATE guilds SET default_leaderboard = ? WHERE id = ?")?;
            statement.bind((1, column.index() as i64))?;
            statement.bind((2, guild_id as i64))?;
            statement
        }
        None => {
            let mut statement =
                conn.prepare("UPDATE guilds SET default_leaderboard = NULL WHERE id = ?")?;
            statement.bind((1, guild_id as i64))?;
            statement
        }
    };
    statement.next()?;
    Ok(())
}

fn write_roles(conn: &Connection, guild_id: u64, roles: &std::collections::BTreeSet<u64>) -> StatResult<()> {
    let mut statement = conn.prepare("UPDATE guilds SET config_roles = ? WHERE id = ?")?;
    let formatted = format_role_list(roles);
    statement.bind((1, formatted.as_str()))?;
    statement.bind((2, guild_id as i64))?;
    statement.next()?;
    Ok(())
}

fn zero_column(conn: &Connection, guild_id: u64, column: CounterColumn) -> StatResult<()> {
    let mut statement = conn.prepare(format!(
        "UPDATE guilds_users SET {} = 0 WHERE guild_id = ?",
        column.name()
    ))?;
    statement.bind((1, guild_id as i64))?;
    statement.next()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(n: usize) -> CounterColumn {
        CounterColumn::new(n).unwrap()
    }

    #[test]
    fn test_shifted_default() {
        assert_eq!(shifted_default(Some(col(2)), col(2)), None);
        assert_eq!(shifted_default(Some(col(3)), col(2)), Some(col(2)));
        assert_eq!(shifted_default(Some(col(1)), col(2)), Some(col(1)));
        assert_eq!(shifted_default(None, col(1)), None);
    }

    #[tokio::test]
    async fn test_failed_delete_rolls_back() {
        let db = Database::new(":memory:").await.unwrap();
        for _ in 0..3 {
            db.append_metric(1, MetricKind::MessageCount, Scope::Guild, 3)
                .await
                .unwrap();
        }
        db.set_default_metric(1, Some(col(3))).await.unwrap();
        let before = db.guild_config(1).await.unwrap();

        // Counter shifting fails once the mapping has already been rewritten
        db.connection
            .lock()
            .await
            .execute("DROP TABLE guilds_users")
            .unwrap();

        let result = db.delete_metric(1, col(2)).await;
        assert!(matches!(result, Err(StatError::Persistence(_))));

        let after = db.guild_config(1).await.unwrap();
        assert_eq!(after.metrics, before.metrics);
        assert_eq!(after.metrics.len(), 3);
        assert_eq!(after.default_metric, Some(col(3)));
    }

    #[test]
    fn test_sql_limit() {
        assert_eq!(sql_limit(Some(10)), 10);
        assert_eq!(sql_limit(None), -1);
    }
}
