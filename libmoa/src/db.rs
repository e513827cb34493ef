//! Database operations for moa

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::bridge::{Bridge, InstagramAccount, MastodonAccount, TwitterAccount};
use crate::error::{DbError, Result};
use crate::host::MastodonHost;
use crate::settings::Settings;
use crate::stats::{BridgeStat, WorkerStat};
use crate::types::{Mapping, Network};

const BRIDGE_COLUMNS: &str = r#"
    b.id, b.worker_id, b.enabled, b.settings_id, s.body AS settings_body,
    b.mastodon_access_code, b.mastodon_account_id, b.mastodon_user, b.mastodon_host_id,
    b.mastodon_last_id,
    b.twitter_oauth_token, b.twitter_oauth_secret, b.twitter_handle, b.twitter_last_id,
    b.instagram_access_code, b.instagram_account_id, b.instagram_handle, b.instagram_last_id,
    b.updated_at
"#;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (and create if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file on first use
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations on it
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // Settings

    pub async fn create_settings(&self, settings: &Settings) -> Result<i64> {
        let body = encode_settings(settings)?;

        let result = sqlx::query("INSERT INTO settings (body) VALUES (?)")
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_settings(&self, settings_id: i64) -> Result<Option<Settings>> {
        let row = sqlx::query("SELECT body FROM settings WHERE id = ?")
            .bind(settings_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(|r| decode_settings(&r.get::<String, _>("body")))
            .transpose()
    }

    pub async fn update_settings(&self, settings_id: i64, settings: &Settings) -> Result<()> {
        sqlx::query("UPDATE settings SET body = ? WHERE id = ?")
            .bind(encode_settings(settings)?)
            .bind(settings_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // Hosts

    pub async fn create_host(&self, host: &MastodonHost) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO mastodon_hosts (hostname, client_id, client_secret, defer_until, defer_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&host.hostname)
        .bind(&host.client_id)
        .bind(&host.client_secret)
        .bind(host.defer_until.map(|t| t.timestamp()))
        .bind(host.defer_count as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_host(&self, host_id: i64) -> Result<Option<MastodonHost>> {
        let row = sqlx::query(
            r#"
            SELECT id, hostname, client_id, client_secret, defer_until, defer_count
            FROM mastodon_hosts WHERE id = ?
            "#,
        )
        .bind(host_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| MastodonHost {
            id: r.get("id"),
            hostname: r.get("hostname"),
            client_id: r.get("client_id"),
            client_secret: r.get("client_secret"),
            defer_until: r
                .get::<Option<i64>, _>("defer_until")
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            defer_count: r.get::<i64, _>("defer_count").max(0) as u32,
        }))
    }

    /// Persist circuit breaker state; concurrent workers simply overwrite each other
    pub async fn save_host_state(&self, host: &MastodonHost) -> Result<()> {
        sqlx::query("UPDATE mastodon_hosts SET defer_until = ?, defer_count = ? WHERE id = ?")
            .bind(host.defer_until.map(|t| t.timestamp()))
            .bind(host.defer_count as i64)
            .bind(host.id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // Bridges

    /// Store a new bridge together with its settings and return its id
    pub async fn create_bridge(&self, bridge: &Bridge) -> Result<i64> {
        let settings_id = self.create_settings(&bridge.settings).await?;
        let mastodon = bridge.mastodon.as_ref();
        let twitter = bridge.twitter.as_ref();
        let instagram = bridge.instagram.as_ref();

        let result = sqlx::query(
            r#"
            INSERT INTO bridges (
                worker_id, enabled, settings_id,
                mastodon_access_code, mastodon_account_id, mastodon_user, mastodon_host_id, mastodon_last_id,
                twitter_oauth_token, twitter_oauth_secret, twitter_handle, twitter_last_id,
                instagram_access_code, instagram_account_id, instagram_handle, instagram_last_id,
                created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(bridge.worker_id)
        .bind(bridge.enabled)
        .bind(settings_id)
        .bind(mastodon.map(|m| m.access_code.as_str()))
        .bind(mastodon.map(|m| m.account_id.as_str()))
        .bind(mastodon.map(|m| m.user.as_str()))
        .bind(mastodon.map(|m| m.host_id))
        .bind(bridge.mastodon_last_id)
        .bind(twitter.map(|t| t.oauth_token.as_str()))
        .bind(twitter.map(|t| t.oauth_secret.as_str()))
        .bind(twitter.map(|t| t.handle.as_str()))
        .bind(bridge.twitter_last_id)
        .bind(instagram.map(|i| i.access_code.as_str()))
        .bind(instagram.map(|i| i.account_id.as_str()))
        .bind(instagram.map(|i| i.handle.as_str()))
        .bind(bridge.instagram_last_id)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_bridge(&self, bridge_id: i64) -> Result<Option<Bridge>> {
        let query = format!(
            "SELECT {} FROM bridges b JOIN settings s ON s.id = b.settings_id WHERE b.id = ?",
            BRIDGE_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(bridge_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(|r| bridge_from_row(&r)).transpose()
    }

    /// Enabled bridges assigned to a worker shard, oldest first
    pub async fn enabled_bridges(&self, worker_id: i64) -> Result<Vec<Bridge>> {
        let query = format!(
            r#"
            SELECT {} FROM bridges b JOIN settings s ON s.id = b.settings_id
            WHERE b.worker_id = ? AND b.enabled = 1
            ORDER BY b.id ASC
            "#,
            BRIDGE_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(worker_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(bridge_from_row).collect()
    }

    /// Persist credentials, watermarks and the enabled flag
    pub async fn update_bridge(&self, bridge: &Bridge) -> Result<()> {
        let mastodon = bridge.mastodon.as_ref();
        let twitter = bridge.twitter.as_ref();
        let instagram = bridge.instagram.as_ref();

        sqlx::query(
            r#"
            UPDATE bridges SET
                enabled = ?,
                mastodon_access_code = ?, mastodon_account_id = ?, mastodon_user = ?,
                mastodon_host_id = ?, mastodon_last_id = ?,
                twitter_oauth_token = ?, twitter_oauth_secret = ?, twitter_handle = ?,
                twitter_last_id = ?,
                instagram_access_code = ?, instagram_account_id = ?, instagram_handle = ?,
                instagram_last_id = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(bridge.enabled)
        .bind(mastodon.map(|m| m.access_code.as_str()))
        .bind(mastodon.map(|m| m.account_id.as_str()))
        .bind(mastodon.map(|m| m.user.as_str()))
        .bind(mastodon.map(|m| m.host_id))
        .bind(bridge.mastodon_last_id)
        .bind(twitter.map(|t| t.oauth_token.as_str()))
        .bind(twitter.map(|t| t.oauth_secret.as_str()))
        .bind(twitter.map(|t| t.handle.as_str()))
        .bind(bridge.twitter_last_id)
        .bind(instagram.map(|i| i.access_code.as_str()))
        .bind(instagram.map(|i| i.account_id.as_str()))
        .bind(instagram.map(|i| i.handle.as_str()))
        .bind(bridge.instagram_last_id)
        .bind(bridge.updated_at.map(|t| t.timestamp()))
        .bind(bridge.id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Disable every bridge pointed at a host, clearing their Mastodon credentials
    pub async fn disable_bridges_on_host(&self, host_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE bridges SET
                enabled = 0,
                mastodon_access_code = NULL,
                updated_at = ?
            WHERE mastodon_host_id = ? AND enabled = 1
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(host_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    // Mappings

    pub async fn record_mapping(&self, mapping: &Mapping) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO mappings (source_network, source_id, destination_network, destination_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(mapping.source_network.as_str())
        .bind(&mapping.source_id)
        .bind(mapping.destination_network.as_str())
        .bind(&mapping.destination_id)
        .bind(mapping.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    /// Most recently created mapping for a source item on a destination network
    ///
    /// Rows with the same timestamp are ordered by insertion.
    pub async fn latest_mapping(
        &self,
        source_network: Network,
        source_id: &str,
        destination_network: Network,
    ) -> Result<Option<Mapping>> {
        let row = sqlx::query(
            r#"
            SELECT id, source_network, source_id, destination_network, destination_id, created_at
            FROM mappings
            WHERE source_network = ? AND source_id = ? AND destination_network = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(source_network.as_str())
        .bind(source_id)
        .bind(destination_network.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| mapping_from_row(&r)).transpose()
    }

    /// Every mapping for a source item, newest first
    pub async fn mappings_for_source(
        &self,
        source_network: Network,
        source_id: &str,
    ) -> Result<Vec<Mapping>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_network, source_id, destination_network, destination_id, created_at
            FROM mappings
            WHERE source_network = ? AND source_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(source_network.as_str())
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(mapping_from_row).collect()
    }

    // Stats

    pub async fn record_worker_stat(&self, stat: &WorkerStat) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO worker_stats (worker_id, toots, tweets, instas, elapsed_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(stat.worker_id)
        .bind(stat.toots as i64)
        .bind(stat.tweets as i64)
        .bind(stat.instas as i64)
        .bind(stat.elapsed.as_millis() as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn worker_stats(&self, worker_id: i64) -> Result<Vec<WorkerStat>> {
        let rows = sqlx::query(
            r#"
            SELECT worker_id, toots, tweets, instas, elapsed_ms
            FROM worker_stats WHERE worker_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| WorkerStat {
                worker_id: r.get("worker_id"),
                toots: r.get::<i64, _>("toots") as u32,
                tweets: r.get::<i64, _>("tweets") as u32,
                instas: r.get::<i64, _>("instas") as u32,
                elapsed: std::time::Duration::from_millis(r.get::<i64, _>("elapsed_ms") as u64),
            })
            .collect())
    }

    pub async fn record_bridge_stat(&self, stat: &BridgeStat) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bridge_stats (bridge_id, toots, tweets, instas, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(stat.bridge_id)
        .bind(stat.toots as i64)
        .bind(stat.tweets as i64)
        .bind(stat.instas as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn bridge_stats(&self, bridge_id: i64) -> Result<Vec<BridgeStat>> {
        let rows = sqlx::query(
            r#"
            SELECT bridge_id, toots, tweets, instas
            FROM bridge_stats WHERE bridge_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(bridge_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| BridgeStat {
                bridge_id: r.get("bridge_id"),
                toots: r.get::<i64, _>("toots") as u32,
                tweets: r.get::<i64, _>("tweets") as u32,
                instas: r.get::<i64, _>("instas") as u32,
            })
            .collect())
    }
}

fn encode_settings(settings: &Settings) -> Result<String> {
    serde_json::to_string(settings).map_err(|e| {
        DbError::CorruptRow {
            table: "settings",
            reason: e.to_string(),
        }
        .into()
    })
}

fn decode_settings(body: &str) -> Result<Settings> {
    serde_json::from_str(body).map_err(|e| {
        DbError::CorruptRow {
            table: "settings",
            reason: e.to_string(),
        }
        .into()
    })
}

fn parse_network(value: &str, table: &'static str) -> Result<Network> {
    value.parse().map_err(|reason| {
        DbError::CorruptRow { table, reason }.into()
    })
}

fn mapping_from_row(r: &SqliteRow) -> Result<Mapping> {
    Ok(Mapping {
        id: Some(r.get("id")),
        source_network: parse_network(&r.get::<String, _>("source_network"), "mappings")?,
        source_id: r.get("source_id"),
        destination_network: parse_network(&r.get::<String, _>("destination_network"), "mappings")?,
        destination_id: r.get("destination_id"),
        created_at: r.get("created_at"),
    })
}

fn bridge_from_row(r: &SqliteRow) -> Result<Bridge> {
    let mastodon = match (
        r.get::<Option<String>, _>("mastodon_access_code"),
        r.get::<Option<String>, _>("mastodon_account_id"),
        r.get::<Option<i64>, _>("mastodon_host_id"),
    ) {
        (Some(access_code), Some(account_id), Some(host_id)) => Some(MastodonAccount {
            access_code,
            account_id,
            user: r.get::<Option<String>, _>("mastodon_user").unwrap_or_default(),
            host_id,
        }),
        _ => None,
    };

    let twitter = match (
        r.get::<Option<String>, _>("twitter_oauth_token"),
        r.get::<Option<String>, _>("twitter_oauth_secret"),
    ) {
        (Some(oauth_token), Some(oauth_secret)) => Some(TwitterAccount {
            oauth_token,
            oauth_secret,
            handle: r.get::<Option<String>, _>("twitter_handle").unwrap_or_default(),
        }),
        _ => None,
    };

    let instagram = match (
        r.get::<Option<String>, _>("instagram_access_code"),
        r.get::<Option<String>, _>("instagram_account_id"),
    ) {
        (Some(access_code), Some(account_id)) => Some(InstagramAccount {
            access_code,
            account_id,
            handle: r.get::<Option<String>, _>("instagram_handle").unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(Bridge {
        id: r.get("id"),
        worker_id: r.get("worker_id"),
        enabled: r.get("enabled"),
        settings_id: r.get("settings_id"),
        settings: decode_settings(&r.get::<String, _>("settings_body"))?,
        mastodon,
        twitter,
        instagram,
        mastodon_last_id: r.get("mastodon_last_id"),
        twitter_last_id: r.get("twitter_last_id"),
        instagram_last_id: r.get("instagram_last_id"),
        updated_at: r
            .get::<Option<i64>, _>("updated_at")
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
    })
}
