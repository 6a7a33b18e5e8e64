//! Store adapter for the Radiocast server
//!
//! One `Store` type over a runtime-selected sqlx driver (sqlite, mysql/
//! mariadb or postgresql). The dialect module carries every per-dialect
//! spelling; bootstrap steps are tracked in the `meta` table and applied
//! transactionally at startup.

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]

pub mod dialect;
pub mod models;
pub mod queries;

pub use dialect::{Dialect, Placeholders};
pub use queries::{CallSearch, SystemFilter};

use radiocast_core::config::DatabaseConfig;
use radiocast_core::{Error, Result};
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use std::time::Duration;
use tracing::info;

/// Default group labels seeded on first bootstrap
const DEFAULT_GROUPS: &[&str] = &["Air", "EMS", "Fire", "Interop", "Law", "Unknown"];

/// Default tag labels seeded on first bootstrap
const DEFAULT_TAGS: &[&str] = &[
    "Dispatch",
    "Emergency",
    "Fire",
    "Interop",
    "Law",
    "Tactical",
    "Untagged",
];

pub(crate) fn db_err(err: sqlx::Error) -> Error {
    Error::Database(err.to_string())
}

/// Store over a bounded connection pool
#[derive(Debug, Clone)]
pub struct Store {
    pool: sqlx::AnyPool,
    dialect: Dialect,
}

impl Store {
    /// Connect to the configured database
    ///
    /// # Errors
    ///
    /// Returns an error if the dialect is unknown or the database is
    /// unreachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        install_default_drivers();

        let dialect = Dialect::parse(&config.dialect)?;
        let url = dialect.connection_url(config);

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .max_lifetime(Duration::from_secs(config.max_lifetime))
            .connect(&url)
            .await
            .map_err(db_err)?;

        Ok(Self { pool, dialect })
    }

    /// The dialect this store speaks
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Access the underlying pool
    #[must_use]
    pub const fn pool(&self) -> &sqlx::AnyPool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to return
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Health check
    ///
    /// # Errors
    ///
    /// Returns an error if the database does not answer.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("select 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Apply pending bootstrap steps and seed defaults
    ///
    /// Applied step names are recorded in the `meta` table; each step runs
    /// inside a transaction so a partial failure rolls back.
    ///
    /// # Errors
    ///
    /// Returns an error if a step fails to apply.
    pub async fn bootstrap(&self) -> Result<()> {
        sqlx::query("create table if not exists meta (name varchar(255) not null primary key)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        for (name, statements) in bootstrap_steps(self.dialect) {
            let mut ph = Placeholders::new(self.dialect);
            let check = format!("select count(*) from meta where name = {}", ph.next());
            let applied: i64 = sqlx::query_scalar(&check)
                .bind(name)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
            if applied > 0 {
                continue;
            }

            info!(step = name, "applying bootstrap step");

            let mut tx = self.pool.begin().await.map_err(db_err)?;
            for statement in &statements {
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| Error::Database(format!("{e} while doing {statement}")))?;
            }
            let mut ph = Placeholders::new(self.dialect);
            let record = format!("insert into meta (name) values ({})", ph.next());
            sqlx::query(&record)
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
        }

        self.seed().await
    }

    /// Seed the default group and tag registries when empty
    async fn seed(&self) -> Result<()> {
        let q = |ident: &str| self.dialect.quote(ident);

        let groups: i64 = sqlx::query_scalar(&format!("select count(*) from {}", q("groups")))
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        if groups == 0 {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            for label in DEFAULT_GROUPS {
                let mut ph = Placeholders::new(self.dialect);
                let sql = format!("insert into {} (label) values ({})", q("groups"), ph.next());
                sqlx::query(&sql)
                    .bind(*label)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
            tx.commit().await.map_err(db_err)?;
        }

        let tags: i64 = sqlx::query_scalar("select count(*) from tags")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        if tags == 0 {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            for label in DEFAULT_TAGS {
                let mut ph = Placeholders::new(self.dialect);
                let sql = format!("insert into tags (label) values ({})", ph.next());
                sqlx::query(&sql)
                    .bind(*label)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
            tx.commit().await.map_err(db_err)?;
        }

        Ok(())
    }
}

/// The ordered bootstrap steps for a dialect
fn bootstrap_steps(dialect: Dialect) -> Vec<(&'static str, Vec<String>)> {
    let q = |ident: &str| dialect.quote(ident);
    let pk = dialect.auto_increment_pk();
    let blob = dialect.blob_type();

    vec![
        (
            "20240210120000-create-config-tables",
            vec![
                format!(
                    "create table systems (_id {pk}, auto_populate smallint not null default 0, \
                     blacklists text not null, id integer not null, label varchar(255) not null, \
                     led varchar(255), {} integer)",
                    q("order")
                ),
                "create unique index systems_id on systems (id)".to_string(),
                format!(
                    "create table talkgroups (_id {pk}, frequency bigint, {} varchar(255) not null, \
                     id integer not null, label varchar(255) not null, led varchar(255), \
                     name varchar(255) not null, {} integer, system_id integer not null, \
                     tag varchar(255) not null)",
                    q("group"),
                    q("order")
                ),
                "create unique index talkgroups_system_id_id on talkgroups (system_id, id)"
                    .to_string(),
                format!(
                    "create table units (_id {pk}, id integer not null, label varchar(255) not null, \
                     {} integer, system_id integer not null)",
                    q("order")
                ),
                "create unique index units_system_id_id on units (system_id, id)".to_string(),
                format!("create table {} (_id {pk}, label varchar(255) not null)", q("groups")),
                format!("create table tags (_id {pk}, label varchar(255) not null)"),
                format!(
                    "create table access_credentials (_id {pk}, code varchar(255) not null, \
                     expiration bigint, ident varchar(255), {} integer, {} integer, \
                     systems text not null)",
                    q("limit"),
                    q("order")
                ),
                "create unique index access_credentials_code on access_credentials (code)"
                    .to_string(),
                format!(
                    "create table api_keys (_id {pk}, disabled smallint not null default 0, \
                     ident varchar(255), {} varchar(255) not null, {} integer, \
                     systems text not null)",
                    q("key"),
                    q("order")
                ),
                format!(
                    "create unique index api_keys_key on api_keys ({})",
                    q("key")
                ),
                format!(
                    "create table downstreams (_id {pk}, api_key varchar(255) not null, \
                     disabled smallint not null default 0, {} integer, systems text not null, \
                     url varchar(255) not null)",
                    q("order")
                ),
                format!(
                    "create table dir_watches (_id {pk}, delay integer not null default 0, \
                     delete_after smallint not null default 0, directory varchar(255) not null, \
                     disabled smallint not null default 0, extension varchar(255), \
                     frequency bigint, mask varchar(255), {} integer, system_id integer, \
                     talkgroup_id integer, kind varchar(255), \
                     use_polling smallint not null default 0)",
                    q("order")
                ),
                "create unique index dir_watches_directory on dir_watches (directory)".to_string(),
                format!(
                    "create table configs (_id {pk}, {} varchar(255) not null, val text not null)",
                    q("key")
                ),
                format!("create unique index configs_key on configs ({})", q("key")),
            ],
        ),
        (
            "20240210120100-create-calls",
            vec![
                format!(
                    "create table calls (id {pk}, audio {blob}, audio_name varchar(255), \
                     audio_type varchar(255), audio_url text, date_time bigint not null, \
                     frequencies text not null, frequency bigint, patches text not null, \
                     source integer, sources text not null, system integer not null, \
                     talkgroup integer not null)"
                ),
                "create index calls_date_time_system_talkgroup on calls (date_time, system, talkgroup)"
                    .to_string(),
            ],
        ),
        (
            "20240210120200-create-logs",
            vec![
                format!(
                    "create table logs (_id {pk}, date_time bigint not null, \
                     level varchar(255) not null, message varchar(255) not null)"
                ),
                "create index logs_date_time_level on logs (date_time, level)".to_string(),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bootstrap_steps_are_ordered_and_named() {
        for dialect in [
            Dialect::Sqlite,
            Dialect::Mariadb,
            Dialect::Mysql,
            Dialect::Postgresql,
        ] {
            let steps = bootstrap_steps(dialect);
            assert_eq!(steps.len(), 3);
            assert!(steps[0].0 < steps[1].0);
            assert!(steps[1].0 < steps[2].0);
            for (_, statements) in steps {
                assert!(!statements.is_empty());
            }
        }
    }

    #[test]
    fn test_bootstrap_quoting_per_dialect() {
        let sqlite = bootstrap_steps(Dialect::Sqlite);
        assert!(sqlite[0].1[0].contains("\"order\" integer"));
        assert!(sqlite[0].1[0].contains("integer primary key autoincrement"));

        let mysql = bootstrap_steps(Dialect::Mysql);
        assert!(mysql[0].1[0].contains("`order` integer"));
        assert!(mysql[1].1[0].contains("longblob"));

        let postgres = bootstrap_steps(Dialect::Postgresql);
        assert!(postgres[1].1[0].contains("bytea"));
        assert!(postgres[1].1[0].contains("bigserial primary key"));
    }
}
